//! Deterministic stand-ins for the external collaborators: embedding model,
//! OCR engine, language model, and the message store itself.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::llm::{LlmError, Summarizer};
use crate::messages::{DebugReport, Message, MessageKey, MessageStore, StoreError};
use crate::ocr::{OcrEngine, OcrError};
use crate::store::{Embedder, EmbeddingError};

/// Maps each word to a hash bucket. Texts sharing words get correlated
/// vectors, so similarity behaves like a crude bag-of-words model.
pub struct StubEmbedder {
    dims: usize,
}

impl StubEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl Embedder for StubEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dims];
        for word in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            vector[(hasher.finish() as usize) % self.dims] += 1.0;
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_id_hash(&self) -> [u8; 32] {
        [42u8; 32]
    }
}

pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::EmbeddingFailed("stub failure".to_string()))
    }

    fn dimensions(&self) -> usize {
        8
    }

    fn model_id_hash(&self) -> [u8; 32] {
        [0u8; 32]
    }
}

/// OCR engine that always answers with a fixed result.
pub struct StubOcr(pub Option<String>);

impl OcrEngine for StubOcr {
    fn extract_text(&self, _image: &[u8]) -> Result<Option<String>, OcrError> {
        Ok(self.0.clone())
    }
}

/// OCR engine that holds its worker for `delay` before answering.
pub struct SlowOcr {
    pub delay: Duration,
    pub text: String,
}

impl OcrEngine for SlowOcr {
    fn extract_text(&self, _image: &[u8]) -> Result<Option<String>, OcrError> {
        std::thread::sleep(self.delay);
        Ok(Some(self.text.clone()))
    }
}

/// In-memory store where semantic and fuzzy search are both plain substring
/// containment. Enough to test orchestration without embedding machinery.
#[derive(Default)]
pub struct MemStore {
    messages: Mutex<HashMap<MessageKey, Message>>,
}

impl MemStore {
    fn matching(&self, chat_id: i64, query: &str, limit: usize) -> Vec<Message> {
        let needle = query.to_lowercase();
        let messages = self.messages.lock().unwrap();
        let mut found: Vec<Message> = messages
            .values()
            .filter(|m| m.chat_id == chat_id && m.text.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.date.cmp(&a.date));
        found.truncate(limit);
        found
    }
}

impl MessageStore for MemStore {
    fn save(&self, message: Message) -> Result<(), StoreError> {
        if message.text.trim().is_empty() {
            return Ok(());
        }
        self.messages
            .lock()
            .unwrap()
            .entry(message.key())
            .or_insert(message);
        Ok(())
    }

    fn recent(&self, chat_id: i64, limit: usize, _window: Option<chrono::Duration>) -> Vec<Message> {
        let messages = self.messages.lock().unwrap();
        let mut found: Vec<Message> = messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.date.cmp(&a.date));
        found.truncate(limit);
        found.reverse();
        found
    }

    fn semantic_search(&self, chat_id: i64, query: &str, limit: usize) -> Vec<Message> {
        self.matching(chat_id, query, limit)
    }

    fn fuzzy_search(&self, chat_id: i64, query: &str, limit: usize) -> Vec<Message> {
        self.matching(chat_id, query, limit)
    }

    fn count(&self, chat_id: i64) -> usize {
        self.messages
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.chat_id == chat_id)
            .count()
    }

    fn debug_report(&self, chat_id: i64, query: &str) -> DebugReport {
        DebugReport {
            chat_id,
            query: query.to_string(),
            total_messages: self.count(chat_id),
            semantic_results: self.semantic_search(chat_id, query, 20).len(),
            fuzzy_results: self.fuzzy_search(chat_id, query, 20).len(),
            sample_texts: vec![],
        }
    }
}

/// Wrapper counting how often each search path is hit.
pub struct CountingStore {
    inner: Arc<dyn MessageStore>,
    pub semantic_calls: AtomicUsize,
    pub fuzzy_calls: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn MessageStore>) -> Self {
        Self {
            inner,
            semantic_calls: AtomicUsize::new(0),
            fuzzy_calls: AtomicUsize::new(0),
        }
    }
}

impl MessageStore for CountingStore {
    fn save(&self, message: Message) -> Result<(), StoreError> {
        self.inner.save(message)
    }

    fn recent(&self, chat_id: i64, limit: usize, window: Option<chrono::Duration>) -> Vec<Message> {
        self.inner.recent(chat_id, limit, window)
    }

    fn semantic_search(&self, chat_id: i64, query: &str, limit: usize) -> Vec<Message> {
        self.semantic_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.semantic_search(chat_id, query, limit)
    }

    fn fuzzy_search(&self, chat_id: i64, query: &str, limit: usize) -> Vec<Message> {
        self.fuzzy_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fuzzy_search(chat_id, query, limit)
    }

    fn count(&self, chat_id: i64) -> usize {
        self.inner.count(chat_id)
    }

    fn debug_report(&self, chat_id: i64, query: &str) -> DebugReport {
        self.inner.debug_report(chat_id, query)
    }
}

/// Summarizer that records the prompt it was given.
#[derive(Default)]
pub struct RecordingSummarizer {
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl Summarizer for RecordingSummarizer {
    async fn summarize(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("stub summary".to_string())
    }
}

/// A message `minutes_ago` minutes in the past.
pub fn message_at(chat_id: i64, message_id: i32, text: &str, minutes_ago: i64) -> Message {
    Message {
        message_id,
        chat_id,
        chat_username: None,
        text: text.to_string(),
        sender: "tester".to_string(),
        date: Utc::now() - chrono::Duration::minutes(minutes_ago),
    }
}

/// A message at a fixed absolute timestamp.
pub fn message_on(chat_id: i64, message_id: i32, text: &str, date: DateTime<Utc>) -> Message {
    Message {
        message_id,
        chat_id,
        chat_username: None,
        text: text.to_string(),
        sender: "tester".to_string(),
        date,
    }
}

pub fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}
