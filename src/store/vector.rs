//! The `MessageStore` implementation backed by the message log, the vector
//! index, and an embedder.
//!
//! Search never surfaces backend failures to callers: an embedding or index
//! error is logged and presented as an empty result, because the retrieval
//! protocol treats "nothing found" and "search unavailable" identically and
//! falls through to the lexical matcher.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use regex::RegexBuilder;

use crate::messages::{DebugReport, Message, MessageKey, MessageStore, StoreError};
use crate::store::embeddings::Embedder;
use crate::store::fuzzy::build_patterns;
use crate::store::index::VectorIndex;
use crate::store::storage::{MessageLog, StoredRecord, VectorStorage, VectorStorageError};

/// Sample size for debug reports
const DEBUG_SAMPLE_COUNT: usize = 5;
const DEBUG_SAMPLE_CHARS: usize = 200;

struct StoreInner {
    records: HashMap<MessageKey, StoredRecord>,
    index: VectorIndex,
}

pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    inner: RwLock<StoreInner>,
    log: MessageLog,
    vectors: VectorStorage,
    threshold: f32,
}

impl VectorStore {
    /// Open (or create) the store in `dir`.
    ///
    /// Reloads the message log, then the embedding cache. A model or format
    /// change invalidates the cache and every logged message is re-embedded.
    pub fn open(
        dir: &Path,
        embedder: Arc<dyn Embedder>,
        threshold: f32,
    ) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;

        let log = MessageLog::new(dir.join("messages.csv"));
        let vectors = VectorStorage::new(dir.join("vectors.bin"));

        let records_list = log.load()?;
        log::info!("loaded {} messages from log", records_list.len());

        let model_id = embedder.model_id_hash();
        let dimensions = embedder.dimensions();

        let mut index = if vectors.exists() {
            match vectors.load(&model_id, dimensions) {
                Ok(index) => {
                    log::info!("loaded {} vectors from cache", index.len());
                    index
                }
                Err(VectorStorageError::ModelMismatch) => {
                    log::warn!("embedding model changed, re-embedding message log");
                    VectorIndex::new(dimensions)
                }
                Err(VectorStorageError::VersionMismatch(file_ver, _)) => {
                    log::warn!("vector cache version {file_ver} unsupported, re-embedding");
                    VectorIndex::new(dimensions)
                }
                Err(err) => {
                    log::error!("vector cache unreadable ({err}), re-embedding");
                    VectorIndex::new(dimensions)
                }
            }
        } else {
            VectorIndex::new(dimensions)
        };

        let mut records = HashMap::with_capacity(records_list.len());
        let mut re_embedded = 0usize;
        for record in records_list {
            let key = record.message.key();
            if !index.contains(key) {
                match embedder.embed(&record.message.text) {
                    Ok(embedding) => {
                        if let Err(err) = index.insert(key, embedding) {
                            log::warn!("message {key:?} not indexed: {err}");
                        } else {
                            re_embedded += 1;
                        }
                    }
                    Err(err) => log::error!("re-embedding failed for {key:?}: {err}"),
                }
            }
            records.insert(key, record);
        }
        if re_embedded > 0 {
            log::info!("re-embedded {re_embedded} messages");
        }

        Ok(Self {
            embedder,
            inner: RwLock::new(StoreInner { records, index }),
            log,
            vectors,
            threshold,
        })
    }

    /// Write the embedding cache to disk. Called at shutdown and after bulk
    /// ingestion; the message log itself is already durable per save.
    pub fn persist_vectors(&self) -> Result<(), VectorStorageError> {
        let inner = self.inner.read().expect("store lock poisoned");
        self.vectors
            .save(&inner.index, &self.embedder.model_id_hash())
    }

    /// All of a chat's messages, newest first.
    fn chat_messages_desc(inner: &StoreInner, chat_id: i64) -> Vec<Message> {
        let mut messages: Vec<Message> = inner
            .records
            .values()
            .filter(|r| r.message.chat_id == chat_id)
            .map(|r| r.message.clone())
            .collect();
        messages.sort_by(|a, b| b.date.cmp(&a.date));
        messages
    }

    /// Windowed recency query: prefer messages newer than `now - window`,
    /// backfill with older ones up to `limit`, return oldest first.
    ///
    /// Fallible so that the caller can drop to the unfiltered scan; the
    /// cutoff computation is the failure point (out-of-range windows).
    fn recent_windowed(
        inner: &StoreInner,
        chat_id: i64,
        limit: usize,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError> {
        let cutoff = now
            .checked_sub_signed(window)
            .ok_or(StoreError::WindowOutOfRange)?;

        let all_desc = Self::chat_messages_desc(inner, chat_id);
        let (inside, outside): (Vec<Message>, Vec<Message>) =
            all_desc.into_iter().partition(|m| m.date >= cutoff);

        let mut picked: Vec<Message> = inside.into_iter().take(limit).collect();
        if picked.len() < limit {
            picked.extend(outside.into_iter().take(limit - picked.len()));
        }

        picked.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(picked)
    }

    /// Unfiltered scan: newest `limit` messages, returned oldest first.
    fn recent_unfiltered(inner: &StoreInner, chat_id: i64, limit: usize) -> Vec<Message> {
        let mut messages = Self::chat_messages_desc(inner, chat_id);
        messages.truncate(limit);
        messages.reverse();
        messages
    }
}

impl MessageStore for VectorStore {
    fn save(&self, message: Message) -> Result<(), StoreError> {
        if message.text.trim().is_empty() {
            log::debug!("skipping empty message {:?}", message.key());
            return Ok(());
        }

        let key = message.key();
        {
            let inner = self.inner.read().expect("store lock poisoned");
            if inner.records.contains_key(&key) {
                log::debug!("message {key:?} already stored, skipping");
                return Ok(());
            }
        }

        let embedding = self.embedder.embed(&message.text)?;

        let record = StoredRecord {
            message,
            created_at: Utc::now(),
        };

        let mut inner = self.inner.write().expect("store lock poisoned");
        // Re-check under the write lock: a racing save of the same key must
        // remain a no-op, never a duplicate.
        if inner.records.contains_key(&key) {
            return Ok(());
        }

        if let Err(err) = inner.index.insert(key, embedding) {
            // Unindexable text (e.g. zero-norm embedding) is still stored;
            // it just stays invisible to semantic search.
            log::warn!("message {key:?} not indexed: {err}");
        }

        self.log.append(&record)?;
        inner.records.insert(key, record);
        Ok(())
    }

    fn recent(&self, chat_id: i64, limit: usize, window: Option<Duration>) -> Vec<Message> {
        let inner = self.inner.read().expect("store lock poisoned");

        match window {
            Some(window) => {
                match Self::recent_windowed(&inner, chat_id, limit, window, Utc::now()) {
                    Ok(messages) => messages,
                    Err(err) => {
                        log::warn!(
                            "windowed recency query failed for chat {chat_id} ({err}), \
                             falling back to unfiltered scan"
                        );
                        Self::recent_unfiltered(&inner, chat_id, limit)
                    }
                }
            }
            None => Self::recent_unfiltered(&inner, chat_id, limit),
        }
    }

    fn semantic_search(&self, chat_id: i64, query: &str, limit: usize) -> Vec<Message> {
        if query.trim().is_empty() {
            return vec![];
        }

        let query_embedding = match self.embedder.embed(query) {
            Ok(embedding) => embedding,
            Err(err) => {
                log::error!("query embedding failed for chat {chat_id}: {err}");
                return vec![];
            }
        };

        let inner = self.inner.read().expect("store lock poisoned");
        let scored = match inner
            .index
            .search(&query_embedding, chat_id, self.threshold, limit)
        {
            Ok(scored) => scored,
            Err(err) => {
                log::error!("vector search failed for chat {chat_id}: {err}");
                return vec![];
            }
        };

        let messages: Vec<Message> = scored
            .iter()
            .filter_map(|s| inner.records.get(&s.key))
            .map(|r| r.message.clone())
            .collect();

        log::info!(
            "semantic search found {} messages for chat {chat_id}",
            messages.len()
        );
        messages
    }

    fn fuzzy_search(&self, chat_id: i64, query: &str, limit: usize) -> Vec<Message> {
        let inner = self.inner.read().expect("store lock poisoned");
        let messages_desc = Self::chat_messages_desc(&inner, chat_id);
        drop(inner);

        for pattern in build_patterns(query) {
            let regex = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                Ok(regex) => regex,
                Err(err) => {
                    log::debug!("skipping uncompilable pattern {pattern:?}: {err}");
                    continue;
                }
            };

            let hits: Vec<Message> = messages_desc
                .iter()
                .filter(|m| regex.is_match(&m.text))
                .take(limit)
                .cloned()
                .collect();

            // First pattern with any match wins; later patterns are only
            // looser approximations of the same query.
            if !hits.is_empty() {
                log::info!(
                    "fuzzy pattern {pattern:?} matched {} messages in chat {chat_id}",
                    hits.len()
                );
                return hits;
            }
        }

        vec![]
    }

    fn count(&self, chat_id: i64) -> usize {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .records
            .values()
            .filter(|r| r.message.chat_id == chat_id)
            .count()
    }

    fn debug_report(&self, chat_id: i64, query: &str) -> DebugReport {
        let total_messages = self.count(chat_id);
        let semantic_results = self.semantic_search(chat_id, query, 20).len();
        let fuzzy_results = self.fuzzy_search(chat_id, query, 20).len();

        let sample_texts = self
            .recent(chat_id, DEBUG_SAMPLE_COUNT, None)
            .iter()
            .map(|m| {
                let mut text: String = m.text.chars().take(DEBUG_SAMPLE_CHARS).collect();
                if text.len() < m.text.len() {
                    text.push_str("...");
                }
                format!("ID: {} - {}", m.message_id, text)
            })
            .collect();

        DebugReport {
            chat_id,
            query: query.to_string(),
            total_messages,
            semantic_results,
            fuzzy_results,
            sample_texts,
        }
    }
}
