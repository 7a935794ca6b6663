//! Retrieval orchestration: the two-stage search protocol, answer
//! composition, chat summaries, and per-chat command cooldowns.
//!
//! The orchestrator owns no state beyond its collaborators; every call is
//! scoped to one chat and one query. Store calls run on the blocking pool
//! because embedding and regex scans are CPU work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::llm::{LlmError, Summarizer};
use crate::messages::{Message, MessageStore, SearchOutcome};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("search task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Result of a `/summary` request.
pub enum SummaryOutcome {
    /// Too few stored messages to summarize; carries the current count.
    NotEnoughMessages(usize),
    Summary(String),
}

pub struct RetrievalOrchestrator {
    store: Arc<dyn MessageStore>,
    summarizer: Arc<dyn Summarizer>,
    search_limit: usize,
    summary_fetch: usize,
    recency_window: Option<chrono::Duration>,
}

impl RetrievalOrchestrator {
    pub fn new(
        store: Arc<dyn MessageStore>,
        summarizer: Arc<dyn Summarizer>,
        search_limit: usize,
        summary_fetch: usize,
        recency_window: Option<chrono::Duration>,
    ) -> Self {
        Self {
            store,
            summarizer,
            search_limit,
            summary_fetch,
            recency_window,
        }
    }

    /// Two-stage retrieval: semantic first, lexical fallback only when the
    /// semantic pass finds nothing. Both stages are scoped to `chat_id`.
    pub async fn search(
        &self,
        chat_id: i64,
        query: &str,
    ) -> Result<SearchOutcome, OrchestratorError> {
        let store = self.store.clone();
        let limit = self.search_limit;
        let owned_query = query.to_string();

        let messages = tokio::task::spawn_blocking(move || {
            let found = store.semantic_search(chat_id, &owned_query, limit);
            if !found.is_empty() {
                return found;
            }
            log::info!("semantic search empty for chat {chat_id}, trying fuzzy fallback");
            store.fuzzy_search(chat_id, &owned_query, limit)
        })
        .await?;

        Ok(SearchOutcome {
            query: query.to_string(),
            total_found: messages.len(),
            messages,
        })
    }

    /// Compose an answer to `question` from retrieved messages.
    pub async fn answer(
        &self,
        question: &str,
        outcome: &SearchOutcome,
    ) -> Result<String, OrchestratorError> {
        let mut prompt = format!("Question: {question}\n\nMessages:\n");
        for message in &outcome.messages {
            prompt.push_str(&format_line(message));
            prompt.push('\n');
        }

        Ok(self.summarizer.summarize(&prompt).await?)
    }

    /// Summarize a chat's recent history.
    ///
    /// Pulls up to `summary_fetch` messages, preferring the configured
    /// recency window, and asks the summarizer to match the transcript's
    /// dominant language.
    pub async fn summary(&self, chat_id: i64) -> Result<SummaryOutcome, OrchestratorError> {
        let store = self.store.clone();
        let fetch = self.summary_fetch;
        let window = self.recency_window;
        let messages =
            tokio::task::spawn_blocking(move || store.recent(chat_id, fetch, window)).await?;

        if messages.len() < 2 {
            return Ok(SummaryOutcome::NotEnoughMessages(messages.len()));
        }

        let mut prompt = String::from(
            "Summarize the main topics and takeaways of this chat conversation. \
             Respond in the dominant language of the messages.\n\nMessages:\n",
        );
        for message in &messages {
            prompt.push_str(&format_line(message));
            prompt.push('\n');
        }

        let summary = self.summarizer.summarize(&prompt).await?;
        Ok(SummaryOutcome::Summary(summary))
    }
}

fn format_line(message: &Message) -> String {
    format!(
        "[{}] {}: {}",
        message.date.format("%Y-%m-%d %H:%M"),
        message.sender,
        message.text
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Ask,
    Summary,
}

/// Per-chat rate limiting for the expensive commands. Rejected attempts do
/// not reset the timer; only a successful acquisition does.
pub struct CooldownTracker {
    ask: Duration,
    summary: Duration,
    last: std::sync::Mutex<HashMap<(i64, CommandKind), Instant>>,
}

impl CooldownTracker {
    pub fn new(ask: Duration, summary: Duration) -> Self {
        Self {
            ask,
            summary,
            last: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// `Ok` starts the cooldown; `Err` carries the remaining wait.
    pub fn try_acquire(&self, chat_id: i64, kind: CommandKind) -> Result<(), Duration> {
        let cooldown = match kind {
            CommandKind::Ask => self.ask,
            CommandKind::Summary => self.summary,
        };

        let mut last = self.last.lock().expect("cooldown lock poisoned");
        let now = Instant::now();

        if let Some(&previous) = last.get(&(chat_id, kind)) {
            let elapsed = now.duration_since(previous);
            if elapsed < cooldown {
                return Err(cooldown - elapsed);
            }
        }

        last.insert((chat_id, kind), now);
        Ok(())
    }
}
