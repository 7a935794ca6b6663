use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder sender for messages whose author cannot be resolved.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Composite identity of a stored message. At most one record ever exists
/// per key; later writes with the same key are silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub chat_id: i64,
    pub message_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i32,
    pub chat_id: i64,

    /// Present only for public chats; used to build deep links.
    pub chat_username: Option<String>,

    pub text: String,
    pub sender: String,
    pub date: DateTime<Utc>,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        MessageKey {
            chat_id: self.chat_id,
            message_id: self.message_id,
        }
    }

    /// Deep link to the original message. Public chats only; private chats
    /// have no stable URL.
    pub fn link(&self) -> Option<String> {
        self.chat_username
            .as_ref()
            .map(|username| format!("https://t.me/{}/{}", username, self.message_id))
    }
}

/// Ephemeral result of one retrieval pass. Produced per query, consumed
/// once, never persisted.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub query: String,
    pub messages: Vec<Message>,
    pub total_found: usize,
}

/// Diagnostics snapshot for the `/debug` command.
#[derive(Debug, Clone)]
pub struct DebugReport {
    pub chat_id: i64,
    pub query: String,
    pub total_messages: usize,
    pub semantic_results: usize,
    pub fuzzy_results: usize,
    pub sample_texts: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("embedding error: {0}")]
    Embedding(#[from] crate::store::EmbeddingError),

    #[error("persistence error: {0}")]
    Persist(#[from] std::io::Error),

    #[error("message log error: {0}")]
    Log(#[from] csv::Error),

    #[error("recency window out of range")]
    WindowOutOfRange,
}

/// Durable, chat-partitioned message store.
///
/// Search methods never surface backend failures: callers see an empty
/// result for both "nothing matched" and "search subsystem unavailable".
/// The distinction is logged where it happens.
pub trait MessageStore: Send + Sync {
    /// Persist a message, computing its embedding from `text`.
    ///
    /// Empty-after-trim text and duplicate `(chat_id, message_id)` keys are
    /// silent no-ops, not errors.
    fn save(&self, message: Message) -> Result<(), StoreError>;

    /// Up to `limit` messages, oldest to newest. When `window` is given,
    /// messages inside the window are preferred and older ones backfill up
    /// to `limit`.
    fn recent(&self, chat_id: i64, limit: usize, window: Option<chrono::Duration>)
        -> Vec<Message>;

    /// Nearest stored messages by embedding similarity, restricted to
    /// `chat_id`. Empty on degenerate queries or any backend failure.
    fn semantic_search(&self, chat_id: i64, query: &str, limit: usize) -> Vec<Message>;

    /// Lexical fallback tolerant of OCR character confusions. Newest first.
    fn fuzzy_search(&self, chat_id: i64, query: &str, limit: usize) -> Vec<Message>;

    /// Total stored messages for a chat. Diagnostics only.
    fn count(&self, chat_id: i64) -> usize;

    fn debug_report(&self, chat_id: i64, query: &str) -> DebugReport;
}

/// Parse a timestamp from a persisted record. Naive timestamps are treated
/// as UTC; this is the normalization point for every read path.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    None
}
