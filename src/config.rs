use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::store::{DEFAULT_MODEL, DEFAULT_THRESHOLD};

/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_LLM_MODEL: &str = "deepseek-chat";
const DEFAULT_LLM_BASE_URL: &str = "https://api.deepseek.com/v1";

const DEFAULT_QUEUE_CAPACITY: usize = 100;
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_ENQUEUE_TIMEOUT_SECS: u64 = 5;

const DEFAULT_SEARCH_LIMIT: usize = 10;
const DEFAULT_SUMMARY_FETCH: usize = 300;
const DEFAULT_RECENCY_WINDOW_DAYS: i64 = 7;
const DEFAULT_ASK_COOLDOWN_SECS: u64 = 10;
const DEFAULT_SUMMARY_COOLDOWN_SECS: u64 = 300;

const DEFAULT_OCR_TIMEOUT_SECS: u64 = 120;

/// Configuration for the language-model collaborators
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key; the DEEPSEEK_API_KEY environment variable overrides it
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// OpenAI-compatible chat completions endpoint base
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_LLM_MODEL.to_string(),
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
        }
    }
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

fn default_llm_base_url() -> String {
    DEFAULT_LLM_BASE_URL.to_string()
}

/// Configuration for embedding-based search
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Model name for embeddings (e.g., "multilingual-e5-small")
    #[serde(default = "default_semantic_model")]
    pub model: String,

    /// Similarity threshold [0.0, 1.0]
    #[serde(default = "default_semantic_threshold")]
    pub default_threshold: f32,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            default_threshold: DEFAULT_THRESHOLD,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

fn default_semantic_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_semantic_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

/// Configuration for the OCR ingestion pipeline
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bounded wait for a queue slot before the image is dropped
    #[serde(default = "default_enqueue_timeout_secs")]
    pub enqueue_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            enqueue_timeout_secs: DEFAULT_ENQUEUE_TIMEOUT_SECS,
        }
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_enqueue_timeout_secs() -> u64 {
    DEFAULT_ENQUEUE_TIMEOUT_SECS
}

/// Configuration for query-time retrieval
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Messages returned per search
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Messages pulled for a chat summary
    #[serde(default = "default_summary_fetch")]
    pub summary_fetch: usize,

    /// Preferred recency window for summaries; 0 disables the window
    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: i64,

    #[serde(default = "default_ask_cooldown_secs")]
    pub ask_cooldown_secs: u64,

    #[serde(default = "default_summary_cooldown_secs")]
    pub summary_cooldown_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_limit: DEFAULT_SEARCH_LIMIT,
            summary_fetch: DEFAULT_SUMMARY_FETCH,
            recency_window_days: DEFAULT_RECENCY_WINDOW_DAYS,
            ask_cooldown_secs: DEFAULT_ASK_COOLDOWN_SECS,
            summary_cooldown_secs: DEFAULT_SUMMARY_COOLDOWN_SECS,
        }
    }
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_summary_fetch() -> usize {
    DEFAULT_SUMMARY_FETCH
}

fn default_recency_window_days() -> i64 {
    DEFAULT_RECENCY_WINDOW_DAYS
}

fn default_ask_cooldown_secs() -> u64 {
    DEFAULT_ASK_COOLDOWN_SECS
}

fn default_summary_cooldown_secs() -> u64 {
    DEFAULT_SUMMARY_COOLDOWN_SECS
}

/// Configuration for the external OCR engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OcrConfig {
    /// HTTP endpoint of the OCR service; unset disables photo ingestion
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: DEFAULT_OCR_TIMEOUT_SECS,
        }
    }
}

fn default_ocr_timeout_secs() -> u64 {
    DEFAULT_OCR_TIMEOUT_SECS
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Telegram bot token; the BOT_TOKEN environment variable overrides it
    #[serde(default)]
    pub bot_token: String,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub semantic: SemanticConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) {
        let sem = &self.semantic;
        if !(0.0..=1.0).contains(&sem.default_threshold) {
            panic!(
                "semantic.default_threshold must be between 0.0 and 1.0, got {}",
                sem.default_threshold
            );
        }
        if sem.download_timeout_secs == 0 {
            panic!("semantic.download_timeout_secs must be greater than 0");
        }

        if self.pipeline.queue_capacity == 0 {
            panic!("pipeline.queue_capacity must be greater than 0");
        }
        if self.pipeline.workers == 0 {
            panic!("pipeline.workers must be greater than 0");
        }

        if self.retrieval.search_limit == 0 {
            panic!("retrieval.search_limit must be greater than 0");
        }
        if self.retrieval.summary_fetch < 2 {
            panic!("retrieval.summary_fetch must be at least 2");
        }
        if self.retrieval.recency_window_days < 0 {
            panic!("retrieval.recency_window_days must not be negative");
        }
    }

    pub fn load_with(base_path: &Path) -> Self {
        std::fs::create_dir_all(base_path).expect("cannot create data directory");

        let config_path = base_path.join("config.yaml");

        // create new if does not exist
        if !config_path.exists() {
            std::fs::write(
                &config_path,
                serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
            )
            .expect("cannot write default config");
        }

        let config_str = std::fs::read_to_string(&config_path).expect("cannot read config file");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_path_buf();
        config.apply_env_overrides();
        config.validate();

        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("BOT_TOKEN") {
            if !token.is_empty() {
                self.bot_token = token;
            }
        }
        if let Ok(key) = std::env::var("DEEPSEEK_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = key;
            }
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Recency window for summaries as a chrono duration; `None` when the
    /// window is disabled.
    pub fn recency_window(&self) -> Option<chrono::Duration> {
        if self.retrieval.recency_window_days == 0 {
            None
        } else {
            Some(chrono::Duration::days(self.retrieval.recency_window_days))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.semantic.model, DEFAULT_MODEL);
        assert_eq!(config.pipeline.queue_capacity, 100);
        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.retrieval.ask_cooldown_secs, 10);
        assert_eq!(config.retrieval.summary_cooldown_secs, 300);
        assert!(config.ocr.endpoint.is_none());
    }

    #[test]
    fn test_load_with_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path());

        assert!(dir.path().join("config.yaml").exists());
        assert_eq!(config.semantic.default_threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.base_path(), dir.path());
    }

    #[test]
    fn test_partial_config_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "retrieval:\n  search_limit: 3\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path());
        assert_eq!(config.retrieval.search_limit, 3);
        assert_eq!(config.retrieval.summary_fetch, 300);
        assert_eq!(config.pipeline.workers, 2);
    }

    #[test]
    #[should_panic(expected = "default_threshold")]
    fn test_invalid_threshold_panics() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "semantic:\n  default_threshold: 1.5\n",
        )
        .unwrap();

        Config::load_with(dir.path());
    }

    #[test]
    fn test_recency_window_disabled_at_zero() {
        let mut config = Config::default();
        assert_eq!(config.recency_window(), Some(chrono::Duration::days(7)));
        config.retrieval.recency_window_days = 0;
        assert_eq!(config.recency_window(), None);
    }
}
