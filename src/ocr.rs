//! OCR capability contract.
//!
//! The engine itself is external; this module defines the seam the
//! ingestion pipeline calls through and an HTTP-backed implementation.
//! Availability is decided once at startup: either the pipeline gets a
//! ready engine, or photo ingestion is disabled for the whole run.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::config::OcrConfig;

/// Results below this confidence are discarded as noise.
const MIN_CONFIDENCE: f32 = 0.3;

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("ocr request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("ocr engine init failed: {0}")]
    Init(String),
}

/// Extracts text from image bytes. Blocking; the pipeline runs it off the
/// event loop. `None` means "no usable text", which is not an error.
pub trait OcrEngine: Send + Sync {
    fn extract_text(&self, image: &[u8]) -> Result<Option<String>, OcrError>;
}

/// Startup decision about OCR. Checked before every enqueue; there is no
/// lazy retry once the engine is declared unavailable.
pub enum OcrAvailability {
    Ready(Arc<dyn OcrEngine>),
    Unavailable(String),
}

/// One-time OCR initialization.
pub fn init(config: &OcrConfig) -> OcrAvailability {
    let endpoint = match &config.endpoint {
        Some(endpoint) if !endpoint.is_empty() => endpoint.clone(),
        _ => {
            return OcrAvailability::Unavailable(
                "no ocr.endpoint configured; photo ingestion disabled".to_string(),
            )
        }
    };

    match RemoteOcr::new(endpoint, Duration::from_secs(config.timeout_secs)) {
        Ok(engine) => OcrAvailability::Ready(Arc::new(engine)),
        Err(err) => OcrAvailability::Unavailable(err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: Option<String>,
    confidence: Option<f32>,
}

/// OCR over HTTP: posts raw image bytes, expects `{text, confidence}`.
pub struct RemoteOcr {
    http: reqwest::blocking::Client,
    endpoint: String,
}

impl RemoteOcr {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, OcrError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OcrError::Init(e.to_string()))?;

        Ok(Self { http, endpoint })
    }
}

impl OcrEngine for RemoteOcr {
    fn extract_text(&self, image: &[u8]) -> Result<Option<String>, OcrError> {
        let response: OcrResponse = self
            .http
            .post(&self.endpoint)
            .header("content-type", "application/octet-stream")
            .body(image.to_vec())
            .send()?
            .error_for_status()?
            .json()?;

        if response.confidence.unwrap_or(1.0) < MIN_CONFIDENCE {
            log::info!("discarding low-confidence ocr result");
            return Ok(None);
        }

        let text = response
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(text)
    }
}
