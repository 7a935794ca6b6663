//! Bounded OCR ingestion pipeline.
//!
//! Photos are converted to searchable text off the message-handling path: a
//! bounded queue feeds a fixed pool of workers, each running OCR on one job
//! at a time. Under sustained bursts the queue sheds load (a full queue
//! drops the image after a bounded wait) rather than growing without bound.
//! Jobs are never retried: an OCR failure or empty result discards the job
//! after logging.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::messages::{Message, MessageStore};
use crate::ocr::OcrEngine;

/// Tag prepended to OCR-derived message text.
pub const OCR_TAG: &str = "[Image OCR]";

/// How often an idle worker re-checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a failed job so a persistently failing collaborator does not
/// spin the worker.
const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// One unit of OCR work: the originating message's identity plus the raw
/// image bytes. Lives only inside the queue; discarded after processing.
#[derive(Debug)]
pub struct OcrJob {
    pub message_id: i32,
    pub chat_id: i64,
    pub chat_username: Option<String>,
    pub sender: String,
    pub date: DateTime<Utc>,
    pub image: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("ocr queue full, image dropped")]
    QueueFull,

    #[error("pipeline is shutting down")]
    Closed,
}

pub struct OcrPipeline {
    tx: mpsc::Sender<OcrJob>,
    rx: Arc<Mutex<mpsc::Receiver<OcrJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    store: Arc<dyn MessageStore>,
    ocr: Arc<dyn OcrEngine>,
    enqueue_timeout: Duration,
    capacity: usize,
}

impl OcrPipeline {
    /// Spawn the worker pool and return the running pipeline.
    pub fn start(
        store: Arc<dyn MessageStore>,
        ocr: Arc<dyn OcrEngine>,
        config: &PipelineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();

        let mut workers = Vec::with_capacity(config.workers);
        for worker_id in 1..=config.workers {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                rx.clone(),
                cancel.clone(),
                store.clone(),
                ocr.clone(),
            )));
        }
        log::info!("started {} ocr workers", config.workers);

        Self {
            tx,
            rx,
            workers: Mutex::new(workers),
            cancel,
            store,
            ocr,
            enqueue_timeout: Duration::from_secs(config.enqueue_timeout_secs),
            capacity: config.queue_capacity,
        }
    }

    /// Enqueue a job, waiting up to the configured timeout for a slot.
    ///
    /// A timeout is the load-shedding path: the image is dropped and never
    /// reprocessed.
    pub async fn enqueue(&self, job: OcrJob) -> Result<(), EnqueueError> {
        if self.cancel.is_cancelled() {
            return Err(EnqueueError::Closed);
        }

        match self.tx.send_timeout(job, self.enqueue_timeout).await {
            Ok(()) => {
                log::info!("queued image for ocr (queue size: {})", self.queue_len());
                Ok(())
            }
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(EnqueueError::QueueFull),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn queue_capacity(&self) -> usize {
        self.capacity
    }

    pub async fn active_workers(&self) -> usize {
        self.workers
            .lock()
            .await
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Graceful shutdown: stop intake, cancel the workers, await their
    /// termination, then drain the queue so no job is abandoned mid-flight.
    /// Jobs still queued are processed (or discarded by their own error
    /// policy) before this returns.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            if let Err(err) = handle.await {
                log::error!("ocr worker panicked: {err}");
            }
        }

        let mut rx = self.rx.lock().await;
        let mut drained = 0usize;
        while let Ok(job) = rx.try_recv() {
            if let Err(err) = process_job(job, &self.store, &self.ocr).await {
                log::error!("discarding ocr job during shutdown drain: {err:#}");
            }
            drained += 1;
        }
        if drained > 0 {
            log::info!("drained {drained} queued ocr jobs during shutdown");
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<OcrJob>>>,
    cancel: CancellationToken,
    store: Arc<dyn MessageStore>,
    ocr: Arc<dyn OcrEngine>,
) {
    log::info!("ocr worker {worker_id} started");

    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = timeout(POLL_INTERVAL, rx.recv()) => match received {
                    // Poll timeout: loop around to observe cancellation.
                    Err(_) => continue,
                    Ok(None) => break,
                    Ok(Some(job)) => job,
                },
            }
        };

        log::info!(
            "ocr worker {worker_id} processing image from chat {}",
            job.chat_id
        );

        if let Err(err) = process_job(job, &store, &ocr).await {
            log::error!("ocr worker {worker_id}: {err:#}");
            tokio::time::sleep(ERROR_PAUSE).await;
        }
    }

    log::info!("ocr worker {worker_id} shutting down");
}

/// Run OCR on one job and commit the result. Empty OCR output stores
/// nothing; that is a normal outcome, not an error.
async fn process_job(
    job: OcrJob,
    store: &Arc<dyn MessageStore>,
    ocr: &Arc<dyn OcrEngine>,
) -> anyhow::Result<()> {
    let OcrJob {
        message_id,
        chat_id,
        chat_username,
        sender,
        date,
        image,
    } = job;

    // OCR is blocking and CPU/GPU-bound; keep it off the event loop.
    let ocr = ocr.clone();
    let extracted = tokio::task::spawn_blocking(move || ocr.extract_text(&image)).await??;

    let Some(text) = extracted.filter(|t| !t.trim().is_empty()) else {
        log::info!("no text found in image from chat {chat_id}");
        return Ok(());
    };

    let chars = text.chars().count();
    let message = Message {
        message_id,
        chat_id,
        chat_username,
        text: format!("{OCR_TAG} {text}"),
        sender,
        date,
    };

    // save embeds the text, which is CPU work as well.
    let store = store.clone();
    tokio::task::spawn_blocking(move || store.save(message)).await??;

    log::info!("stored {chars} ocr chars for chat {chat_id}");
    Ok(())
}
