//! Pipeline behavior: backpressure under load, graceful drain on shutdown,
//! and the empty-result discard policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::PipelineConfig;
use crate::messages::MessageStore;
use crate::ocr::OcrEngine;
use crate::pipeline::{EnqueueError, OcrJob, OcrPipeline, OCR_TAG};
use crate::tests::stubs::{MemStore, SlowOcr, StubOcr};

const CHAT: i64 = -42;

fn job(message_id: i32) -> OcrJob {
    OcrJob {
        message_id,
        chat_id: CHAT,
        chat_username: None,
        sender: "tester".to_string(),
        date: Utc::now(),
        image: vec![0xFF, 0xD8],
    }
}

fn config(capacity: usize, workers: usize, enqueue_timeout_secs: u64) -> PipelineConfig {
    PipelineConfig {
        queue_capacity: capacity,
        workers,
        enqueue_timeout_secs,
    }
}

#[tokio::test]
async fn test_full_queue_sheds_load() {
    let store: Arc<dyn MessageStore> = Arc::new(MemStore::default());
    let ocr: Arc<dyn OcrEngine> = Arc::new(SlowOcr {
        delay: Duration::from_millis(500),
        text: "slow text".to_string(),
    });

    // One worker, one slot, no enqueue grace.
    let pipeline = OcrPipeline::start(store.clone(), ocr, &config(1, 1, 0));

    pipeline.enqueue(job(1)).await.unwrap();
    // Let the worker pick up the first job and start its slow OCR call.
    tokio::time::sleep(Duration::from_millis(150)).await;
    pipeline.enqueue(job(2)).await.unwrap();

    // Worker busy, queue full: the third image is dropped.
    match pipeline.enqueue(job(3)).await {
        Err(EnqueueError::QueueFull) => {}
        other => panic!("expected QueueFull, got {other:?}"),
    }

    pipeline.shutdown().await;
    assert_eq!(pipeline.active_workers().await, 0);
    // The dropped job is never stored; the accepted ones are.
    assert_eq!(store.count(CHAT), 2);
}

#[tokio::test]
async fn test_shutdown_drains_pending_jobs() {
    let store: Arc<dyn MessageStore> = Arc::new(MemStore::default());
    let ocr: Arc<dyn OcrEngine> = Arc::new(StubOcr(Some("drained text".to_string())));

    let pipeline = OcrPipeline::start(store.clone(), ocr, &config(10, 1, 1));

    for id in 1..=5 {
        pipeline.enqueue(job(id)).await.unwrap();
    }
    pipeline.shutdown().await;

    assert_eq!(pipeline.active_workers().await, 0);
    assert_eq!(store.count(CHAT), 5);

    let stored = store.recent(CHAT, 10, None);
    assert!(stored
        .iter()
        .all(|m| m.text == format!("{OCR_TAG} drained text")));
}

#[tokio::test]
async fn test_enqueue_after_shutdown_is_rejected() {
    let store: Arc<dyn MessageStore> = Arc::new(MemStore::default());
    let ocr: Arc<dyn OcrEngine> = Arc::new(StubOcr(Some("text".to_string())));

    let pipeline = OcrPipeline::start(store, ocr, &config(10, 2, 1));
    pipeline.shutdown().await;

    match pipeline.enqueue(job(1)).await {
        Err(EnqueueError::Closed) => {}
        other => panic!("expected Closed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_ocr_result_stores_nothing() {
    let store: Arc<dyn MessageStore> = Arc::new(MemStore::default());
    let ocr: Arc<dyn OcrEngine> = Arc::new(StubOcr(None));

    let pipeline = OcrPipeline::start(store.clone(), ocr, &config(10, 2, 1));
    pipeline.enqueue(job(1)).await.unwrap();
    pipeline.shutdown().await;

    assert_eq!(store.count(CHAT), 0);
}

#[tokio::test]
async fn test_queue_len_tracks_outstanding_jobs() {
    let store: Arc<dyn MessageStore> = Arc::new(MemStore::default());
    let ocr: Arc<dyn OcrEngine> = Arc::new(SlowOcr {
        delay: Duration::from_millis(300),
        text: "text".to_string(),
    });

    let pipeline = OcrPipeline::start(store, ocr, &config(4, 1, 1));
    assert_eq!(pipeline.queue_len(), 0);
    assert_eq!(pipeline.queue_capacity(), 4);

    pipeline.enqueue(job(1)).await.unwrap();
    pipeline.enqueue(job(2)).await.unwrap();
    assert!(pipeline.queue_len() >= 1);

    pipeline.shutdown().await;
    assert_eq!(pipeline.queue_len(), 0);
}
