//! Background cache writes
//!
//! Network-first and cache-first responses are persisted without delaying
//! the response: the strategy enqueues a write and returns immediately. A
//! single writer task drains the queue, applies each write to the store and
//! logs and counts failures. Nothing is ever reported back to the request
//! that produced the write.
//!
//! Every queued write carries the epoch it was enqueued in. Clearing the
//! caches advances the epoch, and the writer drops any write from an
//! earlier epoch instead of recreating a deleted generation.

use crate::metrics::EngineMetrics;
use crate::models::{CachedResponse, RequestKey};
use crate::store::CacheStorage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Message for the writer task
enum WriteMessage {
    Put {
        generation: String,
        key: RequestKey,
        response: CachedResponse,
        epoch: u64,
    },
    /// Acknowledged once every write queued before it has been applied
    Flush(oneshot::Sender<()>),
}

/// Handle to the background writer task
///
/// The task exits when the handle is dropped.
pub struct WriteBehind {
    tx: mpsc::UnboundedSender<WriteMessage>,
    epoch: Arc<AtomicU64>,
    metrics: Arc<EngineMetrics>,
}

impl WriteBehind {
    /// Start the writer task; must be called within a Tokio runtime
    pub fn spawn(storage: Arc<dyn CacheStorage>, metrics: Arc<EngineMetrics>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let epoch = Arc::new(AtomicU64::new(0));
        let metrics_for_writer = Arc::clone(&metrics);
        let epoch_for_writer = Arc::clone(&epoch);

        tokio::spawn(async move {
            Self::writer_task(rx, storage, metrics_for_writer, epoch_for_writer).await;
        });

        WriteBehind { tx, epoch, metrics }
    }

    /// Queue a write; never blocks and never fails the caller
    pub fn enqueue(&self, generation: &str, key: RequestKey, response: CachedResponse) {
        debug!("Queued background write: {} -> {}", key, generation);

        let message = WriteMessage::Put {
            generation: generation.to_string(),
            key,
            response,
            epoch: self.epoch.load(Ordering::SeqCst),
        };

        if self.tx.send(message).is_err() {
            warn!("Background writer is gone, dropping cache write for {}", generation);
            self.metrics.record_cache_write(false);
        }
    }

    /// Wait until every write queued so far has been applied
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriteMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Drop every write queued so far and wait for the writer to go idle
    ///
    /// Once this returns no write enqueued before the call can reach the
    /// store, so generations deleted afterwards stay deleted.
    pub async fn discard_pending(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Discarding queued writes before epoch {}", epoch);
        self.flush().await;
    }

    async fn writer_task(
        mut rx: mpsc::UnboundedReceiver<WriteMessage>,
        storage: Arc<dyn CacheStorage>,
        metrics: Arc<EngineMetrics>,
        current_epoch: Arc<AtomicU64>,
    ) {
        debug!("Background writer task started");

        while let Some(message) = rx.recv().await {
            match message {
                WriteMessage::Put {
                    generation,
                    key,
                    response,
                    epoch,
                } if epoch < current_epoch.load(Ordering::SeqCst) => {
                    debug!("Dropped write from a cleared epoch: {} in {}", key, generation);
                }
                WriteMessage::Put {
                    generation,
                    key,
                    response,
                    ..
                } => match storage.put(&generation, &key, response).await {
                    Ok(()) => {
                        metrics.record_cache_write(true);
                        debug!("Background write stored: {} in {}", key, generation);
                    }
                    Err(e) => {
                        metrics.record_cache_write(false);
                        warn!("Background write failed for {} in {}: {}", key, generation, e);
                    }
                },
                WriteMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }

        info!("Background writer task shutting down");
    }
}
