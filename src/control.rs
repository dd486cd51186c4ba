//! Control channel
//!
//! Clients send small JSON commands to the engine:
//!
//! ```json
//! {"type": "SKIP_WAITING"}
//! {"type": "CLEAR_IMAGE_CACHE"}
//! {"type": "CLEAR_ALL_CACHES"}
//! ```
//!
//! Every command answers with `{"success": true}` or
//! `{"success": false, "error": "..."}`. Commands are idempotent: clearing a
//! generation that does not exist succeeds. `CLEAR_ALL_CACHES` also drops
//! background writes still queued, so a cleared store stays empty.

use crate::control_metrics::ControlMetrics;
use crate::error::{EngineError, Result};
use crate::lifecycle::Lifecycle;
use crate::store::CacheStorage;
use crate::write_behind::WriteBehind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Commands accepted on the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate a waiting worker immediately
    SkipWaiting,
    /// Delete the current image generation
    ClearImageCache,
    /// Delete every generation
    ClearAllCaches,
}

impl ControlMessage {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlMessage::SkipWaiting => "skip_waiting",
            ControlMessage::ClearImageCache => "clear_image_cache",
            ControlMessage::ClearAllCaches => "clear_all_caches",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlReply {
    pub fn ok() -> Self {
        ControlReply {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        ControlReply {
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn to_json(&self) -> String {
        // Two plain fields; serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"success\":false}"))
    }
}

/// A command plus an optional port for the reply
#[derive(Debug)]
pub struct ControlEnvelope {
    pub message: ControlMessage,
    pub reply: Option<oneshot::Sender<ControlReply>>,
}

impl ControlEnvelope {
    /// Envelope without a reply port
    pub fn fire(message: ControlMessage) -> Self {
        ControlEnvelope {
            message,
            reply: None,
        }
    }

    /// Envelope plus the receiver its reply will arrive on
    pub fn with_reply(message: ControlMessage) -> (Self, oneshot::Receiver<ControlReply>) {
        let (tx, rx) = oneshot::channel();
        (
            ControlEnvelope {
                message,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// Executes control commands against the store and the lifecycle
pub struct ControlHandler {
    storage: Arc<dyn CacheStorage>,
    lifecycle: Arc<Lifecycle>,
    writer: Arc<WriteBehind>,
    image_cache: String,
    metrics: ControlMetrics,
}

impl ControlHandler {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        lifecycle: Arc<Lifecycle>,
        writer: Arc<WriteBehind>,
        image_cache: String,
        metrics: ControlMetrics,
    ) -> Self {
        ControlHandler {
            storage,
            lifecycle,
            writer,
            image_cache,
            metrics,
        }
    }

    pub fn metrics(&self) -> &ControlMetrics {
        &self.metrics
    }

    pub async fn handle(&self, message: ControlMessage) -> ControlReply {
        let command = message.as_str();
        let start = Instant::now();
        self.metrics.record_command(command);

        let result = match message {
            ControlMessage::SkipWaiting => self.skip_waiting().await,
            ControlMessage::ClearImageCache => self.clear_image_cache().await,
            ControlMessage::ClearAllCaches => self.clear_all_caches().await,
        };

        self.metrics.record_duration(command, start.elapsed());
        self.metrics.record_result(command, result.is_ok());

        match result {
            Ok(()) => {
                debug!("Control command {} succeeded", command);
                ControlReply::ok()
            }
            Err(e) => {
                warn!("Control command {} failed: {}", command, e);
                ControlReply::failed(e.to_string())
            }
        }
    }

    /// Parse and execute a raw JSON command
    ///
    /// Malformed JSON and unknown command types produce a failed reply.
    pub async fn handle_json(&self, raw: &str) -> ControlReply {
        match parse_message(raw) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                warn!("Rejected control message: {}", e);
                self.metrics.record_command("invalid");
                self.metrics.record_result("invalid", false);
                ControlReply::failed(e.to_string())
            }
        }
    }

    async fn skip_waiting(&self) -> Result<()> {
        match self.lifecycle.skip_waiting().await? {
            Some(report) => info!(
                "Skip-waiting activated worker: deleted={:?}, claimed={}",
                report.deleted, report.claimed
            ),
            None => debug!("Skip-waiting: nothing waiting"),
        }
        Ok(())
    }

    async fn clear_image_cache(&self) -> Result<()> {
        let existed = self.storage.delete(&self.image_cache).await?;
        info!("Cleared image cache {} (existed={})", self.image_cache, existed);
        self.metrics
            .record_cleared(ControlMessage::ClearImageCache.as_str(), existed as usize);
        Ok(())
    }

    async fn clear_all_caches(&self) -> Result<()> {
        self.writer.discard_pending().await;

        let mut cleared = 0;
        for name in self.storage.keys().await? {
            if self.storage.delete(&name).await? {
                cleared += 1;
            }
        }
        info!("Cleared all caches: {} generations removed", cleared);
        self.metrics
            .record_cleared(ControlMessage::ClearAllCaches.as_str(), cleared);
        Ok(())
    }
}

/// Parse a control message from JSON
pub fn parse_message(raw: &str) -> Result<ControlMessage> {
    serde_json::from_str(raw)
        .map_err(|e| EngineError::Control(format!("invalid control message: {}", e)))
}

/// Process envelopes sequentially until every sender is dropped
pub fn spawn_control_loop(
    handler: Arc<ControlHandler>,
    buffer: usize,
) -> (mpsc::Sender<ControlEnvelope>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ControlEnvelope>(buffer);

    let handle = tokio::spawn(async move {
        debug!("Control loop started");
        while let Some(envelope) = rx.recv().await {
            let reply = handler.handle(envelope.message).await;
            if let Some(port) = envelope.reply {
                if port.send(reply).is_err() {
                    debug!("Control reply dropped: requester went away");
                }
            }
        }
        info!("Control loop shutting down");
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_messages() {
        assert_eq!(
            parse_message(r#"{"type":"SKIP_WAITING"}"#).unwrap(),
            ControlMessage::SkipWaiting
        );
        assert_eq!(
            parse_message(r#"{"type":"CLEAR_IMAGE_CACHE"}"#).unwrap(),
            ControlMessage::ClearImageCache
        );
        assert_eq!(
            parse_message(r#"{"type":"CLEAR_ALL_CACHES","extra":1}"#).unwrap(),
            ControlMessage::ClearAllCaches
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert!(matches!(
            parse_message(r#"{"type":"REBOOT"}"#),
            Err(EngineError::Control(_))
        ));
        assert!(parse_message("not json").is_err());
        assert!(parse_message(r#"{"kind":"SKIP_WAITING"}"#).is_err());
    }

    #[test]
    fn test_message_serializes_with_type_tag() {
        let json = serde_json::to_string(&ControlMessage::ClearAllCaches).unwrap();
        assert_eq!(json, r#"{"type":"CLEAR_ALL_CACHES"}"#);
    }

    #[test]
    fn test_reply_shape() {
        assert_eq!(ControlReply::ok().to_json(), r#"{"success":true}"#);
        assert_eq!(
            ControlReply::failed("boom").to_json(),
            r#"{"success":false,"error":"boom"}"#
        );
    }
}
