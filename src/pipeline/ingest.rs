use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::event::{CanonicalEvent, EventKind, Platform};
use crate::kv::{KvError, KvStore};
use crate::normalize;
use crate::utils::preview_text;

use super::queue::{JobQueue, QueuePolicy, INGEST_QUEUE};

/// Front door of the pipeline: platform gateways hand raw payloads in here,
/// the normalizer projects them onto [`CanonicalEvent`], and good events go
/// onto the durable ingest queue. Malformed payloads are dropped with a log
/// line, per the error policy for bad input.
pub struct Ingestor {
    queue: JobQueue<CanonicalEvent>,
}

impl Ingestor {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            queue: JobQueue::new(INGEST_QUEUE, kv, QueuePolicy::ingest()),
        }
    }

    pub fn queue(&self) -> JobQueue<CanonicalEvent> {
        self.queue.clone()
    }

    /// Entry point for gateway transports delivering raw platform payloads.
    pub async fn submit_raw(&self, platform: Platform, kind: EventKind, raw: &Value) {
        let received_at_ms = Utc::now().timestamp_millis();
        match normalize::normalize(platform, kind, raw, received_at_ms) {
            Ok(event) => {
                if let Err(e) = self.submit(event).await {
                    warn!(%platform, error = %e, "failed to enqueue inbound event");
                }
            }
            Err(e) => {
                warn!(%platform, error = %e, "dropping malformed inbound event");
            }
        }
    }

    /// Enqueues an already-normalized event.
    pub async fn submit(&self, event: CanonicalEvent) -> Result<String, KvError> {
        debug!(
            platform = %event.source.platform,
            kind = ?event.kind,
            channel_id = %event.source.channel_id,
            message_id = %event.source.message_id,
            content_preview = %preview_text(&event.content),
            "inbound event enqueued"
        );
        self.queue.enqueue(event).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::kv::MemoryKv;

    #[tokio::test]
    async fn raw_payload_lands_on_the_ingest_queue() {
        let ingestor = Ingestor::new(Arc::new(MemoryKv::new()));
        let raw = json!({
            "id": "100",
            "channel_id": "200",
            "content": "hello",
            "author": {"id": "1", "username": "alice"},
            "timestamp": "2024-05-01T12:00:00Z"
        });

        ingestor
            .submit_raw(Platform::Discord, EventKind::MsgCreate, &raw)
            .await;

        let queue = ingestor.queue();
        let job = queue.claim().await.unwrap().expect("event queued");
        assert_eq!(job.envelope.payload.content, "hello");
        assert_eq!(job.envelope.payload.source.platform, Platform::Discord);
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let ingestor = Ingestor::new(Arc::new(MemoryKv::new()));
        // Create events must carry an author.
        let raw = json!({"id": "100", "channel_id": "200", "content": "hi"});

        ingestor
            .submit_raw(Platform::Discord, EventKind::MsgCreate, &raw)
            .await;

        assert!(ingestor.queue().claim().await.unwrap().is_none());
    }
}
