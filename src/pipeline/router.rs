use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::db::PairStore;
use crate::event::{CanonicalEvent, EventKind};
use crate::kv::KvStore;
use crate::platform::PlatformRegistry;

use super::loop_filter::LoopFilter;
use super::queue::{delivery_queue_name, JobEnvelope, JobHandler, JobOutcome, JobQueue, QueuePolicy};
use super::{DeliveryAction, DeliveryJob, TargetRef};

/// Picks the delivery variant once, at routing time, so the delivery worker
/// never re-derives it.
pub(crate) fn select_action(
    kind: EventKind,
    has_webhook: bool,
    supports_webhook_edit: bool,
) -> DeliveryAction {
    match kind {
        EventKind::MsgCreate if has_webhook => DeliveryAction::CreateWithWebhook,
        EventKind::MsgCreate => DeliveryAction::CreateFallback,
        EventKind::MsgUpdate if has_webhook && supports_webhook_edit => {
            DeliveryAction::UpdateDirect
        }
        EventKind::MsgUpdate if has_webhook => DeliveryAction::UpdateWorkaround,
        // No webhook: the original went out natively, so edit it natively.
        EventKind::MsgUpdate => DeliveryAction::UpdateDirect,
        EventKind::MsgDelete => DeliveryAction::Delete,
    }
}

/// Consumer of the global ingest queue: drops echoes, looks up the bridges a
/// source channel participates in, and fans one delivery job out per bridge
/// onto the per-target-channel queue.
pub struct RouterWorker {
    pairs: Arc<dyn PairStore>,
    loop_filter: Arc<LoopFilter>,
    registry: PlatformRegistry,
    kv: Arc<dyn KvStore>,
}

impl RouterWorker {
    pub fn new(
        pairs: Arc<dyn PairStore>,
        loop_filter: Arc<LoopFilter>,
        registry: PlatformRegistry,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            pairs,
            loop_filter,
            registry,
            kv,
        }
    }

    fn delivery_queue(&self, name: String) -> JobQueue<DeliveryJob> {
        JobQueue::new(name, self.kv.clone(), QueuePolicy::delivery())
    }
}

#[async_trait]
impl JobHandler<CanonicalEvent> for RouterWorker {
    async fn handle(&self, job: &JobEnvelope<CanonicalEvent>) -> JobOutcome {
        let event = &job.payload;
        let now_ms = Utc::now().timestamp_millis();

        match self
            .loop_filter
            .hit(&event.content, &event.author.name, now_ms)
            .await
        {
            Ok(true) => {
                debug!(
                    platform = %event.source.platform,
                    channel_id = %event.source.channel_id,
                    message_id = %event.source.message_id,
                    "dropping echoed event"
                );
                return JobOutcome::Done;
            }
            Ok(false) => {}
            Err(e) => return JobOutcome::Retry(format!("loop filter check failed: {e}")),
        }

        let pairs = match self
            .pairs
            .find_active_by_channel(event.source.platform, &event.source.channel_id)
            .await
        {
            Ok(pairs) => pairs,
            Err(e) => return JobOutcome::Retry(format!("bridge lookup failed: {e}")),
        };

        if pairs.is_empty() {
            debug!(
                platform = %event.source.platform,
                channel_id = %event.source.channel_id,
                "no active bridge for channel"
            );
            return JobOutcome::Done;
        }

        for pair in &pairs {
            let target_platform = event.source.platform.other();
            let webhook = pair.webhook_on(target_platform);
            let supports_edit = self.registry.get(target_platform).supports_webhook_edit();

            let delivery = DeliveryJob {
                pair_id: pair.id,
                action: select_action(event.kind, webhook.is_some(), supports_edit),
                target: TargetRef {
                    platform: target_platform,
                    channel_id: pair.channel_on(target_platform).to_string(),
                    guild_id: pair.guild_on(target_platform).map(str::to_string),
                },
                webhook,
                sync_uploads: pair.sync_uploads,
                event: event.clone(),
            };

            let queue_name =
                delivery_queue_name(target_platform, &delivery.target.channel_id);
            debug!(
                pair_id = pair.id,
                queue = %queue_name,
                action = ?delivery.action,
                "dispatching delivery job"
            );
            if let Err(e) = self.delivery_queue(queue_name).enqueue(delivery).await {
                return JobOutcome::Retry(format!("delivery enqueue failed: {e}"));
            }
        }

        JobOutcome::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{test_pair, MemoryPairStore};
    use crate::event::{Author, Platform, SourceRef};
    use crate::kv::MemoryKv;
    use crate::platform::testing::MockAdapter;

    fn event(kind: EventKind, platform: Platform, channel: &str) -> CanonicalEvent {
        CanonicalEvent {
            kind,
            content: "hello".to_string(),
            author: Author {
                name: "alice".to_string(),
                avatar: None,
            },
            source: SourceRef {
                platform,
                message_id: "m-1".to_string(),
                channel_id: channel.to_string(),
                guild_id: Some("G_A".to_string()),
            },
            attachments: Vec::new(),
            timestamp_ms: 0,
        }
    }

    fn envelope(event: CanonicalEvent) -> JobEnvelope<CanonicalEvent> {
        JobEnvelope {
            id: "job-1".to_string(),
            attempts: 0,
            enqueued_at_ms: 0,
            payload: event,
        }
    }

    struct Fixture {
        router: RouterWorker,
        kv: Arc<dyn KvStore>,
        loop_filter: Arc<LoopFilter>,
    }

    fn fixture(pairs: Vec<crate::db::BridgePair>) -> Fixture {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let loop_filter = Arc::new(LoopFilter::new(kv.clone(), 10));
        let registry = PlatformRegistry::new(
            Arc::new(MockAdapter::new(Platform::Discord)),
            Arc::new(MockAdapter::new(Platform::Fluxer)),
        );
        let router = RouterWorker::new(
            Arc::new(MemoryPairStore::with_pairs(pairs)),
            loop_filter.clone(),
            registry,
            kv.clone(),
        );
        Fixture {
            router,
            kv,
            loop_filter,
        }
    }

    async fn claim_delivery(
        kv: Arc<dyn KvStore>,
        platform: Platform,
        channel: &str,
    ) -> Option<DeliveryJob> {
        let queue: JobQueue<DeliveryJob> = JobQueue::new(
            delivery_queue_name(platform, channel),
            kv,
            QueuePolicy::delivery(),
        );
        queue.claim().await.unwrap().map(|job| job.envelope.payload)
    }

    #[tokio::test]
    async fn create_fans_out_to_the_counterpart_queue() {
        let f = fixture(vec![test_pair(1)]);
        let outcome = f
            .router
            .handle(&envelope(event(EventKind::MsgCreate, Platform::Discord, "C_A")))
            .await;
        assert!(matches!(outcome, JobOutcome::Done));

        let job = claim_delivery(f.kv.clone(), Platform::Fluxer, "C_B")
            .await
            .expect("delivery job");
        assert_eq!(job.pair_id, 1);
        assert_eq!(job.action, DeliveryAction::CreateWithWebhook);
        assert_eq!(job.target.platform, Platform::Fluxer);
        assert_eq!(job.target.guild_id.as_deref(), Some("G_B"));
        assert_eq!(job.webhook.as_ref().map(|w| w.id.as_str()), Some("wh-f"));
    }

    #[tokio::test]
    async fn registered_echo_is_dropped_before_routing() {
        let f = fixture(vec![test_pair(1)]);
        let now_ms = Utc::now().timestamp_millis();
        f.loop_filter.register("hello", "alice", now_ms).await.unwrap();

        let outcome = f
            .router
            .handle(&envelope(event(EventKind::MsgCreate, Platform::Fluxer, "C_B")))
            .await;
        assert!(matches!(outcome, JobOutcome::Done));
        assert!(claim_delivery(f.kv.clone(), Platform::Discord, "C_A")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn channel_in_two_bridges_dispatches_once_per_bridge() {
        let mut second = test_pair(2);
        second.fluxer_channel_id = "C_B2".to_string();
        let f = fixture(vec![test_pair(1), second]);

        let outcome = f
            .router
            .handle(&envelope(event(EventKind::MsgCreate, Platform::Discord, "C_A")))
            .await;
        assert!(matches!(outcome, JobOutcome::Done));

        assert!(claim_delivery(f.kv.clone(), Platform::Fluxer, "C_B")
            .await
            .is_some());
        assert!(claim_delivery(f.kv.clone(), Platform::Fluxer, "C_B2")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn unbridged_channel_is_a_clean_drop() {
        let f = fixture(Vec::new());
        let outcome = f
            .router
            .handle(&envelope(event(EventKind::MsgCreate, Platform::Discord, "C_A")))
            .await;
        assert!(matches!(outcome, JobOutcome::Done));
    }

    #[tokio::test]
    async fn update_toward_fluxer_uses_the_workaround() {
        let f = fixture(vec![test_pair(1)]);
        f.router
            .handle(&envelope(event(EventKind::MsgUpdate, Platform::Discord, "C_A")))
            .await;

        let job = claim_delivery(f.kv.clone(), Platform::Fluxer, "C_B")
            .await
            .expect("delivery job");
        assert_eq!(job.action, DeliveryAction::UpdateWorkaround);
    }

    #[tokio::test]
    async fn update_toward_discord_edits_in_place() {
        let f = fixture(vec![test_pair(1)]);
        f.router
            .handle(&envelope(event(EventKind::MsgUpdate, Platform::Fluxer, "C_B")))
            .await;

        let job = claim_delivery(f.kv.clone(), Platform::Discord, "C_A")
            .await
            .expect("delivery job");
        assert_eq!(job.action, DeliveryAction::UpdateDirect);
    }

    #[test]
    fn action_selection_covers_the_variant_table() {
        use DeliveryAction::*;
        assert_eq!(select_action(EventKind::MsgCreate, true, true), CreateWithWebhook);
        assert_eq!(select_action(EventKind::MsgCreate, false, true), CreateFallback);
        assert_eq!(select_action(EventKind::MsgUpdate, true, true), UpdateDirect);
        assert_eq!(select_action(EventKind::MsgUpdate, true, false), UpdateWorkaround);
        assert_eq!(select_action(EventKind::MsgUpdate, false, false), UpdateDirect);
        assert_eq!(select_action(EventKind::MsgDelete, true, true), Delete);
    }
}
