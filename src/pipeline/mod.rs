pub mod circuit_breaker;
pub mod delivery;
pub mod ingest;
pub mod loop_filter;
pub mod queue;
pub mod rate_limiter;
pub mod router;

use serde::{Deserialize, Serialize};

use crate::event::{CanonicalEvent, Platform};
use crate::platform::WebhookCredentials;

pub use self::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitBreakers, CircuitError};
pub use self::delivery::DeliveryWorker;
pub use self::ingest::Ingestor;
pub use self::loop_filter::LoopFilter;
pub use self::queue::{
    delivery_queue_name, spawn_worker, JobEnvelope, JobHandler, JobOutcome, JobQueue,
    QueuePolicy, INGEST_QUEUE,
};
pub use self::rate_limiter::RateLimiter;
pub use self::router::RouterWorker;

/// Destination side of a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub platform: Platform,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
}

/// How the delivery worker applies the event. The router picks the variant
/// once; the worker only executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryAction {
    CreateWithWebhook,
    CreateFallback,
    UpdateDirect,
    UpdateWorkaround,
    Delete,
}

/// One unit of work on a `deliver:<platform>:<channel>` queue.
///
/// Credentials are a snapshot from routing time; the worker reloads the pair
/// before dispatch since a repair may have replaced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub pair_id: i64,
    pub action: DeliveryAction,
    pub target: TargetRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookCredentials>,
    #[serde(default)]
    pub sync_uploads: bool,
    pub event: CanonicalEvent,
}
