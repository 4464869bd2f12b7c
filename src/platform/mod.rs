pub mod discord;
pub mod fluxer;
mod rest;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event::{Author, Platform};

pub use self::discord::DiscordAdapter;
pub use self::fluxer::FluxerAdapter;

/// Impersonating-webhook credentials for one side of a bridge pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookCredentials {
    pub id: String,
    pub token: String,
}

impl std::fmt::Debug for WebhookCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookCredentials")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MessageRef {
    pub id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// Network failures and 5xx responses; the queue retries these.
    #[error("transient platform error: {0}")]
    Transient(String),
    /// A 429 from the platform, with its suggested delay.
    #[error("platform rate limit, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },
    /// 4xx refusals that no retry can fix (unknown message, missing access).
    #[error("permanent platform error ({status}): {message}")]
    Permanent { status: u16, message: String },
}

/// Outbound capability of one chat platform. Gateway transports live outside
/// the core; they push inbound payloads through the concrete adapter's
/// `handle_gateway_event`, which feeds the ingest pipeline.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether impersonating-webhook messages can be edited in place.
    fn supports_webhook_edit(&self) -> bool;

    async fn connect(&self) -> Result<(), PlatformError>;
    async fn disconnect(&self) -> Result<(), PlatformError>;

    async fn create_webhook(
        &self,
        channel_id: &str,
        name: &str,
    ) -> Result<Option<WebhookCredentials>, PlatformError>;

    async fn fetch_webhook(
        &self,
        channel_id: &str,
    ) -> Result<Option<WebhookCredentials>, PlatformError>;

    /// Sends through the impersonating webhook. Returns the created message
    /// id when the platform (or correlated capture) provides one.
    async fn send_webhook(
        &self,
        credentials: &WebhookCredentials,
        content: &str,
        username: &str,
        avatar_url: Option<&str>,
        channel_id: Option<&str>,
    ) -> Result<Option<String>, PlatformError>;

    /// Returns `false` when the platform does not permit editing webhook
    /// messages.
    async fn edit_webhook_message(
        &self,
        credentials: &WebhookCredentials,
        message_id: &str,
        content: &str,
    ) -> Result<bool, PlatformError>;

    async fn delete_webhook_message(
        &self,
        credentials: &WebhookCredentials,
        message_id: &str,
    ) -> Result<bool, PlatformError>;

    /// Native send, used when no webhook credentials exist. Impersonation is
    /// best effort.
    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
        impersonate: Option<&Author>,
    ) -> Result<MessageRef, PlatformError>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), PlatformError>;

    async fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), PlatformError>;
}

/// Both adapters, passed through constructors so no component reaches for a
/// global client.
#[derive(Clone)]
pub struct PlatformRegistry {
    discord: Arc<dyn PlatformAdapter>,
    fluxer: Arc<dyn PlatformAdapter>,
}

impl PlatformRegistry {
    pub fn new(discord: Arc<dyn PlatformAdapter>, fluxer: Arc<dyn PlatformAdapter>) -> Self {
        Self { discord, fluxer }
    }

    pub fn get(&self, platform: Platform) -> Arc<dyn PlatformAdapter> {
        match platform {
            Platform::Discord => self.discord.clone(),
            Platform::Fluxer => self.fluxer.clone(),
        }
    }
}
