use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::Platform;
use crate::platform::WebhookCredentials;

/// A stored link between one Discord channel and one Fluxer channel.
///
/// Webhook tokens are skipped on serialization and masked in `Debug` so they
/// never reach logs or API responses.
#[derive(Clone, Serialize)]
pub struct BridgePair {
    pub id: i64,
    pub discord_channel_id: String,
    pub discord_guild_id: String,
    pub fluxer_channel_id: String,
    pub fluxer_guild_id: Option<String>,
    pub discord_webhook_id: Option<String>,
    #[serde(skip_serializing)]
    pub discord_webhook_token: Option<String>,
    pub fluxer_webhook_id: Option<String>,
    #[serde(skip_serializing)]
    pub fluxer_webhook_token: Option<String>,
    pub is_active: bool,
    pub sync_uploads: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for BridgePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgePair")
            .field("id", &self.id)
            .field("discord_channel_id", &self.discord_channel_id)
            .field("fluxer_channel_id", &self.fluxer_channel_id)
            .field("discord_webhook_id", &self.discord_webhook_id)
            .field("fluxer_webhook_id", &self.fluxer_webhook_id)
            .field("is_active", &self.is_active)
            .field("sync_uploads", &self.sync_uploads)
            .finish_non_exhaustive()
    }
}

impl BridgePair {
    pub fn channel_on(&self, platform: Platform) -> &str {
        match platform {
            Platform::Discord => &self.discord_channel_id,
            Platform::Fluxer => &self.fluxer_channel_id,
        }
    }

    pub fn guild_on(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::Discord => Some(self.discord_guild_id.as_str()),
            Platform::Fluxer => self.fluxer_guild_id.as_deref(),
        }
    }

    pub fn webhook_on(&self, platform: Platform) -> Option<WebhookCredentials> {
        let (id, token) = match platform {
            Platform::Discord => (&self.discord_webhook_id, &self.discord_webhook_token),
            Platform::Fluxer => (&self.fluxer_webhook_id, &self.fluxer_webhook_token),
        };
        match (id, token) {
            (Some(id), Some(token)) => Some(WebhookCredentials {
                id: id.clone(),
                token: token.clone(),
            }),
            _ => None,
        }
    }

    pub fn has_webhook(&self, platform: Platform) -> bool {
        self.webhook_on(platform).is_some()
    }

    pub fn matches_channel(&self, platform: Platform, channel_id: &str) -> bool {
        self.channel_on(platform) == channel_id
    }
}

/// Insertion payload for [`BridgePair`]; ids and timestamps are assigned by
/// the store.
#[derive(Clone)]
pub struct NewBridgePair {
    pub discord_channel_id: String,
    pub discord_guild_id: String,
    pub fluxer_channel_id: String,
    pub fluxer_guild_id: Option<String>,
    pub discord_webhook: Option<WebhookCredentials>,
    pub fluxer_webhook: Option<WebhookCredentials>,
    pub sync_uploads: bool,
}

/// Association between a source message and the message the bridge produced
/// for it on the counterpart platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageMapping {
    pub id: i64,
    pub pair_id: i64,
    pub source_platform: Platform,
    pub source_message_id: String,
    pub dest_platform: Platform,
    pub dest_message_id: String,
    pub created_at: DateTime<Utc>,
}
