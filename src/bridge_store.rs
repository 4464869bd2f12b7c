use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::db::{BridgePair, DatabaseError, NewBridgePair, PairStore};
use crate::event::Platform;
use crate::platform::{PlatformRegistry, WebhookCredentials};

const WEBHOOK_NAME: &str = "Janus Bridge";

/// Lifecycle notifications the supervisor consumes. A bounded channel rather
/// than in-process pub/sub keeps the wiring explicit.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Created { pair: BridgePair },
    Toggled { pair: BridgePair },
    Deleted { pair_id: i64 },
}

#[derive(Debug, Clone)]
pub struct CreateBridgeRequest {
    pub discord_channel_id: String,
    pub discord_guild_id: String,
    pub fluxer_channel_id: String,
    pub fluxer_guild_id: Option<String>,
    pub sync_uploads: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeStoreError {
    #[error("a bridge between these channels already exists")]
    DuplicatePair,
    #[error("bridge {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// CRUD over bridge pairs with the webhook side effects: creation tries to
/// obtain an impersonating webhook on each side (either may fail, repair
/// fills the gap later) and every mutation is announced on the event
/// channel.
pub struct BridgeStore {
    pairs: Arc<dyn PairStore>,
    registry: PlatformRegistry,
    events: mpsc::Sender<BridgeEvent>,
}

impl BridgeStore {
    pub fn new(
        pairs: Arc<dyn PairStore>,
        registry: PlatformRegistry,
        events: mpsc::Sender<BridgeEvent>,
    ) -> Self {
        Self {
            pairs,
            registry,
            events,
        }
    }

    async fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).await.is_err() {
            warn!("bridge event receiver is gone");
        }
    }

    /// Reuses an existing channel webhook when one is visible, otherwise
    /// creates one. A failure on one side is tolerated; delivery falls back
    /// to native sends there until a repair succeeds.
    async fn obtain_webhook(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Option<WebhookCredentials> {
        let adapter = self.registry.get(platform);

        match adapter.fetch_webhook(channel_id).await {
            Ok(Some(credentials)) => return Some(credentials),
            Ok(None) => {}
            Err(e) => warn!(%platform, channel_id, error = %e, "webhook lookup failed"),
        }

        match adapter.create_webhook(channel_id, WEBHOOK_NAME).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(%platform, channel_id, error = %e, "webhook creation failed");
                None
            }
        }
    }

    pub async fn create(&self, request: CreateBridgeRequest) -> Result<BridgePair, BridgeStoreError> {
        if self
            .pairs
            .get_pair_by_channels(&request.discord_channel_id, &request.fluxer_channel_id)
            .await?
            .is_some()
        {
            return Err(BridgeStoreError::DuplicatePair);
        }

        let discord_webhook = self
            .obtain_webhook(Platform::Discord, &request.discord_channel_id)
            .await;
        let fluxer_webhook = self
            .obtain_webhook(Platform::Fluxer, &request.fluxer_channel_id)
            .await;

        let pair = self
            .pairs
            .create_pair(&NewBridgePair {
                discord_channel_id: request.discord_channel_id,
                discord_guild_id: request.discord_guild_id,
                fluxer_channel_id: request.fluxer_channel_id,
                fluxer_guild_id: request.fluxer_guild_id,
                discord_webhook,
                fluxer_webhook,
                sync_uploads: request.sync_uploads,
            })
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict(_) => BridgeStoreError::DuplicatePair,
                other => BridgeStoreError::Database(other),
            })?;

        info!(
            pair_id = pair.id,
            discord_channel = %pair.discord_channel_id,
            fluxer_channel = %pair.fluxer_channel_id,
            "bridge created"
        );
        self.emit(BridgeEvent::Created { pair: pair.clone() }).await;
        Ok(pair)
    }

    pub async fn get(&self, id: i64) -> Result<BridgePair, BridgeStoreError> {
        self.pairs
            .get_pair_by_id(id)
            .await?
            .ok_or(BridgeStoreError::NotFound(id))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<BridgePair>, BridgeStoreError> {
        Ok(self.pairs.list_pairs(limit, offset).await?)
    }

    pub async fn delete(&self, id: i64) -> Result<(), BridgeStoreError> {
        let pair = self.get(id).await?;
        self.pairs.delete_pair(pair.id).await?;
        info!(pair_id = pair.id, "bridge deleted");
        self.emit(BridgeEvent::Deleted { pair_id: pair.id }).await;
        Ok(())
    }

    pub async fn toggle(&self, id: i64, active: bool) -> Result<BridgePair, BridgeStoreError> {
        self.get(id).await?;
        self.pairs.set_active(id, active).await?;
        let pair = self.get(id).await?;
        info!(pair_id = id, active, "bridge toggled");
        self.emit(BridgeEvent::Toggled { pair: pair.clone() }).await;
        Ok(pair)
    }

    /// Re-creates whichever webhook is missing; a no-op when both sides hold
    /// credentials.
    pub async fn repair(&self, id: i64) -> Result<BridgePair, BridgeStoreError> {
        let pair = self.get(id).await?;

        let discord = if pair.has_webhook(Platform::Discord) {
            None
        } else {
            self.obtain_webhook(Platform::Discord, &pair.discord_channel_id)
                .await
        };
        let fluxer = if pair.has_webhook(Platform::Fluxer) {
            None
        } else {
            self.obtain_webhook(Platform::Fluxer, &pair.fluxer_channel_id)
                .await
        };

        if discord.is_none() && fluxer.is_none() {
            return Ok(pair);
        }

        self.pairs
            .update_webhooks(id, discord.as_ref(), fluxer.as_ref())
            .await?;
        info!(
            pair_id = id,
            repaired_discord = discord.is_some(),
            repaired_fluxer = fluxer.is_some(),
            "bridge webhooks repaired"
        );
        self.get(id).await
    }

    /// Startup sweep: repair every active pair that lacks credentials on
    /// either side. Returns how many pairs were touched.
    pub async fn repair_missing(&self) -> Result<usize, BridgeStoreError> {
        let mut repaired = 0;
        for pair in self.pairs.list_active_pairs().await? {
            if pair.has_webhook(Platform::Discord) && pair.has_webhook(Platform::Fluxer) {
                continue;
            }
            match self.repair(pair.id).await {
                Ok(_) => repaired += 1,
                Err(e) => warn!(pair_id = pair.id, error = %e, "startup repair failed"),
            }
        }
        Ok(repaired)
    }
}
