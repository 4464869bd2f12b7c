use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::event::Platform;
use crate::platform::WebhookCredentials;

use super::models::{BridgePair, MessageMapping, NewBridgePair};
use super::stores::{MessageMapStore, PairStore};
use super::DatabaseError;

/// In-memory [`PairStore`] for pipeline tests.
#[derive(Default)]
pub struct MemoryPairStore {
    pairs: Mutex<Vec<BridgePair>>,
    next_id: Mutex<i64>,
}

impl MemoryPairStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pairs(pairs: Vec<BridgePair>) -> Self {
        let next_id = pairs.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        Self {
            pairs: Mutex::new(pairs),
            next_id: Mutex::new(next_id),
        }
    }
}

#[async_trait]
impl PairStore for MemoryPairStore {
    async fn create_pair(&self, new: &NewBridgePair) -> Result<BridgePair, DatabaseError> {
        let mut pairs = self.pairs.lock().unwrap();
        if pairs.iter().any(|p| {
            p.discord_channel_id == new.discord_channel_id
                && p.fluxer_channel_id == new.fluxer_channel_id
        }) {
            return Err(DatabaseError::Conflict(
                "bridge_pairs unique constraint".to_string(),
            ));
        }
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let now = Utc::now();
        let pair = BridgePair {
            id: *next_id,
            discord_channel_id: new.discord_channel_id.clone(),
            discord_guild_id: new.discord_guild_id.clone(),
            fluxer_channel_id: new.fluxer_channel_id.clone(),
            fluxer_guild_id: new.fluxer_guild_id.clone(),
            discord_webhook_id: new.discord_webhook.as_ref().map(|w| w.id.clone()),
            discord_webhook_token: new.discord_webhook.as_ref().map(|w| w.token.clone()),
            fluxer_webhook_id: new.fluxer_webhook.as_ref().map(|w| w.id.clone()),
            fluxer_webhook_token: new.fluxer_webhook.as_ref().map(|w| w.token.clone()),
            is_active: true,
            sync_uploads: new.sync_uploads,
            created_at: now,
            updated_at: now,
        };
        pairs.push(pair.clone());
        Ok(pair)
    }

    async fn get_pair_by_id(&self, id: i64) -> Result<Option<BridgePair>, DatabaseError> {
        Ok(self
            .pairs
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn get_pair_by_channels(
        &self,
        discord_channel_id: &str,
        fluxer_channel_id: &str,
    ) -> Result<Option<BridgePair>, DatabaseError> {
        Ok(self
            .pairs
            .lock()
            .unwrap()
            .iter()
            .find(|p| {
                p.discord_channel_id == discord_channel_id
                    && p.fluxer_channel_id == fluxer_channel_id
            })
            .cloned())
    }

    async fn find_active_by_channel(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Vec<BridgePair>, DatabaseError> {
        Ok(self
            .pairs
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.is_active && p.matches_channel(platform, channel_id))
            .cloned()
            .collect())
    }

    async fn list_pairs(
        &self,
        _limit: i64,
        _offset: i64,
    ) -> Result<Vec<BridgePair>, DatabaseError> {
        Ok(self.pairs.lock().unwrap().clone())
    }

    async fn list_active_pairs(&self) -> Result<Vec<BridgePair>, DatabaseError> {
        Ok(self
            .pairs
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }

    async fn set_active(&self, id: i64, active: bool) -> Result<(), DatabaseError> {
        for pair in self.pairs.lock().unwrap().iter_mut() {
            if pair.id == id {
                pair.is_active = active;
                pair.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn update_webhooks(
        &self,
        id: i64,
        discord: Option<&WebhookCredentials>,
        fluxer: Option<&WebhookCredentials>,
    ) -> Result<(), DatabaseError> {
        for pair in self.pairs.lock().unwrap().iter_mut() {
            if pair.id == id {
                if let Some(discord) = discord {
                    pair.discord_webhook_id = Some(discord.id.clone());
                    pair.discord_webhook_token = Some(discord.token.clone());
                }
                if let Some(fluxer) = fluxer {
                    pair.fluxer_webhook_id = Some(fluxer.id.clone());
                    pair.fluxer_webhook_token = Some(fluxer.token.clone());
                }
                pair.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn delete_pair(&self, id: i64) -> Result<(), DatabaseError> {
        self.pairs.lock().unwrap().retain(|p| p.id != id);
        Ok(())
    }
}

/// In-memory [`MessageMapStore`] for pipeline tests.
#[derive(Default)]
pub struct MemoryMessageMapStore {
    mappings: Mutex<Vec<MessageMapping>>,
}

impl MemoryMessageMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<MessageMapping> {
        self.mappings.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageMapStore for MemoryMessageMapStore {
    async fn upsert_mapping(&self, mapping: &MessageMapping) -> Result<(), DatabaseError> {
        let mut mappings = self.mappings.lock().unwrap();
        mappings.retain(|m| {
            !(m.pair_id == mapping.pair_id
                && m.source_platform == mapping.source_platform
                && m.source_message_id == mapping.source_message_id)
        });
        mappings.push(mapping.clone());
        Ok(())
    }

    async fn get_mapping(
        &self,
        pair_id: i64,
        source_platform: Platform,
        source_message_id: &str,
    ) -> Result<Option<MessageMapping>, DatabaseError> {
        Ok(self
            .mappings
            .lock()
            .unwrap()
            .iter()
            .find(|m| {
                m.pair_id == pair_id
                    && m.source_platform == source_platform
                    && m.source_message_id == source_message_id
            })
            .cloned())
    }

    async fn delete_mapping(
        &self,
        pair_id: i64,
        source_platform: Platform,
        source_message_id: &str,
    ) -> Result<(), DatabaseError> {
        self.mappings.lock().unwrap().retain(|m| {
            !(m.pair_id == pair_id
                && m.source_platform == source_platform
                && m.source_message_id == source_message_id)
        });
        Ok(())
    }

    async fn delete_mappings_for_pair(&self, pair_id: i64) -> Result<(), DatabaseError> {
        self.mappings
            .lock()
            .unwrap()
            .retain(|m| m.pair_id != pair_id);
        Ok(())
    }
}

/// A [`BridgePair`] with sensible defaults for tests.
pub fn test_pair(id: i64) -> BridgePair {
    let now = Utc::now();
    BridgePair {
        id,
        discord_channel_id: "C_A".to_string(),
        discord_guild_id: "G_A".to_string(),
        fluxer_channel_id: "C_B".to_string(),
        fluxer_guild_id: Some("G_B".to_string()),
        discord_webhook_id: Some("wh-d".to_string()),
        discord_webhook_token: Some("tok-d".to_string()),
        fluxer_webhook_id: Some("wh-f".to_string()),
        fluxer_webhook_token: Some("tok-f".to_string()),
        is_active: true,
        sync_uploads: false,
        created_at: now,
        updated_at: now,
    }
}
