use async_trait::async_trait;

use super::models::{BridgePair, MessageMapping, NewBridgePair};
use super::DatabaseError;
use crate::event::Platform;
use crate::platform::WebhookCredentials;

#[async_trait]
pub trait PairStore: Send + Sync {
    async fn create_pair(&self, new: &NewBridgePair) -> Result<BridgePair, DatabaseError>;
    async fn get_pair_by_id(&self, id: i64) -> Result<Option<BridgePair>, DatabaseError>;
    async fn get_pair_by_channels(
        &self,
        discord_channel_id: &str,
        fluxer_channel_id: &str,
    ) -> Result<Option<BridgePair>, DatabaseError>;
    /// Active pairs whose side on `platform` is `channel_id`. A channel may
    /// participate in several bridges.
    async fn find_active_by_channel(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Vec<BridgePair>, DatabaseError>;
    async fn list_pairs(&self, limit: i64, offset: i64) -> Result<Vec<BridgePair>, DatabaseError>;
    async fn list_active_pairs(&self) -> Result<Vec<BridgePair>, DatabaseError>;
    async fn set_active(&self, id: i64, active: bool) -> Result<(), DatabaseError>;
    /// Updates webhook credentials; `None` leaves that side untouched.
    async fn update_webhooks(
        &self,
        id: i64,
        discord: Option<&WebhookCredentials>,
        fluxer: Option<&WebhookCredentials>,
    ) -> Result<(), DatabaseError>;
    async fn delete_pair(&self, id: i64) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait MessageMapStore: Send + Sync {
    /// Insert-or-replace keyed on `(pair_id, source_platform,
    /// source_message_id)`; retried deliveries must not error on re-insert.
    async fn upsert_mapping(&self, mapping: &MessageMapping) -> Result<(), DatabaseError>;
    async fn get_mapping(
        &self,
        pair_id: i64,
        source_platform: Platform,
        source_message_id: &str,
    ) -> Result<Option<MessageMapping>, DatabaseError>;
    async fn delete_mapping(
        &self,
        pair_id: i64,
        source_platform: Platform,
        source_message_id: &str,
    ) -> Result<(), DatabaseError>;
    async fn delete_mappings_for_pair(&self, pair_id: i64) -> Result<(), DatabaseError>;
}
