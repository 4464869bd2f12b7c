use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::db::manager::Pool;
use crate::db::schema::{bridge_pairs, message_mappings};
use crate::event::Platform;
use crate::platform::WebhookCredentials;

use super::models::{BridgePair, MessageMapping, NewBridgePair};
use super::DatabaseError;

fn parse_platform(s: &str) -> Result<Platform, DatabaseError> {
    s.parse()
        .map_err(|e: String| DatabaseError::Query(format!("invalid platform column: {e}")))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = bridge_pairs)]
struct DbBridgePair {
    id: i64,
    discord_channel_id: String,
    discord_guild_id: String,
    fluxer_channel_id: String,
    fluxer_guild_id: Option<String>,
    discord_webhook_id: Option<String>,
    discord_webhook_token: Option<String>,
    fluxer_webhook_id: Option<String>,
    fluxer_webhook_token: Option<String>,
    is_active: bool,
    sync_uploads: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DbBridgePair> for BridgePair {
    fn from(row: DbBridgePair) -> Self {
        BridgePair {
            id: row.id,
            discord_channel_id: row.discord_channel_id,
            discord_guild_id: row.discord_guild_id,
            fluxer_channel_id: row.fluxer_channel_id,
            fluxer_guild_id: row.fluxer_guild_id,
            discord_webhook_id: row.discord_webhook_id,
            discord_webhook_token: row.discord_webhook_token,
            fluxer_webhook_id: row.fluxer_webhook_id,
            fluxer_webhook_token: row.fluxer_webhook_token,
            is_active: row.is_active,
            sync_uploads: row.sync_uploads,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = bridge_pairs)]
struct NewDbBridgePair<'a> {
    discord_channel_id: &'a str,
    discord_guild_id: &'a str,
    fluxer_channel_id: &'a str,
    fluxer_guild_id: Option<&'a str>,
    discord_webhook_id: Option<&'a str>,
    discord_webhook_token: Option<&'a str>,
    fluxer_webhook_id: Option<&'a str>,
    fluxer_webhook_token: Option<&'a str>,
    is_active: bool,
    sync_uploads: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(AsChangeset)]
#[diesel(table_name = bridge_pairs)]
struct WebhookChanges<'a> {
    discord_webhook_id: Option<&'a str>,
    discord_webhook_token: Option<&'a str>,
    fluxer_webhook_id: Option<&'a str>,
    fluxer_webhook_token: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = message_mappings)]
struct DbMessageMapping {
    id: i64,
    pair_id: i64,
    source_platform: String,
    source_message_id: String,
    dest_platform: String,
    dest_message_id: String,
    created_at: DateTime<Utc>,
}

impl DbMessageMapping {
    fn to_message_mapping(&self) -> Result<MessageMapping, DatabaseError> {
        Ok(MessageMapping {
            id: self.id,
            pair_id: self.pair_id,
            source_platform: parse_platform(&self.source_platform)?,
            source_message_id: self.source_message_id.clone(),
            dest_platform: parse_platform(&self.dest_platform)?,
            dest_message_id: self.dest_message_id.clone(),
            created_at: self.created_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = message_mappings)]
struct NewDbMessageMapping<'a> {
    pair_id: i64,
    source_platform: &'a str,
    source_message_id: &'a str,
    dest_platform: &'a str,
    dest_message_id: &'a str,
    created_at: DateTime<Utc>,
}

pub struct PostgresPairStore {
    pool: Pool,
}

impl PostgresPairStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn get_conn(
    pool: &Pool,
) -> Result<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<PgConnection>>, DatabaseError>
{
    pool.get()
        .map_err(|e| DatabaseError::Connection(e.to_string()))
}

#[async_trait]
impl super::PairStore for PostgresPairStore {
    async fn create_pair(&self, new: &NewBridgePair) -> Result<BridgePair, DatabaseError> {
        let new = new.clone();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            let now = Utc::now();
            let row = NewDbBridgePair {
                discord_channel_id: &new.discord_channel_id,
                discord_guild_id: &new.discord_guild_id,
                fluxer_channel_id: &new.fluxer_channel_id,
                fluxer_guild_id: new.fluxer_guild_id.as_deref(),
                discord_webhook_id: new.discord_webhook.as_ref().map(|w| w.id.as_str()),
                discord_webhook_token: new.discord_webhook.as_ref().map(|w| w.token.as_str()),
                fluxer_webhook_id: new.fluxer_webhook.as_ref().map(|w| w.id.as_str()),
                fluxer_webhook_token: new.fluxer_webhook.as_ref().map(|w| w.token.as_str()),
                is_active: true,
                sync_uploads: new.sync_uploads,
                created_at: now,
                updated_at: now,
            };

            diesel::insert_into(bridge_pairs::table)
                .values(&row)
                .get_result::<DbBridgePair>(&mut conn)
                .map(BridgePair::from)
                .map_err(DatabaseError::from_diesel)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_pair_by_id(&self, pair_id: i64) -> Result<Option<BridgePair>, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema::bridge_pairs::dsl::*;
            bridge_pairs
                .filter(id.eq(pair_id))
                .select(DbBridgePair::as_select())
                .first::<DbBridgePair>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))
                .map(|row| row.map(BridgePair::from))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_pair_by_channels(
        &self,
        discord_channel: &str,
        fluxer_channel: &str,
    ) -> Result<Option<BridgePair>, DatabaseError> {
        let discord_channel = discord_channel.to_string();
        let fluxer_channel = fluxer_channel.to_string();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema::bridge_pairs::dsl::*;
            bridge_pairs
                .filter(discord_channel_id.eq(discord_channel))
                .filter(fluxer_channel_id.eq(fluxer_channel))
                .select(DbBridgePair::as_select())
                .first::<DbBridgePair>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))
                .map(|row| row.map(BridgePair::from))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn find_active_by_channel(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Vec<BridgePair>, DatabaseError> {
        let channel = channel_id.to_string();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema::bridge_pairs::dsl::*;
            let rows = match platform {
                Platform::Discord => bridge_pairs
                    .filter(discord_channel_id.eq(channel))
                    .filter(is_active.eq(true))
                    .select(DbBridgePair::as_select())
                    .load::<DbBridgePair>(&mut conn),
                Platform::Fluxer => bridge_pairs
                    .filter(fluxer_channel_id.eq(channel))
                    .filter(is_active.eq(true))
                    .select(DbBridgePair::as_select())
                    .load::<DbBridgePair>(&mut conn),
            }
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(rows.into_iter().map(BridgePair::from).collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_pairs(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BridgePair>, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema::bridge_pairs::dsl::*;
            let rows = bridge_pairs
                .order(id.asc())
                .limit(limit)
                .offset(offset)
                .select(DbBridgePair::as_select())
                .load::<DbBridgePair>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(rows.into_iter().map(BridgePair::from).collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_active_pairs(&self) -> Result<Vec<BridgePair>, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema::bridge_pairs::dsl::*;
            let rows = bridge_pairs
                .filter(is_active.eq(true))
                .order(id.asc())
                .select(DbBridgePair::as_select())
                .load::<DbBridgePair>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(rows.into_iter().map(BridgePair::from).collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn set_active(&self, pair_id: i64, active: bool) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema::bridge_pairs::dsl::*;
            diesel::update(bridge_pairs.filter(id.eq(pair_id)))
                .set((is_active.eq(active), updated_at.eq(Utc::now())))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn update_webhooks(
        &self,
        pair_id: i64,
        discord: Option<&WebhookCredentials>,
        fluxer: Option<&WebhookCredentials>,
    ) -> Result<(), DatabaseError> {
        let discord = discord.cloned();
        let fluxer = fluxer.cloned();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            let changes = WebhookChanges {
                discord_webhook_id: discord.as_ref().map(|w| w.id.as_str()),
                discord_webhook_token: discord.as_ref().map(|w| w.token.as_str()),
                fluxer_webhook_id: fluxer.as_ref().map(|w| w.id.as_str()),
                fluxer_webhook_token: fluxer.as_ref().map(|w| w.token.as_str()),
                updated_at: Utc::now(),
            };

            diesel::update(bridge_pairs::table.filter(bridge_pairs::id.eq(pair_id)))
                .set(changes)
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn delete_pair(&self, pair_id: i64) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema::bridge_pairs::dsl::*;
            diesel::delete(bridge_pairs.filter(id.eq(pair_id)))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

pub struct PostgresMessageMapStore {
    pool: Pool,
}

impl PostgresMessageMapStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::MessageMapStore for PostgresMessageMapStore {
    async fn upsert_mapping(&self, mapping: &MessageMapping) -> Result<(), DatabaseError> {
        let mapping = mapping.clone();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema::message_mappings::dsl::*;

            let row = NewDbMessageMapping {
                pair_id: mapping.pair_id,
                source_platform: mapping.source_platform.as_str(),
                source_message_id: &mapping.source_message_id,
                dest_platform: mapping.dest_platform.as_str(),
                dest_message_id: &mapping.dest_message_id,
                created_at: mapping.created_at,
            };

            diesel::insert_into(message_mappings)
                .values(&row)
                .on_conflict((pair_id, source_platform, source_message_id))
                .do_update()
                .set((
                    dest_platform.eq(mapping.dest_platform.as_str()),
                    dest_message_id.eq(&mapping.dest_message_id),
                ))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_mapping(
        &self,
        pair: i64,
        platform: Platform,
        source_msg: &str,
    ) -> Result<Option<MessageMapping>, DatabaseError> {
        let source_msg = source_msg.to_string();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema::message_mappings::dsl::*;
            message_mappings
                .filter(pair_id.eq(pair))
                .filter(source_platform.eq(platform.as_str()))
                .filter(source_message_id.eq(source_msg))
                .select(DbMessageMapping::as_select())
                .first::<DbMessageMapping>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|m| m.to_message_mapping())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn delete_mapping(
        &self,
        pair: i64,
        platform: Platform,
        source_msg: &str,
    ) -> Result<(), DatabaseError> {
        let source_msg = source_msg.to_string();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema::message_mappings::dsl::*;
            diesel::delete(
                message_mappings
                    .filter(pair_id.eq(pair))
                    .filter(source_platform.eq(platform.as_str()))
                    .filter(source_message_id.eq(source_msg)),
            )
            .execute(&mut conn)
            .map(|_| ())
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn delete_mappings_for_pair(&self, pair: i64) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema::message_mappings::dsl::*;
            diesel::delete(message_mappings.filter(pair_id.eq(pair)))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}
