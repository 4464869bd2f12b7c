use std::sync::Arc;

use crate::config::{DatabaseConfig, DbType};
use crate::db::{DatabaseError, MessageMapStore, PairStore};

#[cfg(feature = "postgres")]
use crate::db::postgres::{PostgresMessageMapStore, PostgresPairStore};
#[cfg(feature = "postgres")]
use diesel::pg::PgConnection;
#[cfg(feature = "postgres")]
use diesel::r2d2::{self, ConnectionManager};
#[cfg(feature = "postgres")]
use diesel::RunQueryDsl;

#[cfg(feature = "postgres")]
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

#[cfg(feature = "sqlite")]
use crate::db::sqlite::{SqliteMessageMapStore, SqlitePairStore};
#[cfg(feature = "sqlite")]
use diesel::sqlite::SqliteConnection;
#[cfg(feature = "sqlite")]
use diesel::Connection;
#[cfg(feature = "sqlite")]
use diesel::RunQueryDsl as _;

#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "postgres")]
    postgres_pool: Option<Pool>,
    #[cfg(feature = "sqlite")]
    sqlite_path: Option<String>,
    pair_store: Arc<dyn PairStore>,
    message_map_store: Arc<dyn MessageMapStore>,
    db_type: DbType,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let db_type = config.db_type();

        match db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let connection_string = config.connection_string();

                let manager = ConnectionManager::<PgConnection>::new(connection_string);
                let pool = r2d2::Pool::builder()
                    .max_size(config.max_connections().unwrap_or(10))
                    .min_idle(Some(config.min_connections().unwrap_or(1)))
                    .build(manager)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;

                let pair_store = Arc::new(PostgresPairStore::new(pool.clone()));
                let message_map_store = Arc::new(PostgresMessageMapStore::new(pool.clone()));

                Ok(Self {
                    postgres_pool: Some(pool),
                    #[cfg(feature = "sqlite")]
                    sqlite_path: None,
                    pair_store,
                    message_map_store,
                    db_type,
                })
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = config
                    .sqlite_path()
                    .ok_or_else(|| DatabaseError::Connection("missing sqlite path".to_string()))?;
                let path_arc = Arc::new(path.clone());

                let pair_store = Arc::new(SqlitePairStore::new(path_arc.clone()));
                let message_map_store = Arc::new(SqliteMessageMapStore::new(path_arc));

                Ok(Self {
                    #[cfg(feature = "postgres")]
                    postgres_pool: None,
                    sqlite_path: Some(path),
                    pair_store,
                    message_map_store,
                    db_type,
                })
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Connection(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Connection(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        match self.db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let pool = self.postgres_pool.as_ref().ok_or_else(|| {
                    DatabaseError::Migration("postgres pool not initialized".to_string())
                })?;
                Self::migrate_postgres(pool).await
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = self.sqlite_path.as_ref().ok_or_else(|| {
                    DatabaseError::Migration("sqlite path not initialized".to_string())
                })?;
                Self::migrate_sqlite(path).await
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Migration(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Migration(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    #[cfg(feature = "postgres")]
    async fn migrate_postgres(pool: &Pool) -> Result<(), DatabaseError> {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS bridge_pairs (
                    id BIGSERIAL PRIMARY KEY,
                    discord_channel_id TEXT NOT NULL,
                    discord_guild_id TEXT NOT NULL,
                    fluxer_channel_id TEXT NOT NULL,
                    fluxer_guild_id TEXT,
                    discord_webhook_id TEXT,
                    discord_webhook_token TEXT,
                    fluxer_webhook_id TEXT,
                    fluxer_webhook_token TEXT,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    sync_uploads BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    UNIQUE (discord_channel_id, fluxer_channel_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS message_mappings (
                    id BIGSERIAL PRIMARY KEY,
                    pair_id BIGINT NOT NULL REFERENCES bridge_pairs(id) ON DELETE CASCADE,
                    source_platform TEXT NOT NULL,
                    source_message_id TEXT NOT NULL,
                    dest_platform TEXT NOT NULL,
                    dest_message_id TEXT NOT NULL,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    UNIQUE (pair_id, source_platform, source_message_id)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_bridge_pairs_discord_channel ON bridge_pairs(discord_channel_id)",
                "CREATE INDEX IF NOT EXISTS idx_bridge_pairs_fluxer_channel ON bridge_pairs(fluxer_channel_id)",
                "CREATE INDEX IF NOT EXISTS idx_message_mappings_pair ON message_mappings(pair_id)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    #[cfg(feature = "sqlite")]
    async fn migrate_sqlite(path: &str) -> Result<(), DatabaseError> {
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = SqliteConnection::establish(&path)
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS bridge_pairs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    discord_channel_id TEXT NOT NULL,
                    discord_guild_id TEXT NOT NULL,
                    fluxer_channel_id TEXT NOT NULL,
                    fluxer_guild_id TEXT,
                    discord_webhook_id TEXT,
                    discord_webhook_token TEXT,
                    fluxer_webhook_id TEXT,
                    fluxer_webhook_token TEXT,
                    is_active BOOLEAN NOT NULL DEFAULT 1,
                    sync_uploads BOOLEAN NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE (discord_channel_id, fluxer_channel_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS message_mappings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    pair_id INTEGER NOT NULL REFERENCES bridge_pairs(id) ON DELETE CASCADE,
                    source_platform TEXT NOT NULL,
                    source_message_id TEXT NOT NULL,
                    dest_platform TEXT NOT NULL,
                    dest_message_id TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE (pair_id, source_platform, source_message_id)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_bridge_pairs_discord_channel ON bridge_pairs(discord_channel_id)",
                "CREATE INDEX IF NOT EXISTS idx_bridge_pairs_fluxer_channel ON bridge_pairs(fluxer_channel_id)",
                "CREATE INDEX IF NOT EXISTS idx_message_mappings_pair ON message_mappings(pair_id)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn pair_store(&self) -> Arc<dyn PairStore> {
        self.pair_store.clone()
    }

    pub fn message_map_store(&self) -> Arc<dyn MessageMapStore> {
        self.message_map_store.clone()
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use chrono::Utc;
    use tempfile::NamedTempFile;

    use super::DatabaseManager;
    use crate::config::DatabaseConfig;
    use crate::db::{DatabaseError, MessageMapping, NewBridgePair};
    use crate::event::Platform;
    use crate::platform::WebhookCredentials;

    async fn test_manager() -> (DatabaseManager, NamedTempFile) {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let config = DatabaseConfig {
            url: None,
            filename: Some(file.path().to_string_lossy().to_string()),
            max_connections: Some(1),
            min_connections: Some(1),
        };
        let manager = DatabaseManager::new(&config).await.expect("db manager");
        manager.migrate().await.expect("migrate");
        (manager, file)
    }

    fn new_pair(discord_channel: &str, fluxer_channel: &str) -> NewBridgePair {
        NewBridgePair {
            discord_channel_id: discord_channel.to_string(),
            discord_guild_id: "guild-d".to_string(),
            fluxer_channel_id: fluxer_channel.to_string(),
            fluxer_guild_id: Some("guild-f".to_string()),
            discord_webhook: Some(WebhookCredentials {
                id: "wh-d".to_string(),
                token: "tok-d".to_string(),
            }),
            fluxer_webhook: None,
            sync_uploads: false,
        }
    }

    #[tokio::test]
    async fn bridge_pair_lifecycle_roundtrip() {
        let (manager, _file) = test_manager().await;
        let pairs = manager.pair_store();

        let created = pairs.create_pair(&new_pair("C_A", "C_B")).await.expect("create");
        assert!(created.id > 0);
        assert!(created.is_active);
        assert!(created.has_webhook(Platform::Discord));
        assert!(!created.has_webhook(Platform::Fluxer));

        let by_discord = pairs
            .find_active_by_channel(Platform::Discord, "C_A")
            .await
            .expect("find discord side");
        assert_eq!(by_discord.len(), 1);
        let by_fluxer = pairs
            .find_active_by_channel(Platform::Fluxer, "C_B")
            .await
            .expect("find fluxer side");
        assert_eq!(by_fluxer.len(), 1);

        pairs.set_active(created.id, false).await.expect("toggle off");
        assert!(pairs
            .find_active_by_channel(Platform::Discord, "C_A")
            .await
            .expect("find after toggle")
            .is_empty());

        pairs
            .update_webhooks(
                created.id,
                None,
                Some(&WebhookCredentials {
                    id: "wh-f".to_string(),
                    token: "tok-f".to_string(),
                }),
            )
            .await
            .expect("repair fluxer webhook");
        let repaired = pairs
            .get_pair_by_id(created.id)
            .await
            .expect("reload")
            .expect("exists");
        assert!(repaired.has_webhook(Platform::Discord));
        assert!(repaired.has_webhook(Platform::Fluxer));

        pairs.delete_pair(created.id).await.expect("delete");
        assert!(pairs.get_pair_by_id(created.id).await.expect("gone").is_none());
    }

    #[tokio::test]
    async fn duplicate_channel_pair_is_a_conflict() {
        let (manager, _file) = test_manager().await;
        let pairs = manager.pair_store();

        pairs.create_pair(&new_pair("C_A", "C_B")).await.expect("create");
        let err = pairs
            .create_pair(&new_pair("C_A", "C_B"))
            .await
            .expect_err("duplicate must fail");
        assert!(matches!(err, DatabaseError::Conflict(_)));
    }

    #[tokio::test]
    async fn message_mapping_roundtrip() {
        let (manager, _file) = test_manager().await;
        let pair = manager
            .pair_store()
            .create_pair(&new_pair("C_A", "C_B"))
            .await
            .expect("create pair");
        let maps = manager.message_map_store();

        let mapping = MessageMapping {
            id: 0,
            pair_id: pair.id,
            source_platform: Platform::Discord,
            source_message_id: "src-1".to_string(),
            dest_platform: Platform::Fluxer,
            dest_message_id: "dst-1".to_string(),
            created_at: Utc::now(),
        };
        maps.upsert_mapping(&mapping).await.expect("insert");

        let loaded = maps
            .get_mapping(pair.id, Platform::Discord, "src-1")
            .await
            .expect("query")
            .expect("exists");
        assert_eq!(loaded.dest_message_id, "dst-1");
        assert_eq!(loaded.dest_platform, Platform::Fluxer);

        let mut updated = mapping.clone();
        updated.dest_message_id = "dst-2".to_string();
        maps.upsert_mapping(&updated).await.expect("upsert");
        let reloaded = maps
            .get_mapping(pair.id, Platform::Discord, "src-1")
            .await
            .expect("query")
            .expect("exists");
        assert_eq!(reloaded.dest_message_id, "dst-2");

        assert!(maps
            .get_mapping(pair.id, Platform::Fluxer, "src-1")
            .await
            .expect("other platform")
            .is_none());

        maps.delete_mapping(pair.id, Platform::Discord, "src-1")
            .await
            .expect("delete");
        assert!(maps
            .get_mapping(pair.id, Platform::Discord, "src-1")
            .await
            .expect("query after delete")
            .is_none());
    }
}
