pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::models::{BridgePair, MessageMapping, NewBridgePair};
pub use self::stores::{MessageMapStore, PairStore};

pub mod error;
pub mod manager;
pub mod models;
pub mod stores;

#[cfg(test)]
pub mod testing;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub mod schema;

#[cfg(feature = "sqlite")]
pub mod schema_sqlite;
#[cfg(feature = "sqlite")]
pub mod sqlite;
