#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("database connection error: {0}")]
    Connection(String),
    #[error("database query error: {0}")]
    Query(String),
    #[error("database migration error: {0}")]
    Migration(String),
    /// Unique-constraint violation, surfaced separately so callers can turn
    /// it into a validation error instead of retrying.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DatabaseError {
    pub(crate) fn from_diesel(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            ) => DatabaseError::Conflict(info.message().to_string()),
            other => DatabaseError::Query(other.to_string()),
        }
    }
}
