//! # Store Errors
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sqlx::Error ──► DbError ──► SyncError::Store (depot-sync)             │
//! │                     │                                                   │
//! │                     └── is_transient(): a later pass may succeed       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed enqueue means the mutation was not recorded; callers must
//! surface it rather than treat the write as done.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// No row with this key.
    #[error("{entity} {id} does not exist")]
    NotFound { entity: &'static str, id: String },

    /// The store could not be opened, or the pool is closed.
    #[error("Store unavailable: {0}")]
    ConnectionFailed(String),

    #[error("Schema migration failed: {0}")]
    MigrationFailed(String),

    /// SQLite rejected the statement.
    #[error("Statement failed: {0}")]
    QueryFailed(String),

    /// A stored value no longer decodes (e.g. an operation kind this build
    /// does not know).
    #[error("Unreadable row: {0}")]
    CorruptRow(String),

    /// Every pooled connection stayed busy past the acquire timeout.
    #[error("Timed out waiting for a store connection")]
    PoolExhausted,

    #[error("Store error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DbError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::PoolExhausted | DbError::ConnectionFailed(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("row", "?"),
            sqlx::Error::Database(db_err) => DbError::QueryFailed(db_err.message().to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::CorruptRow(format!("column {index}: {source}"))
            }
            sqlx::Error::Decode(source) => DbError::CorruptRow(source.to_string()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("store is closed".to_string()),
            sqlx::Error::Io(io) => DbError::ConnectionFailed(io.to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
