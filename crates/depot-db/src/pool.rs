//! # Database Handle
//!
//! Opens the local SQLite store that backs the pending-operation queue.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Store Lifecycle                                 │
//! │                                                                         │
//! │  DbConfig::new(path)  or  DbConfig::in_memory()                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await                                           │
//! │       ├── create parent directory (file storage only)                  │
//! │       ├── open pool (WAL, FULL sync, busy timeout)                     │
//! │       └── apply embedded migrations                                    │
//! │       │                                                                 │
//! │       ├──► OperationRecorder   enqueue / enqueue_in_tx                 │
//! │       └──► SyncCoordinator     list / acknowledge / increment_retry    │
//! │                                                                         │
//! │  Database::close().await  ← Orchestrator::shutdown, last step          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! WAL keeps coordinator reads from blocking recorder writes. Commits are
//! fsynced (`synchronous = FULL`): an enqueued mutation must survive a
//! battery pull.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::pending::PendingOperationRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Where the queue lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// A database file, created on first open.
    File(PathBuf),
    /// A private in-memory database. Gone when the pool closes.
    Memory,
}

/// Store configuration.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/depot/depot.db").pool_size(2);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub storage: Storage,

    /// Connections in the pool. The recorder and the coordinator each hold
    /// at most one at a time.
    /// Default: 4
    pub pool_size: u32,

    /// How long a caller waits for a free connection.
    /// Default: 10 seconds
    pub acquire_timeout: Duration,

    /// fsync policy on commit. Anything below `Full` can lose the newest
    /// queue entries on power loss.
    /// Default: Full
    pub synchronous: SqliteSynchronous,

    /// How long SQLite waits on a locked database before failing.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Apply embedded migrations when opening.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// File-backed store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            storage: Storage::File(path.into()),
            pool_size: 4,
            acquire_timeout: Duration::from_secs(10),
            synchronous: SqliteSynchronous::Full,
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// In-memory store, used by tests.
    ///
    /// An in-memory database lives exactly as long as its connection, so
    /// the pool is pinned to a single connection that never expires.
    pub fn in_memory() -> Self {
        DbConfig {
            storage: Storage::Memory,
            pool_size: 1,
            ..DbConfig::new(PathBuf::new())
        }
    }

    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    pub fn synchronous(mut self, synchronous: SqliteSynchronous) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.storage == Storage::Memory
    }

    /// The database file, if file-backed.
    pub fn database_path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::File(path) => Some(path),
            Storage::Memory => None,
        }
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match &self.storage {
            Storage::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
            Storage::Memory => SqliteConnectOptions::new().in_memory(true),
        };

        options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(self.synchronous)
            .busy_timeout(self.busy_timeout)
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        let options = SqlitePoolOptions::new()
            .max_connections(self.pool_size.max(1))
            .acquire_timeout(self.acquire_timeout);

        if self.is_in_memory() {
            options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to the store. Clones share one pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the store and applies migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        match config.database_path() {
            Some(path) => {
                info!(path = %path.display(), "Opening pending-operation store");
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        DbError::ConnectionFailed(format!("{}: {e}", parent.display()))
                    })?;
                }
            }
            None => info!("Opening in-memory pending-operation store"),
        }

        let pool = config
            .pool_options()
            .connect_with(config.connect_options())
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
        debug!(pool_size = config.pool_size, "Store pool ready");

        let db = Database { pool };
        if config.run_migrations {
            db.run_migrations().await?;
        }
        Ok(db)
    }

    /// Applies any migrations not yet recorded in the store.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Highest applied migration version, `None` on a blank store.
    pub async fn schema_version(&self) -> DbResult<Option<i64>> {
        migrations::applied_version(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begins a transaction.
    ///
    /// A business write and [`PendingOperationRepository::enqueue_in_tx`]
    /// sharing it commit or roll back together.
    pub async fn begin(&self) -> DbResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub fn pending_operations(&self) -> PendingOperationRepository {
        PendingOperationRepository::new(self.pool.clone())
    }

    /// Closes the pool. Every later call fails with a connection error.
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            info!("Closing pending-operation store");
            self.pool.close().await;
        }
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_is_migrated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        assert!(db.health_check().await);
        assert_eq!(db.schema_version().await.unwrap(), Some(1));
        assert_eq!(db.pending_operations().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rerunning_migrations_is_harmless() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.run_migrations().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_unmigrated_store_has_no_version() {
        let db = Database::new(DbConfig::in_memory().run_migrations(false))
            .await
            .unwrap();
        assert_eq!(db.schema_version().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_fsyncs_every_commit() {
        let dir = std::env::temp_dir().join(format!(
            "depot-db-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let db = Database::new(DbConfig::new(dir.join("depot.db"))).await.unwrap();

        // 2 = FULL
        let level: i64 = sqlx::query_scalar("PRAGMA synchronous")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(level, 2);

        db.close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.close().await;
        db.close().await;
        assert!(!db.health_check().await);
    }

    #[test]
    fn test_storage_selection() {
        let file = DbConfig::new("/tmp/depot-test.db").pool_size(2);
        assert_eq!(file.database_path(), Some(Path::new("/tmp/depot-test.db")));
        assert_eq!(file.pool_size, 2);
        assert_eq!(file.synchronous, SqliteSynchronous::Full);
        assert!(!file.is_in_memory());

        let memory = DbConfig::in_memory();
        assert!(memory.is_in_memory());
        assert_eq!(memory.database_path(), None);
        assert_eq!(memory.pool_size, 1);
    }
}
