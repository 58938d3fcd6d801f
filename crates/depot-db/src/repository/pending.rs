//! # Pending Operation Repository
//!
//! Durable FIFO queue of business mutations awaiting remote acknowledgment.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL OPERATION (e.g., basket transfer)                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION (optional)                 │   │
//! │  │                                                                 │   │
//! │  │  1. business write (caller's own tables)                       │   │
//! │  │  2. INSERT INTO pending_operations (kind, subject, payload)    │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            SYNC COORDINATOR (one pass at a time)                │   │
//! │  │                                                                 │   │
//! │  │  1. SELECT * FROM pending_operations ORDER BY id ASC           │   │
//! │  │  2. For each entry, in order:                                  │   │
//! │  │     a. Replay against the remote service                       │   │
//! │  │     b. On success: DELETE (acknowledge)                        │   │
//! │  │     c. On failure: retry_count += 1, then STOP the pass        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • An enqueued entry survives restarts until acknowledged              │
//! │  • ids are never reused (AUTOINCREMENT), so id order = enqueue order   │
//! │  • Acknowledge is idempotent                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use depot_core::{OperationKind, PendingOperation};

const INSERT_RETURNING: &str = r#"
    INSERT INTO pending_operations (kind, subject, payload, enqueued_at, retry_count)
    VALUES (?1, ?2, ?3, ?4, 0)
    RETURNING id, kind, subject, payload, enqueued_at, retry_count, last_error, last_attempt_at
"#;

const SELECT_COLUMNS: &str =
    "SELECT id, kind, subject, payload, enqueued_at, retry_count, last_error, last_attempt_at \
     FROM pending_operations";

/// Repository for the pending-operation queue.
#[derive(Debug, Clone)]
pub struct PendingOperationRepository {
    pool: SqlitePool,
}

impl PendingOperationRepository {
    /// Creates a new PendingOperationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PendingOperationRepository { pool }
    }

    /// Appends an operation to the tail of the queue.
    ///
    /// The write is committed before this returns, so the entry survives a
    /// crash immediately afterwards.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let payload = serde_json::to_string(&request)?;
    /// repo.enqueue(OperationKind::Transfer, &basket_uid, &payload).await?;
    /// ```
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        subject: &str,
        payload: &str,
    ) -> DbResult<PendingOperation> {
        debug!(kind = %kind, subject = %subject, "Enqueuing pending operation");

        let op = sqlx::query_as::<_, PendingOperation>(INSERT_RETURNING)
            .bind(kind)
            .bind(subject)
            .bind(payload)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?;

        Ok(op)
    }

    /// Appends an operation inside the caller's transaction.
    ///
    /// The entry becomes visible to the coordinator only when the caller
    /// commits; a rollback discards it together with the business write.
    pub async fn enqueue_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        kind: OperationKind,
        subject: &str,
        payload: &str,
    ) -> DbResult<PendingOperation> {
        debug!(kind = %kind, subject = %subject, "Enqueuing pending operation (transaction)");

        let op = sqlx::query_as::<_, PendingOperation>(INSERT_RETURNING)
            .bind(kind)
            .bind(subject)
            .bind(payload)
            .bind(Utc::now())
            .fetch_one(&mut **tx)
            .await?;

        Ok(op)
    }

    /// Returns every pending operation, oldest first.
    pub async fn list_in_order(&self) -> DbResult<Vec<PendingOperation>> {
        let ops = sqlx::query_as::<_, PendingOperation>(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await?;

        Ok(ops)
    }

    /// Gets one pending operation by id.
    pub async fn get(&self, id: i64) -> DbResult<Option<PendingOperation>> {
        let op = sqlx::query_as::<_, PendingOperation>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(op)
    }

    /// Gets one pending operation by id, failing if it is gone.
    pub async fn get_required(&self, id: i64) -> DbResult<PendingOperation> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("pending operation", id))
    }

    /// Returns the pending operations for one business subject, oldest first.
    pub async fn list_for_subject(&self, subject: &str) -> DbResult<Vec<PendingOperation>> {
        let ops = sqlx::query_as::<_, PendingOperation>(&format!(
            "{SELECT_COLUMNS} WHERE subject = ?1 ORDER BY id ASC"
        ))
        .bind(subject)
        .fetch_all(&self.pool)
        .await?;

        Ok(ops)
    }

    /// Returns operations that have failed at least `min_retries` times.
    ///
    /// Intended for diagnostics screens; the queue itself never gives up on
    /// an entry.
    pub async fn list_stale(&self, min_retries: i64) -> DbResult<Vec<PendingOperation>> {
        let ops = sqlx::query_as::<_, PendingOperation>(&format!(
            "{SELECT_COLUMNS} WHERE retry_count >= ?1 ORDER BY id ASC"
        ))
        .bind(min_retries)
        .fetch_all(&self.pool)
        .await?;

        Ok(ops)
    }

    /// Removes an operation after the remote service accepted it.
    ///
    /// Returns `false` if the id was already gone. Acknowledging twice is
    /// not an error.
    pub async fn acknowledge(&self, id: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM pending_operations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            debug!(id, "Pending operation acknowledged");
        } else {
            debug!(id, "Acknowledge for unknown pending operation ignored");
        }

        Ok(removed)
    }

    /// Records a failed replay attempt.
    ///
    /// Returns `false` if the id does not exist.
    pub async fn increment_retry(&self, id: i64, reason: Option<&str>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE pending_operations SET
                retry_count = retry_count + 1,
                last_error = ?2,
                last_attempt_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() > 0;
        if !updated {
            warn!(id, "Retry increment for unknown pending operation");
        }

        Ok(updated)
    }

    /// Counts pending operations.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_operations")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn repo() -> (Database, PendingOperationRepository) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.pending_operations();
        (db, repo)
    }

    #[tokio::test]
    async fn test_enqueue_assigns_increasing_ids() {
        let (_db, repo) = repo().await;

        let a = repo.enqueue(OperationKind::Receiving, "B-1", "{}").await.unwrap();
        let b = repo.enqueue(OperationKind::Shipping, "B-2", "{}").await.unwrap();

        assert!(b.id > a.id);
        assert_eq!(a.kind, OperationKind::Receiving);
        assert_eq!(a.retry_count, 0);
        assert!(a.last_error.is_none());
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_in_order_is_fifo() {
        let (_db, repo) = repo().await;

        for subject in ["B-3", "B-1", "B-2"] {
            repo.enqueue(OperationKind::Transfer, subject, "{}").await.unwrap();
        }

        let subjects: Vec<String> = repo
            .list_in_order()
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.subject)
            .collect();
        assert_eq!(subjects, vec!["B-3", "B-1", "B-2"]);
    }

    #[tokio::test]
    async fn test_acknowledge_is_idempotent() {
        let (_db, repo) = repo().await;

        let op = repo.enqueue(OperationKind::Clearing, "B-9", "{}").await.unwrap();

        assert!(repo.acknowledge(op.id).await.unwrap());
        assert!(!repo.acknowledge(op.id).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 0);
        assert!(repo.get(op.id).await.unwrap().is_none());
        assert!(matches!(
            repo.get_required(op.id).await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_acknowledge() {
        let (_db, repo) = repo().await;

        let first = repo.enqueue(OperationKind::Production, "B-1", "{}").await.unwrap();
        repo.acknowledge(first.id).await.unwrap();
        let second = repo.enqueue(OperationKind::Production, "B-1", "{}").await.unwrap();

        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_increment_retry_records_reason() {
        let (_db, repo) = repo().await;

        let op = repo.enqueue(OperationKind::BasketUpdate, "B-4", "{}").await.unwrap();

        assert!(repo.increment_retry(op.id, Some("503 from remote")).await.unwrap());
        assert!(repo.increment_retry(op.id, None).await.unwrap());

        let stored = repo.get_required(op.id).await.unwrap();
        assert_eq!(stored.retry_count, 2);
        assert!(stored.last_error.is_none());
        assert!(stored.last_attempt_at.is_some());

        assert!(!repo.increment_retry(op.id + 100, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_payload_stored_verbatim() {
        let (_db, repo) = repo().await;
        let payload = r#"{"basket":"B-5","items":[1,2,3],"note":"ünïcode"}"#;

        let op = repo.enqueue(OperationKind::Production, "B-5", payload).await.unwrap();
        let stored = repo.get_required(op.id).await.unwrap();

        assert_eq!(stored.payload, payload);
        let value: serde_json::Value = stored.payload_json().unwrap();
        assert_eq!(value["items"][2], 3);
    }

    #[tokio::test]
    async fn test_list_for_subject_and_stale() {
        let (_db, repo) = repo().await;

        let a = repo.enqueue(OperationKind::Transfer, "B-1", "{}").await.unwrap();
        repo.enqueue(OperationKind::Transfer, "B-2", "{}").await.unwrap();
        let c = repo.enqueue(OperationKind::Clearing, "B-1", "{}").await.unwrap();

        let for_b1: Vec<i64> = repo
            .list_for_subject("B-1")
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(for_b1, vec![a.id, c.id]);

        repo.increment_retry(c.id, Some("timeout")).await.unwrap();
        let stale = repo.list_stale(1).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, c.id);
    }

    #[tokio::test]
    async fn test_enqueue_in_tx_commit_and_rollback() {
        let (db, repo) = repo().await;

        let mut tx = db.begin().await.unwrap();
        PendingOperationRepository::enqueue_in_tx(&mut tx, OperationKind::Receiving, "B-1", "{}")
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);

        let mut tx = db.begin().await.unwrap();
        let op = PendingOperationRepository::enqueue_in_tx(
            &mut tx,
            OperationKind::Receiving,
            "B-1",
            "{}",
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let ids: Vec<i64> = repo
            .list_in_order()
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(ids, vec![op.id]);
    }
}
