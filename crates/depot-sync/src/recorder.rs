//! # Operation Recorder
//!
//! The only way a business mutation reaches the remote service.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Mutation Path                                  │
//! │                                                                         │
//! │  business layer                                                        │
//! │     │  local write + record(kind, subject, &payload)                   │
//! │     ▼                                                                   │
//! │  pending_operations  ◄── committed before record() returns             │
//! │     │                                                                   │
//! │     ▼  trigger()                                                        │
//! │  SyncCoordinator ──► replayer[kind] ──► remote service                 │
//! │                                                                         │
//! │  There is no direct online call. Online or offline, the queue is the   │
//! │  single route, so every mutation is delivered exactly once.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use depot_core::{OperationKind, PendingOperation};
use depot_db::PendingOperationRepository;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use tracing::info;

use crate::coordinator::CoordinatorHandle;
use crate::error::SyncResult;

/// Queues business mutations for delivery.
#[derive(Debug, Clone)]
pub struct OperationRecorder {
    repo: PendingOperationRepository,
    coordinator: CoordinatorHandle,
}

impl OperationRecorder {
    pub fn new(repo: PendingOperationRepository, coordinator: CoordinatorHandle) -> Self {
        OperationRecorder { repo, coordinator }
    }

    /// Serializes `payload` as JSON, queues it and nudges the coordinator.
    ///
    /// A store failure is returned to the caller: the mutation was NOT
    /// recorded and must not be reported as saved.
    pub async fn record<T>(
        &self,
        kind: OperationKind,
        subject: &str,
        payload: &T,
    ) -> SyncResult<PendingOperation>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_string(payload)?;
        let operation = self.repo.enqueue(kind, subject, &payload).await?;
        info!(id = operation.id, kind = %kind, subject = %subject, "Mutation recorded");

        self.coordinator.trigger();
        Ok(operation)
    }

    /// Queues the mutation inside the caller's transaction.
    ///
    /// Nothing is delivered until the caller commits and then calls
    /// [`committed`](Self::committed).
    pub async fn record_in_tx<T>(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        kind: OperationKind,
        subject: &str,
        payload: &T,
    ) -> SyncResult<PendingOperation>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_string(payload)?;
        let operation =
            PendingOperationRepository::enqueue_in_tx(tx, kind, subject, &payload).await?;
        Ok(operation)
    }

    /// Signals that a transaction holding recorded mutations was committed.
    pub fn committed(&self) {
        self.coordinator.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{CoordinatorConfig, SyncCoordinator};
    use crate::replay::ReplayRegistry;
    use crate::status::NoOpEmitter;
    use depot_db::{Database, DbConfig};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::watch;

    async fn setup() -> (Database, OperationRecorder, watch::Sender<bool>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (online_tx, online_rx) = watch::channel(false);
        let coordinator = SyncCoordinator::with_emitter(
            CoordinatorConfig {
                poll_interval: None,
                ..CoordinatorConfig::default()
            },
            db.pending_operations(),
            ReplayRegistry::new(),
            online_rx,
            Arc::new(NoOpEmitter),
        )
        .spawn();
        let recorder = OperationRecorder::new(db.pending_operations(), coordinator);
        (db, recorder, online_tx)
    }

    #[tokio::test]
    async fn test_record_stores_json_payload() {
        let (db, recorder, _online) = setup().await;

        let op = recorder
            .record(
                OperationKind::Transfer,
                "BASKET-7",
                &json!({ "from": "WH-1", "to": "WH-2" }),
            )
            .await
            .unwrap();

        let stored = db.pending_operations().get_required(op.id).await.unwrap();
        let payload: serde_json::Value = stored.payload_json().unwrap();
        assert_eq!(payload["to"], "WH-2");
        assert_eq!(stored.subject, "BASKET-7");
    }

    #[tokio::test]
    async fn test_record_in_tx_follows_transaction() {
        let (db, recorder, _online) = setup().await;

        let mut tx = db.begin().await.unwrap();
        recorder
            .record_in_tx(&mut tx, OperationKind::Clearing, "BASKET-3", &json!({}))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(db.pending_operations().count().await.unwrap(), 0);

        let mut tx = db.begin().await.unwrap();
        recorder
            .record_in_tx(&mut tx, OperationKind::Clearing, "BASKET-3", &json!({}))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        recorder.committed();
        assert_eq!(db.pending_operations().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_returned() {
        let (db, recorder, _online) = setup().await;
        db.close().await;

        let result = recorder
            .record(OperationKind::Production, "LOT-1", &json!({ "qty": 12 }))
            .await;
        assert!(matches!(result, Err(crate::SyncError::Store(_))));
    }
}
