//! # Replay Registry
//!
//! Maps each [`OperationKind`] to the remote call that re-applies it.
//!
//! The business layer owns the payload schemas and the remote endpoints; it
//! registers one replayer per kind when the orchestrator is built. A queued
//! entry whose kind has no replayer fails its attempt and stays queued.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use depot_core::{OperationKind, PendingOperation};

use crate::error::SyncResult;

/// Delivers one queued operation to the remote service.
///
/// `Ok(())` means the remote service accepted it and the entry may be
/// removed. Any error keeps the entry queued.
#[async_trait]
pub trait Replayer: Send + Sync {
    async fn replay(&self, operation: &PendingOperation) -> SyncResult<()>;
}

/// Adapts an async closure into a [`Replayer`].
struct FnReplayer<F>(F);

#[async_trait]
impl<F, Fut> Replayer for FnReplayer<F>
where
    F: Fn(PendingOperation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<()>> + Send + 'static,
{
    async fn replay(&self, operation: &PendingOperation) -> SyncResult<()> {
        (self.0)(operation.clone()).await
    }
}

/// Replayers keyed by operation kind.
#[derive(Clone, Default)]
pub struct ReplayRegistry {
    replayers: HashMap<OperationKind, Arc<dyn Replayer>>,
}

impl ReplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `replayer` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: OperationKind, replayer: Arc<dyn Replayer>) -> &mut Self {
        self.replayers.insert(kind, replayer);
        self
    }

    /// Registers an async closure for `kind`.
    ///
    /// The closure receives its own copy of the queued operation.
    pub fn register_fn<F, Fut>(&mut self, kind: OperationKind, f: F) -> &mut Self
    where
        F: Fn(PendingOperation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        self.register(kind, Arc::new(FnReplayer(f)))
    }

    /// Returns the replayer for `kind`.
    pub fn get(&self, kind: OperationKind) -> Option<Arc<dyn Replayer>> {
        self.replayers.get(&kind).cloned()
    }

    /// Returns true if a replayer is registered for `kind`.
    pub fn contains(&self, kind: OperationKind) -> bool {
        self.replayers.contains_key(&kind)
    }

    /// Kinds without a replayer. Entries of these kinds can never drain.
    pub fn missing_kinds(&self) -> Vec<OperationKind> {
        OperationKind::ALL
            .into_iter()
            .filter(|kind| !self.contains(*kind))
            .collect()
    }
}

impl std::fmt::Debug for ReplayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.replayers.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("ReplayRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use chrono::Utc;

    fn operation(kind: OperationKind) -> PendingOperation {
        PendingOperation {
            id: 1,
            kind,
            subject: "BASKET-1".into(),
            payload: r#"{"qty":3}"#.into(),
            enqueued_at: Utc::now(),
            retry_count: 0,
            last_error: None,
            last_attempt_at: None,
        }
    }

    #[tokio::test]
    async fn test_register_fn_dispatches_by_kind() {
        let mut registry = ReplayRegistry::new();
        registry
            .register_fn(OperationKind::Shipping, |op| async move {
                assert_eq!(op.subject, "BASKET-1");
                Ok(())
            })
            .register_fn(OperationKind::Clearing, |_| async {
                Err(SyncError::ReplayFailed("basket locked".into()))
            });

        let shipping = registry.get(OperationKind::Shipping).unwrap();
        assert!(shipping.replay(&operation(OperationKind::Shipping)).await.is_ok());

        let clearing = registry.get(OperationKind::Clearing).unwrap();
        let err = clearing
            .replay(&operation(OperationKind::Clearing))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("basket locked"));

        assert!(registry.get(OperationKind::Transfer).is_none());
    }

    #[test]
    fn test_missing_kinds() {
        let mut registry = ReplayRegistry::new();
        registry.register_fn(OperationKind::Production, |_| async { Ok(()) });

        let missing = registry.missing_kinds();
        assert_eq!(missing.len(), OperationKind::ALL.len() - 1);
        assert!(!missing.contains(&OperationKind::Production));
        assert!(format!("{:?}", registry).contains("production"));
    }
}
