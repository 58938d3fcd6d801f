//! # Sync Coordinator
//!
//! Drains the pending-operation queue to the remote service, strictly in
//! queue order.
//!
//! ## Pass Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         One Sync Pass                                   │
//! │                                                                         │
//! │  triggers: online false→true │ poll tick (online) │ trigger() (online) │
//! │                              ▼                                          │
//! │  list_in_order()   O1(A)  O2(B)  O3(A)  ...                            │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │  online? ── no ──► halt (nothing touched)                              │
//! │     │ yes                                                               │
//! │     ▼                                                                   │
//! │  replayer[kind](op)  bounded by replay_timeout                         │
//! │     │                                                                   │
//! │     ├── Ok  ──► acknowledge(id), next entry                            │
//! │     │                                                                   │
//! │     └── Err ──► increment_retry(id, reason), HALT                      │
//! │                 later entries wait for the next pass, so a later       │
//! │                 success never overtakes an earlier failure             │
//! │                                                                         │
//! │  At most one pass runs at a time. No entry is ever dropped.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use depot_core::PendingOperation;
use depot_db::PendingOperationRepository;
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::replay::ReplayRegistry;
use crate::status::{NoOpEmitter, SyncEventEmitter, SyncStatus};

// =============================================================================
// Configuration
// =============================================================================

/// Coordinator timing.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Periodic pass while online. `None` disables the timer.
    pub poll_interval: Option<Duration>,
    /// Upper bound for a single replay call.
    pub replay_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            poll_interval: Some(Duration::from_secs(30)),
            replay_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Drain Report
// =============================================================================

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries acknowledged during the pass.
    pub delivered: usize,
    /// First entry left in place, if the pass stopped early (replay failure
    /// or connectivity lost).
    pub halted_at: Option<i64>,
    /// Queue length after the pass.
    pub remaining: i64,
}

impl DrainReport {
    /// True if the pass reached the end of the queue.
    pub fn is_complete(&self) -> bool {
        self.halted_at.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
enum PassCause {
    OnlineEdge,
    Poll,
    Trigger,
    Manual,
}

impl fmt::Display for PassCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassCause::OnlineEdge => write!(f, "online"),
            PassCause::Poll => write!(f, "poll"),
            PassCause::Trigger => write!(f, "trigger"),
            PassCause::Manual => write!(f, "manual"),
        }
    }
}

// =============================================================================
// Drainer
// =============================================================================

/// State shared by the coordinator task and its handles.
struct Drainer {
    repo: PendingOperationRepository,
    registry: ReplayRegistry,
    online_rx: watch::Receiver<bool>,
    emitter: Arc<dyn SyncEventEmitter>,
    replay_timeout: Duration,
    pass_lock: Mutex<()>,
    /// Set when the last pass stopped because the device went offline.
    halted_offline: AtomicBool,
    status_tx: watch::Sender<SyncStatus>,
}

impl Drainer {
    fn is_online(&self) -> bool {
        // A dropped monitor counts as offline.
        self.online_rx.has_changed().is_ok() && *self.online_rx.borrow()
    }

    async fn run_pass(&self, cause: PassCause) -> SyncResult<DrainReport> {
        let _pass = self.pass_lock.lock().await;
        self.halted_offline.store(false, Ordering::SeqCst);

        let operations = self.repo.list_in_order().await?;
        if operations.is_empty() {
            debug!(%cause, "Queue empty, nothing to sync");
            let report = DrainReport::default();
            self.record_pass(&report, None);
            return Ok(report);
        }

        info!(%cause, count = operations.len(), "Sync pass started");

        let mut delivered = 0;
        let mut halted_at = None;
        let mut failure = None;

        for operation in &operations {
            if !self.is_online() {
                info!(id = operation.id, "Connectivity lost, sync pass halted");
                self.halted_offline.store(true, Ordering::SeqCst);
                halted_at = Some(operation.id);
                break;
            }

            match self.replay(operation).await {
                Ok(()) => {
                    self.repo.acknowledge(operation.id).await?;
                    delivered += 1;
                    debug!(
                        id = operation.id,
                        kind = %operation.kind,
                        subject = %operation.subject,
                        "Operation delivered"
                    );
                    self.emitter
                        .emit_progress((operations.len() - delivered) as i64, delivered as i64);
                }
                Err(err) => {
                    warn!(
                        id = operation.id,
                        kind = %operation.kind,
                        subject = %operation.subject,
                        attempt = operation.retry_count + 1,
                        error = %err,
                        "Replay failed, sync pass halted"
                    );
                    let reason = err.to_string();
                    self.repo.increment_retry(operation.id, Some(&reason)).await?;
                    self.emitter.emit_error(&reason, err.is_retryable());
                    halted_at = Some(operation.id);
                    failure = Some(reason);
                    break;
                }
            }
        }

        let report = DrainReport {
            delivered,
            halted_at,
            remaining: self.repo.count().await?,
        };
        info!(
            delivered = report.delivered,
            remaining = report.remaining,
            halted_at = ?report.halted_at,
            "Sync pass finished"
        );
        self.record_pass(&report, failure);
        Ok(report)
    }

    async fn replay(&self, operation: &PendingOperation) -> SyncResult<()> {
        let replayer = self
            .registry
            .get(operation.kind)
            .ok_or(SyncError::MissingReplayer(operation.kind))?;

        match timeout(self.replay_timeout, replayer.replay(operation)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::ReplayTimeout {
                id: operation.id,
                secs: self.replay_timeout.as_secs(),
            }),
        }
    }

    fn record_pass(&self, report: &DrainReport, failure: Option<String>) {
        let online = self.is_online();
        self.status_tx.send_modify(|status| {
            status.is_online = online;
            status.pending_count = report.remaining;
            if report.delivered > 0 {
                status.last_sync = Some(Utc::now());
                status.last_error = None;
            }
            if failure.is_some() {
                status.last_error = failure;
            }
            status.last_report = Some(report.clone());
        });
        self.emit_status();
    }

    fn record_online(&self, online: bool) {
        self.status_tx.send_modify(|status| status.is_online = online);
        self.emit_status();
    }

    fn emit_status(&self) {
        let status = self.status_tx.borrow().clone();
        self.emitter.emit_status(&status);
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable handle to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    drainer: Arc<Drainer>,
    trigger: Arc<Notify>,
    shutdown_tx: mpsc::Sender<oneshot::Sender<()>>,
    status_rx: watch::Receiver<SyncStatus>,
}

impl CoordinatorHandle {
    /// Requests a pass. Ignored while offline; coalesced with a pass that
    /// is already queued.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Runs a pass now and waits for its report.
    ///
    /// Waits for a running pass to finish first. While offline the pass
    /// touches nothing and reports the head of the queue as `halted_at`.
    pub async fn drain_now(&self) -> SyncResult<DrainReport> {
        if self.shutdown_tx.is_closed() {
            return Err(SyncError::ShuttingDown);
        }
        self.drainer.run_pass(PassCause::Manual).await
    }

    /// Latest status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.status_rx.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Stops the coordinator task after any running pass. Idempotent.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.shutdown_tx.send(tx).await.is_ok() {
            let _ = rx.await;
        }
    }
}

impl fmt::Debug for CoordinatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorHandle")
            .field("status", &*self.status_rx.borrow())
            .finish()
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Builds and spawns the coordinator task.
pub struct SyncCoordinator {
    config: CoordinatorConfig,
    drainer: Arc<Drainer>,
    status_rx: watch::Receiver<SyncStatus>,
}

impl SyncCoordinator {
    /// Creates a coordinator over `repo`, following `online_rx`.
    pub fn new(
        repo: PendingOperationRepository,
        registry: ReplayRegistry,
        online_rx: watch::Receiver<bool>,
    ) -> Self {
        Self::with_emitter(
            CoordinatorConfig::default(),
            repo,
            registry,
            online_rx,
            Arc::new(NoOpEmitter),
        )
    }

    /// Creates a coordinator with explicit timing and status emitter.
    pub fn with_emitter(
        config: CoordinatorConfig,
        repo: PendingOperationRepository,
        registry: ReplayRegistry,
        online_rx: watch::Receiver<bool>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        let missing = registry.missing_kinds();
        if !missing.is_empty() {
            warn!(?missing, "No replayer for some operation kinds, their entries will not drain");
        }

        let (status_tx, status_rx) = watch::channel(SyncStatus::default());
        let drainer = Arc::new(Drainer {
            repo,
            registry,
            online_rx,
            emitter,
            replay_timeout: config.replay_timeout,
            pass_lock: Mutex::new(()),
            halted_offline: AtomicBool::new(false),
            status_tx,
        });

        SyncCoordinator {
            config,
            drainer,
            status_rx,
        }
    }

    /// Spawns the coordinator on the current runtime.
    pub fn spawn(self) -> CoordinatorHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let trigger = Arc::new(Notify::new());

        let handle = CoordinatorHandle {
            drainer: Arc::clone(&self.drainer),
            trigger: Arc::clone(&trigger),
            shutdown_tx,
            status_rx: self.status_rx.clone(),
        };
        tokio::spawn(self.run(trigger, shutdown_rx));
        handle
    }

    async fn run(
        self,
        trigger: Arc<Notify>,
        mut shutdown_rx: mpsc::Receiver<oneshot::Sender<()>>,
    ) {
        let drainer = self.drainer;
        let mut online_rx = drainer.online_rx.clone();
        let mut was_online = *online_rx.borrow_and_update();
        let mut monitor_alive = true;

        let mut poll = self.config.poll_interval.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        info!(
            poll_interval_secs = ?self.config.poll_interval.map(|d| d.as_secs()),
            online = was_online,
            "Sync coordinator started"
        );

        drainer.record_online(was_online);
        if was_online {
            run_logged(&drainer, PassCause::OnlineEdge).await;
        }

        let ack = loop {
            tokio::select! {
                ack = shutdown_rx.recv() => break ack,

                changed = online_rx.changed(), if monitor_alive => {
                    if changed.is_err() {
                        warn!("Connectivity monitor gone, treating device as offline");
                        monitor_alive = false;
                        was_online = false;
                        drainer.record_online(false);
                        continue;
                    }
                    let online = *online_rx.borrow_and_update();
                    // A drop and recovery during a pass collapses into one
                    // unchanged value; the offline halt still counts as an edge.
                    let resumed = online && drainer.halted_offline.swap(false, Ordering::SeqCst);
                    if online == was_online && !resumed {
                        continue;
                    }
                    if online != was_online {
                        was_online = online;
                        drainer.record_online(online);
                    }
                    if online {
                        run_logged(&drainer, PassCause::OnlineEdge).await;
                    }
                }

                _ = trigger.notified() => {
                    if drainer.is_online() {
                        run_logged(&drainer, PassCause::Trigger).await;
                    } else {
                        debug!("Offline, sync trigger deferred until reconnect");
                    }
                }

                _ = next_tick(&mut poll) => {
                    if drainer.is_online() {
                        run_logged(&drainer, PassCause::Poll).await;
                    }
                }
            }
        };

        drop(shutdown_rx);
        info!("Sync coordinator stopped");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}

async fn run_logged(drainer: &Drainer, cause: PassCause) {
    if let Err(e) = drainer.run_pass(cause).await {
        error!(%cause, error = %e, "Sync pass aborted");
        drainer.emitter.emit_error(&e.to_string(), e.is_retryable());
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::OperationKind;
    use depot_db::{Database, DbConfig};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    async fn setup() -> (Database, PendingOperationRepository) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.pending_operations();
        (db, repo)
    }

    fn config(poll_interval: Option<Duration>) -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval,
            replay_timeout: Duration::from_secs(2),
        }
    }

    fn coordinator(
        repo: &PendingOperationRepository,
        registry: ReplayRegistry,
        online_rx: watch::Receiver<bool>,
        poll_interval: Option<Duration>,
    ) -> SyncCoordinator {
        SyncCoordinator::with_emitter(
            config(poll_interval),
            repo.clone(),
            registry,
            online_rx,
            Arc::new(NoOpEmitter),
        )
    }

    /// Polls `repo` until the queue is empty.
    async fn wait_until_drained(repo: &PendingOperationRepository) {
        timeout(Duration::from_secs(5), async {
            while repo.count().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue not drained");
    }

    #[derive(Default)]
    struct RecordingEmitter {
        progress: StdMutex<Vec<(i64, i64)>>,
        errors: StdMutex<Vec<(String, bool)>>,
        statuses: AtomicUsize,
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_status(&self, _status: &SyncStatus) {
            self.statuses.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_progress(&self, pending: i64, delivered: i64) {
            self.progress.lock().unwrap().push((pending, delivered));
        }
        fn emit_error(&self, message: &str, retryable: bool) {
            self.errors.lock().unwrap().push((message.to_string(), retryable));
        }
    }

    #[tokio::test]
    async fn test_failure_halts_pass_in_queue_order() {
        let (_db, repo) = setup().await;
        let delivered = Arc::new(StdMutex::new(Vec::new()));
        let shipping_down = Arc::new(AtomicBool::new(true));

        let mut registry = ReplayRegistry::new();
        let log = delivered.clone();
        registry.register_fn(OperationKind::Transfer, move |op| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(op.id);
                Ok(())
            }
        });
        let log = delivered.clone();
        let down = shipping_down.clone();
        registry.register_fn(OperationKind::Shipping, move |op| {
            let log = log.clone();
            let down = down.clone();
            async move {
                if down.load(Ordering::SeqCst) {
                    return Err(SyncError::ReplayFailed("warehouse closed".into()));
                }
                log.lock().unwrap().push(op.id);
                Ok(())
            }
        });

        let o1 = repo.enqueue(OperationKind::Transfer, "A", "{}").await.unwrap();
        let o2 = repo.enqueue(OperationKind::Shipping, "B", "{}").await.unwrap();
        let o3 = repo.enqueue(OperationKind::Transfer, "A", "{}").await.unwrap();

        let (_online_tx, online_rx) = watch::channel(true);
        let emitter = Arc::new(RecordingEmitter::default());
        let coordinator = SyncCoordinator::with_emitter(
            config(None),
            repo.clone(),
            registry,
            online_rx,
            emitter.clone(),
        );

        let report = coordinator.drainer.run_pass(PassCause::Manual).await.unwrap();
        assert_eq!(
            report,
            DrainReport {
                delivered: 1,
                halted_at: Some(o2.id),
                remaining: 2,
            }
        );
        assert_eq!(*delivered.lock().unwrap(), vec![o1.id]);

        let o2_after = repo.get_required(o2.id).await.unwrap();
        assert_eq!(o2_after.retry_count, 1);
        assert!(o2_after.last_error.unwrap().contains("warehouse closed"));
        let o3_after = repo.get_required(o3.id).await.unwrap();
        assert_eq!(o3_after.retry_count, 0);
        assert!(o3_after.last_attempt_at.is_none());

        assert_eq!(*emitter.progress.lock().unwrap(), vec![(2, 1)]);
        let errors = emitter.errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1);

        let status = coordinator.status_rx.borrow().clone();
        assert_eq!(status.pending_count, 2);
        assert!(status.last_error.is_some());

        // Next pass resumes at the failed entry; O1 is not delivered again.
        shipping_down.store(false, Ordering::SeqCst);
        let report = coordinator.drainer.run_pass(PassCause::Manual).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.delivered, 2);
        assert_eq!(*delivered.lock().unwrap(), vec![o1.id, o2.id, o3.id]);
        assert_eq!(repo.count().await.unwrap(), 0);
        assert!(coordinator.status_rx.borrow().last_error.is_none());
    }

    #[tokio::test]
    async fn test_missing_replayer_keeps_entry() {
        let (_db, repo) = setup().await;
        let op = repo.enqueue(OperationKind::Clearing, "BASKET-9", "{}").await.unwrap();

        let (_online_tx, online_rx) = watch::channel(true);
        let coordinator = coordinator(&repo, ReplayRegistry::new(), online_rx, None);

        let report = coordinator.drainer.run_pass(PassCause::Manual).await.unwrap();
        assert_eq!(report.halted_at, Some(op.id));

        let after = repo.get_required(op.id).await.unwrap();
        assert_eq!(after.retry_count, 1);
        assert!(after.last_error.unwrap().contains("clearing"));
    }

    #[tokio::test]
    async fn test_replay_timeout_is_a_failure() {
        let (_db, repo) = setup().await;
        let op = repo.enqueue(OperationKind::Receiving, "PALLET-1", "{}").await.unwrap();

        let mut registry = ReplayRegistry::new();
        registry.register_fn(OperationKind::Receiving, |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });

        let (_online_tx, online_rx) = watch::channel(true);
        let coordinator = SyncCoordinator::with_emitter(
            CoordinatorConfig {
                poll_interval: None,
                replay_timeout: Duration::from_millis(50),
            },
            repo.clone(),
            registry,
            online_rx,
            Arc::new(NoOpEmitter),
        );

        let report = coordinator.drainer.run_pass(PassCause::Manual).await.unwrap();
        assert_eq!(report.halted_at, Some(op.id));
        let after = repo.get_required(op.id).await.unwrap();
        assert!(after.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_offline_pass_touches_nothing() {
        let (_db, repo) = setup().await;
        let op = repo.enqueue(OperationKind::Production, "LOT-4", "{}").await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ReplayRegistry::new();
        let counter = calls.clone();
        registry.register_fn(OperationKind::Production, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        let (_online_tx, online_rx) = watch::channel(false);
        let coordinator = coordinator(&repo, registry, online_rx, None);

        let report = coordinator.drainer.run_pass(PassCause::Manual).await.unwrap();
        assert_eq!(report.delivered, 0);
        assert_eq!(report.halted_at, Some(op.id));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(repo.get_required(op.id).await.unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn test_going_offline_mid_pass_halts() {
        let (_db, repo) = setup().await;
        let first = repo.enqueue(OperationKind::Transfer, "A", "{}").await.unwrap();
        let second = repo.enqueue(OperationKind::Transfer, "A", "{}").await.unwrap();

        let (online_tx, online_rx) = watch::channel(true);
        let online_tx = Arc::new(online_tx);
        let mut registry = ReplayRegistry::new();
        let tx = online_tx.clone();
        registry.register_fn(OperationKind::Transfer, move |_| {
            tx.send_replace(false);
            async { Ok(()) }
        });

        let coordinator = coordinator(&repo, registry, online_rx, None);
        let report = coordinator.drainer.run_pass(PassCause::Manual).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.halted_at, Some(second.id));
        assert!(repo.get(first.id).await.unwrap().is_none());
        assert_eq!(repo.get_required(second.id).await.unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn test_online_edge_triggers_pass() {
        let (_db, repo) = setup().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ReplayRegistry::new();
        let counter = calls.clone();
        registry.register_fn(OperationKind::BasketUpdate, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        let (online_tx, online_rx) = watch::channel(false);
        let handle = coordinator(&repo, registry, online_rx, None).spawn();

        repo.enqueue(OperationKind::BasketUpdate, "BASKET-2", "{}").await.unwrap();
        handle.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        online_tx.send_replace(true);
        wait_until_drained(&repo).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut status = handle.subscribe_status();
        let status = timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.last_report.is_some()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert!(status.is_online);
        assert!(status.last_sync.is_some());

        handle.shutdown().await;
    }

    /// Flips the online flag back on when a pass reports its result.
    struct ReconnectingEmitter {
        online_tx: Arc<watch::Sender<bool>>,
    }

    impl SyncEventEmitter for ReconnectingEmitter {
        fn emit_status(&self, status: &SyncStatus) {
            if status.last_report.is_some() {
                self.online_tx.send_replace(true);
            }
        }
        fn emit_progress(&self, _pending: i64, _delivered: i64) {}
        fn emit_error(&self, _message: &str, _retryable: bool) {}
    }

    #[tokio::test]
    async fn test_reconnect_during_pass_resumes_drain() {
        let (_db, repo) = setup().await;
        repo.enqueue(OperationKind::Transfer, "A", "{}").await.unwrap();
        repo.enqueue(OperationKind::Transfer, "A", "{}").await.unwrap();

        let (online_tx, online_rx) = watch::channel(true);
        let online_tx = Arc::new(online_tx);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut registry = ReplayRegistry::new();
        let tx = online_tx.clone();
        let counter = calls.clone();
        registry.register_fn(OperationKind::Transfer, move |_| {
            // The link drops right after the first delivery.
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                tx.send_replace(false);
            }
            async { Ok(()) }
        });

        let handle = SyncCoordinator::with_emitter(
            config(None),
            repo.clone(),
            registry,
            online_rx,
            Arc::new(ReconnectingEmitter {
                online_tx: online_tx.clone(),
            }),
        )
        .spawn();

        wait_until_drained(&repo).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(*online_tx.borrow());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_trigger_while_online() {
        let (_db, repo) = setup().await;
        let (_online_tx, online_rx) = watch::channel(true);
        let mut registry = ReplayRegistry::new();
        registry.register_fn(OperationKind::Receiving, |_| async { Ok(()) });
        let handle = coordinator(&repo, registry, online_rx, None).spawn();

        repo.enqueue(OperationKind::Receiving, "PALLET-7", "{}").await.unwrap();
        handle.trigger();
        wait_until_drained(&repo).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_poll_retries_failed_entry() {
        let (_db, repo) = setup().await;
        repo.enqueue(OperationKind::Shipping, "B", "{}").await.unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let mut registry = ReplayRegistry::new();
        let counter = attempts.clone();
        registry.register_fn(OperationKind::Shipping, move |_| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(SyncError::ReplayFailed("busy".into()))
                } else {
                    Ok(())
                }
            }
        });

        let (_online_tx, online_rx) = watch::channel(true);
        let handle =
            coordinator(&repo, registry, online_rx, Some(Duration::from_millis(50))).spawn();

        wait_until_drained(&repo).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_drain_now_after_shutdown() {
        let (_db, repo) = setup().await;
        let (_online_tx, online_rx) = watch::channel(true);
        let handle = coordinator(&repo, ReplayRegistry::new(), online_rx, None).spawn();

        assert_eq!(handle.drain_now().await.unwrap(), DrainReport::default());

        handle.shutdown().await;
        assert!(matches!(handle.drain_now().await, Err(SyncError::ShuttingDown)));
        handle.shutdown().await;
    }
}
