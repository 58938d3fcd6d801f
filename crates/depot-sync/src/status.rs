//! # Sync Status
//!
//! What the sync coordinator reports to the embedding application.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Status Reporting                                 │
//! │                                                                         │
//! │  SyncCoordinator ──► watch<SyncStatus>      (polled by status())       │
//! │                  └─► SyncEventEmitter                                  │
//! │                        emit_status   after every pass / online edge    │
//! │                        emit_progress after every acknowledged entry    │
//! │                        emit_error    after every failed replay         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};

use crate::coordinator::DrainReport;

/// Snapshot published after every pass and online edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    /// Online flag as last seen by the coordinator.
    pub is_online: bool,

    /// Entries still waiting in the queue.
    pub pending_count: i64,

    /// When the last entry was delivered.
    pub last_sync: Option<DateTime<Utc>>,

    /// Reason of the last failed replay, cleared by the next delivery.
    pub last_error: Option<String>,

    /// Outcome of the most recent pass.
    pub last_report: Option<DrainReport>,
}

/// Receives sync notifications (e.g. to update a UI badge).
pub trait SyncEventEmitter: Send + Sync {
    /// A new snapshot is available.
    fn emit_status(&self, status: &SyncStatus);

    /// One more entry was delivered; `pending` remain queued.
    fn emit_progress(&self, pending: i64, delivered: i64);

    /// A replay failed. `retryable` mirrors [`SyncError::is_retryable`](crate::SyncError::is_retryable).
    fn emit_error(&self, message: &str, retryable: bool);
}

/// Discards all notifications.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _pending: i64, _delivered: i64) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}
