//! # Pending Operations
//!
//! A pending operation is a business mutation that has been written locally
//! but not yet acknowledged by the remote inventory service.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Pending Operation Lifecycle                          │
//! │                                                                         │
//! │  business mutation ──► enqueue (id = next autoincrement)               │
//! │                              │                                          │
//! │                              ▼                                          │
//! │                    ┌───────────────────┐                               │
//! │                    │  PENDING          │◄─────────┐                    │
//! │                    │  retry_count = n  │          │ replay failed:     │
//! │                    └─────────┬─────────┘          │ retry_count += 1   │
//! │                              │ replay ok          │ pass halts here    │
//! │                              ▼                    │                    │
//! │                    ┌───────────────────┐          │                    │
//! │                    │  ACKNOWLEDGED     │──────────┘                    │
//! │                    │  (row deleted)    │                               │
//! │                    └───────────────────┘                               │
//! │                                                                         │
//! │  ORDER: replay is strictly oldest-first (by id) so that mutations on   │
//! │  the same subject reach the remote service in causal order.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// =============================================================================
// Operation Kind
// =============================================================================

/// Business action carried by a pending operation.
///
/// The queue itself never interprets the payload; the kind only selects which
/// remote call the sync coordinator replays it with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Produced goods bound to a basket.
    Production,
    /// Goods received into the warehouse.
    Receiving,
    /// Goods shipped out of the warehouse.
    Shipping,
    /// Basket moved between warehouses or locations.
    Transfer,
    /// Basket emptied and released for reuse.
    Clearing,
    /// Basket metadata changed (status, location, contents).
    BasketUpdate,
}

impl OperationKind {
    /// All kinds, in declaration order.
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Production,
        OperationKind::Receiving,
        OperationKind::Shipping,
        OperationKind::Transfer,
        OperationKind::Clearing,
        OperationKind::BasketUpdate,
    ];

    /// Returns the stable string form used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Production => "production",
            OperationKind::Receiving => "receiving",
            OperationKind::Shipping => "shipping",
            OperationKind::Transfer => "transfer",
            OperationKind::Clearing => "clearing",
            OperationKind::BasketUpdate => "basket_update",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .ok_or_else(|| CoreError::UnknownOperationKind(s.to_string()))
    }
}

// =============================================================================
// Pending Operation
// =============================================================================

/// A durably queued business mutation awaiting remote acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PendingOperation {
    /// Monotonically increasing queue position. Never reused.
    pub id: i64,

    /// Which remote call replays this operation.
    pub kind: OperationKind,

    /// Business subject the mutation applies to (e.g. basket UID).
    pub subject: String,

    /// Serialized payload, opaque to the queue.
    pub payload: String,

    /// When the operation was enqueued.
    pub enqueued_at: DateTime<Utc>,

    /// Failed replay attempts so far.
    pub retry_count: i64,

    /// Reason of the most recent failed attempt.
    pub last_error: Option<String>,

    /// When the most recent replay attempt finished.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl PendingOperation {
    /// Deserializes the payload as JSON.
    ///
    /// Replayers use this to recover the business request they were given
    /// when the mutation was recorded.
    pub fn payload_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.payload)
    }

    /// Returns true if the operation has failed at least `min_retries` times.
    pub fn is_stale(&self, min_retries: i64) -> bool {
        self.retry_count >= min_retries
    }
}
