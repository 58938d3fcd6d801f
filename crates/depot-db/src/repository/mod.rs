//! # Repository Module
//!
//! Database repository implementations.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Access                                    │
//! │                                                                         │
//! │  OperationRecorder / SyncCoordinator                                   │
//! │       │                                                                 │
//! │       │  db.pending_operations().list_in_order()                       │
//! │       ▼                                                                 │
//! │  PendingOperationRepository                                            │
//! │  ├── enqueue / enqueue_in_tx                                           │
//! │  ├── list_in_order / get / list_for_subject / list_stale               │
//! │  ├── acknowledge                                                       │
//! │  └── increment_retry                                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (pending_operations)                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod pending;
