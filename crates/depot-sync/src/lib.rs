//! # depot-sync: Connectivity, Replay & Composition
//!
//! Keeps business mutations flowing to the remote inventory service no
//! matter how flaky the warehouse network is.
//!
//! ## Sync Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline-First Sync                               │
//! │                                                                         │
//! │  business layer ──record()──► pending_operations (SQLite, FIFO)        │
//! │                                        │                                │
//! │                                        ▼                                │
//! │  ConnectivityMonitor ──online──► SyncCoordinator ──► replayer[kind]    │
//! │   (WebSocket, heartbeat,          (oldest first,      (business        │
//! │    fixed reconnect delay)          halt on failure)    layer's calls)  │
//! │                                                                         │
//! │  • the queue is the ONLY route to the remote service                   │
//! │  • an entry leaves the queue only after the remote accepted it         │
//! │  • connectivity errors never reach business code                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`orchestrator`] - Composition root owning all components
//! - [`connectivity`] - Socket state machine and online flag
//! - [`transport`] - `Connector` seam, WebSocket and loopback connectors
//! - [`coordinator`] - Queue draining passes
//! - [`replay`] - Per-kind replay registry
//! - [`recorder`] - The mutation path
//! - [`status`] - Status snapshot and emitter trait
//! - [`config`] - `depot.toml` loading and validation
//! - [`error`] - Sync error types

pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod orchestrator;
pub mod recorder;
pub mod replay;
pub mod status;
pub mod transport;

pub use config::DepotConfig;
pub use connectivity::{ConnectivityHandle, ConnectivityMonitor, ConnectivityState, MonitorConfig};
pub use coordinator::{CoordinatorConfig, CoordinatorHandle, DrainReport, SyncCoordinator};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{DepotStatus, Orchestrator, OrchestratorBuilder};
pub use recorder::OperationRecorder;
pub use replay::{ReplayRegistry, Replayer};
pub use status::{NoOpEmitter, SyncEventEmitter, SyncStatus};
pub use transport::{Connector, Frame, FrameSink, FrameStream, LoopbackConnector, WsConnector};
