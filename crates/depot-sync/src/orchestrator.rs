//! # Orchestrator
//!
//! Explicit composition root: builds every component once, hands out their
//! handles, and tears them down in order.
//!
//! ## Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                                   │
//! │                                                                         │
//! │  DepotConfig ──┬─► ScanHandle           (depot-scan actor)             │
//! │                ├─► ConnectivityHandle   (socket actor)                 │
//! │                │        │ online: watch<bool>                          │
//! │                │        ▼                                              │
//! │                ├─► CoordinatorHandle    (drain actor)                  │
//! │                │        ▲ trigger()                                    │
//! │                └─► OperationRecorder ───┘                              │
//! │                                                                         │
//! │  Database is shared by recorder and coordinator.                       │
//! │                                                                         │
//! │  shutdown(): scan.dispose → coordinator → connectivity → database      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use depot_core::{OperationKind, PendingOperation, ScanChannel, ScanMode};
use depot_db::Database;
use depot_scan::{
    ScanController, ScanControllerBuilder, ScanDevice, ScanHandle, ScanResult, ScanState,
    ScanStream,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::DepotConfig;
use crate::connectivity::{ConnectivityHandle, ConnectivityMonitor, ConnectivityState};
use crate::coordinator::{CoordinatorHandle, SyncCoordinator};
use crate::error::SyncResult;
use crate::recorder::OperationRecorder;
use crate::replay::ReplayRegistry;
use crate::status::{NoOpEmitter, SyncEventEmitter, SyncStatus};
use crate::transport::Connector;

/// Snapshot of every component.
#[derive(Debug, Clone)]
pub struct DepotStatus {
    pub connectivity: ConnectivityState,
    pub scan: ScanState,
    pub sync: SyncStatus,
}

// =============================================================================
// Builder
// =============================================================================

/// Collects collaborators, then starts everything with [`start`](Self::start).
pub struct OrchestratorBuilder {
    config: DepotConfig,
    database: Option<Database>,
    connector: Option<Arc<dyn Connector>>,
    registry: ReplayRegistry,
    scan: ScanControllerBuilder,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl OrchestratorBuilder {
    /// Uses an already open database instead of the configured path.
    pub fn database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Uses `connector` instead of a WebSocket to `remote.url`.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the replayers used to deliver queued operations.
    pub fn replayers(mut self, registry: ReplayRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers the RF tag reader.
    pub fn rfid(mut self, device: Arc<dyn ScanDevice>) -> Self {
        self.scan = self.scan.rfid(device);
        self
    }

    /// Registers the keyboard-wedge barcode reader.
    pub fn barcode(mut self, device: Arc<dyn ScanDevice>) -> Self {
        self.scan = self.scan.barcode(device);
        self
    }

    /// Receives sync status notifications.
    pub fn emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Validates the configuration, opens storage and spawns all actors.
    ///
    /// Must be called within a tokio runtime.
    pub async fn start(self) -> SyncResult<Orchestrator> {
        let config = self.config;
        config.validate()?;

        let database = match self.database {
            Some(database) => database,
            None => Database::new(config.db_config()?).await?,
        };

        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(config.ws_connector()?),
        };

        let scan = self.scan.config(config.scan_config()).spawn();
        let connectivity = ConnectivityMonitor::spawn(config.monitor_config(), connector);
        let coordinator = SyncCoordinator::with_emitter(
            config.coordinator_config(),
            database.pending_operations(),
            self.registry,
            connectivity.subscribe_online(),
            self.emitter,
        )
        .spawn();
        let recorder = OperationRecorder::new(database.pending_operations(), coordinator.clone());

        info!(
            device_id = %config.device_id(),
            device_name = %config.device.name,
            "Depot orchestrator started"
        );

        Ok(Orchestrator {
            config,
            database,
            scan,
            connectivity,
            coordinator,
            recorder,
        })
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Owns the scan controller, connectivity monitor, sync coordinator and
/// recorder of one device.
pub struct Orchestrator {
    config: DepotConfig,
    database: Database,
    scan: ScanHandle,
    connectivity: ConnectivityHandle,
    coordinator: CoordinatorHandle,
    recorder: OperationRecorder,
}

impl Orchestrator {
    /// Starts building an orchestrator for `config`.
    pub fn builder(config: DepotConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            database: None,
            connector: None,
            registry: ReplayRegistry::new(),
            scan: ScanController::builder(),
            emitter: Arc::new(NoOpEmitter),
        }
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    /// Starts a scan session, superseding any running one.
    pub async fn start_scan(&self, channel: ScanChannel, mode: ScanMode) -> ScanResult<u64> {
        self.scan.start(channel, mode).await
    }

    /// Stops the running scan session.
    pub async fn stop_scan(&self) -> ScanResult<()> {
        self.scan.stop().await
    }

    /// Asks consumers to reset their accumulated scan results.
    pub async fn clear_scan(&self) -> ScanResult<()> {
        self.scan.clear().await
    }

    /// Subscribes to the unified scan stream.
    pub fn scan_events(&self) -> ScanStream {
        self.scan.subscribe()
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Subscribes to the online flag.
    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.connectivity.subscribe_online()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Queues a business mutation for delivery. See [`OperationRecorder::record`].
    pub async fn record<T>(
        &self,
        kind: OperationKind,
        subject: &str,
        payload: &T,
    ) -> SyncResult<PendingOperation>
    where
        T: Serialize + ?Sized,
    {
        self.recorder.record(kind, subject, payload).await
    }

    /// Entries that failed at least `min_retries` times, oldest first.
    pub async fn stale_operations(&self, min_retries: i64) -> SyncResult<Vec<PendingOperation>> {
        Ok(self
            .database
            .pending_operations()
            .list_stale(min_retries)
            .await?)
    }

    /// Current state of every component.
    pub async fn status(&self) -> SyncResult<DepotStatus> {
        let mut sync = self.coordinator.status();
        sync.pending_count = self.database.pending_operations().count().await?;
        sync.is_online = self.connectivity.is_online();

        Ok(DepotStatus {
            connectivity: self.connectivity.state(),
            scan: self.scan.state(),
            sync,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &DepotConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn recorder(&self) -> &OperationRecorder {
        &self.recorder
    }

    pub fn scan(&self) -> &ScanHandle {
        &self.scan
    }

    pub fn connectivity(&self) -> &ConnectivityHandle {
        &self.connectivity
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Releases hardware, stops all actors and closes the database.
    ///
    /// Scan consumers observe end-of-stream. Idempotent.
    pub async fn shutdown(&self) {
        info!("Shutting down depot orchestrator");

        if let Err(e) = self.scan.dispose().await {
            warn!(error = %e, "Scan controller did not shut down cleanly");
        }
        self.coordinator.shutdown().await;
        self.connectivity.shutdown().await;
        self.database.close().await;

        info!("Depot orchestrator stopped");
    }
}
