//! # Depot Configuration
//!
//! Configuration for a handheld depot device.
//!
//! ## Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Where Settings Come From                            │
//! │                                                                         │
//! │  1. DEPOT_* environment variables (win over everything)                │
//! │     DEPOT_REMOTE_URL=wss://inventory.example.com/socket                │
//! │     DEPOT_DEVICE_ID=abc-123                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/depot/depot.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.depot.depot/depot.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     auto-generated device id, 30s heartbeat, 100ms framing window      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example `depot.toml`
//! ```toml
//! # depot.toml
//! [device]
//! id = "5b0e7d4c-2f31-4a8e-9d6b-0c1f2e3a4b5c"
//! name = "Dock 3 Handheld"
//!
//! [remote]
//! url = "wss://inventory.example.com/socket"
//! heartbeat_interval_secs = 30
//! heartbeat_timeout_secs = 60
//! reconnect_delay_ms = 2000
//!
//! [sync]
//! poll_interval_secs = 30   # 0 disables periodic passes
//! replay_timeout_secs = 30
//!
//! [scan]
//! frame_timeout_ms = 100
//!
//! [storage]
//! database_path = "/var/lib/depot/depot.db"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use depot_core::DEFAULT_FRAME_TIMEOUT_MS;
use depot_db::DbConfig;
use depot_scan::ScanConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connectivity::MonitorConfig;
use crate::coordinator::CoordinatorConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::WsConnector;

// =============================================================================
// Device Configuration
// =============================================================================

/// Identity of this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// UUID v4, generated when the file does not provide one.
    pub id: String,

    /// Shown in remote-side logs.
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Depot Handheld".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Remote inventory service connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Socket endpoint (`ws://` or `wss://`).
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Must exceed the heartbeat interval.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_heartbeat_timeout() -> u64 {
    60
}
fn default_reconnect_delay() -> u64 {
    2000
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            url: None,
            connect_timeout_secs: default_connect_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Queue draining behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Periodic pass while online; 0 disables it.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_replay_timeout")]
    pub replay_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}
fn default_replay_timeout() -> u64 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            poll_interval_secs: default_poll_interval(),
            replay_timeout_secs: default_replay_timeout(),
        }
    }
}

// =============================================================================
// Scan Settings
// =============================================================================

/// Scan controller tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(default = "default_frame_timeout")]
    pub frame_timeout_ms: u64,

    /// Signals buffered per consumer before the oldest are dropped.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Raw hardware callbacks queued before the newest are dropped.
    #[serde(default = "default_hardware_queue")]
    pub hardware_queue: usize,
}

fn default_frame_timeout() -> u64 {
    DEFAULT_FRAME_TIMEOUT_MS
}
fn default_event_buffer() -> usize {
    256
}
fn default_hardware_queue() -> usize {
    1024
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            frame_timeout_ms: default_frame_timeout(),
            event_buffer: default_event_buffer(),
            hardware_queue: default_hardware_queue(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Local database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Defaults to `depot.db` in the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Depot Config
// =============================================================================

/// Complete device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepotConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub scan: ScanSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl DepotConfig {
    /// Defaults with a freshly generated device id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `depot.toml` (or `config_path`), applies `DEPOT_*` overrides
    /// and validates. A missing file yields the defaults.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading depot config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Like [`load`](Self::load), falling back to defaults on any error.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load depot config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Writes the configuration as TOML, creating parent directories.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Depot config saved");
        Ok(())
    }

    /// Rejects values the monitor or scanner cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        if let Some(ref url) = self.remote.url {
            let parsed = url::Url::parse(url)?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(SyncError::InvalidUrl(format!(
                    "Remote URL must start with ws:// or wss://, got: {}",
                    url
                )));
            }
        }

        let remote = &self.remote;
        if remote.connect_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".into(),
            ));
        }
        if remote.heartbeat_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "heartbeat_interval_secs must be greater than 0".into(),
            ));
        }
        if remote.heartbeat_timeout_secs <= remote.heartbeat_interval_secs {
            return Err(SyncError::InvalidConfig(format!(
                "heartbeat_timeout_secs ({}) must exceed heartbeat_interval_secs ({})",
                remote.heartbeat_timeout_secs, remote.heartbeat_interval_secs
            )));
        }
        if remote.reconnect_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "reconnect_delay_ms must be greater than 0".into(),
            ));
        }

        if self.sync.replay_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "replay_timeout_secs must be greater than 0".into(),
            ));
        }

        let scan = &self.scan;
        if scan.frame_timeout_ms == 0 || scan.event_buffer == 0 || scan.hardware_queue == 0 {
            return Err(SyncError::InvalidConfig(
                "scan frame_timeout_ms, event_buffer and hardware_queue must be greater than 0"
                    .into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("DEPOT_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(name) = std::env::var("DEPOT_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(url) = std::env::var("DEPOT_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.url = Some(url);
        }

        if let Ok(secs) = std::env::var("DEPOT_POLL_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) => self.sync.poll_interval_secs = secs,
                Err(_) => warn!(value = %secs, "Ignoring invalid DEPOT_POLL_INTERVAL_SECS"),
            }
        }

        if let Ok(ms) = std::env::var("DEPOT_FRAME_TIMEOUT_MS") {
            match ms.parse::<u64>() {
                Ok(ms) => self.scan.frame_timeout_ms = ms,
                Err(_) => warn!(value = %ms, "Ignoring invalid DEPOT_FRAME_TIMEOUT_MS"),
            }
        }

        if let Ok(path) = std::env::var("DEPOT_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "depot", "depot")
    }

    /// `depot.toml` in the platform config directory.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("depot.toml"))
    }

    // =========================================================================
    // Component Configs
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Connectivity monitor timing.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            connect_timeout: Duration::from_secs(self.remote.connect_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.remote.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(self.remote.heartbeat_timeout_secs),
            reconnect_delay: Duration::from_millis(self.remote.reconnect_delay_ms),
            auto_connect: true,
        }
    }

    /// Sync coordinator timing.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let poll = self.sync.poll_interval_secs;
        CoordinatorConfig {
            poll_interval: (poll > 0).then(|| Duration::from_secs(poll)),
            replay_timeout: Duration::from_secs(self.sync.replay_timeout_secs),
        }
    }

    /// Scan controller tuning.
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            frame_timeout: Duration::from_millis(self.scan.frame_timeout_ms),
            event_buffer: self.scan.event_buffer,
            hardware_queue: self.scan.hardware_queue,
        }
    }

    /// Database settings for the configured (or default) path.
    pub fn db_config(&self) -> SyncResult<DbConfig> {
        let path = match &self.storage.database_path {
            Some(path) => path.clone(),
            None => Self::project_dirs()
                .map(|dirs| dirs.data_dir().join("depot.db"))
                .ok_or_else(|| {
                    SyncError::InvalidConfig("No database path and no data directory".into())
                })?,
        };
        Ok(DbConfig::new(path))
    }

    /// WebSocket connector for `remote.url`.
    pub fn ws_connector(&self) -> SyncResult<WsConnector> {
        let url = self
            .remote
            .url
            .as_deref()
            .ok_or_else(|| SyncError::InvalidConfig("remote.url is not set".into()))?;
        WsConnector::new(url)
    }
}
