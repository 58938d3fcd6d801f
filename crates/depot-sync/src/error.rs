//! # Sync Error Types
//!
//! Everything that can go wrong between the queue and the remote service.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SyncError Categories                            │
//! │                                                                         │
//! │  CONFIGURATION         TRANSPORT              STORE / REPLAY           │
//! │  ─────────────         ─────────              ──────────────           │
//! │  InvalidConfig         ConnectionFailed       Store(DbError)           │
//! │  MissingDeviceId       Disconnected           ReplayFailed             │
//! │  InvalidUrl            Timeout                ReplayTimeout            │
//! │  ConfigLoadFailed      TlsError               MissingReplayer          │
//! │  ConfigSaveFailed      WebSocketError         SerializationFailed      │
//! │                        HeartbeatTimeout                                │
//! │                                                                         │
//! │  Transport errors never reach business code: the connectivity monitor  │
//! │  folds them into Disconnected / Error states and reconnects.           │
//! │  Store errors on the record path ARE returned: losing a business       │
//! │  mutation silently is not acceptable.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use depot_core::OperationKind;
use depot_db::DbError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("device.id is empty")]
    MissingDeviceId,

    #[error("Bad remote URL: {0}")]
    InvalidUrl(String),

    #[error("Could not read depot.toml: {0}")]
    ConfigLoadFailed(String),

    #[error("Could not write depot.toml: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The socket could not be opened.
    #[error("Connect failed: {0}")]
    ConnectionFailed(String),

    #[error("Socket closed")]
    Disconnected,

    /// Connect attempt exceeded `connect_timeout`.
    #[error("Connect timed out after {0}s")]
    Timeout(u64),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// No inbound activity within the heartbeat window.
    #[error("No inbound traffic for {0}s")]
    HeartbeatTimeout(u64),

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error(transparent)]
    Store(#[from] DbError),

    /// The payload could not be encoded as JSON.
    #[error("Payload encoding failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Replay Errors
    // =========================================================================
    /// The remote service rejected or failed a replayed operation.
    #[error("Replay failed: {0}")]
    ReplayFailed(String),

    #[error("Replay of operation {id} timed out after {secs}s")]
    ReplayTimeout { id: i64, secs: u64 },

    /// Counts as a failed attempt; the entry stays queued.
    #[error("No replayer for '{0}'")]
    MissingReplayer(OperationKind),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Shutting down")]
    ShuttingDown,

}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the same attempt may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_)
            | SyncError::Disconnected
            | SyncError::Timeout(_)
            | SyncError::WebSocketError(_)
            | SyncError::HeartbeatTimeout(_)
            | SyncError::ReplayFailed(_)
            | SyncError::ReplayTimeout { .. } => true,
            SyncError::Store(db) => db.is_transient(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::Disconnected.is_retryable());
        assert!(SyncError::ReplayTimeout { id: 3, secs: 30 }.is_retryable());
        assert!(SyncError::Store(DbError::PoolExhausted).is_retryable());

        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::Store(DbError::QueryFailed("no such table".into())).is_retryable());
        assert!(!SyncError::MissingReplayer(OperationKind::Clearing).is_retryable());
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::MissingDeviceId.is_config_error());
        assert!(SyncError::InvalidUrl("ftp://x".into()).is_config_error());
        assert!(!SyncError::Disconnected.is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::MissingReplayer(OperationKind::BasketUpdate);
        assert!(err.to_string().contains("basket_update"));

        let err: SyncError = url::Url::parse("not a url").unwrap_err().into();
        assert!(err.is_config_error());
    }
}
