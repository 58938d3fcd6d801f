//! # Error Types
//!
//! Domain-specific error types for depot-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  depot-core   CoreError  - parsing of enumerated values                │
//! │  depot-db     DbError    - pending-operation store failures            │
//! │  depot-scan   ScanError  - hardware subscription / session failures    │
//! │  depot-sync   SyncError  - connectivity, replay, configuration         │
//! │                                                                         │
//! │  Framing ambiguity (empty terminator, unmapped key) is NOT an error:   │
//! │  the framer reports it through KeyOutcome instead.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core errors.
///
/// The pure layer has very few ways to fail; all of them are about turning
/// external strings (config values, database columns) into typed values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// An operation kind string did not match any known business action.
    #[error("Unknown operation kind: '{0}'")]
    UnknownOperationKind(String),

    /// A scan mode string did not match `single` or `continuous`.
    #[error("Unknown scan mode: '{0}'. Valid options: single, continuous")]
    UnknownScanMode(String),

    /// A scan channel string did not match `rfid` or `barcode`.
    #[error("Unknown scan channel: '{0}'. Valid options: rfid, barcode")]
    UnknownScanChannel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::UnknownOperationKind("teleport".into());
        assert!(err.to_string().contains("teleport"));

        let err = CoreError::UnknownScanMode("burst".into());
        assert!(err.to_string().contains("single, continuous"));
    }
}
