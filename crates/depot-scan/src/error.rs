//! # Scan Error Types
//!
//! Errors surfaced by the session controller and hardware devices.
//!
//! Framing ambiguity (an empty terminator, an unmapped key) never shows up
//! here; only failures a caller can act on do.

use depot_core::ScanChannel;
use thiserror::Error;

/// Result type alias for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;

/// Scan subsystem errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    /// No device was registered for the requested channel.
    #[error("No device registered for channel '{0}'")]
    DeviceNotRegistered(ScanChannel),

    /// The hardware refused the subscription. The caller may retry.
    #[error("Hardware subscription failed: {0}")]
    Subscription(String),

    /// The hardware reported a fault during a running session.
    #[error("Hardware fault: {0}")]
    Hardware(String),

    /// The controller has been disposed.
    #[error("Scan controller has shut down")]
    ShutDown,
}

impl ScanError {
    /// Returns true if calling `start` again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Subscription(_) | ScanError::Hardware(_))
    }
}
