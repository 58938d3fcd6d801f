//! # Unified Scan Stream
//!
//! Everything the controller publishes goes through one broadcast channel as
//! a [`ScanSignal`]. Consumers that fall behind lose the OLDEST signals.

use std::fmt;

use depot_core::{ScanChannel, ScanEvent, ScanMode};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

// =============================================================================
// Signals
// =============================================================================

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// Single-shot mode produced its result.
    Completed,
    /// A new `start()` replaced the session.
    Superseded,
    /// The hardware reported a fault.
    Fault,
    /// The controller was disposed.
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => write!(f, "requested"),
            StopReason::Completed => write!(f, "completed"),
            StopReason::Superseded => write!(f, "superseded"),
            StopReason::Fault => write!(f, "fault"),
            StopReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// One item on the unified scan stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanSignal {
    /// A session began reading.
    Started {
        generation: u64,
        channel: ScanChannel,
        mode: ScanMode,
    },
    /// A deduplicated tag or a completed barcode.
    Event { generation: u64, event: ScanEvent },
    /// A session ended and its hardware was released.
    Stopped { generation: u64, reason: StopReason },
    /// Callers should reset their accumulated result lists.
    ClearRequested,
    /// Subscription failure or hardware fault.
    Error { generation: u64, message: String },
}

impl ScanSignal {
    /// Returns the scan event, if this signal carries one.
    pub fn event(&self) -> Option<&ScanEvent> {
        match self {
            ScanSignal::Event { event, .. } => Some(event),
            _ => None,
        }
    }

    /// Returns the session generation this signal belongs to.
    pub fn generation(&self) -> Option<u64> {
        match self {
            ScanSignal::Started { generation, .. }
            | ScanSignal::Event { generation, .. }
            | ScanSignal::Stopped { generation, .. }
            | ScanSignal::Error { generation, .. } => Some(*generation),
            ScanSignal::ClearRequested => None,
        }
    }
}

// =============================================================================
// Scan Stream
// =============================================================================

/// A consumer's subscription to the unified scan stream.
///
/// `next()` is cancel-safe and returns `None` once the controller is
/// disposed.
#[derive(Debug)]
pub struct ScanStream {
    rx: broadcast::Receiver<ScanSignal>,
}

impl ScanStream {
    pub(crate) fn new(rx: broadcast::Receiver<ScanSignal>) -> Self {
        ScanStream { rx }
    }

    /// Waits for the next signal.
    pub async fn next(&mut self) -> Option<ScanSignal> {
        loop {
            match self.rx.recv().await {
                Ok(signal) => return Some(signal),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Scan consumer lagging, oldest signals dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Waits for the next tag or barcode, skipping control signals.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        loop {
            if let ScanSignal::Event { event, .. } = self.next().await? {
                return Some(event);
            }
        }
    }

    /// Converts the subscription into a `Stream`.
    pub fn into_stream(self) -> impl Stream<Item = ScanSignal> + Send + Unpin {
        BroadcastStream::new(self.rx).filter_map(|item| match item {
            Ok(signal) => Some(signal),
            Err(err) => {
                warn!(error = %err, "Scan consumer lagging, oldest signals dropped");
                None
            }
        })
    }
}
