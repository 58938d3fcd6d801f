//! # Hardware Boundary
//!
//! How vendor readers plug into the session controller.
//!
//! ## Callback Bridge
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Hardware → Controller                             │
//! │                                                                         │
//! │  vendor SDK thread                          controller task            │
//! │  ─────────────────                          ───────────────            │
//! │  on_tag(id, rssi) ──► sink.tag_detected() ──┐                          │
//! │  on_key(code, down) ► sink.key()          ──┤  bounded mpsc            │
//! │  on_round_end() ────► sink.round_ended()  ──┤  (generation, event)     │
//! │  on_error(msg) ─────► sink.fault()        ──┘        │                 │
//! │                                                      ▼                 │
//! │                                         generation == current?         │
//! │                                           yes → framer / dedup         │
//! │                                           no  → discarded              │
//! │                                                                         │
//! │  Every subscription gets its own sink stamped with a generation.       │
//! │  A sink kept alive after release() can still push, but whatever it     │
//! │  pushes is dropped by the controller.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use depot_core::keystroke::is_scanner_key;
use depot_core::ScanMode;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

use crate::error::{ScanError, ScanResult};

// =============================================================================
// Hardware Events
// =============================================================================

/// A raw callback from a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareEvent {
    /// A key transition from a keyboard-wedge reader.
    Key {
        code: u32,
        is_key_down: bool,
        at: Instant,
    },
    /// A tag seen during an inventory round.
    TagDetected { id: String, rssi: i32, at: Instant },
    /// The current inventory round finished.
    RoundEnded,
    /// The reader reported an error mid-session.
    Fault(String),
}

// =============================================================================
// Hardware Sink
// =============================================================================

/// Thread-safe entry point for hardware callbacks of one subscription.
///
/// Never blocks: when the controller's ingress queue is full the event is
/// dropped and a warning is logged.
#[derive(Debug, Clone)]
pub struct HardwareSink {
    generation: u64,
    tx: mpsc::Sender<(u64, HardwareEvent)>,
}

impl HardwareSink {
    pub(crate) fn new(generation: u64, tx: mpsc::Sender<(u64, HardwareEvent)>) -> Self {
        HardwareSink { generation, tx }
    }

    /// Subscription generation this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forwards a key transition stamped with the current time.
    ///
    /// Returns `true` if the key belongs to the scanner alphabet and was
    /// handed to the controller; `false` means the caller should route it
    /// elsewhere (e.g. to a focused text field).
    pub fn key(&self, code: u32, is_key_down: bool) -> bool {
        self.key_at(code, is_key_down, Instant::now())
    }

    /// Forwards a key transition with an explicit timestamp.
    pub fn key_at(&self, code: u32, is_key_down: bool, at: Instant) -> bool {
        if !is_scanner_key(code) {
            return false;
        }
        self.push(HardwareEvent::Key {
            code,
            is_key_down,
            at,
        });
        true
    }

    /// Forwards a tag detection.
    pub fn tag_detected(&self, id: impl Into<String>, rssi: i32) {
        self.push(HardwareEvent::TagDetected {
            id: id.into(),
            rssi,
            at: Instant::now(),
        });
    }

    /// Signals the end of an inventory round.
    pub fn round_ended(&self) {
        self.push(HardwareEvent::RoundEnded);
    }

    /// Reports a hardware error. The controller ends the session.
    pub fn fault(&self, message: impl Into<String>) {
        self.push(HardwareEvent::Fault(message.into()));
    }

    fn push(&self, event: HardwareEvent) {
        match self.tx.try_send((self.generation, event)) {
            Ok(()) => {}
            Err(TrySendError::Full((_, event))) => {
                warn!(
                    generation = self.generation,
                    ?event,
                    "Hardware queue full, dropping newest event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                trace!(generation = self.generation, "Scan controller gone, event ignored");
            }
        }
    }
}

// =============================================================================
// Scan Device
// =============================================================================

/// A physical reader behind one scan channel.
///
/// `acquire` subscribes to the vendor callbacks and starts reading;
/// `release` must stop callbacks and free the hardware. The controller calls
/// `release` on every exit path of a session, including faults.
#[async_trait]
pub trait ScanDevice: Send + Sync {
    /// Starts reading, delivering callbacks through `sink`.
    async fn acquire(&self, mode: ScanMode, sink: HardwareSink) -> ScanResult<()>;

    /// Stops reading and drops the subscription.
    async fn release(&self) -> ScanResult<()>;
}

// =============================================================================
// Manual Device
// =============================================================================

#[derive(Debug, Default)]
struct ManualState {
    sink: Option<HardwareSink>,
    mode: Option<ScanMode>,
    acquisitions: usize,
    releases: usize,
    fail_next_acquire: Option<String>,
}

/// A device driven programmatically through its current sink.
///
/// Used for soft-keyboard entry, demo builds and tests: whoever holds the
/// device can fetch the live sink and push events as if they came from a
/// reader.
#[derive(Debug, Default)]
pub struct ManualDevice {
    state: Mutex<ManualState>,
}

impl ManualDevice {
    /// Creates an idle device.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the sink of the active subscription.
    pub fn sink(&self) -> Option<HardwareSink> {
        self.lock().sink.clone()
    }

    /// Returns the mode of the active subscription.
    pub fn mode(&self) -> Option<ScanMode> {
        self.lock().mode
    }

    /// Returns true while subscribed.
    pub fn is_acquired(&self) -> bool {
        self.lock().sink.is_some()
    }

    /// Number of successful `acquire` calls so far.
    pub fn acquisitions(&self) -> usize {
        self.lock().acquisitions
    }

    /// Number of `release` calls so far.
    pub fn releases(&self) -> usize {
        self.lock().releases
    }

    /// Makes the next `acquire` fail with a subscription error.
    pub fn fail_next_acquire(&self, message: impl Into<String>) {
        self.lock().fail_next_acquire = Some(message.into());
    }
}

#[async_trait]
impl ScanDevice for ManualDevice {
    async fn acquire(&self, mode: ScanMode, sink: HardwareSink) -> ScanResult<()> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next_acquire.take() {
            return Err(ScanError::Subscription(message));
        }
        state.sink = Some(sink);
        state.mode = Some(mode);
        state.acquisitions += 1;
        Ok(())
    }

    async fn release(&self) -> ScanResult<()> {
        let mut state = self.lock();
        state.sink = None;
        state.mode = None;
        state.releases += 1;
        Ok(())
    }
}
