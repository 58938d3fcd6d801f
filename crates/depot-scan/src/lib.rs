//! # depot-scan: Scan Session Controller
//!
//! Turns two independently-clocked hardware readers into one ordered stream
//! of scan results.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Scan Data Flow                                   │
//! │                                                                         │
//! │   RF reader SDK              Keyboard-wedge reader                     │
//! │        │ tag / round end           │ key down / up                     │
//! │        ▼                           ▼                                    │
//! │   HardwareSink (gen N)       HardwareSink (gen N)                      │
//! │        └──────────────┬────────────┘                                    │
//! │                       ▼  bounded mpsc                                   │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               depot-scan (THIS CRATE)                           │   │
//! │  │                                                                 │   │
//! │  │   ScanController actor                                          │   │
//! │  │   ├── generation check (drop stale callbacks)                   │   │
//! │  │   ├── KeystrokeFramer   (barcode channel)                       │   │
//! │  │   └── TagDeduplicator   (rfid channel)                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                       │  broadcast (drop-oldest)                        │
//! │                       ▼                                                 │
//! │   ScanStream: Started / Event / Stopped / ClearRequested / Error       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`controller`] - Session state machine actor and its handle
//! - [`device`] - Hardware boundary (`ScanDevice`, `HardwareSink`)
//! - [`signal`] - Unified stream items and subscription
//! - [`error`] - Scan error types

pub mod controller;
pub mod device;
pub mod error;
pub mod signal;

pub use controller::{ScanConfig, ScanController, ScanControllerBuilder, ScanHandle, ScanState};
pub use device::{HardwareEvent, HardwareSink, ManualDevice, ScanDevice};
pub use error::{ScanError, ScanResult};
pub use signal::{ScanSignal, ScanStream, StopReason};
