//! # depot-core: Pure Scan & Queue Logic
//!
//! This crate holds the deterministic heart of the scan & sync orchestrator.
//! Nothing here touches hardware, sockets, or disks: every function takes its
//! inputs (including timestamps) explicitly.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Scan & Sync Data Flow                               │
//! │                                                                         │
//! │  Barcode reader (key events)        RF reader (tag callbacks)           │
//! │          │                                   │                          │
//! │          ▼                                   ▼                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ depot-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────────────┐   ┌──────────────────┐   ┌────────────┐ │   │
//! │  │   │ KeystrokeFramer  │   │ TagDeduplicator  │   │ operation  │ │   │
//! │  │   │ keys → barcode   │   │ tags → unique    │   │ Pending    │ │   │
//! │  │   │ (100ms window)   │   │ (mode-aware)     │   │ Operation  │ │   │
//! │  │   └──────────────────┘   └──────────────────┘   └────────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • NO RUNTIME                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │          │                                   │                          │
//! │          ▼                                   ▼                          │
//! │   depot-scan (session controller)     depot-db (pending queue)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Scan channel/mode, scanned tags, unified scan events
//! - [`operation`] - Pending operation records and operation kinds
//! - [`keystroke`] - Keystroke framer for keyboard-wedge barcode readers
//! - [`dedup`] - Mode-aware RFID tag deduplication
//! - [`error`] - Core error types
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use depot_core::keystroke::{KeyOutcome, KeystrokeFramer, keycodes};
//!
//! let mut framer = KeystrokeFramer::default();
//! let t0 = Instant::now();
//!
//! framer.handle_key(keycodes::DIGIT_4, true, t0);
//! framer.handle_key(keycodes::DIGIT_2, true, t0 + Duration::from_millis(10));
//! let outcome = framer.handle_key(keycodes::ENTER, true, t0 + Duration::from_millis(20));
//!
//! assert_eq!(outcome, KeyOutcome::Completed("42".to_string()));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod dedup;
pub mod error;
pub mod keystroke;
pub mod operation;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use dedup::{RoundOutcome, TagDeduplicator};
pub use error::{CoreError, CoreResult};
pub use keystroke::{KeyOutcome, KeystrokeFramer};
pub use operation::{OperationKind, PendingOperation};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default maximum gap between two keystrokes of the same barcode.
///
/// Keyboard-wedge scanners type a whole code in a few milliseconds; a human
/// typing on the same keypad is much slower than this.
pub const DEFAULT_FRAME_TIMEOUT_MS: u64 = 100;
