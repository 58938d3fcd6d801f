//! # Scan Types
//!
//! Types shared by the framer, the deduplicator and the session controller.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Scan Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  ScanChannel    │   │    ScanMode     │   │   ScannedTag    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Rfid           │   │  Single         │   │  id (HEX)       │       │
//! │  │  Barcode        │   │  Continuous     │   │  rssi           │       │
//! │  └─────────────────┘   └─────────────────┘   │  detected_at    │       │
//! │                                              └─────────────────┘       │
//! │  ┌───────────────────────────────────────────────────────────────┐     │
//! │  │  ScanEvent  = Tag(ScannedTag) | Barcode(String)               │     │
//! │  │  The single item type of the unified scan stream.             │     │
//! │  └───────────────────────────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Scanned tags are ephemeral: created per hardware callback, consumed by the
//! session controller, never persisted.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::CoreError;

// =============================================================================
// Scan Channel
// =============================================================================

/// Hardware input channel a scan session listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanChannel {
    /// Continuous-inventory RF tag reader.
    Rfid,
    /// Keyboard-wedge barcode reader.
    Barcode,
}

impl std::fmt::Display for ScanChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanChannel::Rfid => write!(f, "rfid"),
            ScanChannel::Barcode => write!(f, "barcode"),
        }
    }
}

impl std::str::FromStr for ScanChannel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rfid" | "uhf" => Ok(ScanChannel::Rfid),
            "barcode" | "qr" => Ok(ScanChannel::Barcode),
            other => Err(CoreError::UnknownScanChannel(other.to_string())),
        }
    }
}

// =============================================================================
// Scan Mode
// =============================================================================

/// How long a scan session lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Stop after the first result (or after the first RFID round).
    #[default]
    Single,
    /// Keep scanning until explicitly stopped; each identifier once.
    Continuous,
}

impl ScanMode {
    /// Returns true if a session in this mode ends by itself.
    pub fn is_single_shot(&self) -> bool {
        matches!(self, ScanMode::Single)
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Single => write!(f, "single"),
            ScanMode::Continuous => write!(f, "continuous"),
        }
    }
}

impl std::str::FromStr for ScanMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" | "single_shot" | "once" => Ok(ScanMode::Single),
            "continuous" | "loop" => Ok(ScanMode::Continuous),
            other => Err(CoreError::UnknownScanMode(other.to_string())),
        }
    }
}

// =============================================================================
// Scanned Tag
// =============================================================================

/// A tag detection that survived deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedTag {
    /// Normalized identifier (upper-case hex, no whitespace).
    pub id: String,

    /// Received signal strength as reported by the reader.
    pub rssi: i32,

    /// Monotonic detection time.
    pub detected_at: Instant,
}

impl ScannedTag {
    /// Normalizes a raw tag identifier for comparison and display.
    ///
    /// Readers are inconsistent about casing and sometimes pad or group the
    /// EPC with spaces; all of that is folded away here. Returns `None` when
    /// nothing is left.
    pub fn normalize_id(raw: &str) -> Option<String> {
        let id: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}

// =============================================================================
// Scan Event
// =============================================================================

/// A single result on the unified scan stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A deduplicated RFID tag.
    Tag(ScannedTag),
    /// A completed barcode string.
    Barcode(String),
}

impl ScanEvent {
    /// Returns the channel this event originated from.
    pub fn origin(&self) -> ScanChannel {
        match self {
            ScanEvent::Tag(_) => ScanChannel::Rfid,
            ScanEvent::Barcode(_) => ScanChannel::Barcode,
        }
    }

    /// Returns the scanned identifier or barcode content.
    pub fn content(&self) -> &str {
        match self {
            ScanEvent::Tag(tag) => &tag.id,
            ScanEvent::Barcode(code) => code,
        }
    }
}
