//! # Keystroke Framer
//!
//! Turns raw key events from a keyboard-wedge barcode reader into complete
//! barcode strings.
//!
//! ## Framing Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Keystroke Framing                                │
//! │                                                                         │
//! │  time ──►   B    K    -    0    0    1   ⏎         7   ⏎              │
//! │             │<10ms>│    ...          │    │  >100ms  │   │              │
//! │             └──────── one frame ─────┘    │          │   │              │
//! │                                           ▼          │   ▼              │
//! │                                   emit "BK-001"      │  emit "7"        │
//! │                                                      │                  │
//! │                                      gap > timeout: buffer reset first  │
//! │                                                                         │
//! │  • key-up events never change the frame                                │
//! │  • ⏎ with an empty buffer is a silent no-op                            │
//! │  • unmapped keys are NOT consumed, so the caller can route them        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Key codes follow the Android `KeyEvent` numbering that keyboard-wedge
//! scanners on handheld terminals emit.

use std::time::{Duration, Instant};

use crate::DEFAULT_FRAME_TIMEOUT_MS;

// =============================================================================
// Key Codes
// =============================================================================

/// Raw key codes understood by the framer.
pub mod keycodes {
    pub const DIGIT_0: u32 = 7;
    pub const DIGIT_1: u32 = 8;
    pub const DIGIT_2: u32 = 9;
    pub const DIGIT_3: u32 = 10;
    pub const DIGIT_4: u32 = 11;
    pub const DIGIT_5: u32 = 12;
    pub const DIGIT_6: u32 = 13;
    pub const DIGIT_7: u32 = 14;
    pub const DIGIT_8: u32 = 15;
    pub const DIGIT_9: u32 = 16;
    pub const LETTER_A: u32 = 29;
    pub const LETTER_Z: u32 = 54;
    pub const PERIOD: u32 = 56;
    pub const SPACE: u32 = 62;
    pub const ENTER: u32 = 66;
    pub const MINUS: u32 = 69;
    pub const NUMPAD_0: u32 = 144;
    pub const NUMPAD_9: u32 = 153;
    pub const NUMPAD_SUBTRACT: u32 = 156;
    pub const NUMPAD_DOT: u32 = 158;
    pub const NUMPAD_ENTER: u32 = 160;
    pub const SHIFT_LEFT: u32 = 59;

    /// Returns the key code for an ASCII letter or digit.
    ///
    /// Handy for simulating a scanner in tests.
    pub fn for_char(c: char) -> Option<u32> {
        match c {
            '0'..='9' => Some(DIGIT_0 + (c as u32 - '0' as u32)),
            'a'..='z' => Some(LETTER_A + (c as u32 - 'a' as u32)),
            'A'..='Z' => Some(LETTER_A + (c as u32 - 'A' as u32)),
            '.' => Some(PERIOD),
            ' ' => Some(SPACE),
            '-' => Some(MINUS),
            _ => None,
        }
    }
}

/// What a mapped key does to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MappedKey {
    Char(char),
    Terminator,
}

fn map_key(code: u32) -> Option<MappedKey> {
    use keycodes::*;

    let key = match code {
        DIGIT_0..=DIGIT_9 => MappedKey::Char(digit(code - DIGIT_0)),
        NUMPAD_0..=NUMPAD_9 => MappedKey::Char(digit(code - NUMPAD_0)),
        LETTER_A..=LETTER_Z => MappedKey::Char((b'A' + (code - LETTER_A) as u8) as char),
        PERIOD | NUMPAD_DOT => MappedKey::Char('.'),
        MINUS | NUMPAD_SUBTRACT => MappedKey::Char('-'),
        SPACE => MappedKey::Char(' '),
        ENTER | NUMPAD_ENTER => MappedKey::Terminator,
        _ => return None,
    };
    Some(key)
}

fn digit(offset: u32) -> char {
    (b'0' + offset as u8) as char
}

/// Returns true if `code` belongs to the scanner alphabet (characters or
/// terminator).
///
/// Hardware bridges use this to decide synchronously whether to swallow a
/// key before handing it to the session controller.
pub fn is_scanner_key(code: u32) -> bool {
    map_key(code).is_some()
}

// =============================================================================
// Key Outcome
// =============================================================================

/// Result of feeding one key event to the framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The key is not part of the scanner alphabet; route it elsewhere.
    NotConsumed,
    /// The key was swallowed by the framer.
    Consumed,
    /// A terminator completed a non-empty frame.
    Completed(String),
}

impl KeyOutcome {
    /// Returns true if the framer took ownership of the key.
    pub fn is_consumed(&self) -> bool {
        !matches!(self, KeyOutcome::NotConsumed)
    }

    /// Returns the completed barcode, if any.
    pub fn barcode(&self) -> Option<&str> {
        match self {
            KeyOutcome::Completed(code) => Some(code),
            _ => None,
        }
    }
}

// =============================================================================
// Keystroke Framer
// =============================================================================

/// Accumulates key-downs into barcode frames using an inter-key timeout.
#[derive(Debug, Clone)]
pub struct KeystrokeFramer {
    timeout: Duration,
    buffer: String,
    last_key_at: Option<Instant>,
}

impl Default for KeystrokeFramer {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_FRAME_TIMEOUT_MS))
    }
}

impl KeystrokeFramer {
    /// Creates a framer with the given inter-key timeout.
    pub fn new(timeout: Duration) -> Self {
        KeystrokeFramer {
            timeout,
            buffer: String::new(),
            last_key_at: None,
        }
    }

    /// Returns the configured framing timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the characters accumulated in the current frame.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Processes one raw key event.
    ///
    /// A key-down that arrives more than `timeout` after the previous mapped
    /// key-down starts a new frame. The terminator obeys the same rule, so a
    /// stale partial frame is never emitted.
    pub fn handle_key(&mut self, code: u32, is_key_down: bool, at: Instant) -> KeyOutcome {
        let Some(key) = map_key(code) else {
            return KeyOutcome::NotConsumed;
        };

        if !is_key_down {
            return KeyOutcome::Consumed;
        }

        if let Some(last) = self.last_key_at {
            if at.saturating_duration_since(last) > self.timeout && !self.buffer.is_empty() {
                self.buffer.clear();
            }
        }
        self.last_key_at = Some(at);

        match key {
            MappedKey::Char(c) => {
                self.buffer.push(c);
                KeyOutcome::Consumed
            }
            MappedKey::Terminator if self.buffer.is_empty() => KeyOutcome::Consumed,
            MappedKey::Terminator => KeyOutcome::Completed(std::mem::take(&mut self.buffer)),
        }
    }

    /// Discards any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_key_at = None;
    }
}
