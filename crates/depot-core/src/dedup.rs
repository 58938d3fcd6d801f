//! # Tag Deduplicator
//!
//! Filters raw tag-detected callbacks down to the events a scan session
//! should publish.
//!
//! ## Policy by Mode
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Deduplication Policy                              │
//! │                                                                         │
//! │  SINGLE                                                                │
//! │  ──────                                                                │
//! │  detections:  T1  T1  T2  │ round end                                  │
//! │  emitted:     T1   -   -  │ → session complete                         │
//! │                                                                         │
//! │  CONTINUOUS                                                            │
//! │  ──────────                                                            │
//! │  detections:  T1  T2  T1  T2  T3  │ round end │ T4 ...                 │
//! │  emitted:     T1  T2   -   -  T3  │ continue  │ T4                     │
//! │                                                                         │
//! │  Identifiers are normalized (upper-case, no whitespace) BEFORE the     │
//! │  seen-set lookup, so "e2ab" and "E2AB" are the same tag.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One deduplicator belongs to exactly one session generation; starting a new
//! session creates (or resets) it, which clears the seen-set.

use std::collections::HashSet;
use std::time::Instant;

use crate::types::{ScanMode, ScannedTag};

/// What the session should do when an inventory round ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Keep the session running.
    Continue,
    /// The session is finished (single-shot mode).
    Complete,
}

/// Mode-aware filter over tag detections.
#[derive(Debug, Clone)]
pub struct TagDeduplicator {
    mode: ScanMode,
    seen: HashSet<String>,
}

impl TagDeduplicator {
    /// Creates a deduplicator with an empty seen-set.
    pub fn new(mode: ScanMode) -> Self {
        TagDeduplicator {
            mode,
            seen: HashSet::new(),
        }
    }

    /// Returns the session mode.
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Number of distinct identifiers seen in this session.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Processes one detection, returning the tag if it should be published.
    pub fn on_tag_detected(&mut self, raw_id: &str, rssi: i32, at: Instant) -> Option<ScannedTag> {
        let id = ScannedTag::normalize_id(raw_id)?;

        if self.mode.is_single_shot() && !self.seen.is_empty() {
            return None;
        }

        if !self.seen.insert(id.clone()) {
            return None;
        }

        Some(ScannedTag {
            id,
            rssi,
            detected_at: at,
        })
    }

    /// Processes the end of one inventory round.
    pub fn on_inventory_round_ended(&self) -> RoundOutcome {
        match self.mode {
            ScanMode::Single => RoundOutcome::Complete,
            ScanMode::Continuous => RoundOutcome::Continue,
        }
    }

    /// Clears the seen-set for a new session in the given mode.
    pub fn reset(&mut self, mode: ScanMode) {
        self.mode = mode;
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(dedup: &mut TagDeduplicator, ids: &[&str]) -> Vec<String> {
        let now = Instant::now();
        ids.iter()
            .filter_map(|id| dedup.on_tag_detected(id, -60, now))
            .map(|tag| tag.id)
            .collect()
    }

    #[test]
    fn test_single_shot_emits_first_tag_only() {
        let mut dedup = TagDeduplicator::new(ScanMode::Single);
        assert_eq!(feed(&mut dedup, &["T1", "T1", "T2"]), vec!["T1"]);
        assert_eq!(dedup.on_inventory_round_ended(), RoundOutcome::Complete);
    }

    #[test]
    fn test_single_shot_round_end_without_tags_completes() {
        let dedup = TagDeduplicator::new(ScanMode::Single);
        assert_eq!(dedup.on_inventory_round_ended(), RoundOutcome::Complete);
    }

    #[test]
    fn test_continuous_emits_each_identifier_once_in_first_seen_order() {
        let mut dedup = TagDeduplicator::new(ScanMode::Continuous);
        assert_eq!(
            feed(&mut dedup, &["T1", "T2", "T1", "T2", "T3"]),
            vec!["T1", "T2", "T3"]
        );
        assert_eq!(dedup.on_inventory_round_ended(), RoundOutcome::Continue);

        // Later rounds still suppress what earlier rounds saw.
        assert_eq!(feed(&mut dedup, &["T3", "T4"]), vec!["T4"]);
        assert_eq!(dedup.seen_count(), 4);
    }

    #[test]
    fn test_casing_does_not_defeat_dedup() {
        let mut dedup = TagDeduplicator::new(ScanMode::Continuous);
        assert_eq!(feed(&mut dedup, &["e2ab", "E2AB", " e2 ab "]), vec!["E2AB"]);
    }

    #[test]
    fn test_blank_identifier_is_dropped() {
        let mut dedup = TagDeduplicator::new(ScanMode::Single);
        assert!(feed(&mut dedup, &["  "]).is_empty());
        // A blank read does not use up the single shot.
        assert_eq!(feed(&mut dedup, &["T9"]), vec!["T9"]);
    }

    #[test]
    fn test_reset_clears_seen_set() {
        let mut dedup = TagDeduplicator::new(ScanMode::Continuous);
        feed(&mut dedup, &["T1"]);
        dedup.reset(ScanMode::Single);
        assert_eq!(dedup.mode(), ScanMode::Single);
        assert_eq!(feed(&mut dedup, &["T1", "T2"]), vec!["T1"]);
    }

    #[test]
    fn test_keeps_rssi_and_timestamp() {
        let mut dedup = TagDeduplicator::new(ScanMode::Single);
        let at = Instant::now();
        let tag = dedup.on_tag_detected("abc", -41, at).unwrap();
        assert_eq!(tag.rssi, -41);
        assert_eq!(tag.detected_at, at);
    }
}
