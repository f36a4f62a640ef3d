// SPDX-License-Identifier: MIT
//
// Outstanding terminal queries.
//
// When we ask the terminal something (cursor position, version), the
// answer arrives on the same byte stream as the user's typing. Some
// answers are structurally identical to keys: a cursor position report
// `CSI 12 ; 5 R` looks exactly like Ctrl+F3 (`CSI 1 ; 5 R`) with a
// different first parameter. The table records which terminators we are
// still waiting on, so the decoder can route a matching sequence to the
// caller as a device response instead of a key.
//
// This is best-effort. If the user presses Ctrl+F3 while a position query
// is in flight, the key is taken as the answer. Nothing at the protocol
// level can tell the two apart.
//
// A terminal that does not understand a query never answers it. Each entry
// carries a deadline and the session drops overdue entries before decoding,
// so a silent terminal does not leave `ESC P` or `CSI 1 ; 5 R` claimed
// for the rest of the session.
//
// Entries are keyed by terminator string:
//
//   CSI answers   the final byte, e.g. "R" or "c"
//   DCS answers   [`DCS`], the `ESC P` introducer
//   OSC answers   [`OSC`], the `ESC ]` introducer

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// Key for outstanding DCS answers (XTVERSION and friends).
pub const DCS: &str = "\x1bP";
/// Key for outstanding OSC answers.
pub const OSC: &str = "\x1b]";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Entry {
    /// Queries ever sent with this terminator.
    requested: u32,
    /// Deadlines of the queries not yet answered, oldest first.
    waiting: VecDeque<Instant>,
}

/// Registry of queries awaiting an answer.
#[derive(Debug, Clone, Default)]
pub struct PendingRequestTable {
    entries: HashMap<String, Entry>,
}

impl PendingRequestTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a query expecting `terminator` was sent. The query is
    /// given up on at `deadline` (see [`expire`](Self::expire)).
    pub fn register(&mut self, terminator: &str, deadline: Instant) {
        let entry = self.entries.entry(terminator.to_owned()).or_default();
        entry.requested = entry.requested.saturating_add(1);
        entry.waiting.push_back(deadline);
    }

    /// Take back the most recent registration for `terminator`, for a
    /// query that never reached the terminal. Returns `false` when nothing
    /// was waiting.
    pub fn unregister(&mut self, terminator: &str) -> bool {
        self.entries
            .get_mut(terminator)
            .and_then(|entry| entry.waiting.pop_back())
            .is_some()
    }

    /// Whether at least one answer with `terminator` is still expected.
    #[must_use]
    pub fn is_pending(&self, terminator: &str) -> bool {
        self.outstanding(terminator) > 0
    }

    /// Claim the oldest outstanding answer. Returns `false` (and changes
    /// nothing) when none is expected.
    pub fn try_consume(&mut self, terminator: &str) -> bool {
        self.entries
            .get_mut(terminator)
            .and_then(|entry| entry.waiting.pop_front())
            .is_some()
    }

    /// Give up on every query whose deadline is at or before `now`.
    /// Returns how many were dropped.
    pub fn expire(&mut self, now: Instant) -> usize {
        let mut dropped = 0;
        for entry in self.entries.values_mut() {
            let before = entry.waiting.len();
            entry.waiting.retain(|deadline| *deadline > now);
            dropped += before - entry.waiting.len();
        }
        dropped
    }

    #[must_use]
    pub fn outstanding(&self, terminator: &str) -> usize {
        self.entries.get(terminator).map_or(0, |e| e.waiting.len())
    }

    #[must_use]
    pub fn requested(&self, terminator: &str) -> u32 {
        self.entries.get(terminator).map_or(0, |e| e.requested)
    }

    /// Total answers still expected across all terminators.
    #[must_use]
    pub fn total_outstanding(&self) -> usize {
        self.entries.values().map(|e| e.waiting.len()).sum()
    }
}
