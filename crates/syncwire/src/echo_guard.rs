//! Per-record, per-event-kind echo suppression counters.
//!
//! When a locked write succeeds, the server will also push a notification
//! describing that same write. The guard remembers how many such echoes are
//! still owed for each (kind, record) so the dispatcher can drop them instead
//! of applying the change twice.
//!
//! # Matching
//!
//! Entries are keyed by (kind, identity), not by request. Two overlapping
//! writes to the same record of the same kind owe two echoes: the Nth armed
//! write is matched by the Nth matching push event, whichever physical
//! request it came from. This holds under FIFO per-connection delivery; a
//! transport that reorders same-kind events for one record can misattribute
//! an echo.

use std::collections::HashMap;

use syncwire_types::{EventKind, RecordIdentity};

/// Pending echo counts, `kind -> identity key -> count`.
///
/// A count is the number of not-yet-observed echoes for that (kind, record).
/// Counts never go below zero and zero entries are removed, not retained.
#[derive(Debug, Default, Clone)]
pub struct EchoGuard {
    pending: HashMap<EventKind, HashMap<String, u32>>,
}

impl EchoGuard {
    /// A guard that expects no echo yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expects one more echo of `kind` for `identity`.
    ///
    /// Returns the pending count after the increment.
    pub fn record_expected_echo(&mut self, kind: EventKind, identity: &RecordIdentity) -> u32 {
        let count = self
            .pending
            .entry(kind)
            .or_default()
            .entry(identity.key())
            .or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Returns true if an incoming `kind` event for `identity` is an expected
    /// echo. With `consume`, one pending echo is used up.
    ///
    /// Without `consume` the guard is left untouched, so repeated checks never
    /// change later outcomes.
    pub fn should_discard(
        &mut self,
        kind: EventKind,
        identity: &RecordIdentity,
        consume: bool,
    ) -> bool {
        let Some(table) = self.pending.get_mut(&kind) else {
            return false;
        };
        let key = identity.key();
        let Some(count) = table.get_mut(&key) else {
            return false;
        };
        debug_assert!(*count > 0, "zero counts are never retained");

        if consume {
            *count -= 1;
            if *count == 0 {
                table.remove(&key);
                if table.is_empty() {
                    self.pending.remove(&kind);
                }
            }
        }
        true
    }

    /// Pending echo count for (kind, identity).
    pub fn pending(&self, kind: EventKind, identity: &RecordIdentity) -> u32 {
        self.pending
            .get(&kind)
            .and_then(|table| table.get(&identity.key()))
            .copied()
            .unwrap_or(0)
    }

    /// Total pending echoes across every kind and record.
    pub fn total_pending(&self) -> u64 {
        self.pending
            .values()
            .flat_map(HashMap::values)
            .map(|&c| u64::from(c))
            .sum()
    }

    /// Returns true when no echo is owed.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forgets every pending echo.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    #[cfg(test)]
    fn has_zero_entries(&self) -> bool {
        self.pending
            .values()
            .any(|table| table.is_empty() || table.values().any(|&c| c == 0))
    }
}
