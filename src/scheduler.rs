//! Timers for the single-threaded event loop.
//!
//! At most one timer per [`TimerKind`] is pending. Scheduling a kind again
//! either replaces the pending deadline (debounce) or keeps it
//! ([`Scheduler::schedule_if_idle`]). Time is passed in by the caller so the
//! host loop, and tests, own the clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Render queued preview pixels.
    PreviewFrame,
    /// Resolve the composite cache after edits.
    Redraw,
}

/// Identifies one scheduled deadline. A replaced timer's handle goes stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerHandle {
    pub kind: TimerKind,
    id: u64,
}

#[derive(Default)]
pub struct Scheduler {
    next_id: u64,
    pending: HashMap<TimerKind, (u64, Instant)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `kind` at `now + delay`, cancelling any pending timer of the
    /// same kind.
    pub fn schedule(&mut self, kind: TimerKind, now: Instant, delay: Duration) -> TimerHandle {
        self.next_id += 1;
        self.pending.insert(kind, (self.next_id, now + delay));
        TimerHandle { kind, id: self.next_id }
    }

    /// Schedule `kind` only when none is pending.
    pub fn schedule_if_idle(&mut self, kind: TimerKind, now: Instant, delay: Duration) -> Option<TimerHandle> {
        if self.pending.contains_key(&kind) {
            return None;
        }
        Some(self.schedule(kind, now, delay))
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.pending.remove(&kind).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.pending.contains_key(&kind)
    }

    /// Whether `handle` is still the live timer for its kind.
    pub fn is_current(&self, handle: TimerHandle) -> bool {
        self.pending
            .get(&handle.kind)
            .is_some_and(|&(id, _)| id == handle.id)
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.pending.get(&kind).map(|&(_, at)| at)
    }

    /// Earliest pending deadline, for the host loop's sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|&(_, at)| at).min()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<(Instant, TimerKind)> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| *at <= now)
            .map(|(&kind, &(_, at))| (at, kind))
            .collect();
        due.sort_by_key(|&(at, _)| at);
        for (_, kind) in &due {
            self.pending.remove(kind);
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }
}
