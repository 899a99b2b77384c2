//! One-shot timer service for scenario runs
//!
//! Holds the delayed callables a run schedules (including the reserved
//! hard-timeout entry) and hands the dispatch loop the next due timer.
//! Timers with equal deadlines fire in registration order. Cancellation is
//! lazy: cancelled entries are skipped when the loop asks for due work.

use crate::error::{HarnessError, HarnessResult};
use crate::scenario::TimerCallback;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Handle identifying one scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// What kind of timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// The single per-run deadline that forces termination
    HardTimeout,
    /// An ordinary scheduled action
    Scheduled,
}

/// A timer popped from the service, ready to dispatch
pub(crate) struct DueTimer {
    pub kind: TimerKind,
    pub label: String,
    /// None for the hard timeout, which has no user callback
    pub callback: Option<TimerCallback>,
}

struct TimerEntry {
    handle: TimerHandle,
    deadline: Instant,
    seq: u64,
    kind: TimerKind,
    label: String,
    callback: Option<TimerCallback>,
}

// Min-heap on (deadline, seq): BinaryHeap is a max-heap, so invert
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

/// Scheduler for one-shot delayed callables within a single run
pub struct TimerService {
    pending: BinaryHeap<TimerEntry>,
    cancelled: HashSet<TimerHandle>,
    next_seq: u64,
    hard_timeout_armed: bool,
}

impl TimerService {
    pub(crate) fn new() -> Self {
        Self {
            pending: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_seq: 0,
            hard_timeout_armed: false,
        }
    }

    /// Schedule a one-shot callable `delay` from now
    pub fn after(&mut self, delay: Duration, label: &str, callback: TimerCallback) -> TimerHandle {
        let handle = self.push(delay, TimerKind::Scheduled, label, Some(callback));
        debug!("timer scheduled: {} in {:?} ({:?})", label, delay, handle);
        handle
    }

    /// Cancel a scheduled timer
    ///
    /// Cancelling an unknown handle, or one that already fired, is a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) {
        self.cancelled.insert(handle);
    }

    /// Arm the per-run hard deadline
    ///
    /// The orchestrator arms this before anything else runs; at most one
    /// hard timeout exists per run.
    pub(crate) fn arm_hard_timeout(&mut self, duration: Duration) -> HarnessResult<()> {
        if self.hard_timeout_armed {
            return Err(HarnessError::InvalidState(
                "hard timeout already armed for this run".to_string(),
            ));
        }
        self.hard_timeout_armed = true;
        self.push(duration, TimerKind::HardTimeout, "hard timeout", None);
        debug!("hard timeout armed: {:?}", duration);
        Ok(())
    }

    /// Earliest deadline among live timers, if any
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        self.drop_cancelled_top();
        self.pending.peek().map(|e| e.deadline)
    }

    /// Pop the next timer whose deadline has passed
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<DueTimer> {
        self.drop_cancelled_top();
        if self.pending.peek().map(|e| e.deadline <= now).unwrap_or(false) {
            let entry = self.pending.pop().unwrap();
            return Some(DueTimer {
                kind: entry.kind,
                label: entry.label,
                callback: entry.callback,
            });
        }
        None
    }

    /// Drop every outstanding timer
    pub(crate) fn clear(&mut self) {
        self.pending.clear();
        self.cancelled.clear();
    }

    /// Number of live (not cancelled) timers still pending
    pub fn outstanding(&self) -> usize {
        self.pending
            .iter()
            .filter(|e| !self.cancelled.contains(&e.handle))
            .count()
    }

    fn push(
        &mut self,
        delay: Duration,
        kind: TimerKind,
        label: &str,
        callback: Option<TimerCallback>,
    ) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        let handle = TimerHandle(seq);
        self.pending.push(TimerEntry {
            handle,
            deadline: Instant::now() + delay,
            seq,
            kind,
            label: label.to_string(),
            callback,
        });
        handle
    }

    fn drop_cancelled_top(&mut self) {
        while let Some(top) = self.pending.peek() {
            if self.cancelled.contains(&top.handle) {
                let entry = self.pending.pop().unwrap();
                debug!("timer dropped (cancelled): {}", entry.label);
            } else {
                break;
            }
        }
    }
}
