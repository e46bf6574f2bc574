//! Firing counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a pending work item was executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireReason {
    /// The delay elapsed with no further submissions
    Quiet,
    /// `max_calls` submissions landed in the window
    CallLimit,
    /// `max_wait` elapsed since the window started
    WaitLimit,
    /// The caller forced execution with [`crate::Debouncer::flush`]
    Flush,
}

impl fmt::Display for FireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FireReason::Quiet => "quiet period",
            FireReason::CallLimit => "call limit",
            FireReason::WaitLimit => "wait limit",
            FireReason::Flush => "flush",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of a debouncer's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebounceStats {
    /// Accepted submissions
    pub submitted: u64,
    /// Work items actually executed (sum of the `fired_*` counters)
    pub executed: u64,
    pub fired_quiet: u64,
    pub fired_call_limit: u64,
    pub fired_wait_limit: u64,
    pub fired_flush: u64,
    /// Pending work replaced by a newer submission
    pub superseded: u64,
    /// Pending work dropped by `cancel`/`shutdown`
    pub cancelled: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    submitted: AtomicU64,
    fired_quiet: AtomicU64,
    fired_call_limit: AtomicU64,
    fired_wait_limit: AtomicU64,
    fired_flush: AtomicU64,
    superseded: AtomicU64,
    cancelled: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_submit(&self, superseded: bool) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if superseded {
            self.superseded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_fire(&self, reason: FireReason) {
        let counter = match reason {
            FireReason::Quiet => &self.fired_quiet,
            FireReason::CallLimit => &self.fired_call_limit,
            FireReason::WaitLimit => &self.fired_wait_limit,
            FireReason::Flush => &self.fired_flush,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DebounceStats {
        let fired_quiet = self.fired_quiet.load(Ordering::Relaxed);
        let fired_call_limit = self.fired_call_limit.load(Ordering::Relaxed);
        let fired_wait_limit = self.fired_wait_limit.load(Ordering::Relaxed);
        let fired_flush = self.fired_flush.load(Ordering::Relaxed);

        DebounceStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            executed: fired_quiet + fired_call_limit + fired_wait_limit + fired_flush,
            fired_quiet,
            fired_call_limit,
            fired_wait_limit,
            fired_flush,
            superseded: self.superseded.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}
