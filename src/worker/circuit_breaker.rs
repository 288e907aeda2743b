//! Per-worker counters and circuit breaker (§4.7, §3 `WorkerState`): tracks
//! successful/failed transaction counts and trips after too many
//! consecutive failures, stopping the worker rather than hammering a dead
//! connection. Shared (via `Arc`) across every sub-task a single worker
//! spawns, so the consecutive-failure streak and trip decision are
//! worker-wide, not per-sub-task.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Consecutive failures before a worker's circuit breaker trips.
pub const FAILURE_THRESHOLD: u32 = 10;

/// Tracks a worker's success/failure counts and consecutive-failure streak.
#[derive(Default)]
pub struct WorkerCounters {
    successful: AtomicU64,
    failed: AtomicU64,
    consecutive_failures: AtomicU32,
    tripped: AtomicBool,
}

impl WorkerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful transaction, resetting the failure streak.
    pub fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a failed transaction. Returns `true` if this failure trips
    /// the breaker (reached [`FAILURE_THRESHOLD`]).
    pub fn record_failure(&self) -> bool {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= FAILURE_THRESHOLD {
            self.tripped.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Whether this worker's breaker has already tripped — checked by
    /// sibling sub-tasks (a stress worker's concurrent senders) so every
    /// one of them stops, not just the one that observed the 10th failure.
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }

    pub fn successful(&self) -> u64 {
        self.successful.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_at_threshold() {
        let counters = WorkerCounters::new();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            assert!(!counters.record_failure());
        }
        assert!(counters.record_failure());
        assert!(counters.is_tripped());
    }

    #[test]
    fn success_resets_the_streak() {
        let counters = WorkerCounters::new();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            counters.record_failure();
        }
        counters.record_success();
        assert_eq!(counters.consecutive_failures(), 0);
        assert!(!counters.record_failure());
        assert!(!counters.is_tripped());
    }

    #[test]
    fn tracks_totals() {
        let counters = WorkerCounters::new();
        counters.record_success();
        counters.record_success();
        counters.record_failure();
        assert_eq!(counters.successful(), 2);
        assert_eq!(counters.failed(), 1);
    }
}
