//! Connection-lifecycle counters (§4.8): reconnects, backoff, circuit
//! breaker trips, health checks, and error classification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide counters for one [`ConnectionManager`](crate::conn::ConnectionManager).
#[derive(Default)]
pub struct NetworkingStats {
    reconnect_attempts: AtomicU64,
    reconnect_successes: AtomicU64,
    reconnect_failures: AtomicU64,
    backoff_triggers: AtomicU64,
    circuit_breaker_trips: AtomicU64,
    circuit_breaker_resets: AtomicU64,
    health_checks: AtomicU64,
    health_check_failures: AtomicU64,
    retriable_errors: AtomicU64,
    permanent_errors: AtomicU64,
    total_connect_ms: AtomicU64,
    total_backoff_ms: AtomicU64,
}

impl NetworkingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_success(&self, elapsed: Duration) {
        self.reconnect_successes.fetch_add(1, Ordering::Relaxed);
        self.total_connect_ms.fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_reconnect_failure(&self) {
        self.reconnect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backoff(&self, waited: Duration) {
        self.backoff_triggers.fetch_add(1, Ordering::Relaxed);
        self.total_backoff_ms.fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_circuit_breaker_trip(&self) {
        self.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_breaker_reset(&self) {
        self.circuit_breaker_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_health_check(&self, ok: bool) {
        self.health_checks.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.health_check_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Classify and count a connection-level error per [`Error::is_retriable`](crate::error::Error::is_retriable).
    pub fn record_error(&self, retriable: bool) {
        if retriable {
            self.retriable_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.permanent_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn reconnect_successes(&self) -> u64 {
        self.reconnect_successes.load(Ordering::Relaxed)
    }

    pub fn reconnect_failures(&self) -> u64 {
        self.reconnect_failures.load(Ordering::Relaxed)
    }

    pub fn backoff_triggers(&self) -> u64 {
        self.backoff_triggers.load(Ordering::Relaxed)
    }

    pub fn circuit_breaker_trips(&self) -> u64 {
        self.circuit_breaker_trips.load(Ordering::Relaxed)
    }

    pub fn circuit_breaker_resets(&self) -> u64 {
        self.circuit_breaker_resets.load(Ordering::Relaxed)
    }

    pub fn health_checks(&self) -> u64 {
        self.health_checks.load(Ordering::Relaxed)
    }

    pub fn health_check_failures(&self) -> u64 {
        self.health_check_failures.load(Ordering::Relaxed)
    }

    pub fn retriable_errors(&self) -> u64 {
        self.retriable_errors.load(Ordering::Relaxed)
    }

    pub fn permanent_errors(&self) -> u64 {
        self.permanent_errors.load(Ordering::Relaxed)
    }

    /// Mean reconnect time, in milliseconds. 0 if no reconnect has ever succeeded.
    pub fn mean_reconnect_ms(&self) -> f64 {
        let successes = self.reconnect_successes();
        if successes == 0 {
            0.0
        } else {
            self.total_connect_ms.load(Ordering::Relaxed) as f64 / successes as f64
        }
    }

    pub fn total_connect_duration(&self) -> Duration {
        Duration::from_millis(self.total_connect_ms.load(Ordering::Relaxed))
    }

    pub fn total_backoff_duration(&self) -> Duration {
        Duration::from_millis(self.total_backoff_ms.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_reconnects_and_backoff() {
        let stats = NetworkingStats::new();
        stats.record_reconnect_attempt();
        stats.record_reconnect_attempt();
        stats.record_reconnect_success(Duration::from_millis(50));
        stats.record_backoff(Duration::from_millis(1000));

        assert_eq!(stats.reconnect_attempts(), 2);
        assert_eq!(stats.reconnect_successes(), 1);
        assert_eq!(stats.backoff_triggers(), 1);
        assert_eq!(stats.total_connect_duration(), Duration::from_millis(50));
        assert_eq!(stats.total_backoff_duration(), Duration::from_millis(1000));
    }

    #[test]
    fn tracks_circuit_breaker_and_health_check_outcomes() {
        let stats = NetworkingStats::new();
        stats.record_circuit_breaker_trip();
        stats.record_circuit_breaker_reset();
        stats.record_health_check(true);
        stats.record_health_check(false);

        assert_eq!(stats.circuit_breaker_trips(), 1);
        assert_eq!(stats.circuit_breaker_resets(), 1);
        assert_eq!(stats.health_checks(), 2);
        assert_eq!(stats.health_check_failures(), 1);
    }

    #[test]
    fn classifies_errors_as_retriable_or_permanent() {
        let stats = NetworkingStats::new();
        stats.record_error(true);
        stats.record_error(false);
        stats.record_error(true);

        assert_eq!(stats.retriable_errors(), 2);
        assert_eq!(stats.permanent_errors(), 1);
    }
}
