//! Fixed-interval background worker (§4.7): on each tick, sends one named
//! transaction `count` times sequentially, stopping if its circuit breaker
//! trips. Cancellation is observed between shots and between ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use super::circuit_breaker::WorkerCounters;
use super::run_one_transaction;
use crate::conn::ConnectionManager;
use crate::counters::Counters;
use crate::metrics::{NetworkingStats, TransactionStats};
use crate::spec::MessageSpec;
use crate::template::TransactionSet;

/// Run the fixed-interval background worker loop until cancelled or its
/// circuit breaker trips.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    id: String,
    conn: Arc<ConnectionManager>,
    templates: Arc<TransactionSet>,
    spec: Arc<MessageSpec>,
    counters: Arc<Counters>,
    transaction_name: String,
    count: u32,
    interval: Duration,
    tx_stats: Arc<TransactionStats>,
    net_stats: Arc<NetworkingStats>,
    worker_counters: Arc<WorkerCounters>,
    cancel: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        if cancel.load(Ordering::Relaxed) {
            return;
        }

        for _ in 0..count.max(1) {
            if cancel.load(Ordering::Relaxed) {
                return;
            }

            match run_one_transaction(&conn, &templates, &spec, &counters, &transaction_name).await {
                Ok((latency, response_code)) => {
                    tx_stats.record(latency, &response_code);
                    worker_counters.record_success();
                }
                Err(e) => {
                    warn!(worker = %id, error = %e, "background worker transaction failed");
                    if worker_counters.record_failure() {
                        net_stats.record_circuit_breaker_trip();
                        error!(worker = %id, "circuit breaker open; stopping worker");
                        return;
                    }
                }
            }
        }
    }
}
