//! Ramp-up stress/load worker (§4.7): `num_workers` concurrent senders ramp
//! from 1 tps to `target_tps` over `ramp_duration` in 100 steps, then hold
//! at `target_tps` for `sustain_duration`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use super::circuit_breaker::WorkerCounters;
use super::{run_one_transaction, StressProgress};
use crate::conn::ConnectionManager;
use crate::counters::Counters;
use crate::metrics::{NetworkingStats, TransactionStats};
use crate::spec::MessageSpec;
use crate::template::TransactionSet;

const RAMP_STEPS: u32 = 100;

/// One ramp-up or sustain phase: a target rate held for `duration`, with
/// `report_progress` telling the worker with `worker_index == 0` whether
/// (and as what ramp percentage) to publish [`StressProgress`].
struct Phase {
    current_tps: f64,
    duration: Duration,
    ramp_up_progress: Option<u32>,
}

/// Run `num_workers` concurrent ramp-up senders until cancelled, the whole
/// schedule (ramp + sustain) completes, or a sender's circuit breaker trips.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    id: String,
    conn: Arc<ConnectionManager>,
    templates: Arc<TransactionSet>,
    spec: Arc<MessageSpec>,
    counters: Arc<Counters>,
    transaction_name: String,
    target_tps: u32,
    num_workers: u32,
    ramp_duration: Duration,
    sustain_duration: Duration,
    tx_stats: Arc<TransactionStats>,
    net_stats: Arc<NetworkingStats>,
    worker_counters: Arc<WorkerCounters>,
    cancel: Arc<AtomicBool>,
    progress: Arc<StressProgress>,
) {
    let num_workers = num_workers.max(1);
    let target_tps = target_tps.max(1);
    let step_duration = ramp_duration / RAMP_STEPS.max(1);

    let mut phases: Vec<Phase> = (0..=RAMP_STEPS)
        .map(|step| Phase {
            current_tps: 1.0 + (target_tps as f64 - 1.0) * step as f64 / RAMP_STEPS as f64,
            duration: step_duration,
            ramp_up_progress: Some(step),
        })
        .collect();
    if !sustain_duration.is_zero() {
        phases.push(Phase {
            current_tps: target_tps as f64,
            duration: sustain_duration,
            ramp_up_progress: None,
        });
    }
    let phases = Arc::new(phases);

    let mut handles = Vec::with_capacity(num_workers as usize);
    for worker_index in 0..num_workers {
        let id = format!("{id}#{worker_index}");
        let conn = Arc::clone(&conn);
        let templates = Arc::clone(&templates);
        let spec = Arc::clone(&spec);
        let counters = Arc::clone(&counters);
        let transaction_name = transaction_name.clone();
        let tx_stats = Arc::clone(&tx_stats);
        let net_stats = Arc::clone(&net_stats);
        let cancel = Arc::clone(&cancel);
        let progress = Arc::clone(&progress);
        let phases = Arc::clone(&phases);
        let worker_counters = Arc::clone(&worker_counters);

        handles.push(tokio::spawn(async move {
            let phase_successes = Arc::clone(&progress.phase_successes);

            for phase in phases.iter() {
                if cancel.load(Ordering::Relaxed) || worker_counters.is_tripped() {
                    return;
                }

                let send_interval = Duration::from_secs_f64(1.0 / phase.current_tps / num_workers as f64).max(Duration::from_millis(1));
                let phase_start = Instant::now();
                let phase_end = phase_start + phase.duration;

                if worker_index == 0 {
                    phase_successes.store(0, Ordering::Relaxed);
                    progress.publish(phase.current_tps, phase.ramp_up_progress);
                }

                while Instant::now() < phase_end {
                    if cancel.load(Ordering::Relaxed) || worker_counters.is_tripped() {
                        return;
                    }

                    match run_one_transaction(&conn, &templates, &spec, &counters, &transaction_name).await {
                        Ok((latency, response_code)) => {
                            tx_stats.record(latency, &response_code);
                            worker_counters.record_success();
                            phase_successes.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!(worker = %id, error = %e, "stress worker transaction failed");
                            if worker_counters.record_failure() {
                                net_stats.record_circuit_breaker_trip();
                                error!(worker = %id, "circuit breaker open; stopping worker");
                                return;
                            }
                        }
                    }

                    tokio::time::sleep(send_interval).await;
                }

                if worker_index == 0 {
                    let successes = phase_successes.load(Ordering::Relaxed);
                    let elapsed = phase_start.elapsed().as_secs_f64().max(f64::EPSILON);
                    progress.record_actual_tps(successes as f64 / elapsed);
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}
