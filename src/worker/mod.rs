//! Worker engine (§4.7): two worker kinds — a fixed-interval background
//! worker and a ramp-up stress worker — each with a cancellation handle,
//! a circuit breaker, and a live stats snapshot, tracked in a single
//! worker map (§3 `WorkerState`).

mod background;
pub mod circuit_breaker;
mod stress;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::conn::ConnectionManager;
use crate::counters::Counters;
use crate::error::{Error, Result};
use crate::metrics::{NetworkingStats, TransactionStats};
use crate::spec::MessageSpec;
use crate::template::{self, TransactionSet};
use circuit_breaker::WorkerCounters;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Compose `transaction_name`, send it, and return the round-trip latency
/// plus the response code (field 39) to record — `"XX"` when a reply
/// arrived but didn't carry field 39.
pub(crate) async fn run_one_transaction(
    conn: &Arc<ConnectionManager>,
    templates: &TransactionSet,
    spec: &MessageSpec,
    counters: &Counters,
    transaction_name: &str,
) -> Result<(Duration, String)> {
    let msg = template::compose(templates, transaction_name, spec, counters)?;
    let started = Instant::now();
    let reply = conn.send(&msg).await?;
    let elapsed = started.elapsed();
    let response_code = reply.get_str(39).unwrap_or("XX").to_string();
    Ok((elapsed, response_code))
}

/// Shared ramp-up/sustain progress counters for one stress worker, read by
/// [`WorkerHandle::snapshot`] and written by the sub-tasks in
/// [`stress::run`].
#[derive(Default)]
pub struct StressProgress {
    current_tps_bits: AtomicU64,
    actual_tps_bits: AtomicU64,
    ramp_up_progress: AtomicU64, // percentage 0-100, or u64::MAX once ramp is complete
    phase_successes: Arc<AtomicU64>,
}

const RAMP_COMPLETE: u64 = u64::MAX;

impl StressProgress {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            ramp_up_progress: AtomicU64::new(0),
            ..Default::default()
        })
    }

    fn publish(&self, current_tps: f64, ramp_up_progress: Option<u32>) {
        self.current_tps_bits.store(current_tps.to_bits(), Ordering::Relaxed);
        self.ramp_up_progress
            .store(ramp_up_progress.map(u64::from).unwrap_or(RAMP_COMPLETE), Ordering::Relaxed);
    }

    fn record_actual_tps(&self, actual_tps: f64) {
        self.actual_tps_bits.store(actual_tps.to_bits(), Ordering::Relaxed);
    }

    pub fn current_tps(&self) -> f64 {
        f64::from_bits(self.current_tps_bits.load(Ordering::Relaxed))
    }

    pub fn actual_tps(&self) -> f64 {
        f64::from_bits(self.actual_tps_bits.load(Ordering::Relaxed))
    }

    /// Ramp-up completion percentage (0-100), or `None` once the ramp has
    /// finished and the worker is in its sustain phase.
    pub fn ramp_up_progress(&self) -> Option<u32> {
        match self.ramp_up_progress.load(Ordering::Relaxed) {
            RAMP_COMPLETE => None,
            pct => Some(pct as u32),
        }
    }
}

/// Stress-specific configuration, echoed back in [`WorkerSnapshot`].
#[derive(Debug, Clone)]
pub struct StressParams {
    pub target_tps: u32,
    pub ramp_up_duration: Duration,
    pub duration: Duration,
    pub num_workers: u32,
}

/// A point-in-time copy of one worker's counters (§3 `WorkerState`).
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub id: String,
    pub name: String,
    pub start_time: Instant,
    pub successful: u64,
    pub failed: u64,
    pub consecutive_failures: u32,
    pub stress: Option<StressSnapshot>,
}

/// The ramp-up/stress-only fields of a [`WorkerSnapshot`].
#[derive(Debug, Clone)]
pub struct StressSnapshot {
    pub target_tps: u32,
    pub ramp_up_duration: Duration,
    pub duration: Duration,
    pub num_workers: u32,
    pub current_tps: f64,
    pub actual_tps: f64,
    pub ramp_up_progress: Option<u32>,
}

struct WorkerHandle {
    name: String,
    start_time: Instant,
    cancel: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
    join: JoinHandle<()>,
    stress: Option<(StressParams, Arc<StressProgress>)>,
}

impl WorkerHandle {
    fn snapshot(&self, id: &str) -> WorkerSnapshot {
        WorkerSnapshot {
            id: id.to_string(),
            name: self.name.clone(),
            start_time: self.start_time,
            successful: self.counters.successful(),
            failed: self.counters.failed(),
            consecutive_failures: self.counters.consecutive_failures(),
            stress: self.stress.as_ref().map(|(params, progress)| StressSnapshot {
                target_tps: params.target_tps,
                ramp_up_duration: params.ramp_up_duration,
                duration: params.duration,
                num_workers: params.num_workers,
                current_tps: progress.current_tps(),
                actual_tps: progress.actual_tps(),
                ramp_up_progress: progress.ramp_up_progress(),
            }),
        }
    }
}

/// The live worker map (§4.7): background and stress workers, keyed by
/// their generated id, with cancel/stop/stats operations under one mutex.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl WorkerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `StartWorker(txName, count, interval) -> id` (§4.7).
    #[allow(clippy::too_many_arguments)]
    pub async fn start_background(
        self: &Arc<Self>,
        conn: Arc<ConnectionManager>,
        templates: Arc<TransactionSet>,
        spec: Arc<MessageSpec>,
        counters: Arc<Counters>,
        transaction_name: String,
        count: u32,
        interval: Duration,
        tx_stats: Arc<TransactionStats>,
        net_stats: Arc<NetworkingStats>,
    ) -> String {
        let id = generate_worker_id();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_counters = Arc::new(WorkerCounters::new());

        let join = tokio::spawn(background::run(
            id.clone(),
            conn,
            templates,
            spec,
            counters,
            transaction_name.clone(),
            count,
            interval,
            tx_stats,
            net_stats,
            Arc::clone(&worker_counters),
            Arc::clone(&cancel),
        ));

        let handle = WorkerHandle {
            name: transaction_name,
            start_time: Instant::now(),
            cancel,
            counters: worker_counters,
            join,
            stress: None,
        };
        self.workers.lock().await.insert(id.clone(), handle);
        id
    }

    /// `StartStressTestWorker(txName, targetTps, rampUpDuration, duration,
    /// numWorkers) -> id` (§4.7).
    #[allow(clippy::too_many_arguments)]
    pub async fn start_stress_test(
        self: &Arc<Self>,
        conn: Arc<ConnectionManager>,
        templates: Arc<TransactionSet>,
        spec: Arc<MessageSpec>,
        counters: Arc<Counters>,
        transaction_name: String,
        target_tps: u32,
        ramp_up_duration: Duration,
        duration: Duration,
        num_workers: u32,
        tx_stats: Arc<TransactionStats>,
        net_stats: Arc<NetworkingStats>,
    ) -> String {
        let id = generate_worker_id();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_counters = Arc::new(WorkerCounters::new());
        let progress = StressProgress::new();

        let join = tokio::spawn(stress::run(
            id.clone(),
            conn,
            templates,
            spec,
            counters,
            transaction_name.clone(),
            target_tps,
            num_workers,
            ramp_up_duration,
            duration,
            tx_stats,
            net_stats,
            Arc::clone(&worker_counters),
            Arc::clone(&cancel),
            Arc::clone(&progress),
        ));

        let handle = WorkerHandle {
            name: transaction_name,
            start_time: Instant::now(),
            cancel,
            counters: worker_counters,
            join,
            stress: Some((
                StressParams {
                    target_tps,
                    ramp_up_duration,
                    duration,
                    num_workers,
                },
                progress,
            )),
        };
        self.workers.lock().await.insert(id.clone(), handle);
        id
    }

    /// Signal cancellation and wait up to 5s for the worker to exit,
    /// removing it from the map regardless of whether it stopped in time.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let handle = self.workers.lock().await.remove(id);
        let Some(handle) = handle else {
            return Err(Error::NotFound { name: id.to_string() });
        };
        handle.cancel.store(true, Ordering::Relaxed);
        let _ = timeout(STOP_TIMEOUT, handle.join).await;
        Ok(())
    }

    /// Stop every worker currently tracked. Idempotent.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.workers.lock().await.keys().cloned().collect();
        for id in ids {
            let _ = self.stop(&id).await;
        }
    }

    /// Snapshot every worker's counters under its own data (no global lock
    /// held while reading individual counters beyond the map itself).
    pub async fn snapshot_all(&self) -> Vec<WorkerSnapshot> {
        self.workers.lock().await.iter().map(|(id, handle)| handle.snapshot(id)).collect()
    }

    pub async fn snapshot(&self, id: &str) -> Option<WorkerSnapshot> {
        self.workers.lock().await.get(id).map(|handle| handle.snapshot(id))
    }
}

fn generate_worker_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..8).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_eight_char_ids() {
        let id = generate_worker_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn stopping_an_unknown_worker_is_not_found() {
        let registry = WorkerRegistry::new();
        let err = registry.stop("nosuchid").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn stress_progress_round_trips_through_atomics() {
        let progress = StressProgress::new();
        progress.publish(42.5, Some(50));
        assert_eq!(progress.current_tps(), 42.5);
        assert_eq!(progress.ramp_up_progress(), Some(50));

        progress.publish(100.0, None);
        assert_eq!(progress.ramp_up_progress(), None);

        progress.record_actual_tps(41.2);
        assert_eq!(progress.actual_tps(), 41.2);
    }
}
