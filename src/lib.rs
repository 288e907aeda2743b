//! ISO 8583 financial-message client and load generator.
//!
//! Maintains one long-lived TCP connection to an ISO 8583 (1987/1993)
//! host, composes request messages from JSON templates, correlates
//! responses by STAN, and drives the connection under configurable load
//! patterns while collecting per-transaction and networking metrics.
//!
//! # Example
//!
//! ```no_run
//! use jiso::{Config, Engine};
//!
//! # async fn run(config: Config) -> jiso::Result<()> {
//! let engine = Engine::start(config).await?;
//! let reply = engine.send("signon").await?;
//! println!("got MTI {}", reply.mti);
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod codec;
pub mod config;
pub mod conn;
pub mod counters;
pub mod error;
pub mod framing;
pub mod metrics;
pub mod spec;
pub mod template;
pub mod worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

pub use codec::Message;
pub use config::{Cli, Config};
pub use error::{Error, Result};

use audit::{AuditLog, AuditRecord};
use conn::{ConnectParams, ConnectionManager};
use counters::Counters;
use metrics::{NetworkingStats, TransactionStats};
use spec::MessageSpec;
use template::TransactionSet;
use worker::WorkerRegistry;

/// The running engine: one connection, the loaded spec/templates, the
/// STAN/RRN counters, the worker registry, and the metrics/audit
/// collaborators every send path feeds.
pub struct Engine {
    conn: Arc<ConnectionManager>,
    spec: Arc<MessageSpec>,
    templates: Arc<TransactionSet>,
    counters: Arc<Counters>,
    workers: Arc<WorkerRegistry>,
    tx_stats: Arc<TransactionStats>,
    net_stats: Arc<NetworkingStats>,
    audit: Option<Arc<AuditLog>>,
    session_id: String,
    hex_logging: bool,
}

impl Engine {
    /// Load the spec and templates, open the counters, dial the host, and
    /// (if `db_path` is set) open the audit log. Returns a ready-to-use
    /// engine with an established connection.
    pub async fn start(config: Config) -> Result<Self> {
        let spec = Arc::new(MessageSpec::load(&config.spec_file)?);
        let templates = Arc::new(TransactionSet::load(&config.transactions_file)?);
        let counters = Arc::new(Counters::load(&config.counters_dir).await.map_err(Error::Io)?);
        let net_stats = Arc::new(NetworkingStats::new());

        let conn = ConnectionManager::new(
            ConnectParams {
                host: config.host.clone(),
                port: config.port,
                header_style: config.header_style,
                naps: config.naps,
                connect_timeout: config.connect_timeout,
                total_connect_timeout: config.total_connect_timeout,
                max_reconnect_attempts: config.reconnect_attempts,
                response_timeout: config.response_timeout,
            },
            Arc::clone(&spec),
            Arc::clone(&net_stats),
        );
        conn.connect().await?;

        let audit = match &config.db_path {
            Some(path) => Some(Arc::new(AuditLog::open(path)?)),
            None => None,
        };

        Ok(Self {
            conn,
            spec,
            templates,
            counters,
            workers: WorkerRegistry::new(),
            tx_stats: Arc::new(TransactionStats::new()),
            net_stats,
            audit,
            session_id: new_session_id(),
            hex_logging: config.hex,
        })
    }

    /// `Send(name)` (§1, §4.6): compose, send, and wait for the correlated
    /// reply using the connection's configured response timeout. Records
    /// the transaction's latency/response-code metrics and (if enabled)
    /// an audit record.
    pub async fn send(&self, transaction_name: &str) -> Result<Message> {
        let request = template::compose(&self.templates, transaction_name, &self.spec, &self.counters)?;
        if self.hex_logging {
            tracing::debug!(tx = transaction_name, request = %hex_of(&request), "sending");
        }

        let started = Instant::now();
        let result = self.conn.send(&request).await;
        self.record_outcome(transaction_name, &request, &result, started.elapsed());
        result
    }

    /// `BackgroundSend(msg)` (§4.6): same wire path, used by workers,
    /// suppressing the foreground `send`'s verbose logging.
    pub async fn background_send(&self, transaction_name: &str) -> Result<()> {
        let msg = template::compose(&self.templates, transaction_name, &self.spec, &self.counters)?;
        self.conn.background_send(&msg).await
    }

    fn record_outcome(&self, transaction_name: &str, request: &Message, result: &Result<Message>, elapsed: Duration) {
        if let Some(audit) = &self.audit {
            let record = match result {
                Ok(reply) => AuditRecord::finished(&self.session_id, transaction_name, request, Some(reply), elapsed),
                Err(_) => AuditRecord::finished(&self.session_id, transaction_name, request, None, elapsed),
            };
            audit.record(record);
        }
        if let Ok(reply) = result {
            let response_code = reply.get_str(39).unwrap_or("XX").to_string();
            self.tx_stats.record(elapsed, &response_code);
        }
    }

    /// `StartWorker(txName, count, interval) -> id` (§4.7).
    pub async fn start_background_worker(&self, transaction_name: &str, count: u32, interval: Duration) -> String {
        self.workers
            .start_background(
                Arc::clone(&self.conn),
                Arc::clone(&self.templates),
                Arc::clone(&self.spec),
                Arc::clone(&self.counters),
                transaction_name.to_string(),
                count,
                interval,
                Arc::clone(&self.tx_stats),
                Arc::clone(&self.net_stats),
            )
            .await
    }

    /// `StartStressTestWorker(txName, targetTps, rampUpDuration, duration,
    /// numWorkers) -> id` (§4.7).
    pub async fn start_stress_test_worker(
        &self,
        transaction_name: &str,
        target_tps: u32,
        ramp_up_duration: Duration,
        duration: Duration,
        num_workers: u32,
    ) -> String {
        self.workers
            .start_stress_test(
                Arc::clone(&self.conn),
                Arc::clone(&self.templates),
                Arc::clone(&self.spec),
                Arc::clone(&self.counters),
                transaction_name.to_string(),
                target_tps,
                ramp_up_duration,
                duration,
                num_workers,
                Arc::clone(&self.tx_stats),
                Arc::clone(&self.net_stats),
            )
            .await
    }

    /// `StopWorker(id)` (§4.7).
    pub async fn stop_worker(&self, id: &str) -> Result<()> {
        self.workers.stop(id).await
    }

    /// `StopAllWorkers()` (§4.7).
    pub async fn stop_all_workers(&self) {
        self.workers.stop_all().await
    }

    /// `GetWorkerStats()` (§4.7): a snapshot of every tracked worker.
    pub async fn worker_stats(&self) -> Vec<worker::WorkerSnapshot> {
        self.workers.snapshot_all().await
    }

    pub fn transaction_stats(&self) -> &TransactionStats {
        &self.tx_stats
    }

    pub fn networking_stats(&self) -> &NetworkingStats {
        &self.net_stats
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.is_connected().await
    }

    /// Stop every worker, flush the counters and (if open) the audit log,
    /// and close the connection.
    pub async fn shutdown(self) {
        self.workers.stop_all().await;
        let _ = self.conn.close().await;
        if let Some(audit) = self.audit {
            if let Ok(audit) = Arc::try_unwrap(audit) {
                audit.shutdown().await;
            }
        }
        if let Ok(counters) = Arc::try_unwrap(self.counters) {
            counters.shutdown().await;
        }
    }
}

fn hex_of(msg: &Message) -> String {
    serde_json::to_string(&msg.to_json()).unwrap_or_default()
}

fn new_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..16).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
}
