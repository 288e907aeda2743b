//! Optional audit log (§4.9): every request/response pair, batched into an
//! embedded [`sled`] store so a crash doesn't lose in-flight records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::Message;
use crate::error::{Error, Result};

const CHANNEL_CAPACITY: usize = 4096;
const BATCH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Response code recorded when a request timed out with no reply (§4.9).
pub const TIMEOUT_RESPONSE_CODE: &str = "91";
/// Response code recorded when the response couldn't be rendered as JSON.
pub const UNPARSEABLE_RESPONSE_CODE: &str = "XX";

/// One logged request/response pair (§4.9): `(sessionId, timestamp, name,
/// requestJSON, responseJSON?, processingMs, success, responseCode)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub session_id: String,
    pub timestamp_epoch_ms: u64,
    pub name: String,
    pub request_json: Value,
    pub response_json: Option<Value>,
    pub processing_ms: u64,
    pub success: bool,
    pub response_code: String,
}

impl AuditRecord {
    /// Build a record for a completed exchange: `response` is `None` on
    /// timeout (response code forced to [`TIMEOUT_RESPONSE_CODE`]).
    pub fn finished(
        session_id: impl Into<String>,
        name: impl Into<String>,
        request: &Message,
        response: Option<&Message>,
        processing: Duration,
    ) -> Self {
        let timestamp_epoch_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
        let response_code = match response {
            None => TIMEOUT_RESPONSE_CODE.to_string(),
            Some(reply) => reply.get_str(39).map(str::to_string).unwrap_or_else(|| UNPARSEABLE_RESPONSE_CODE.to_string()),
        };
        Self {
            session_id: session_id.into(),
            timestamp_epoch_ms,
            name: name.into(),
            request_json: request.to_json(),
            response_json: response.map(Message::to_json),
            processing_ms: processing.as_millis() as u64,
            success: response.is_some(),
            response_code,
        }
    }
}

/// A batching handle to the audit log's background writer task.
pub struct AuditLog {
    tx: mpsc::Sender<AuditRecord>,
    task: JoinHandle<()>,
}

impl AuditLog {
    /// Open (or create) the audit database at `path` and spawn its writer.
    /// Records land in the default tree keyed by session id, and are
    /// mirrored into a `by_response_code` tree for the other lookup axis
    /// §4.9 calls for.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(|e| Error::config_invalid(format!("failed to open audit db at {}: {e}", path.display())))?;
        let by_response_code = db
            .open_tree("by_response_code")
            .map_err(|e| Error::config_invalid(format!("failed to open audit index tree: {e}")))?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(run(db, by_response_code, rx));
        Ok(Self { tx, task })
    }

    /// Enqueue `record`. Dropped silently if the channel is full — audit
    /// logging never blocks or fails the transaction it's observing.
    pub fn record(&self, record: AuditRecord) {
        if self.tx.try_send(record).is_err() {
            debug!("audit log channel full; dropping record");
        }
    }

    /// Close the channel and wait for the writer to flush its last batch.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

async fn run(db: sled::Db, by_response_code: sled::Tree, mut rx: mpsc::Receiver<AuditRecord>) {
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= BATCH_SIZE {
                            flush(&db, &by_response_code, &mut batch);
                        }
                    }
                    None => {
                        flush(&db, &by_response_code, &mut batch);
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&db, &by_response_code, &mut batch);
            }
        }
    }
}

/// Commit the buffered records as a single atomic batch, writing each
/// record under its session-id key in the default tree and mirroring it
/// into the response-code index.
fn flush(db: &sled::Db, by_response_code: &sled::Tree, records: &mut Vec<AuditRecord>) {
    if records.is_empty() {
        return;
    }
    let mut primary = sled::Batch::default();
    let mut by_code = sled::Batch::default();
    for record in records.drain(..) {
        let value = match serde_json::to_vec(&record) {
            Ok(value) => value,
            Err(e) => {
                warn!("failed to serialize audit record: {e}");
                continue;
            }
        };
        let primary_key = format!("{}\0{:020}", record.session_id, record.timestamp_epoch_ms);
        let code_key = format!("{}\0{:020}\0{}", record.response_code, record.timestamp_epoch_ms, record.session_id);
        primary.insert(primary_key.as_bytes(), value.clone());
        by_code.insert(code_key.as_bytes(), value);
    }
    if let Err(e) = db.apply_batch(primary) {
        warn!("failed to commit audit batch: {e}");
    }
    if let Err(e) = by_response_code.apply_batch(by_code) {
        warn!("failed to commit audit response-code index batch: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Message;

    fn msg(mti: &str, stan: &str) -> Message {
        let mut m = Message::new(mti);
        m.set(11, stan);
        m
    }

    #[tokio::test]
    async fn records_survive_a_shutdown_flush_indexed_both_ways() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(&dir.path().join("audit.sled")).unwrap();

        let mut reply = msg("0810", "000001");
        reply.set(39, "00");
        log.record(AuditRecord::finished("session-1", "signon", &msg("0800", "000001"), Some(&reply), Duration::from_millis(12)));
        log.record(AuditRecord::finished("session-1", "echo", &msg("0800", "000002"), None, Duration::from_secs(5)));
        log.shutdown().await;

        let db = sled::open(dir.path().join("audit.sled")).unwrap();
        assert_eq!(db.len(), 2);
        let by_code = db.open_tree("by_response_code").unwrap();
        assert_eq!(by_code.len(), 2);
        assert!(by_code.scan_prefix(TIMEOUT_RESPONSE_CODE).next().is_some());
    }

    #[tokio::test]
    async fn timeout_record_is_unsuccessful_with_timeout_code() {
        let record = AuditRecord::finished("s", "echo", &msg("0800", "000003"), None, Duration::from_secs(1));
        assert!(!record.success);
        assert_eq!(record.response_code, TIMEOUT_RESPONSE_CODE);
        assert!(record.response_json.is_none());
    }

    #[tokio::test]
    async fn success_record_derives_code_from_field_39() {
        let mut reply = msg("0810", "000004");
        reply.set(39, "05");
        let record = AuditRecord::finished("s", "echo", &msg("0800", "000004"), Some(&reply), Duration::from_millis(9));
        assert!(record.success);
        assert_eq!(record.response_code, "05");
    }
}
