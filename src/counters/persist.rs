//! Write-temp-then-rename persistence for the STAN/RRN counters (§4.4).
//!
//! Each counter owns one background task: updates arrive on a small
//! buffered channel (drop-on-full, latest-wins), the task coalesces them
//! and flushes the last-observed value to disk on a 5-second tick, and
//! flushes once more when the channel closes (process shutdown).

use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const TICK: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 16;

/// Handle to a counter's background persistence task.
pub struct PersistHandle {
    tx: mpsc::Sender<u32>,
    task: JoinHandle<()>,
}

impl PersistHandle {
    /// Enqueue `value` for persistence. Silently dropped if the channel is
    /// full — the worker will pick up a subsequent value instead, and
    /// losing an intermediate counter value is harmless (§4.4).
    pub fn enqueue(&self, value: u32) {
        if self.tx.try_send(value).is_err() {
            debug!("counter persistence channel full; dropping stale update");
        }
    }

    /// Close the channel and wait for the worker to flush its last value.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

/// A JSON-serializable `{ "<field>": value }` envelope for a single counter.
pub trait CounterFile: Serialize + DeserializeOwned + Send + 'static {
    /// Build the envelope for `value`.
    fn wrap(value: u32) -> Self;
    /// Extract the stored value.
    fn unwrap(&self) -> u32;
}

/// Spawn the background persistence task for a counter file at `path`.
pub fn spawn<F: CounterFile>(path: PathBuf) -> PersistHandle {
    let (tx, mut rx) = mpsc::channel::<u32>(CHANNEL_CAPACITY);

    let task = tokio::spawn(async move {
        let mut last_seen: Option<u32> = None;
        let mut ticker = tokio::time::interval(TICK);
        ticker.tick().await; // first tick fires immediately; consume it

        loop {
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Some(value) => last_seen = Some(value),
                        None => {
                            if let Some(value) = last_seen {
                                write_atomic::<F>(&path, value).await;
                            }
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Some(value) = last_seen {
                        write_atomic::<F>(&path, value).await;
                    }
                }
            }
        }
    });

    PersistHandle { tx, task }
}

async fn write_atomic<F: CounterFile>(path: &Path, value: u32) {
    let envelope = F::wrap(value);
    let json = match serde_json::to_vec_pretty(&envelope) {
        Ok(json) => json,
        Err(e) => {
            warn!("failed to serialize counter value for {}: {e}", path.display());
            return;
        }
    };

    let tmp_path = path.with_extension("tmp");
    if let Err(e) = tokio::fs::write(&tmp_path, &json).await {
        warn!("failed to write counter temp file {}: {e}", tmp_path.display());
        return;
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        warn!("failed to persist counter file {}: {e}", path.display());
    }
}

/// Load a counter's last value from `path`. Missing files start at 0;
/// malformed content logs a warning and also starts at 0 rather than
/// failing startup (§4.4).
pub async fn load<F: CounterFile>(path: &Path) -> u32 {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return 0;
    };
    match serde_json::from_slice::<F>(&bytes) {
        Ok(envelope) => envelope.unwrap(),
        Err(e) => {
            warn!("malformed counter file {}: {e}; starting from 0", path.display());
            0
        }
    }
}
