//! STAN (System Trace Audit Number, field 11) generator (§4.4).
//!
//! A process-wide counter: each call to [`StanGenerator::next`] advances
//! value -> (value+1) mod 1,000,000 via compare-and-swap, skipping 0, and
//! renders the result as a 6-digit zero-padded string.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use super::persist::{self, CounterFile, PersistHandle};

const MODULUS: u32 = 1_000_000;

#[derive(Debug, Serialize, Deserialize)]
struct StanFile {
    stan_value: u32,
}

impl CounterFile for StanFile {
    fn wrap(value: u32) -> Self {
        StanFile { stan_value: value }
    }
    fn unwrap(&self) -> u32 {
        self.stan_value
    }
}

/// Generates 6-digit STAN values and persists the running counter to disk.
pub struct StanGenerator {
    value: AtomicU32,
    persist: PersistHandle,
}

impl StanGenerator {
    /// Load the last persisted value (0 if the file is absent or malformed)
    /// from `dir`/stan.json and spawn the background persistence task.
    pub async fn load(dir: &std::path::Path) -> Self {
        let path: PathBuf = dir.join("stan.json");
        let start = persist::load::<StanFile>(&path).await;
        let persist = persist::spawn::<StanFile>(path);
        Self {
            value: AtomicU32::new(start),
            persist,
        }
    }

    /// Advance the counter and return the next STAN as a 6-digit string.
    pub fn next(&self) -> String {
        format!("{:06}", self.next_raw())
    }

    fn next_raw(&self) -> u32 {
        loop {
            let cur = self.value.load(Ordering::SeqCst);
            let mut next = cur.wrapping_add(1) % MODULUS;
            if next == 0 {
                next = 1;
            }
            if self
                .value
                .compare_exchange(cur, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.persist.enqueue(next);
                return next;
            }
        }
    }

    /// Flush the last value to disk and stop the background task.
    pub async fn shutdown(self) {
        self.persist.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn advances_and_wraps_skipping_zero() {
        let dir = tempfile::tempdir().unwrap();
        let gen = StanGenerator::load(dir.path()).await;
        assert_eq!(gen.next(), "000001");
        assert_eq!(gen.next(), "000002");

        gen.value.store(MODULUS - 1, Ordering::SeqCst);
        assert_eq!(gen.next(), "000001");
        gen.shutdown().await;
    }

    #[tokio::test]
    async fn reloads_persisted_value() {
        let dir = tempfile::tempdir().unwrap();
        {
            let gen = StanGenerator::load(dir.path()).await;
            gen.next();
            gen.next();
            gen.shutdown().await;
        }
        let gen = StanGenerator::load(dir.path()).await;
        assert_eq!(gen.next(), "000003");
        gen.shutdown().await;
    }
}
