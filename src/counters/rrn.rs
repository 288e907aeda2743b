//! RRN (Retrieval Reference Number, field 37) generator (§4.4).
//!
//! A process-wide counter advancing value -> (value+1) mod 10,000,000 via
//! compare-and-swap, skipping 0, rendered as `YYDDDNNNNNNN`: 2-digit year,
//! 3-digit day-of-year, 7-digit zero-padded counter.

use chrono::{Datelike, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use super::persist::{self, CounterFile, PersistHandle};

const MODULUS: u32 = 10_000_000;

#[derive(Debug, Serialize, Deserialize)]
struct RrnFile {
    rrn_value: u32,
}

impl CounterFile for RrnFile {
    fn wrap(value: u32) -> Self {
        RrnFile { rrn_value: value }
    }
    fn unwrap(&self) -> u32 {
        self.rrn_value
    }
}

/// Generates `YYDDDNNNNNNN` RRN values and persists the running counter.
pub struct RrnGenerator {
    value: AtomicU32,
    persist: PersistHandle,
}

impl RrnGenerator {
    /// Load the last persisted value (0 if absent/malformed) from
    /// `dir`/rrn.json and spawn the background persistence task.
    pub async fn load(dir: &std::path::Path) -> Self {
        let path: PathBuf = dir.join("rrn.json");
        let start = persist::load::<RrnFile>(&path).await;
        let persist = persist::spawn::<RrnFile>(path);
        Self {
            value: AtomicU32::new(start),
            persist,
        }
    }

    /// Advance the counter and return the next RRN string.
    pub fn next(&self) -> String {
        let raw = self.next_raw();
        let now = Local::now();
        format!("{:02}{:03}{:07}", now.year() % 100, now.ordinal(), raw)
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
    async fn renders_yy_ddd_counter() {
        let dir = tempfile::tempdir().unwrap();
        let gen = RrnGenerator::load(dir.path()).await;
        let rrn = gen.next();
        assert_eq!(rrn.len(), 12);
        assert!(rrn.ends_with("0000001"));
        gen.shutdown().await;
    }

    #[tokio::test]
    async fn wraps_skipping_zero() {
        let dir = tempfile::tempdir().unwrap();
        let gen = RrnGenerator::load(dir.path()).await;
        gen.value.store(MODULUS - 1, Ordering::SeqCst);
        let rrn = gen.next();
        assert!(rrn.ends_with("0000001"));
        gen.shutdown().await;
    }
}
