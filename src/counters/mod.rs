//! Persistent STAN/RRN counters (§4.4).

pub mod persist;
pub mod rrn;
pub mod stan;

pub use rrn::RrnGenerator;
pub use stan::StanGenerator;

use std::path::Path;

/// The pair of counters a running client needs: STAN for field 11, RRN for
/// field 37. Bundled together since both are loaded from (and persisted to)
/// the same `db-path` directory.
pub struct Counters {
    pub stan: StanGenerator,
    pub rrn: RrnGenerator,
}

impl Counters {
    /// Load both counters from `dir`, creating it first if necessary.
    pub async fn load(dir: &Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(Self {
            stan: StanGenerator::load(dir).await,
            rrn: RrnGenerator::load(dir).await,
        })
    }

    /// Flush both counters to disk and stop their background tasks.
    pub async fn shutdown(self) {
        self.stan.shutdown().await;
        self.rrn.shutdown().await;
    }
}
