//! Per-template latency and response-code statistics (§4.8).

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Response codes beyond this count evict the lowest-frequency entry to
/// bound memory for templates with unbounded/garbled response codes.
const MAX_RESPONSE_CODES: usize = 100;

/// Welford's online algorithm: mean/variance without storing every sample.
struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn new() -> Self {
        Self { count: 0, mean: 0.0, m2: 0.0 }
    }

    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }
}

/// Running latency and response-code statistics for one transaction
/// template, shared across all workers composing it.
pub struct TransactionStats {
    latency: Mutex<Welford>,
    response_codes: Mutex<BTreeMap<String, u64>>,
}

impl TransactionStats {
    pub fn new() -> Self {
        Self {
            latency: Mutex::new(Welford::new()),
            response_codes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record one completed round trip's latency and response code.
    pub fn record(&self, latency: Duration, response_code: &str) {
        self.latency.lock().unwrap().push(latency.as_secs_f64() * 1000.0);
        self.record_response_code(response_code);
    }

    fn record_response_code(&self, code: &str) {
        let mut codes = self.response_codes.lock().unwrap();
        if let Some(count) = codes.get_mut(code) {
            *count += 1;
            return;
        }
        if codes.len() >= MAX_RESPONSE_CODES {
            if let Some(lowest) = codes.iter().min_by_key(|(_, &count)| count).map(|(k, _)| k.clone()) {
                codes.remove(&lowest);
            }
        }
        codes.insert(code.to_string(), 1);
    }

    /// Number of transactions recorded.
    pub fn count(&self) -> u64 {
        self.latency.lock().unwrap().count
    }

    /// Mean response latency, in milliseconds.
    pub fn mean_ms(&self) -> f64 {
        self.latency.lock().unwrap().mean
    }

    /// Population standard deviation of response latency, in milliseconds.
    pub fn standard_deviation_ms(&self) -> f64 {
        self.latency.lock().unwrap().variance().sqrt()
    }

    /// A snapshot of the response-code histogram.
    pub fn response_code_histogram(&self) -> BTreeMap<String, u64> {
        self.response_codes.lock().unwrap().clone()
    }
}

impl Default for TransactionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_count_mean_and_stddev() {
        let stats = TransactionStats::new();
        stats.record(Duration::from_millis(100), "00");
        stats.record(Duration::from_millis(200), "00");
        assert_eq!(stats.count(), 2);
        assert!((stats.mean_ms() - 150.0).abs() < 0.001);
        assert!(stats.standard_deviation_ms() > 0.0);
    }

    #[test]
    fn evicts_lowest_count_response_code_past_cap() {
        let stats = TransactionStats::new();
        for i in 0..MAX_RESPONSE_CODES {
            stats.record(Duration::from_millis(1), &format!("{i:02}"));
        }
        // Code "00" has one hit same as everything else; give it a second
        // hit so it survives the eviction that a brand-new code triggers.
        stats.record(Duration::from_millis(1), "00");
        stats.record(Duration::from_millis(1), "NEW");

        let histogram = stats.response_code_histogram();
        assert_eq!(histogram.len(), MAX_RESPONSE_CODES);
        assert!(histogram.contains_key("00"));
        assert!(histogram.contains_key("NEW"));
    }
}
