//! Simulation metrics.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use payledger_common::{ErrorKind, LedgerError};

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total ledger calls made.
    pub total_operations: u64,
    /// Calls that committed.
    pub successful_operations: u64,
    /// Calls refused by a business or validation rule.
    pub refused_operations: u64,
    /// Calls that hit a storage or consistency failure.
    pub failed_operations: u64,
    /// Refusals keyed by error code.
    pub refusals: BTreeMap<&'static str, u64>,
    /// Latency samples (µs).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_operations: 0,
            successful_operations: 0,
            refused_operations: 0,
            failed_operations: 0,
            refusals: BTreeMap::new(),
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record the outcome of one ledger call.
    pub fn record<T>(&mut self, result: &Result<T, LedgerError>, latency: Duration) {
        self.total_operations += 1;

        match result {
            Ok(_) => self.successful_operations += 1,
            Err(e) if matches!(e.kind(), ErrorKind::Storage | ErrorKind::Consistency) => {
                self.failed_operations += 1;
            }
            Err(e) => {
                self.refused_operations += 1;
                *self.refusals.entry(e.error_code()).or_default() += 1;
            }
        }

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_samples.push_back(micros);
    }

    /// Get average latency in µs.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p99 latency.
    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
