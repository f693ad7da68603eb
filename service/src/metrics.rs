//! Operation counters for the ledger service.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Service metrics.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    /// Accounts opened.
    pub accounts_created: AtomicU64,
    /// Transfers submitted.
    pub transfers_attempted: AtomicU64,
    /// Transfers committed.
    pub transfers_succeeded: AtomicU64,
    /// Transfers refused or failed.
    pub transfers_failed: AtomicU64,
    /// Payment requests created.
    pub requests_created: AtomicU64,
    /// Payment requests accepted.
    pub requests_accepted: AtomicU64,
    /// Payment requests rejected.
    pub requests_rejected: AtomicU64,
    /// Payment requests withdrawn.
    pub requests_withdrawn: AtomicU64,
    /// Storage failures surfaced to callers.
    pub storage_failures: AtomicU64,
}

impl ServiceMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an account opening.
    pub fn account_created(&self) {
        self.accounts_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transfer submission.
    pub fn transfer_attempted(&self) {
        self.transfers_attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed transfer.
    pub fn transfer_succeeded(&self) {
        self.transfers_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transfer that did not commit.
    pub fn transfer_failed(&self) {
        self.transfers_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a new payment request.
    pub fn request_created(&self) {
        self.requests_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted request.
    pub fn request_accepted(&self) {
        self.requests_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected request.
    pub fn request_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a withdrawn request.
    pub fn request_withdrawn(&self) {
        self.requests_withdrawn.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a storage failure.
    pub fn storage_failure(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accounts_created: self.accounts_created.load(Ordering::Relaxed),
            transfers_attempted: self.transfers_attempted.load(Ordering::Relaxed),
            transfers_succeeded: self.transfers_succeeded.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            requests_created: self.requests_created.load(Ordering::Relaxed),
            requests_accepted: self.requests_accepted.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            requests_withdrawn: self.requests_withdrawn.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("accounts_created", "Accounts opened", s.accounts_created),
            ("transfers_attempted", "Transfers submitted", s.transfers_attempted),
            ("transfers_succeeded", "Transfers committed", s.transfers_succeeded),
            ("transfers_failed", "Transfers refused or failed", s.transfers_failed),
            ("requests_created", "Payment requests created", s.requests_created),
            ("requests_accepted", "Payment requests accepted", s.requests_accepted),
            ("requests_rejected", "Payment requests rejected", s.requests_rejected),
            ("requests_withdrawn", "Payment requests withdrawn", s.requests_withdrawn),
            ("storage_failures", "Storage failures surfaced to callers", s.storage_failures),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP payledger_{name} {help}\n# TYPE payledger_{name} counter\npayledger_{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub accounts_created: u64,
    pub transfers_attempted: u64,
    pub transfers_succeeded: u64,
    pub transfers_failed: u64,
    pub requests_created: u64,
    pub requests_accepted: u64,
    pub requests_rejected: u64,
    pub requests_withdrawn: u64,
    pub storage_failures: u64,
}
