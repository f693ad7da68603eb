//! PayLedger Service
//!
//! Name-addressed facade over the ledger engine: account management,
//! transfers, payment requests, history and integrity audit, plus the
//! configuration and counters the `payledger` binary runs with.

pub mod config;
pub mod metrics;
pub mod service;

pub use config::ServiceConfig;
pub use metrics::{MetricsSnapshot, ServiceMetrics};
pub use service::LedgerService;
