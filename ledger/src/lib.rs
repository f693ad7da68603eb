//! PayLedger Ledger Engine
//!
//! Accounts, holdings and the audit log, with atomic transfers and the
//! payment request lifecycle on top of a pluggable transactional store.

pub mod account;
pub mod balance;
pub mod engine;
pub mod journal;
pub mod lifecycle;
pub mod request;
pub mod retry;
pub mod store;

pub use account::{Account, Holding, DEFAULT_OPENING_BALANCE};
pub use balance::{AccountSummary, PaymentCounts};
pub use engine::{IntegrityReport, TransferEngine};
pub use journal::{TransactionCursor, TransactionPage, TransactionRecord};
pub use lifecycle::RequestManager;
pub use request::{PaymentRequest, RequestFilter, RequestRole};
pub use retry::RetryPolicy;
pub use store::{LedgerSnapshot, LedgerStore, LedgerTx, MemoryLedgerStore, SqliteLedgerStore};
