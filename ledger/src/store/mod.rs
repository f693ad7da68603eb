//! Ledger storage.
//!
//! [`LedgerStore`] serves committed reads and hands out [`LedgerTx`]
//! handles. Every mutation goes through a handle, and a handle publishes its
//! writes all at once on [`LedgerTx::commit`] or not at all. A handle that is
//! dropped without committing rolls back.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use tracing::warn;

use payledger_common::{AccountId, RequestId, Result};

use crate::account::{Account, Holding};
use crate::balance::PaymentCounts;
use crate::journal::{TransactionCursor, TransactionPage, TransactionRecord};
use crate::request::{PaymentRequest, RequestFilter};

pub use memory::MemoryLedgerStore;
pub use sqlite::SqliteLedgerStore;

/// Consistent point-in-time view of every holding and the full audit log.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    /// All holdings.
    pub holdings: Vec<Holding>,
    /// All transaction records, oldest first.
    pub transactions: Vec<TransactionRecord>,
}

/// Durable transactional storage for accounts, holdings, requests and
/// transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Start a transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    /// Look up an account by ID.
    async fn account(&self, id: AccountId) -> Result<Option<Account>>;

    /// Look up an account by its unique name.
    async fn account_by_name(&self, name: &str) -> Result<Option<Account>>;

    /// Look up the holding owned by an account.
    async fn holding(&self, account: AccountId) -> Result<Option<Holding>>;

    /// Look up a payment request.
    async fn request(&self, id: RequestId) -> Result<Option<PaymentRequest>>;

    /// Requests involving an account, most recent first.
    async fn requests_for(
        &self,
        account: AccountId,
        filter: RequestFilter,
    ) -> Result<Vec<PaymentRequest>>;

    /// One page of transactions involving an account, most recent first.
    async fn transactions_for(
        &self,
        account: AccountId,
        cursor: Option<TransactionCursor>,
        limit: usize,
    ) -> Result<TransactionPage>;

    /// Number of transfers an account has sent and received.
    async fn payment_counts(&self, account: AccountId) -> Result<PaymentCounts>;

    /// Read every holding and transaction from one consistent state.
    async fn snapshot(&self) -> Result<LedgerSnapshot>;
}

/// A transaction against a [`LedgerStore`].
#[async_trait]
pub trait LedgerTx: Send {
    /// Insert a new account and its holding. Fails with `DuplicateAccount`
    /// if the name is taken.
    async fn insert_account(&mut self, account: &Account, holding: &Holding) -> Result<()>;

    /// Lock two holdings for update and return their current state, in
    /// argument order. Locks are taken in `AccountId` order.
    async fn holdings_for_update(
        &mut self,
        first: AccountId,
        second: AccountId,
    ) -> Result<(Holding, Holding)>;

    /// Set the balance of a holding locked by this transaction.
    async fn set_balance(&mut self, account: AccountId, balance: u64) -> Result<()>;

    /// Append a transaction record.
    async fn insert_transaction(&mut self, record: &TransactionRecord) -> Result<()>;

    /// Append a new payment request.
    async fn insert_request(&mut self, request: &PaymentRequest) -> Result<()>;

    /// Lock a payment request for update and return its current state.
    async fn request_for_update(&mut self, id: RequestId) -> Result<PaymentRequest>;

    /// Write back a request locked by this transaction.
    async fn update_request(&mut self, request: &PaymentRequest) -> Result<()>;

    /// Publish all writes.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all writes.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Commit on success, roll back on failure. The original error is returned
/// even if the rollback itself fails.
pub async fn finish<T>(tx: Box<dyn LedgerTx>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, cause = %err, "Rollback failed");
            }
            Err(err)
        }
    }
}
