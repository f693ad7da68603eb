//! Shared fixtures for ledger integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use payledger_common::{AccountId, Currency, LedgerError, RequestId, Result};
use payledger_ledger::{
    Account, Holding, LedgerSnapshot, LedgerStore, LedgerTx, MemoryLedgerStore, PaymentCounts,
    PaymentRequest, RequestFilter, RequestManager, RetryPolicy, TransactionCursor,
    TransactionPage, TransactionRecord, TransferEngine,
};

pub struct Ledger {
    pub engine: Arc<TransferEngine>,
    pub requests: RequestManager,
}

impl Ledger {
    pub fn over(store: Arc<dyn LedgerStore>) -> Self {
        let engine = Arc::new(TransferEngine::new(store, RetryPolicy::default()));
        let requests = RequestManager::new(engine.clone());
        Self { engine, requests }
    }

    pub fn in_memory() -> Self {
        Self::over(Arc::new(MemoryLedgerStore::new()))
    }

    pub async fn open(&self, name: &str, balance: u64) -> AccountId {
        self.open_in(name, Currency::Gbp, balance).await
    }

    pub async fn open_in(&self, name: &str, currency: Currency, balance: u64) -> AccountId {
        let (account, _) = self
            .engine
            .open_account(name, currency, balance)
            .await
            .expect("open account");
        account.id
    }

    pub async fn balance(&self, account: AccountId) -> u64 {
        self.engine.holding(account).await.expect("holding").balance
    }

    pub async fn history(&self, account: AccountId) -> Vec<TransactionRecord> {
        self.engine
            .store()
            .transactions_for(account, None, 1000)
            .await
            .expect("history")
            .records
    }
}

/// Store that delegates to an in-memory store but fails every audit log
/// insert, for exercising rollback.
pub struct FailingStore {
    inner: MemoryLedgerStore,
    error: LedgerError,
    begins: AtomicU32,
}

impl FailingStore {
    pub fn new(inner: MemoryLedgerStore) -> Self {
        Self::with_error(inner, LedgerError::storage("audit log unavailable"))
    }

    pub fn with_error(inner: MemoryLedgerStore, error: LedgerError) -> Self {
        Self {
            inner,
            error,
            begins: AtomicU32::new(0),
        }
    }

    /// Store transactions opened so far.
    pub fn begins(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }
}

struct FailingTx {
    inner: Box<dyn LedgerTx>,
    error: LedgerError,
}

#[async_trait]
impl LedgerStore for FailingStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FailingTx {
            inner: self.inner.begin().await?,
            error: self.error.clone(),
        }))
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        self.inner.account(id).await
    }

    async fn account_by_name(&self, name: &str) -> Result<Option<Account>> {
        self.inner.account_by_name(name).await
    }

    async fn holding(&self, account: AccountId) -> Result<Option<Holding>> {
        self.inner.holding(account).await
    }

    async fn request(&self, id: RequestId) -> Result<Option<PaymentRequest>> {
        self.inner.request(id).await
    }

    async fn requests_for(
        &self,
        account: AccountId,
        filter: RequestFilter,
    ) -> Result<Vec<PaymentRequest>> {
        self.inner.requests_for(account, filter).await
    }

    async fn transactions_for(
        &self,
        account: AccountId,
        cursor: Option<TransactionCursor>,
        limit: usize,
    ) -> Result<TransactionPage> {
        self.inner.transactions_for(account, cursor, limit).await
    }

    async fn payment_counts(&self, account: AccountId) -> Result<PaymentCounts> {
        self.inner.payment_counts(account).await
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        self.inner.snapshot().await
    }
}

#[async_trait]
impl LedgerTx for FailingTx {
    async fn insert_account(&mut self, account: &Account, holding: &Holding) -> Result<()> {
        self.inner.insert_account(account, holding).await
    }

    async fn holdings_for_update(
        &mut self,
        first: AccountId,
        second: AccountId,
    ) -> Result<(Holding, Holding)> {
        self.inner.holdings_for_update(first, second).await
    }

    async fn set_balance(&mut self, account: AccountId, balance: u64) -> Result<()> {
        self.inner.set_balance(account, balance).await
    }

    async fn insert_transaction(&mut self, _record: &TransactionRecord) -> Result<()> {
        Err(self.error.clone())
    }

    async fn insert_request(&mut self, request: &PaymentRequest) -> Result<()> {
        self.inner.insert_request(request).await
    }

    async fn request_for_update(&mut self, id: RequestId) -> Result<PaymentRequest> {
        self.inner.request_for_update(id).await
    }

    async fn update_request(&mut self, request: &PaymentRequest) -> Result<()> {
        self.inner.update_request(request).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}
