//! In-memory ledger store.
//!
//! Committed state sits behind a single `RwLock` that is only held for the
//! instant a commit publishes its writes, so readers always see whole
//! commits. Writers serialize per row: a transaction takes an async lock on
//! every holding or request it intends to modify and keeps it until commit or
//! rollback. Waiting for a row lock is bounded; a timeout surfaces as a
//! retryable storage failure.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use payledger_common::{now, AccountId, LedgerError, RequestId, Result, TransactionId};

use crate::account::{Account, Holding};
use crate::balance::PaymentCounts;
use crate::journal::{newest_first, paginate, TransactionCursor, TransactionPage, TransactionRecord};
use crate::request::{PaymentRequest, RequestFilter};
use crate::store::{LedgerSnapshot, LedgerStore, LedgerTx};

/// Default time to wait for a row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    names: HashMap<String, AccountId>,
    holdings: HashMap<AccountId, Holding>,
    requests: HashMap<RequestId, PaymentRequest>,
    transactions: Vec<TransactionRecord>,
    /// Request → settling transaction, enforcing one transaction per request.
    settled: HashMap<RequestId, TransactionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    AccountName(String),
    Holding(AccountId),
    Request(RequestId),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::AccountName(name) => write!(f, "account name {name}"),
            RowKey::Holding(id) => write!(f, "holding {id}"),
            RowKey::Request(id) => write!(f, "request {id}"),
        }
    }
}

struct Shared {
    tables: RwLock<Tables>,
    row_locks: DashMap<RowKey, Arc<Mutex<()>>>,
    lock_timeout: Duration,
}

impl Shared {
    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        f(&self.tables.read())
    }
}

/// Thread-safe in-memory [`LedgerStore`].
///
/// `Clone` shares the underlying tables. Nothing survives the process, so
/// this backend suits tests and simulations.
#[derive(Clone)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl MemoryLedgerStore {
    /// Create an empty store with the default lock timeout.
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create an empty store that gives up waiting for a row lock after
    /// `lock_timeout`.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: DashMap::new(),
                lock_timeout,
            }),
        }
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        Ok(Box::new(MemoryTx::new(self.shared.clone())))
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.shared.read(|t| t.accounts.get(&id).cloned()))
    }

    async fn account_by_name(&self, name: &str) -> Result<Option<Account>> {
        Ok(self
            .shared
            .read(|t| t.names.get(name).and_then(|id| t.accounts.get(id)).cloned()))
    }

    async fn holding(&self, account: AccountId) -> Result<Option<Holding>> {
        Ok(self.shared.read(|t| t.holdings.get(&account).cloned()))
    }

    async fn request(&self, id: RequestId) -> Result<Option<PaymentRequest>> {
        Ok(self.shared.read(|t| t.requests.get(&id).cloned()))
    }

    async fn requests_for(
        &self,
        account: AccountId,
        filter: RequestFilter,
    ) -> Result<Vec<PaymentRequest>> {
        let mut requests: Vec<PaymentRequest> = self.shared.read(|t| {
            t.requests
                .values()
                .filter(|r| filter.matches(account, r))
                .cloned()
                .collect()
        });
        requests.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(requests)
    }

    async fn transactions_for(
        &self,
        account: AccountId,
        cursor: Option<TransactionCursor>,
        limit: usize,
    ) -> Result<TransactionPage> {
        let mut records: Vec<TransactionRecord> = self.shared.read(|t| {
            t.transactions
                .iter()
                .filter(|r| r.involves(account))
                .cloned()
                .collect()
        });
        records.sort_by(newest_first);
        Ok(paginate(records, cursor, limit))
    }

    async fn payment_counts(&self, account: AccountId) -> Result<PaymentCounts> {
        Ok(self.shared.read(|t| {
            t.transactions
                .iter()
                .fold(PaymentCounts::default(), |mut counts, r| {
                    if r.sender == account {
                        counts.made += 1;
                    }
                    if r.recipient == account {
                        counts.received += 1;
                    }
                    counts
                })
        }))
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        Ok(self.shared.read(|t| LedgerSnapshot {
            holdings: t.holdings.values().cloned().collect(),
            transactions: t.transactions.clone(),
        }))
    }
}

/// Row locks held by one transaction. Releasing them also evicts lock table
/// entries nobody else is waiting on.
struct RowGuards {
    shared: Arc<Shared>,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
}

impl Drop for RowGuards {
    fn drop(&mut self) {
        for (key, guard) in self.held.drain() {
            drop(guard);
            self.shared
                .row_locks
                .remove_if(&key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

/// Transaction handle for [`MemoryLedgerStore`]. Writes are buffered here
/// and row locks are held until the handle is committed or dropped.
struct MemoryTx {
    shared: Arc<Shared>,
    guards: RowGuards,
    accounts: Vec<(Account, Holding)>,
    holdings: HashMap<AccountId, Holding>,
    requests: HashMap<RequestId, PaymentRequest>,
    new_requests: HashSet<RequestId>,
    transactions: Vec<TransactionRecord>,
}

impl MemoryTx {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            guards: RowGuards {
                shared: shared.clone(),
                held: HashMap::new(),
            },
            shared,
            accounts: Vec::new(),
            holdings: HashMap::new(),
            requests: HashMap::new(),
            new_requests: HashSet::new(),
            transactions: Vec::new(),
        }
    }

    async fn lock(&mut self, key: RowKey) -> Result<()> {
        if self.guards.held.contains_key(&key) {
            return Ok(());
        }

        let mutex = self
            .shared
            .row_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(self.shared.lock_timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                self.guards.held.insert(key, guard);
                Ok(())
            }
            Err(_) => {
                debug!(row = %key, "Row lock wait timed out");
                Err(LedgerError::transient(format!(
                    "timed out waiting for lock on {key}"
                )))
            }
        }
    }

    fn ensure_locked(&self, key: &RowKey) -> Result<()> {
        if self.guards.held.contains_key(key) {
            Ok(())
        } else {
            Err(LedgerError::storage(format!(
                "{key} is not locked by this transaction"
            )))
        }
    }

    /// Latest view of a holding: this transaction's writes, then its new
    /// accounts, then committed state.
    fn current_holding(&self, account: AccountId) -> Result<Holding> {
        if let Some(holding) = self.holdings.get(&account) {
            return Ok(holding.clone());
        }
        if let Some((_, holding)) = self.accounts.iter().find(|(a, _)| a.id == account) {
            return Ok(holding.clone());
        }
        self.shared
            .read(|t| t.holdings.get(&account).cloned())
            .ok_or(LedgerError::HoldingNotFound(account))
    }

    /// Check every buffered write against committed state, then publish them
    /// together. Nothing is published if any check fails.
    fn apply(self) -> Result<()> {
        let MemoryTx {
            shared,
            guards,
            accounts,
            holdings,
            requests,
            new_requests,
            transactions,
        } = self;

        {
            let mut tables = shared.tables.write();

            let holding_exists = |tables: &Tables, id: &AccountId| {
                tables.holdings.contains_key(id) || accounts.iter().any(|(a, _)| a.id == *id)
            };

            for (account, _) in &accounts {
                if tables.names.contains_key(&account.name) {
                    return Err(LedgerError::DuplicateAccount(account.name.clone()));
                }
            }
            for id in holdings.keys() {
                if !holding_exists(&tables, id) {
                    return Err(LedgerError::HoldingNotFound(*id));
                }
            }
            for request in requests.values() {
                for id in [&request.sender, &request.recipient] {
                    if !holding_exists(&tables, id) {
                        return Err(LedgerError::HoldingNotFound(*id));
                    }
                }
                if new_requests.contains(&request.id) && tables.requests.contains_key(&request.id)
                {
                    return Err(LedgerError::storage(format!(
                        "request {} already exists",
                        request.id
                    )));
                }
            }
            for record in &transactions {
                for id in [&record.sender, &record.recipient] {
                    if !holding_exists(&tables, id) {
                        return Err(LedgerError::HoldingNotFound(*id));
                    }
                }
                if let Some(request_id) = record.request_id {
                    if tables.settled.contains_key(&request_id) {
                        return Err(LedgerError::Consistency(format!(
                            "request {request_id} already settled"
                        )));
                    }
                    if !tables.requests.contains_key(&request_id)
                        && !requests.contains_key(&request_id)
                    {
                        return Err(LedgerError::RequestNotFound(request_id));
                    }
                }
            }

            for (account, holding) in accounts {
                tables.names.insert(account.name.clone(), account.id);
                tables.holdings.insert(account.id, holding);
                tables.accounts.insert(account.id, account);
            }
            tables.holdings.extend(holdings);
            tables.requests.extend(requests);
            for record in transactions {
                if let Some(request_id) = record.request_id {
                    tables.settled.insert(request_id, record.id);
                }
                tables.transactions.push(record);
            }
        }

        drop(guards);
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn insert_account(&mut self, account: &Account, holding: &Holding) -> Result<()> {
        self.lock(RowKey::AccountName(account.name.clone())).await?;

        let taken = self.shared.read(|t| t.names.contains_key(&account.name))
            || self.accounts.iter().any(|(a, _)| a.name == account.name);
        if taken {
            return Err(LedgerError::DuplicateAccount(account.name.clone()));
        }

        self.accounts.push((account.clone(), holding.clone()));
        Ok(())
    }

    async fn holdings_for_update(
        &mut self,
        first: AccountId,
        second: AccountId,
    ) -> Result<(Holding, Holding)> {
        if first == second {
            return Err(LedgerError::SelfTransfer);
        }

        let (low, high) = if first < second {
            (first, second)
        } else {
            (second, first)
        };
        self.lock(RowKey::Holding(low)).await?;
        self.lock(RowKey::Holding(high)).await?;

        Ok((self.current_holding(first)?, self.current_holding(second)?))
    }

    async fn set_balance(&mut self, account: AccountId, balance: u64) -> Result<()> {
        self.ensure_locked(&RowKey::Holding(account))?;

        let mut holding = self.current_holding(account)?;
        holding.balance = balance;
        holding.updated_at = now();
        self.holdings.insert(account, holding);
        Ok(())
    }

    async fn insert_transaction(&mut self, record: &TransactionRecord) -> Result<()> {
        self.transactions.push(record.clone());
        Ok(())
    }

    async fn insert_request(&mut self, request: &PaymentRequest) -> Result<()> {
        self.lock(RowKey::Request(request.id)).await?;
        self.requests.insert(request.id, request.clone());
        self.new_requests.insert(request.id);
        Ok(())
    }

    async fn request_for_update(&mut self, id: RequestId) -> Result<PaymentRequest> {
        self.lock(RowKey::Request(id)).await?;

        if let Some(request) = self.requests.get(&id) {
            return Ok(request.clone());
        }
        self.shared
            .read(|t| t.requests.get(&id).cloned())
            .ok_or(LedgerError::RequestNotFound(id))
    }

    async fn update_request(&mut self, request: &PaymentRequest) -> Result<()> {
        self.ensure_locked(&RowKey::Request(request.id))?;
        self.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        (*self).apply()
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!(
            buffered_transactions = self.transactions.len(),
            "Rolling back in-memory transaction"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payledger_common::{Amount, Currency};

    async fn seeded(store: &MemoryLedgerStore, name: &str, balance: u64) -> Account {
        let account = Account::new(name);
        let holding = Holding::open(account.id, Currency::Gbp, balance);
        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&account, &holding).await.unwrap();
        tx.commit().await.unwrap();
        account
    }

    #[tokio::test]
    async fn test_insert_and_lookup_account() {
        let store = MemoryLedgerStore::new();
        let account = seeded(&store, "alice", 1000).await;

        assert_eq!(store.account(account.id).await.unwrap(), Some(account.clone()));
        assert_eq!(
            store.account_by_name("alice").await.unwrap().map(|a| a.id),
            Some(account.id)
        );
        assert!(store.account_by_name("bob").await.unwrap().is_none());
        assert_eq!(store.holding(account.id).await.unwrap().unwrap().balance, 1000);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let store = MemoryLedgerStore::new();
        seeded(&store, "alice", 1000).await;

        let again = Account::new("alice");
        let holding = Holding::open(again.id, Currency::Gbp, 1000);
        let mut tx = store.begin().await.unwrap();
        let result = tx.insert_account(&again, &holding).await;

        assert_eq!(result, Err(LedgerError::DuplicateAccount("alice".into())));
    }

    #[tokio::test]
    async fn test_dropped_transaction_publishes_nothing() {
        let store = MemoryLedgerStore::new();
        let alice = seeded(&store, "alice", 1000).await;
        let bob = seeded(&store, "bob", 500).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.holdings_for_update(alice.id, bob.id).await.unwrap();
            tx.set_balance(alice.id, 0).await.unwrap();
            tx.set_balance(bob.id, 1500).await.unwrap();
        }

        assert_eq!(store.holding(alice.id).await.unwrap().unwrap().balance, 1000);
        assert_eq!(store.holding(bob.id).await.unwrap().unwrap().balance, 500);

        // Row locks were released with the handle.
        let mut tx = store.begin().await.unwrap();
        tx.holdings_for_update(bob.id, alice.id).await.unwrap();
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_row_lock_timeout_is_retryable() {
        let store = MemoryLedgerStore::with_lock_timeout(Duration::from_millis(20));
        let alice = seeded(&store, "alice", 1000).await;
        let bob = seeded(&store, "bob", 500).await;

        let mut holder = store.begin().await.unwrap();
        holder.holdings_for_update(alice.id, bob.id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.holdings_for_update(bob.id, alice.id).await.unwrap_err();
        assert!(err.is_retryable());

        holder.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_balance_requires_lock() {
        let store = MemoryLedgerStore::new();
        let alice = seeded(&store, "alice", 1000).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.set_balance(alice.id, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_transaction_for_unknown_holding_fails_commit() {
        let store = MemoryLedgerStore::new();
        let alice = seeded(&store, "alice", 1000).await;

        let record = TransactionRecord::executed(
            alice.id,
            AccountId::new(),
            Amount::new(1).unwrap(),
            Currency::Gbp,
            None,
        );
        let mut tx = store.begin().await.unwrap();
        tx.insert_transaction(&record).await.unwrap();

        assert!(matches!(
            tx.commit().await,
            Err(LedgerError::HoldingNotFound(_))
        ));
        assert!(store.snapshot().await.unwrap().transactions.is_empty());
    }

    #[tokio::test]
    async fn test_row_lock_table_does_not_grow() {
        let store = MemoryLedgerStore::new();
        let alice = seeded(&store, "alice", 1000).await;
        let bob = seeded(&store, "bob", 1000).await;

        for _ in 0..500 {
            let request =
                PaymentRequest::new(alice.id, bob.id, Amount::new(1).unwrap(), Currency::Gbp);
            let mut tx = store.begin().await.unwrap();
            tx.insert_request(&request).await.unwrap();
            tx.commit().await.unwrap();

            let mut tx = store.begin().await.unwrap();
            tx.request_for_update(request.id).await.unwrap();
            tx.holdings_for_update(bob.id, alice.id).await.unwrap();
            tx.rollback().await.unwrap();
        }

        assert_eq!(store.snapshot().await.unwrap().holdings.len(), 2);
        assert!(store.shared.row_locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_entries_released_on_rollback() {
        let store = MemoryLedgerStore::with_lock_timeout(Duration::from_millis(20));
        let alice = seeded(&store, "alice", 1000).await;
        let bob = seeded(&store, "bob", 500).await;

        let mut holder = store.begin().await.unwrap();
        holder.holdings_for_update(alice.id, bob.id).await.unwrap();
        assert_eq!(store.shared.row_locks.len(), 2);

        holder.rollback().await.unwrap();
        assert!(store.shared.row_locks.is_empty());
    }
}
