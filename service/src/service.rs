//! Ledger service facade.
//!
//! Callers name counterparties by account name and act as an account; the
//! service resolves names, validates input, drives the engine and request
//! manager, and keeps operation counters.

use std::sync::Arc;

use tracing::{info, instrument};

use payledger_common::{
    is_valid_account_name, AccountId, Amount, Currency, LedgerError, Money, RequestId, Result,
    MAX_ACCOUNT_NAME_LEN,
};
use payledger_ledger::{
    Account, AccountSummary, IntegrityReport, LedgerStore, MemoryLedgerStore, PaymentRequest,
    RequestFilter, RequestManager, SqliteLedgerStore, TransactionCursor, TransactionPage,
    TransactionRecord, TransferEngine,
};

use crate::config::ServiceConfig;
use crate::metrics::{MetricsSnapshot, ServiceMetrics};

/// Entry point for every ledger operation.
pub struct LedgerService {
    config: ServiceConfig,
    engine: Arc<TransferEngine>,
    requests: RequestManager,
    metrics: Arc<ServiceMetrics>,
}

impl LedgerService {
    /// Create a service over an existing store.
    pub fn new(store: Arc<dyn LedgerStore>, config: ServiceConfig) -> Self {
        let engine = Arc::new(TransferEngine::new(store, config.retry));
        let requests = RequestManager::new(engine.clone());
        Self {
            config,
            engine,
            requests,
            metrics: Arc::new(ServiceMetrics::new()),
        }
    }

    /// Open the store selected by `config.database_url` and create a service
    /// over it.
    pub async fn open(config: ServiceConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|message| LedgerError::validation("config", message))?;

        let store: Arc<dyn LedgerStore> = if config.uses_memory_store() {
            Arc::new(MemoryLedgerStore::with_lock_timeout(config.lock_timeout))
        } else {
            Arc::new(SqliteLedgerStore::connect(&config.database_url, config.lock_timeout).await?)
        };

        info!(
            database_url = %config.database_url,
            opening_balance = config.opening_balance,
            "Ledger service opened"
        );
        Ok(Self::new(store, config))
    }

    /// Active configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Current operation counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Shared counters, for exporters.
    pub fn shared_metrics(&self) -> Arc<ServiceMetrics> {
        self.metrics.clone()
    }

    /// Create an account with the configured opening balance. Uses the
    /// default currency when none is given.
    #[instrument(skip(self))]
    pub async fn create_account(&self, name: &str, currency: Option<Currency>) -> Result<Account> {
        let name = validate_account_name(name)?;
        let currency = currency.unwrap_or(self.config.default_currency);

        let (account, _) = self
            .track(
                self.engine
                    .open_account(name, currency, self.config.opening_balance)
                    .await,
            )?;
        self.metrics.account_created();
        Ok(account)
    }

    /// Look up an account by name.
    pub async fn find_account(&self, name: &str) -> Result<Account> {
        let name = name.trim();
        self.track(self.engine.store().account_by_name(name).await)?
            .ok_or_else(|| LedgerError::AccountNotFound(name.to_string()))
    }

    /// Current balance of an account.
    pub async fn get_balance(&self, account: AccountId) -> Result<Money> {
        self.require_account(account).await?;
        let holding = self.track(self.engine.holding(account).await)?;
        Ok(holding.money())
    }

    /// Name, balance and payment counts of an account.
    pub async fn account_summary(&self, account: AccountId) -> Result<AccountSummary> {
        let record = self.require_account(account).await?;
        let holding = self.track(self.engine.holding(account).await)?;
        let counts = self.track(self.engine.store().payment_counts(account).await)?;
        Ok(AccountSummary::new(&record, &holding, counts))
    }

    /// Send `amount` minor units from `sender` to the account named
    /// `recipient_name`.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        sender: AccountId,
        recipient_name: &str,
        amount: i64,
    ) -> Result<TransactionRecord> {
        self.metrics.transfer_attempted();

        let result = self.resolve_transfer(sender, recipient_name, amount).await;
        match &result {
            Ok(_) => self.metrics.transfer_succeeded(),
            Err(_) => self.metrics.transfer_failed(),
        }
        result
    }

    async fn resolve_transfer(
        &self,
        sender: AccountId,
        recipient_name: &str,
        amount: i64,
    ) -> Result<TransactionRecord> {
        Amount::try_from(amount)?;
        self.require_account(sender).await?;
        let recipient = self.find_account(recipient_name).await?;
        self.track(self.engine.transfer(sender, recipient.id, amount).await)
    }

    /// Ask the account named `target_name` to pay `amount` to `requester`.
    #[instrument(skip(self))]
    pub async fn create_request(
        &self,
        requester: AccountId,
        target_name: &str,
        amount: i64,
    ) -> Result<RequestId> {
        Amount::try_from(amount)?;
        self.require_account(requester).await?;
        let target = self.find_account(target_name).await?;

        let request = self.track(self.requests.create(requester, target.id, amount).await)?;
        self.metrics.request_created();
        Ok(request.id)
    }

    /// Accept a request as its payer, moving the money.
    pub async fn accept_request(
        &self,
        request_id: RequestId,
        actor: AccountId,
    ) -> Result<TransactionRecord> {
        let (_, record) = self.track(self.requests.accept(request_id, actor).await)?;
        self.metrics.request_accepted();
        Ok(record)
    }

    /// Decline a request as its payer.
    pub async fn reject_request(&self, request_id: RequestId, actor: AccountId) -> Result<()> {
        self.track(self.requests.reject(request_id, actor).await)?;
        self.metrics.request_rejected();
        Ok(())
    }

    /// Cancel a request as its requester.
    pub async fn withdraw_request(&self, request_id: RequestId, actor: AccountId) -> Result<()> {
        self.track(self.requests.withdraw(request_id, actor).await)?;
        self.metrics.request_withdrawn();
        Ok(())
    }

    /// Look up a single request.
    pub async fn get_request(&self, request_id: RequestId) -> Result<PaymentRequest> {
        self.track(self.engine.store().request(request_id).await)?
            .ok_or(LedgerError::RequestNotFound(request_id))
    }

    /// One page of an account's transactions, most recent first. Pass the
    /// previous page's `next` cursor to continue.
    pub async fn list_transactions(
        &self,
        account: AccountId,
        cursor: Option<TransactionCursor>,
        limit: Option<usize>,
    ) -> Result<TransactionPage> {
        let limit = match limit {
            None => self.config.page_size,
            Some(0) => {
                return Err(LedgerError::validation("limit", "page limit must be positive"))
            }
            Some(limit) => limit.min(self.config.max_page_size),
        };
        self.require_account(account).await?;
        self.track(
            self.engine
                .store()
                .transactions_for(account, cursor, limit)
                .await,
        )
    }

    /// Requests involving an account, most recent first.
    pub async fn list_requests(
        &self,
        account: AccountId,
        filter: RequestFilter,
    ) -> Result<Vec<PaymentRequest>> {
        self.require_account(account).await?;
        self.track(self.engine.store().requests_for(account, filter).await)
    }

    /// Audit every holding against the transaction log.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport> {
        self.track(self.engine.verify_integrity().await)
    }

    async fn require_account(&self, account: AccountId) -> Result<Account> {
        self.track(self.engine.store().account(account).await)?
            .ok_or_else(|| LedgerError::AccountNotFound(account.to_string()))
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(LedgerError::Storage { .. }) = &result {
            self.metrics.storage_failure();
        }
        result
    }
}

/// Trim and check an account name.
pub fn validate_account_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::validation("name", "account name is required"));
    }
    if name.len() > MAX_ACCOUNT_NAME_LEN {
        return Err(LedgerError::validation(
            "name",
            format!("account name must be at most {MAX_ACCOUNT_NAME_LEN} characters"),
        ));
    }
    if !is_valid_account_name(name) {
        return Err(LedgerError::validation(
            "name",
            "account name may only contain letters, digits and @ . + - _",
        ));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_account_name() {
        assert_eq!(validate_account_name("  alice  "), Ok("alice"));
        assert_eq!(validate_account_name("a.b+c@d-e_f"), Ok("a.b+c@d-e_f"));
        assert!(validate_account_name("   ").is_err());
        assert!(validate_account_name("has space").is_err());
        assert!(validate_account_name("semi;colon").is_err());
        assert!(validate_account_name(&"x".repeat(151)).is_err());
        assert!(validate_account_name(&"x".repeat(150)).is_ok());
    }

    #[tokio::test]
    async fn test_open_memory_service() {
        let service = LedgerService::open(ServiceConfig::default()).await.unwrap();
        let account = service.create_account("alice", None).await.unwrap();

        let balance = service.get_balance(account.id).await.unwrap();
        assert_eq!(balance.to_string(), "10.00 GBP");
        assert_eq!(service.metrics().accounts_created, 1);
    }
}
