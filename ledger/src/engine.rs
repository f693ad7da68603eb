//! Core transfer engine.
//!
//! Every balance change goes through [`TransferEngine::transfer_within`]:
//! both holdings are locked, re-validated against their locked state, and
//! debited/credited together with the audit record in one store transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use payledger_common::{AccountId, Amount, Currency, ErrorKind, LedgerError, RequestId, Result};

use crate::account::{Account, Holding};
use crate::balance::totals_by_currency;
use crate::journal::TransactionRecord;
use crate::retry::RetryPolicy;
use crate::store::{finish, LedgerStore, LedgerTx};

/// Result of a full-ledger audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Holdings audited.
    pub holdings: usize,
    /// Transaction records replayed.
    pub transactions: usize,
    /// Sum of all balances per currency.
    pub totals: BTreeMap<Currency, u128>,
}

/// Moves money between holdings.
pub struct TransferEngine {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
}

impl TransferEngine {
    /// Create an engine over a store.
    pub fn new(store: Arc<dyn LedgerStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Retry policy applied to every write.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Create an account together with its holding and opening balance.
    #[instrument(skip(self))]
    pub async fn open_account(
        &self,
        name: &str,
        currency: Currency,
        opening_balance: u64,
    ) -> Result<(Account, Holding)> {
        let account = Account::new(name);
        let holding = Holding::open(account.id, currency, opening_balance);

        self.retry
            .run("open_account", || self.insert_account_once(&account, &holding))
            .await?;

        info!(
            account_id = %account.id,
            name = %account.name,
            currency = %currency,
            opening_balance,
            "Account opened"
        );
        Ok((account, holding))
    }

    async fn insert_account_once(&self, account: &Account, holding: &Holding) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let result = tx.insert_account(account, holding).await;
        finish(tx, result).await
    }

    /// Move `amount` minor units from `sender` to `recipient`.
    ///
    /// Checks run in a fixed order (amount, self-transfer, existence,
    /// currency, funds) so the first failing rule is the one reported.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        sender: AccountId,
        recipient: AccountId,
        amount: i64,
    ) -> Result<TransactionRecord> {
        let result = self.try_transfer(sender, recipient, amount).await;
        match &result {
            Ok(record) => info!(
                transaction_id = %record.id,
                sender = %sender,
                recipient = %recipient,
                amount = %record.money(),
                "Transfer executed"
            ),
            Err(err) if err.kind() == ErrorKind::Consistency => error!(
                sender = %sender,
                recipient = %recipient,
                amount,
                code = err.error_code(),
                error = %err,
                "Transfer failed a ledger invariant"
            ),
            Err(err) => warn!(
                sender = %sender,
                recipient = %recipient,
                amount,
                code = err.error_code(),
                error = %err,
                "Transfer rejected"
            ),
        }
        result
    }

    async fn try_transfer(
        &self,
        sender: AccountId,
        recipient: AccountId,
        amount: i64,
    ) -> Result<TransactionRecord> {
        let amount = Amount::try_from(amount)?;
        if sender == recipient {
            return Err(LedgerError::SelfTransfer);
        }

        let from = self.holding(sender).await?;
        let to = self.holding(recipient).await?;
        ensure_same_currency(&from, &to)?;
        if !from.has_sufficient_funds(amount) {
            return Err(LedgerError::InsufficientFunds {
                required: amount.value(),
                available: from.balance,
            });
        }

        self.retry
            .run("transfer", || self.transfer_once(sender, recipient, amount))
            .await
    }

    async fn transfer_once(
        &self,
        sender: AccountId,
        recipient: AccountId,
        amount: Amount,
    ) -> Result<TransactionRecord> {
        let mut tx = self.store.begin().await?;
        let result = self
            .transfer_within(tx.as_mut(), sender, recipient, amount, None)
            .await;
        finish(tx, result).await
    }

    /// Apply a transfer inside an open store transaction. The caller commits.
    ///
    /// Validation is repeated against the locked holdings, since committed
    /// state may have moved since any earlier read.
    pub async fn transfer_within(
        &self,
        tx: &mut dyn LedgerTx,
        sender: AccountId,
        recipient: AccountId,
        amount: Amount,
        request_id: Option<RequestId>,
    ) -> Result<TransactionRecord> {
        let (from, to) = tx.holdings_for_update(sender, recipient).await?;
        ensure_same_currency(&from, &to)?;

        let debited = from.debited(amount)?;
        let credited = to.credited(amount)?;

        let before = u128::from(from.balance) + u128::from(to.balance);
        let after = u128::from(debited) + u128::from(credited);
        if before != after {
            error!(%before, %after, "Transfer would not conserve money");
            return Err(LedgerError::Consistency(format!(
                "transfer changes total from {before} to {after}"
            )));
        }

        tx.set_balance(sender, debited).await?;
        tx.set_balance(recipient, credited).await?;

        let record = TransactionRecord::executed(sender, recipient, amount, from.currency, request_id);
        tx.insert_transaction(&record).await?;
        Ok(record)
    }

    /// Committed holding of an account.
    pub async fn holding(&self, account: AccountId) -> Result<Holding> {
        self.store
            .holding(account)
            .await?
            .ok_or(LedgerError::HoldingNotFound(account))
    }

    /// Replay the audit log over every holding's opening balance and check
    /// it reproduces the current balances.
    #[instrument(skip(self))]
    pub async fn verify_integrity(&self) -> Result<IntegrityReport> {
        let snapshot = self.store.snapshot().await?;

        let mut expected: HashMap<AccountId, (Currency, i128)> = snapshot
            .holdings
            .iter()
            .map(|h| (h.account_id, (h.currency, i128::from(h.opening_balance))))
            .collect();

        for record in &snapshot.transactions {
            if !record.executed {
                continue;
            }
            let value = i128::from(record.value.value());
            for (account, delta) in [(record.sender, -value), (record.recipient, value)] {
                let (currency, balance) = expected.get_mut(&account).ok_or_else(|| {
                    integrity_failure(format!(
                        "transaction {} references unknown holding {account}",
                        record.id
                    ))
                })?;
                if *currency != record.currency {
                    return Err(integrity_failure(format!(
                        "transaction {} is in {} but holding {account} is in {currency}",
                        record.id, record.currency
                    )));
                }
                *balance += delta;
            }
        }

        for holding in &snapshot.holdings {
            let replayed = expected
                .get(&holding.account_id)
                .map(|(_, balance)| *balance)
                .unwrap_or_default();
            if replayed != i128::from(holding.balance) {
                return Err(integrity_failure(format!(
                    "holding {} has balance {} but its history gives {replayed}",
                    holding.account_id, holding.balance
                )));
            }
        }

        let report = IntegrityReport {
            holdings: snapshot.holdings.len(),
            transactions: snapshot.transactions.len(),
            totals: totals_by_currency(&snapshot.holdings),
        };
        info!(
            holdings = report.holdings,
            transactions = report.transactions,
            "Ledger integrity verified"
        );
        Ok(report)
    }
}

fn ensure_same_currency(from: &Holding, to: &Holding) -> Result<()> {
    if from.currency == to.currency {
        Ok(())
    } else {
        Err(LedgerError::CurrencyMismatch {
            sender: from.currency,
            recipient: to.currency,
        })
    }
}

fn integrity_failure(message: String) -> LedgerError {
    error!(%message, "Ledger integrity check failed");
    LedgerError::Consistency(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;

    fn engine() -> TransferEngine {
        TransferEngine::new(Arc::new(MemoryLedgerStore::new()), RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_open_account() {
        let engine = engine();
        let (account, holding) = engine.open_account("alice", Currency::Gbp, 1000).await.unwrap();

        assert_eq!(holding.account_id, account.id);
        assert_eq!(engine.holding(account.id).await.unwrap().balance, 1000);
    }

    #[tokio::test]
    async fn test_transfer_moves_money() {
        let engine = engine();
        let (alice, _) = engine.open_account("alice", Currency::Gbp, 1000).await.unwrap();
        let (bob, _) = engine.open_account("bob", Currency::Gbp, 1000).await.unwrap();

        let record = engine.transfer(alice.id, bob.id, 300).await.unwrap();

        assert!(record.executed);
        assert_eq!(record.value.value(), 300);
        assert_eq!(engine.holding(alice.id).await.unwrap().balance, 700);
        assert_eq!(engine.holding(bob.id).await.unwrap().balance, 1300);
    }

    #[tokio::test]
    async fn test_check_order() {
        let engine = engine();
        let (alice, _) = engine.open_account("alice", Currency::Gbp, 10).await.unwrap();
        let (dollars, _) = engine.open_account("dollars", Currency::Usd, 10).await.unwrap();

        // A non-positive amount wins over every other problem.
        assert_eq!(
            engine.transfer(alice.id, alice.id, 0).await,
            Err(LedgerError::InvalidAmount(0))
        );
        assert_eq!(
            engine.transfer(alice.id, alice.id, 5).await,
            Err(LedgerError::SelfTransfer)
        );
        // Currency is checked before funds.
        assert!(matches!(
            engine.transfer(alice.id, dollars.id, 500).await,
            Err(LedgerError::CurrencyMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_integrity() {
        let engine = engine();
        let (alice, _) = engine.open_account("alice", Currency::Gbp, 1000).await.unwrap();
        let (bob, _) = engine.open_account("bob", Currency::Gbp, 1000).await.unwrap();
        engine.transfer(alice.id, bob.id, 250).await.unwrap();
        engine.transfer(bob.id, alice.id, 50).await.unwrap();

        let report = engine.verify_integrity().await.unwrap();
        assert_eq!(report.holdings, 2);
        assert_eq!(report.transactions, 2);
        assert_eq!(report.totals.get(&Currency::Gbp), Some(&2000));
    }
}
