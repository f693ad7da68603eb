//! Account and holding definitions for the ledger.

use payledger_common::{
    now, AccountId, Amount, Currency, LedgerError, Money, Result, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Opening balance granted once when an account is created, in minor units.
pub const DEFAULT_OPENING_BALANCE: u64 = 1000;

/// A ledger account. Identity is immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Unique account name.
    pub name: String,
    /// When the account was created.
    pub created_at: Timestamp,
}

impl Account {
    /// Create a new account.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(),
            name: name.into(),
            created_at: now(),
        }
    }
}

/// The balance owned by an account, one per account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    /// Owning account (also the holding's key).
    pub account_id: AccountId,
    /// Current balance in minor units.
    pub balance: u64,
    /// Currency, fixed at creation.
    pub currency: Currency,
    /// Balance granted at creation.
    pub opening_balance: u64,
    /// When the balance last changed.
    pub updated_at: Timestamp,
}

impl Holding {
    /// Open a holding with its opening grant.
    pub fn open(account_id: AccountId, currency: Currency, opening_balance: u64) -> Self {
        Self {
            account_id,
            balance: opening_balance,
            currency,
            opening_balance,
            updated_at: now(),
        }
    }

    /// Check if the holding covers an amount.
    pub fn has_sufficient_funds(&self, amount: Amount) -> bool {
        self.balance >= amount.value()
    }

    /// Balance as displayable money.
    pub fn money(&self) -> Money {
        Money::new(self.balance, self.currency)
    }

    /// Balance after debiting `amount`.
    pub fn debited(&self, amount: Amount) -> Result<u64> {
        self.balance
            .checked_sub(amount.value())
            .ok_or(LedgerError::InsufficientFunds {
                required: amount.value(),
                available: self.balance,
            })
    }

    /// Balance after crediting `amount`.
    pub fn credited(&self, amount: Amount) -> Result<u64> {
        self.balance.checked_add(amount.value()).ok_or_else(|| {
            LedgerError::Consistency(format!(
                "balance overflow crediting {} to holding {}",
                amount, self.account_id
            ))
        })
    }
}
