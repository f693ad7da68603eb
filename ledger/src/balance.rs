//! Read-only balance views.

use std::collections::BTreeMap;

use payledger_common::{AccountId, Currency, Money};
use serde::{Deserialize, Serialize};

use crate::account::{Account, Holding};

/// Number of transfers an account has sent and received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCounts {
    /// Transfers where the account was the sender.
    pub made: u64,
    /// Transfers where the account was the recipient.
    pub received: u64,
}

/// Summary shown on an account page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Account identifier.
    pub account_id: AccountId,
    /// Account name.
    pub name: String,
    /// Current balance.
    pub balance: Money,
    /// Transfers sent.
    pub payments_made: u64,
    /// Transfers received.
    pub payments_received: u64,
}

impl AccountSummary {
    /// Build a summary from an account, its holding and its payment counts.
    pub fn new(account: &Account, holding: &Holding, counts: PaymentCounts) -> Self {
        Self {
            account_id: account.id,
            name: account.name.clone(),
            balance: holding.money(),
            payments_made: counts.made,
            payments_received: counts.received,
        }
    }

    /// Balance formatted for display, e.g. `10.00 GBP`.
    pub fn balance_str(&self) -> String {
        self.balance.to_string()
    }
}

/// Sum of balances per currency.
pub fn totals_by_currency<'a>(
    holdings: impl IntoIterator<Item = &'a Holding>,
) -> BTreeMap<Currency, u128> {
    let mut totals = BTreeMap::new();
    for holding in holdings {
        *totals.entry(holding.currency).or_insert(0u128) += u128::from(holding.balance);
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let account = Account::new("alice");
        let holding = Holding::open(account.id, Currency::Gbp, 1000);
        let summary = AccountSummary::new(
            &account,
            &holding,
            PaymentCounts {
                made: 2,
                received: 1,
            },
        );

        assert_eq!(summary.name, "alice");
        assert_eq!(summary.balance_str(), "10.00 GBP");
        assert_eq!(summary.payments_made, 2);
        assert_eq!(summary.payments_received, 1);
    }

    #[test]
    fn test_totals_by_currency() {
        let holdings = vec![
            Holding::open(AccountId::new(), Currency::Gbp, 1000),
            Holding::open(AccountId::new(), Currency::Gbp, 500),
            Holding::open(AccountId::new(), Currency::Usd, 70),
        ];

        let totals = totals_by_currency(&holdings);
        assert_eq!(totals.get(&Currency::Gbp), Some(&1500));
        assert_eq!(totals.get(&Currency::Usd), Some(&70));
        assert_eq!(totals.get(&Currency::Eur), None);
    }
}
