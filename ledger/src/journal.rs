//! Transaction records: the append-only audit log of completed transfers.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use payledger_common::{
    from_micros, now, to_micros, AccountId, Amount, Currency, LedgerError, Money, RequestId,
    Timestamp, TransactionId,
};
use serde::{Deserialize, Serialize};

/// Immutable record of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique record ID.
    pub id: TransactionId,
    /// Holding that was debited.
    pub sender: AccountId,
    /// Holding that was credited.
    pub recipient: AccountId,
    /// Amount moved.
    pub value: Amount,
    /// Currency of both holdings.
    pub currency: Currency,
    /// Whether the movement was applied. Always true for records written by
    /// the transfer engine.
    pub executed: bool,
    /// Payment request this transfer settled, if any.
    pub request_id: Option<RequestId>,
    /// When the transfer committed.
    pub created_at: Timestamp,
}

impl TransactionRecord {
    /// Create a record for an executed transfer.
    pub fn executed(
        sender: AccountId,
        recipient: AccountId,
        value: Amount,
        currency: Currency,
        request_id: Option<RequestId>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            sender,
            recipient,
            value,
            currency,
            executed: true,
            request_id,
            created_at: now(),
        }
    }

    /// Check whether an account is on either side of the record.
    pub fn involves(&self, account: AccountId) -> bool {
        self.sender == account || self.recipient == account
    }

    /// Amount moved as displayable money.
    pub fn money(&self) -> Money {
        Money::new(self.value.value(), self.currency)
    }

    /// Position of this record in the history ordering.
    pub fn cursor(&self) -> TransactionCursor {
        TransactionCursor {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// Position in a most-recent-first transaction listing.
///
/// A page that starts after a cursor contains only records strictly older
/// than it, so listings can be resumed even while new transfers commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCursor {
    /// Timestamp of the last record returned.
    pub created_at: Timestamp,
    /// ID of the last record returned (tie breaker).
    pub id: TransactionId,
}

impl TransactionCursor {
    /// Check if a record comes after this cursor in newest-first order.
    pub fn precedes(&self, record: &TransactionRecord) -> bool {
        (record.created_at, record.id) < (self.created_at, self.id)
    }
}

impl fmt::Display for TransactionCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", to_micros(self.created_at), self.id)
    }
}

impl FromStr for TransactionCursor {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::validation("cursor", format!("malformed cursor: {s}"));
        let (micros, id) = s.split_once(':').ok_or_else(invalid)?;
        let created_at = micros
            .parse::<i64>()
            .ok()
            .and_then(from_micros)
            .ok_or_else(invalid)?;
        let id = TransactionId::parse(id).map_err(|_| invalid())?;
        Ok(Self { created_at, id })
    }
}

/// One page of a transaction listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionPage {
    /// Records, most recent first.
    pub records: Vec<TransactionRecord>,
    /// Cursor for the next page, if more records exist.
    pub next: Option<TransactionCursor>,
}

/// Newest-first ordering on `(created_at, id)`.
pub fn newest_first(a: &TransactionRecord, b: &TransactionRecord) -> Ordering {
    (b.created_at, b.id).cmp(&(a.created_at, a.id))
}

/// Build a page from records already sorted newest first.
pub fn paginate(
    sorted: impl IntoIterator<Item = TransactionRecord>,
    cursor: Option<TransactionCursor>,
    limit: usize,
) -> TransactionPage {
    let mut records: Vec<TransactionRecord> = sorted
        .into_iter()
        .filter(|r| cursor.map_or(true, |c| c.precedes(r)))
        .take(limit.saturating_add(1))
        .collect();

    let next = if records.len() > limit {
        records.truncate(limit);
        records.last().map(TransactionRecord::cursor)
    } else {
        None
    };

    TransactionPage { records, next }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record_at(offset_secs: i64) -> TransactionRecord {
        let mut record = TransactionRecord::executed(
            AccountId::new(),
            AccountId::new(),
            Amount::new(10).unwrap(),
            Currency::Gbp,
            None,
        );
        record.created_at = record.created_at + Duration::seconds(offset_secs);
        record
    }

    #[test]
    fn test_executed_record() {
        let sender = AccountId::new();
        let recipient = AccountId::new();
        let record = TransactionRecord::executed(
            sender,
            recipient,
            Amount::new(300).unwrap(),
            Currency::Gbp,
            None,
        );

        assert!(record.executed);
        assert!(record.involves(sender));
        assert!(record.involves(recipient));
        assert!(!record.involves(AccountId::new()));
        assert_eq!(record.money().to_string(), "3.00 GBP");
    }

    #[test]
    fn test_cursor_string_roundtrip() {
        let cursor = record_at(0).cursor();
        let parsed: TransactionCursor = cursor.to_string().parse().unwrap();
        assert_eq!(parsed, cursor);

        assert!("garbage".parse::<TransactionCursor>().is_err());
        assert!("12:not-a-uuid".parse::<TransactionCursor>().is_err());
    }

    #[test]
    fn test_paginate_walks_all_records() {
        let mut records: Vec<_> = (0..5).map(record_at).collect();
        records.sort_by(newest_first);

        let first = paginate(records.clone(), None, 2);
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.records[0].id, records[0].id);
        let cursor = first.next.unwrap();

        let second = paginate(records.clone(), Some(cursor), 2);
        assert_eq!(second.records[0].id, records[2].id);

        let third = paginate(records.clone(), second.next, 2);
        assert_eq!(third.records.len(), 1);
        assert!(third.next.is_none());
    }
}
