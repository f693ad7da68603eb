//! SQLite-backed ledger store.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info};

use payledger_common::{
    from_micros, now, to_micros, AccountId, Amount, Currency, LedgerError, RequestId,
    RequestStatus, Result, Timestamp, TransactionId,
};

use crate::account::{Account, Holding};
use crate::balance::PaymentCounts;
use crate::journal::{paginate, TransactionCursor, TransactionPage, TransactionRecord};
use crate::request::{PaymentRequest, RequestFilter};
use crate::store::{LedgerSnapshot, LedgerStore, LedgerTx};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS holdings (
        account_id TEXT PRIMARY KEY NOT NULL REFERENCES accounts(id),
        balance INTEGER NOT NULL CHECK (balance >= 0),
        opening_balance INTEGER NOT NULL CHECK (opening_balance >= 0),
        currency TEXT NOT NULL CHECK (currency IN ('USD', 'GBP', 'EUR')),
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS requests (
        id TEXT PRIMARY KEY NOT NULL,
        sender_id TEXT NOT NULL REFERENCES holdings(account_id),
        recipient_id TEXT NOT NULL REFERENCES holdings(account_id),
        value INTEGER NOT NULL CHECK (value > 0),
        currency TEXT NOT NULL,
        status TEXT NOT NULL
            CHECK (status IN ('pending', 'accepted', 'rejected', 'withdrawn')),
        transaction_id TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY NOT NULL,
        sender_id TEXT NOT NULL REFERENCES holdings(account_id),
        recipient_id TEXT NOT NULL REFERENCES holdings(account_id),
        value INTEGER NOT NULL CHECK (value > 0),
        currency TEXT NOT NULL,
        executed INTEGER NOT NULL,
        request_id TEXT UNIQUE REFERENCES requests(id),
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_transactions_sender ON transactions (sender_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_recipient ON transactions (recipient_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_requests_sender ON requests (sender_id)",
    "CREATE INDEX IF NOT EXISTS idx_requests_recipient ON requests (recipient_id)",
];

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Ledger store persisted in a SQLite database.
#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Open (creating if needed) the database at `url` and ensure the schema
    /// exists. Writers wait up to `busy_timeout` for the database lock.
    pub async fn connect(url: &str, busy_timeout: Duration) -> Result<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(storage_error)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is its own database, so keep exactly
        // one alive for the pool's lifetime.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(storage_error)?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(url = %url, in_memory, "SQLite ledger store ready");
        Ok(store)
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;
        }
        Ok(())
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await.map_err(storage_error)?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        sqlx::query("SELECT id, name, created_at FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?
            .map(|row| account_from_row(&row))
            .transpose()
    }

    async fn account_by_name(&self, name: &str) -> Result<Option<Account>> {
        sqlx::query("SELECT id, name, created_at FROM accounts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?
            .map(|row| account_from_row(&row))
            .transpose()
    }

    async fn holding(&self, account: AccountId) -> Result<Option<Holding>> {
        sqlx::query(
            "SELECT account_id, balance, opening_balance, currency, updated_at
             FROM holdings WHERE account_id = ?",
        )
        .bind(account.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .map(|row| holding_from_row(&row))
        .transpose()
    }

    async fn request(&self, id: RequestId) -> Result<Option<PaymentRequest>> {
        sqlx::query(
            "SELECT id, sender_id, recipient_id, value, currency, status, transaction_id,
                    created_at, updated_at
             FROM requests WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .map(|row| request_from_row(&row))
        .transpose()
    }

    async fn requests_for(
        &self,
        account: AccountId,
        filter: RequestFilter,
    ) -> Result<Vec<PaymentRequest>> {
        let id = account.to_string();
        let rows = sqlx::query(
            "SELECT id, sender_id, recipient_id, value, currency, status, transaction_id,
                    created_at, updated_at
             FROM requests
             WHERE sender_id = ? OR recipient_id = ?
             ORDER BY created_at DESC, id DESC",
        )
        .bind(id.as_str())
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            let request = request_from_row(row)?;
            if filter.matches(account, &request) {
                requests.push(request);
            }
        }
        Ok(requests)
    }

    async fn transactions_for(
        &self,
        account: AccountId,
        cursor: Option<TransactionCursor>,
        limit: usize,
    ) -> Result<TransactionPage> {
        let id = account.to_string();
        let (before_micros, before_id) = match cursor {
            Some(c) => (to_micros(c.created_at), c.id.to_string()),
            None => (i64::MAX, String::new()),
        };
        let fetch = i64::try_from(limit.saturating_add(1)).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            "SELECT id, sender_id, recipient_id, value, currency, executed, request_id,
                    created_at
             FROM transactions
             WHERE (sender_id = ? OR recipient_id = ?)
               AND (created_at < ? OR (created_at = ? AND id < ?))
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(id.as_str())
        .bind(id.as_str())
        .bind(before_micros)
        .bind(before_micros)
        .bind(before_id)
        .bind(fetch)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let records = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(paginate(records, cursor, limit))
    }

    async fn payment_counts(&self, account: AccountId) -> Result<PaymentCounts> {
        let id = account.to_string();
        let row = sqlx::query(
            "SELECT
                COALESCE(SUM(CASE WHEN sender_id = ? THEN 1 ELSE 0 END), 0) AS made,
                COALESCE(SUM(CASE WHEN recipient_id = ? THEN 1 ELSE 0 END), 0) AS received
             FROM transactions",
        )
        .bind(id.as_str())
        .bind(id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(PaymentCounts {
            made: unsigned(row.try_get("made").map_err(storage_error)?)?,
            received: unsigned(row.try_get("received").map_err(storage_error)?)?,
        })
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let holdings = sqlx::query(
            "SELECT account_id, balance, opening_balance, currency, updated_at FROM holdings",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(storage_error)?
        .iter()
        .map(holding_from_row)
        .collect::<Result<Vec<_>>>()?;

        let transactions = sqlx::query(
            "SELECT id, sender_id, recipient_id, value, currency, executed, request_id,
                    created_at
             FROM transactions
             ORDER BY created_at, id",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(storage_error)?
        .iter()
        .map(transaction_from_row)
        .collect::<Result<Vec<_>>>()?;

        tx.rollback().await.map_err(storage_error)?;
        Ok(LedgerSnapshot {
            holdings,
            transactions,
        })
    }
}

/// Transaction handle wrapping a pooled SQLite transaction. Rows are locked
/// by writing them first, which takes the database write lock for the rest
/// of the transaction.
struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteTx {
    async fn holding(&mut self, account: AccountId) -> Result<Holding> {
        sqlx::query(
            "SELECT account_id, balance, opening_balance, currency, updated_at
             FROM holdings WHERE account_id = ?",
        )
        .bind(account.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_error)?
        .map(|row| holding_from_row(&row))
        .transpose()?
        .ok_or(LedgerError::HoldingNotFound(account))
    }
}

#[async_trait]
impl LedgerTx for SqliteTx {
    async fn insert_account(&mut self, account: &Account, holding: &Holding) -> Result<()> {
        sqlx::query("INSERT INTO accounts (id, name, created_at) VALUES (?, ?, ?)")
            .bind(account.id.to_string())
            .bind(&account.name)
            .bind(to_micros(account.created_at))
            .execute(&mut *self.tx)
            .await
            .map_err(|err| match &err {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    LedgerError::DuplicateAccount(account.name.clone())
                }
                _ => storage_error(err),
            })?;

        sqlx::query(
            "INSERT INTO holdings (account_id, balance, opening_balance, currency, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(holding.account_id.to_string())
        .bind(signed(holding.balance)?)
        .bind(signed(holding.opening_balance)?)
        .bind(holding.currency.code())
        .bind(to_micros(holding.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;

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

        sqlx::query("UPDATE holdings SET balance = balance WHERE account_id IN (?, ?)")
            .bind(first.to_string())
            .bind(second.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;

        let first = self.holding(first).await?;
        let second = self.holding(second).await?;
        Ok((first, second))
    }

    async fn set_balance(&mut self, account: AccountId, balance: u64) -> Result<()> {
        let result =
            sqlx::query("UPDATE holdings SET balance = ?, updated_at = ? WHERE account_id = ?")
                .bind(signed(balance)?)
                .bind(to_micros(now()))
                .bind(account.to_string())
                .execute(&mut *self.tx)
                .await
                .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::HoldingNotFound(account));
        }
        Ok(())
    }

    async fn insert_transaction(&mut self, record: &TransactionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO transactions
                (id, sender_id, recipient_id, value, currency, executed, request_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.sender.to_string())
        .bind(record.recipient.to_string())
        .bind(signed(record.value.value())?)
        .bind(record.currency.code())
        .bind(record.executed)
        .bind(record.request_id.map(|id| id.to_string()))
        .bind(to_micros(record.created_at))
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn insert_request(&mut self, request: &PaymentRequest) -> Result<()> {
        sqlx::query(
            "INSERT INTO requests
                (id, sender_id, recipient_id, value, currency, status, transaction_id,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(request.id.to_string())
        .bind(request.sender.to_string())
        .bind(request.recipient.to_string())
        .bind(signed(request.value.value())?)
        .bind(request.currency.code())
        .bind(request.status.as_str())
        .bind(request.transaction_id.map(|id| id.to_string()))
        .bind(to_micros(request.created_at))
        .bind(to_micros(request.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn request_for_update(&mut self, id: RequestId) -> Result<PaymentRequest> {
        sqlx::query("UPDATE requests SET status = status WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;

        sqlx::query(
            "SELECT id, sender_id, recipient_id, value, currency, status, transaction_id,
                    created_at, updated_at
             FROM requests WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_error)?
        .map(|row| request_from_row(&row))
        .transpose()?
        .ok_or(LedgerError::RequestNotFound(id))
    }

    async fn update_request(&mut self, request: &PaymentRequest) -> Result<()> {
        let result = sqlx::query(
            "UPDATE requests SET status = ?, transaction_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(request.status.as_str())
        .bind(request.transaction_id.map(|id| id.to_string()))
        .bind(to_micros(request.updated_at))
        .bind(request.id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::RequestNotFound(request.id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(storage_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("Rolling back SQLite transaction");
        self.tx.rollback().await.map_err(storage_error)
    }
}

/// Map a driver error onto the ledger taxonomy. Lock contention is
/// retryable; constraint violations mean an invariant was about to break.
fn storage_error(err: sqlx::Error) -> LedgerError {
    match &err {
        sqlx::Error::PoolTimedOut => LedgerError::transient(err.to_string()),
        sqlx::Error::Database(db) => {
            let code = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .unwrap_or_default();
            if matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED) {
                LedgerError::transient(db.message().to_string())
            } else if db.is_check_violation() || db.is_foreign_key_violation() {
                LedgerError::Consistency(db.message().to_string())
            } else if db.is_unique_violation() {
                LedgerError::Consistency(format!("duplicate row: {}", db.message()))
            } else {
                LedgerError::storage(db.message().to_string())
            }
        }
        _ => LedgerError::storage(err.to_string()),
    }
}

fn corrupt(column: &str, err: impl Display) -> LedgerError {
    LedgerError::Consistency(format!("corrupt {column} column: {err}"))
}

fn signed(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        LedgerError::Consistency(format!("value {value} exceeds storage range"))
    })
}

fn unsigned(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|err| corrupt("balance", err))
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column).map_err(storage_error)
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<Timestamp> {
    let micros: i64 = get(row, column)?;
    from_micros(micros).ok_or_else(|| corrupt(column, micros))
}

fn account_id(row: &SqliteRow, column: &str) -> Result<AccountId> {
    let raw: String = get(row, column)?;
    AccountId::parse(&raw).map_err(|err| corrupt(column, err))
}

fn currency(row: &SqliteRow) -> Result<Currency> {
    let raw: String = get(row, "currency")?;
    raw.parse().map_err(|err| corrupt("currency", err))
}

fn amount(row: &SqliteRow) -> Result<Amount> {
    let raw: i64 = get(row, "value")?;
    Amount::try_from(raw).map_err(|err| corrupt("value", err))
}

fn account_from_row(row: &SqliteRow) -> Result<Account> {
    Ok(Account {
        id: account_id(row, "id")?,
        name: get(row, "name")?,
        created_at: timestamp(row, "created_at")?,
    })
}

fn holding_from_row(row: &SqliteRow) -> Result<Holding> {
    Ok(Holding {
        account_id: account_id(row, "account_id")?,
        balance: unsigned(get(row, "balance")?)?,
        opening_balance: unsigned(get(row, "opening_balance")?)?,
        currency: currency(row)?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn request_from_row(row: &SqliteRow) -> Result<PaymentRequest> {
    let id: String = get(row, "id")?;
    let status: String = get(row, "status")?;
    let transaction_id: Option<String> = get(row, "transaction_id")?;

    Ok(PaymentRequest {
        id: RequestId::parse(&id).map_err(|err| corrupt("id", err))?,
        sender: account_id(row, "sender_id")?,
        recipient: account_id(row, "recipient_id")?,
        value: amount(row)?,
        currency: currency(row)?,
        status: RequestStatus::from_str(&status).map_err(|err| corrupt("status", err))?,
        transaction_id: transaction_id
            .map(|raw| TransactionId::parse(&raw))
            .transpose()
            .map_err(|err| corrupt("transaction_id", err))?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<TransactionRecord> {
    let id: String = get(row, "id")?;
    let request_id: Option<String> = get(row, "request_id")?;

    Ok(TransactionRecord {
        id: TransactionId::parse(&id).map_err(|err| corrupt("id", err))?,
        sender: account_id(row, "sender_id")?,
        recipient: account_id(row, "recipient_id")?,
        value: amount(row)?,
        currency: currency(row)?,
        executed: get(row, "executed")?,
        request_id: request_id
            .map(|raw| RequestId::parse(&raw))
            .transpose()
            .map_err(|err| corrupt("request_id", err))?,
        created_at: timestamp(row, "created_at")?,
    })
}
