//! Service configuration.

use std::time::Duration;

use payledger_common::Currency;
use payledger_ledger::{RetryPolicy, DEFAULT_OPENING_BALANCE};

/// Database URL selecting the in-memory store.
pub const MEMORY_DATABASE_URL: &str = "memory";

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// `memory` (or empty) for the in-memory store, `sqlite:...` for SQLite.
    pub database_url: String,
    /// Balance granted to every new account, in minor units.
    pub opening_balance: u64,
    /// Currency for accounts created without an explicit one.
    pub default_currency: Currency,
    /// Transactions per history page when the caller gives no limit.
    pub page_size: usize,
    /// Largest page a caller may ask for.
    pub max_page_size: usize,
    /// Retry of transient storage failures.
    pub retry: RetryPolicy,
    /// How long a writer waits for a row or database lock.
    pub lock_timeout: Duration,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: MEMORY_DATABASE_URL.to_string(),
            opening_balance: DEFAULT_OPENING_BALANCE,
            default_currency: Currency::Gbp,
            page_size: 20,
            max_page_size: 500,
            retry: RetryPolicy::default(),
            lock_timeout: Duration::from_secs(2),
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables. Unset or unparseable
    /// values keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("PAYLEDGER_DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(balance) = std::env::var("PAYLEDGER_OPENING_BALANCE") {
            if let Ok(balance) = balance.parse() {
                config.opening_balance = balance;
            }
        }

        if let Ok(currency) = std::env::var("PAYLEDGER_DEFAULT_CURRENCY") {
            if let Ok(currency) = currency.parse() {
                config.default_currency = currency;
            }
        }

        if let Ok(size) = std::env::var("PAYLEDGER_PAGE_SIZE") {
            if let Ok(size) = size.parse() {
                config.page_size = size;
            }
        }

        if let Ok(attempts) = std::env::var("PAYLEDGER_MAX_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse() {
                config.retry.max_attempts = attempts;
            }
        }

        if let Ok(ms) = std::env::var("PAYLEDGER_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.lock_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Whether the in-memory store is selected.
    pub fn uses_memory_store(&self) -> bool {
        let url = self.database_url.trim();
        url.is_empty() || url == MEMORY_DATABASE_URL
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.uses_memory_store() && !self.database_url.starts_with("sqlite:") {
            return Err(format!(
                "Unsupported database URL {:?}, expected `memory` or `sqlite:...`",
                self.database_url
            ));
        }

        if self.page_size == 0 {
            return Err("Page size cannot be 0".to_string());
        }

        if self.page_size > self.max_page_size {
            return Err("Page size cannot exceed max page size".to_string());
        }

        if self.retry.max_attempts == 0 {
            return Err("Max attempts cannot be 0".to_string());
        }

        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err("Initial backoff cannot exceed max backoff".to_string());
        }

        if self.lock_timeout.is_zero() {
            return Err("Lock timeout cannot be 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.uses_memory_store());
        assert_eq!(config.opening_balance, 1000);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ServiceConfig::default();
        config.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.retry.initial_backoff = Duration::from_secs(10);
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.database_url = "postgres://localhost/ledger".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_selection() {
        let mut config = ServiceConfig::default();
        config.database_url = String::new();
        assert!(config.uses_memory_store());

        config.database_url = "sqlite://ledger.db".to_string();
        assert!(!config.uses_memory_store());
        assert!(config.validate().is_ok());
    }
}
