//! Error types for ledger operations.

use crate::{AccountId, Currency, RequestId, RequestStatus};
use thiserror::Error;

/// Broad category of a [`LedgerError`], used by callers to decide how to
/// present or react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input. Nothing was mutated.
    Validation,
    /// Well-formed but disallowed by a ledger rule.
    BusinessRule,
    /// Unknown account, holding or request.
    NotFound,
    /// Transient storage failure. The caller may resubmit.
    Storage,
    /// A ledger invariant was violated. Never user-facing.
    Consistency,
}

/// Main error type for ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Invalid input.
    #[error("Invalid input: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Amount is zero or negative.
    #[error("Invalid amount {0}: amount must be positive")]
    InvalidAmount(i64),

    /// Sender balance does not cover the amount.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    /// Holdings are denominated in different currencies.
    #[error("Currency mismatch: sender holds {sender}, recipient holds {recipient}")]
    CurrencyMismatch { sender: Currency, recipient: Currency },

    /// Sender and recipient are the same holding.
    #[error("Cannot transfer funds to the same holding")]
    SelfTransfer,

    /// Request is not in a state that allows the transition.
    #[error("Invalid transition from {from} to {to}")]
    InvalidStateTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    /// Acting account is not the party allowed to perform the action.
    #[error("Account {account} is not permitted to {action} request {request}")]
    NotPermitted {
        account: AccountId,
        request: RequestId,
        action: &'static str,
    },

    /// Account name already taken.
    #[error("Account name already exists: {0}")]
    DuplicateAccount(String),

    /// Unknown account.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Account exists but has no holding.
    #[error("Holding not found for account {0}")]
    HoldingNotFound(AccountId),

    /// Unknown payment request.
    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),

    /// Storage failure. The operation was rolled back.
    #[error("Storage failure: {message}")]
    Storage { message: String, retryable: bool },

    /// Ledger invariant violated.
    #[error("Consistency failure: {0}")]
    Consistency(String),
}

impl LedgerError {
    /// Create a validation error for a specific field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable storage failure.
    pub fn transient(message: impl Into<String>) -> Self {
        LedgerError::Storage {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable storage failure.
    pub fn storage(message: impl Into<String>) -> Self {
        LedgerError::Storage {
            message: message.into(),
            retryable: false,
        }
    }

    /// Get the error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation { .. } | LedgerError::InvalidAmount(_) => ErrorKind::Validation,
            LedgerError::InsufficientFunds { .. }
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::SelfTransfer
            | LedgerError::InvalidStateTransition { .. }
            | LedgerError::NotPermitted { .. }
            | LedgerError::DuplicateAccount(_) => ErrorKind::BusinessRule,
            LedgerError::AccountNotFound(_)
            | LedgerError::HoldingNotFound(_)
            | LedgerError::RequestNotFound(_) => ErrorKind::NotFound,
            LedgerError::Storage { .. } => ErrorKind::Storage,
            LedgerError::Consistency(_) => ErrorKind::Consistency,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage { retryable: true, .. })
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::Validation { .. } => "VALIDATION_ERROR",
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::SelfTransfer => "SELF_TRANSFER",
            LedgerError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            LedgerError::NotPermitted { .. } => "NOT_PERMITTED",
            LedgerError::DuplicateAccount(_) => "DUPLICATE_ACCOUNT",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::HoldingNotFound(_) => "HOLDING_NOT_FOUND",
            LedgerError::RequestNotFound(_) => "REQUEST_NOT_FOUND",
            LedgerError::Storage { .. } => "STORAGE_FAILURE",
            LedgerError::Consistency(_) => "CONSISTENCY_FAILURE",
        }
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Storage => "Something went wrong, no money has moved. Please try again.".to_string(),
            ErrorKind::Consistency => "The service is temporarily unavailable.".to_string(),
            _ => match self {
                LedgerError::InsufficientFunds { .. } => {
                    "Sorry, you do not have enough money to make this payment".to_string()
                }
                LedgerError::SelfTransfer => "You cannot send money to yourself".to_string(),
                LedgerError::AccountNotFound(_) => {
                    "That user could not be found, are you sure you got their name right?"
                        .to_string()
                }
                LedgerError::DuplicateAccount(_) => {
                    "A user of that name already exists, please pick a new username".to_string()
                }
                other => other.to_string(),
            },
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(LedgerError::InvalidAmount(0).kind(), ErrorKind::Validation);
        assert_eq!(LedgerError::SelfTransfer.kind(), ErrorKind::BusinessRule);
        assert_eq!(
            LedgerError::AccountNotFound("ghost".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(LedgerError::transient("busy").kind(), ErrorKind::Storage);
        assert_eq!(
            LedgerError::Consistency("negative".into()).kind(),
            ErrorKind::Consistency
        );
    }

    #[test]
    fn test_retryable() {
        assert!(LedgerError::transient("lock timeout").is_retryable());
        assert!(!LedgerError::storage("disk full").is_retryable());
        assert!(!LedgerError::InsufficientFunds {
            required: 10,
            available: 5
        }
        .is_retryable());
    }

    #[test]
    fn test_user_messages_hide_internals() {
        let err = LedgerError::Consistency("holding 42 negative".into());
        assert!(!err.user_message().contains("42"));

        let err = LedgerError::transient("SQLITE_BUSY");
        assert!(err.user_message().contains("try again"));
    }
}
