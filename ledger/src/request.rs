//! Payment requests: asks for payment awaiting the payer's decision.

use payledger_common::{
    now, AccountId, Amount, Currency, LedgerError, RequestId, RequestStatus, Result, Timestamp,
    TransactionId,
};
use serde::{Deserialize, Serialize};

/// A request for `recipient` to be paid `value` by `sender`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Unique request ID.
    pub id: RequestId,
    /// Holding asked to pay (the target).
    pub sender: AccountId,
    /// Holding that asked to be paid (the requester).
    pub recipient: AccountId,
    /// Amount requested.
    pub value: Amount,
    /// Currency of both holdings.
    pub currency: Currency,
    /// Current status.
    pub status: RequestStatus,
    /// Transaction that settled the request, set only on acceptance.
    pub transaction_id: Option<TransactionId>,
    /// When the request was created.
    pub created_at: Timestamp,
    /// When the status last changed.
    pub updated_at: Timestamp,
}

impl PaymentRequest {
    /// Create a pending request from `requester` to `target`.
    pub fn new(requester: AccountId, target: AccountId, value: Amount, currency: Currency) -> Self {
        let created_at = now();
        Self {
            id: RequestId::new(),
            sender: target,
            recipient: requester,
            value,
            currency,
            status: RequestStatus::Pending,
            transaction_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Check whether `account` may move this request into `next`.
    ///
    /// Only the payer accepts or rejects; only the requester withdraws.
    pub fn permits(&self, account: AccountId, next: RequestStatus) -> bool {
        match next {
            RequestStatus::Accepted | RequestStatus::Rejected => account == self.sender,
            RequestStatus::Withdrawn => account == self.recipient,
            RequestStatus::Pending => false,
        }
    }

    /// Fail unless the request can move into `next`.
    pub fn ensure_transition(&self, next: RequestStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(LedgerError::InvalidStateTransition {
                from: self.status,
                to: next,
            })
        }
    }

    /// Move into `next`.
    pub fn transition_to(&mut self, next: RequestStatus) -> Result<()> {
        self.ensure_transition(next)?;
        self.status = next;
        self.updated_at = now();
        Ok(())
    }

    /// Mark accepted and link the settling transaction.
    pub fn accept(&mut self, transaction_id: TransactionId) -> Result<()> {
        self.transition_to(RequestStatus::Accepted)?;
        self.transaction_id = Some(transaction_id);
        Ok(())
    }
}

/// Which side of a request an account is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestRole {
    /// Requests the account has been asked to pay.
    Incoming,
    /// Requests the account made.
    Outgoing,
    /// Either side.
    #[default]
    Any,
}

/// Filter for listing requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFilter {
    /// Side of the request.
    pub role: RequestRole,
    /// Restrict to one status.
    pub status: Option<RequestStatus>,
}

impl RequestFilter {
    /// Pending requests the account has been asked to pay.
    pub fn pending_incoming() -> Self {
        Self {
            role: RequestRole::Incoming,
            status: Some(RequestStatus::Pending),
        }
    }

    /// Check if a request matches for `account`.
    pub fn matches(&self, account: AccountId, request: &PaymentRequest) -> bool {
        let side = match self.role {
            RequestRole::Incoming => request.sender == account,
            RequestRole::Outgoing => request.recipient == account,
            RequestRole::Any => request.sender == account || request.recipient == account,
        };
        side && self.status.map_or(true, |s| s == request.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> (AccountId, AccountId, PaymentRequest) {
        let requester = AccountId::new();
        let target = AccountId::new();
        let request = PaymentRequest::new(requester, target, Amount::new(50).unwrap(), Currency::Gbp);
        (requester, target, request)
    }

    #[test]
    fn test_new_request_is_pending() {
        let (requester, target, request) = pending();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.recipient, requester);
        assert_eq!(request.sender, target);
        assert!(request.transaction_id.is_none());
    }

    #[test]
    fn test_permissions() {
        let (requester, target, request) = pending();
        assert!(request.permits(target, RequestStatus::Accepted));
        assert!(request.permits(target, RequestStatus::Rejected));
        assert!(!request.permits(target, RequestStatus::Withdrawn));
        assert!(request.permits(requester, RequestStatus::Withdrawn));
        assert!(!request.permits(requester, RequestStatus::Accepted));
        assert!(!request.permits(AccountId::new(), RequestStatus::Rejected));
    }

    #[test]
    fn test_accept_links_transaction() {
        let (_, _, mut request) = pending();
        let tx_id = TransactionId::new();
        request.accept(tx_id).unwrap();
        assert_eq!(request.status, RequestStatus::Accepted);
        assert_eq!(request.transaction_id, Some(tx_id));
    }

    #[test]
    fn test_terminal_request_rejects_transitions() {
        let (_, _, mut request) = pending();
        request.transition_to(RequestStatus::Withdrawn).unwrap();

        assert_eq!(
            request.transition_to(RequestStatus::Accepted),
            Err(LedgerError::InvalidStateTransition {
                from: RequestStatus::Withdrawn,
                to: RequestStatus::Accepted,
            })
        );
        assert!(request.accept(TransactionId::new()).is_err());
        assert!(request.transaction_id.is_none());
    }

    #[test]
    fn test_filter() {
        let (requester, target, request) = pending();
        assert!(RequestFilter::pending_incoming().matches(target, &request));
        assert!(!RequestFilter::pending_incoming().matches(requester, &request));
        assert!(RequestFilter::default().matches(requester, &request));

        let accepted_only = RequestFilter {
            role: RequestRole::Any,
            status: Some(RequestStatus::Accepted),
        };
        assert!(!accepted_only.matches(target, &request));
    }
}
