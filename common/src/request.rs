//! Payment request status and its state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

/// Lifecycle state of a payment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Awaiting a decision. The only initial state.
    Pending,
    /// Payer accepted and the transfer committed.
    Accepted,
    /// Payer declined.
    Rejected,
    /// Requester withdrew the request.
    Withdrawn,
}

impl RequestStatus {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[RequestStatus] {
        match self {
            RequestStatus::Pending => &[
                RequestStatus::Accepted,
                RequestStatus::Rejected,
                RequestStatus::Withdrawn,
            ],
            RequestStatus::Accepted | RequestStatus::Rejected | RequestStatus::Withdrawn => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Storage code.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            "withdrawn" => Ok(RequestStatus::Withdrawn),
            other => Err(LedgerError::validation(
                "status",
                format!("unknown request status: {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transitions() {
        let pending = RequestStatus::Pending;
        assert!(!pending.is_final());
        assert!(pending.can_transition_to(RequestStatus::Accepted));
        assert!(pending.can_transition_to(RequestStatus::Rejected));
        assert!(pending.can_transition_to(RequestStatus::Withdrawn));
        assert!(!pending.can_transition_to(RequestStatus::Pending));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in [
            RequestStatus::Accepted,
            RequestStatus::Rejected,
            RequestStatus::Withdrawn,
        ] {
            assert!(status.is_final());
            assert!(status.valid_transitions().is_empty());
        }
    }

    #[test]
    fn test_status_roundtrip_str() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Accepted,
            RequestStatus::Rejected,
            RequestStatus::Withdrawn,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("PEN".parse::<RequestStatus>().is_err());
    }
}
