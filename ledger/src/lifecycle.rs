//! Payment request lifecycle.
//!
//! A request starts `Pending` and ends in exactly one of `Accepted`,
//! `Rejected` or `Withdrawn`. Each transition locks the request row, so two
//! racing decisions on the same request serialize and the loser sees the
//! winner's terminal state.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use payledger_common::{
    AccountId, Amount, ErrorKind, LedgerError, RequestId, RequestStatus, Result,
};

use crate::engine::TransferEngine;
use crate::journal::TransactionRecord;
use crate::request::PaymentRequest;
use crate::store::{finish, LedgerTx};

/// Creates and resolves payment requests.
pub struct RequestManager {
    engine: Arc<TransferEngine>,
}

impl RequestManager {
    /// Create a manager that settles accepted requests through `engine`.
    pub fn new(engine: Arc<TransferEngine>) -> Self {
        Self { engine }
    }

    /// Ask `target` to pay `amount` to `requester`.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        requester: AccountId,
        target: AccountId,
        amount: i64,
    ) -> Result<PaymentRequest> {
        let amount = Amount::try_from(amount)?;
        if requester == target {
            return Err(LedgerError::SelfTransfer);
        }

        let requester_holding = self.engine.holding(requester).await?;
        let target_holding = self.engine.holding(target).await?;
        if requester_holding.currency != target_holding.currency {
            return Err(LedgerError::CurrencyMismatch {
                sender: target_holding.currency,
                recipient: requester_holding.currency,
            });
        }

        let request = PaymentRequest::new(requester, target, amount, requester_holding.currency);
        self.engine
            .retry_policy()
            .run("create_request", || self.insert_once(&request))
            .await?;

        info!(
            request_id = %request.id,
            requester = %requester,
            target = %target,
            amount = %amount,
            "Payment request created"
        );
        Ok(request)
    }

    async fn insert_once(&self, request: &PaymentRequest) -> Result<()> {
        let mut tx = self.engine.store().begin().await?;
        let result = tx.insert_request(request).await;
        finish(tx, result).await
    }

    /// Accept a request as its payer. Executes the transfer and links it to
    /// the request atomically; if the transfer fails the request stays
    /// pending.
    #[instrument(skip(self))]
    pub async fn accept(
        &self,
        request_id: RequestId,
        actor: AccountId,
    ) -> Result<(PaymentRequest, TransactionRecord)> {
        let (request, record) = self
            .resolve(request_id, actor, RequestStatus::Accepted)
            .await?;
        let record = record.ok_or_else(|| {
            LedgerError::Consistency(format!("accepted request {request_id} has no transaction"))
        })?;
        Ok((request, record))
    }

    /// Decline a request as its payer.
    #[instrument(skip(self))]
    pub async fn reject(&self, request_id: RequestId, actor: AccountId) -> Result<PaymentRequest> {
        let (request, _) = self
            .resolve(request_id, actor, RequestStatus::Rejected)
            .await?;
        Ok(request)
    }

    /// Cancel a request as its requester.
    #[instrument(skip(self))]
    pub async fn withdraw(
        &self,
        request_id: RequestId,
        actor: AccountId,
    ) -> Result<PaymentRequest> {
        let (request, _) = self
            .resolve(request_id, actor, RequestStatus::Withdrawn)
            .await?;
        Ok(request)
    }

    async fn resolve(
        &self,
        request_id: RequestId,
        actor: AccountId,
        next: RequestStatus,
    ) -> Result<(PaymentRequest, Option<TransactionRecord>)> {
        let result = self
            .engine
            .retry_policy()
            .run(next.as_str(), || self.resolve_once(request_id, actor, next))
            .await;

        match &result {
            Ok((request, _)) => info!(
                request_id = %request_id,
                actor = %actor,
                status = %request.status,
                transaction_id = ?request.transaction_id,
                "Payment request resolved"
            ),
            Err(err) if err.kind() == ErrorKind::Consistency => error!(
                request_id = %request_id,
                actor = %actor,
                target_status = %next,
                code = err.error_code(),
                error = %err,
                "Payment request transition failed a ledger invariant"
            ),
            Err(err) => warn!(
                request_id = %request_id,
                actor = %actor,
                target_status = %next,
                code = err.error_code(),
                error = %err,
                "Payment request transition refused"
            ),
        }
        result
    }

    async fn resolve_once(
        &self,
        request_id: RequestId,
        actor: AccountId,
        next: RequestStatus,
    ) -> Result<(PaymentRequest, Option<TransactionRecord>)> {
        let mut tx = self.engine.store().begin().await?;
        let result = self.apply(tx.as_mut(), request_id, actor, next).await;
        finish(tx, result).await
    }

    async fn apply(
        &self,
        tx: &mut dyn LedgerTx,
        request_id: RequestId,
        actor: AccountId,
        next: RequestStatus,
    ) -> Result<(PaymentRequest, Option<TransactionRecord>)> {
        let mut request = tx.request_for_update(request_id).await?;

        // A decided request reports its state to everyone, party or not.
        request.ensure_transition(next)?;
        if !request.permits(actor, next) {
            return Err(LedgerError::NotPermitted {
                account: actor,
                request: request_id,
                action: action_name(next),
            });
        }

        let settled = if next == RequestStatus::Accepted {
            let record = self
                .engine
                .transfer_within(
                    tx,
                    request.sender,
                    request.recipient,
                    request.value,
                    Some(request.id),
                )
                .await?;
            request.accept(record.id)?;
            Some(record)
        } else {
            request.transition_to(next)?;
            None
        };

        tx.update_request(&request).await?;
        Ok((request, settled))
    }
}

fn action_name(next: RequestStatus) -> &'static str {
    match next {
        RequestStatus::Accepted => "accept",
        RequestStatus::Rejected => "reject",
        RequestStatus::Withdrawn => "withdraw",
        RequestStatus::Pending => "reopen",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryLedgerStore;
    use payledger_common::Currency;

    async fn setup() -> (Arc<TransferEngine>, RequestManager, AccountId, AccountId) {
        let engine = Arc::new(TransferEngine::new(
            Arc::new(MemoryLedgerStore::new()),
            RetryPolicy::default(),
        ));
        let (alice, _) = engine.open_account("alice", Currency::Gbp, 1000).await.unwrap();
        let (bob, _) = engine.open_account("bob", Currency::Gbp, 1000).await.unwrap();
        let manager = RequestManager::new(engine.clone());
        (engine, manager, alice.id, bob.id)
    }

    #[tokio::test]
    async fn test_accept_settles_request() {
        let (engine, manager, alice, bob) = setup().await;
        let request = manager.create(alice, bob, 200).await.unwrap();

        let (accepted, record) = manager.accept(request.id, bob).await.unwrap();

        assert_eq!(accepted.status, RequestStatus::Accepted);
        assert_eq!(accepted.transaction_id, Some(record.id));
        assert_eq!(record.request_id, Some(request.id));
        assert_eq!(engine.holding(alice).await.unwrap().balance, 1200);
        assert_eq!(engine.holding(bob).await.unwrap().balance, 800);
    }

    #[tokio::test]
    async fn test_only_payer_may_accept() {
        let (_, manager, alice, bob) = setup().await;
        let request = manager.create(alice, bob, 200).await.unwrap();

        assert!(matches!(
            manager.accept(request.id, alice).await,
            Err(LedgerError::NotPermitted { action: "accept", .. })
        ));
        assert!(matches!(
            manager.withdraw(request.id, bob).await,
            Err(LedgerError::NotPermitted { action: "withdraw", .. })
        ));
    }

    #[tokio::test]
    async fn test_state_checked_before_permission() {
        let (_, manager, alice, bob) = setup().await;
        let request = manager.create(alice, bob, 200).await.unwrap();
        manager.reject(request.id, bob).await.unwrap();

        assert_eq!(
            manager.withdraw(request.id, bob).await,
            Err(LedgerError::InvalidStateTransition {
                from: RequestStatus::Rejected,
                to: RequestStatus::Withdrawn,
            })
        );
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (_, manager, alice, _) = setup().await;

        assert_eq!(
            manager.create(alice, alice, 10).await,
            Err(LedgerError::SelfTransfer)
        );
        assert_eq!(
            manager.create(alice, AccountId::new(), -5).await,
            Err(LedgerError::InvalidAmount(-5))
        );
        assert!(matches!(
            manager.create(alice, AccountId::new(), 5).await,
            Err(LedgerError::HoldingNotFound(_))
        ));
    }
}
