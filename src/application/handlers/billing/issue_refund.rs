//! IssueRefundHandler - refund issuance through the engine.
//!
//! Calls the provider, then reconciles the refund synchronously so the
//! billing note exists before the API responds. The later
//! `charge.refunded` webhook finds the member's note already recorded and
//! lands as an idempotent duplicate at the ledger.

use std::sync::Arc;

use crate::domain::billing::{
    BillingError, BillingEvent, BillingEventKind, ReconcileOutcome, ReconciliationEngine,
    RefundInfo,
};
use crate::domain::foundation::MemberId;
use crate::ports::{MemberStore, PaymentProvider, ProviderRefund, RefundRequest};

/// Command to refund a charge for a member.
#[derive(Debug, Clone)]
pub struct IssueRefundCommand {
    pub member_id: MemberId,
    pub charge_id: String,
    /// Partial refund amount; `None` refunds the full charge.
    pub amount_cents: Option<i64>,
    pub reason: Option<String>,
    pub livemode: bool,
}

/// Result of a refund.
#[derive(Debug, Clone)]
pub struct IssueRefundResult {
    pub refund: ProviderRefund,
    pub outcome: ReconcileOutcome,
}

/// Handler for admin-issued refunds.
pub struct IssueRefundHandler {
    store: Arc<dyn MemberStore>,
    provider: Arc<dyn PaymentProvider>,
    engine: Arc<ReconciliationEngine>,
}

impl IssueRefundHandler {
    pub fn new(
        store: Arc<dyn MemberStore>,
        provider: Arc<dyn PaymentProvider>,
        engine: Arc<ReconciliationEngine>,
    ) -> Self {
        Self {
            store,
            provider,
            engine,
        }
    }

    pub async fn handle(&self, cmd: IssueRefundCommand) -> Result<IssueRefundResult, BillingError> {
        // 1. The member must exist and have entered billing, or there is
        //    nothing to attach the refund note to.
        let member = self
            .store
            .get_member(&cmd.member_id)
            .await
            .map_err(BillingError::from)?
            .ok_or_else(|| BillingError::not_found("member", cmd.member_id.to_string()))?;
        let customer_id = member.customer_id.clone().ok_or_else(|| {
            BillingError::Validation(crate::domain::foundation::ValidationError::invalid_format(
                "member_id",
                "member has no billing customer",
            ))
        })?;

        // 2. Issue the refund at the provider.
        let refund = self
            .provider
            .create_refund(RefundRequest {
                charge_id: cmd.charge_id.clone(),
                amount_cents: cmd.amount_cents,
                reason: cmd.reason.clone(),
            })
            .await?;

        // 3. Reconcile synchronously so the note is visible immediately.
        let info = RefundInfo {
            charge_id: refund.charge_id.clone(),
            refund_id: Some(refund.id.clone()),
            customer_id: Some(customer_id),
            invoice_id: None,
            amount_cents: refund.amount_cents,
            currency: refund.currency.clone(),
            reason: refund.reason.clone(),
        };
        let event = BillingEvent::synthetic(BillingEventKind::RefundCreated(info), cmd.livemode);
        let outcome = self.engine.reconcile(&event).await?;

        tracing::info!(
            member_id = %cmd.member_id,
            charge_id = %cmd.charge_id,
            refund_id = %refund.id,
            amount_cents = refund.amount_cents,
            "refund issued"
        );

        Ok(IssueRefundResult { refund, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::adapters::memory::{InMemoryMemberStore, RecordingNotifier};
    use crate::adapters::stripe::MockPaymentGateway;
    use crate::domain::billing::{Member, NoteKind};
    use crate::ports::PaymentError;

    async fn harness(
        customer_id: Option<&str>,
    ) -> (
        IssueRefundHandler,
        Arc<InMemoryMemberStore>,
        Arc<MockPaymentGateway>,
        MemberId,
    ) {
        let store = Arc::new(InMemoryMemberStore::new());
        let provider = Arc::new(MockPaymentGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let mut member = Member::new(MemberId::new(), "Rosa", "Marsh").unwrap();
        member.customer_id = customer_id.map(String::from);
        let member_id = member.id;
        store.insert_member(&member).await.unwrap();

        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            provider.clone(),
            notifier,
        ));
        (
            IssueRefundHandler::new(store.clone(), provider.clone(), engine),
            store,
            provider,
            member_id,
        )
    }

    fn command(member_id: MemberId) -> IssueRefundCommand {
        IssueRefundCommand {
            member_id,
            charge_id: "ch_1".to_string(),
            amount_cents: Some(2500),
            reason: Some("requested_by_customer".to_string()),
            livemode: false,
        }
    }

    #[tokio::test]
    async fn refund_appends_a_note_for_the_member() {
        let (handler, store, _provider, member_id) = harness(Some("cus_1")).await;

        let result = handler.handle(command(member_id)).await.unwrap();

        assert_eq!(result.outcome, ReconcileOutcome::Noted);
        assert_eq!(result.refund.amount_cents, 2500);
        let notes = store.notes_for(&member_id).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NoteKind::Refund);
        assert_eq!(notes[0].amount_cents, 2500);
        assert_eq!(notes[0].reference, result.refund.id);
    }

    #[tokio::test]
    async fn member_without_customer_is_rejected_before_the_provider_call() {
        let (handler, _store, provider, member_id) = harness(None).await;

        let err = handler.handle(command(member_id)).await.unwrap_err();

        assert!(matches!(err, BillingError::Validation(_)));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_leaves_no_note() {
        let (handler, store, provider, member_id) = harness(Some("cus_1")).await;
        provider.fail_next(PaymentError::invalid_request("charge already refunded"));

        let err = handler.handle(command(member_id)).await.unwrap_err();

        assert!(matches!(err, BillingError::Provider(_)));
        assert!(store.notes_for(&member_id).await.unwrap().is_empty());
    }
}
