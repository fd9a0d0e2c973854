//! CancelSubscriptionHandler - admin cancellation through the engine.
//!
//! Calls the provider, then feeds the returned subscription state through
//! the same reconcile entry point webhooks use. The store is updated
//! synchronously; the later `customer.subscription.deleted` webhook arrives
//! as a stale or idempotent event and is ignored.

use std::sync::Arc;

use crate::domain::billing::{
    BillingError, BillingEvent, BillingEventKind, ReconcileOutcome, ReconciliationEngine,
    SubscriptionStatus,
};
use crate::ports::PaymentProvider;

/// Command to cancel a subscription.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub subscription_id: String,
    /// When true the subscription stays usable until the paid period ends.
    pub at_period_end: bool,
    pub livemode: bool,
}

/// Result of a cancellation.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionResult {
    pub outcome: ReconcileOutcome,
    /// Status the provider reported after the call.
    pub status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
}

/// Handler for admin-initiated cancellations.
pub struct CancelSubscriptionHandler {
    provider: Arc<dyn PaymentProvider>,
    engine: Arc<ReconciliationEngine>,
}

impl CancelSubscriptionHandler {
    pub fn new(provider: Arc<dyn PaymentProvider>, engine: Arc<ReconciliationEngine>) -> Self {
        Self { provider, engine }
    }

    pub async fn handle(
        &self,
        cmd: CancelSubscriptionCommand,
    ) -> Result<CancelSubscriptionResult, BillingError> {
        // 1. Cancel at the provider. Its response is the authoritative
        //    subscription state.
        let snapshot = self
            .provider
            .cancel_subscription(&cmd.subscription_id, cmd.at_period_end)
            .await?;
        let status = snapshot.status;
        let cancel_at_period_end = snapshot.cancel_at_period_end;

        // 2. Reconcile the fresh snapshot synchronously.
        let event = BillingEvent::synthetic(
            BillingEventKind::SubscriptionUpdated(snapshot),
            cmd.livemode,
        );
        let outcome = self.engine.reconcile(&event).await?;

        tracing::info!(
            subscription_id = %cmd.subscription_id,
            at_period_end = cmd.at_period_end,
            status = status.as_str(),
            "subscription canceled"
        );

        Ok(CancelSubscriptionResult {
            outcome,
            status,
            cancel_at_period_end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::adapters::memory::{InMemoryMemberStore, RecordingNotifier};
    use crate::adapters::stripe::MockPaymentGateway;
    use crate::domain::billing::{Member, SubscriptionRecord, SubscriptionSnapshot};
    use crate::domain::foundation::{MemberId, Timestamp};
    use crate::ports::MemberStore;

    fn snapshot(status: SubscriptionStatus) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            subscription_id: "sub_1".to_string(),
            customer_id: "cus_1".to_string(),
            status,
            price_id: Some("price_monthly".to_string()),
            current_period_start: Timestamp::from_unix_secs(1_700_000_000),
            current_period_end: Timestamp::from_unix_secs(1_702_592_000),
            cancel_at_period_end: false,
        }
    }

    async fn harness(
        status: SubscriptionStatus,
    ) -> (
        CancelSubscriptionHandler,
        Arc<InMemoryMemberStore>,
    ) {
        let store = Arc::new(InMemoryMemberStore::new());
        let provider = Arc::new(MockPaymentGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let member = Member::new(MemberId::new(), "Iris", "Chen").unwrap();
        let member_id = member.id;
        store.insert_member(&member).await.unwrap();
        let record = SubscriptionRecord::from_snapshot(
            member_id,
            &snapshot(SubscriptionStatus::Incomplete),
            Timestamp::from_unix_secs(1_700_000_000),
        )
        .unwrap();
        let record = SubscriptionRecord {
            status,
            ..record
        };
        store.attach_subscription(&record).await.unwrap();
        provider.add_subscription(snapshot(status));

        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            provider.clone(),
            notifier,
        ));
        (
            CancelSubscriptionHandler::new(provider, engine),
            store,
        )
    }

    #[tokio::test]
    async fn immediate_cancellation_moves_the_record_to_canceled() {
        let (handler, store) = harness(SubscriptionStatus::Active).await;

        let result = handler
            .handle(CancelSubscriptionCommand {
                subscription_id: "sub_1".to_string(),
                at_period_end: false,
                livemode: false,
            })
            .await
            .unwrap();

        assert_eq!(result.status, SubscriptionStatus::Canceled);
        assert!(matches!(result.outcome, ReconcileOutcome::Applied { .. }));
        let record = store.subscription("sub_1").unwrap();
        assert_eq!(record.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn period_end_cancellation_keeps_the_status_and_sets_the_flag() {
        let (handler, store) = harness(SubscriptionStatus::Active).await;

        let result = handler
            .handle(CancelSubscriptionCommand {
                subscription_id: "sub_1".to_string(),
                at_period_end: true,
                livemode: false,
            })
            .await
            .unwrap();

        assert_eq!(result.status, SubscriptionStatus::Active);
        assert!(result.cancel_at_period_end);
        let record = store.subscription("sub_1").unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert!(record.cancel_at_period_end);
    }

    #[tokio::test]
    async fn unknown_subscription_maps_to_not_found() {
        let (handler, _store) = harness(SubscriptionStatus::Active).await;

        let err = handler
            .handle(CancelSubscriptionCommand {
                subscription_id: "sub_ghost".to_string(),
                at_period_end: false,
                livemode: false,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Provider(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
    }
}
