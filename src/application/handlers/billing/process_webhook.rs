//! ProcessWebhookHandler - command handler for inbound provider events.
//!
//! The full ingestion pipeline: verify the signature, decode the envelope,
//! claim the event id in the ledger, reconcile, and record the terminal
//! outcome. The HTTP response code downstream of this handler drives the
//! provider's redelivery, so every path lands in exactly one of: terminal
//! ledger state (acknowledge), `InFlight` (retry later), or a retryable
//! failure with the marker left reclaimable.

use std::sync::Arc;

use crate::domain::billing::{
    BillingError, BillingEvent, EventVerifier, ReconcileOutcome, ReconciliationEngine,
};
use crate::ports::{Admission, EventLedger, LedgerOutcome};

/// Command carrying one raw webhook delivery.
#[derive(Debug, Clone)]
pub struct ProcessWebhookCommand {
    /// Raw payload bytes, exactly as received. The signature covers these
    /// bytes, so they must not be re-serialized before verification.
    pub payload: Vec<u8>,
    /// Value of the `Stripe-Signature` header.
    pub signature: String,
}

/// Result of accepting one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessWebhookResult {
    /// This delivery was admitted and reconciled to a terminal state.
    Processed { outcome: ReconcileOutcome },
    /// A prior delivery already reached a terminal state; nothing ran.
    AlreadyProcessed,
}

/// Handler for the webhook ingestion pipeline.
pub struct ProcessWebhookHandler {
    verifier: Arc<EventVerifier>,
    ledger: Arc<dyn EventLedger>,
    engine: Arc<ReconciliationEngine>,
}

impl ProcessWebhookHandler {
    pub fn new(
        verifier: Arc<EventVerifier>,
        ledger: Arc<dyn EventLedger>,
        engine: Arc<ReconciliationEngine>,
    ) -> Self {
        Self {
            verifier,
            ledger,
            engine,
        }
    }

    pub async fn handle(
        &self,
        cmd: ProcessWebhookCommand,
    ) -> Result<ProcessWebhookResult, BillingError> {
        // 1. Verify the signature over the raw bytes and decode the envelope.
        let provider_event = self
            .verifier
            .verify_and_parse(&cmd.payload, &cmd.signature)?;
        let event = BillingEvent::from_provider(&provider_event)?;

        // 2. Claim the event id. Concurrent and repeated deliveries resolve
        //    here, before any store access.
        match self.ledger.try_begin(&event.id, event.kind_name()).await? {
            Admission::Admitted => {}
            Admission::AlreadyProcessed => {
                tracing::debug!(
                    event_id = %event.id,
                    event_type = event.kind_name(),
                    "event already processed, acknowledging redelivery"
                );
                return Ok(ProcessWebhookResult::AlreadyProcessed);
            }
            Admission::InProgress => {
                return Err(BillingError::InFlight { event_id: event.id });
            }
        }

        // 3. Reconcile and record the terminal outcome.
        match self.engine.reconcile(&event).await {
            Ok(outcome) => {
                let terminal = match outcome.ignore_reason() {
                    Some(reason) => LedgerOutcome::Ignored(reason.to_string()),
                    None => LedgerOutcome::Succeeded,
                };
                self.ledger.complete(&event.id, terminal).await?;
                Ok(ProcessWebhookResult::Processed { outcome })
            }
            Err(err) => {
                // Mark the attempt failed so a redelivery can reclaim the
                // marker. If even that write fails, the lease expiry covers
                // recovery.
                if let Err(ledger_err) = self
                    .ledger
                    .complete(&event.id, LedgerOutcome::Failed(err.to_string()))
                    .await
                {
                    tracing::warn!(
                        event_id = %event.id,
                        error = %ledger_err,
                        "could not record failure in ledger"
                    );
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::adapters::memory::{InMemoryEventLedger, InMemoryMemberStore, RecordingNotifier};
    use crate::adapters::stripe::MockPaymentGateway;
    use crate::domain::billing::{compute_test_signature, Member};
    use crate::domain::foundation::{MemberId, Timestamp};
    use crate::ports::{MarkerState, MemberStore};

    const SECRET: &str = "whsec_test_secret";

    struct Harness {
        handler: ProcessWebhookHandler,
        store: Arc<InMemoryMemberStore>,
        ledger: Arc<InMemoryEventLedger>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryMemberStore::new());
        let ledger = Arc::new(InMemoryEventLedger::new());
        let provider = Arc::new(MockPaymentGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            provider,
            notifier,
        ));
        let verifier = Arc::new(EventVerifier::with_default_windows(SECRET));
        Harness {
            handler: ProcessWebhookHandler::new(verifier, ledger.clone(), engine),
            store,
            ledger,
        }
    }

    fn signed(payload: &[u8]) -> String {
        let now = chrono::Utc::now().timestamp();
        format!(
            "t={},v1={}",
            now,
            compute_test_signature(SECRET, now, payload)
        )
    }

    fn unrecognized_payload(event_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": event_id,
            "type": "customer.updated",
            "created": 1_700_000_000,
            "data": { "object": {} },
            "livemode": false
        }))
        .unwrap()
    }

    fn subscription_updated_payload(event_id: &str, subscription_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": event_id,
            "type": "customer.subscription.updated",
            "created": 1_700_000_200,
            "data": { "object": {
                "id": subscription_id,
                "customer": "cus_1",
                "status": "active",
                "current_period_start": 1_700_000_000,
                "current_period_end": 1_702_592_000,
                "cancel_at_period_end": false,
                "items": { "data": [ { "price": { "id": "price_monthly" } } ] }
            }},
            "livemode": false
        }))
        .unwrap()
    }

    async fn seed_subscription(store: &InMemoryMemberStore, subscription_id: &str) -> MemberId {
        let member = Member::new(MemberId::new(), "Ana", "Silva").unwrap();
        let member_id = member.id;
        store.insert_member(&member).await.unwrap();

        let snapshot = crate::domain::billing::SubscriptionSnapshot {
            subscription_id: subscription_id.to_string(),
            customer_id: "cus_1".to_string(),
            status: crate::domain::billing::SubscriptionStatus::Incomplete,
            price_id: Some("price_monthly".to_string()),
            current_period_start: Timestamp::from_unix_secs(1_700_000_000),
            current_period_end: Timestamp::from_unix_secs(1_702_592_000),
            cancel_at_period_end: false,
        };
        let record = crate::domain::billing::SubscriptionRecord::from_snapshot(
            member_id,
            &snapshot,
            Timestamp::from_unix_secs(1_700_000_000),
        )
        .unwrap();
        store.attach_subscription(&record).await.unwrap();
        member_id
    }

    #[tokio::test]
    async fn rejects_bad_signature_without_touching_the_ledger() {
        let h = harness();
        let payload = unrecognized_payload("evt_1");

        let err = h
            .handler
            .handle(ProcessWebhookCommand {
                payload: payload.clone(),
                signature: format!("t={},v1=deadbeef", chrono::Utc::now().timestamp()),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::SignatureInvalid));
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn applies_a_subscription_update_and_completes_the_marker() {
        let h = harness();
        seed_subscription(&h.store, "sub_1").await;
        let payload = subscription_updated_payload("evt_1", "sub_1");

        let result = h
            .handler
            .handle(ProcessWebhookCommand {
                payload: payload.clone(),
                signature: signed(&payload),
            })
            .await
            .unwrap();

        assert!(matches!(
            result,
            ProcessWebhookResult::Processed {
                outcome: ReconcileOutcome::Applied { .. }
            }
        ));
        let entry = h.ledger.entry("evt_1").unwrap();
        assert_eq!(entry.state, MarkerState::Succeeded);

        let record = h.store.subscription("sub_1").unwrap();
        assert_eq!(
            record.status,
            crate::domain::billing::SubscriptionStatus::Active
        );
    }

    #[tokio::test]
    async fn second_delivery_of_a_completed_event_is_acknowledged() {
        let h = harness();
        seed_subscription(&h.store, "sub_1").await;
        let payload = subscription_updated_payload("evt_1", "sub_1");
        let cmd = ProcessWebhookCommand {
            payload: payload.clone(),
            signature: signed(&payload),
        };

        h.handler.handle(cmd.clone()).await.unwrap();
        let result = h.handler.handle(cmd).await.unwrap();

        assert_eq!(result, ProcessWebhookResult::AlreadyProcessed);
        let record = h.store.subscription("sub_1").unwrap();
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn unrecognized_event_completes_as_ignored() {
        let h = harness();
        let payload = unrecognized_payload("evt_2");

        let result = h
            .handler
            .handle(ProcessWebhookCommand {
                payload: payload.clone(),
                signature: signed(&payload),
            })
            .await
            .unwrap();

        assert!(matches!(
            result,
            ProcessWebhookResult::Processed {
                outcome: ReconcileOutcome::Ignored { .. }
            }
        ));
        let entry = h.ledger.entry("evt_2").unwrap();
        assert_eq!(entry.state, MarkerState::Ignored);
        assert!(entry.detail.is_some());
    }

    #[tokio::test]
    async fn event_for_unknown_subscription_is_ignored_not_failed() {
        let h = harness();
        let payload = subscription_updated_payload("evt_3", "sub_ghost");

        let result = h
            .handler
            .handle(ProcessWebhookCommand {
                payload: payload.clone(),
                signature: signed(&payload),
            })
            .await
            .unwrap();

        assert!(matches!(
            result,
            ProcessWebhookResult::Processed {
                outcome: ReconcileOutcome::Ignored { .. }
            }
        ));
        assert_eq!(
            h.ledger.entry("evt_3").unwrap().state,
            MarkerState::Ignored
        );
    }

    #[tokio::test]
    async fn in_flight_event_is_reported_as_conflict() {
        let h = harness();
        let payload = unrecognized_payload("evt_4");

        // Claim the marker as another worker would.
        h.ledger.try_begin("evt_4", "customer.updated").await.unwrap();

        let err = h
            .handler
            .handle(ProcessWebhookCommand {
                payload: payload.clone(),
                signature: signed(&payload),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::InFlight { .. }));
    }

    #[tokio::test]
    async fn stale_signature_timestamp_is_rejected() {
        let h = harness();
        let payload = unrecognized_payload("evt_5");
        let old = chrono::Utc::now().timestamp() - 3600;
        let signature = format!(
            "t={},v1={}",
            old,
            compute_test_signature(SECRET, old, &payload)
        );

        let err = h
            .handler
            .handle(ProcessWebhookCommand { payload, signature })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::StaleDelivery));
    }
}
