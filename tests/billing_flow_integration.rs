//! End-to-end billing flow over the in-memory adapters.
//!
//! Wires the real command handlers to `InMemoryMemberStore`,
//! `InMemoryEventLedger`, `MockPaymentGateway`, and `RecordingNotifier`,
//! then drives a membership through its life:
//!
//! 1. Register a member and open a checkout session
//! 2. Deliver the signed `checkout.session.completed` webhook; the engine
//!    pulls the subscription from the provider and attaches it
//! 3. Bounce an invoice (dunning starts), then recover with a paid retry
//! 4. Cancel through the admin path and record a refund
//!
//! Webhook payloads travel as raw signed bytes through the same
//! verify, admit, reconcile, complete pipeline production uses, so these
//! tests cover the seams between the verifier, the ledger, and the engine
//! that the per-handler unit tests stub out.

use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use spotter::adapters::memory::{InMemoryEventLedger, InMemoryMemberStore, RecordingNotifier};
use spotter::adapters::stripe::MockPaymentGateway;
use spotter::application::handlers::billing::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, GetMemberHandler, GetMemberQuery,
    IssueRefundCommand, IssueRefundHandler, ProcessWebhookCommand, ProcessWebhookHandler,
    ProcessWebhookResult, RegisterMemberCommand, RegisterMemberHandler, StartCheckoutCommand,
    StartCheckoutHandler,
};
use spotter::domain::billing::{
    BillingError, EventVerifier, Member, NoteKind, ReconcileOutcome, ReconciliationEngine,
    SubscriptionSnapshot, SubscriptionStatus,
};
use spotter::domain::foundation::{MemberId, Timestamp};
use spotter::ports::{BillingNotification, MarkerState, MemberStore};

const WEBHOOK_SECRET: &str = "whsec_flow_test_secret";

// ══════════════════════════════════════════════════════════════
// Test Infrastructure
// ══════════════════════════════════════════════════════════════

/// The production object graph on in-memory adapters.
struct App {
    store: Arc<InMemoryMemberStore>,
    ledger: Arc<InMemoryEventLedger>,
    provider: Arc<MockPaymentGateway>,
    notifier: Arc<RecordingNotifier>,
    webhooks: ProcessWebhookHandler,
    register: RegisterMemberHandler,
    checkout: StartCheckoutHandler,
    cancel: CancelSubscriptionHandler,
    refunds: IssueRefundHandler,
    members: GetMemberHandler,
}

fn app() -> App {
    let store = Arc::new(InMemoryMemberStore::new());
    let ledger = Arc::new(InMemoryEventLedger::new());
    let provider = Arc::new(MockPaymentGateway::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let verifier = Arc::new(EventVerifier::with_default_windows(WEBHOOK_SECRET));
    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        provider.clone(),
        notifier.clone(),
    ));

    App {
        webhooks: ProcessWebhookHandler::new(verifier, ledger.clone(), engine.clone()),
        register: RegisterMemberHandler::new(store.clone()),
        checkout: StartCheckoutHandler::new(store.clone(), provider.clone()),
        cancel: CancelSubscriptionHandler::new(provider.clone(), engine.clone()),
        refunds: IssueRefundHandler::new(store.clone(), provider.clone(), engine),
        members: GetMemberHandler::new(store.clone()),
        store,
        ledger,
        provider,
        notifier,
    }
}

impl App {
    /// Signs and delivers one webhook envelope through the full pipeline.
    async fn deliver(&self, envelope: &Value) -> Result<ProcessWebhookResult, BillingError> {
        let payload = serde_json::to_vec(envelope).unwrap();
        let timestamp = Utc::now().timestamp();
        let signature = signature_header(WEBHOOK_SECRET, timestamp, &payload);
        self.webhooks
            .handle(ProcessWebhookCommand { payload, signature })
            .await
    }
}

/// Builds a `t=...,v1=...` header the way the provider signs deliveries.
fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

fn envelope(event_id: &str, event_type: &str, created: i64, object: Value) -> Value {
    json!({
        "id": event_id,
        "type": event_type,
        "created": created,
        "data": { "object": object },
        "livemode": false,
        "api_version": "2023-10-16",
    })
}

fn subscription_object(
    subscription_id: &str,
    customer_id: &str,
    status: &str,
    period_start: i64,
    period_end: i64,
) -> Value {
    json!({
        "id": subscription_id,
        "customer": customer_id,
        "status": status,
        "current_period_start": period_start,
        "current_period_end": period_end,
        "cancel_at_period_end": false,
        "items": { "data": [ { "price": { "id": "price_monthly" } } ] },
    })
}

fn invoice_paid_object(
    invoice_id: &str,
    customer_id: &str,
    subscription_id: &str,
    period_start: i64,
    period_end: i64,
) -> Value {
    json!({
        "id": invoice_id,
        "customer": customer_id,
        "subscription": subscription_id,
        "amount_paid": 4900,
        "currency": "usd",
        "lines": { "data": [ { "period": { "start": period_start, "end": period_end } } ] },
    })
}

fn provider_snapshot(
    subscription_id: &str,
    customer_id: &str,
    status: SubscriptionStatus,
    period_start: i64,
    period_end: i64,
) -> SubscriptionSnapshot {
    SubscriptionSnapshot {
        subscription_id: subscription_id.to_string(),
        customer_id: customer_id.to_string(),
        status,
        price_id: Some("price_monthly".to_string()),
        current_period_start: Timestamp::from_unix_secs(period_start),
        current_period_end: Timestamp::from_unix_secs(period_end),
        cancel_at_period_end: false,
    }
}

/// Inserts a member already linked to a provider customer, for tests that
/// start mid-lifecycle.
async fn linked_member(store: &InMemoryMemberStore, customer_id: &str) -> MemberId {
    let mut member = Member::new(MemberId::new(), "Ada", "Byron").unwrap();
    member.customer_id = Some(customer_id.to_string());
    let member_id = member.id;
    store.insert_member(&member).await.unwrap();
    member_id
}

fn applied_status(result: &ProcessWebhookResult) -> SubscriptionStatus {
    match result {
        ProcessWebhookResult::Processed {
            outcome: ReconcileOutcome::Applied { status, .. },
        } => *status,
        other => panic!("expected an applied outcome, got {:?}", other),
    }
}

// ══════════════════════════════════════════════════════════════
// Integration Tests
// ══════════════════════════════════════════════════════════════

/// The whole journey: registration, checkout, activation by webhook, a
/// failed invoice, recovery, cancellation, and a refund note.
#[tokio::test]
async fn full_lifecycle_from_registration_to_refund() {
    let app = app();
    let now = Utc::now().timestamp();
    let period_start = now - 3_600;
    let period_end = now + 2_592_000;

    // 1. Register.
    let registered = app
        .register
        .handle(RegisterMemberCommand {
            first_name: "Maya".to_string(),
            last_name: "Okafor".to_string(),
            email: Some("maya@example.com".to_string()),
            phone: None,
            payer_id: None,
        })
        .await
        .unwrap();
    let member_id = registered.member.id;

    // 2. Open checkout. The provider customer is created and persisted on
    //    the member before the session comes back.
    let checkout = app
        .checkout
        .handle(StartCheckoutCommand {
            member_id,
            price_id: "price_monthly".to_string(),
            success_url: "https://gym.example.com/welcome".to_string(),
            cancel_url: "https://gym.example.com/pricing".to_string(),
            trial_days: None,
        })
        .await
        .unwrap();
    let customer_id = checkout.customer_id.clone();
    assert!(checkout.session.url.contains(&checkout.session.id));

    // 3. The provider reports the new subscription when the engine asks.
    app.provider.add_subscription(provider_snapshot(
        "sub_100",
        &customer_id,
        SubscriptionStatus::Active,
        period_start,
        period_end,
    ));

    let result = app
        .deliver(&envelope(
            "evt_checkout",
            "checkout.session.completed",
            now - 50,
            json!({
                "id": checkout.session.id,
                "mode": "subscription",
                "customer": customer_id,
                "subscription": "sub_100",
                "metadata": { "member_id": member_id.to_string() },
            }),
        ))
        .await
        .unwrap();
    assert_eq!(applied_status(&result), SubscriptionStatus::Active);

    let record = app.store.subscription("sub_100").unwrap();
    assert_eq!(record.member_id, member_id);
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(app.notifier.sent_of_kind("subscription_activated").len(), 1);
    assert_eq!(
        app.ledger.entry("evt_checkout").unwrap().state,
        MarkerState::Succeeded
    );

    // 4. A renewal charge bounces; the member keeps access while dunning
    //    runs.
    let result = app
        .deliver(&envelope(
            "evt_failure",
            "invoice.payment_failed",
            now - 30,
            json!({
                "id": "in_200",
                "customer": customer_id,
                "subscription": "sub_100",
                "attempt_count": 1,
                "next_payment_attempt": now + 86_400,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(applied_status(&result), SubscriptionStatus::PastDue);
    assert!(app.store.subscription("sub_100").unwrap().has_access());

    let failures = app.notifier.sent_of_kind("payment_failed");
    assert_eq!(failures.len(), 1);
    match &failures[0] {
        BillingNotification::PaymentFailed {
            attempt_count,
            final_attempt,
            ..
        } => {
            assert_eq!(*attempt_count, 1);
            assert!(!final_attempt);
        }
        other => panic!("expected a payment failure notification, got {:?}", other),
    }

    // 5. The retry clears the same invoice.
    let result = app
        .deliver(&envelope(
            "evt_recovery",
            "invoice.paid",
            now - 10,
            invoice_paid_object("in_200", &customer_id, "sub_100", period_start, period_end),
        ))
        .await
        .unwrap();
    assert_eq!(applied_status(&result), SubscriptionStatus::Active);
    assert_eq!(app.notifier.sent_of_kind("payment_recovered").len(), 1);
    // Same paid period, so no renewal announcement.
    assert_eq!(app.notifier.sent_of_kind("subscription_renewed").len(), 0);

    // 6. Front desk cancels immediately; the provider response reconciles
    //    through the same engine without touching the ledger.
    let canceled = app
        .cancel
        .handle(CancelSubscriptionCommand {
            subscription_id: "sub_100".to_string(),
            at_period_end: false,
            livemode: false,
        })
        .await
        .unwrap();
    assert_eq!(canceled.status, SubscriptionStatus::Canceled);
    assert_eq!(
        app.store.subscription("sub_100").unwrap().status,
        SubscriptionStatus::Canceled
    );
    assert_eq!(app.notifier.sent_of_kind("subscription_canceled").len(), 1);

    // 7. Refund the last charge; the note lands on the member record.
    let refunded = app
        .refunds
        .handle(IssueRefundCommand {
            member_id,
            charge_id: "ch_900".to_string(),
            amount_cents: Some(4_900),
            reason: Some("requested_by_customer".to_string()),
            livemode: false,
        })
        .await
        .unwrap();
    assert_eq!(refunded.outcome, ReconcileOutcome::Noted);
    assert_eq!(refunded.refund.amount_cents, 4_900);
    assert_eq!(app.notifier.sent_of_kind("refund_recorded").len(), 1);

    let detail = app
        .members
        .handle(GetMemberQuery { member_id })
        .await
        .unwrap();
    assert_eq!(detail.notes.len(), 1);
    assert_eq!(detail.notes[0].kind, NoteKind::Refund);
    assert_eq!(detail.notes[0].amount_cents, 4_900);
    assert_eq!(detail.notes[0].reference, refunded.refund.id);

    // Only the three webhook deliveries went through the ledger; the
    // synchronous cancel and refund paths bypass admission.
    assert_eq!(app.ledger.len(), 3);
}

/// Redelivery of an already-processed event is acknowledged without
/// reapplying the transition or repeating notifications.
#[tokio::test]
async fn redelivered_events_acknowledge_without_reapplying() {
    let app = app();
    let member_id = linked_member(&app.store, "cus_7").await;
    let now = Utc::now().timestamp();
    let body = envelope(
        "evt_sub_created",
        "customer.subscription.created",
        now - 40,
        subscription_object("sub_7", "cus_7", "active", now - 60, now + 2_592_000),
    );

    let first = app.deliver(&body).await.unwrap();
    assert!(matches!(first, ProcessWebhookResult::Processed { .. }));
    let version = app.store.subscription("sub_7").unwrap().version;

    let second = app.deliver(&body).await.unwrap();
    assert_eq!(second, ProcessWebhookResult::AlreadyProcessed);

    let record = app.store.subscription("sub_7").unwrap();
    assert_eq!(record.member_id, member_id);
    assert_eq!(record.version, version);
    assert_eq!(app.notifier.sent_of_kind("subscription_activated").len(), 1);

    let entry = app.ledger.entry("evt_sub_created").unwrap();
    assert_eq!(entry.state, MarkerState::Succeeded);
    assert_eq!(entry.attempts, 1);
}

/// The provider may fan the same event out to concurrent requests; only
/// one of them may apply it.
#[tokio::test]
async fn concurrent_deliveries_of_one_event_apply_it_once() {
    let app = Arc::new(app());
    let member_id = linked_member(&app.store, "cus_race").await;
    let now = Utc::now().timestamp();
    let body = envelope(
        "evt_race",
        "customer.subscription.created",
        now - 40,
        subscription_object("sub_race", "cus_race", "active", now - 60, now + 2_592_000),
    );
    let payload = serde_json::to_vec(&body).unwrap();
    let signature = signature_header(WEBHOOK_SECRET, now, &payload);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        let payload = payload.clone();
        let signature = signature.clone();
        handles.push(tokio::spawn(async move {
            app.webhooks
                .handle(ProcessWebhookCommand { payload, signature })
                .await
        }));
    }

    let mut processed = 0usize;
    let mut acknowledged = 0usize;
    let mut rejected_in_flight = 0usize;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(ProcessWebhookResult::Processed { .. }) => processed += 1,
            Ok(ProcessWebhookResult::AlreadyProcessed) => acknowledged += 1,
            Err(BillingError::InFlight { .. }) => rejected_in_flight += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(processed, 1, "exactly one delivery may apply the event");
    assert_eq!(processed + acknowledged + rejected_in_flight, 8);
    assert_eq!(
        app.ledger.entry("evt_race").unwrap().state,
        MarkerState::Succeeded
    );

    let record = app.store.subscription("sub_race").unwrap();
    assert_eq!(record.member_id, member_id);
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(app.notifier.sent_of_kind("subscription_activated").len(), 1);
}

/// An event older than the record's last applied event is acknowledged as
/// superseded and changes nothing.
#[tokio::test]
async fn late_events_cannot_reopen_a_closed_subscription() {
    let app = app();
    linked_member(&app.store, "cus_late").await;
    let now = Utc::now().timestamp();

    let result = app
        .deliver(&envelope(
            "evt_open",
            "customer.subscription.created",
            now - 50,
            subscription_object("sub_late", "cus_late", "active", now - 60, now + 2_592_000),
        ))
        .await
        .unwrap();
    assert_eq!(applied_status(&result), SubscriptionStatus::Active);

    let result = app
        .deliver(&envelope(
            "evt_close",
            "customer.subscription.deleted",
            now - 20,
            json!({
                "id": "sub_late",
                "customer": "cus_late",
                "ended_at": now - 20,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(applied_status(&result), SubscriptionStatus::Canceled);

    // A delayed invoice.paid from before the close arrives last.
    let result = app
        .deliver(&envelope(
            "evt_late_invoice",
            "invoice.paid",
            now - 40,
            invoice_paid_object("in_old", "cus_late", "sub_late", now - 60, now - 30),
        ))
        .await
        .unwrap();
    match result {
        ProcessWebhookResult::Processed {
            outcome: ReconcileOutcome::Ignored { reason },
        } => assert!(reason.contains("superseded")),
        other => panic!("expected the late event to be ignored, got {:?}", other),
    }

    assert_eq!(
        app.store.subscription("sub_late").unwrap().status,
        SubscriptionStatus::Canceled
    );
    let entry = app.ledger.entry("evt_late_invoice").unwrap();
    assert_eq!(entry.state, MarkerState::Ignored);
    assert!(entry.detail.unwrap().contains("superseded"));
    assert_eq!(app.notifier.sent_of_kind("payment_recovered").len(), 0);
}

/// A payload signed with the wrong secret is rejected before the ledger or
/// the store see anything.
#[tokio::test]
async fn forged_signatures_never_reach_the_ledger() {
    let app = app();
    let now = Utc::now().timestamp();
    let body = envelope(
        "evt_forged",
        "invoice.paid",
        now - 5,
        invoice_paid_object("in_1", "cus_1", "sub_1", now - 60, now + 60),
    );
    let payload = serde_json::to_vec(&body).unwrap();
    let signature = signature_header("whsec_not_ours", now, &payload);

    let result = app
        .webhooks
        .handle(ProcessWebhookCommand { payload, signature })
        .await;

    assert!(matches!(result, Err(BillingError::SignatureInvalid)));
    assert!(app.ledger.is_empty());
    assert!(app.notifier.sent().is_empty());
}

/// Event types and subscription statuses outside the modeled lifecycle are
/// acknowledged with an ignored marker so the provider stops redelivering.
#[tokio::test]
async fn unmodeled_events_are_acknowledged_and_marked() {
    let app = app();
    let now = Utc::now().timestamp();

    let result = app
        .deliver(&envelope(
            "evt_unknown",
            "customer.updated",
            now - 5,
            json!({ "id": "cus_55" }),
        ))
        .await
        .unwrap();
    match result {
        ProcessWebhookResult::Processed {
            outcome: ReconcileOutcome::Ignored { reason },
        } => assert!(reason.contains("customer.updated")),
        other => panic!("expected an ignored outcome, got {:?}", other),
    }

    let result = app
        .deliver(&envelope(
            "evt_paused",
            "customer.subscription.updated",
            now - 4,
            subscription_object("sub_9", "cus_9", "paused", now - 60, now + 60),
        ))
        .await
        .unwrap();
    match result {
        ProcessWebhookResult::Processed {
            outcome: ReconcileOutcome::Ignored { reason },
        } => assert!(reason.contains("paused")),
        other => panic!("expected an ignored outcome, got {:?}", other),
    }

    assert_eq!(
        app.ledger.entry("evt_unknown").unwrap().state,
        MarkerState::Ignored
    );
    assert_eq!(
        app.ledger.entry("evt_paused").unwrap().state,
        MarkerState::Ignored
    );
    assert_eq!(app.store.member_count(), 0);
}
