//! Reconciliation engine - applies billing events to membership state.
//!
//! The engine owns every write to subscription records. Events arrive here
//! already verified and admitted by the ledger; the engine routes each
//! `BillingEventKind` to a transition on the member's record, applied
//! through the store's transactional `apply_transition` primitive.
//!
//! ## Ordering
//!
//! The provider does not guarantee delivery order. Every transition closure
//! starts with the staleness guard: an event older than the record's
//! `last_event_at` is ignored, so a late `invoice.paid` can never resurrect
//! a record a newer `subscription.deleted` already closed.
//!
//! ## Failure policy
//!
//! Orphaned references (no member for a customer id, no record for a
//! subscription id) are logged and skipped, never fabricated. Version
//! conflicts are retried with bounded exponential backoff, then surfaced as
//! `ExhaustedRetries` for the provider to redeliver. Notification delivery
//! failures never fail the transition that produced them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::domain::billing::event::{
    BillingEvent, BillingEventKind, CheckoutInfo, CheckoutMode, InvoiceFailure, InvoiceInfo,
    RefundInfo, SubscriptionClose,
};
use crate::domain::billing::member::{BillingNote, Member};
use crate::domain::billing::subscription::{
    SubscriptionRecord, SubscriptionSnapshot, SubscriptionStatus,
};
use crate::domain::billing::BillingError;
use crate::domain::foundation::Timestamp;
use crate::ports::{
    AppliedTransition, BillingNotification, MemberStore, Notifier, PaymentProvider, StoreError,
};

/// Default cap on conflict retries for one event.
pub const DEFAULT_RETRY_LIMIT: u32 = 5;

/// Default base delay between conflict retries.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// What reconciling one event did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// A subscription record was created or transitioned.
    Applied {
        subscription_id: String,
        status: SubscriptionStatus,
    },
    /// The event required no mutation; the reason is recorded in the
    /// ledger.
    Ignored { reason: String },
    /// A billing note was appended without touching subscription state.
    Noted,
}

impl ReconcileOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        ReconcileOutcome::Ignored {
            reason: reason.into(),
        }
    }

    /// Ledger detail for ignored outcomes.
    pub fn ignore_reason(&self) -> Option<&str> {
        match self {
            ReconcileOutcome::Ignored { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Applies verified billing events to the membership store.
pub struct ReconciliationEngine {
    store: Arc<dyn MemberStore>,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn Notifier>,
    retry_limit: u32,
    retry_backoff: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn MemberStore>,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            provider,
            notifier,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Overrides the conflict retry policy.
    pub fn with_retry_policy(mut self, retry_limit: u32, retry_backoff: Duration) -> Self {
        self.retry_limit = retry_limit.max(1);
        self.retry_backoff = retry_backoff;
        self
    }

    /// Applies one event. The caller owns idempotency (ledger admission)
    /// and records the returned outcome.
    pub async fn reconcile(&self, event: &BillingEvent) -> Result<ReconcileOutcome, BillingError> {
        match &event.kind {
            BillingEventKind::CheckoutCompleted(info) => self.on_checkout(event, info).await,
            BillingEventKind::SubscriptionCreated(snapshot)
            | BillingEventKind::SubscriptionUpdated(snapshot) => {
                self.on_subscription_upsert(event, snapshot).await
            }
            BillingEventKind::SubscriptionDeleted(close) => self.on_deleted(event, close).await,
            BillingEventKind::InvoicePaid(info) => self.on_invoice_paid(event, info).await,
            BillingEventKind::InvoiceFailed(info) => self.on_invoice_failed(event, info).await,
            BillingEventKind::RefundCreated(info) => self.on_refund(event, info).await,
            BillingEventKind::Unrecognized { event_type, reason } => {
                debug!(
                    event_id = %event.id,
                    event_type = %event_type,
                    "event outside reconciliation scope"
                );
                Ok(ReconcileOutcome::ignored(
                    reason
                        .clone()
                        .unwrap_or_else(|| format!("unhandled event type {}", event_type)),
                ))
            }
        }
    }

    // ── per-event handlers ──────────────────────────────────────────

    async fn on_checkout(
        &self,
        event: &BillingEvent,
        info: &CheckoutInfo,
    ) -> Result<ReconcileOutcome, BillingError> {
        if info.mode != CheckoutMode::Subscription {
            return Ok(ReconcileOutcome::ignored("non-subscription checkout"));
        }
        let subscription_id = match &info.subscription_id {
            Some(id) => id.clone(),
            None => {
                return Ok(ReconcileOutcome::ignored(
                    "checkout session carries no subscription",
                ))
            }
        };

        let member = match self.resolve_checkout_member(event, info).await? {
            Some(member) => member,
            None => return Ok(ReconcileOutcome::ignored("no member for checkout session")),
        };

        // The session payload has no status or period data; the engine
        // retrieves the subscription it created.
        let snapshot = match self.provider.get_subscription(&subscription_id).await? {
            Some(snapshot) => snapshot,
            None => {
                warn!(
                    event_id = %event.id,
                    subscription_id = %subscription_id,
                    "checkout references a subscription the provider no longer has"
                );
                return Ok(ReconcileOutcome::ignored("subscription not retrievable"));
            }
        };

        if member.customer_id.as_deref() != Some(snapshot.customer_id.as_str()) {
            let mut updated = member.clone();
            updated.customer_id = Some(snapshot.customer_id.clone());
            updated.updated_at = Timestamp::now();
            self.store.update_member(&updated).await.map_err(BillingError::from)?;
        }

        self.attach_or_refresh(event, member, &snapshot).await
    }

    async fn on_subscription_upsert(
        &self,
        event: &BillingEvent,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<ReconcileOutcome, BillingError> {
        let existing = self
            .store
            .find_subscription(&snapshot.subscription_id)
            .await
            .map_err(BillingError::from)?;

        match existing {
            Some(_) => self.refresh_from_snapshot(event, snapshot).await,
            None => {
                // A record can appear here before any checkout completes
                // (provider dashboard, or reactivation under a brand-new
                // subscription id for a lapsed member).
                let member = match self.member_for_customer(&snapshot.customer_id).await? {
                    Some(member) => member,
                    None => {
                        warn!(
                            event_id = %event.id,
                            event_type = %event.kind_name(),
                            customer_id = %snapshot.customer_id,
                            "orphan subscription event; no member for customer"
                        );
                        return Ok(ReconcileOutcome::ignored("no member for customer"));
                    }
                };
                self.attach_or_refresh(event, member, snapshot).await
            }
        }
    }

    async fn on_deleted(
        &self,
        event: &BillingEvent,
        close: &SubscriptionClose,
    ) -> Result<ReconcileOutcome, BillingError> {
        let event_at = close.ended_at.unwrap_or(event.created);
        let event_id = event.id.clone();
        let applied = self
            .transition_with_retry(event, &close.subscription_id, &move |record| {
                guard_fresh(record, event_at, &event_id)?;
                record.mark_canceled(event_at).map_err(BillingError::from)
            })
            .await;
        self.finish_transition(event, applied).await
    }

    async fn on_invoice_paid(
        &self,
        event: &BillingEvent,
        info: &InvoiceInfo,
    ) -> Result<ReconcileOutcome, BillingError> {
        let subscription_id = match &info.subscription_id {
            Some(id) => id.clone(),
            None => return Ok(ReconcileOutcome::ignored("invoice without subscription")),
        };

        let event_at = event.created;
        let event_id = event.id.clone();
        let (start, end) = (info.period_start, info.period_end);
        let applied = self
            .transition_with_retry(event, &subscription_id, &move |record| {
                guard_fresh(record, event_at, &event_id)?;
                record
                    .record_payment(start, end, event_at)
                    .map_err(BillingError::from)
            })
            .await;
        self.finish_transition(event, applied).await
    }

    async fn on_invoice_failed(
        &self,
        event: &BillingEvent,
        info: &InvoiceFailure,
    ) -> Result<ReconcileOutcome, BillingError> {
        let subscription_id = match &info.subscription_id {
            Some(id) => id.clone(),
            None => return Ok(ReconcileOutcome::ignored("invoice without subscription")),
        };

        let event_at = event.created;
        let event_id = event.id.clone();
        let final_attempt = info.next_attempt.is_none();
        let applied = self
            .transition_with_retry(event, &subscription_id, &move |record| {
                guard_fresh(record, event_at, &event_id)?;
                record
                    .record_payment_failure(final_attempt, event_at)
                    .map_err(BillingError::from)
            })
            .await;

        // Attempt count comes from the invoice, not the record.
        match applied {
            Ok(transition) => {
                self.log_applied(event, &transition);
                let notification =
                    failure_notification(&transition, info.attempt_count, final_attempt);
                if let Some(notification) = notification {
                    self.send(notification).await;
                }
                Ok(ReconcileOutcome::Applied {
                    subscription_id: transition.updated.subscription_id,
                    status: transition.updated.status,
                })
            }
            Err(err) => self.map_transition_error(event, err),
        }
    }

    async fn on_refund(
        &self,
        event: &BillingEvent,
        info: &RefundInfo,
    ) -> Result<ReconcileOutcome, BillingError> {
        let member = match &info.customer_id {
            Some(customer_id) => self.member_for_customer(customer_id).await?,
            None => None,
        };
        let member = match member {
            Some(member) => member,
            None => {
                warn!(
                    event_id = %event.id,
                    charge_id = %info.charge_id,
                    "refund with no resolvable member"
                );
                return Ok(ReconcileOutcome::ignored("no member for refund"));
            }
        };

        let reference = info
            .refund_id
            .clone()
            .unwrap_or_else(|| info.charge_id.clone());
        let note = BillingNote::refund(
            member.id,
            info.amount_cents,
            &info.currency,
            reference,
            info.reason.clone(),
        );
        self.store
            .append_billing_note(&note)
            .await
            .map_err(BillingError::from)?;

        info!(
            event_id = %event.id,
            member_id = %member.id,
            amount_cents = info.amount_cents,
            "refund recorded"
        );
        self.send(BillingNotification::RefundRecorded {
            member_id: member.id,
            amount_cents: info.amount_cents,
            currency: info.currency.clone(),
        })
        .await;

        Ok(ReconcileOutcome::Noted)
    }

    // ── shared plumbing ─────────────────────────────────────────────

    /// Creates the record for a member, or falls back to a transition when
    /// another event attached it first.
    async fn attach_or_refresh(
        &self,
        event: &BillingEvent,
        member: Member,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<ReconcileOutcome, BillingError> {
        let record = SubscriptionRecord::from_snapshot(member.id, snapshot, event.created)?;

        match self.store.attach_subscription(&record).await {
            Ok(()) => {
                info!(
                    event_id = %event.id,
                    subscription_id = %record.subscription_id,
                    member_id = %member.id,
                    status = %record.status,
                    "subscription attached"
                );
                self.send(BillingNotification::SubscriptionActivated {
                    member_id: member.id,
                    subscription_id: record.subscription_id.clone(),
                })
                .await;
                Ok(ReconcileOutcome::Applied {
                    subscription_id: record.subscription_id,
                    status: record.status,
                })
            }
            Err(StoreError::Duplicate { .. }) => {
                // Lost the attach race to a concurrent event; converge by
                // re-applying as an update.
                self.refresh_from_snapshot(event, snapshot).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Applies a snapshot to an existing record as a guarded transition.
    async fn refresh_from_snapshot(
        &self,
        event: &BillingEvent,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<ReconcileOutcome, BillingError> {
        let subscription_id = snapshot.subscription_id.clone();
        let snapshot = snapshot.clone();
        let event_at = event.created;
        let event_id = event.id.clone();
        let applied = self
            .transition_with_retry(event, &subscription_id, &move |record| {
                guard_fresh(record, event_at, &event_id)?;
                record
                    .apply_snapshot(&snapshot, event_at)
                    .map_err(BillingError::from)
            })
            .await;
        self.finish_transition(event, applied).await
    }

    /// Runs a transition with bounded backoff on version conflicts.
    async fn transition_with_retry(
        &self,
        event: &BillingEvent,
        subscription_id: &str,
        transition: &(dyn Fn(&SubscriptionRecord) -> Result<SubscriptionRecord, BillingError>
              + Send
              + Sync),
    ) -> Result<AppliedTransition, BillingError> {
        let mut attempts = 0u32;
        loop {
            match self.store.apply_transition(subscription_id, transition).await {
                Err(BillingError::Conflict(message)) => {
                    attempts += 1;
                    if attempts >= self.retry_limit {
                        error!(
                            event_id = %event.id,
                            subscription_id = %subscription_id,
                            attempts,
                            "transition abandoned after repeated conflicts"
                        );
                        return Err(BillingError::ExhaustedRetries { attempts });
                    }
                    debug!(
                        event_id = %event.id,
                        subscription_id = %subscription_id,
                        attempts,
                        conflict = %message,
                        "retrying transition"
                    );
                    let backoff = self.retry_backoff * (1 << (attempts - 1).min(4));
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }

    /// Standard tail for transition-based handlers: log, notify, map
    /// control-flow errors to ignored outcomes.
    async fn finish_transition(
        &self,
        event: &BillingEvent,
        applied: Result<AppliedTransition, BillingError>,
    ) -> Result<ReconcileOutcome, BillingError> {
        match applied {
            Ok(transition) => {
                self.log_applied(event, &transition);
                if let Some(notification) = status_notification(&transition) {
                    self.send(notification).await;
                }
                Ok(ReconcileOutcome::Applied {
                    subscription_id: transition.updated.subscription_id.clone(),
                    status: transition.updated.status,
                })
            }
            Err(err) => self.map_transition_error(event, err),
        }
    }

    /// Stale events, orphans, and machine vetoes become ignored outcomes;
    /// everything else propagates.
    fn map_transition_error(
        &self,
        event: &BillingEvent,
        err: BillingError,
    ) -> Result<ReconcileOutcome, BillingError> {
        match err {
            BillingError::StaleEvent { .. } => {
                debug!(
                    event_id = %event.id,
                    event_type = %event.kind_name(),
                    "event superseded by newer state"
                );
                Ok(ReconcileOutcome::ignored("superseded by a newer event"))
            }
            BillingError::NotFound { resource, id } => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.kind_name(),
                    resource,
                    id = %id,
                    "orphan reference; skipping"
                );
                Ok(ReconcileOutcome::ignored(format!(
                    "{} {} not found",
                    resource, id
                )))
            }
            BillingError::Validation(inner) => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.kind_name(),
                    reason = %inner,
                    "transition not allowed; skipping"
                );
                Ok(ReconcileOutcome::ignored(inner.to_string()))
            }
            other => Err(other),
        }
    }

    fn log_applied(&self, event: &BillingEvent, transition: &AppliedTransition) {
        info!(
            event_id = %event.id,
            event_type = %event.kind_name(),
            subscription_id = %transition.updated.subscription_id,
            member_id = %transition.updated.member_id,
            from = %transition.previous.status,
            to = %transition.updated.status,
            "transition applied"
        );
    }

    async fn send(&self, notification: BillingNotification) {
        if let Err(err) = self.notifier.notify(notification).await {
            warn!(error = %err, "notification delivery failed");
        }
    }

    async fn member_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<Member>, BillingError> {
        self.store
            .find_member_by_customer(customer_id)
            .await
            .map_err(BillingError::from)
    }

    /// Members are resolved from session metadata first, then by the
    /// customer id the provider assigned.
    async fn resolve_checkout_member(
        &self,
        event: &BillingEvent,
        info: &CheckoutInfo,
    ) -> Result<Option<Member>, BillingError> {
        if let Some(member_id) = info.member_id {
            if let Some(member) = self
                .store
                .get_member(&member_id)
                .await
                .map_err(BillingError::from)?
            {
                return Ok(Some(member));
            }
        }
        if let Some(customer_id) = &info.customer_id {
            if let Some(member) = self.member_for_customer(customer_id).await? {
                return Ok(Some(member));
            }
        }
        warn!(
            event_id = %event.id,
            session_id = %info.session_id,
            "orphan checkout session; no member resolvable"
        );
        Ok(None)
    }
}

/// Staleness guard shared by all transition closures.
fn guard_fresh(
    record: &SubscriptionRecord,
    event_at: Timestamp,
    event_id: &str,
) -> Result<(), BillingError> {
    if record.is_stale_event(&event_at) {
        return Err(BillingError::stale_event(event_id));
    }
    Ok(())
}

/// Notification for a status change, derived from the before/after pair.
fn status_notification(transition: &AppliedTransition) -> Option<BillingNotification> {
    let previous = transition.previous.status;
    let updated = &transition.updated;
    use SubscriptionStatus as S;

    match (previous, updated.status) {
        (from, S::Canceled) if from != S::Canceled => {
            Some(BillingNotification::SubscriptionCanceled {
                member_id: updated.member_id,
                subscription_id: updated.subscription_id.clone(),
            })
        }
        (from, S::Unpaid) if from != S::Unpaid => Some(BillingNotification::MembershipLapsed {
            member_id: updated.member_id,
            subscription_id: updated.subscription_id.clone(),
        }),
        (S::PastDue, S::Active) => Some(BillingNotification::PaymentRecovered {
            member_id: updated.member_id,
            subscription_id: updated.subscription_id.clone(),
        }),
        // A renewal is an active record whose paid period moved forward.
        // Active-to-active updates that only flip flags (cancel scheduled,
        // plan metadata) notify nothing.
        (S::Active, S::Active)
            if updated
                .current_period_end
                .is_after(&transition.previous.current_period_end) =>
        {
            Some(BillingNotification::SubscriptionRenewed {
                member_id: updated.member_id,
                subscription_id: updated.subscription_id.clone(),
            })
        }
        (S::Incomplete | S::Trialing, S::Active) | (S::Incomplete, S::Trialing) => {
            Some(BillingNotification::SubscriptionActivated {
                member_id: updated.member_id,
                subscription_id: updated.subscription_id.clone(),
            })
        }
        (from, S::PastDue) if from != S::PastDue => Some(BillingNotification::PaymentFailed {
            member_id: updated.member_id,
            subscription_id: updated.subscription_id.clone(),
            attempt_count: 1,
            final_attempt: false,
        }),
        _ => None,
    }
}

/// Invoice-failure notifications carry the attempt count from the invoice.
fn failure_notification(
    transition: &AppliedTransition,
    attempt_count: u32,
    final_attempt: bool,
) -> Option<BillingNotification> {
    let updated = &transition.updated;
    match updated.status {
        SubscriptionStatus::Unpaid => Some(BillingNotification::MembershipLapsed {
            member_id: updated.member_id,
            subscription_id: updated.subscription_id.clone(),
        }),
        SubscriptionStatus::PastDue => Some(BillingNotification::PaymentFailed {
            member_id: updated.member_id,
            subscription_id: updated.subscription_id.clone(),
            attempt_count,
            final_attempt,
        }),
        _ => None,
    }
}
