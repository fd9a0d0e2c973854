//! Billing events: the provider's webhook envelope and its typed decoding.
//!
//! The verifier hands over a `ProviderEvent` (raw envelope, payload still an
//! opaque JSON object). `BillingEvent::from_provider` turns it into a tagged
//! `BillingEventKind`, each variant carrying only the fields its event type
//! guarantees, so the reconciliation engine dispatches exhaustively instead
//! of probing JSON shapes. Event types and payload shapes outside the
//! modeled lifecycle decode to `Unrecognized` and are acknowledged, never
//! failed: the provider emits far more event types than billing consumes.

use crate::domain::billing::subscription::{SubscriptionSnapshot, SubscriptionStatus};
use crate::domain::foundation::{MemberId, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Raw webhook envelope as the provider serializes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEvent {
    /// Provider-assigned, globally unique event id.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix seconds, stamped by the provider at emission.
    pub created: i64,
    pub data: ProviderEventData,
    #[serde(default)]
    pub livemode: bool,
    #[serde(default)]
    pub api_version: Option<String>,
}

/// Payload container; `object` is the event-type-specific document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEventData {
    pub object: Value,
}

/// A decoded, immutable billing fact.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingEvent {
    pub id: String,
    pub created: Timestamp,
    pub livemode: bool,
    pub kind: BillingEventKind,
}

/// One variant per event type the reconciliation engine consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingEventKind {
    CheckoutCompleted(CheckoutInfo),
    SubscriptionCreated(SubscriptionSnapshot),
    SubscriptionUpdated(SubscriptionSnapshot),
    SubscriptionDeleted(SubscriptionClose),
    InvoicePaid(InvoiceInfo),
    InvoiceFailed(InvoiceFailure),
    RefundCreated(RefundInfo),
    /// Anything billing does not model; acknowledged as ignored.
    Unrecognized {
        event_type: String,
        reason: Option<String>,
    },
}

/// `checkout.session.completed` payload fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutInfo {
    pub session_id: String,
    pub mode: CheckoutMode,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    /// Member id carried in the session metadata, when the checkout was
    /// started by this backend.
    pub member_id: Option<MemberId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    Subscription,
    Payment,
    Setup,
}

impl CheckoutMode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "subscription" => Some(CheckoutMode::Subscription),
            "payment" => Some(CheckoutMode::Payment),
            "setup" => Some(CheckoutMode::Setup),
            _ => None,
        }
    }
}

/// `customer.subscription.deleted` payload fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionClose {
    pub subscription_id: String,
    pub customer_id: String,
    pub ended_at: Option<Timestamp>,
}

/// `invoice.paid` payload fields.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceInfo {
    pub invoice_id: String,
    pub customer_id: String,
    pub subscription_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub period_start: Timestamp,
    pub period_end: Timestamp,
}

/// `invoice.payment_failed` payload fields.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceFailure {
    pub invoice_id: String,
    pub customer_id: String,
    pub subscription_id: Option<String>,
    pub attempt_count: u32,
    /// Absent when the provider has given up retrying this invoice.
    pub next_attempt: Option<Timestamp>,
}

/// `charge.refunded` payload fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RefundInfo {
    pub charge_id: String,
    pub refund_id: Option<String>,
    pub customer_id: Option<String>,
    pub invoice_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub reason: Option<String>,
}

impl BillingEvent {
    /// Decodes a verified provider envelope into a typed event.
    ///
    /// Fails only on structurally broken input (blank event id, malformed
    /// payload for a recognized type). Unknown event types and unmodeled
    /// subscription statuses decode to `Unrecognized`.
    pub fn from_provider(event: &ProviderEvent) -> Result<Self, ValidationError> {
        if event.id.trim().is_empty() {
            return Err(ValidationError::empty_field("id"));
        }
        let kind = decode_kind(&event.event_type, &event.data.object)?;
        Ok(Self {
            id: event.id.clone(),
            created: Timestamp::from_unix_secs(event.created),
            livemode: event.livemode,
            kind,
        })
    }

    /// Builds an event for the synchronous path: API responses fed through
    /// the same engine entry point as webhooks (admin cancellation, refund
    /// issuance). Synthetic ids are prefixed so logs distinguish them.
    pub fn synthetic(kind: BillingEventKind, livemode: bool) -> Self {
        Self {
            id: format!("api_{}", Uuid::new_v4().simple()),
            created: Timestamp::now(),
            livemode,
            kind,
        }
    }

    /// Canonical event-type string, for the ledger and structured logs.
    pub fn kind_name(&self) -> &str {
        match &self.kind {
            BillingEventKind::CheckoutCompleted(_) => "checkout.session.completed",
            BillingEventKind::SubscriptionCreated(_) => "customer.subscription.created",
            BillingEventKind::SubscriptionUpdated(_) => "customer.subscription.updated",
            BillingEventKind::SubscriptionDeleted(_) => "customer.subscription.deleted",
            BillingEventKind::InvoicePaid(_) => "invoice.paid",
            BillingEventKind::InvoiceFailed(_) => "invoice.payment_failed",
            BillingEventKind::RefundCreated(_) => "charge.refunded",
            BillingEventKind::Unrecognized { event_type, .. } => event_type,
        }
    }

    /// Subscription id referenced by this event, when the type carries one.
    pub fn subscription_id(&self) -> Option<&str> {
        match &self.kind {
            BillingEventKind::CheckoutCompleted(info) => info.subscription_id.as_deref(),
            BillingEventKind::SubscriptionCreated(snap)
            | BillingEventKind::SubscriptionUpdated(snap) => Some(&snap.subscription_id),
            BillingEventKind::SubscriptionDeleted(close) => Some(&close.subscription_id),
            BillingEventKind::InvoicePaid(info) => info.subscription_id.as_deref(),
            BillingEventKind::InvoiceFailed(info) => info.subscription_id.as_deref(),
            BillingEventKind::RefundCreated(_) | BillingEventKind::Unrecognized { .. } => None,
        }
    }
}

fn decode_kind(event_type: &str, object: &Value) -> Result<BillingEventKind, ValidationError> {
    match event_type {
        "checkout.session.completed" => decode_checkout(object),
        "customer.subscription.created" => {
            decode_subscription(event_type, object).map(|d| match d {
                Decoded::Snapshot(s) => BillingEventKind::SubscriptionCreated(s),
                Decoded::Skip(kind) => kind,
            })
        }
        "customer.subscription.updated" => {
            decode_subscription(event_type, object).map(|d| match d {
                Decoded::Snapshot(s) => BillingEventKind::SubscriptionUpdated(s),
                Decoded::Skip(kind) => kind,
            })
        }
        "customer.subscription.deleted" => decode_subscription_close(object),
        "invoice.paid" | "invoice.payment_succeeded" => decode_invoice_paid(object),
        "invoice.payment_failed" => decode_invoice_failed(object),
        "charge.refunded" => decode_refund(object),
        other => Ok(BillingEventKind::Unrecognized {
            event_type: other.to_string(),
            reason: None,
        }),
    }
}

fn parse_error(event_type: &str, err: impl std::fmt::Display) -> ValidationError {
    ValidationError::invalid_format(
        "data.object",
        format!("{} payload: {}", event_type, err),
    )
}

// ── wire mirrors for the payload objects ────────────────────────────

#[derive(Deserialize)]
struct CheckoutSessionPayload {
    id: String,
    mode: Option<String>,
    customer: Option<String>,
    subscription: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

fn decode_checkout(object: &Value) -> Result<BillingEventKind, ValidationError> {
    let payload: CheckoutSessionPayload = serde_json::from_value(object.clone())
        .map_err(|e| parse_error("checkout.session.completed", e))?;
    let mode = payload
        .mode
        .as_deref()
        .and_then(CheckoutMode::parse)
        .unwrap_or(CheckoutMode::Payment);
    let member_id = payload
        .metadata
        .get("member_id")
        .and_then(|s| s.parse::<MemberId>().ok());
    Ok(BillingEventKind::CheckoutCompleted(CheckoutInfo {
        session_id: payload.id,
        mode,
        customer_id: payload.customer,
        subscription_id: payload.subscription,
        member_id,
    }))
}

#[derive(Deserialize)]
struct SubscriptionPayload {
    id: String,
    customer: String,
    status: String,
    current_period_start: i64,
    current_period_end: i64,
    #[serde(default)]
    cancel_at_period_end: bool,
    items: Option<SubscriptionItems>,
    ended_at: Option<i64>,
}

#[derive(Deserialize)]
struct SubscriptionItems {
    #[serde(default)]
    data: Vec<SubscriptionItem>,
}

#[derive(Deserialize)]
struct SubscriptionItem {
    price: Option<PriceRef>,
}

#[derive(Deserialize)]
struct PriceRef {
    id: String,
}

enum Decoded {
    Snapshot(SubscriptionSnapshot),
    Skip(BillingEventKind),
}

fn decode_subscription(event_type: &str, object: &Value) -> Result<Decoded, ValidationError> {
    let payload: SubscriptionPayload =
        serde_json::from_value(object.clone()).map_err(|e| parse_error(event_type, e))?;
    let status = match SubscriptionStatus::parse(&payload.status) {
        Ok(status) => status,
        // Statuses like "paused" sit outside the modeled lifecycle.
        Err(_) => {
            return Ok(Decoded::Skip(BillingEventKind::Unrecognized {
                event_type: event_type.to_string(),
                reason: Some(format!(
                    "subscription status '{}' is outside the modeled lifecycle",
                    payload.status
                )),
            }))
        }
    };
    let price_id = payload
        .items
        .and_then(|items| items.data.into_iter().next())
        .and_then(|item| item.price)
        .map(|price| price.id);
    Ok(Decoded::Snapshot(SubscriptionSnapshot {
        subscription_id: payload.id,
        customer_id: payload.customer,
        status,
        price_id,
        current_period_start: Timestamp::from_unix_secs(payload.current_period_start),
        current_period_end: Timestamp::from_unix_secs(payload.current_period_end),
        cancel_at_period_end: payload.cancel_at_period_end,
    }))
}

fn decode_subscription_close(object: &Value) -> Result<BillingEventKind, ValidationError> {
    let payload: SubscriptionPayload = serde_json::from_value(object.clone())
        .map_err(|e| parse_error("customer.subscription.deleted", e))?;
    Ok(BillingEventKind::SubscriptionDeleted(SubscriptionClose {
        subscription_id: payload.id,
        customer_id: payload.customer,
        ended_at: payload.ended_at.map(Timestamp::from_unix_secs),
    }))
}

#[derive(Deserialize)]
struct InvoicePayload {
    id: String,
    customer: String,
    subscription: Option<String>,
    amount_paid: Option<i64>,
    #[serde(default)]
    currency: String,
    attempt_count: Option<u32>,
    next_payment_attempt: Option<i64>,
    lines: Option<InvoiceLines>,
    period_start: Option<i64>,
    period_end: Option<i64>,
}

#[derive(Deserialize)]
struct InvoiceLines {
    #[serde(default)]
    data: Vec<InvoiceLine>,
}

#[derive(Deserialize)]
struct InvoiceLine {
    period: Option<LinePeriod>,
}

#[derive(Deserialize)]
struct LinePeriod {
    start: i64,
    end: i64,
}

impl InvoicePayload {
    /// Billing period: the first line's period when present, otherwise the
    /// invoice-level bounds.
    fn period(&self) -> Option<(i64, i64)> {
        let line = self
            .lines
            .as_ref()
            .and_then(|lines| lines.data.iter().find_map(|l| l.period.as_ref()));
        match line {
            Some(p) => Some((p.start, p.end)),
            None => match (self.period_start, self.period_end) {
                (Some(s), Some(e)) => Some((s, e)),
                _ => None,
            },
        }
    }
}

fn decode_invoice_paid(object: &Value) -> Result<BillingEventKind, ValidationError> {
    let payload: InvoicePayload =
        serde_json::from_value(object.clone()).map_err(|e| parse_error("invoice.paid", e))?;
    let (start, end) = payload
        .period()
        .ok_or_else(|| parse_error("invoice.paid", "missing billing period"))?;
    Ok(BillingEventKind::InvoicePaid(InvoiceInfo {
        invoice_id: payload.id,
        customer_id: payload.customer,
        subscription_id: payload.subscription,
        amount_cents: payload.amount_paid.unwrap_or(0),
        currency: payload.currency,
        period_start: Timestamp::from_unix_secs(start),
        period_end: Timestamp::from_unix_secs(end),
    }))
}

fn decode_invoice_failed(object: &Value) -> Result<BillingEventKind, ValidationError> {
    let payload: InvoicePayload = serde_json::from_value(object.clone())
        .map_err(|e| parse_error("invoice.payment_failed", e))?;
    Ok(BillingEventKind::InvoiceFailed(InvoiceFailure {
        invoice_id: payload.id,
        customer_id: payload.customer,
        subscription_id: payload.subscription,
        attempt_count: payload.attempt_count.unwrap_or(1),
        next_attempt: payload.next_payment_attempt.map(Timestamp::from_unix_secs),
    }))
}

#[derive(Deserialize)]
struct ChargePayload {
    id: String,
    customer: Option<String>,
    invoice: Option<String>,
    #[serde(default)]
    amount_refunded: i64,
    #[serde(default)]
    currency: String,
    refunds: Option<RefundList>,
}

#[derive(Deserialize)]
struct RefundList {
    #[serde(default)]
    data: Vec<RefundObject>,
}

#[derive(Deserialize)]
struct RefundObject {
    id: String,
    reason: Option<String>,
}

fn decode_refund(object: &Value) -> Result<BillingEventKind, ValidationError> {
    let payload: ChargePayload =
        serde_json::from_value(object.clone()).map_err(|e| parse_error("charge.refunded", e))?;
    let newest = payload
        .refunds
        .and_then(|refunds| refunds.data.into_iter().next());
    Ok(BillingEventKind::RefundCreated(RefundInfo {
        charge_id: payload.id,
        refund_id: newest.as_ref().map(|r| r.id.clone()),
        customer_id: payload.customer,
        invoice_id: payload.invoice,
        amount_cents: payload.amount_refunded,
        currency: payload.currency,
        reason: newest.and_then(|r| r.reason),
    }))
}
