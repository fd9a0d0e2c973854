//! HTTP DTOs (Data Transfer Objects) for billing endpoints.
//!
//! These types define the JSON request/response structure for the billing API.
//! They serve as the boundary between HTTP and the application layer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::billing::{BillingNote, Member, NoteKind, ReconcileOutcome, SubscriptionRecord, SubscriptionStatus};
use crate::ports::{CheckoutSession, LedgerEntry, Price, Product, ProviderRefund};

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to register a new member.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterMemberRequest {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Member who pays for this member's subscription, if a dependent.
    #[serde(default)]
    pub payer_id: Option<Uuid>,
}

/// Request to assign or clear a member's payer.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignPayerRequest {
    /// The new payer; null clears the assignment.
    #[serde(default)]
    pub payer_id: Option<Uuid>,
}

/// Request to open a checkout session for a member.
#[derive(Debug, Clone, Deserialize)]
pub struct StartCheckoutRequest {
    pub member_id: Uuid,
    /// The price to subscribe to.
    pub price_id: String,
    /// URL to redirect after successful checkout.
    pub success_url: String,
    /// URL to redirect after cancelled checkout.
    pub cancel_url: String,
    /// Optional free trial length in days.
    #[serde(default)]
    pub trial_days: Option<u32>,
}

/// Request to cancel a subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelSubscriptionRequest {
    /// When true, the subscription keeps access until the paid period ends.
    /// When false, cancellation takes effect immediately.
    #[serde(default)]
    pub at_period_end: bool,
}

/// Request to refund a charge for a member.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueRefundRequest {
    pub member_id: Uuid,
    pub charge_id: String,
    /// Partial refund amount; omit to refund the full charge.
    #[serde(default)]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Query parameters for the member search endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchMembersParams {
    /// Case-insensitive fragment matched against the full name.
    #[serde(default)]
    pub name: Option<String>,
    /// Exact email match.
    #[serde(default)]
    pub email: Option<String>,
    /// Current subscription status filter.
    #[serde(default)]
    pub status: Option<SubscriptionStatus>,
    /// Filter to dependents of this payer.
    #[serde(default)]
    pub payer_id: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Query parameters for the failed-events listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FailedEventsParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Member details for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct MemberResponse {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
    pub payer_id: Option<String>,
    /// Provider customer id, present once the member has entered billing.
    pub customer_id: Option<String>,
    /// When the member was created (ISO 8601).
    pub created_at: String,
}

impl From<Member> for MemberResponse {
    fn from(member: Member) -> Self {
        Self {
            id: member.id.to_string(),
            first_name: member.first_name,
            last_name: member.last_name,
            email: member.email,
            phone: member.phone,
            photo_url: member.photo_url,
            payer_id: member.payer_id.map(|id| id.to_string()),
            customer_id: member.customer_id,
            created_at: member.created_at.as_datetime().to_rfc3339(),
        }
    }
}

/// Subscription details for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub subscription_id: String,
    pub member_id: String,
    pub status: SubscriptionStatus,
    /// Whether the status currently grants facility access.
    pub has_access: bool,
    pub price_id: Option<String>,
    pub current_period_start: String,
    pub current_period_end: String,
    pub cancel_at_period_end: bool,
}

impl From<SubscriptionRecord> for SubscriptionResponse {
    fn from(record: SubscriptionRecord) -> Self {
        let has_access = record.has_access();
        Self {
            subscription_id: record.subscription_id,
            member_id: record.member_id.to_string(),
            status: record.status,
            has_access,
            price_id: record.price_id,
            current_period_start: record.current_period_start.as_datetime().to_rfc3339(),
            current_period_end: record.current_period_end.as_datetime().to_rfc3339(),
            cancel_at_period_end: record.cancel_at_period_end,
        }
    }
}

/// Billing note (refund record) for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct BillingNoteResponse {
    pub id: String,
    pub kind: NoteKind,
    pub amount_cents: i64,
    pub currency: String,
    /// Provider reference (refund id, charge id).
    pub reference: String,
    pub detail: Option<String>,
    pub created_at: String,
}

impl From<BillingNote> for BillingNoteResponse {
    fn from(note: BillingNote) -> Self {
        Self {
            id: note.id.to_string(),
            kind: note.kind,
            amount_cents: note.amount_cents,
            currency: note.currency,
            reference: note.reference,
            detail: note.detail,
            created_at: note.created_at.as_datetime().to_rfc3339(),
        }
    }
}

/// Response for the member detail endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MemberDetailResponse {
    pub member: MemberResponse,
    pub dependents: Vec<MemberResponse>,
    pub subscription: Option<SubscriptionResponse>,
    pub notes: Vec<BillingNoteResponse>,
}

/// Response for the member search endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MemberListResponse {
    pub members: Vec<MemberResponse>,
    pub limit: usize,
    pub offset: usize,
}

/// Response for the member subscription lookup; `subscription` is null for
/// members who have never entered billing.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionLookupResponse {
    pub subscription: Option<SubscriptionResponse>,
}

/// Response for checkout initiation.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub session_id: String,
    /// Session expiry, unix seconds.
    pub expires_at: i64,
}

impl From<CheckoutSession> for CheckoutResponse {
    fn from(session: CheckoutSession) -> Self {
        Self {
            checkout_url: session.url,
            session_id: session.id,
            expires_at: session.expires_at,
        }
    }
}

/// Response for admin cancellation.
#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
}

/// Response for an issued refund.
#[derive(Debug, Clone, Serialize)]
pub struct RefundResponse {
    pub refund_id: String,
    pub charge_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
}

impl From<ProviderRefund> for RefundResponse {
    fn from(refund: ProviderRefund) -> Self {
        Self {
            refund_id: refund.id,
            charge_id: refund.charge_id,
            amount_cents: refund.amount_cents,
            currency: refund.currency,
            status: refund.status,
        }
    }
}

/// Response for the plan catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogResponse {
    pub products: Vec<Product>,
    pub prices: Vec<Price>,
}

/// Response for the webhook endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    /// "applied", "ignored", "noted", or "already_processed".
    pub result: &'static str,
}

impl WebhookAck {
    pub fn applied() -> Self {
        Self { result: "applied" }
    }

    pub fn ignored() -> Self {
        Self { result: "ignored" }
    }

    pub fn noted() -> Self {
        Self { result: "noted" }
    }

    pub fn already_processed() -> Self {
        Self {
            result: "already_processed",
        }
    }

    pub fn for_outcome(outcome: &ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Applied { .. } => Self::applied(),
            ReconcileOutcome::Ignored { .. } => Self::ignored(),
            ReconcileOutcome::Noted => Self::noted(),
        }
    }
}

/// Failed ledger marker for operator review.
#[derive(Debug, Clone, Serialize)]
pub struct FailedEventResponse {
    pub event_id: String,
    pub event_type: String,
    /// Failure message recorded at completion.
    pub detail: Option<String>,
    pub attempts: u32,
    pub first_seen_at: String,
    pub last_attempt_at: String,
}

impl From<LedgerEntry> for FailedEventResponse {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            event_id: entry.event_id,
            event_type: entry.event_type,
            detail: entry.detail,
            attempts: entry.attempts,
            first_seen_at: entry.first_seen_at.as_datetime().to_rfc3339(),
            last_attempt_at: entry.updated_at.as_datetime().to_rfc3339(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Response DTO
// ════════════════════════════════════════════════════════════════════════════════

/// Standard error response for API errors.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}
