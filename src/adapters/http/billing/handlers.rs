//! HTTP handlers for billing endpoints.
//!
//! These handlers connect Axum routes to application layer command/query handlers.

use std::sync::Arc;

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::handlers::billing::{
    AssignPayerCommand, AssignPayerHandler, CancelSubscriptionCommand, CancelSubscriptionHandler,
    GetMemberHandler, GetMemberQuery, IssueRefundCommand, IssueRefundHandler, ListCatalogHandler,
    ProcessWebhookCommand, ProcessWebhookHandler, ProcessWebhookResult, RegisterMemberCommand,
    RegisterMemberHandler, SearchMembersHandler, StartCheckoutCommand, StartCheckoutHandler,
};
use crate::domain::billing::{
    BillingError, EventVerifier, MemberQuery, ReconciliationEngine, MAX_PAGE_SIZE,
};
use crate::domain::foundation::MemberId;
use crate::ports::{EventLedger, LedgerError, MemberStore, PaymentProvider, StoreError};

use super::dto::{
    AssignPayerRequest, CancelResponse, CancelSubscriptionRequest, CatalogResponse,
    CheckoutResponse, ErrorResponse, FailedEventResponse, FailedEventsParams, IssueRefundRequest,
    MemberDetailResponse, MemberListResponse, MemberResponse, RefundResponse,
    RegisterMemberRequest, SearchMembersParams, StartCheckoutRequest, SubscriptionLookupResponse,
    SubscriptionResponse, WebhookAck,
};

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
///
/// This struct is cloned for each request and contains Arc-wrapped dependencies
/// for efficient sharing across handlers.
#[derive(Clone)]
pub struct BillingAppState {
    pub store: Arc<dyn MemberStore>,
    pub ledger: Arc<dyn EventLedger>,
    pub provider: Arc<dyn PaymentProvider>,
    pub verifier: Arc<EventVerifier>,
    pub engine: Arc<ReconciliationEngine>,
    /// Mode tag stamped onto synthetic events raised by admin endpoints.
    pub livemode: bool,
}

impl BillingAppState {
    /// Create handlers on demand from the shared state.
    pub fn webhook_handler(&self) -> ProcessWebhookHandler {
        ProcessWebhookHandler::new(
            self.verifier.clone(),
            self.ledger.clone(),
            self.engine.clone(),
        )
    }

    pub fn register_member_handler(&self) -> RegisterMemberHandler {
        RegisterMemberHandler::new(self.store.clone())
    }

    pub fn assign_payer_handler(&self) -> AssignPayerHandler {
        AssignPayerHandler::new(self.store.clone())
    }

    pub fn get_member_handler(&self) -> GetMemberHandler {
        GetMemberHandler::new(self.store.clone())
    }

    pub fn search_members_handler(&self) -> SearchMembersHandler {
        SearchMembersHandler::new(self.store.clone())
    }

    pub fn start_checkout_handler(&self) -> StartCheckoutHandler {
        StartCheckoutHandler::new(self.store.clone(), self.provider.clone())
    }

    pub fn cancel_subscription_handler(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(self.provider.clone(), self.engine.clone())
    }

    pub fn issue_refund_handler(&self) -> IssueRefundHandler {
        IssueRefundHandler::new(self.store.clone(), self.provider.clone(), self.engine.clone())
    }

    pub fn list_catalog_handler(&self) -> ListCatalogHandler {
        ListCatalogHandler::new(self.provider.clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook Handler
// ════════════════════════════════════════════════════════════════════════════════

/// POST /webhooks/stripe - Ingest a provider webhook delivery
///
/// Answers 2xx only once the event has reached a terminal ledger state.
/// Non-2xx responses tell the provider to redeliver.
pub async fn handle_stripe_webhook(
    State(state): State<BillingAppState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, BillingApiError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            BillingError::MalformedHeader("missing Stripe-Signature header".to_string())
        })?;

    let handler = state.webhook_handler();
    let cmd = ProcessWebhookCommand {
        payload: body.to_vec(),
        signature: signature.to_string(),
    };

    let ack = match handler.handle(cmd).await? {
        ProcessWebhookResult::Processed { outcome } => WebhookAck::for_outcome(&outcome),
        ProcessWebhookResult::AlreadyProcessed => WebhookAck::already_processed(),
    };

    Ok(Json(ack))
}

// ════════════════════════════════════════════════════════════════════════════════
// Member Handlers
// ════════════════════════════════════════════════════════════════════════════════

/// POST /members - Register a new member
pub async fn register_member(
    State(state): State<BillingAppState>,
    Json(request): Json<RegisterMemberRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.register_member_handler();
    let cmd = RegisterMemberCommand {
        first_name: request.first_name,
        last_name: request.last_name,
        email: request.email,
        phone: request.phone,
        payer_id: request.payer_id.map(MemberId::from_uuid),
    };

    let result = handler.handle(cmd).await?;

    let response = MemberResponse::from(result.member);
    Ok((StatusCode::CREATED, Json(response)))
}

/// PUT /members/:id/payer - Assign or clear a member's payer
pub async fn assign_payer(
    State(state): State<BillingAppState>,
    Path(member_id): Path<Uuid>,
    Json(request): Json<AssignPayerRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.assign_payer_handler();
    let cmd = AssignPayerCommand {
        member_id: MemberId::from_uuid(member_id),
        payer_id: request.payer_id.map(MemberId::from_uuid),
    };

    let result = handler.handle(cmd).await?;

    Ok(Json(MemberResponse::from(result.member)))
}

/// GET /members/:id - Get a member with billing context
pub async fn get_member(
    State(state): State<BillingAppState>,
    Path(member_id): Path<Uuid>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.get_member_handler();
    let query = GetMemberQuery {
        member_id: MemberId::from_uuid(member_id),
    };

    let result = handler.handle(query).await?;

    let response = MemberDetailResponse {
        member: MemberResponse::from(result.member),
        dependents: result.dependents.into_iter().map(MemberResponse::from).collect(),
        subscription: result.subscription.map(SubscriptionResponse::from),
        notes: result.notes.into_iter().map(super::dto::BillingNoteResponse::from).collect(),
    };

    Ok(Json(response))
}

/// GET /members - Search the member roster
pub async fn search_members(
    State(state): State<BillingAppState>,
    Query(params): Query<SearchMembersParams>,
) -> Result<impl IntoResponse, BillingApiError> {
    let mut query = MemberQuery::new();
    if let Some(name) = params.name {
        query = query.with_name_contains(name);
    }
    if let Some(email) = params.email {
        query = query.with_email(email);
    }
    if let Some(status) = params.status {
        query = query.with_status(status);
    }
    if let Some(payer_id) = params.payer_id {
        query = query.with_payer(MemberId::from_uuid(payer_id));
    }
    if let Some(limit) = params.limit {
        query = query.with_limit(limit);
    }
    if let Some(offset) = params.offset {
        query = query.with_offset(offset);
    }

    let handler = state.search_members_handler();
    let result = handler.handle(query).await?;

    let response = MemberListResponse {
        members: result.members.into_iter().map(MemberResponse::from).collect(),
        limit: result.limit,
        offset: result.offset,
    };

    Ok(Json(response))
}

/// GET /members/:id/subscription - Current subscription for a member
pub async fn get_member_subscription(
    State(state): State<BillingAppState>,
    Path(member_id): Path<Uuid>,
) -> Result<impl IntoResponse, BillingApiError> {
    let member_id = MemberId::from_uuid(member_id);

    // 404 for unknown members; a known member without billing history
    // answers with a null subscription.
    state
        .store
        .get_member(&member_id)
        .await?
        .ok_or_else(|| BillingError::not_found("member", member_id.to_string()))?;

    let subscription = state.store.subscription_of(&member_id).await?;

    let response = SubscriptionLookupResponse {
        subscription: subscription.map(SubscriptionResponse::from),
    };
    Ok(Json(response))
}

// ════════════════════════════════════════════════════════════════════════════════
// Billing Handlers
// ════════════════════════════════════════════════════════════════════════════════

/// POST /billing/checkout - Open a checkout session
pub async fn start_checkout(
    State(state): State<BillingAppState>,
    Json(request): Json<StartCheckoutRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.start_checkout_handler();
    let cmd = StartCheckoutCommand {
        member_id: MemberId::from_uuid(request.member_id),
        price_id: request.price_id,
        success_url: request.success_url,
        cancel_url: request.cancel_url,
        trial_days: request.trial_days,
    };

    let result = handler.handle(cmd).await?;

    let response = CheckoutResponse::from(result.session);
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /billing/subscriptions/:id/cancel - Cancel a subscription
pub async fn cancel_subscription(
    State(state): State<BillingAppState>,
    Path(subscription_id): Path<String>,
    Json(request): Json<CancelSubscriptionRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.cancel_subscription_handler();
    let cmd = CancelSubscriptionCommand {
        subscription_id,
        at_period_end: request.at_period_end,
        livemode: state.livemode,
    };

    let result = handler.handle(cmd).await?;

    let response = CancelResponse {
        status: result.status,
        cancel_at_period_end: result.cancel_at_period_end,
    };
    Ok(Json(response))
}

/// POST /billing/refunds - Refund a charge for a member
pub async fn issue_refund(
    State(state): State<BillingAppState>,
    Json(request): Json<IssueRefundRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.issue_refund_handler();
    let cmd = IssueRefundCommand {
        member_id: MemberId::from_uuid(request.member_id),
        charge_id: request.charge_id,
        amount_cents: request.amount_cents,
        reason: request.reason,
        livemode: state.livemode,
    };

    let result = handler.handle(cmd).await?;

    let response = RefundResponse::from(result.refund);
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /billing/catalog - Products and prices on offer
pub async fn get_catalog(
    State(state): State<BillingAppState>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.list_catalog_handler();
    let result = handler.handle().await?;

    let response = CatalogResponse {
        products: result.products,
        prices: result.prices,
    };
    Ok(Json(response))
}

/// GET /billing/failed-events - Failed ledger markers for operator review
pub async fn list_failed_events(
    State(state): State<BillingAppState>,
    Query(params): Query<FailedEventsParams>,
) -> Result<impl IntoResponse, BillingApiError> {
    let limit = params.limit.unwrap_or(50).min(MAX_PAGE_SIZE);
    let entries = state.ledger.find_failed(limit).await?;

    let response: Vec<FailedEventResponse> =
        entries.into_iter().map(FailedEventResponse::from).collect();
    Ok(Json(response))
}

/// GET /health - Liveness probe
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts billing errors to HTTP responses.
pub struct BillingApiError(BillingError);

impl From<BillingError> for BillingApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl From<StoreError> for BillingApiError {
    fn from(err: StoreError) -> Self {
        Self(BillingError::from(err))
    }
}

impl From<LedgerError> for BillingApiError {
    fn from(err: LedgerError) -> Self {
        Self(BillingError::from(err))
    }
}

fn error_code(err: &BillingError) -> &'static str {
    match err {
        BillingError::SignatureInvalid => "SIGNATURE_INVALID",
        BillingError::StaleDelivery => "STALE_DELIVERY",
        BillingError::SkewedDelivery => "SKEWED_DELIVERY",
        BillingError::MalformedHeader(_) => "MALFORMED_SIGNATURE_HEADER",
        BillingError::Parse(_) => "PARSE_ERROR",
        BillingError::Validation(_) => "VALIDATION_FAILED",
        BillingError::Payer(_) => "PAYER_VIOLATION",
        BillingError::NotFound { .. } => "NOT_FOUND",
        BillingError::StaleEvent { .. } => "STALE_EVENT",
        BillingError::InFlight { .. } => "EVENT_IN_FLIGHT",
        BillingError::Conflict(_) => "WRITE_CONFLICT",
        BillingError::ExhaustedRetries { .. } => "RETRIES_EXHAUSTED",
        BillingError::Provider(_) => "PROVIDER_ERROR",
        BillingError::Store(_) => "STORE_ERROR",
        BillingError::Ledger(_) => "LEDGER_ERROR",
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.0.status_code();
        let body = ErrorResponse::new(error_code(&self.0), self.0.to_string());
        (status, Json(body)).into_response()
    }
}
