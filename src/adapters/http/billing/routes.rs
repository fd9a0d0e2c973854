//! Axum router configuration for billing endpoints.
//!
//! This module defines the route structure for the billing API and wires
//! each route to its corresponding handler.

use axum::{
    routing::{get, post, put},
    Router,
};

use super::handlers::{
    assign_payer, cancel_subscription, get_catalog, get_member, get_member_subscription,
    handle_stripe_webhook, health, issue_refund, list_failed_events, register_member,
    search_members, start_checkout, BillingAppState,
};

/// Create the member API router.
///
/// # Routes
/// - `POST /` - Register a new member
/// - `GET /` - Search the member roster
/// - `GET /:id` - Get a member with dependents, subscription, and notes
/// - `PUT /:id/payer` - Assign or clear the member's payer
/// - `GET /:id/subscription` - Current subscription for the member
pub fn member_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/", post(register_member).get(search_members))
        .route("/:id", get(get_member))
        .route("/:id/payer", put(assign_payer))
        .route("/:id/subscription", get(get_member_subscription))
}

/// Create the billing operations router.
///
/// # Routes
/// - `POST /checkout` - Open a checkout session
/// - `POST /subscriptions/:id/cancel` - Cancel a subscription
/// - `POST /refunds` - Refund a charge
/// - `GET /catalog` - Products and prices
/// - `GET /failed-events` - Failed ledger markers for operator review
pub fn billing_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/checkout", post(start_checkout))
        .route("/subscriptions/:id/cancel", post(cancel_subscription))
        .route("/refunds", post(issue_refund))
        .route("/catalog", get(get_catalog))
        .route("/failed-events", get(list_failed_events))
}

/// Create the provider webhook router.
///
/// This is separate from the admin routes because webhook deliveries carry
/// no operator credentials; they are authenticated by signature instead.
///
/// # Routes
/// - `POST /stripe` - Ingest a provider webhook delivery
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/stripe", post(handle_stripe_webhook))
}

/// Create the complete billing module router.
///
/// Combines member, billing, and webhook routes into a single router
/// suitable for serving as the application surface.
pub fn billing_router() -> Router<BillingAppState> {
    Router::new()
        .nest("/members", member_routes())
        .nest("/billing", billing_routes())
        .nest("/webhooks", webhook_routes())
        .route("/health", get(health))
}
