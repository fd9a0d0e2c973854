//! HTTP adapter for billing endpoints.
//!
//! Exposes the billing domain via REST API:
//! - `POST /members` - Register a new member
//! - `GET /members` - Search the member roster
//! - `GET /members/:id` - Member with dependents, subscription, and notes
//! - `PUT /members/:id/payer` - Assign or clear the member's payer
//! - `GET /members/:id/subscription` - Current subscription
//! - `POST /billing/checkout` - Open a checkout session
//! - `POST /billing/subscriptions/:id/cancel` - Cancel a subscription
//! - `POST /billing/refunds` - Refund a charge
//! - `GET /billing/catalog` - Products and prices
//! - `GET /billing/failed-events` - Failed ledger markers
//! - `POST /webhooks/stripe` - Ingest provider webhooks
//! - `GET /health` - Liveness

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::BillingAppState;
pub use routes::billing_router;
