//! Stripe payment gateway adapter.
//!
//! Implements the `PaymentProvider` port over Stripe's REST API:
//! customers, checkout sessions, subscription retrieval and cancellation,
//! refunds, and the product catalog.
//!
//! # Security
//!
//! - The API key is held in `secrecy::SecretString` and only exposed at
//!   the auth header
//! - Webhook signature verification lives in the domain verifier, not
//!   here; this adapter never handles inbound payloads

mod client;
mod mock_client;
mod wire;

pub use client::{StripeConfig, StripeGateway};
pub use mock_client::MockPaymentGateway;
pub use wire::{
    StripeCheckoutSession, StripeCustomer, StripeList, StripePrice, StripeProduct, StripeRefund,
    StripeSubscription,
};
