//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `http` - Axum REST API and webhook endpoint
//! - `memory` - In-memory stores for tests and local development
//! - `notify` - Log-backed notifier
//! - `postgres` - PostgreSQL persistence
//! - `stripe` - Payment provider client and its test double

pub mod http;
pub mod memory;
pub mod notify;
pub mod postgres;
pub mod stripe;

pub use notify::LogNotifier;
