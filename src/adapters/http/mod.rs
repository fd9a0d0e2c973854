//! HTTP adapters - REST API implementations.
//!
//! The billing module carries the whole HTTP surface: admin/member
//! endpoints, the provider webhook, and the health probe.

pub mod billing;

// Re-export key types for convenience
pub use billing::billing_router;
pub use billing::BillingAppState;
