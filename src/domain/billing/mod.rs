//! Billing domain module.
//!
//! Reconciles payment-provider events against membership state.
//!
//! # Module Structure
//!
//! - `verifier` - Webhook signature verification (HMAC, replay window)
//! - `event` - Provider envelope decoding into typed billing events
//! - `subscription` - Subscription records and the status state machine
//! - `member` - Members, payer relations, and billing notes
//! - `reconciler` - The engine applying events to records
//! - `query` - Immutable member search descriptions
//! - `errors` - Billing error taxonomy with HTTP and retry mappings

mod errors;
mod event;
mod member;
mod query;
mod reconciler;
mod subscription;
mod verifier;

pub use errors::BillingError;
pub use event::{
    BillingEvent, BillingEventKind, CheckoutInfo, CheckoutMode, InvoiceFailure, InvoiceInfo,
    ProviderEvent, ProviderEventData, RefundInfo, SubscriptionClose,
};
pub use member::{
    check_payer_assignment, BillingNote, Member, MemberRoster, NoteKind, PayerError,
};
pub use query::{MemberQuery, MAX_PAGE_SIZE};
pub use reconciler::{
    ReconcileOutcome, ReconciliationEngine, DEFAULT_RETRY_BACKOFF, DEFAULT_RETRY_LIMIT,
};
pub use subscription::{SubscriptionRecord, SubscriptionSnapshot, SubscriptionStatus};
pub use verifier::{
    EventVerifier, SignatureHeader, DEFAULT_CLOCK_SKEW_SECS, DEFAULT_TOLERANCE_SECS,
};

#[cfg(test)]
pub use verifier::compute_test_signature;
