//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `MemberStore` - members, subscription records, and billing notes
//! - `EventLedger` - idempotency markers for provider events
//! - `PaymentProvider` - outbound payment gateway operations
//! - `Notifier` - member-facing notifications from billing changes

mod event_ledger;
mod member_store;
mod notifier;
mod payment_provider;

pub use event_ledger::{
    Admission, EventLedger, LedgerEntry, LedgerError, LedgerOutcome, MarkerState,
    DEFAULT_LEASE_SECS,
};
pub use member_store::{AppliedTransition, MemberStore, StoreError, TransitionFn};
pub use notifier::{BillingNotification, Notifier, NotifyError};
pub use payment_provider::{
    CheckoutRequest, CheckoutSession, CreateCustomerRequest, PaymentError, PaymentErrorCode,
    PaymentProvider, Price, Product, ProviderCustomer, ProviderRefund, RefundRequest,
};
