//! PostgreSQL adapters - database implementations of the persistence ports.
//!
//! - `PostgresMemberStore` - members, subscription records, and billing notes
//! - `PostgresEventLedger` - idempotency markers keyed by event id

mod event_ledger;
mod member_store;

pub use event_ledger::PostgresEventLedger;
pub use member_store::PostgresMemberStore;
