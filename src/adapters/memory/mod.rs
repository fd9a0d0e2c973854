//! In-memory adapters for tests and local development.
//!
//! Process-local implementations of the persistence and notification
//! ports. Deterministic and dependency-free; production deployments use
//! the Postgres adapters instead.

mod event_ledger;
mod member_store;
mod notifier;

pub use event_ledger::InMemoryEventLedger;
pub use member_store::InMemoryMemberStore;
pub use notifier::RecordingNotifier;
