//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, errors)
//! - `billing` - Event reconciliation, subscriptions, members, and notes

pub mod billing;
pub mod foundation;
