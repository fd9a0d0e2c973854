//! Billing handlers.
//!
//! Command and query handlers for membership billing operations including:
//!
//! ## Commands
//! - Registering members and wiring payer relationships
//! - Opening checkout sessions
//! - Cancelling subscriptions and issuing refunds
//! - Processing provider webhooks
//!
//! ## Queries
//! - Get a member with billing context
//! - Search the member roster
//! - List the plan catalog

mod assign_payer;
mod cancel_subscription;
mod get_member;
mod issue_refund;
mod list_catalog;
mod process_webhook;
mod register_member;
mod search_members;
mod start_checkout;

// Commands
pub use assign_payer::{AssignPayerCommand, AssignPayerHandler, AssignPayerResult};
pub use cancel_subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
};
pub use issue_refund::{IssueRefundCommand, IssueRefundHandler, IssueRefundResult};
pub use process_webhook::{ProcessWebhookCommand, ProcessWebhookHandler, ProcessWebhookResult};
pub use register_member::{RegisterMemberCommand, RegisterMemberHandler, RegisterMemberResult};
pub use start_checkout::{StartCheckoutCommand, StartCheckoutHandler, StartCheckoutResult};

// Queries
pub use get_member::{GetMemberHandler, GetMemberQuery, GetMemberResult};
pub use list_catalog::{CatalogResult, ListCatalogHandler};
pub use search_members::{SearchMembersHandler, SearchMembersResult};
