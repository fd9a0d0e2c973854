//! Application handlers.
//!
//! Command and query handlers that orchestrate domain operations.

pub mod billing;

pub use billing::{
    // Commands
    AssignPayerCommand, AssignPayerHandler, AssignPayerResult,
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
    IssueRefundCommand, IssueRefundHandler, IssueRefundResult,
    ProcessWebhookCommand, ProcessWebhookHandler, ProcessWebhookResult,
    RegisterMemberCommand, RegisterMemberHandler, RegisterMemberResult,
    StartCheckoutCommand, StartCheckoutHandler, StartCheckoutResult,
    // Queries
    CatalogResult, GetMemberHandler, GetMemberQuery, GetMemberResult, ListCatalogHandler,
    SearchMembersHandler, SearchMembersResult,
};
