//! Application layer - Commands, Queries, and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Following CQRS, it separates command handlers (write) from query handlers (read).

pub mod handlers;

pub use handlers::{
    // Billing commands
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
    IssueRefundCommand, IssueRefundHandler, IssueRefundResult,
    ProcessWebhookCommand, ProcessWebhookHandler, ProcessWebhookResult,
    StartCheckoutCommand, StartCheckoutHandler, StartCheckoutResult,
    // Member commands
    AssignPayerCommand, AssignPayerHandler, AssignPayerResult,
    RegisterMemberCommand, RegisterMemberHandler, RegisterMemberResult,
    // Queries
    GetMemberHandler, GetMemberQuery, GetMemberResult,
    ListCatalogHandler, SearchMembersHandler,
};
