//! MemberStore port - persistence for members, subscriptions, and notes.
//!
//! The reconciliation engine owns all subscription writes and performs them
//! through `apply_transition`, a transactional read-modify-write scoped to a
//! single record. Implementations serialize concurrent transitions per
//! subscription id with optimistic versioning, never a global lock.

use async_trait::async_trait;

use crate::domain::billing::{BillingError, BillingNote, Member, MemberQuery, SubscriptionRecord};
use crate::domain::foundation::MemberId;
use thiserror::Error;

/// Errors from member store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("{resource} already exists: {id}")]
    Duplicate { resource: &'static str, id: String },

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    PayerRule(#[from] crate::domain::billing::PayerError),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn duplicate(resource: &'static str, id: impl Into<String>) -> Self {
        StoreError::Duplicate {
            resource,
            id: id.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        StoreError::Conflict(message.into())
    }

    pub fn database(message: impl Into<String>) -> Self {
        StoreError::Database(message.into())
    }
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { resource, id } => BillingError::NotFound { resource, id },
            StoreError::Duplicate { resource, id } => {
                BillingError::conflict(format!("{} already exists: {}", resource, id))
            }
            StoreError::Conflict(message) => BillingError::Conflict(message),
            StoreError::PayerRule(inner) => BillingError::Payer(inner),
            StoreError::Database(message) => BillingError::Store(message),
        }
    }
}

/// Pure function from the current record to its successor.
///
/// Implementations of `apply_transition` may invoke this more than once
/// (each attempt against a freshly loaded record), so it must be free of
/// side effects.
pub type TransitionFn<'a> =
    &'a (dyn Fn(&SubscriptionRecord) -> Result<SubscriptionRecord, BillingError> + Send + Sync);

/// Result of a successful `apply_transition`, carrying the record as it was
/// before and after the write so callers can derive notifications from the
/// status change.
#[derive(Debug, Clone)]
pub struct AppliedTransition {
    pub previous: SubscriptionRecord,
    pub updated: SubscriptionRecord,
}

/// Port for the membership store.
#[async_trait]
pub trait MemberStore: Send + Sync {
    /// Inserts a new member. Fails with `Duplicate` if the id is taken.
    async fn insert_member(&self, member: &Member) -> Result<(), StoreError>;

    /// Updates a member. Runs the payer-cycle check whenever `payer_id`
    /// is set, failing with `PayerRule` on self-reference or cycle.
    async fn update_member(&self, member: &Member) -> Result<(), StoreError>;

    async fn get_member(&self, id: &MemberId) -> Result<Option<Member>, StoreError>;

    /// Looks up the member owning the given external customer id.
    async fn find_member_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<Member>, StoreError>;

    /// Members whose bills the given payer covers (derived relation).
    async fn dependents_of(&self, payer_id: &MemberId) -> Result<Vec<Member>, StoreError>;

    /// Executes an immutable query description, applying its filters and
    /// pagination.
    async fn search(&self, query: &MemberQuery) -> Result<Vec<Member>, StoreError>;

    /// Creates the subscription record for a member. One record per
    /// subscription id; fails with `Duplicate` on reuse.
    async fn attach_subscription(&self, record: &SubscriptionRecord) -> Result<(), StoreError>;

    async fn subscription_of(
        &self,
        member_id: &MemberId,
    ) -> Result<Option<SubscriptionRecord>, StoreError>;

    async fn find_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError>;

    async fn find_subscription_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError>;

    /// Transactional read-modify-write on one subscription record.
    ///
    /// Loads the current record, applies `transition`, and writes the result
    /// back guarded by the record version. A bounded number of immediate
    /// re-attempts absorbs version races; persistent contention surfaces as
    /// `Conflict`. Errors returned by `transition` itself propagate
    /// unchanged (the staleness guard travels this path).
    async fn apply_transition(
        &self,
        subscription_id: &str,
        transition: TransitionFn<'_>,
    ) -> Result<AppliedTransition, BillingError>;

    /// Appends an audit note to a member's billing history.
    async fn append_billing_note(&self, note: &BillingNote) -> Result<(), StoreError>;

    async fn notes_for(&self, member_id: &MemberId) -> Result<Vec<BillingNote>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Trait object safety test
    #[test]
    fn member_store_is_object_safe() {
        fn _accepts_dyn(_store: &dyn MemberStore) {}
    }

    #[test]
    fn store_errors_map_to_billing_errors() {
        let err: BillingError = StoreError::not_found("member", "m1").into();
        assert!(matches!(err, BillingError::NotFound { .. }));

        let err: BillingError = StoreError::conflict("version 3 expected").into();
        assert!(matches!(err, BillingError::Conflict(_)));

        let err: BillingError = StoreError::database("connection reset").into();
        assert!(matches!(err, BillingError::Store(_)));
    }

    #[test]
    fn duplicate_maps_to_conflict() {
        let err: BillingError = StoreError::duplicate("subscription", "sub_1").into();
        assert!(matches!(err, BillingError::Conflict(_)));
        assert!(err.to_string().contains("sub_1"));
    }
}
