//! GetMemberHandler - query handler for one member's billing picture.

use std::sync::Arc;

use crate::domain::billing::{BillingError, BillingNote, Member, SubscriptionRecord};
use crate::domain::foundation::MemberId;
use crate::ports::MemberStore;

/// Query for a member with their billing context.
#[derive(Debug, Clone)]
pub struct GetMemberQuery {
    pub member_id: MemberId,
}

/// The member, their dependents, current subscription, and billing notes.
#[derive(Debug, Clone)]
pub struct GetMemberResult {
    pub member: Member,
    pub dependents: Vec<Member>,
    pub subscription: Option<SubscriptionRecord>,
    pub notes: Vec<BillingNote>,
}

/// Handler for the member detail query.
pub struct GetMemberHandler {
    store: Arc<dyn MemberStore>,
}

impl GetMemberHandler {
    pub fn new(store: Arc<dyn MemberStore>) -> Self {
        Self { store }
    }

    pub async fn handle(&self, query: GetMemberQuery) -> Result<GetMemberResult, BillingError> {
        let member = self
            .store
            .get_member(&query.member_id)
            .await
            .map_err(BillingError::from)?
            .ok_or_else(|| BillingError::not_found("member", query.member_id.to_string()))?;

        let dependents = self
            .store
            .dependents_of(&member.id)
            .await
            .map_err(BillingError::from)?;
        let subscription = self
            .store
            .subscription_of(&member.id)
            .await
            .map_err(BillingError::from)?;
        let notes = self
            .store
            .notes_for(&member.id)
            .await
            .map_err(BillingError::from)?;

        Ok(GetMemberResult {
            member,
            dependents,
            subscription,
            notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::adapters::memory::InMemoryMemberStore;
    use crate::domain::billing::{SubscriptionSnapshot, SubscriptionStatus};
    use crate::domain::foundation::Timestamp;

    #[tokio::test]
    async fn returns_member_with_dependents_and_subscription() {
        let store = Arc::new(InMemoryMemberStore::new());

        let payer = Member::new(MemberId::new(), "Vera", "Stone").unwrap();
        let payer_id = payer.id;
        store.insert_member(&payer).await.unwrap();

        let mut child = Member::new(MemberId::new(), "Max", "Stone").unwrap();
        child.payer_id = Some(payer_id);
        store.insert_member(&child).await.unwrap();

        let snapshot = SubscriptionSnapshot {
            subscription_id: "sub_1".to_string(),
            customer_id: "cus_1".to_string(),
            status: SubscriptionStatus::Active,
            price_id: Some("price_monthly".to_string()),
            current_period_start: Timestamp::from_unix_secs(1_700_000_000),
            current_period_end: Timestamp::from_unix_secs(1_702_592_000),
            cancel_at_period_end: false,
        };
        let record = SubscriptionRecord::from_snapshot(
            payer_id,
            &snapshot,
            Timestamp::from_unix_secs(1_700_000_000),
        )
        .unwrap();
        store.attach_subscription(&record).await.unwrap();

        let handler = GetMemberHandler::new(store);
        let result = handler
            .handle(GetMemberQuery {
                member_id: payer_id,
            })
            .await
            .unwrap();

        assert_eq!(result.member.id, payer_id);
        assert_eq!(result.dependents.len(), 1);
        assert_eq!(
            result.subscription.map(|s| s.subscription_id),
            Some("sub_1".to_string())
        );
        assert!(result.notes.is_empty());
    }

    #[tokio::test]
    async fn unknown_member_is_not_found() {
        let store = Arc::new(InMemoryMemberStore::new());
        let handler = GetMemberHandler::new(store);

        let err = handler
            .handle(GetMemberQuery {
                member_id: MemberId::new(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::NotFound { .. }));
    }
}
