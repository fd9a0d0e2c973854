//! AssignPayerHandler - command handler for household billing links.
//!
//! Assigning a payer makes the member a billing dependent; clearing it
//! makes them self-paying again. The store enforces that the payer exists
//! and that the assignment closes no cycle.

use std::sync::Arc;

use crate::domain::billing::{BillingError, Member};
use crate::domain::foundation::{MemberId, Timestamp};
use crate::ports::MemberStore;

/// Command to assign or clear a member's payer.
#[derive(Debug, Clone)]
pub struct AssignPayerCommand {
    pub member_id: MemberId,
    /// `None` clears the link.
    pub payer_id: Option<MemberId>,
}

/// Result carrying the updated member.
#[derive(Debug, Clone)]
pub struct AssignPayerResult {
    pub member: Member,
}

/// Handler for payer assignment.
pub struct AssignPayerHandler {
    store: Arc<dyn MemberStore>,
}

impl AssignPayerHandler {
    pub fn new(store: Arc<dyn MemberStore>) -> Self {
        Self { store }
    }

    pub async fn handle(&self, cmd: AssignPayerCommand) -> Result<AssignPayerResult, BillingError> {
        // 1. Load the member.
        let mut member = self
            .store
            .get_member(&cmd.member_id)
            .await
            .map_err(BillingError::from)?
            .ok_or_else(|| BillingError::not_found("member", cmd.member_id.to_string()))?;

        // 2. Apply and persist. The payer rules run inside the store write.
        member.payer_id = cmd.payer_id;
        member.updated_at = Timestamp::now();
        self.store
            .update_member(&member)
            .await
            .map_err(BillingError::from)?;

        match cmd.payer_id {
            Some(payer_id) => {
                tracing::info!(member_id = %member.id, payer_id = %payer_id, "payer assigned")
            }
            None => tracing::info!(member_id = %member.id, "payer cleared"),
        }

        Ok(AssignPayerResult { member })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::adapters::memory::InMemoryMemberStore;
    use crate::domain::billing::PayerError;

    async fn seed(store: &InMemoryMemberStore, first: &str) -> MemberId {
        let member = Member::new(MemberId::new(), first, "Hale").unwrap();
        let id = member.id;
        store.insert_member(&member).await.unwrap();
        id
    }

    #[tokio::test]
    async fn assigns_and_clears_a_payer() {
        let store = Arc::new(InMemoryMemberStore::new());
        let payer = seed(&store, "Mara").await;
        let dependent = seed(&store, "Tom").await;
        let handler = AssignPayerHandler::new(store.clone());

        handler
            .handle(AssignPayerCommand {
                member_id: dependent,
                payer_id: Some(payer),
            })
            .await
            .unwrap();
        assert_eq!(
            store.get_member(&dependent).await.unwrap().unwrap().payer_id,
            Some(payer)
        );

        handler
            .handle(AssignPayerCommand {
                member_id: dependent,
                payer_id: None,
            })
            .await
            .unwrap();
        assert_eq!(
            store.get_member(&dependent).await.unwrap().unwrap().payer_id,
            None
        );
    }

    #[tokio::test]
    async fn self_assignment_is_rejected() {
        let store = Arc::new(InMemoryMemberStore::new());
        let member = seed(&store, "Mara").await;
        let handler = AssignPayerHandler::new(store);

        let err = handler
            .handle(AssignPayerCommand {
                member_id: member,
                payer_id: Some(member),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Payer(PayerError::SelfPayer(_))));
    }

    #[tokio::test]
    async fn two_member_cycle_is_rejected() {
        let store = Arc::new(InMemoryMemberStore::new());
        let a = seed(&store, "Mara").await;
        let b = seed(&store, "Tom").await;
        let handler = AssignPayerHandler::new(store.clone());

        handler
            .handle(AssignPayerCommand {
                member_id: b,
                payer_id: Some(a),
            })
            .await
            .unwrap();

        let err = handler
            .handle(AssignPayerCommand {
                member_id: a,
                payer_id: Some(b),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Payer(PayerError::Cycle { .. })));
        // The failed write left the original link intact.
        assert_eq!(store.get_member(&a).await.unwrap().unwrap().payer_id, None);
    }

    #[tokio::test]
    async fn unknown_member_is_not_found() {
        let store = Arc::new(InMemoryMemberStore::new());
        let handler = AssignPayerHandler::new(store);

        let err = handler
            .handle(AssignPayerCommand {
                member_id: MemberId::new(),
                payer_id: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::NotFound { .. }));
    }
}
