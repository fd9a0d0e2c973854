//! RegisterMemberHandler - command handler for creating members.

use std::sync::Arc;

use crate::domain::billing::{BillingError, Member};
use crate::domain::foundation::MemberId;
use crate::ports::MemberStore;

/// Command to register a new member.
#[derive(Debug, Clone)]
pub struct RegisterMemberCommand {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Bill this member to another member from the start.
    pub payer_id: Option<MemberId>,
}

/// Result of a successful registration.
#[derive(Debug, Clone)]
pub struct RegisterMemberResult {
    pub member: Member,
}

/// Handler for member registration.
pub struct RegisterMemberHandler {
    store: Arc<dyn MemberStore>,
}

impl RegisterMemberHandler {
    pub fn new(store: Arc<dyn MemberStore>) -> Self {
        Self { store }
    }

    pub async fn handle(
        &self,
        cmd: RegisterMemberCommand,
    ) -> Result<RegisterMemberResult, BillingError> {
        // 1. Build the member; name validation happens here.
        let mut member = Member::new(MemberId::new(), cmd.first_name, cmd.last_name)?
            .with_contact(cmd.email, cmd.phone);
        member.payer_id = cmd.payer_id;

        // 2. Persist. The store enforces payer existence and cycle rules.
        self.store
            .insert_member(&member)
            .await
            .map_err(BillingError::from)?;

        tracing::info!(member_id = %member.id, "member registered");

        Ok(RegisterMemberResult { member })
    }
}
