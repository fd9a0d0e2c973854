//! StartCheckoutHandler - command handler for opening a checkout session.
//!
//! Creates the provider customer on first contact and stores the customer
//! id on the member, so later webhook events resolve by customer id even
//! when the session metadata is missing.

use std::sync::Arc;

use crate::domain::billing::BillingError;
use crate::domain::foundation::{MemberId, Timestamp};
use crate::ports::{
    CheckoutRequest, CheckoutSession, CreateCustomerRequest, MemberStore, PaymentProvider,
};

/// Command to start a checkout session for a member.
#[derive(Debug, Clone)]
pub struct StartCheckoutCommand {
    pub member_id: MemberId,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    pub trial_days: Option<u32>,
}

/// Result of successful checkout initiation.
#[derive(Debug, Clone)]
pub struct StartCheckoutResult {
    pub session: CheckoutSession,
    /// Provider customer id the session was opened under.
    pub customer_id: String,
}

/// Handler for starting checkout sessions.
pub struct StartCheckoutHandler {
    store: Arc<dyn MemberStore>,
    provider: Arc<dyn PaymentProvider>,
}

impl StartCheckoutHandler {
    pub fn new(store: Arc<dyn MemberStore>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self { store, provider }
    }

    pub async fn handle(
        &self,
        cmd: StartCheckoutCommand,
    ) -> Result<StartCheckoutResult, BillingError> {
        // 1. Load the member.
        let mut member = self
            .store
            .get_member(&cmd.member_id)
            .await
            .map_err(BillingError::from)?
            .ok_or_else(|| BillingError::not_found("member", cmd.member_id.to_string()))?;

        // 2. Ensure a provider customer exists. The idempotency key pins
        //    retried requests to one customer object.
        let customer_id = match &member.customer_id {
            Some(id) => id.clone(),
            None => {
                let customer = self
                    .provider
                    .create_customer(CreateCustomerRequest {
                        member_id: member.id,
                        name: member.full_name(),
                        email: member.email.clone(),
                        idempotency_key: Some(format!("member-{}", member.id)),
                    })
                    .await?;

                member.customer_id = Some(customer.id.clone());
                member.updated_at = Timestamp::now();
                self.store
                    .update_member(&member)
                    .await
                    .map_err(BillingError::from)?;
                customer.id
            }
        };

        // 3. Open the session. The member id rides in the session metadata
        //    so checkout completion can resolve the member directly.
        let session = self
            .provider
            .create_checkout_session(CheckoutRequest {
                member_id: member.id,
                customer_id: Some(customer_id.clone()),
                price_id: cmd.price_id,
                success_url: cmd.success_url,
                cancel_url: cmd.cancel_url,
                trial_days: cmd.trial_days,
            })
            .await?;

        tracing::info!(
            member_id = %member.id,
            customer_id,
            session_id = %session.id,
            "checkout session opened"
        );

        Ok(StartCheckoutResult {
            session,
            customer_id,
        })
    }
}
