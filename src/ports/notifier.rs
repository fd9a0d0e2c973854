//! Notifier port - member-facing notifications derived from billing changes.
//!
//! The reconciliation engine emits exactly one notification per applied
//! status change. Delivery failures never fail the transition that produced
//! them; the engine logs and moves on, since the store is already updated.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::MemberId;

/// Errors from notification delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

impl NotifyError {
    pub fn delivery(message: impl Into<String>) -> Self {
        NotifyError::Delivery(message.into())
    }
}

/// Notification derived from an applied billing transition.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingNotification {
    /// Membership became usable (checkout completed, trial started, or the
    /// subscription reached `active` for the first time).
    SubscriptionActivated {
        member_id: MemberId,
        subscription_id: String,
    },

    /// A renewal payment extended the current period.
    SubscriptionRenewed {
        member_id: MemberId,
        subscription_id: String,
    },

    /// A payment attempt failed; the membership is in grace.
    PaymentFailed {
        member_id: MemberId,
        subscription_id: String,
        attempt_count: u32,
        /// True when the provider has given up retrying.
        final_attempt: bool,
    },

    /// A payment after failures brought the membership back to good
    /// standing.
    PaymentRecovered {
        member_id: MemberId,
        subscription_id: String,
    },

    /// The subscription ended.
    SubscriptionCanceled {
        member_id: MemberId,
        subscription_id: String,
    },

    /// Payment retries were exhausted; access is revoked.
    MembershipLapsed {
        member_id: MemberId,
        subscription_id: String,
    },

    /// A refund was recorded against the member's billing history.
    RefundRecorded {
        member_id: MemberId,
        amount_cents: i64,
        currency: String,
    },
}

impl BillingNotification {
    /// Stable name for logs and template lookup.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingNotification::SubscriptionActivated { .. } => "subscription_activated",
            BillingNotification::SubscriptionRenewed { .. } => "subscription_renewed",
            BillingNotification::PaymentFailed { .. } => "payment_failed",
            BillingNotification::PaymentRecovered { .. } => "payment_recovered",
            BillingNotification::SubscriptionCanceled { .. } => "subscription_canceled",
            BillingNotification::MembershipLapsed { .. } => "membership_lapsed",
            BillingNotification::RefundRecorded { .. } => "refund_recorded",
        }
    }

    /// The member this notification addresses.
    pub fn member_id(&self) -> MemberId {
        match self {
            BillingNotification::SubscriptionActivated { member_id, .. }
            | BillingNotification::SubscriptionRenewed { member_id, .. }
            | BillingNotification::PaymentFailed { member_id, .. }
            | BillingNotification::PaymentRecovered { member_id, .. }
            | BillingNotification::SubscriptionCanceled { member_id, .. }
            | BillingNotification::MembershipLapsed { member_id, .. }
            | BillingNotification::RefundRecorded { member_id, .. } => *member_id,
        }
    }
}

/// Port for notification delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: BillingNotification) -> Result<(), NotifyError>;
}
