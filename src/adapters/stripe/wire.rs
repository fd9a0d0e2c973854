//! Wire types for Stripe REST responses.
//!
//! Webhook payload decoding lives in the domain (`billing::event`); these
//! types cover only the documents the gateway returns to direct API calls,
//! and their conversions into port types.

use serde::Deserialize;

use crate::domain::billing::{SubscriptionSnapshot, SubscriptionStatus};
use crate::domain::foundation::Timestamp;
use crate::ports::{PaymentError, Price, Product, ProviderCustomer, ProviderRefund};

/// Paginated list envelope.
#[derive(Debug, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created: i64,
    /// Stripe returns a tombstone object for deleted customers.
    #[serde(default)]
    pub deleted: bool,
}

impl From<StripeCustomer> for ProviderCustomer {
    fn from(customer: StripeCustomer) -> Self {
        ProviderCustomer {
            id: customer.id,
            name: customer.name,
            email: customer.email,
            created: customer.created,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub items: StripeSubscriptionItems,
    pub current_period_start: i64,
    pub current_period_end: i64,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeSubscriptionItems {
    #[serde(default)]
    pub data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionItem {
    pub price: StripePrice,
}

impl TryFrom<StripeSubscription> for SubscriptionSnapshot {
    type Error = PaymentError;

    fn try_from(sub: StripeSubscription) -> Result<Self, PaymentError> {
        let status = parse_status(&sub.status)?;
        Ok(SubscriptionSnapshot {
            subscription_id: sub.id,
            customer_id: sub.customer,
            status,
            price_id: sub.items.data.first().map(|item| item.price.id.clone()),
            current_period_start: Timestamp::from_unix_secs(sub.current_period_start),
            current_period_end: Timestamp::from_unix_secs(sub.current_period_end),
            cancel_at_period_end: sub.cancel_at_period_end,
        })
    }
}

/// Maps Stripe's status vocabulary onto the membership model.
///
/// `incomplete_expired` is a checkout that never completed and surfaces as
/// `canceled`; statuses outside the modeled lifecycle are rejected.
pub(super) fn parse_status(status: &str) -> Result<SubscriptionStatus, PaymentError> {
    match status {
        "incomplete_expired" => Ok(SubscriptionStatus::Canceled),
        other => SubscriptionStatus::parse(other).map_err(|err| {
            PaymentError::provider(format!("unsupported subscription status: {}", err))
        }),
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    /// Hosted payment page; null once the session completes or expires.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct StripeRefund {
    pub id: String,
    pub charge: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl From<StripeRefund> for ProviderRefund {
    fn from(refund: StripeRefund) -> Self {
        ProviderRefund {
            id: refund.id,
            charge_id: refund.charge,
            amount_cents: refund.amount,
            currency: refund.currency,
            status: refund.status,
            reason: refund.reason,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeProduct {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub active: bool,
}

impl From<StripeProduct> for Product {
    fn from(product: StripeProduct) -> Self {
        Product {
            id: product.id,
            name: product.name,
            description: product.description,
            active: product.active,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StripePrice {
    pub id: String,
    pub product: String,
    /// Null for metered or tiered prices, which the catalog skips.
    #[serde(default)]
    pub unit_amount: Option<i64>,
    pub currency: String,
    #[serde(default)]
    pub recurring: Option<StripeRecurring>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct StripeRecurring {
    pub interval: String,
}

impl StripePrice {
    /// Converts to the catalog type; `None` for prices without a fixed
    /// unit amount.
    pub fn into_catalog_price(self) -> Option<Price> {
        let unit_amount_cents = self.unit_amount?;
        Some(Price {
            id: self.id,
            product_id: self.product,
            unit_amount_cents,
            currency: self.currency,
            recurring_interval: self.recurring.map(|r| r.interval),
            active: self.active,
        })
    }
}

/// Error envelope the gateway wraps failures in.
#[derive(Debug, Deserialize)]
pub struct StripeErrorEnvelope {
    pub error: StripeApiError,
}

#[derive(Debug, Deserialize)]
pub struct StripeApiError {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub decline_code: Option<String>,
}
