//! PaymentProvider port - outbound payment gateway operations.
//!
//! Subscription-shaped responses come back as the same `SubscriptionSnapshot`
//! the webhook path decodes, so API responses and webhook payloads feed the
//! reconciliation engine through one entry point. Implementations must be
//! safe to retry; callers pass idempotency keys where the gateway supports
//! them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::billing::SubscriptionSnapshot;
use crate::domain::foundation::MemberId;

/// Port for payment gateway integrations.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Creates a customer, tagging it with the member id as metadata.
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<ProviderCustomer, PaymentError>;

    async fn get_customer(&self, customer_id: &str)
        -> Result<Option<ProviderCustomer>, PaymentError>;

    /// Starts a hosted checkout session for a subscription purchase.
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionSnapshot>, PaymentError>;

    /// Cancels a subscription. With `at_period_end` the subscription stays
    /// usable until the paid period closes; otherwise it ends immediately.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<SubscriptionSnapshot, PaymentError>;

    /// Issues a refund against a charge.
    async fn create_refund(&self, request: RefundRequest)
        -> Result<ProviderRefund, PaymentError>;

    async fn list_products(&self) -> Result<Vec<Product>, PaymentError>;

    async fn list_prices(&self) -> Result<Vec<Price>, PaymentError>;
}

/// Request to create a customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCustomerRequest {
    /// Internal member id, stored as gateway metadata.
    pub member_id: MemberId,
    pub name: String,
    pub email: Option<String>,
    /// Key for safe retries, when the gateway supports it.
    pub idempotency_key: Option<String>,
}

/// Customer as the gateway knows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCustomer {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    /// Gateway creation time, unix seconds.
    pub created: i64,
}

/// Request to start a checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub member_id: MemberId,
    /// Existing gateway customer, when the member already has one.
    pub customer_id: Option<String>,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Free trial length; None starts billing immediately.
    pub trial_days: Option<u32>,
}

/// Hosted checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// URL the member completes payment at.
    pub url: String,
    /// Expiry, unix seconds.
    pub expires_at: i64,
}

/// Request to refund a charge, fully or partially.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub charge_id: String,
    /// Partial refund amount; None refunds the full charge.
    pub amount_cents: Option<i64>,
    pub reason: Option<String>,
}

/// Refund as created at the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRefund {
    pub id: String,
    pub charge_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub reason: Option<String>,
}

/// Sellable product in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
}

/// Price attached to a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    pub product_id: String,
    pub unit_amount_cents: i64,
    pub currency: String,
    /// Billing interval ("month", "year") for recurring prices; None for
    /// one-time prices.
    pub recurring_interval: Option<String>,
    pub active: bool,
}

/// Errors from payment gateway operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentError {
    pub code: PaymentErrorCode,
    pub message: String,
    /// The gateway's own error code, when it returned one.
    pub provider_code: Option<String>,
    pub retryable: bool,
}

impl PaymentError {
    pub fn new(code: PaymentErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
            retryable: code.is_retryable(),
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::NetworkError, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::AuthenticationError, message)
    }

    pub fn card_declined(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::CardDeclined, message)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(PaymentErrorCode::NotFound, format!("{} not found", resource))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::InvalidRequest, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::ProviderError, message)
    }
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PaymentError {}

/// Payment error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentErrorCode {
    /// Network connectivity problem reaching the gateway.
    NetworkError,

    /// API credential rejected.
    AuthenticationError,

    /// Card declined by the issuer.
    CardDeclined,

    /// Gateway resource does not exist.
    NotFound,

    /// Gateway rate limit hit.
    RateLimited,

    /// The request we built was rejected as malformed.
    InvalidRequest,

    /// Gateway-side failure.
    ProviderError,
}

impl PaymentErrorCode {
    /// True for transient conditions worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentErrorCode::NetworkError | PaymentErrorCode::RateLimited
        )
    }
}

impl std::fmt::Display for PaymentErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentErrorCode::NetworkError => "network_error",
            PaymentErrorCode::AuthenticationError => "authentication_error",
            PaymentErrorCode::CardDeclined => "card_declined",
            PaymentErrorCode::NotFound => "not_found",
            PaymentErrorCode::RateLimited => "rate_limited",
            PaymentErrorCode::InvalidRequest => "invalid_request",
            PaymentErrorCode::ProviderError => "provider_error",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Trait object safety test
    #[test]
    fn payment_provider_is_object_safe() {
        fn _accepts_dyn(_provider: &dyn PaymentProvider) {}
    }

    #[test]
    fn network_and_rate_limit_errors_are_retryable() {
        assert!(PaymentErrorCode::NetworkError.is_retryable());
        assert!(PaymentErrorCode::RateLimited.is_retryable());

        assert!(!PaymentErrorCode::CardDeclined.is_retryable());
        assert!(!PaymentErrorCode::NotFound.is_retryable());
        assert!(!PaymentErrorCode::AuthenticationError.is_retryable());
    }

    #[test]
    fn constructor_sets_retryability_from_code() {
        assert!(PaymentError::network("timeout").retryable);
        assert!(!PaymentError::card_declined("declined").retryable);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = PaymentError::card_declined("insufficient funds");
        let text = err.to_string();
        assert!(text.contains("card_declined"));
        assert!(text.contains("insufficient funds"));
    }

    #[test]
    fn provider_code_is_attached() {
        let err = PaymentError::card_declined("declined").with_provider_code("card_declined_generic");
        assert_eq!(err.provider_code.as_deref(), Some("card_declined_generic"));
    }
}
