//! Payment configuration

use std::time::Duration;

use serde::Deserialize;

use super::error::ValidationError;
use crate::domain::billing::{
    DEFAULT_CLOCK_SKEW_SECS, DEFAULT_RETRY_LIMIT, DEFAULT_TOLERANCE_SECS,
};
use crate::ports::DEFAULT_LEASE_SECS;

/// Payment configuration (Stripe)
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Stripe API key
    pub stripe_api_key: String,

    /// Stripe webhook signing secret
    pub stripe_webhook_secret: String,

    /// Webhook delivery age tolerance in seconds
    #[serde(default = "default_tolerance")]
    pub signature_tolerance_secs: i64,

    /// Allowed clock skew for future-dated deliveries, in seconds
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: i64,

    /// Engine retry attempts for write conflicts
    #[serde(default = "default_retry_limit")]
    pub transition_retry_limit: u32,

    /// Base backoff between conflict retries, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Lease on an in-progress ledger marker before reclaim, in seconds
    #[serde(default = "default_ledger_lease")]
    pub ledger_lease_secs: i64,

    /// Price offered when checkout requests omit one
    pub default_price_id: Option<String>,
}

impl PaymentConfig {
    /// Check if using Stripe test mode
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_test_")
    }

    /// Check if using Stripe live mode
    pub fn is_live_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_live_")
    }

    /// Conflict retry backoff as a Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stripe_api_key.is_empty() {
            return Err(ValidationError::MissingRequired("STRIPE_API_KEY"));
        }
        if self.stripe_webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("STRIPE_WEBHOOK_SECRET"));
        }

        // Verify key prefixes for safety
        if !self.stripe_api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !self.stripe_webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }

        if self.signature_tolerance_secs <= 0 || self.clock_skew_secs < 0 {
            return Err(ValidationError::InvalidToleranceWindow);
        }
        if self.transition_retry_limit == 0 {
            return Err(ValidationError::InvalidRetryPolicy);
        }

        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            stripe_api_key: String::new(),
            stripe_webhook_secret: String::new(),
            signature_tolerance_secs: default_tolerance(),
            clock_skew_secs: default_clock_skew(),
            transition_retry_limit: default_retry_limit(),
            retry_backoff_ms: default_retry_backoff_ms(),
            ledger_lease_secs: default_ledger_lease(),
            default_price_id: None,
        }
    }
}

fn default_tolerance() -> i64 {
    DEFAULT_TOLERANCE_SECS
}

fn default_clock_skew() -> i64 {
    DEFAULT_CLOCK_SKEW_SECS
}

fn default_retry_limit() -> u32 {
    DEFAULT_RETRY_LIMIT
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_ledger_lease() -> i64 {
    DEFAULT_LEASE_SECS
}
