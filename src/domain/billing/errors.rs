//! Billing error types with HTTP status mapping and retryability semantics.
//!
//! The webhook endpoint's response code drives the provider's redelivery
//! behavior: 2xx acknowledges, 4xx stops redelivery, 5xx (and 409) schedules
//! another attempt. `status_code` encodes that contract.

use crate::domain::billing::member::PayerError;
use crate::domain::foundation::ValidationError;
use crate::ports::PaymentError;
use axum::http::StatusCode;
use thiserror::Error;

/// Errors that occur while verifying, admitting, or reconciling billing
/// events, and while serving the billing admin API.
#[derive(Debug, Error)]
pub enum BillingError {
    /// Webhook signature verification failed.
    #[error("Invalid signature")]
    SignatureInvalid,

    /// Webhook timestamp is older than the acceptance window.
    #[error("Delivery timestamp outside tolerance")]
    StaleDelivery,

    /// Webhook timestamp is in the future beyond clock skew allowance.
    #[error("Delivery timestamp in the future")]
    SkewedDelivery,

    /// Signature header is not in `t=...,v1=...` form.
    #[error("Malformed signature header: {0}")]
    MalformedHeader(String),

    /// Payload could not be decoded into a billing event.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A request field failed domain validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A payer assignment violated the household rules.
    #[error(transparent)]
    Payer(#[from] PayerError),

    /// A referenced member or subscription does not exist.
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// The event is older than the record's last applied event. Control
    /// flow marker: the engine records these as ignored, the endpoint
    /// acknowledges them.
    #[error("Event {event_id} superseded by a newer event")]
    StaleEvent { event_id: String },

    /// Another worker holds this event's in-progress marker.
    #[error("Event {event_id} is already being processed")]
    InFlight { event_id: String },

    /// An optimistic write lost its version race.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// The bounded conflict-retry loop gave up.
    #[error("Transition abandoned after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },

    /// The payment provider API call failed.
    #[error("Payment provider error: {0}")]
    Provider(PaymentError),

    /// Member store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Event ledger operation failed.
    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl BillingError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        BillingError::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        BillingError::Parse(message.into())
    }

    pub fn stale_event(event_id: impl Into<String>) -> Self {
        BillingError::StaleEvent {
            event_id: event_id.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        BillingError::Store(message.into())
    }

    pub fn ledger(message: impl Into<String>) -> Self {
        BillingError::Ledger(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        BillingError::Conflict(message.into())
    }

    /// Returns true if the provider should retry delivering the event.
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::Conflict(_)
            | BillingError::ExhaustedRetries { .. }
            | BillingError::Store(_)
            | BillingError::Ledger(_) => true,
            BillingError::Provider(err) => err.retryable,
            _ => false,
        }
    }

    /// Maps the error to the HTTP status the billing endpoints return.
    ///
    /// - 2xx: acknowledged, no redelivery
    /// - 4xx: rejected, no redelivery
    /// - 409 / 5xx: redelivered later
    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::SignatureInvalid | BillingError::StaleDelivery => {
                StatusCode::UNAUTHORIZED
            }

            BillingError::SkewedDelivery
            | BillingError::MalformedHeader(_)
            | BillingError::Parse(_)
            | BillingError::Validation(_) => StatusCode::BAD_REQUEST,

            BillingError::Payer(_) => StatusCode::UNPROCESSABLE_ENTITY,

            BillingError::NotFound { .. } => StatusCode::NOT_FOUND,

            // Superseded events are acknowledged so the provider stops
            // redelivering them.
            BillingError::StaleEvent { .. } => StatusCode::OK,

            BillingError::InFlight { .. } | BillingError::Conflict(_) => StatusCode::CONFLICT,

            BillingError::Provider(err) => provider_status(err),

            BillingError::ExhaustedRetries { .. }
            | BillingError::Store(_)
            | BillingError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn provider_status(err: &PaymentError) -> StatusCode {
    use crate::ports::PaymentErrorCode;
    match err.code {
        PaymentErrorCode::CardDeclined => StatusCode::PAYMENT_REQUIRED,
        PaymentErrorCode::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl From<PaymentError> for BillingError {
    fn from(err: PaymentError) -> Self {
        BillingError::Provider(err)
    }
}
