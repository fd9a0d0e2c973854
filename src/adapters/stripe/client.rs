//! Stripe payment gateway client.
//!
//! Implements the `PaymentProvider` port against Stripe's REST API.
//! Requests authenticate with the secret key over basic auth; mutating
//! calls that the caller may retry carry an `Idempotency-Key` header.
//!
//! Webhook signature verification is not this client's job; the domain
//! verifier handles inbound events.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::domain::billing::SubscriptionSnapshot;
use crate::ports::{
    CheckoutRequest, CheckoutSession, CreateCustomerRequest, PaymentError, PaymentErrorCode,
    PaymentProvider, Price, Product, ProviderCustomer, ProviderRefund, RefundRequest,
};

use super::wire::{
    StripeCheckoutSession, StripeCustomer, StripeErrorEnvelope, StripeList, StripePrice,
    StripeProduct, StripeRefund, StripeSubscription,
};

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

/// Page size for catalog listings. The catalog is small; one page is
/// expected to cover it.
const LIST_LIMIT: &str = "100";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,
    /// Base URL, overridable for tests.
    api_base_url: String,
}

impl StripeConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }

    /// Points the client at a different base URL (for test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

/// Stripe-backed `PaymentProvider`.
pub struct StripeGateway {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    fn api_key(&self) -> &str {
        self.config.api_key.expose_secret()
    }
}

/// Checks the response status and decodes the body, translating gateway
/// error envelopes into `PaymentError`s.
async fn parse_response<T: DeserializeOwned>(
    response: reqwest::Response,
    context: &'static str,
) -> Result<T, PaymentError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(%status, context, error = %body, "stripe request failed");
        return Err(error_from_response(status, &body));
    }
    response.json::<T>().await.map_err(|err| {
        PaymentError::provider(format!("failed to parse {} response: {}", context, err))
    })
}

fn error_from_response(status: StatusCode, body: &str) -> PaymentError {
    let detail = serde_json::from_str::<StripeErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);
    let message = detail
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| body.chars().take(200).collect());
    let provider_code = detail.as_ref().and_then(|e| {
        e.decline_code
            .clone()
            .or_else(|| e.code.clone())
            .or_else(|| e.error_type.clone())
    });

    let error = match status.as_u16() {
        401 | 403 => PaymentError::authentication(message),
        402 => PaymentError::card_declined(message),
        404 => PaymentError::new(PaymentErrorCode::NotFound, message),
        429 => PaymentError::new(PaymentErrorCode::RateLimited, message),
        400 => PaymentError::invalid_request(message),
        _ => PaymentError::provider(message),
    };
    match provider_code {
        Some(code) => error.with_provider_code(code),
        None => error,
    }
}

#[async_trait]
impl PaymentProvider for StripeGateway {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<ProviderCustomer, PaymentError> {
        let mut params = vec![
            ("name", request.name.clone()),
            ("metadata[member_id]", request.member_id.to_string()),
        ];
        if let Some(email) = &request.email {
            params.push(("email", email.clone()));
        }

        let mut builder = self
            .http_client
            .post(self.url("/v1/customers"))
            .basic_auth(self.api_key(), Option::<&str>::None)
            .form(&params);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| PaymentError::network(err.to_string()))?;
        let customer: StripeCustomer = parse_response(response, "create_customer").await?;
        Ok(customer.into())
    }

    async fn get_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<ProviderCustomer>, PaymentError> {
        let response = self
            .http_client
            .get(self.url(&format!("/v1/customers/{}", customer_id)))
            .basic_auth(self.api_key(), Option::<&str>::None)
            .send()
            .await
            .map_err(|err| PaymentError::network(err.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let customer: StripeCustomer = parse_response(response, "get_customer").await?;
        if customer.deleted {
            return Ok(None);
        }
        Ok(Some(customer.into()))
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let mut params = vec![
            ("mode", "subscription".to_string()),
            ("line_items[0][price]", request.price_id.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            // Carried back on `checkout.session.completed` so the engine
            // can resolve the member without a customer lookup.
            ("metadata[member_id]", request.member_id.to_string()),
        ];
        if let Some(customer_id) = &request.customer_id {
            params.push(("customer", customer_id.clone()));
        }
        if let Some(trial_days) = request.trial_days {
            params.push((
                "subscription_data[trial_period_days]",
                trial_days.to_string(),
            ));
        }

        let response = self
            .http_client
            .post(self.url("/v1/checkout/sessions"))
            .basic_auth(self.api_key(), Option::<&str>::None)
            .form(&params)
            .send()
            .await
            .map_err(|err| PaymentError::network(err.to_string()))?;

        let session: StripeCheckoutSession =
            parse_response(response, "create_checkout_session").await?;
        let url = session.url.ok_or_else(|| {
            PaymentError::provider("checkout session created without a hosted url")
        })?;
        Ok(CheckoutSession {
            id: session.id,
            url,
            expires_at: session.expires_at,
        })
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionSnapshot>, PaymentError> {
        let response = self
            .http_client
            .get(self.url(&format!("/v1/subscriptions/{}", subscription_id)))
            .basic_auth(self.api_key(), Option::<&str>::None)
            .send()
            .await
            .map_err(|err| PaymentError::network(err.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let sub: StripeSubscription = parse_response(response, "get_subscription").await?;
        Ok(Some(SubscriptionSnapshot::try_from(sub)?))
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<SubscriptionSnapshot, PaymentError> {
        let url = self.url(&format!("/v1/subscriptions/{}", subscription_id));
        let response = if at_period_end {
            self.http_client
                .post(&url)
                .basic_auth(self.api_key(), Option::<&str>::None)
                .form(&[("cancel_at_period_end", "true")])
                .send()
                .await
        } else {
            self.http_client
                .delete(&url)
                .basic_auth(self.api_key(), Option::<&str>::None)
                .send()
                .await
        }
        .map_err(|err| PaymentError::network(err.to_string()))?;

        let sub: StripeSubscription = parse_response(response, "cancel_subscription").await?;
        SubscriptionSnapshot::try_from(sub)
    }

    async fn create_refund(
        &self,
        request: RefundRequest,
    ) -> Result<ProviderRefund, PaymentError> {
        let mut params = vec![("charge", request.charge_id.clone())];
        if let Some(amount) = request.amount_cents {
            params.push(("amount", amount.to_string()));
        }
        if let Some(reason) = &request.reason {
            params.push(("reason", reason.clone()));
        }

        let response = self
            .http_client
            .post(self.url("/v1/refunds"))
            .basic_auth(self.api_key(), Option::<&str>::None)
            .form(&params)
            .send()
            .await
            .map_err(|err| PaymentError::network(err.to_string()))?;

        let refund: StripeRefund = parse_response(response, "create_refund").await?;
        Ok(refund.into())
    }

    async fn list_products(&self) -> Result<Vec<Product>, PaymentError> {
        let response = self
            .http_client
            .get(self.url("/v1/products"))
            .basic_auth(self.api_key(), Option::<&str>::None)
            .query(&[("active", "true"), ("limit", LIST_LIMIT)])
            .send()
            .await
            .map_err(|err| PaymentError::network(err.to_string()))?;

        let list: StripeList<StripeProduct> = parse_response(response, "list_products").await?;
        Ok(list.data.into_iter().map(Product::from).collect())
    }

    async fn list_prices(&self) -> Result<Vec<Price>, PaymentError> {
        let response = self
            .http_client
            .get(self.url("/v1/prices"))
            .basic_auth(self.api_key(), Option::<&str>::None)
            .query(&[("active", "true"), ("limit", LIST_LIMIT)])
            .send()
            .await
            .map_err(|err| PaymentError::network(err.to_string()))?;

        let list: StripeList<StripePrice> = parse_response(response, "list_prices").await?;
        Ok(list
            .data
            .into_iter()
            .filter_map(StripePrice::into_catalog_price)
            .collect())
    }
}
