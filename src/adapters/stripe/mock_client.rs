//! Mock payment gateway for tests and local development.
//!
//! Configurable in-memory implementation of `PaymentProvider`: seed
//! customers, subscriptions, and a catalog, inject errors per method, and
//! inspect the call log afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::billing::{SubscriptionSnapshot, SubscriptionStatus};
use crate::ports::{
    CheckoutRequest, CheckoutSession, CreateCustomerRequest, PaymentError, PaymentProvider,
    Price, Product, ProviderCustomer, ProviderRefund, RefundRequest,
};

/// In-memory `PaymentProvider` double.
#[derive(Default, Clone)]
pub struct MockPaymentGateway {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    customers: HashMap<String, ProviderCustomer>,
    subscriptions: HashMap<String, SubscriptionSnapshot>,
    products: Vec<Product>,
    prices: Vec<Price>,
    refunds: Vec<ProviderRefund>,
    /// Error returned by the next call, whatever it is.
    next_error: Option<PaymentError>,
    /// Errors keyed by method name.
    method_errors: HashMap<&'static str, PaymentError>,
    call_log: Vec<String>,
    sequence: u64,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    // ── configuration ───────────────────────────────────────────────

    pub fn add_customer(&self, customer: ProviderCustomer) {
        let mut state = self.inner.lock().unwrap();
        state.customers.insert(customer.id.clone(), customer);
    }

    pub fn add_subscription(&self, snapshot: SubscriptionSnapshot) {
        let mut state = self.inner.lock().unwrap();
        state
            .subscriptions
            .insert(snapshot.subscription_id.clone(), snapshot);
    }

    pub fn set_catalog(&self, products: Vec<Product>, prices: Vec<Price>) {
        let mut state = self.inner.lock().unwrap();
        state.products = products;
        state.prices = prices;
    }

    /// Fails the next call, whichever method it hits.
    pub fn fail_next(&self, error: PaymentError) {
        self.inner.lock().unwrap().next_error = Some(error);
    }

    /// Fails every call to one method.
    pub fn fail_method(&self, method: &'static str, error: PaymentError) {
        self.inner.lock().unwrap().method_errors.insert(method, error);
    }

    // ── inspection ──────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().call_log.clone()
    }

    pub fn refunds(&self) -> Vec<ProviderRefund> {
        self.inner.lock().unwrap().refunds.clone()
    }

    pub fn subscription(&self, subscription_id: &str) -> Option<SubscriptionSnapshot> {
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .get(subscription_id)
            .cloned()
    }

    fn enter(&self, method: &'static str) -> Result<(), PaymentError> {
        let mut state = self.inner.lock().unwrap();
        state.call_log.push(method.to_string());
        if let Some(error) = state.next_error.take() {
            return Err(error);
        }
        if let Some(error) = state.method_errors.get(method) {
            return Err(error.clone());
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut state = self.inner.lock().unwrap();
        state.sequence += 1;
        format!("{}_mock_{}", prefix, state.sequence)
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentGateway {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<ProviderCustomer, PaymentError> {
        self.enter("create_customer")?;
        let customer = ProviderCustomer {
            id: self.next_id("cus"),
            name: Some(request.name),
            email: request.email,
            created: chrono::Utc::now().timestamp(),
        };
        self.inner
            .lock()
            .unwrap()
            .customers
            .insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn get_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<ProviderCustomer>, PaymentError> {
        self.enter("get_customer")?;
        Ok(self.inner.lock().unwrap().customers.get(customer_id).cloned())
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        self.enter("create_checkout_session")?;
        if request.price_id.is_empty() {
            return Err(PaymentError::invalid_request("price_id is required"));
        }
        let id = self.next_id("cs");
        Ok(CheckoutSession {
            url: format!("https://checkout.mock.local/{}", id),
            id,
            expires_at: chrono::Utc::now().timestamp() + 24 * 3600,
        })
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionSnapshot>, PaymentError> {
        self.enter("get_subscription")?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscriptions
            .get(subscription_id)
            .cloned())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<SubscriptionSnapshot, PaymentError> {
        self.enter("cancel_subscription")?;
        let mut state = self.inner.lock().unwrap();
        let snapshot = state
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| PaymentError::not_found("subscription"))?;
        if at_period_end {
            snapshot.cancel_at_period_end = true;
        } else {
            snapshot.status = SubscriptionStatus::Canceled;
        }
        Ok(snapshot.clone())
    }

    async fn create_refund(
        &self,
        request: RefundRequest,
    ) -> Result<ProviderRefund, PaymentError> {
        self.enter("create_refund")?;
        let refund = ProviderRefund {
            id: self.next_id("re"),
            charge_id: request.charge_id,
            amount_cents: request.amount_cents.unwrap_or(0),
            currency: "usd".to_string(),
            status: "succeeded".to_string(),
            reason: request.reason,
        };
        self.inner.lock().unwrap().refunds.push(refund.clone());
        Ok(refund)
    }

    async fn list_products(&self) -> Result<Vec<Product>, PaymentError> {
        self.enter("list_products")?;
        Ok(self.inner.lock().unwrap().products.clone())
    }

    async fn list_prices(&self) -> Result<Vec<Price>, PaymentError> {
        self.enter("list_prices")?;
        Ok(self.inner.lock().unwrap().prices.clone())
    }
}
