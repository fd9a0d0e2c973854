//! ListCatalogHandler - query handler for purchasable plans.

use std::sync::Arc;

use crate::domain::billing::BillingError;
use crate::ports::{PaymentProvider, Price, Product};

/// The provider's active products with their active recurring prices.
#[derive(Debug, Clone)]
pub struct CatalogResult {
    pub products: Vec<Product>,
    pub prices: Vec<Price>,
}

/// Handler for the plan catalog query.
pub struct ListCatalogHandler {
    provider: Arc<dyn PaymentProvider>,
}

impl ListCatalogHandler {
    pub fn new(provider: Arc<dyn PaymentProvider>) -> Self {
        Self { provider }
    }

    pub async fn handle(&self) -> Result<CatalogResult, BillingError> {
        let products = self.provider.list_products().await?;
        let prices = self.provider.list_prices().await?;
        Ok(CatalogResult { products, prices })
    }
}
