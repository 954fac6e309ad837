use super::payload::{build_listing, build_variations};
use super::{CatalogApi, CatalogError};
use crate::models::CandidateProduct;
use crate::settings::PricingPolicy;
use chrono::Utc;
use std::{collections::HashMap, sync::Arc, time::Duration, time::Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("listing rejected: {0}")]
    Validation(String),
    #[error("listing already exists: {0}")]
    Duplicate(String),
    #[error("catalog authentication failed: {0}")]
    Auth(String),
    #[error("catalog rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("catalog request failed: {0}")]
    Request(String),
}

impl From<CatalogError> for PublishError {
    fn from(value: CatalogError) -> Self {
        match value {
            CatalogError::Auth(detail) => PublishError::Auth(detail),
            CatalogError::Validation(detail) => PublishError::Validation(detail),
            CatalogError::Duplicate(detail) => PublishError::Duplicate(detail),
            CatalogError::RateLimited { retry_after } => PublishError::RateLimited { retry_after },
            CatalogError::Request(detail) => PublishError::Request(detail),
        }
    }
}

/// Turns approved candidates into storefront listings.
pub struct CatalogPublisher {
    catalog: Arc<dyn CatalogApi>,
    pricing: PricingPolicy,
    stock_quantity: u32,
    currency: String,
    category_ids: Mutex<HashMap<String, u64>>,
}

impl CatalogPublisher {
    /// `currency` is the storefront currency; candidates costed in anything
    /// else are refused.
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        pricing: PricingPolicy,
        stock_quantity: u32,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            pricing,
            stock_quantity,
            currency: currency.into().trim().to_uppercase(),
            category_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the listing (and its variations) and returns the storefront id.
    /// Catalog failures are returned as-is; nothing is retried here.
    pub async fn publish(&self, candidate: &CandidateProduct) -> Result<String, PublishError> {
        let started = Instant::now();
        if !candidate.cost.currency.trim().eq_ignore_ascii_case(&self.currency) {
            warn!(
                target = "woopl.catalog",
                candidate = %candidate.id,
                cost_currency = %candidate.cost.currency,
                storefront_currency = %self.currency,
                "publish_refused_currency_mismatch"
            );
            return Err(PublishError::Validation(format!(
                "cost is in {}, storefront prices are in {}",
                candidate.cost.currency, self.currency
            )));
        }
        let quote = self.pricing.quote(candidate.cost.amount);
        let category_id = self.ensure_category(&candidate.category).await?;
        let payload = build_listing(
            candidate,
            quote,
            category_id,
            self.stock_quantity,
            Utc::now(),
        );
        let record = self.catalog.create_listing(&payload).await?;

        let variations = build_variations(candidate, quote, self.stock_quantity);
        let mut failed = 0usize;
        for variation in &variations {
            if let Err(err) = self.catalog.create_variation(record.id, variation).await {
                failed += 1;
                warn!(
                    target = "woopl.catalog",
                    listing_id = record.id,
                    error = %err,
                    "variation_create_failed"
                );
            }
        }

        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed("publish", elapsed_ms);
        info!(
            target = "woopl.catalog",
            candidate = %candidate.id,
            listing_id = record.id,
            regular_price = quote.regular,
            sale_price = quote.sale,
            variations = variations.len() - failed,
            failed_variations = failed,
            "listing_published"
        );
        Ok(record.id.to_string())
    }

    async fn ensure_category(&self, name: &str) -> Result<u64, CatalogError> {
        let key = name.to_lowercase();
        if let Some(id) = self.category_ids.lock().await.get(&key) {
            return Ok(*id);
        }
        let existing = self.catalog.list_categories(name).await?;
        let found = existing
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .or_else(|| existing.first())
            .map(|c| c.id);
        let id = match found {
            Some(id) => id,
            None => {
                let created = self.catalog.create_category(name).await?;
                info!(target = "woopl.catalog", category = name, id = created.id, "category_created");
                created.id
            }
        };
        self.category_ids.lock().await.insert(key, id);
        Ok(id)
    }
}
