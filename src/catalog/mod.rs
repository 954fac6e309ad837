pub mod client;
pub mod config;
pub mod memory;
pub mod payload;
pub mod publisher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use client::WooCommerceClient;
pub use memory::InMemoryCatalog;
pub use payload::{ListingPayload, VariationPayload};
pub use publisher::{CatalogPublisher, PublishError};

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("catalog credentials rejected: {0}")]
    Auth(String),
    #[error("catalog rejected payload: {0}")]
    Validation(String),
    #[error("catalog entry already exists: {0}")]
    Duplicate(String),
    #[error("catalog rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("catalog request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogCategory {
    pub id: u64,
    pub name: String,
}

/// Storefront catalog operations used by the publisher and dedup check.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn create_listing(&self, payload: &ListingPayload)
    -> Result<CatalogRecord, CatalogError>;

    async fn create_variation(
        &self,
        parent_id: u64,
        payload: &VariationPayload,
    ) -> Result<CatalogRecord, CatalogError>;

    async fn list_categories(&self, search: &str) -> Result<Vec<CatalogCategory>, CatalogError>;

    async fn create_category(&self, name: &str) -> Result<CatalogCategory, CatalogError>;

    async fn search_listings(
        &self,
        query: &str,
        per_page: u32,
    ) -> Result<Vec<CatalogRecord>, CatalogError>;
}
