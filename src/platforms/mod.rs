pub mod adapter;
pub mod extract;
pub mod marketplaces;
pub mod session;

use crate::models::{ImportFilters, ProductDetails, SourceProduct};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

pub use adapter::MarketplaceAdapter;
pub use extract::{ListingCard, PageExtractor};
pub use session::{BrowserSession, HttpSessionFactory, SessionFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformId {
    #[serde(rename = "aliexpress")]
    AliExpress,
    #[serde(rename = "alibaba")]
    Alibaba,
    #[serde(rename = "1688")]
    Ali1688,
}

impl PlatformId {
    pub const ALL: [PlatformId; 3] = [
        PlatformId::AliExpress,
        PlatformId::Alibaba,
        PlatformId::Ali1688,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::AliExpress => "aliexpress",
            PlatformId::Alibaba => "alibaba",
            PlatformId::Ali1688 => "1688",
        }
    }

    pub fn source_currency(&self) -> &'static str {
        match self {
            PlatformId::AliExpress | PlatformId::Alibaba => "USD",
            PlatformId::Ali1688 => "CNY",
        }
    }

    /// Language listings are written in, when it is not English.
    pub fn source_language(&self) -> Option<&'static str> {
        match self {
            PlatformId::Ali1688 => Some("zh"),
            _ => None,
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = RegistryError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "aliexpress" => Ok(PlatformId::AliExpress),
            "alibaba" => Ok(PlatformId::Alibaba),
            "1688" => Ok(PlatformId::Ali1688),
            other => Err(RegistryError::UnknownPlatform(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("rate limited by marketplace")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("browser session unavailable: {0}")]
    Session(String),
}

impl ScrapeError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::RateLimited { .. } | ScrapeError::Transient(_)
        )
    }

    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            ScrapeError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Marketplace-specific search and detail extraction.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> PlatformId;

    async fn search(
        &self,
        keyword: &str,
        filters: &ImportFilters,
        limit: usize,
    ) -> Result<Vec<SourceProduct>, ScrapeError>;

    async fn get_details(&self, link: &str) -> Result<ProductDetails, ScrapeError>;

    /// Releases the browser session, if one is open.
    async fn close(&self);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown platform `{0}`")]
    UnknownPlatform(String),
    #[error("platform `{0}` has no registered adapter")]
    NotRegistered(PlatformId),
}

/// Adapter plus the lane lock that keeps one scraping session per marketplace.
#[derive(Clone)]
pub struct PlatformLane {
    pub adapter: Arc<dyn PlatformAdapter>,
    lane: Arc<Mutex<()>>,
}

impl PlatformLane {
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        self.lane.clone().lock_owned().await
    }
}

#[derive(Clone, Default)]
pub struct PlatformRegistry {
    lanes: HashMap<PlatformId, PlatformLane>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the marketplace adapters named in `enabled` (all when empty).
    /// Unknown names are a startup error.
    pub fn from_names(
        enabled: &[String],
        sessions: Arc<dyn SessionFactory>,
    ) -> Result<Self, RegistryError> {
        let ids = if enabled.is_empty() {
            PlatformId::ALL.to_vec()
        } else {
            enabled
                .iter()
                .map(|name| PlatformId::from_str(name))
                .collect::<Result<Vec<_>, _>>()?
        };
        let mut registry = Self::new();
        for id in ids {
            let extractor = marketplaces::extractor_for(id);
            registry.register(Arc::new(MarketplaceAdapter::new(
                id,
                extractor,
                sessions.clone(),
            )));
        }
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        let id = adapter.platform();
        self.lanes.insert(
            id,
            PlatformLane {
                adapter,
                lane: Arc::new(Mutex::new(())),
            },
        );
    }

    pub fn get(&self, id: PlatformId) -> Result<PlatformLane, RegistryError> {
        self.lanes
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotRegistered(id))
    }

    pub fn validate(&self, platforms: &[PlatformId]) -> Result<(), RegistryError> {
        for id in platforms {
            if !self.lanes.contains_key(id) {
                return Err(RegistryError::NotRegistered(*id));
            }
        }
        Ok(())
    }

    pub fn ids(&self) -> Vec<PlatformId> {
        let mut ids: Vec<_> = self.lanes.keys().copied().collect();
        ids.sort_by_key(|id| id.as_str());
        ids
    }

    pub async fn close_all(&self) {
        for (id, lane) in &self.lanes {
            let _guard = lane.acquire().await;
            lane.adapter.close().await;
            info!(target = "woopl.scrape", platform = %id, "adapter_closed");
        }
    }
}
