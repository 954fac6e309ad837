use super::payload::{ListingPayload, VariationPayload};
use super::{CatalogApi, CatalogCategory, CatalogError, CatalogRecord};
use async_trait::async_trait;
use std::sync::Mutex;

/// Process-local catalog used when no storefront credentials are configured.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: Mutex<CatalogState>,
}

#[derive(Default)]
struct CatalogState {
    next_id: u64,
    listings: Vec<(CatalogRecord, ListingPayload)>,
    variations: Vec<(u64, VariationPayload)>,
    categories: Vec<CatalogCategory>,
    listing_failure: Option<CatalogError>,
    variation_failure: Option<CatalogError>,
    search_failure: Option<CatalogError>,
    searches: usize,
}

impl CatalogState {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CatalogState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds an existing listing name, as if created outside this service.
    pub fn seed_listing(&self, name: &str) -> u64 {
        let mut state = self.lock();
        let id = state.allocate();
        let record = CatalogRecord {
            id,
            name: name.to_string(),
        };
        let payload = ListingPayload {
            name: name.to_string(),
            kind: super::payload::ListingKind::Simple,
            regular_price: String::new(),
            sale_price: String::new(),
            description: String::new(),
            short_description: String::new(),
            categories: Vec::new(),
            images: Vec::new(),
            attributes: Vec::new(),
            status: "publish".into(),
            catalog_visibility: "visible".into(),
            manage_stock: false,
            stock_quantity: 0,
            stock_status: "instock".into(),
            meta_data: Vec::new(),
        };
        state.listings.push((record, payload));
        id
    }

    /// Makes every following `create_listing` fail with `error` (`None` clears).
    pub fn fail_listings_with(&self, error: Option<CatalogError>) {
        self.lock().listing_failure = error;
    }

    pub fn fail_variations_with(&self, error: Option<CatalogError>) {
        self.lock().variation_failure = error;
    }

    pub fn fail_searches_with(&self, error: Option<CatalogError>) {
        self.lock().search_failure = error;
    }

    pub fn listings(&self) -> Vec<ListingPayload> {
        self.lock()
            .listings
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn variations_of(&self, parent_id: u64) -> Vec<VariationPayload> {
        self.lock()
            .variations
            .iter()
            .filter(|(parent, _)| *parent == parent_id)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn categories(&self) -> Vec<CatalogCategory> {
        self.lock().categories.clone()
    }

    pub fn search_count(&self) -> usize {
        self.lock().searches
    }
}

#[async_trait]
impl CatalogApi for InMemoryCatalog {
    async fn create_listing(
        &self,
        payload: &ListingPayload,
    ) -> Result<CatalogRecord, CatalogError> {
        let mut state = self.lock();
        if let Some(error) = state.listing_failure.clone() {
            return Err(error);
        }
        let id = state.allocate();
        let record = CatalogRecord {
            id,
            name: payload.name.clone(),
        };
        state.listings.push((record.clone(), payload.clone()));
        Ok(record)
    }

    async fn create_variation(
        &self,
        parent_id: u64,
        payload: &VariationPayload,
    ) -> Result<CatalogRecord, CatalogError> {
        let mut state = self.lock();
        if let Some(error) = state.variation_failure.clone() {
            return Err(error);
        }
        if !state.listings.iter().any(|(record, _)| record.id == parent_id) {
            return Err(CatalogError::Validation(format!(
                "parent listing {parent_id} not found"
            )));
        }
        let id = state.allocate();
        state.variations.push((parent_id, payload.clone()));
        Ok(CatalogRecord {
            id,
            name: String::new(),
        })
    }

    async fn list_categories(&self, search: &str) -> Result<Vec<CatalogCategory>, CatalogError> {
        let needle = search.to_lowercase();
        Ok(self
            .lock()
            .categories
            .iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn create_category(&self, name: &str) -> Result<CatalogCategory, CatalogError> {
        let mut state = self.lock();
        if state
            .categories
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(name))
        {
            return Err(CatalogError::Duplicate(format!("category {name}")));
        }
        let category = CatalogCategory {
            id: state.allocate(),
            name: name.to_string(),
        };
        state.categories.push(category.clone());
        Ok(category)
    }

    async fn search_listings(
        &self,
        query: &str,
        per_page: u32,
    ) -> Result<Vec<CatalogRecord>, CatalogError> {
        let mut state = self.lock();
        state.searches += 1;
        if let Some(error) = state.search_failure.clone() {
            return Err(error);
        }
        let needle = query.trim().to_lowercase();
        Ok(state
            .listings
            .iter()
            .filter(|(record, _)| record.name.to_lowercase().contains(&needle))
            .map(|(record, _)| record.clone())
            .take(per_page.max(1) as usize)
            .collect())
    }
}
