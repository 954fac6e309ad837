use crate::catalog::CatalogApi;
use std::sync::Arc;
use tracing::warn;

/// Title-based duplicate check against the storefront's own search.
#[derive(Clone)]
pub struct DedupChecker {
    catalog: Arc<dyn CatalogApi>,
}

impl DedupChecker {
    pub fn new(catalog: Arc<dyn CatalogApi>) -> Self {
        Self { catalog }
    }

    /// Any search hit counts as a duplicate. Lookup failures are logged and
    /// reported as "not a duplicate".
    pub async fn is_duplicate(&self, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        match self.catalog.search_listings(title, 1).await {
            Ok(hits) => !hits.is_empty(),
            Err(err) => {
                warn!(
                    target = "woopl.catalog",
                    title,
                    error = %err,
                    "duplicate_check_failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogError, InMemoryCatalog};

    #[tokio::test]
    async fn nonzero_hits_mean_duplicate() {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.seed_listing("Premium Wireless Earbuds");
        let checker = DedupChecker::new(catalog.clone());
        assert!(checker.is_duplicate("Wireless Earbuds").await);
        assert!(!checker.is_duplicate("Desk Lamp").await);
    }

    #[tokio::test]
    async fn repeated_checks_agree() {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.seed_listing("Phone Stand");
        let checker = DedupChecker::new(catalog.clone());
        let first = checker.is_duplicate("Phone Stand").await;
        let second = checker.is_duplicate("Phone Stand").await;
        assert_eq!(first, second);
        assert_eq!(catalog.search_count(), 2);
        assert_eq!(catalog.listings().len(), 1);
    }

    #[tokio::test]
    async fn lookup_failure_is_not_a_duplicate() {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.seed_listing("Phone Stand");
        catalog.fail_searches_with(Some(CatalogError::Request("timeout".into())));
        let checker = DedupChecker::new(catalog);
        assert!(!checker.is_duplicate("Phone Stand").await);
    }
}
