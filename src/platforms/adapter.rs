use super::extract::{ListingCard, PageExtractor, parse_count, parse_price, parse_rating};
use super::session::{BrowserSession, SessionFactory};
use super::{PlatformAdapter, PlatformId, ScrapeError};
use crate::models::{ImportFilters, ProductDetails, SourceProduct};
use async_trait::async_trait;
use reqwest::Url;
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Marketplace adapter driving a lazily launched browser session.
pub struct MarketplaceAdapter {
    platform: PlatformId,
    extractor: Arc<dyn PageExtractor>,
    sessions: Arc<dyn SessionFactory>,
    session: Mutex<Option<Box<dyn BrowserSession>>>,
}

impl MarketplaceAdapter {
    pub fn new(
        platform: PlatformId,
        extractor: Arc<dyn PageExtractor>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            platform,
            extractor,
            sessions,
            session: Mutex::new(None),
        }
    }

    async fn load(&self, url: &str) -> Result<String, ScrapeError> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.sessions.launch(self.platform).await?);
        }
        let Some(session) = guard.as_ref() else {
            return Err(ScrapeError::Session("session not available".into()));
        };
        session.open(url).await
    }

    fn product_from_card(&self, keyword: &str, card: ListingCard) -> Option<SourceProduct> {
        let title = card.title.filter(|t| !t.trim().is_empty())?;
        let price = card.price.as_deref().and_then(parse_price)?;
        let image = card.image?;
        let link = card.link.unwrap_or_default();
        Some(SourceProduct {
            platform: self.platform,
            marketplace_id: marketplace_id(&link, &title),
            price,
            currency: self.platform.source_currency().to_string(),
            rating: card.rating.as_deref().map(parse_rating).unwrap_or(0.0),
            orders: card.orders.as_deref().map(parse_count).unwrap_or(0),
            images: vec![image],
            link,
            keyword: keyword.to_string(),
            title,
            description: None,
            variants: Vec::new(),
            specifications: Default::default(),
            shipping: None,
        })
    }
}

#[async_trait]
impl PlatformAdapter for MarketplaceAdapter {
    fn platform(&self) -> PlatformId {
        self.platform
    }

    async fn search(
        &self,
        keyword: &str,
        filters: &ImportFilters,
        limit: usize,
    ) -> Result<Vec<SourceProduct>, ScrapeError> {
        let url = self.extractor.search_url(keyword, filters);
        let html = self.load(&url).await?;
        let cards = self.extractor.listing_cards(&html);
        let scanned = cards.len();
        let products: Vec<SourceProduct> = cards
            .into_iter()
            .filter_map(|card| self.product_from_card(keyword, card))
            .filter(|product| filters.accepts(product))
            .take(limit)
            .collect();
        info!(
            target = "woopl.scrape",
            platform = %self.platform,
            keyword,
            scanned,
            kept = products.len(),
            "search_complete"
        );
        Ok(products)
    }

    async fn get_details(&self, link: &str) -> Result<ProductDetails, ScrapeError> {
        let html = self.load(link).await?;
        let details = ProductDetails {
            description: self.extractor.description(&html),
            images: self.extractor.gallery(&html),
            variants: self.extractor.variants(&html),
            specifications: self.extractor.specifications(&html),
            shipping: self.extractor.shipping(&html),
        };
        debug!(
            target = "woopl.scrape",
            platform = %self.platform,
            link,
            images = details.images.len(),
            variants = details.variants.len(),
            has_description = details.description.is_some(),
            "details_extracted"
        );
        Ok(details)
    }

    async fn close(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.close().await;
        }
    }
}

/// Marketplace listing id: trailing digits of the link's last path segment,
/// otherwise a stable hash of the title.
fn marketplace_id(link: &str, title: &str) -> String {
    let from_link = Url::parse(link).ok().and_then(|url| {
        let segment = url.path_segments()?.rev().find(|s| !s.is_empty())?.to_string();
        let stem = segment.split('.').next().unwrap_or_default();
        let digits: String = stem
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        (!digits.is_empty()).then_some(digits)
    });
    from_link.unwrap_or_else(|| {
        let mut hasher = DefaultHasher::new();
        title.trim().to_lowercase().hash(&mut hasher);
        format!("t{:016x}", hasher.finish())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VariantGroup;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        launches: AtomicUsize,
        opens: AtomicUsize,
        closes: AtomicUsize,
    }

    struct FakeSession(Arc<Counters>);

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn open(&self, url: &str) -> Result<String, ScrapeError> {
            self.0.opens.fetch_add(1, Ordering::SeqCst);
            if url.contains("broken") {
                return Err(ScrapeError::Navigation("boom".into()));
            }
            Ok(format!("<html>{url}</html>"))
        }

        async fn close(&self) {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeFactory(Arc<Counters>);

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn launch(
            &self,
            _platform: PlatformId,
        ) -> Result<Box<dyn BrowserSession>, ScrapeError> {
            self.0.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession(self.0.clone())))
        }
    }

    struct FakeExtractor;

    fn card(title: &str, price: &str, image: bool, rating: &str, orders: &str, id: u32) -> ListingCard {
        ListingCard {
            title: Some(title.to_string()),
            price: Some(price.to_string()),
            image: image.then(|| format!("https://img.example.com/{id}.jpg")),
            rating: Some(rating.to_string()),
            orders: Some(orders.to_string()),
            link: Some(format!("https://www.aliexpress.com/item/{id}.html")),
        }
    }

    impl PageExtractor for FakeExtractor {
        fn search_url(&self, keyword: &str, _filters: &ImportFilters) -> String {
            format!("https://search.example.com/?q={keyword}")
        }

        fn listing_cards(&self, _html: &str) -> Vec<ListingCard> {
            vec![
                card("Wireless Earbuds", "US $10.00", true, "4.6", "200 sold", 1001),
                card("No Image Lamp", "US $12.00", false, "4.9", "900 sold", 1002),
                card("Free Sticker", "free", true, "4.9", "900 sold", 1003),
                card("Low Rated Cable", "US $3.00", true, "3.1", "900 sold", 1004),
                card("Unpopular Mouse", "US $8.00", true, "4.8", "12 sold", 1005),
                card("Smart Watch", "US $25.50", true, "4.7", "1.2k orders", 1006),
                card("Phone Stand", "US $6.00", true, "4.5", "75 sold", 1007),
            ]
        }

        fn description(&self, _html: &str) -> Option<String> {
            Some("Great sound.".into())
        }

        fn gallery(&self, _html: &str) -> Vec<String> {
            vec!["https://img.example.com/g1.jpg".into()]
        }

        fn variants(&self, _html: &str) -> Vec<VariantGroup> {
            Vec::new()
        }

        fn specifications(&self, _html: &str) -> BTreeMap<String, String> {
            BTreeMap::new()
        }

        fn shipping(&self, _html: &str) -> Option<String> {
            None
        }
    }

    fn adapter(counters: Arc<Counters>) -> MarketplaceAdapter {
        MarketplaceAdapter::new(
            PlatformId::AliExpress,
            Arc::new(FakeExtractor),
            Arc::new(FakeFactory(counters)),
        )
    }

    #[tokio::test]
    async fn search_drops_incomplete_cards_and_post_filters() {
        let counters = Arc::new(Counters::default());
        let adapter = adapter(counters.clone());
        let products = adapter
            .search("audio", &ImportFilters::default(), 10)
            .await
            .expect("search");
        let titles: Vec<_> = products.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Wireless Earbuds", "Smart Watch", "Phone Stand"]);
        assert_eq!(products[0].marketplace_id, "1001");
        assert_eq!(products[0].currency, "USD");
        assert_eq!(products[0].keyword, "audio");
        assert_eq!(products[1].orders, 1200);
        assert!(
            products
                .iter()
                .all(|p| p.rating >= 4.0 && p.orders >= 50)
        );
    }

    #[tokio::test]
    async fn search_truncates_to_limit() {
        let adapter = adapter(Arc::new(Counters::default()));
        let products = adapter
            .search("audio", &ImportFilters::default(), 2)
            .await
            .expect("search");
        assert_eq!(products.len(), 2);
    }

    #[tokio::test]
    async fn session_is_lazy_reused_and_closed() {
        let counters = Arc::new(Counters::default());
        let adapter = adapter(counters.clone());
        assert_eq!(counters.launches.load(Ordering::SeqCst), 0);

        adapter
            .search("audio", &ImportFilters::default(), 10)
            .await
            .expect("search");
        let details = adapter
            .get_details("https://www.aliexpress.com/item/1001.html")
            .await
            .expect("details");
        assert_eq!(details.description.as_deref(), Some("Great sound."));
        assert_eq!(counters.launches.load(Ordering::SeqCst), 1);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);

        adapter.close().await;
        adapter.close().await;
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);

        adapter
            .get_details("https://www.aliexpress.com/item/1002.html")
            .await
            .expect("relaunch");
        assert_eq!(counters.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn navigation_errors_propagate() {
        let adapter = adapter(Arc::new(Counters::default()));
        let err = adapter
            .get_details("https://broken.example.com/item/1.html")
            .await
            .expect_err("navigation failure");
        assert!(matches!(err, ScrapeError::Navigation(_)));
    }

    #[test]
    fn marketplace_id_prefers_link_digits() {
        assert_eq!(
            marketplace_id(
                "https://www.alibaba.com/product-detail/LED-Strip_1600123456.html",
                "LED"
            ),
            "1600123456"
        );
        assert_eq!(
            marketplace_id("https://detail.1688.com/offer/6543210.html?spm=a", "x"),
            "6543210"
        );
        let hashed = marketplace_id("", "Phone Case");
        assert!(hashed.starts_with('t'));
        assert_eq!(hashed, marketplace_id("https://example.com/about", " phone case "));
    }
}
