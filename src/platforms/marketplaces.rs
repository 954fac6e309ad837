use super::PlatformId;
use super::extract::{PageExtractor, SelectorExtractor, SelectorSet};
use crate::models::ImportFilters;
use std::sync::Arc;
use urlencoding::encode;

pub const ALIEXPRESS: SelectorExtractor = SelectorExtractor {
    base_url: "https://www.aliexpress.com",
    search: aliexpress_search,
    selectors: SelectorSet {
        card: r#"[class*="product-card"]"#,
        card_title: r#"[class*="title"]"#,
        card_price: r#"[class*="price-current"]"#,
        card_image: "img",
        card_rating: r#"[class*="rating-value"]"#,
        card_orders: r#"[class*="trade-order"]"#,
        card_link: "a",
        description: r#"[class*="product-description"]"#,
        gallery_image: r#"[class*="image-thumb"] img"#,
        variant_group: r#"[class*="sku-item--property"]"#,
        variant_title: r#"[class*="sku-item--title"]"#,
        variant_option: r#"[class*="sku-item--text"], [class*="sku-item--image"]"#,
        spec_item: r#"[class*="product-prop"] li"#,
        shipping: r#"[class*="shipping-info"]"#,
    },
};

pub const ALIBABA: SelectorExtractor = SelectorExtractor {
    base_url: "https://www.alibaba.com",
    search: alibaba_search,
    selectors: SelectorSet {
        card: r#"[class*="search-card-item"]"#,
        card_title: r#"[class*="search-card-e-title"]"#,
        card_price: r#"[class*="search-card-e-price-main"]"#,
        card_image: r#"img[class*="search-card-e-slider__img"], img"#,
        card_rating: r#"[class*="search-card-e-review"] strong"#,
        card_orders: r#"[class*="search-card-e-market-power-common"]"#,
        card_link: r#"a[class*="search-card-e-slider__link"], a"#,
        description: r#"[class*="module_description"], [class*="detail-decorate-root"]"#,
        gallery_image: r#"[class*="main-image-thumb"] img, [class*="image-list"] img"#,
        variant_group: r#"[class*="sku-info"] [class*="sku-item"]"#,
        variant_title: r#"[class*="sku-title"]"#,
        variant_option: r#"[class*="sku-option"], [class*="sku-image"]"#,
        spec_item: r#"[class*="attribute-list"] [class*="attribute-item"]"#,
        shipping: r#"[class*="logistics-info"]"#,
    },
};

pub const ALI1688: SelectorExtractor = SelectorExtractor {
    base_url: "https://www.1688.com",
    search: ali1688_search,
    selectors: SelectorSet {
        card: r#"[class*="offer-item"]"#,
        card_title: r#"[class*="offer-title"]"#,
        card_price: r#"[class*="offer-price"]"#,
        card_image: "img",
        card_rating: r#"[class*="star-level"]"#,
        card_orders: r#"[class*="sale-quantity"]"#,
        card_link: "a",
        description: r#"[class*="detail-desc"], #desc-lazyload-container"#,
        gallery_image: r#"[class*="detail-gallery"] img"#,
        variant_group: r#"[class*="sku-prop-module"]"#,
        variant_title: r#"[class*="sku-prop-module-name"]"#,
        variant_option: r#"[class*="prop-item"]"#,
        spec_item: r#"[class*="offer-attr-item"]"#,
        shipping: r#"[class*="logistics-express"]"#,
    },
};

pub fn extractor_for(platform: PlatformId) -> Arc<dyn PageExtractor> {
    match platform {
        PlatformId::AliExpress => Arc::new(ALIEXPRESS),
        PlatformId::Alibaba => Arc::new(ALIBABA),
        PlatformId::Ali1688 => Arc::new(ALI1688),
    }
}

fn aliexpress_search(keyword: &str, filters: &ImportFilters) -> String {
    format!(
        "https://www.aliexpress.com/wholesale?SearchText={}&minPrice={}&maxPrice={}",
        encode(keyword.trim()),
        filters.min_price,
        filters.max_price
    )
}

fn alibaba_search(keyword: &str, filters: &ImportFilters) -> String {
    format!(
        "https://www.alibaba.com/trade/search?SearchText={}&pricef={}&pricet={}",
        encode(keyword.trim()),
        filters.min_price,
        filters.max_price
    )
}

fn ali1688_search(keyword: &str, filters: &ImportFilters) -> String {
    format!(
        "https://s.1688.com/selloffer/offer_search.htm?keywords={}&priceStart={}&priceEnd={}",
        encode(keyword.trim()),
        filters.min_price,
        filters.max_price
    )
}
