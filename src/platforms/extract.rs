use crate::models::{ImportFilters, VariantGroup, VariantOption};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use tracing::warn;

/// Raw search-result card; values are exactly what the page shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingCard {
    pub title: Option<String>,
    pub price: Option<String>,
    pub image: Option<String>,
    pub rating: Option<String>,
    pub orders: Option<String>,
    pub link: Option<String>,
}

/// Field-group extraction for one marketplace's page layout. Each method is
/// independent: a layout change in one group never affects the others.
pub trait PageExtractor: Send + Sync {
    fn search_url(&self, keyword: &str, filters: &ImportFilters) -> String;
    fn listing_cards(&self, html: &str) -> Vec<ListingCard>;
    fn description(&self, html: &str) -> Option<String>;
    fn gallery(&self, html: &str) -> Vec<String>;
    fn variants(&self, html: &str) -> Vec<VariantGroup>;
    fn specifications(&self, html: &str) -> BTreeMap<String, String>;
    fn shipping(&self, html: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy)]
pub struct SelectorSet {
    pub card: &'static str,
    pub card_title: &'static str,
    pub card_price: &'static str,
    pub card_image: &'static str,
    pub card_rating: &'static str,
    pub card_orders: &'static str,
    pub card_link: &'static str,
    pub description: &'static str,
    pub gallery_image: &'static str,
    pub variant_group: &'static str,
    pub variant_title: &'static str,
    pub variant_option: &'static str,
    pub spec_item: &'static str,
    pub shipping: &'static str,
}

pub type SearchUrlFn = fn(&str, &ImportFilters) -> String;

/// CSS-selector driven extractor configured per marketplace.
#[derive(Clone, Copy)]
pub struct SelectorExtractor {
    pub base_url: &'static str,
    pub search: SearchUrlFn,
    pub selectors: SelectorSet,
}

impl PageExtractor for SelectorExtractor {
    fn search_url(&self, keyword: &str, filters: &ImportFilters) -> String {
        (self.search)(keyword, filters)
    }

    fn listing_cards(&self, html: &str) -> Vec<ListingCard> {
        let Some(card_sel) = selector(self.selectors.card) else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        let s = &self.selectors;
        document
            .select(&card_sel)
            .map(|card| ListingCard {
                title: first_text(card, s.card_title),
                price: first_text(card, s.card_price),
                image: first_attr(card, s.card_image, &["src", "data-src"])
                    .and_then(|src| absolutize(self.base_url, &src)),
                rating: first_text(card, s.card_rating),
                orders: first_text(card, s.card_orders),
                link: first_attr(card, s.card_link, &["href"])
                    .and_then(|href| absolutize(self.base_url, &href)),
            })
            .collect()
    }

    fn description(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        first_text(document.root_element(), self.selectors.description)
    }

    fn gallery(&self, html: &str) -> Vec<String> {
        let Some(sel) = selector(self.selectors.gallery_image) else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        let mut images = Vec::new();
        for img in document.select(&sel) {
            let Some(src) = img.value().attr("src").or_else(|| img.value().attr("data-src"))
            else {
                continue;
            };
            if let Some(url) = absolutize(self.base_url, src)
                && !images.contains(&url)
            {
                images.push(url);
            }
        }
        images
    }

    fn variants(&self, html: &str) -> Vec<VariantGroup> {
        let (Some(group_sel), Some(option_sel)) = (
            selector(self.selectors.variant_group),
            selector(self.selectors.variant_option),
        ) else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        document
            .select(&group_sel)
            .filter_map(|group| {
                let name = first_text(group, self.selectors.variant_title)?;
                let name = name.trim_end_matches(':').trim().to_string();
                let options = group
                    .select(&option_sel)
                    .filter_map(|opt| {
                        let value = element_text(opt)
                            .or_else(|| opt.value().attr("title").map(str::to_string))?;
                        let image = first_attr(opt, "img", &["src"])
                            .and_then(|src| absolutize(self.base_url, &src));
                        Some(VariantOption { value, image })
                    })
                    .collect::<Vec<_>>();
                (!name.is_empty() && !options.is_empty()).then_some(VariantGroup { name, options })
            })
            .collect()
    }

    fn specifications(&self, html: &str) -> BTreeMap<String, String> {
        let Some(sel) = selector(self.selectors.spec_item) else {
            return BTreeMap::new();
        };
        let document = Html::parse_document(html);
        document
            .select(&sel)
            .filter_map(|item| {
                let text = element_text(item)?;
                let (key, value) = text.split_once(':')?;
                let (key, value) = (key.trim(), value.trim());
                (!key.is_empty() && !value.is_empty())
                    .then(|| (key.to_string(), value.to_string()))
            })
            .collect()
    }

    fn shipping(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        first_text(document.root_element(), self.selectors.shipping)
    }
}

fn selector(raw: &str) -> Option<Selector> {
    match Selector::parse(raw) {
        Ok(sel) => Some(sel),
        Err(err) => {
            warn!(target = "woopl.scrape", selector = raw, error = %err, "invalid_selector");
            None
        }
    }
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = element
        .text()
        .flat_map(|chunk| chunk.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

fn first_text(scope: ElementRef<'_>, raw: &str) -> Option<String> {
    let sel = selector(raw)?;
    scope.select(&sel).find_map(element_text)
}

fn first_attr(scope: ElementRef<'_>, raw: &str, attrs: &[&str]) -> Option<String> {
    let sel = selector(raw)?;
    scope.select(&sel).find_map(|el| {
        attrs
            .iter()
            .find_map(|name| el.value().attr(name))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

/// Resolves protocol-relative and relative URLs against the marketplace root.
pub fn absolutize(base: &str, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if let Ok(url) = Url::parse(raw) {
        return matches!(url.scheme(), "http" | "https").then(|| url.to_string());
    }
    Url::parse(base)
        .ok()?
        .join(raw)
        .ok()
        .map(|url| url.to_string())
}

/// First decimal number in a price label ("US $1,234.50 - 2,000" -> 1234.5).
pub fn parse_price(raw: &str) -> Option<f64> {
    first_number(raw).map(|(value, _)| value).filter(|v| *v > 0.0)
}

pub fn parse_rating(raw: &str) -> f32 {
    first_number(raw)
        .map(|(value, _)| value as f32)
        .filter(|v| (0.0..=5.0).contains(v))
        .unwrap_or(0.0)
}

/// Order/sale counters such as "1,000+ sold" or "2.5k orders".
pub fn parse_count(raw: &str) -> u32 {
    match first_number(raw) {
        Some((value, suffix)) => {
            let scaled = match suffix {
                Some('k') | Some('K') => value * 1_000.0,
                Some('m') | Some('M') => value * 1_000_000.0,
                Some('万') => value * 10_000.0,
                _ => value,
            };
            scaled.min(u32::MAX as f64) as u32
        }
        None => 0,
    }
}

fn first_number(raw: &str) -> Option<(f64, Option<char>)> {
    let mut digits = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            while let Some(&next) = chars.peek() {
                if next.is_ascii_digit() || next == '.' {
                    digits.push(next);
                } else if next != ',' {
                    break;
                }
                chars.next();
            }
            let suffix = chars.peek().copied();
            let value = digits.trim_end_matches('.').parse::<f64>().ok()?;
            return Some((value, suffix));
        }
    }
    None
}
