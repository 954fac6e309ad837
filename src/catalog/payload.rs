use crate::models::{CandidateProduct, SourceProduct, VariantGroup};
use crate::settings::PriceQuote;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Variations created per listing are capped; the storefront batch limit.
pub const MAX_VARIATIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    Simple,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub src: String,
    pub name: String,
    pub alt: String,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributePayload {
    pub name: String,
    pub position: usize,
    pub visible: bool,
    pub variation: bool,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingPayload {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ListingKind,
    pub regular_price: String,
    pub sale_price: String,
    pub description: String,
    pub short_description: String,
    pub categories: Vec<CategoryRef>,
    pub images: Vec<ImagePayload>,
    pub attributes: Vec<AttributePayload>,
    pub status: String,
    pub catalog_visibility: String,
    pub manage_stock: bool,
    pub stock_quantity: u32,
    pub stock_status: String,
    pub meta_data: Vec<MetaEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationAttribute {
    pub name: String,
    pub option: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationPayload {
    pub regular_price: String,
    pub sale_price: String,
    pub attributes: Vec<VariationAttribute>,
    pub image: Option<ImagePayload>,
    pub manage_stock: bool,
    pub stock_quantity: u32,
    pub stock_status: String,
}

pub fn build_listing(
    candidate: &CandidateProduct,
    quote: PriceQuote,
    category_id: u64,
    stock_quantity: u32,
    imported_at: DateTime<Utc>,
) -> ListingPayload {
    let variants = usable_variants(&candidate.source.variants);
    ListingPayload {
        name: candidate.optimized_title.clone(),
        kind: if variants.is_empty() {
            ListingKind::Simple
        } else {
            ListingKind::Variable
        },
        regular_price: quote.regular.to_string(),
        sale_price: quote.sale.to_string(),
        description: candidate.description.clone(),
        short_description: short_description(&candidate.source),
        categories: vec![CategoryRef { id: category_id }],
        images: candidate
            .images
            .iter()
            .enumerate()
            .map(|(position, src)| ImagePayload {
                src: src.clone(),
                name: format!("product-image-{position}"),
                alt: candidate.optimized_title.clone(),
                position,
            })
            .collect(),
        attributes: attributes(&variants),
        status: "publish".into(),
        catalog_visibility: "visible".into(),
        manage_stock: true,
        stock_quantity,
        stock_status: "instock".into(),
        meta_data: vec![
            MetaEntry {
                key: "_source_platform".into(),
                value: candidate.source.platform.as_str().into(),
            },
            MetaEntry {
                key: "_source_url".into(),
                value: candidate.source.link.clone(),
            },
            MetaEntry {
                key: "_import_date".into(),
                value: imported_at.to_rfc3339(),
            },
        ],
    }
}

/// Highlights block: rating and order count when known, then delivery lines.
pub fn short_description(source: &SourceProduct) -> String {
    let mut lines = Vec::new();
    if source.rating > 0.0 {
        lines.push(format!("⭐ {:.1}/5 rating", source.rating));
    }
    if source.orders > 0 {
        lines.push(format!("📦 {}+ orders", source.orders));
    }
    lines.push("🚚 Fast delivery to Ghana".to_string());
    lines.push("✅ Quality guaranteed".to_string());
    lines.push("💰 Best price guarantee".to_string());
    lines.join("\n")
}

fn usable_variants(variants: &[VariantGroup]) -> Vec<&VariantGroup> {
    variants
        .iter()
        .filter(|group| !group.name.trim().is_empty() && !group.options.is_empty())
        .collect()
}

fn attributes(variants: &[&VariantGroup]) -> Vec<AttributePayload> {
    variants
        .iter()
        .enumerate()
        .map(|(position, group)| AttributePayload {
            name: group.name.clone(),
            position,
            visible: true,
            variation: true,
            options: group.options.iter().map(|o| o.value.clone()).collect(),
        })
        .collect()
}

/// One variation per combination of option values, in attribute order.
pub fn build_variations(
    candidate: &CandidateProduct,
    quote: PriceQuote,
    stock_quantity: u32,
) -> Vec<VariationPayload> {
    let variants = usable_variants(&candidate.source.variants);
    if variants.is_empty() {
        return Vec::new();
    }
    let mut combos: Vec<Vec<(&str, &crate::models::VariantOption)>> = vec![Vec::new()];
    for group in &variants {
        let mut next = Vec::with_capacity(combos.len() * group.options.len());
        for combo in &combos {
            for option in &group.options {
                if next.len() >= MAX_VARIATIONS {
                    break;
                }
                let mut extended = combo.clone();
                extended.push((group.name.as_str(), option));
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
        .into_iter()
        .map(|combo| VariationPayload {
            regular_price: quote.regular.to_string(),
            sale_price: quote.sale.to_string(),
            image: combo
                .iter()
                .find_map(|(_, option)| option.image.clone())
                .map(|src| ImagePayload {
                    src,
                    name: "variation-image".into(),
                    alt: combo
                        .iter()
                        .map(|(_, o)| o.value.as_str())
                        .collect::<Vec<_>>()
                        .join(" / "),
                    position: 0,
                }),
            attributes: combo
                .iter()
                .map(|(name, option)| VariationAttribute {
                    name: name.to_string(),
                    option: option.value.clone(),
                })
                .collect(),
            manage_stock: true,
            stock_quantity,
            stock_status: "instock".into(),
        })
        .collect()
}
