pub mod categories;
pub mod images;
pub mod seo;
pub mod translate;

use crate::currency::CurrencyConverter;
use crate::llm::TextGenerator;
use crate::models::{Money, SourceProduct, StepKind, StepNote};
use std::{sync::Arc, time::Instant};
use tracing::{debug, warn};

pub use categories::DEFAULT_CATEGORY;
pub use images::{HttpImageProcessor, ImageProcessor};
pub use translate::{LibreTranslateClient, Translator};

const TITLE_MAX_TOKENS: u32 = 50;
const DESCRIPTION_MAX_TOKENS: u32 = 300;
const TEMPERATURE: f32 = 0.7;

/// Outcome of one transformation stage. Fallbacks carry the degraded value
/// plus the reason the preferred path was not taken.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<T> {
    Ok(T),
    Fallback(T, String),
    Skipped(String),
}

impl<T> Step<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Step::Ok(value) | Step::Fallback(value, _) => Some(value),
            Step::Skipped(_) => None,
        }
    }

    pub fn note(&self, stage: &str) -> StepNote {
        let (outcome, reason) = match self {
            Step::Ok(_) => (StepKind::Ok, None),
            Step::Fallback(_, reason) => (StepKind::Fallback, Some(reason.clone())),
            Step::Skipped(reason) => (StepKind::Skipped, Some(reason.clone())),
        };
        StepNote {
            stage: stage.to_string(),
            outcome,
            reason,
        }
    }
}

/// Storefront-ready content derived from one source listing.
#[derive(Debug, Clone)]
pub struct TransformedCandidate {
    pub title: String,
    pub optimized_title: String,
    pub description: String,
    pub cost: Money,
    pub category: String,
    pub images: Vec<String>,
    pub notes: Vec<StepNote>,
}

#[derive(Clone)]
pub struct ContentTransformer {
    translator: Arc<dyn Translator>,
    generator: Arc<dyn TextGenerator>,
    currency: CurrencyConverter,
    images: Arc<dyn ImageProcessor>,
    target_currency: String,
    local_info: String,
}

impl ContentTransformer {
    pub fn new(
        translator: Arc<dyn Translator>,
        generator: Arc<dyn TextGenerator>,
        currency: CurrencyConverter,
        images: Arc<dyn ImageProcessor>,
        target_currency: impl Into<String>,
        local_info: impl Into<String>,
    ) -> Self {
        Self {
            translator,
            generator,
            currency,
            images,
            target_currency: target_currency.into(),
            local_info: local_info.into(),
        }
    }

    /// Runs every stage; a failing collaborator degrades its own stage only.
    pub async fn transform(&self, source: &SourceProduct) -> TransformedCandidate {
        let started = Instant::now();
        let mut notes = Vec::new();

        let translated = self.translate(source).await;
        notes.push(translated.note("translate"));
        let (title, description) = translated
            .value()
            .unwrap_or_else(|| (source.title.clone(), source.description.clone()));

        let optimized_title = self.optimize_title(&title).await;
        notes.push(optimized_title.note("seo_title"));
        let optimized_title = optimized_title
            .value()
            .unwrap_or_else(|| seo::clean_title(&title));

        let body = description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| title.clone());
        let optimized_description = self.optimize_description(&body).await;
        notes.push(optimized_description.note("seo_description"));
        let mut description = optimized_description
            .value()
            .unwrap_or_else(|| seo::format_description(&body));
        description.push_str(&self.local_info);

        let cost = self
            .currency
            .convert(source.price, &source.currency, &self.target_currency)
            .await;
        notes.push(cost.note("currency"));
        let cost = cost.value().unwrap_or_else(|| Money {
            amount: source.price,
            currency: source.currency.clone(),
        });

        let category = match categories::map_category(&[&source.keyword, &title]) {
            Some(category) => Step::Ok(category.to_string()),
            None => Step::Fallback(
                DEFAULT_CATEGORY.to_string(),
                "no category matched keyword or title".into(),
            ),
        };
        notes.push(category.note("category"));
        let category = category
            .value()
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        let images = self.optimize_images(&source.images).await;
        notes.push(images.note("images"));
        let images = images.value().unwrap_or_default();

        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed("transform", elapsed_ms);
        debug!(
            target = "woopl.transform",
            source = %source.source_key(),
            fallbacks = notes.iter().filter(|n| n.outcome != StepKind::Ok).count(),
            elapsed_ms = elapsed_ms as u64,
            "transform_complete"
        );

        TransformedCandidate {
            title,
            optimized_title,
            description,
            cost,
            category,
            images,
            notes,
        }
    }

    async fn translate(&self, source: &SourceProduct) -> Step<(String, Option<String>)> {
        let Some(lang) = source.platform.source_language() else {
            return Step::Skipped("source already in english".into());
        };
        let title = match self.translator.translate(&source.title, lang, "en").await {
            Ok(title) => title,
            Err(err) => {
                warn!(
                    target = "woopl.transform",
                    source = %source.source_key(),
                    error = %err,
                    "title_translation_failed"
                );
                return Step::Fallback(
                    (source.title.clone(), source.description.clone()),
                    err.to_string(),
                );
            }
        };
        let description = match source.description.as_deref() {
            Some(text) if !text.trim().is_empty() => {
                match self.translator.translate(text, lang, "en").await {
                    Ok(translated) => Some(translated),
                    Err(err) => {
                        return Step::Fallback(
                            (title, Some(text.to_string())),
                            format!("description: {err}"),
                        );
                    }
                }
            }
            _ => None,
        };
        Step::Ok((title, description))
    }

    async fn optimize_title(&self, title: &str) -> Step<String> {
        let fallback = || seo::clean_title(title);
        match self
            .generator
            .generate(&seo::title_prompt(title), TITLE_MAX_TOKENS, TEMPERATURE)
            .await
        {
            Ok(text) => match seo::finish_title(&text) {
                Some(optimized) => Step::Ok(optimized),
                None => Step::Fallback(fallback(), "empty generated title".into()),
            },
            Err(err) => Step::Fallback(fallback(), err.to_string()),
        }
    }

    async fn optimize_description(&self, description: &str) -> Step<String> {
        match self
            .generator
            .generate(
                &seo::description_prompt(description),
                DESCRIPTION_MAX_TOKENS,
                TEMPERATURE,
            )
            .await
        {
            Ok(text) => Step::Ok(text.trim().to_string()),
            Err(err) => Step::Fallback(seo::format_description(description), err.to_string()),
        }
    }

    async fn optimize_images(&self, sources: &[String]) -> Step<Vec<String>> {
        if sources.is_empty() {
            return Step::Skipped("no source images".into());
        }
        let mut kept: Vec<String> = Vec::new();
        let mut dropped = Vec::new();
        for url in sources {
            match self.images.optimize(url).await {
                Ok(optimized) => {
                    if !kept.contains(&optimized) {
                        kept.push(optimized);
                    }
                }
                Err(err) => dropped.push(err.to_string()),
            }
        }
        if dropped.is_empty() {
            Step::Ok(kept)
        } else {
            Step::Fallback(
                kept,
                format!("dropped {} image(s): {}", dropped.len(), dropped.join("; ")),
            )
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::platforms::PlatformId;

    #[tokio::test]
    async fn happy_path_uses_generated_copy() {
        let transformer = transformer(Arc::new(EchoTranslator), Arc::new(CannedGenerator));
        let out = transformer
            .transform(&sample_source(PlatformId::AliExpress, "Wireless Earbuds"))
            .await;
        assert_eq!(out.title, "Wireless Earbuds");
        assert_eq!(out.optimized_title, "Best Wireless Earbuds");
        assert!(out.description.starts_with("Optimized copy."));
        assert!(out.description.ends_with("Delivery Information for Ghana"));
        assert_eq!(out.cost.currency, "GHS");
        assert_eq!(out.cost.amount, 158.5);
        assert_eq!(out.category, "Electronics");
        assert_eq!(out.images, vec!["https://ae01.alicdn.com/kf/a.jpg".to_string()]);
        assert_eq!(out.notes[0].outcome, StepKind::Skipped);
        let images_note = out.notes.iter().find(|n| n.stage == "images").expect("images");
        assert_eq!(images_note.outcome, StepKind::Fallback);
    }

    #[tokio::test]
    async fn translation_runs_for_chinese_sources() {
        let transformer = transformer(Arc::new(EchoTranslator), Arc::new(CannedGenerator));
        let out = transformer
            .transform(&sample_source(PlatformId::Ali1688, "蓝牙耳机"))
            .await;
        assert_eq!(out.title, "[en] 蓝牙耳机");
        assert_eq!(out.notes[0].outcome, StepKind::Ok);
        assert_eq!(out.cost.amount, 21.8);
    }

    #[tokio::test]
    async fn translation_outage_keeps_source_title() {
        let transformer = transformer(Arc::new(DownTranslator), Arc::new(CannedGenerator));
        let src = sample_source(PlatformId::Ali1688, "蓝牙耳机 无线");
        let out = transformer.transform(&src).await;
        assert_eq!(out.title, src.title);
        let note = &out.notes[0];
        assert_eq!(note.stage, "translate");
        assert_eq!(note.outcome, StepKind::Fallback);
        assert!(note.reason.as_deref().unwrap_or_default().contains("503"));
    }

    #[tokio::test]
    async fn transform_never_fails_when_every_service_is_down() {
        let transformer = offline_transformer();
        let mut src = sample_source(PlatformId::Ali1688, "Kids Toys Set!!! (3 pcs)");
        src.keyword = "gadgets".into();
        src.currency = "JPY".into();
        src.description = None;
        src.images.clear();
        let out = transformer.transform(&src).await;
        assert_eq!(out.optimized_title, "Kids Toys Set 3 pcs");
        assert!(out.description.contains("Key Features:"));
        assert!(out.description.ends_with("Delivery Information for Ghana"));
        assert_eq!(out.cost.currency, "JPY");
        assert_eq!(out.cost.amount, 10.0);
        assert_eq!(out.category, "Toys & Games");
        assert!(out.images.is_empty());
        let stages: Vec<_> = out.notes.iter().map(|n| n.stage.as_str()).collect();
        assert_eq!(
            stages,
            vec![
                "translate",
                "seo_title",
                "seo_description",
                "currency",
                "category",
                "images"
            ]
        );
        assert!(
            out.notes
                .iter()
                .filter(|n| n.stage != "category")
                .all(|n| n.outcome != StepKind::Ok)
        );
    }

    #[tokio::test]
    async fn unmatched_category_defaults() {
        let transformer = offline_transformer();
        let mut src = sample_source(PlatformId::AliExpress, "Widget");
        src.keyword = "gadgets".into();
        let out = transformer.transform(&src).await;
        assert_eq!(out.category, DEFAULT_CATEGORY);
    }
}
