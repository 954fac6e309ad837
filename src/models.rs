use crate::platforms::PlatformId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use uuid::Uuid;

pub const DEFAULT_SCHEDULE: &str = "0 0 * * *";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportFilters {
    pub min_price: f64,
    pub max_price: f64,
    pub min_rating: f32,
    pub min_orders: u32,
}

impl Default for ImportFilters {
    fn default() -> Self {
        Self {
            min_price: 5.0,
            max_price: 500.0,
            min_rating: 4.0,
            min_orders: 50,
        }
    }
}

impl ImportFilters {
    /// Client-side post-filter applied after the marketplace's own search.
    pub fn accepts(&self, product: &SourceProduct) -> bool {
        product.rating >= self.min_rating && product.orders >= self.min_orders
    }
}

/// The single active import configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfiguration {
    pub keywords: Vec<String>,
    pub platforms: Vec<PlatformId>,
    pub daily_limit: u32,
    #[serde(flatten)]
    pub filters: ImportFilters,
    pub schedule: String,
    pub enabled: bool,
}

impl Default for ImportConfiguration {
    fn default() -> Self {
        Self {
            keywords: vec!["electronics".into(), "fashion".into(), "home".into()],
            platforms: PlatformId::ALL.to_vec(),
            daily_limit: 100,
            filters: ImportFilters::default(),
            schedule: DEFAULT_SCHEDULE.to_string(),
            enabled: false,
        }
    }
}

impl ImportConfiguration {
    pub fn schedule_or_default(&self) -> &str {
        let trimmed = self.schedule.trim();
        if trimmed.is_empty() {
            DEFAULT_SCHEDULE
        } else {
            trimmed
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub keywords: Vec<String>,
    pub platforms: Vec<PlatformId>,
    pub limit: u32,
    pub filters: ImportFilters,
    pub created_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn from_config(config: &ImportConfiguration) -> Self {
        let keywords = config
            .keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            id: Uuid::new_v4(),
            keywords,
            platforms: config.platforms.clone(),
            limit: config.daily_limit,
            filters: config.filters.clone(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantOption {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantGroup {
    pub name: String,
    pub options: Vec<VariantOption>,
}

/// Raw listing as scraped from a marketplace.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProduct {
    pub platform: PlatformId,
    pub marketplace_id: String,
    pub title: String,
    pub price: f64,
    pub currency: String,
    pub rating: f32,
    pub orders: u32,
    pub images: Vec<String>,
    pub link: String,
    pub keyword: String,
    pub description: Option<String>,
    #[serde(default)]
    pub variants: Vec<VariantGroup>,
    #[serde(default)]
    pub specifications: BTreeMap<String, String>,
    pub shipping: Option<String>,
}

impl SourceProduct {
    pub fn source_key(&self) -> String {
        format!("{}:{}", self.platform.as_str(), self.marketplace_id)
    }

    pub fn enrich(&mut self, details: ProductDetails) {
        if let Some(description) = details.description.filter(|d| !d.trim().is_empty()) {
            self.description = Some(description);
        }
        for image in details.images {
            if !self.images.contains(&image) {
                self.images.push(image);
            }
        }
        if !details.variants.is_empty() {
            self.variants = details.variants;
        }
        self.specifications.extend(details.specifications);
        if details.shipping.is_some() {
            self.shipping = details.shipping;
        }
    }
}

/// Detail-page enrichment; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductDetails {
    pub description: Option<String>,
    pub images: Vec<String>,
    pub variants: Vec<VariantGroup>,
    pub specifications: BTreeMap<String, String>,
    pub shipping: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Approved,
    Rejected,
    Published,
    Failed,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Approved => "approved",
            CandidateStatus::Rejected => "rejected",
            CandidateStatus::Published => "published",
            CandidateStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Ok,
    Fallback,
    Skipped,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNote {
    pub stage: String,
    pub outcome: StepKind,
    pub reason: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateProduct {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub source: SourceProduct,
    pub title: String,
    pub optimized_title: String,
    pub description: String,
    pub cost: Money,
    pub category: String,
    pub images: Vec<String>,
    pub status: CandidateStatus,
    pub duplicate: bool,
    #[serde(default)]
    pub notes: Vec<StepNote>,
    pub created_at: DateTime<Utc>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub published_id: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failed,
    Pending,
    Approved,
    Rejected,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportLogEntry {
    pub id: Uuid,
    pub candidate_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub status: LogStatus,
    pub title: String,
    pub platform: Option<PlatformId>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ImportLogEntry {
    pub fn for_candidate(
        candidate: &CandidateProduct,
        status: LogStatus,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            candidate_id: Some(candidate.id),
            job_id: candidate.job_id,
            status,
            title: candidate.optimized_title.clone(),
            platform: Some(candidate.source.platform),
            detail,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub imports: Vec<ImportLogEntry>,
    pub total: usize,
    pub total_pages: usize,
    pub current_page: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_imported: usize,
    pub imported_today: usize,
    pub failed_imports: usize,
    pub failed_today: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
