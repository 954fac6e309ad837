use crate::dedup::DedupChecker;
use crate::models::{
    CandidateProduct, CandidateStatus, ImportJob, ImportLogEntry, LogStatus, SourceProduct,
};
use crate::platforms::{PlatformAdapter, PlatformId, PlatformRegistry, ScrapeError};
use crate::settings::Settings;
use crate::store::{ImportStore, InsertOutcome};
use crate::transform::ContentTransformer;
use chrono::Utc;
use serde::Serialize;
use std::{collections::HashSet, future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Scrape, transform and stage one import job.
#[derive(Clone)]
pub struct ImportPipeline {
    registry: PlatformRegistry,
    transformer: ContentTransformer,
    dedup: DedupChecker,
    store: ImportStore,
    settings: Arc<Settings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Filtered,
    AlreadyImported,
    LimitReached,
    Created(Uuid),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobSummary {
    pub found: usize,
    pub created: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub limit_reached: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl JobSummary {
    fn absorb(&mut self, other: JobSummary) {
        self.found += other.found;
        self.created += other.created;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
        self.limit_reached |= other.limit_reached;
        self.errors.extend(other.errors);
    }
}

impl ImportPipeline {
    pub fn new(
        registry: PlatformRegistry,
        transformer: ContentTransformer,
        dedup: DedupChecker,
        store: ImportStore,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            registry,
            transformer,
            dedup,
            store,
            settings,
        }
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    /// Runs every platform of the job concurrently. Per-platform failures are
    /// collected in the summary; the job fails only when it is unusable or no
    /// platform task completed.
    pub async fn run(&self, job: ImportJob) -> Result<JobSummary, PipelineError> {
        if job.keywords.is_empty() {
            return Err(PipelineError::invalid_input("job", "no keywords configured"));
        }
        if job.platforms.is_empty() {
            return Err(PipelineError::invalid_input("job", "no platforms configured"));
        }
        self.registry
            .validate(&job.platforms)
            .map_err(|err| PipelineError::invalid_input("platforms", err.to_string()))?;

        let started = Instant::now();
        let job = Arc::new(job);
        let mut tasks = JoinSet::new();
        for platform in job.platforms.iter().copied() {
            let pipeline = self.clone();
            let job = job.clone();
            tasks.spawn(async move { pipeline.run_platform(job, platform).await });
        }

        let mut summary = JobSummary::default();
        let mut completed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(part) => {
                    completed += 1;
                    summary.absorb(part);
                }
                Err(err) => {
                    warn!(target = "woopl.queue", job = %job.id, error = %err, "platform_task_aborted");
                    summary.errors.push(format!("platform task aborted: {err}"));
                }
            }
        }
        if completed == 0 {
            return Err(PipelineError::internal(
                "platforms",
                summary.errors.join("; "),
            ));
        }

        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed("import_job", elapsed_ms);
        crate::metrics::import_counts(summary.created, summary.duplicates, summary.skipped);
        info!(
            target = "woopl.queue",
            job = %job.id,
            found = summary.found,
            created = summary.created,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            limit_reached = summary.limit_reached,
            elapsed_ms = elapsed_ms as u64,
            "import_job_complete"
        );
        Ok(summary)
    }

    /// Scrapes one platform under its lane lock. The adapter session is
    /// closed afterwards even when scraping panicked.
    async fn run_platform(&self, job: Arc<ImportJob>, platform: PlatformId) -> JobSummary {
        let lane = match self.registry.get(platform) {
            Ok(lane) => lane,
            Err(err) => {
                return JobSummary {
                    errors: vec![err.to_string()],
                    ..JobSummary::default()
                };
            }
        };
        let _guard = lane.acquire().await;

        let pipeline = self.clone();
        let adapter = lane.adapter.clone();
        let scraping = tokio::spawn(async move {
            let mut summary = JobSummary::default();
            pipeline
                .scrape_keywords(&job, platform, adapter.as_ref(), &mut summary)
                .await;
            summary
        });
        let summary = match scraping.await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(target = "woopl.scrape", platform = %platform, error = %err, "platform_scrape_aborted");
                JobSummary {
                    errors: vec![format!("{platform}: scraping aborted: {err}")],
                    ..JobSummary::default()
                }
            }
        };
        lane.adapter.close().await;
        summary
    }

    async fn scrape_keywords(
        &self,
        job: &ImportJob,
        platform: PlatformId,
        adapter: &dyn PlatformAdapter,
        summary: &mut JobSummary,
    ) {
        let limit = job.limit.max(1) as usize;
        let mut seen = HashSet::new();
        for keyword in &job.keywords {
            let started = Instant::now();
            let found = match self
                .with_retry(platform, "search", || {
                    adapter.search(keyword, &job.filters, limit)
                })
                .await
            {
                Ok(found) => found,
                Err(err) => {
                    summary.errors.push(format!("{platform}/{keyword}: {err}"));
                    self.store
                        .append_log(ImportLogEntry {
                            id: Uuid::new_v4(),
                            candidate_id: None,
                            job_id: Some(job.id),
                            status: LogStatus::Failed,
                            title: keyword.clone(),
                            platform: Some(platform),
                            detail: Some(err.to_string()),
                            created_at: Utc::now(),
                        })
                        .await;
                    continue;
                }
            };
            crate::metrics::stage_elapsed("search", started.elapsed().as_millis());

            let mut fresh = Vec::new();
            for product in found {
                if !seen.insert(product.marketplace_id.clone()) {
                    continue;
                }
                if !job.filters.accepts(&product)
                    || self.store.contains_source(&product.source_key()).await
                {
                    summary.skipped += 1;
                    continue;
                }
                fresh.push(product);
            }
            summary.found += fresh.len();

            for (index, mut product) in fresh.into_iter().enumerate() {
                if index < self.settings.detail_fetch_cap && !product.link.is_empty() {
                    let details = self
                        .with_retry(platform, "details", || adapter.get_details(&product.link))
                        .await;
                    match details {
                        Ok(details) => product.enrich(details),
                        Err(err) => debug!(
                            target = "woopl.scrape",
                            platform = %platform,
                            link = %product.link,
                            error = %err,
                            "details_unavailable"
                        ),
                    }
                }
                match self.ingest(job, product).await {
                    IngestOutcome::Created(id) => {
                        summary.created += 1;
                        if self
                            .store
                            .get(id)
                            .await
                            .is_some_and(|candidate| candidate.duplicate)
                        {
                            summary.duplicates += 1;
                        }
                    }
                    IngestOutcome::Filtered | IngestOutcome::AlreadyImported => {
                        summary.skipped += 1
                    }
                    IngestOutcome::LimitReached => {
                        summary.limit_reached = true;
                        info!(
                            target = "woopl.queue",
                            job = %job.id,
                            platform = %platform,
                            "daily_limit_reached"
                        );
                        return;
                    }
                }
            }
        }
    }

    /// Stages one scraped listing as a pending candidate.
    pub async fn ingest(&self, job: &ImportJob, product: SourceProduct) -> IngestOutcome {
        if !job.filters.accepts(&product) {
            return IngestOutcome::Filtered;
        }
        if self.store.contains_source(&product.source_key()).await {
            return IngestOutcome::AlreadyImported;
        }

        let transformed = self.transformer.transform(&product).await;
        let duplicate = self.dedup.is_duplicate(&transformed.optimized_title).await;
        let candidate = CandidateProduct {
            id: Uuid::new_v4(),
            job_id: Some(job.id),
            source: product,
            title: transformed.title,
            optimized_title: transformed.optimized_title,
            description: transformed.description,
            cost: transformed.cost,
            category: transformed.category,
            images: transformed.images,
            status: CandidateStatus::Pending,
            duplicate,
            notes: transformed.notes,
            created_at: Utc::now(),
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            published_id: None,
            last_error: None,
        };
        let id = candidate.id;
        let detail = duplicate.then(|| "possible duplicate of an existing listing".to_string());
        let entry = ImportLogEntry::for_candidate(&candidate, LogStatus::Pending, detail);
        match self
            .store
            .insert_candidate(candidate, job.limit, entry)
            .await
        {
            InsertOutcome::Inserted => {
                debug!(target = "woopl.queue", candidate = %id, duplicate, "candidate_created");
                IngestOutcome::Created(id)
            }
            InsertOutcome::AlreadyImported => IngestOutcome::AlreadyImported,
            InsertOutcome::LimitReached => IngestOutcome::LimitReached,
        }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        platform: PlatformId,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        let policy = self.settings.retry_for(platform);
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                    let delay = policy.delay_for(attempt, err.retry_hint());
                    warn!(
                        target = "woopl.scrape",
                        platform = %platform,
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::models::{ImportFilters, ProductDetails};
    use crate::settings::RetryPolicy;
    use crate::transform::testing::{offline_transformer, sample_source};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Adapter returning canned listings, optionally failing the first
    /// `failures` searches with a retryable error.
    pub struct ScriptedAdapter {
        pub platform: PlatformId,
        pub products: Vec<SourceProduct>,
        pub failures: AtomicUsize,
        pub fatal: bool,
        pub panics: bool,
        pub searches: AtomicUsize,
        pub details: AtomicUsize,
        pub closes: AtomicUsize,
        pub gate: Mutex<Option<Arc<tokio::sync::Notify>>>,
    }

    impl ScriptedAdapter {
        pub fn new(platform: PlatformId, titles: &[&str]) -> Self {
            let products = titles
                .iter()
                .enumerate()
                .map(|(index, title)| {
                    let mut product = sample_source(platform, title);
                    product.marketplace_id = format!("{}", 1000 + index);
                    product
                })
                .collect();
            Self {
                platform,
                products,
                failures: AtomicUsize::new(0),
                fatal: false,
                panics: false,
                searches: AtomicUsize::new(0),
                details: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                gate: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl PlatformAdapter for ScriptedAdapter {
        fn platform(&self) -> PlatformId {
            self.platform
        }

        async fn search(
            &self,
            _keyword: &str,
            _filters: &ImportFilters,
            limit: usize,
        ) -> Result<Vec<SourceProduct>, ScrapeError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            let gate = self
                .gate
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.panics {
                panic!("extractor bug on {}", self.platform);
            }
            if self.fatal {
                return Err(ScrapeError::Navigation("blocked by captcha".into()));
            }
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ScrapeError::RateLimited {
                    retry_after: Some(Duration::from_millis(1)),
                });
            }
            Ok(self.products.iter().take(limit).cloned().collect())
        }

        async fn get_details(&self, _link: &str) -> Result<ProductDetails, ScrapeError> {
            self.details.fetch_add(1, Ordering::SeqCst);
            Ok(ProductDetails {
                description: Some("Detailed copy.".into()),
                ..ProductDetails::default()
            })
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn fast_settings() -> Settings {
        Settings {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            detail_fetch_cap: 2,
            ..Settings::default()
        }
    }

    pub fn pipeline_with(
        adapters: Vec<Arc<ScriptedAdapter>>,
        store: ImportStore,
        catalog: Arc<InMemoryCatalog>,
    ) -> ImportPipeline {
        let mut registry = PlatformRegistry::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        ImportPipeline::new(
            registry,
            offline_transformer(),
            DedupChecker::new(catalog),
            store,
            Arc::new(fast_settings()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::models::ImportConfiguration;
    use crate::transform::testing::sample_source;
    use std::sync::atomic::Ordering;

    fn job(platforms: Vec<PlatformId>, limit: u32) -> ImportJob {
        ImportJob::from_config(&ImportConfiguration {
            keywords: vec!["electronics".into()],
            platforms,
            daily_limit: limit,
            ..ImportConfiguration::default()
        })
    }

    #[tokio::test]
    async fn happy_path_stages_pending_candidates() {
        let adapter = Arc::new(ScriptedAdapter::new(
            PlatformId::AliExpress,
            &["Wireless Earbuds", "Smart Watch", "Phone Stand"],
        ));
        let store = ImportStore::in_memory();
        let pipeline = pipeline_with(
            vec![adapter.clone()],
            store.clone(),
            Arc::new(InMemoryCatalog::new()),
        );
        let summary = pipeline
            .run(job(vec![PlatformId::AliExpress], 100))
            .await
            .expect("job");
        assert_eq!(summary.created, 3);
        assert!(summary.errors.is_empty());
        assert_eq!(adapter.details.load(Ordering::SeqCst), 2);
        assert_eq!(adapter.closes.load(Ordering::SeqCst), 1);

        let pending = store.by_status(CandidateStatus::Pending).await;
        assert_eq!(pending.len(), 3);
        assert!(pending.iter().all(|c| c.cost.currency == "GHS"));
        assert!(pending.iter().all(|c| c.category == "Electronics"));
    }

    #[tokio::test]
    async fn rerunning_a_job_does_not_duplicate_candidates() {
        let adapter = Arc::new(ScriptedAdapter::new(PlatformId::Alibaba, &["Desk Lamp"]));
        let store = ImportStore::in_memory();
        let pipeline = pipeline_with(
            vec![adapter],
            store.clone(),
            Arc::new(InMemoryCatalog::new()),
        );
        pipeline
            .run(job(vec![PlatformId::Alibaba], 100))
            .await
            .expect("first");
        let second = pipeline
            .run(job(vec![PlatformId::Alibaba], 100))
            .await
            .expect("second");
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(store.by_status(CandidateStatus::Pending).await.len(), 1);
    }

    #[tokio::test]
    async fn below_threshold_products_are_filtered() {
        let store = ImportStore::in_memory();
        let pipeline = pipeline_with(Vec::new(), store.clone(), Arc::new(InMemoryCatalog::new()));
        let job = job(vec![PlatformId::AliExpress], 100);
        let mut product = sample_source(PlatformId::AliExpress, "Cheap Cable");
        product.rating = 3.2;
        assert_eq!(pipeline.ingest(&job, product).await, IngestOutcome::Filtered);
        let mut product = sample_source(PlatformId::AliExpress, "Unpopular Mouse");
        product.orders = 3;
        assert_eq!(pipeline.ingest(&job, product).await, IngestOutcome::Filtered);
        assert!(store.by_status(CandidateStatus::Pending).await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_title_is_flagged_but_stays_pending() {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.seed_listing("Noise Cancelling Headphones Pro");
        let store = ImportStore::in_memory();
        let pipeline = pipeline_with(Vec::new(), store.clone(), catalog);
        let job = job(vec![PlatformId::AliExpress], 100);
        let outcome = pipeline
            .ingest(
                &job,
                sample_source(PlatformId::AliExpress, "Noise Cancelling Headphones"),
            )
            .await;
        let IngestOutcome::Created(id) = outcome else {
            panic!("expected a candidate, got {outcome:?}");
        };
        let candidate = store.get(id).await.expect("candidate");
        assert!(candidate.duplicate);
        assert_eq!(candidate.status, CandidateStatus::Pending);
    }

    #[tokio::test]
    async fn daily_limit_holds_across_platforms() {
        let titles: Vec<String> = (0..6).map(|i| format!("Gadget {i}")).collect();
        let titles: Vec<&str> = titles.iter().map(String::as_str).collect();
        let adapters = vec![
            Arc::new(ScriptedAdapter::new(PlatformId::AliExpress, &titles)),
            Arc::new(ScriptedAdapter::new(PlatformId::Alibaba, &titles)),
        ];
        let store = ImportStore::in_memory();
        let pipeline = pipeline_with(adapters, store.clone(), Arc::new(InMemoryCatalog::new()));
        let summary = pipeline
            .run(job(vec![PlatformId::AliExpress, PlatformId::Alibaba], 4))
            .await
            .expect("job");
        assert_eq!(summary.created, 4);
        assert!(summary.limit_reached);
        assert_eq!(store.by_status(CandidateStatus::Pending).await.len(), 4);
    }

    #[tokio::test]
    async fn rate_limits_are_retried_then_succeed() {
        let adapter = ScriptedAdapter::new(PlatformId::AliExpress, &["Phone Stand"]);
        adapter.failures.store(2, Ordering::SeqCst);
        let adapter = Arc::new(adapter);
        let pipeline = pipeline_with(
            vec![adapter.clone()],
            ImportStore::in_memory(),
            Arc::new(InMemoryCatalog::new()),
        );
        let summary = pipeline
            .run(job(vec![PlatformId::AliExpress], 100))
            .await
            .expect("job");
        assert_eq!(summary.created, 1);
        assert_eq!(adapter.searches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_one_platform_only() {
        let flaky = ScriptedAdapter::new(PlatformId::AliExpress, &["Phone Stand"]);
        flaky.failures.store(10, Ordering::SeqCst);
        let flaky = Arc::new(flaky);
        let healthy = Arc::new(ScriptedAdapter::new(PlatformId::Alibaba, &["Desk Lamp"]));
        let pipeline = pipeline_with(
            vec![flaky.clone(), healthy],
            ImportStore::in_memory(),
            Arc::new(InMemoryCatalog::new()),
        );
        let summary = pipeline
            .run(job(vec![PlatformId::AliExpress, PlatformId::Alibaba], 100))
            .await
            .expect("job");
        assert_eq!(summary.created, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("aliexpress/electronics"));
        assert_eq!(flaky.searches.load(Ordering::SeqCst), 3);
        assert_eq!(flaky.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_errors_are_not_retried() {
        let mut blocked = ScriptedAdapter::new(PlatformId::Ali1688, &["Tea Set"]);
        blocked.fatal = true;
        let blocked = Arc::new(blocked);
        let pipeline = pipeline_with(
            vec![blocked.clone()],
            ImportStore::in_memory(),
            Arc::new(InMemoryCatalog::new()),
        );
        let summary = pipeline
            .run(job(vec![PlatformId::Ali1688], 100))
            .await
            .expect("job");
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(blocked.searches.load(Ordering::SeqCst), 1);
        assert_eq!(blocked.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_platform_is_closed_and_siblings_finish() {
        let mut broken = ScriptedAdapter::new(PlatformId::Ali1688, &["Tea Set"]);
        broken.panics = true;
        let broken = Arc::new(broken);
        let healthy = Arc::new(ScriptedAdapter::new(PlatformId::AliExpress, &["Desk Lamp"]));

        let store = ImportStore::in_memory();
        let pipeline = pipeline_with(
            vec![broken.clone(), healthy.clone()],
            store.clone(),
            Arc::new(InMemoryCatalog::new()),
        );
        let summary = pipeline
            .run(job(vec![PlatformId::Ali1688, PlatformId::AliExpress], 100))
            .await
            .expect("healthy platform completes the job");

        assert_eq!(broken.closes.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.closes.load(Ordering::SeqCst), 1);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("1688"));
        assert_eq!(store.by_status(CandidateStatus::Pending).await.len(), 1);
    }

    #[tokio::test]
    async fn unregistered_platform_rejects_the_job() {
        let pipeline = pipeline_with(
            Vec::new(),
            ImportStore::in_memory(),
            Arc::new(InMemoryCatalog::new()),
        );
        let err = pipeline
            .run(job(vec![PlatformId::Ali1688], 100))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert_eq!(err.stage(), "platforms");
    }
}
