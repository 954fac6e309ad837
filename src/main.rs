mod approval;
mod catalog;
mod currency;
mod dedup;
mod http;
mod jobs;
mod llm;
mod metrics;
mod models;
mod pipeline;
mod platforms;
mod scheduler;
mod security;
mod settings;
mod store;
mod transform;

use approval::{ApprovalError, ApprovalWorkflow, BulkAction, BulkItemResult};
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use catalog::{CatalogApi, CatalogPublisher, InMemoryCatalog, WooCommerceClient};
use currency::CurrencyConverter;
use dedup::DedupChecker;
use eyre::WrapErr;
use jobs::ImportQueue;
use llm::LlmClient;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, CandidateProduct, CandidateStatus, DashboardStats, HistoryPage, ImportConfiguration,
};
use pipeline::ImportPipeline;
use platforms::{HttpSessionFactory, PlatformRegistry};
use scheduler::{Scheduler, SchedulerError, SchedulerStatus, TriggerOutcome};
use security::{AuthContext, AuthState, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use settings::Settings;
use std::{collections::HashSet, net::SocketAddr, sync::Arc};
use store::ImportStore;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use transform::{ContentTransformer, HttpImageProcessor, LibreTranslateClient};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "woopl.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let settings = Arc::new(Settings::from_env());
    let store = ImportStore::from_env();
    if let Err(err) = store.hydrate().await {
        warn!(target = "woopl.store", error = %err, "hydrate_failed_starting_empty");
    }

    let registry = PlatformRegistry::from_names(&[], Arc::new(HttpSessionFactory::from_env()))
        .wrap_err("building platform registry")?;
    info!(target = "woopl.scrape", platforms = ?registry.ids(), "platform adapters ready");
    let catalog: Arc<dyn CatalogApi> = match WooCommerceClient::from_env() {
        Some(client) => Arc::new(client),
        None => {
            warn!(
                target = "woopl.catalog",
                "WOO_* credentials missing; publishing to the in-process catalog"
            );
            Arc::new(InMemoryCatalog::new())
        }
    };
    let transformer = ContentTransformer::new(
        Arc::new(LibreTranslateClient::from_env()),
        Arc::new(LlmClient::from_env()),
        CurrencyConverter::from_env(),
        Arc::new(HttpImageProcessor::new(settings.verify_images)),
        settings.target_currency.clone(),
        settings.local_info.clone(),
    );
    let pipeline = ImportPipeline::new(
        registry.clone(),
        transformer,
        DedupChecker::new(catalog.clone()),
        store.clone(),
        settings.clone(),
    );
    let (queue, _worker) = ImportQueue::spawn(pipeline, settings.queue_capacity);
    let publisher = Arc::new(CatalogPublisher::new(
        catalog,
        settings.pricing,
        settings.stock_quantity,
        settings.target_currency.clone(),
    ));
    let approval = ApprovalWorkflow::new(store.clone(), publisher);
    let resumed = approval.resume_interrupted().await;
    if resumed > 0 {
        info!(target = "woopl.approval", resumed, "resumed interrupted publishes");
    }
    let scheduler = Scheduler::new(store.clone(), queue.clone());
    scheduler.initialize().await;

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let state = AppState {
        store,
        scheduler: scheduler.clone(),
        queue,
        approval,
        registry: registry.clone(),
        openapi: Arc::new(load_openapi()),
        prometheus_handle,
    };
    let app = build_router(state, AuthState::from_env());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "woopl.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    registry.close_all().await;
    info!(target = "woopl.api", "shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target = "woopl.api", error = %err, "signal handler unavailable");
        std::future::pending::<()>().await;
    }
    info!(target = "woopl.api", "shutdown requested");
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(json!({"openapi": "3.0.3"}))
}

#[derive(Clone)]
struct AppState {
    store: ImportStore,
    scheduler: Scheduler,
    queue: ImportQueue,
    approval: ApprovalWorkflow,
    registry: PlatformRegistry,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

fn build_router(state: AppState, auth_state: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .nest(
            "/scheduler",
            Router::new()
                .route("/status", get(scheduler_status))
                .route("/pause", post(scheduler_pause))
                .route("/resume", post(scheduler_resume))
                .route("/trigger", post(scheduler_trigger)),
        )
        .route("/config", get(get_config).post(save_config))
        .nest(
            "/products",
            Router::new()
                .route("/pending", get(pending_products))
                .route("/bulk", post(bulk_products))
                .route("/{id}/approve", post(approve_product))
                .route("/{id}/reject", post(reject_product))
                .route("/{id}/retry", post(retry_product)),
        )
        .route("/imports/history", get(import_history))
        .route("/dashboard/stats", get(dashboard_stats))
        .route("/queue/status", get(queue_status))
        .route("/jobs/{id}", get(get_job_status))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "woopl-import-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Unauthorized("docs"));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Import Admin API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    crate::metrics::inc_requests("/scheduler/status");
    Json(state.scheduler.status().await)
}

async fn scheduler_pause(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Json<ImportConfiguration> {
    crate::metrics::inc_requests("/scheduler/pause");
    info!(target = "woopl.api", operator = %context.operator, "scheduler pause requested");
    Json(state.scheduler.pause().await)
}

async fn scheduler_resume(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<ImportConfiguration>, AppError> {
    crate::metrics::inc_requests("/scheduler/resume");
    info!(target = "woopl.api", operator = %context.operator, "scheduler resume requested");
    Ok(Json(state.scheduler.resume().await?))
}

/// Runs one import cycle now. Disabled configuration and an already active
/// cycle are reported in the body, not as errors.
async fn scheduler_trigger(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Json<TriggerOutcome> {
    crate::metrics::inc_requests("/scheduler/trigger");
    info!(target = "woopl.api", operator = %context.operator, "manual import triggered");
    Json(state.scheduler.run_import().await)
}

async fn get_config(State(state): State<AppState>) -> Result<Json<ImportConfiguration>, AppError> {
    crate::metrics::inc_requests("/config");
    let config = state
        .store
        .load_config()
        .await
        .map_err(|err| AppError::Internal("config", err.to_string()))?;
    Ok(Json(config.unwrap_or_default()))
}

/// Replaces the import configuration and reschedules accordingly.
///
/// - Method: `POST`
/// - Path: `/config`
/// - Body: `ImportConfiguration` (missing fields take their defaults)
async fn save_config(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(mut config): Json<ImportConfiguration>,
) -> Result<Json<ImportConfiguration>, AppError> {
    crate::metrics::inc_requests("/config");
    config.keywords = config
        .keywords
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    let mut seen = HashSet::new();
    config.platforms.retain(|platform| seen.insert(*platform));
    if config.keywords.is_empty() {
        return Err(AppError::BadRequest("config", "at least one keyword is required".into()));
    }
    if config.platforms.is_empty() {
        return Err(AppError::BadRequest("config", "at least one platform is required".into()));
    }
    if config.daily_limit == 0 {
        return Err(AppError::BadRequest("config", "daily_limit must be at least 1".into()));
    }
    if config.filters.min_price > config.filters.max_price {
        return Err(AppError::BadRequest(
            "config",
            "min_price must not exceed max_price".into(),
        ));
    }
    state
        .registry
        .validate(&config.platforms)
        .map_err(|err| AppError::BadRequest("config", err.to_string()))?;
    scheduler::parse_cron(config.schedule_or_default())?;

    state.store.save_config(config.clone()).await;
    state.scheduler.apply(&config).await?;
    info!(
        target = "woopl.api",
        operator = %context.operator,
        enabled = config.enabled,
        schedule = config.schedule_or_default(),
        "configuration saved"
    );
    Ok(Json(config))
}

async fn pending_products(State(state): State<AppState>) -> Json<Vec<CandidateProduct>> {
    crate::metrics::inc_requests("/products/pending");
    Json(state.store.by_status(CandidateStatus::Pending).await)
}

async fn approve_product(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<CandidateProduct>, AppError> {
    crate::metrics::inc_requests("/products/approve");
    let id = parse_id("products", &id)?;
    Ok(Json(state.approval.approve(id, &context.operator).await?))
}

#[derive(Debug, Default, Deserialize)]
struct RejectRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn reject_product(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<RejectRequest>,
) -> Result<Json<CandidateProduct>, AppError> {
    crate::metrics::inc_requests("/products/reject");
    let id = parse_id("products", &id)?;
    Ok(Json(
        state
            .approval
            .reject(id, &context.operator, body.reason)
            .await?,
    ))
}

async fn retry_product(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<CandidateProduct>, AppError> {
    crate::metrics::inc_requests("/products/retry");
    let id = parse_id("products", &id)?;
    Ok(Json(state.approval.retry(id, &context.operator).await?))
}

#[derive(Debug, Deserialize)]
struct BulkRequest {
    action: BulkAction,
    ids: Vec<Uuid>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct BulkResponse {
    results: Vec<BulkItemResult>,
}

async fn bulk_products(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(body): Json<BulkRequest>,
) -> Result<Json<BulkResponse>, AppError> {
    crate::metrics::inc_requests("/products/bulk");
    if body.ids.is_empty() {
        return Err(AppError::BadRequest("products", "ids must not be empty".into()));
    }
    let results = state
        .approval
        .bulk(body.action, &body.ids, &context.operator, body.reason)
        .await;
    Ok(Json(BulkResponse { results }))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

async fn import_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryPage> {
    crate::metrics::inc_requests("/imports/history");
    Json(
        state
            .store
            .history(query.page.unwrap_or(1), query.limit.unwrap_or(20))
            .await,
    )
}

#[derive(Debug, Serialize)]
struct DashboardResponse {
    #[serde(flatten)]
    stats: DashboardStats,
    scheduler: SchedulerStatus,
    queue: jobs::QueueStatus,
}

async fn dashboard_stats(State(state): State<AppState>) -> Json<DashboardResponse> {
    crate::metrics::inc_requests("/dashboard/stats");
    Json(DashboardResponse {
        stats: state.store.stats(chrono::Utc::now()).await,
        scheduler: state.scheduler.status().await,
        queue: state.queue.status().await,
    })
}

async fn queue_status(State(state): State<AppState>) -> Json<jobs::QueueStatus> {
    crate::metrics::inc_requests("/queue/status");
    Json(state.queue.status().await)
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let uuid = parse_id("jobs", &id)?;
    match state.queue.get(uuid).await {
        Some(info) => Ok(Json(info)),
        None => Err(AppError::NotFound("jobs", format!("job {uuid} not found"))),
    }
}

fn parse_id(scope: &'static str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(scope, format!("invalid id `{raw}`")))
}

#[derive(Debug)]
enum AppError {
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Unauthorized(&'static str),
    Internal(&'static str, String),
    Approval(ApprovalError),
    Scheduler(SchedulerError),
}

impl From<ApprovalError> for AppError {
    fn from(value: ApprovalError) -> Self {
        Self::Approval(value)
    }
}

impl From<SchedulerError> for AppError {
    fn from(value: SchedulerError) -> Self {
        Self::Scheduler(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            AppError::BadRequest(scope, detail) => (StatusCode::BAD_REQUEST, scope, Some(detail)),
            AppError::NotFound(scope, detail) => (StatusCode::NOT_FOUND, scope, Some(detail)),
            AppError::Unauthorized(scope) => {
                (StatusCode::UNAUTHORIZED, scope, Some("unauthorized".into()))
            }
            AppError::Internal(scope, detail) => {
                (StatusCode::INTERNAL_SERVER_ERROR, scope, Some(detail))
            }
            AppError::Approval(err) => {
                let status = match &err {
                    ApprovalError::NotFound(_) => StatusCode::NOT_FOUND,
                    ApprovalError::IllegalTransition { .. } => StatusCode::CONFLICT,
                    ApprovalError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, "approval", Some(err.to_string()))
            }
            AppError::Scheduler(err) => (StatusCode::BAD_REQUEST, "scheduler", Some(err.to_string())),
        };
        let payload = ApiError {
            error: error.to_string(),
            detail,
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
