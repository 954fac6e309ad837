use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, Request, StatusCode, header, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const IMPORT_KEY_HEADER: &str = "X-Import-Key";

/// Admin API keys plus the per-operator request budget.
#[derive(Clone)]
pub struct AuthState {
    operators: Arc<HashMap<String, AuthContext>>,
    limiter: Arc<OperatorLimiter>,
}

/// Authenticated admin caller; `operator` is recorded as the reviewer on
/// approval actions.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub operator: String,
    pub api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("ADMIN_API_KEYS").unwrap_or_default();
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        let burst = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(10.0);
        Self::with_limits(&raw, rate_per_sec, burst)
    }

    fn with_limits(raw_keys: &str, rate_per_sec: f64, burst: f64) -> Self {
        Self {
            operators: Arc::new(operator_keys(raw_keys)),
            limiter: Arc::new(OperatorLimiter::new(rate_per_sec, burst)),
        }
    }
}

enum AuthRejection {
    MissingKey,
    UnknownKey,
    Throttled(Budget),
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, error, detail) = match &self {
            AuthRejection::MissingKey => (
                StatusCode::UNAUTHORIZED,
                "missing_api_key",
                "Provide X-Import-Key or Bearer token",
            ),
            AuthRejection::UnknownKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                "Key not recognized",
            ),
            AuthRejection::Throttled(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests",
            ),
        };
        let mut response = (
            status,
            Json(ApiError {
                error: error.to_string(),
                detail: Some(detail.to_string()),
            }),
        )
            .into_response();
        if let AuthRejection::Throttled(budget) = self {
            budget.write_headers(response.headers_mut());
        }
        response
    }
}

/// Resolves the caller's key to an operator, charges one request against the
/// operator's budget and exposes the budget in `X-RateLimit-*` headers.
pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let context = match presented_key(request.headers()) {
        None => return AuthRejection::MissingKey.into_response(),
        Some(key) => match state.operators.get(&key) {
            Some(context) => context.clone(),
            None => {
                debug!(target = "woopl.api", "rejected unknown admin key");
                return AuthRejection::UnknownKey.into_response();
            }
        },
    };

    let budget = state.limiter.charge(&context.operator).await;
    if !budget.granted {
        warn!(target = "woopl.api", operator = %context.operator, "admin rate limit hit");
        return AuthRejection::Throttled(budget).into_response();
    }

    request.extensions_mut().insert(context);
    let mut response = next.run(request).await;
    budget.write_headers(response.headers_mut());
    response
}

fn presented_key(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| {
            let (scheme, token) = raw.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        });
    bearer
        .or_else(|| {
            headers
                .get(IMPORT_KEY_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
        })
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// Parses `operator:key,operator:key`. Falls back to a single local dev key
/// when nothing usable is configured.
fn operator_keys(raw: &str) -> HashMap<String, AuthContext> {
    let mut keys = HashMap::new();
    let entries = raw.split(',').map(str::trim).filter(|e| !e.is_empty());
    for (idx, entry) in entries.enumerate() {
        let parsed = entry
            .split_once(':')
            .map(|(operator, key)| (operator.trim(), key.trim()))
            .filter(|(operator, key)| !operator.is_empty() && !key.is_empty());
        let Some((operator, key)) = parsed else {
            warn!(target = "woopl.api", "ignored malformed ADMIN_API_KEYS entry: {entry}");
            continue;
        };
        keys.insert(
            key.to_string(),
            AuthContext {
                operator: operator.to_string(),
                api_key_id: format!("key-{:02}", idx + 1),
            },
        );
    }

    if keys.is_empty() {
        warn!(
            target = "woopl.api",
            "ADMIN_API_KEYS produced no keys; accepting the local dev key only"
        );
        keys.insert(
            "dev-key".to_string(),
            AuthContext {
                operator: "admin".to_string(),
                api_key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(target = "woopl.api", key_count = keys.len(), "loaded admin API keys");
    }
    keys
}

/// Token bucket per operator.
struct OperatorLimiter {
    rate_per_sec: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, (f64, Instant)>>,
}

/// Bucket state after one charge attempt.
#[derive(Debug, Clone, Copy)]
struct Budget {
    granted: bool,
    burst: f64,
    remaining: f64,
    rate_per_sec: f64,
}

impl OperatorLimiter {
    fn new(rate_per_sec: f64, burst: f64) -> Self {
        Self {
            rate_per_sec,
            burst,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    async fn charge(&self, operator: &str) -> Budget {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let (tokens, refilled_at) = buckets
            .entry(operator.to_string())
            .or_insert((self.burst, now));
        let earned = now.duration_since(*refilled_at).as_secs_f64() * self.rate_per_sec;
        *tokens = (*tokens + earned).min(self.burst);
        *refilled_at = now;

        let granted = *tokens >= 1.0;
        if granted {
            *tokens -= 1.0;
        }
        Budget {
            granted,
            burst: self.burst,
            remaining: *tokens,
            rate_per_sec: self.rate_per_sec,
        }
    }
}

impl Budget {
    fn write_headers(&self, headers: &mut HeaderMap) {
        let refill_secs = ((self.burst - self.remaining) / self.rate_per_sec).ceil().max(0.0);
        set_number(headers, "x-ratelimit-limit", self.burst as u64);
        set_number(headers, "x-ratelimit-remaining", self.remaining.max(0.0).floor() as u64);
        set_number(headers, "x-ratelimit-reset", refill_secs as u64);
        if !self.granted {
            let wait = ((1.0 - self.remaining) / self.rate_per_sec).ceil().max(1.0);
            set_number(headers, header::RETRY_AFTER.as_str(), wait as u64);
        }
    }
}

fn set_number(headers: &mut HeaderMap, name: &'static str, value: u64) {
    headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
}

#[cfg(test)]
pub(crate) fn test_auth_state(raw_keys: &str, burst: f64) -> AuthState {
    AuthState::with_limits(raw_keys, 0.001, burst)
}
