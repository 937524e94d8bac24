use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::Router;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use pitwall_contracts::{QueryError, ResourceKind, ResourceQuery, TtlPolicy};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use ulid::Ulid;

use crate::cache::RequestCache;
use crate::clock::{SharedClock, SystemClock};
use crate::config::{GatewayConfig, StartupError};
use crate::enrich::ReferenceTable;
use crate::upstream::{UpstreamClient, UpstreamError};

mod feed;
mod roster;

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    upstream: UpstreamClient,
    cache: RequestCache,
    ttl: TtlPolicy,
    reference: Arc<ReferenceTable>,
}

impl AppState {
    pub fn new(config: GatewayConfig, clock: SharedClock) -> Result<Self, StartupError> {
        let upstream = UpstreamClient::new(config.upstream_client_config(), clock.clone())
            .map_err(|err| StartupError {
                code: "ERR_UPSTREAM_CLIENT",
                message: format!("failed to initialize upstream client: {}", err),
            })?;
        let cache = RequestCache::new(config.cache_max_entries, clock);
        let ttl = config.ttl_policy();

        Ok(Self {
            config,
            upstream,
            cache,
            ttl,
            reference: Arc::new(ReferenceTable::builtin()),
        })
    }

    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

/// Builds the production router and starts the cache sweeper on the current runtime.
pub async fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    let state = AppState::new(config, Arc::new(SystemClock))?;
    state
        .cache
        .spawn_sweeper(Duration::from_millis(state.config.cache_sweep_interval_ms));
    Ok(routes(state))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/sessions", get(roster::sessions))
        .route("/api/drivers", get(roster::drivers))
        .route("/api/positions", get(feed::positions))
        .route("/api/laps", get(feed::laps))
        .route("/api/car_data", get(feed::car_data))
        .route("/api/locations", get(feed::locations))
        .route("/api/intervals", get(feed::intervals))
        .route("/api/team_radio", get(feed::team_radio))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Raw query string parameters shared by the feed routes.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct FeedParams {
    #[serde(default)]
    session_key: Option<String>,
    #[serde(default)]
    driver_number: Option<String>,
}

impl FeedParams {
    fn into_query(
        self,
        state: &AppState,
        resource: ResourceKind,
    ) -> Result<ResourceQuery, ApiError> {
        ResourceQuery::from_params(
            resource,
            self.session_key.as_deref(),
            self.driver_number.as_deref(),
            &state.config.default_session_key,
        )
        .map_err(|err| query_error_response(&err))
    }
}

/// Answers `query` from the cache, or computes, caches and returns it.
///
/// Only successful results are stored. The TTL comes from the query's resource type.
async fn serve_cached<F, Fut>(
    state: &AppState,
    query: &ResourceQuery,
    request_id: &str,
    compute: F,
) -> Result<Json<serde_json::Value>, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<serde_json::Value, UpstreamError>>,
{
    let resource = query.resource.as_str();
    let signature = query.signature();
    let span = tracing::info_span!(
        "feed.query",
        request_id = %request_id,
        resource,
        session_key = %query.session_key,
        signature = %signature,
        cache = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    async move {
        let started = Instant::now();

        if let Some(hit) = state.cache.lookup(&signature) {
            crate::metrics::observe_cache_lookup(resource, true);
            tracing::Span::current().record("cache", "hit");
            tracing::Span::current().record("outcome", "success");
            return Ok(Json(hit));
        }
        crate::metrics::observe_cache_lookup(resource, false);
        tracing::Span::current().record("cache", "miss");

        let result = compute().await;
        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::Span::current().record("latency_ms", latency_ms);

        match result {
            Ok(value) => {
                state
                    .cache
                    .store(signature.clone(), value.clone(), state.ttl.ttl_for(query.resource));
                tracing::Span::current().record("outcome", "success");
                tracing::info!("feed.query_served");
                Ok(Json(value))
            }
            Err(err) => {
                tracing::Span::current().record("outcome", "error");
                tracing::warn!(error = %err, "feed.query_failed");
                Err(upstream_error_response(&err))
            }
        }
    }
    .instrument(span)
    .await
}

/// Runs one feed route end to end: parameter validation, cache, compute and metrics.
///
/// Invalid parameters are rejected before `compute` can reach the upstream feed.
async fn serve_feed<F, Fut>(
    state: AppState,
    headers: HeaderMap,
    params: FeedParams,
    resource: ResourceKind,
    compute: F,
) -> Result<Json<serde_json::Value>, ApiError>
where
    F: FnOnce(AppState, ResourceQuery) -> Fut,
    Fut: Future<Output = Result<serde_json::Value, UpstreamError>>,
{
    let started = Instant::now();
    let result = match params.into_query(&state, resource) {
        Ok(query) => {
            let request_id = extract_request_id(&headers);
            serve_cached(&state, &query, &request_id, || {
                compute(state.clone(), query.clone())
            })
            .await
        }
        Err(err) => Err(err),
    };
    finish(resource.as_str(), started, result)
}

/// Records request metrics for a finished handler.
fn finish(
    route: &'static str,
    started: Instant,
    result: Result<Json<serde_json::Value>, ApiError>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(route, status.as_u16(), started.elapsed());
    result
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-pitwall-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
        }),
    )
}

fn query_error_response(err: &QueryError) -> ApiError {
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_PARAMS",
        err.to_string(),
        false,
    )
}

fn upstream_error_response(err: &UpstreamError) -> ApiError {
    match err {
        UpstreamError::Timeout => json_error(
            StatusCode::GATEWAY_TIMEOUT,
            "ERR_SOURCE_TIMEOUT",
            "telemetry feed timed out",
            true,
        ),
        UpstreamError::RateLimited => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "ERR_SOURCE_RATE_LIMITED",
            "telemetry feed request budget exhausted; retry shortly",
            true,
        ),
        _ => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "ERR_SOURCE_UNAVAILABLE",
            "failed to fetch from telemetry feed",
            true,
        ),
    }
}
