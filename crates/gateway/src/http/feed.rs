use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use pitwall_contracts::{EventRecord, ResourceKind, ResourceQuery};
use serde_json::Value;

use super::{ApiError, AppState, FeedParams, serve_feed};
use crate::enrich::label_standings;
use crate::reduce::{LatestState, RANK_FIELD, parse_records};
use crate::sample::SampledTrajectory;
use crate::upstream::{UpstreamClient, UpstreamError};

type FeedResult = Result<Json<Value>, ApiError>;

pub(super) async fn positions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> FeedResult {
    serve_feed(state, headers, params, ResourceKind::Positions, standings).await
}

pub(super) async fn intervals(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> FeedResult {
    serve_feed(state, headers, params, ResourceKind::Intervals, latest_per_driver).await
}

/// Most recent telemetry sample for one car, or `null` when the feed has none.
pub(super) async fn car_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> FeedResult {
    serve_feed(state, headers, params, ResourceKind::CarData, latest_for_driver).await
}

pub(super) async fn locations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> FeedResult {
    serve_feed(state, headers, params, ResourceKind::Locations, trajectories).await
}

pub(super) async fn laps(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> FeedResult {
    serve_feed(state, headers, params, ResourceKind::Laps, passthrough).await
}

pub(super) async fn team_radio(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> FeedResult {
    serve_feed(state, headers, params, ResourceKind::TeamRadio, passthrough).await
}

async fn standings(state: AppState, query: ResourceQuery) -> Result<Value, UpstreamError> {
    let latest = latest_state(&state.upstream, &query).await?;
    Ok(Value::Array(label_standings(latest.into_ranked(RANK_FIELD))))
}

async fn latest_per_driver(state: AppState, query: ResourceQuery) -> Result<Value, UpstreamError> {
    let latest = latest_state(&state.upstream, &query).await?;
    Ok(records_to_array(latest.into_records()))
}

async fn latest_for_driver(state: AppState, query: ResourceQuery) -> Result<Value, UpstreamError> {
    let latest = latest_state(&state.upstream, &query).await?;
    let record = query.driver_number.and_then(|driver| latest.take(driver));
    Ok(record.map(EventRecord::into_value).unwrap_or(Value::Null))
}

async fn trajectories(state: AppState, query: ResourceQuery) -> Result<Value, UpstreamError> {
    let mut extra = Vec::new();
    if state.config.location_fetch_limit > 0 {
        extra.push(("limit", state.config.location_fetch_limit.to_string()));
    }

    let raw = state.upstream.fetch_query(&query, &extra).await?;
    let sampled = SampledTrajectory::build(
        query.resource,
        parse_records(query.resource, raw),
        state.config.sampler_target_cap,
    );
    Ok(records_to_array(sampled.flatten()))
}

async fn passthrough(state: AppState, query: ResourceQuery) -> Result<Value, UpstreamError> {
    let raw = state.upstream.fetch_query(&query, &[]).await?;
    Ok(Value::Array(raw))
}

/// Fetches `query` and keeps the newest record per driver.
pub(super) async fn latest_state(
    upstream: &UpstreamClient,
    query: &ResourceQuery,
) -> Result<LatestState, UpstreamError> {
    let raw = upstream.fetch_query(query, &[]).await?;
    Ok(LatestState::reduce(parse_records(query.resource, raw)))
}

fn records_to_array(records: Vec<EventRecord>) -> Value {
    Value::Array(records.into_iter().map(EventRecord::into_value).collect())
}
