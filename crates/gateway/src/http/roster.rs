use std::cmp::Reverse;
use std::collections::HashMap;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use pitwall_contracts::record::parse_timestamp;
use pitwall_contracts::{Meeting, ResourceKind, ResourceQuery, SessionDescriptor, UpstreamSession};
use serde_json::Value;
use tokio::task::JoinSet;

use super::feed::latest_state;
use super::{ApiError, AppState, FeedParams, serve_feed};
use crate::enrich::enrich_roster;
use crate::upstream::{UpstreamClient, UpstreamError};

/// Not session scoped: any query string is ignored and never fails validation.
pub(super) async fn sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    serve_feed(
        state,
        headers,
        FeedParams::default(),
        ResourceKind::Sessions,
        recent_sessions,
    )
    .await
}

pub(super) async fn drivers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> Result<Json<Value>, ApiError> {
    serve_feed(state, headers, params, ResourceKind::Drivers, enriched_drivers).await
}

/// Sessions of the most recent meetings, newest first.
async fn recent_sessions(state: AppState, _query: ResourceQuery) -> Result<Value, UpstreamError> {
    let mut meetings = state.upstream.fetch_as::<Meeting>("meetings", &[]).await?;
    meetings.sort_by_key(|m| (Reverse(parse_timestamp(&m.date_start)), Reverse(m.meeting_key)));
    meetings.truncate(state.config.sessions_recent_meetings);

    let mut fetches = JoinSet::new();
    for meeting in &meetings {
        let upstream = state.upstream.clone();
        let meeting_key = meeting.meeting_key;
        fetches.spawn(meeting_sessions(upstream, meeting_key));
    }

    let by_key = meetings
        .iter()
        .map(|m| (m.meeting_key, m))
        .collect::<HashMap<_, _>>();
    let mut descriptors = Vec::new();
    while let Some(joined) = fetches.join_next().await {
        let sessions = joined.map_err(|err| {
            tracing::warn!(error = %err, "sessions.fetch_task_failed");
            UpstreamError::InvalidResponse
        })??;
        descriptors.extend(sessions.into_iter().filter_map(|session| {
            let meeting = by_key.get(&session.meeting_key)?;
            Some(SessionDescriptor::join(session, meeting))
        }));
    }

    descriptors.sort_by_key(|d| (Reverse(parse_timestamp(&d.date_start)), Reverse(d.session_key)));
    serde_json::to_value(descriptors).map_err(|_| UpstreamError::InvalidResponse)
}

async fn meeting_sessions(
    upstream: UpstreamClient,
    meeting_key: u64,
) -> Result<Vec<UpstreamSession>, UpstreamError> {
    upstream
        .fetch_as::<UpstreamSession>("sessions", &[("meeting_key", meeting_key.to_string())])
        .await
}

/// Session roster joined with the reference table and the latest running order.
async fn enriched_drivers(state: AppState, query: ResourceQuery) -> Result<Value, UpstreamError> {
    let positions_query = ResourceQuery::new(ResourceKind::Positions, query.session_key.clone());
    let (drivers, positions) = tokio::join!(
        state.upstream.fetch_query(&query, &[]),
        latest_state(&state.upstream, &positions_query),
    );

    Ok(Value::Array(enrich_roster(
        drivers?,
        &positions?,
        &state.reference,
    )))
}
