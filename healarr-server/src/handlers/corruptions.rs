//! `GET/POST/DELETE /api/corruptions*` (spec §6). Every mutating endpoint
//! re-folds the aggregate from its event history before validating the
//! requested transition (spec §3 ownership rule) rather than trusting a
//! cached projection row.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use healarr_core::aggregate::CorruptionAggregate;
use healarr_core::events::store::{EventStore, ProjectionReader};
use healarr_core::events::{AggregateType, Event, EventType, NewEvent};
use healarr_core::query::{
    safe_order_by, SortOrder, CORRUPTIONS_DEFAULT_SORT, CORRUPTIONS_SORT_ALLOWLIST,
};
use healarr_core::types::Pagination;
use healarr_core::HealarrError;

use crate::app_state::AppState;
use crate::errors::AppResult;

const MAX_PAGE_LIMIT: u32 = 500;
const DEFAULT_PAGE_LIMIT: u32 = 50;

fn status_to_event_types(status: &str) -> Option<Vec<EventType>> {
    match status {
        "pending" => Some(vec![EventType::CorruptionDetected]),
        "resolved" => Some(vec![EventType::VerificationSuccess]),
        "orphaned" => Some(vec![EventType::MaxRetriesReached]),
        "ignored" => Some(vec![EventType::CorruptionIgnored]),
        "manual_intervention" => Some(vec![EventType::ImportBlocked, EventType::ManuallyRemoved]),
        "failed" => Some(vec![
            EventType::SearchFailed,
            EventType::DownloadFailed,
            EventType::DeletionFailed,
            EventType::VerificationFailed,
        ]),
        "in_progress" => Some(vec![
            EventType::SearchQueued,
            EventType::SearchStarted,
            EventType::SearchCompleted,
            EventType::RemediationQueued,
            EventType::DownloadStarted,
            EventType::DownloadProgress,
            EventType::DeletionCompleted,
            EventType::FileDetected,
        ]),
        "active" => Some(vec![
            EventType::CorruptionDetected,
            EventType::ImportBlocked,
            EventType::ManuallyRemoved,
            EventType::SearchQueued,
            EventType::SearchStarted,
            EventType::SearchCompleted,
            EventType::RemediationQueued,
            EventType::DownloadStarted,
            EventType::DownloadProgress,
            EventType::DeletionCompleted,
            EventType::FileDetected,
            EventType::SearchFailed,
            EventType::DownloadFailed,
            EventType::DeletionFailed,
            EventType::VerificationFailed,
        ]),
        // "all" and any unrecognized value fall back to no filter (spec §6).
        _ => None,
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<serde_json::Value>> {
    let status = params.get("status").map(String::as_str).unwrap_or("all");
    let state_filter = status_to_event_types(status);

    let path_id = params
        .get("path_id")
        .and_then(|v| v.parse::<i64>().ok());
    let page = params.get("page").and_then(|v| v.parse::<u32>().ok());
    let limit = params.get("limit").and_then(|v| v.parse::<u32>().ok());
    let pagination = Pagination::normalize(page, limit, MAX_PAGE_LIMIT, DEFAULT_PAGE_LIMIT);

    let sort_column = safe_order_by(
        params.get("sort_by").map(String::as_str),
        CORRUPTIONS_SORT_ALLOWLIST,
        CORRUPTIONS_DEFAULT_SORT,
    );
    let sort_order = SortOrder::parse(params.get("sort_order").map(String::as_str), SortOrder::Desc);

    let page_result = state
        .event_store
        .list(
            state_filter.as_deref(),
            path_id,
            sort_column,
            sort_order.as_sql(),
            pagination,
        )
        .await?;

    Ok(Json(json!({
        "data": page_result.data,
        "pagination": page_result.pagination,
    })))
}

pub async fn history(
    State(state): State<AppState>,
    Path(aggregate_id): Path<String>,
) -> AppResult<Json<Vec<Event>>> {
    let events = state.event_store.history(&aggregate_id).await?;
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub ids: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

async fn replay_known(state: &AppState, aggregate_id: &str) -> AppResult<Option<CorruptionAggregate>> {
    let history = state.event_store.history(&aggregate_id.to_string()).await?;
    if history.is_empty() {
        return Ok(None);
    }
    Ok(Some(CorruptionAggregate::replay(&history)?))
}

async fn append_and_publish(
    state: &AppState,
    aggregate_id: &str,
    event_type: EventType,
    payload: serde_json::Value,
) -> AppResult<()> {
    let new_event = NewEvent::new(
        AggregateType::Corruption,
        aggregate_id.to_string(),
        event_type,
        payload.clone(),
    );
    let id = state.event_store.append(new_event).await?;
    let event = Event {
        id,
        aggregate_type: AggregateType::Corruption.as_str().to_string(),
        aggregate_id: aggregate_id.to_string(),
        event_type: event_type.as_str().to_string(),
        payload,
        version: 1,
        created_at: Utc::now(),
        actor_id: None,
    };
    // The WebSocket hub is fed by the background bus->hub relay (see
    // `background::relay_events_to_ws_hub`), not directly from here.
    if let Err(e) = state.bus.publish(event).await {
        tracing::warn!(error = %e, "failed to publish corruption event");
    }
    Ok(())
}

/// `POST /api/corruptions/retry` (spec §6): re-enters `SearchQueued` unless
/// the retry limit is already reached, in which case `MaxRetriesReached` is
/// raised instead. Ids with no history, or already terminal without a
/// legal retry transition, are silently skipped (bulk ops are best-effort).
pub async fn retry(
    State(state): State<AppState>,
    Json(body): Json<BulkRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if body.ids.is_empty() {
        return Err(HealarrError::InvalidRequest("ids must not be empty".to_string()).into());
    }

    let max_retries = state.config.remediation.default_max_retries.max(0) as u32;
    let mut retried = 0usize;

    for id in &body.ids {
        let Some(aggregate) = replay_known(&state, id).await? else {
            continue;
        };

        let next = if aggregate
            .validate_transition(EventType::SearchQueued, max_retries, false)
            .is_ok()
        {
            EventType::SearchQueued
        } else if aggregate
            .validate_transition(EventType::MaxRetriesReached, max_retries, false)
            .is_ok()
        {
            EventType::MaxRetriesReached
        } else {
            continue;
        };

        let payload = json!({ "reason": body.reason });
        append_and_publish(&state, id, next, payload).await?;
        retried += 1;
    }

    Ok(Json(json!({ "retried": retried })))
}

/// `POST /api/corruptions/ignore` (spec §6): `CorruptionIgnored` is an
/// explicit user override, legal from any state (I2).
pub async fn ignore(
    State(state): State<AppState>,
    Json(body): Json<BulkRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if body.ids.is_empty() {
        return Err(HealarrError::InvalidRequest("ids must not be empty".to_string()).into());
    }

    let mut ignored = 0usize;
    for id in &body.ids {
        if replay_known(&state, id).await?.is_none() {
            continue;
        }
        let payload = json!({ "reason": body.reason });
        append_and_publish(&state, id, EventType::CorruptionIgnored, payload).await?;
        ignored += 1;
    }

    Ok(Json(json!({ "ignored": ignored })))
}

/// `DELETE /api/corruptions` (spec §6, scenario 6): hard-deletes every event
/// for each id present in the store; ids absent from the store count as 0,
/// not an error (bulk delete is idempotent on already-missing ids).
pub async fn delete(
    State(state): State<AppState>,
    Json(body): Json<BulkRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if body.ids.is_empty() {
        return Err(HealarrError::InvalidRequest("ids must not be empty".to_string()).into());
    }

    let mut deleted = 0usize;
    for id in &body.ids {
        let rows = state.event_store.delete_aggregate(id).await?;
        if rows > 0 {
            deleted += 1;
        }
    }

    Ok(Json(json!({ "deleted": deleted })))
}
