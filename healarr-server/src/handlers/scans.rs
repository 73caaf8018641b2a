//! `GET/POST /api/scans*` (spec §6). Scan lifecycle mutations delegate
//! directly to `ScanEngine`; listing/reading go through `ScanRepository`.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use healarr_core::database::ScanPathRepository;
use healarr_core::query::{safe_order_by, SortOrder, SCANS_DEFAULT_SORT, SCANS_SORT_ALLOWLIST};
use healarr_core::scanner::engine::{FileOutcome, Scan, ScanFile, ScanRepository};
use healarr_core::types::Pagination;
use healarr_core::HealarrError;

use crate::app_state::AppState;
use crate::errors::AppResult;

const MAX_PAGE_LIMIT: u32 = 500;
const DEFAULT_PAGE_LIMIT: u32 = 50;

fn parse_outcome(raw: Option<&String>) -> Option<FileOutcome> {
    match raw.map(String::as_str) {
        Some("healthy") => Some(FileOutcome::Healthy),
        Some("corrupt") => Some(FileOutcome::Corrupt),
        Some("inaccessible") => Some(FileOutcome::Inaccessible),
        Some("skipped") => Some(FileOutcome::Skipped),
        _ => None,
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<serde_json::Value>> {
    let page = params.get("page").and_then(|v| v.parse::<u32>().ok());
    let limit = params.get("limit").and_then(|v| v.parse::<u32>().ok());
    let pagination = Pagination::normalize(page, limit, MAX_PAGE_LIMIT, DEFAULT_PAGE_LIMIT);

    let sort_column = safe_order_by(
        params.get("sort_by").map(String::as_str),
        SCANS_SORT_ALLOWLIST,
        SCANS_DEFAULT_SORT,
    );
    let ascending = SortOrder::parse(params.get("sort_order").map(String::as_str), SortOrder::Desc)
        == SortOrder::Asc;

    let page_result = state
        .scan_repo
        .list_scans(sort_column, ascending, pagination)
        .await?;

    Ok(Json(json!({
        "data": page_result.data,
        "pagination": page_result.pagination,
    })))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<Scan>> {
    let scan = state
        .scan_repo
        .get_scan(id)
        .await?
        .ok_or_else(|| HealarrError::NotFound(format!("scan {id}")))?;
    Ok(Json(scan))
}

pub async fn files(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<serde_json::Value>> {
    let page = params.get("page").and_then(|v| v.parse::<u32>().ok());
    let limit = params.get("limit").and_then(|v| v.parse::<u32>().ok());
    let pagination = Pagination::normalize(page, limit, MAX_PAGE_LIMIT, DEFAULT_PAGE_LIMIT);
    let outcome = parse_outcome(params.get("status"));

    let page_result: healarr_core::types::Page<ScanFile> = state
        .scan_repo
        .list_scan_files(id, outcome, pagination)
        .await?;

    Ok(Json(json!({
        "data": page_result.data,
        "pagination": page_result.pagination,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StartScanRequest {
    pub path_id: i64,
}

/// `POST /api/scans` (spec §6, §4.4): returns 202 with the freshly created
/// `Scan` row; the walk itself runs in the background.
pub async fn start(
    State(state): State<AppState>,
    Json(body): Json<StartScanRequest>,
) -> AppResult<(axum::http::StatusCode, Json<Scan>)> {
    let path = state
        .scan_repo
        .get(body.path_id)
        .await?
        .ok_or_else(|| HealarrError::NotFound(format!("scan path {}", body.path_id)))?;

    let scan = state
        .scan_engine
        .start_scan(Some(path.id), &path.local_path)
        .await?;

    Ok((axum::http::StatusCode::ACCEPTED, Json(scan)))
}

pub async fn pause(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<serde_json::Value>> {
    state.scan_engine.pause_scan(id).await?;
    Ok(Json(json!({ "status": "paused" })))
}

pub async fn resume(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<serde_json::Value>> {
    state.scan_engine.resume_scan(id).await?;
    Ok(Json(json!({ "status": "resumed" })))
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<serde_json::Value>> {
    state.scan_engine.cancel_scan(id).await?;
    Ok(Json(json!({ "status": "cancelled" })))
}

pub async fn pause_all(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let count = state.scan_engine.pause_all().await?;
    Ok(Json(json!({ "paused": count })))
}

pub async fn resume_all(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let count = state.scan_engine.resume_all().await?;
    Ok(Json(json!({ "resumed": count })))
}

pub async fn cancel_all(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let count = state.scan_engine.cancel_all().await?;
    Ok(Json(json!({ "cancelled": count })))
}

pub async fn active(State(state): State<AppState>) -> Json<serde_json::Value> {
    let active = state.scan_engine.get_active_scans().await;
    Json(json!({ "data": active }))
}
