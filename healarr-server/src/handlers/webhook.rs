//! `POST /api/webhook/:instance_id` (spec §4.4, §6): the arr's "on import"
//! webhook. Extracts the imported file's path, maps it to the local
//! filesystem, and queues a single-file scan. Never errors on a shape the
//! webhook body doesn't have — anything it can't act on is reported as a
//! 200 "ignored" so the caller's retry logic doesn't treat it as a failure.

use std::path::Path as StdPath;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use healarr_core::database::ArrInstanceRepository;
use healarr_core::types::InstanceId;
use healarr_core::HealarrError;

use crate::app_state::AppState;
use crate::errors::AppResult;

fn extract_file_path(body: &Value) -> Option<&str> {
    body.get("episodeFile")
        .and_then(|f| f.get("path"))
        .and_then(Value::as_str)
        .or_else(|| {
            body.get("movieFile")
                .and_then(|f| f.get("path"))
                .and_then(Value::as_str)
        })
        .or_else(|| {
            body.get("trackFile")
                .and_then(|f| f.get("path"))
                .and_then(Value::as_str)
        })
}

pub async fn receive(
    State(state): State<AppState>,
    Path(instance_id): Path<InstanceId>,
    Json(body): Json<Value>,
) -> AppResult<Json<Value>> {
    let instance = state
        .scan_repo
        .get(instance_id)
        .await?
        .ok_or_else(|| HealarrError::NotFound(format!("arr instance {instance_id}")))?;

    if !instance.enabled {
        return Err(HealarrError::Unavailable(format!(
            "arr instance {instance_id} is disabled"
        ))
        .into());
    }

    let Some(arr_path) = extract_file_path(&body) else {
        return Ok(Json(json!({ "message": "Ignored: No file path" })));
    };

    let Some(local_path) = state.path_mapper.to_local(arr_path) else {
        return Ok(Json(json!({ "message": "Ignored: Path not mapped" })));
    };

    let outcome = state.scan_engine.scan_file(StdPath::new(&local_path)).await?;

    Ok(Json(json!({
        "message": "Scan queued",
        "local_path": local_path,
        "outcome": outcome,
    })))
}
