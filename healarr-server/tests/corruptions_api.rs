//! End-to-end scenarios from spec §8: empty store, status filter bucketing,
//! history ordering, and bulk-delete partial success — driven against the
//! real `Router` with `tower::ServiceExt::oneshot`, grounded on
//! `ferrex-server`'s `auth_integration_test.rs` shape.

use axum::http::StatusCode;
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;

use healarr_core::events::{AggregateType, EventType, NewEvent};
use healarr_core::events::store::EventStore;
use healarr_server::build_router;

#[path = "support/mod.rs"]
mod support;
use support::{authed_json_request, authed_request, parse_json_response, setup_test_state};

async fn seed(state: &healarr_server::AppState, aggregate_id: &str, event_type: EventType, payload: Value) {
    let event = NewEvent::new(
        AggregateType::Corruption,
        aggregate_id.to_string(),
        event_type,
        payload,
    );
    state.event_store.append(event).await.expect("seed event append");
}

/// Scenario 1: empty store.
#[sqlx::test(migrator = "healarr_core::MIGRATOR")]
async fn empty_store_returns_empty_page(pool: PgPool) {
    let state = setup_test_state(pool).await;
    let app = build_router(state);

    let response = app
        .oneshot(authed_request("GET", "/api/corruptions"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = parse_json_response(response).await;
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["pagination"]["page"], 1);
    assert_eq!(body["pagination"]["limit"], 50);
    assert_eq!(body["pagination"]["total"], 0);
    assert_eq!(body["pagination"]["total_pages"], 0);
}

/// Scenario 2: status filter bucketing across four distinct terminal states.
#[sqlx::test(migrator = "healarr_core::MIGRATOR")]
async fn status_filter_buckets_aggregates(pool: PgPool) {
    let state = setup_test_state(pool).await;

    let detected_payload = |path: &str| json!({ "file_path": path, "corruption_type": "moov_atom" });

    seed(&state, "a1", EventType::CorruptionDetected, detected_payload("/media/a1.mkv")).await;

    seed(&state, "a2", EventType::CorruptionDetected, detected_payload("/media/a2.mkv")).await;
    seed(&state, "a2", EventType::VerificationSuccess, json!({})).await;

    seed(&state, "a3", EventType::CorruptionDetected, detected_payload("/media/a3.mkv")).await;
    seed(&state, "a3", EventType::MaxRetriesReached, json!({})).await;

    seed(&state, "a4", EventType::CorruptionDetected, detected_payload("/media/a4.mkv")).await;
    seed(&state, "a4", EventType::CorruptionIgnored, json!({ "reason": "known false positive" })).await;

    let app = build_router(state);

    let total_for = |status: &'static str, app: axum::Router| async move {
        let uri = format!("/api/corruptions?status={status}");
        let response = app.oneshot(authed_request("GET", &uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = parse_json_response(response).await;
        body["pagination"]["total"].as_u64().unwrap()
    };

    assert_eq!(total_for("all", app.clone()).await, 4);
    assert_eq!(total_for("pending", app.clone()).await, 1);
    assert_eq!(total_for("resolved", app.clone()).await, 1);
    assert_eq!(total_for("orphaned", app.clone()).await, 1);
    assert_eq!(total_for("ignored", app.clone()).await, 1);
}

/// Scenario 3: history order is ascending by append order.
#[sqlx::test(migrator = "healarr_core::MIGRATOR")]
async fn history_is_returned_in_ascending_order(pool: PgPool) {
    let state = setup_test_state(pool).await;

    seed(&state, "c1", EventType::CorruptionDetected, json!({ "file_path": "/media/c1.mkv" })).await;
    seed(&state, "c1", EventType::SearchStarted, json!({})).await;
    seed(&state, "c1", EventType::VerificationSuccess, json!({})).await;

    let app = build_router(state);
    let response = app
        .oneshot(authed_request("GET", "/api/corruptions/c1/history"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events: Vec<Value> = parse_json_response(response).await;
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["event_type"], "CorruptionDetected");
    assert_eq!(events[1]["event_type"], "SearchStarted");
    assert_eq!(events[2]["event_type"], "VerificationSuccess");
}

/// Scenario 6: bulk delete is idempotent on ids that don't exist, and
/// actually purges every event row for the id that does.
#[sqlx::test(migrator = "healarr_core::MIGRATOR")]
async fn bulk_delete_counts_only_existing_ids(pool: PgPool) {
    let state = setup_test_state(pool).await;
    seed(&state, "exists", EventType::CorruptionDetected, json!({ "file_path": "/media/exists.mkv" })).await;
    let pool_ref = state.event_store.pool().clone();

    let app = build_router(state);
    let body = json!({ "ids": ["exists", "nonexistent"] });
    let response = app
        .oneshot(authed_json_request("DELETE", "/api/corruptions", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed: Value = parse_json_response(response).await;
    assert_eq!(parsed["deleted"], 1);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE aggregate_id = 'exists'")
        .fetch_one(&pool_ref)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

/// Empty `ids` is a 400, not a silent no-op (spec §6).
#[sqlx::test(migrator = "healarr_core::MIGRATOR")]
async fn bulk_retry_rejects_empty_ids(pool: PgPool) {
    let state = setup_test_state(pool).await;
    let app = build_router(state);

    let body = json!({ "ids": [] });
    let response = app
        .oneshot(authed_json_request("POST", "/api/corruptions/retry", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
