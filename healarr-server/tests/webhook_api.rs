//! `POST /api/webhook/:instance_id` (spec §4.4, §6, §8 scenario 4): path
//! mapping, disabled-instance 503, and the two "ignored, not an error"
//! no-path-mapped/no-path shapes.

use axum::http::StatusCode;
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;

use healarr_core::capabilities::CredentialStore;
use healarr_core::database::{ArrInstanceRepository, NewArrInstance, NewScanPath, ScanPathRepository};
use healarr_server::build_router;

#[path = "support/mod.rs"]
mod support;
use support::{
    authed_json_request, parse_json_response, setup_test_state_with_zero_byte_detection, unauthed_request,
};

async fn seed_enabled_instance(state: &healarr_server::AppState) -> i64 {
    let encrypted = state.credential_store.encrypt("sonarr-api-key").unwrap();
    let instance = state
        .scan_repo
        .create(NewArrInstance {
            name: "main-sonarr".to_string(),
            kind: "sonarr".to_string(),
            base_url: "http://sonarr.local:8989".to_string(),
            api_key_encrypted: encrypted,
            enabled: true,
        })
        .await
        .unwrap();
    instance.id
}

/// Scenario 4: instance 1 enabled, mapper maps `/tv/show/s.mkv` →
/// `/local/tv/show/s.mkv`.
#[sqlx::test(migrator = "healarr_core::MIGRATOR")]
async fn webhook_happy_path_maps_and_queues_scan(pool: PgPool) {
    let state = setup_test_state_with_zero_byte_detection(pool).await;
    let instance_id = seed_enabled_instance(&state).await;

    state
        .scan_repo
        .create(NewScanPath {
            local_path: "/local/tv/show".to_string(),
            external_path: "/tv/show".to_string(),
            instance_id: Some(instance_id),
            enabled: true,
            auto_remediate: false,
            detection_method: "zero_byte".to_string(),
            detection_mode: "quick".to_string(),
            detector_args: None,
            max_retries: 3,
            verification_timeout_hours: None,
        })
        .await
        .unwrap();
    state.path_mapper.reload().await.unwrap();

    let app = build_router(state);
    let body = json!({
        "eventType": "Download",
        "episodeFile": { "path": "/tv/show/s.mkv" },
    });
    let uri = format!("/api/webhook/{instance_id}");
    let response = app
        .oneshot(authed_json_request("POST", &uri, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed: Value = parse_json_response(response).await;
    assert_eq!(parsed["message"], "Scan queued");
    assert_eq!(parsed["local_path"], "/local/tv/show/s.mkv");
}

#[sqlx::test(migrator = "healarr_core::MIGRATOR")]
async fn webhook_without_file_path_is_ignored_not_an_error(pool: PgPool) {
    let state = setup_test_state_with_zero_byte_detection(pool).await;
    let instance_id = seed_enabled_instance(&state).await;

    let app = build_router(state);
    let body = json!({ "eventType": "Grab" });
    let uri = format!("/api/webhook/{instance_id}");
    let response = app
        .oneshot(authed_json_request("POST", &uri, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed: Value = parse_json_response(response).await;
    assert_eq!(parsed["message"], "Ignored: No file path");
}

#[sqlx::test(migrator = "healarr_core::MIGRATOR")]
async fn webhook_with_unmapped_path_is_ignored_not_an_error(pool: PgPool) {
    let state = setup_test_state_with_zero_byte_detection(pool).await;
    let instance_id = seed_enabled_instance(&state).await;

    let app = build_router(state);
    let body = json!({ "episodeFile": { "path": "/unmapped/show/s.mkv" } });
    let uri = format!("/api/webhook/{instance_id}");
    let response = app
        .oneshot(authed_json_request("POST", &uri, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed: Value = parse_json_response(response).await;
    assert_eq!(parsed["message"], "Ignored: Path not mapped");
}

#[sqlx::test(migrator = "healarr_core::MIGRATOR")]
async fn webhook_for_disabled_instance_is_unavailable(pool: PgPool) {
    let state = setup_test_state_with_zero_byte_detection(pool).await;
    let encrypted = state.credential_store.encrypt("key").unwrap();
    let instance = state
        .scan_repo
        .create(NewArrInstance {
            name: "disabled-radarr".to_string(),
            kind: "radarr".to_string(),
            base_url: "http://radarr.local:7878".to_string(),
            api_key_encrypted: encrypted,
            enabled: false,
        })
        .await
        .unwrap();

    let app = build_router(state);
    let body = json!({ "movieFile": { "path": "/movies/m.mkv" } });
    let uri = format!("/api/webhook/{}", instance.id);
    let response = app
        .oneshot(authed_json_request("POST", &uri, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[sqlx::test(migrator = "healarr_core::MIGRATOR")]
async fn webhook_requires_authentication(pool: PgPool) {
    let state = setup_test_state_with_zero_byte_detection(pool).await;
    let instance_id = seed_enabled_instance(&state).await;
    let app = build_router(state);

    let response = app
        .oneshot(unauthed_request("POST", &format!("/api/webhook/{instance_id}")))
        .await
        .unwrap();
    // Auth middleware runs before the handler ever tries to parse a body
    // (spec §4.9), so a missing key is rejected regardless of payload.
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
