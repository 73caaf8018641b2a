//! Shared integration-test support, included by each file under
//! `tests/` via `#[path = "support/mod.rs"] mod support;` — the same
//! convention `ferrex-server/tests/startup.rs` uses for its own
//! `support::build_test_app_with_hooks`. A `setup_test_state` builder plus
//! small request/response helpers let each test drive the real `Router`
//! with `tower::ServiceExt::oneshot` instead of calling handlers directly.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use sqlx::PgPool;

use healarr_config::Config;
use healarr_core::detector::DetectionMethod;
use healarr_core::events::store::EventStore;
use healarr_core::scanner::engine::{ScanEngine, ScanEngineConfig, ScanRepository};
use healarr_server::AppState;

/// The API key every test request authenticates with; `setup_test_state`
/// bakes this into `Config::api_key` so `test_request_json`'s `x-api-key`
/// header always matches.
pub const TEST_API_KEY: &str = "test-api-key-do-not-use-in-prod";

/// Builds a real `AppState` over a `pool` provided by `#[sqlx::test(migrator
/// = "healarr_core::MIGRATOR")]` — the schema is already migrated by the
/// macro before this runs, matching how `main.rs` runs `run_migrations`
/// once at startup then hands the pool to `AppState::new`.
pub async fn setup_test_state(pool: PgPool) -> AppState {
    let mut config = Config::default();
    config.api_key = TEST_API_KEY.to_string();
    config.credential_key = [7u8; 32];
    config.rate_limits.api.rps = 1_000;
    config.rate_limits.api.burst = 1_000;
    config.rate_limits.webhook.rps = 1_000;
    config.rate_limits.webhook.burst = 1_000;

    AppState::new(config, pool)
        .await
        .expect("failed to build test AppState")
}

/// Builds state with a deliberately tiny API rate-limit bucket so tests can
/// drive it into `429` without hundreds of requests.
pub async fn setup_test_state_with_tight_rate_limit(pool: PgPool, rps: u32, burst: u32) -> AppState {
    let mut config = Config::default();
    config.api_key = TEST_API_KEY.to_string();
    config.credential_key = [7u8; 32];
    config.rate_limits.api.rps = rps;
    config.rate_limits.api.burst = burst;

    AppState::new(config, pool)
        .await
        .expect("failed to build test AppState")
}

/// Same as [`setup_test_state`], but the scan engine runs `zero_byte`
/// detection instead of the default `ffprobe`, so scanner-driven tests
/// don't depend on an external binary being on the test runner's PATH.
pub async fn setup_test_state_with_zero_byte_detection(pool: PgPool) -> AppState {
    let state = setup_test_state(pool).await;
    let config = ScanEngineConfig {
        detection_method: DetectionMethod::ZeroByte,
        ..ScanEngineConfig::default()
    };
    let engine = Arc::new(ScanEngine::new(
        state.scan_repo.clone() as Arc<dyn ScanRepository>,
        state.event_store.clone() as Arc<dyn EventStore>,
        state.bus.clone(),
        config,
    ));
    state.with_scan_engine(engine)
}

/// Builds a request with a JSON body and the `x-api-key` header set to
/// `TEST_API_KEY` (spec §4.9 auth source 1).
pub fn authed_json_request<T: serde::Serialize>(
    method: &str,
    uri: &str,
    body: &T,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", TEST_API_KEY)
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

/// Builds a bodyless authenticated request (GET/POST-without-payload).
pub fn authed_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", TEST_API_KEY)
        .body(Body::empty())
        .unwrap()
}

/// Same as [`authed_request`] but with no `x-api-key` header, for
/// exercising the 401 path.
pub fn unauthed_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn parse_json_response<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&body_bytes).expect("failed to parse JSON response")
}
