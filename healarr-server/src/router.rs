//! Route table assembly (spec §4.9, §6). Mirrors
//! `ferrex_server::create_app`'s shape: an unauthenticated public slice,
//! an authenticated+rate-limited `/api` slice, merged and wrapped in the
//! same outer-to-inner layer order (CORS, then tracing, then auth/rate
//! limiting per-route-group).

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::handlers::{corruptions, health, scans, webhook, websocket};
use crate::middleware::{auth::auth_middleware, rate_limit::api_rate_limit, rate_limit::webhook_rate_limit};

/// `/api/corruptions*`, `/api/scans*`, `/api/ws` — authenticated (spec §4.9
/// auth sources) and subject to the general API rate-limit bucket (spec §6,
/// 120/min burst 60 default).
fn authenticated_api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/corruptions", get(corruptions::list).delete(corruptions::delete))
        .route("/corruptions/:id/history", get(corruptions::history))
        .route("/corruptions/retry", post(corruptions::retry))
        .route("/corruptions/ignore", post(corruptions::ignore))
        .route("/scans", get(scans::list).post(scans::start))
        .route("/scans/active", get(scans::active))
        .route("/scans/pause-all", post(scans::pause_all))
        .route("/scans/resume-all", post(scans::resume_all))
        .route("/scans/cancel-all", post(scans::cancel_all))
        .route("/scans/:id", get(scans::get))
        .route("/scans/:id/files", get(scans::files))
        .route("/scans/:id/pause", post(scans::pause))
        .route("/scans/:id/resume", post(scans::resume))
        .route("/scans/:id/cancel", post(scans::cancel))
        .route("/ws", get(websocket::upgrade))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state,
            api_rate_limit,
        ))
}

/// `/api/webhook/:instance_id` — authenticated like every other `/api`
/// route, but on the looser webhook bucket (spec §6) since arr instances
/// fire these in bursts during an import run.
fn webhook_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/webhook/:instance_id", post(webhook::receive))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state,
            webhook_rate_limit,
        ))
}

/// Builds the full Axum `Router` for one `AppState`. `/api/health` is
/// intentionally outside the authenticated slice (spec §4.9: "always 200",
/// used by uptime probes that don't carry an API key).
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health::get))
        .merge(authenticated_api_router(state.clone()))
        .merge(webhook_router(state.clone()));

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
