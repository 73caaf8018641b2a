//! Per-IP token-bucket rate limiting (spec §6 "Rate limits (defaults)"),
//! wrapping the in-process `governor`-backed `KeyedRateLimiter` built in
//! `healarr-core::rate_limit`. The teacher's own rate-limit middleware
//! (`ferrex_server::infra::middleware::rate_limit`) is Redis-backed for a
//! multi-instance deployment; Healarr has no such deployment model (spec §1
//! Non-goals: no cross-process consensus), so this layer is the simpler
//! in-process equivalent, keyed by client IP exactly as the teacher's is
//! keyed by client IP plus route.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use healarr_core::rate_limit::KeyedRateLimiter;

use crate::app_state::AppState;
use crate::errors::AppError;

async fn enforce(limiter: &KeyedRateLimiter, key: &str) -> Result<(), AppError> {
    limiter
        .check(key)
        .await
        .map_err(AppError::rate_limited)
}

fn client_key(addr: Option<ConnectInfo<SocketAddr>>) -> String {
    addr.map(|ConnectInfo(a)| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn rate_limited(
    limiter: &Arc<KeyedRateLimiter>,
    addr: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    enforce(limiter, &client_key(addr)).await?;
    Ok(next.run(request).await)
}

/// Applied to the whole `/api` surface except `/api/webhook/*` (spec §6: API
/// bucket, 120/min burst 60 by default).
pub async fn api_rate_limit(
    State(state): State<AppState>,
    addr: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    rate_limited(&state.api_rate_limiter, addr, request, next).await
}

/// Applied to `/api/webhook/*` only (spec §6: webhook bucket, 60/min burst
/// 30 by default — looser than the general API bucket since arr instances
/// fire webhooks in bursts during an import run).
pub async fn webhook_rate_limit(
    State(state): State<AppState>,
    addr: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    rate_limited(&state.webhook_rate_limiter, addr, request, next).await
}
