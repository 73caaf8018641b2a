//! Authentication middleware (spec §4.9): checks the four auth sources in
//! priority order, comparing the presented key against the configured API
//! key in constant time. Grounded in
//! `ferrex_server::auth::middleware::auth_middleware`'s
//! extract-then-`next.run()` shape.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use std::collections::HashMap;

use healarr_core::capabilities::constant_time_key_eq;
use healarr_core::HealarrError;

use crate::app_state::AppState;
use crate::errors::AppError;

/// Extracts the presented key from, in order: `X-API-Key` header,
/// `Authorization: Bearer <key>` header, `token` query param, `apikey` query
/// param (spec §4.9).
fn extract_presented_key(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get("x-api-key") {
        if let Ok(s) = value.to_str() {
            return Some(s.to_string());
        }
    }

    if let Some(value) = request.headers().get(AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            let key = s.strip_prefix("Bearer ").unwrap_or(s);
            return Some(key.to_string());
        }
    }

    let query = request.uri().query().unwrap_or("");
    let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    if let Some(token) = params.get("token") {
        return Some(token.clone());
    }
    if let Some(apikey) = params.get("apikey") {
        return Some(apikey.clone());
    }

    None
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = extract_presented_key(&request).ok_or(HealarrError::Unauthorized)?;

    if !constant_time_key_eq(&state.config.api_key, &presented) {
        return Err(HealarrError::Unauthorized.into());
    }

    Ok(next.run(request).await)
}
