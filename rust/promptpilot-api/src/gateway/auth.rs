//! License-key authentication middleware.
//!
//! Every protected route requires a key via `Authorization: Bearer <key>`
//! or `X-License-Key`. Keys are hashed on arrival and matched against the
//! account store; only the digest is ever compared or stored.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use super::error::ApiError;
use crate::AppState;
use crate::domain::hash_license_key;

/// Pulls the license key out of `Authorization: Bearer <key>`, falling
/// back to the `X-License-Key` header.
fn extract_license_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(bearer) = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        let bearer = bearer.trim();
        if !bearer.is_empty() {
            return Some(bearer);
        }
    }
    headers
        .get("x-license-key")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

/// Validates the caller's license key and makes the matched
/// `LicenseAccount` available to handlers via request extensions.
pub async fn license_auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    // Skip auth for health and discovery endpoints
    let path = req.uri().path();
    if path == "/health" || path == "/ready" || path == "/api/v1/info" {
        return Ok(next.run(req).await);
    }

    let Some(key) = extract_license_key(req.headers()) else {
        return Err(ApiError::unauthorized(
            "A license key is required (Authorization: Bearer <key> or X-License-Key)",
        ));
    };

    let key_hash = hash_license_key(key);
    let account = state
        .db
        .find_account_by_key_hash(&key_hash)
        .await
        .map_err(|err| ApiError::internal(&state.config, "License lookup failed", &err))?;

    match account {
        Some(account) if account.active => {
            req.extensions_mut().insert(account);
            Ok(next.run(req).await)
        }
        _ => Err(ApiError::unauthorized("License key is invalid or inactive")),
    }
}
