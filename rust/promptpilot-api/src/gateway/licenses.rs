//! License account endpoints.

use axum::{Extension, Json, Router, response::IntoResponse, routing::get};
use serde::Serialize;

use crate::AppState;
use crate::domain::LicenseAccount;

/// License routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/license/me", get(get_license))
}

/// License account response. The key hash never leaves the server.
#[derive(Debug, Serialize)]
pub struct LicenseResponse {
    /// Account ID.
    pub id: i64,
    /// Operator-facing label.
    pub label: Option<String>,
    /// Active flag.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: String,
}

impl From<LicenseAccount> for LicenseResponse {
    fn from(account: LicenseAccount) -> Self {
        Self {
            id: account.id,
            label: account.label,
            active: account.active,
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Validate the presented license key and describe its account.
///
/// Reaching this handler at all means the auth middleware accepted the
/// key, so it only echoes the account.
///
/// # Endpoint
///
/// `GET /api/v1/license/me`
pub async fn get_license(Extension(account): Extension<LicenseAccount>) -> impl IntoResponse {
    Json(LicenseResponse::from(account))
}
