//! Channel integration settings endpoints.
//!
//! Stored secrets (bot tokens, webhook URLs) never leave the server;
//! every response carries redacted settings.

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, put},
};
use serde::Serialize;

use crate::AppState;
use crate::domain::{Channel, ChannelSettings, IntegrationSettings, LicenseAccount};
use crate::gateway::error::ApiError;

/// Integration routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/integrations", put(upsert_integration))
        .route("/api/v1/integrations", get(list_integrations))
        .route("/api/v1/integrations/{channel}", delete(remove_integration))
}

/// Integration settings response, with secrets redacted.
#[derive(Debug, Serialize)]
pub struct IntegrationResponse {
    /// Settings row ID.
    pub id: i64,
    /// Configured channel.
    pub channel: Channel,
    /// Channel settings with secret material replaced.
    pub settings: ChannelSettings,
    /// Soft-delete flag.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

impl From<IntegrationSettings> for IntegrationResponse {
    fn from(integration: IntegrationSettings) -> Self {
        Self {
            id: integration.id,
            channel: integration.settings.channel(),
            settings: integration.settings.redacted(),
            active: integration.active,
            created_at: integration.created_at.to_rfc3339(),
            updated_at: integration.updated_at.to_rfc3339(),
        }
    }
}

/// Create or replace the caller's settings for one channel.
///
/// The request body is the tagged settings object itself, so the channel
/// is taken from the payload rather than the path.
///
/// # Endpoint
///
/// `PUT /api/v1/integrations`
pub async fn upsert_integration(
    State(state): State<AppState>,
    Extension(account): Extension<LicenseAccount>,
    Json(settings): Json<ChannelSettings>,
) -> Result<impl IntoResponse, ApiError> {
    settings
        .validate()
        .map_err(|e| ApiError::bad_request(format!("{e:#}")))?;

    let stored = state
        .db
        .upsert_integration(account.id, &settings)
        .await
        .map_err(|e| ApiError::internal(&state.config, "Failed to save integration settings", &e))?;

    tracing::info!(
        owner_id = account.id,
        channel = %settings.channel(),
        "Integration settings saved"
    );
    Ok(Json(IntegrationResponse::from(stored)))
}

/// List the caller's active integrations.
///
/// # Endpoint
///
/// `GET /api/v1/integrations`
pub async fn list_integrations(
    State(state): State<AppState>,
    Extension(account): Extension<LicenseAccount>,
) -> Result<impl IntoResponse, ApiError> {
    let integrations = state
        .db
        .list_integrations(account.id)
        .await
        .map_err(|e| ApiError::internal(&state.config, "Failed to list integrations", &e))?;

    let responses: Vec<IntegrationResponse> = integrations.into_iter().map(Into::into).collect();
    Ok(Json(responses))
}

/// Deactivate the caller's settings for one channel.
///
/// Soft delete: the row is kept but excluded from lookups, and a later
/// upsert for the same channel reactivates it in place.
///
/// # Endpoint
///
/// `DELETE /api/v1/integrations/{channel}`
pub async fn remove_integration(
    State(state): State<AppState>,
    Extension(account): Extension<LicenseAccount>,
    Path(channel): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = Channel::parse(&channel).ok_or_else(|| {
        ApiError::bad_request(format!("{channel:?} is not a known channel (telegram, discord)"))
    })?;

    let removed = state
        .db
        .deactivate_integration(account.id, channel)
        .await
        .map_err(|e| ApiError::internal(&state.config, "Failed to remove integration", &e))?;

    if removed {
        tracing::info!(owner_id = account.id, channel = %channel, "Integration deactivated");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!(
            "No active {channel} integration"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_response_redacts_secrets() {
        let created = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        let integration = IntegrationSettings {
            id: 3,
            owner_id: 1,
            settings: ChannelSettings::Telegram {
                bot_token: "123:very-secret".to_string(),
                chat_id: "-100555".to_string(),
            },
            active: true,
            created_at: created,
            updated_at: created,
        };

        let response = IntegrationResponse::from(integration);
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("very-secret"));
        assert!(json.contains("[redacted]"));
        // Routing fields survive redaction
        assert!(json.contains("-100555"));
        assert_eq!(response.channel, Channel::Telegram);
    }
}
