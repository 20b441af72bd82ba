//! API info endpoint.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;

use crate::AppState;

/// Info routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/info", get(get_api_info))
}

/// API info response.
#[derive(Debug, Serialize)]
pub struct ApiInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub model: String,
    pub endpoints: Vec<EndpointInfo>,
}

/// Endpoint information.
#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub path: String,
    pub method: String,
    pub description: String,
}

/// Get API information.
pub async fn get_api_info(State(state): State<AppState>) -> impl IntoResponse {
    let info = ApiInfo {
        name: "PromptPilot API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: "Scheduled prompt automation backend for the PromptPilot extension"
            .to_string(),
        model: state.engine.model().to_string(),
        endpoints: vec![
            EndpointInfo {
                path: "/api/v1/license/me".to_string(),
                method: "GET".to_string(),
                description: "Validate the license key".to_string(),
            },
            EndpointInfo {
                path: "/api/v1/schedules".to_string(),
                method: "POST".to_string(),
                description: "Create a scheduled prompt".to_string(),
            },
            EndpointInfo {
                path: "/api/v1/schedules/{id}/logs".to_string(),
                method: "GET".to_string(),
                description: "List execution logs for a schedule".to_string(),
            },
            EndpointInfo {
                path: "/api/v1/integrations".to_string(),
                method: "PUT".to_string(),
                description: "Configure a delivery channel".to_string(),
            },
            EndpointInfo {
                path: "/api/v1/scheduler/run".to_string(),
                method: "POST".to_string(),
                description: "Run one execution cycle now".to_string(),
            },
        ],
    };

    (StatusCode::OK, Json(info))
}
