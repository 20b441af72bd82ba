//! Gateway functionality - Authentication, Rate Limiting, Schedules, Integrations.
//!
//! This module provides the HTTP gateway layer for PromptPilot, handling:
//! - License key authentication
//! - Per-client rate limiting
//! - Schedule CRUD and execution log access
//! - Channel integration settings
//! - Manual scheduler control

pub mod auth;
pub mod error;
pub mod integrations;
pub mod licenses;
pub mod rate_limit;
pub mod schedules;

use axum::Router;

use crate::AppState;

/// Create the gateway router with all authenticated routes.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(licenses::router())
        .merge(schedules::router())
        .merge(integrations::router())
}
