//! PromptPilot API - Scheduled Prompt Automation Backend
//!
//! This crate provides the backend for the PromptPilot browser extension:
//! users schedule free-text prompts for future execution, a background
//! poller runs them through an OpenAI-compatible engine when they come
//! due, and the results are delivered to chat platforms:
//!
//! - **Gateway**: License key authentication and per-client rate limiting
//! - **Schedules**: Per-account scheduled prompts with a live-schedule quota
//! - **Execution**: Timer-driven polling with at-least-once execution
//! - **Delivery**: Telegram and Discord result delivery with per-channel
//!   settings
//! - **Logs**: Execution history with a rolling retention window
//!
//! # Architecture
//!
//! The service is organized into several key modules:
//!
//! - [`config`]: Configuration management and environment loading
//! - [`gateway`]: Authentication, rate limiting, and schedule endpoints
//! - [`database`]: SQLite persistence for accounts, schedules, and logs
//! - [`domain`]: Core domain models (schedules, executions, integrations)
//! - [`engine`]: Prompt-generation engine driver
//! - [`scheduler`]: Due-schedule polling and the execution pipeline
//! - [`notify`]: Chat-platform delivery
//! - [`api`]: Unauthenticated HTTP endpoints (health, info)
//!
//! # Example
//!
//! ```rust,ignore
//! use promptpilot_api::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let (app, _state) = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8710").await?;
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod engine;
pub mod gateway;
pub mod logging;
pub mod notify;
pub mod scheduler;
pub mod server;

use std::sync::Arc;

use config::AppConfig;
use database::Database;
use engine::PromptEngine;
use gateway::rate_limit::GatewayRateLimiter;
use scheduler::{PromptExecutor, PromptPoller};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// SQLite store for accounts, schedules, logs, and integrations.
    pub db: Database,
    /// Prompt-generation engine driver.
    pub engine: Arc<dyn PromptEngine>,
    /// Execution pipeline, shared by the poller and the run-now endpoint.
    pub executor: Arc<PromptExecutor>,
    /// Background due-schedule poller.
    pub poller: Arc<PromptPoller>,
    /// Per-client rate limiter.
    pub rate_limiter: Arc<GatewayRateLimiter>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("db", &self.db)
            .field("engine", &self.engine.model())
            .field("executor", &self.executor)
            .field("poller", &self.poller)
            .field("rate_limiter", &self.rate_limiter)
            .finish()
    }
}
