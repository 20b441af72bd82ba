//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api;
use crate::config::AppConfig;
use crate::database::Database;
use crate::engine::{OpenAiEngine, PromptEngine};
use crate::gateway;
use crate::gateway::rate_limit::GatewayRateLimiter;
use crate::logging::OpTimer;
use crate::notify::{HttpNotifier, Notifier};
use crate::scheduler::{PromptExecutor, PromptPoller};
use crate::{AppState, log_banner, log_init_step, log_init_warning, log_success};

/// PromptPilot API version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create the application with production drivers.
pub async fn create_app(config: AppConfig) -> anyhow::Result<(Router, AppState)> {
    if config.engine.api_key.is_none() {
        log_init_warning!("No engine API key configured. Prompt executions will fail.");
    }

    let engine = Arc::new(OpenAiEngine::new(config.engine.clone()));
    let notifier = Arc::new(HttpNotifier::new(config.notifier.clone()));
    create_app_with(config, engine, notifier).await
}

/// Create the application with injected engine and notifier drivers.
pub async fn create_app_with(
    config: AppConfig,
    engine: Arc<dyn PromptEngine>,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<(Router, AppState)> {
    // Start overall timer
    let overall_timer = OpTimer::new("server", "create_app");

    // Log startup banner
    log_banner!(
        format!("🚀 PromptPilot API v{}", VERSION),
        format!(
            "Environment: {} | Model: {}",
            config.server.environment, config.engine.model
        )
    );

    // [1/7] Prompt engine driver
    let step_timer = OpTimer::new("server", "engine");
    log_init_step!(1, 7, "Prompt Engine", format!("⚙️ {}", engine.model()));
    step_timer.finish();

    // [2/7] Channel notifier
    let step_timer = OpTimer::new("server", "notifier");
    log_init_step!(2, 7, "Notifier", "📣 Telegram + Discord delivery ready");
    step_timer.finish();

    // [3/7] Initialize database
    let step_timer = OpTimer::new("server", "database");
    let db = Database::new(&config.database.path);
    db.init().await?;
    log_init_step!(
        3,
        7,
        "Database",
        format!("🗄️  {} (WAL)", config.database.path)
    );
    step_timer.finish();

    // [4/7] Seed license accounts
    let step_timer = OpTimer::new("server", "license_seed");
    if config.gateway.seed_license_keys.is_empty() {
        log_init_step!(4, 7, "License Seeding", "🔑 No seed keys configured");
    } else {
        let created = db
            .seed_license_keys(&config.gateway.seed_license_keys)
            .await?;
        log_init_step!(4, 7, "License Seeding", format!("🔑 {} new account(s)", created));
    }
    step_timer.finish();

    // [5/7] Execution pipeline
    let step_timer = OpTimer::new("server", "executor");
    let executor = Arc::new(PromptExecutor::new(
        db.clone(),
        Arc::clone(&engine),
        notifier,
        Duration::from_secs(config.engine.timeout_secs),
        config.scheduler.log_retention_days,
    ));
    log_init_step!(5, 7, "Executor", "⚡ Execution pipeline ready");
    step_timer.finish();

    // [6/7] Background poller
    let step_timer = OpTimer::new("server", "poller");
    let poller = Arc::new(PromptPoller::new(
        Arc::clone(&executor),
        Duration::from_secs(config.scheduler.poll_interval_secs),
    ));
    poller.start();
    log_init_step!(
        6,
        7,
        "Poller",
        format!("⏱️  Every {}s", config.scheduler.poll_interval_secs)
    );
    step_timer.finish();

    // Create app state
    let rate_limiter = Arc::new(GatewayRateLimiter::new(
        config.gateway.rate_limit_per_minute,
        config.gateway.rate_limit_burst,
    ));
    let state = AppState {
        config: Arc::new(config.clone()),
        db,
        engine,
        executor,
        poller,
        rate_limiter,
    };

    // [7/7] Build main API router with middleware
    let step_timer = OpTimer::new("server", "router");
    let api_router = Router::new()
        .merge(api::create_router())
        .merge(gateway::create_router());

    // Build router with middleware
    let app = api_router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.server.request_timeout_secs),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gateway::auth::license_auth_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gateway::rate_limit::rate_limit_middleware,
        ))
        .with_state(state.clone());

    log_init_step!(7, 7, "Router", "🌐 Routes + middleware configured");
    step_timer.finish();

    // Log success banner
    overall_timer.finish();
    log_success!("PromptPilot API server created successfully");
    tracing::info!("");

    Ok((app, state))
}
