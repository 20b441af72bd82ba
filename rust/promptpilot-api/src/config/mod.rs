//! Configuration management for the PromptPilot API.
//!
//! Configuration is loaded from defaults, then an optional config file
//! (`config/promptpilot-api.{yaml,toml,json}`), then environment variables
//! with the `PROMPTPILOT` prefix and `__` section separator
//! (e.g. `PROMPTPILOT__SCHEDULER__POLL_INTERVAL_SECS=30`), plus a handful
//! of well-known plain variables (`OPENAI_API_KEY`, `DATABASE_PATH`,
//! `LICENSE_SEED_KEYS`).

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Gateway configuration (license auth, rate limiting).
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Scheduler configuration (poller, quota, log retention).
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Prompt-generation engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Notifier configuration (chat-platform delivery).
    #[serde(default)]
    pub notifier: NotifierConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment and config files.
    ///
    /// Sources, in order:
    /// 1. Default values
    /// 2. Config files (`config/promptpilot-api`, `config/promptpilot`)
    /// 3. Environment variables
    ///
    /// The loaded configuration is validated. Use [`Self::load_unchecked`]
    /// to skip validation.
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::load_unchecked()?;

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked() -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8710)?
            .set_default("scheduler.poll_interval_secs", 60)?
            .set_default("engine.model", "gpt-4o-mini")?
            .set_default("engine.max_tokens", 1024)?
            .set_default("engine.temperature", 0.7)?
            // Add config file if it exists
            .add_source(config::File::with_name("config/promptpilot-api").required(false))
            .add_source(config::File::with_name("config/promptpilot").required(false))
            // Override with environment variables
            .add_source(
                config::Environment::with_prefix("PROMPTPILOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize().unwrap_or_default();

        // Override with specific environment variables
        if let Ok(key) = std::env::var("ENGINE_API_KEY") {
            app_config.engine.api_key = Some(key);
        } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            app_config.engine.api_key = Some(key);
        }
        if let Ok(path) = std::env::var("DATABASE_PATH") {
            app_config.database.path = path;
        }
        if let Ok(keys) = std::env::var("LICENSE_SEED_KEYS") {
            app_config.gateway.seed_license_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(app_config)
    }

    /// Rejects configurations the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be non-zero");
        }
        if self.database.path.trim().is_empty() {
            anyhow::bail!("database.path must not be empty");
        }
        if self.scheduler.poll_interval_secs == 0 {
            anyhow::bail!("scheduler.poll_interval_secs must be at least 1");
        }
        if self.scheduler.max_live_schedules == 0 {
            anyhow::bail!("scheduler.max_live_schedules must be at least 1");
        }
        if self.scheduler.log_retention_days == 0 {
            anyhow::bail!("scheduler.log_retention_days must be at least 1");
        }
        if self.gateway.rate_limit_per_minute == 0 {
            anyhow::bail!("gateway.rate_limit_per_minute must be at least 1");
        }
        if self.gateway.rate_limit_burst == 0 {
            anyhow::bail!("gateway.rate_limit_burst must be at least 1");
        }
        url::Url::parse(&self.engine.base_url)
            .map_err(|e| anyhow::anyhow!("engine.base_url is not a valid URL: {}", e))?;
        url::Url::parse(&self.notifier.telegram_api_base)
            .map_err(|e| anyhow::anyhow!("notifier.telegram_api_base is not a valid URL: {}", e))?;
        Ok(())
    }

    /// True when running with `server.environment = "production"`.
    ///
    /// Error responses omit internal detail in production.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.server.environment.eq_ignore_ascii_case("production")
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Main API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Deployment environment name (`development`, `staging`, `production`).
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8710
}

fn default_request_timeout() -> u64 {
    30
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            environment: default_environment(),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Rate limit requests per minute per client.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
    /// Rate limit burst size.
    #[serde(default = "default_rate_burst")]
    pub rate_limit_burst: u32,
    /// Plaintext license keys seeded into the store at startup.
    ///
    /// Hashed on arrival; intended for first-run deployments and tests.
    #[serde(default)]
    pub seed_license_keys: Vec<String>,
}

fn default_rate_limit() -> u32 {
    60
}

fn default_rate_burst() -> u32 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: default_rate_limit(),
            rate_limit_burst: default_rate_burst(),
            seed_license_keys: Vec::new(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "promptpilot.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-prompt poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Maximum live (pending or completed) schedules per owner.
    #[serde(default = "default_max_live_schedules")]
    pub max_live_schedules: u32,
    /// Days execution log entries are retained.
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_live_schedules() -> u32 {
    10
}

fn default_log_retention_days() -> u32 {
    2
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_live_schedules: default_max_live_schedules(),
            log_retention_days: default_log_retention_days(),
        }
    }
}

/// Prompt-generation engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_engine_base_url")]
    pub base_url: String,
    /// API key for the engine.
    pub api_key: Option<String>,
    /// Model to use.
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature for sampling.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Deadline for one generation call, in seconds.
    ///
    /// An elapsed deadline records a `timeout` execution log entry.
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
}

fn default_engine_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

fn default_engine_timeout() -> u64 {
    120
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_engine_base_url(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_engine_timeout(),
        }
    }
}

/// Notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Telegram Bot API base URL (overridable for tests).
    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,
    /// Delay between sequential Telegram message chunks, in milliseconds.
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
    /// Timeout for one outbound delivery request, in seconds.
    #[serde(default = "default_notifier_timeout")]
    pub request_timeout_secs: u64,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_chunk_delay_ms() -> u64 {
    500
}

fn default_notifier_timeout() -> u64 {
    15
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            telegram_api_base: default_telegram_api_base(),
            chunk_delay_ms: default_chunk_delay_ms(),
            request_timeout_secs: default_notifier_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to use JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
