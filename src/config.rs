use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "usd";
const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 24 * 3600;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;

/// Payment provider (Stripe) configuration.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct StripeConfig {
    /// Secret API key. Checkout fails with CONFIG_ERROR when absent.
    pub secret_key: Option<String>,
    /// Webhook signing secret shared with the provider.
    pub webhook_secret: Option<String>,
    /// Seconds of clock skew tolerated when verifying webhook timestamps
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: u64,
    /// Where the provider redirects the customer after payment
    #[serde(default = "default_success_url")]
    pub success_url: String,
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,
    /// Overridable for tests pointing at a mock server
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_webhook_tolerance() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_success_url() -> String {
    "http://localhost:3000/checkout/success".to_string()
}

fn default_cancel_url() -> String {
    "http://localhost:3000/checkout/cancel".to_string()
}

fn default_api_base() -> String {
    "https://api.stripe.com".to_string()
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key used to sign customer tokens
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// JWT expiration time in seconds
    pub jwt_expiration: usize,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (development, test, production)
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// ISO currency code used for checkout sessions
    #[serde(default = "default_currency")]
    pub currency: String,

    /// TTL for in-process idempotency claims
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_secs: u64,

    #[serde(default)]
    pub db_max_connections: Option<u32>,

    #[serde(default)]
    pub db_min_connections: Option<u32>,

    /// Payment provider settings
    #[serde(default)]
    pub stripe: StripeConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_idempotency_ttl() -> u64 {
    DEFAULT_IDEMPOTENCY_TTL_SECS
}

impl AppConfig {
    /// Programmatic constructor, used by tests and tooling.
    pub fn new(
        database_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            currency: default_currency(),
            idempotency_ttl_secs: default_idempotency_ttl(),
            db_max_connections: None,
            db_min_connections: None,
            stripe: StripeConfig::default(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Loads configuration from `config/` files layered with `MYCOSHOP__`-prefixed
/// environment variables. The environment profile is selected by `RUN_ENV`.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret intentionally has no default: an insecure fallback must never
    // reach production.
    let builder = Config::builder()
        .set_default("database_url", "sqlite://mycoshop.db?mode=rwc")?
        .set_default("jwt_expiration", 3600)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("MYCOSHOP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set MYCOSHOP__JWT_SECRET with a secure random string (minimum 32 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

/// Initializes the global tracing subscriber. `RUST_LOG` overrides the
/// configured level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("mycoshop_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}
