//! Application settings (C10).
//!
//! Read-only accessors over environment variables, validated where a
//! missing value is a startup-time configuration error rather than a
//! per-request one.

use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {0} has an invalid value: {1}")]
    Invalid(&'static str, String),
}

/// Read-only application configuration surface (C10).
///
/// `Settings` is constructed once at startup and shared (by reference
/// or `Arc`) across all in-flight requests; it never changes for the
/// lifetime of the process.
#[derive(Debug, Clone)]
pub struct Settings {
    backend_url: String,
    openai_api_key: Option<String>,
    top_level_policy_name: String,
    app_host: String,
    app_port: u16,
    http_pool_max_idle_per_host: usize,
    http_timeout_secs: u64,
    database_url: Option<String>,
}

impl Settings {
    /// Build settings from the process environment. Fails if a value
    /// that is required for the configured mode is missing or malformed.
    pub fn from_env() -> Result<Self, SettingsError> {
        let backend_url = std::env::var("BACKEND_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let top_level_policy_name = std::env::var("TOP_LEVEL_POLICY_NAME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "root".to_string());

        let app_host = std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let app_port = match std::env::var("APP_PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| SettingsError::Invalid("APP_PORT", raw))?,
            Err(_) => 8080,
        };

        let http_pool_max_idle_per_host = std::env::var("HTTP_POOL_MAX_IDLE_PER_HOST")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(32);

        let http_timeout_secs = std::env::var("HTTP_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(60);

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            backend_url,
            openai_api_key,
            top_level_policy_name,
            app_host,
            app_port,
            http_pool_max_idle_per_host,
            http_timeout_secs,
            database_url,
        })
    }

    /// Environment-variable-named key lookup for `AddApiKeyHeaderFromEnv`.
    pub fn env_api_key(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|s| !s.trim().is_empty())
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    pub fn openai_api_key(&self) -> Option<&str> {
        self.openai_api_key.as_deref()
    }

    pub fn top_level_policy_name(&self) -> &str {
        &self.top_level_policy_name
    }

    pub fn app_host(&self) -> &str {
        &self.app_host
    }

    pub fn app_port(&self) -> u16 {
        self.app_port
    }

    pub fn http_pool_max_idle_per_host(&self) -> usize {
        self.http_pool_max_idle_per_host
    }

    pub fn http_timeout_secs(&self) -> u64 {
        self.http_timeout_secs
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }
}

/// Initialize dotenv discovery and structured tracing from `RUST_LOG`.
///
/// Mirrors the teacher's tolerant `.env` discovery: tries `ENV_FILE` /
/// `ENVFILE` / `DOTENV_PATH`, then `.envfile`, then the standard `.env`
/// in the working directory, logging which source (if any) was used.
pub fn init_tracing() {
    let mut env_source: String = "none".into();

    for key in ["ENV_FILE", "ENVFILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty()
                && std::path::Path::new(p).is_file()
                && dotenvy::from_filename(p).is_ok()
            {
                env_source = format!("{p} ({key})");
                break;
            }
        }
    }

    if env_source == "none"
        && std::path::Path::new(".envfile").is_file()
        && dotenvy::from_filename(".envfile").is_ok()
    {
        env_source = ".envfile".into();
    }

    if env_source == "none" && dotenvy::dotenv().is_ok() {
        env_source = ".env".into();
    }

    let filter = std::env::var("LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info,actix_web=info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("Environment loaded from: {}", env_source);
}
