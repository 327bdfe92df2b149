use std::net::SocketAddr;
use tracing::Level;

pub const DEFAULT_UPSTREAM_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_CHAT_MODEL: &str = "google/gemini-2.5-flash";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_REFERER: &str = "https://gesturedispatch.dev";
pub const DEFAULT_TITLE: &str = "GestureDispatch";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Absence is not fatal at startup; each request reports it instead.
    pub api_key: Option<String>,
    pub upstream_url: String,
    pub chat_model: String,
    pub max_tokens: u32,
    pub log_level: Level,
    pub app_referer: String,
    pub app_title: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            api_key: None,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            log_level: Level::INFO,
            app_referer: DEFAULT_REFERER.to_string(),
            app_title: DEFAULT_TITLE.to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());

        let upstream_url =
            std::env::var("UPSTREAM_URL").unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string());
        if upstream_url.is_empty() {
            return Err(ConfigError::MissingVar("UPSTREAM_URL".to_string()));
        }

        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string());

        let max_tokens = match std::env::var("MAX_TOKENS") {
            Ok(raw) => raw.parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue("MAX_TOKENS".to_string(), e.to_string())
            })?,
            Err(_) => DEFAULT_MAX_TOKENS,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let app_referer =
            std::env::var("APP_REFERER").unwrap_or_else(|_| DEFAULT_REFERER.to_string());
        let app_title = std::env::var("APP_TITLE").unwrap_or_else(|_| DEFAULT_TITLE.to_string());

        Ok(Self {
            bind_address,
            api_key,
            upstream_url,
            chat_model,
            max_tokens,
            log_level,
            app_referer,
            app_title,
        })
    }
}
