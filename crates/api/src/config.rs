//! Application configuration

use std::env;
use std::time::Duration;

pub const DEFAULT_ASSISTANT_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_ASSISTANT_MODEL: &str = "claude-3-5-haiku-latest";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,

    // Chat
    /// Staff roles that may handle support conversations
    pub support_roles: Vec<String>,
    pub staff_activity_window_secs: u64,

    // Assistant
    /// Empty disables the assistant
    pub assistant_api_key: Option<String>,
    pub assistant_api_url: String,
    pub assistant_model: String,
    pub assistant_max_tokens: u32,
    pub assistant_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            // Chat
            support_roles: {
                let roles: Vec<String> = env::var("SUPPORT_ROLES")
                    .unwrap_or_else(|_| "admin,manager,reception".to_string())
                    .split(',')
                    .map(frontdesk_shared::normalize_role)
                    .filter(|role| !role.is_empty())
                    .collect();
                if roles.is_empty() {
                    return Err(ConfigError::Invalid("SUPPORT_ROLES"));
                }
                roles
            },
            staff_activity_window_secs: parse_or("STAFF_ACTIVITY_WINDOW_SECS", 300)?,

            // Assistant
            assistant_api_key: env::var("ASSISTANT_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            assistant_api_url: env::var("ASSISTANT_API_URL")
                .unwrap_or_else(|_| DEFAULT_ASSISTANT_API_URL.to_string()),
            assistant_model: env::var("ASSISTANT_MODEL")
                .unwrap_or_else(|_| DEFAULT_ASSISTANT_MODEL.to_string()),
            assistant_max_tokens: parse_or("ASSISTANT_MAX_TOKENS", 500)?,
            assistant_timeout_ms: parse_or("ASSISTANT_TIMEOUT_MS", 15_000)?,
        })
    }

    pub fn staff_activity_window(&self) -> Duration {
        Duration::from_secs(self.staff_activity_window_secs)
    }

    pub fn assistant_timeout(&self) -> Duration {
        Duration::from_millis(self.assistant_timeout_ms)
    }
}

/// Parse an optional numeric variable, rejecting values that are set but malformed
fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}
