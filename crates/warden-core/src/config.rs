//! Warden Configuration Management
//!
//! Handles configuration from a TOML file and environment variables
//! with sensible defaults for development.
//!
//! Precedence: built-in defaults, then the optional file named by
//! `WARDEN_CONFIG`, then environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Revocation store (Redis) connection
    pub redis: RedisConfig,

    /// Credential store (PostgreSQL) connection
    pub database: DatabaseConfig,

    /// Access/refresh token settings
    pub jwt: JwtSettings,

    /// Session manager behaviour
    pub session: SessionConfig,

    /// One-time code settings
    pub one_time_code: OneTimeCodeConfig,

    /// Password reset token settings
    pub password_reset: PasswordResetConfig,

    /// Outbound mail settings
    pub mail: MailConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|message| ConfigError::ParseError { path, message })
    }

    /// Parse a TOML document; missing sections fall back to their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Defaults, then `WARDEN_CONFIG` file if set, then environment
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("WARDEN_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        base.with_env_override()
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env("API_PORT")? {
            self.server.port = port;
        }
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Stores
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.redis.url = url;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.postgres_url = Some(url);
        }

        // Tokens
        if let Ok(secret) = std::env::var("JWT_SECRET_KEY") {
            self.jwt.secret = secret;
        }
        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            self.jwt.issuer = issuer;
        }
        if let Some(secs) = parse_env("JWT_ACCESS_TOKEN_EXPIRES")? {
            self.jwt.access_expiration_secs = secs;
        }
        if let Some(secs) = parse_env("JWT_REFRESH_TOKEN_EXPIRES")? {
            self.jwt.refresh_expiration_secs = secs;
        }

        // Session
        if let Ok(mode) = std::env::var("LOGIN_LOOKUP") {
            self.session.login_lookup = mode.parse()?;
        }
        if let Some(secs) = parse_env("REVOKE_ALL_TTL")? {
            self.session.revoke_all_ttl_secs = secs;
        }

        // One-time codes
        if let Some(secs) = parse_env("ONE_TIME_CODE_EXPIRATION")? {
            self.one_time_code.expiration_secs = secs;
        }

        // Password reset
        if let Ok(secret) = std::env::var("SECRET_KEY") {
            self.password_reset.secret = secret;
        }
        if let Some(secs) = parse_env("PASSWORD_RESET_MAX_AGE")? {
            self.password_reset.max_age_secs = secs;
        }
        if let Ok(url) = std::env::var("FRONTEND_URL") {
            self.password_reset.frontend_url = url;
        }

        // Mail
        if let Ok(server) = std::env::var("MAIL_SERVER") {
            self.mail.smtp_host = Some(server);
        }
        if let Some(port) = parse_env("MAIL_PORT")? {
            self.mail.smtp_port = port;
        }
        if let Ok(user) = std::env::var("MAIL_USERNAME") {
            self.mail.username = Some(user);
        }
        if let Ok(pass) = std::env::var("MAIL_PASSWORD") {
            self.mail.password = Some(pass);
        }
        if let Ok(sender) = std::env::var("MAIL_DEFAULT_SENDER") {
            self.mail.default_sender = sender;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(self)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://localhost:6379/0`
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
        }
    }
}

/// PostgreSQL connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL; `None` selects the in-memory credential store
    pub postgres_url: Option<String>,

    /// Connection pool size
    pub postgres_pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            postgres_pool_size: 5,
        }
    }
}

/// Token signing and lifetime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    /// HMAC signing secret
    pub secret: String,

    /// Issuer claim written and checked on every token
    pub issuer: String,

    /// Access token lifetime in seconds
    pub access_expiration_secs: u64,

    /// Refresh token lifetime in seconds
    pub refresh_expiration_secs: u64,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: "development-jwt-secret-change-in-production".to_string(),
            issuer: "warden".to_string(),
            access_expiration_secs: 3600,
            refresh_expiration_secs: 86400,
        }
    }
}

/// How `authenticate` resolves the login identifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginLookup {
    /// Match the username first, then the email
    #[default]
    UsernameOrEmail,
    /// Match the username only
    Username,
}

impl std::str::FromStr for LoginLookup {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "username_or_email" => Ok(Self::UsernameOrEmail),
            "username" => Ok(Self::Username),
            _ => Err(ConfigError::InvalidValue {
                key: "LOGIN_LOOKUP".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Session manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Identifier resolution for logins
    pub login_lookup: LoginLookup,

    /// TTL written for each record by a mass revocation; the index does not
    /// keep per-token expiry, so values below the longest token lifetime are
    /// raised to it
    pub revoke_all_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_lookup: LoginLookup::default(),
            revoke_all_ttl_secs: 86400,
        }
    }
}

/// One-time code configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OneTimeCodeConfig {
    /// Code lifetime in seconds
    pub expiration_secs: u64,
}

impl Default for OneTimeCodeConfig {
    fn default() -> Self {
        Self {
            expiration_secs: 600,
        }
    }
}

/// Password reset token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordResetConfig {
    /// Signing secret, independent from the JWT secret
    pub secret: String,

    /// Context label mixed into the signing key
    pub salt: String,

    /// Maximum token age in seconds
    pub max_age_secs: u64,

    /// Base URL of the frontend page that consumes the token
    pub frontend_url: String,
}

impl Default for PasswordResetConfig {
    fn default() -> Self {
        Self {
            secret: "development-reset-secret-change-in-production".to_string(),
            salt: "password-reset-salt".to_string(),
            max_age_secs: 3600,
            frontend_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Outbound mail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// SMTP relay host; `None` logs messages instead of sending them
    pub smtp_host: Option<String>,

    /// SMTP port (STARTTLS)
    pub smtp_port: u16,

    /// SMTP username
    pub username: Option<String>,

    /// SMTP password
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// `From` address
    pub default_sender: String,

    /// Pending messages held by the mail queue
    pub queue_capacity: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: 587,
            username: None,
            password: None,
            default_sender: "no-reply@localhost".to_string(),
            queue_capacity: 256,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
