//! Warden Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout Warden:
//! - User accounts as held by the credential store
//! - Common error types
//! - Collaborator traits (credential store, key-value store, mailer)
//! - Configuration management

pub mod config;

pub use config::{
    AppConfig, ConfigError, DatabaseConfig, JwtSettings, LoggingConfig, LoginLookup, MailConfig,
    OneTimeCodeConfig, PasswordResetConfig, RedisConfig, ServerConfig, SessionConfig,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for Warden operations
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("{field} is already registered")]
    Duplicate { field: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Mail error: {0}")]
    MailError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WardenError>;

// ============================================================================
// Users
// ============================================================================

/// A registered account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier, used as the token subject
    pub id: Uuid,

    /// Login name (unique)
    pub username: String,

    /// Email address (unique)
    pub email: String,

    /// One-way password hash (PHC string)
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Optional role carried as a token claim
    pub role: Option<String>,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Materialize a registration into a stored user with a fresh id
    pub fn from_new(new_user: NewUser) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            role: None,
            created_at: Utc::now(),
        }
    }
}

/// Registration data handed to the credential store
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

// ============================================================================
// Outbound Mail
// ============================================================================

/// A plain-text message addressed to one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

// ============================================================================
// Traits
// ============================================================================

/// Persistent user storage keyed by id, username and email
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a user by id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Look up a user by exact username
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Look up a user by exact email
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Username match first, then email match
    async fn find_by_identifier_or(&self, identifier: &str) -> Result<Option<User>> {
        if let Some(user) = self.find_by_username(identifier).await? {
            return Ok(Some(user));
        }
        self.find_by_email(identifier).await
    }

    /// Insert a user; fails with `Duplicate` if the username or email is taken
    async fn create(&self, new_user: NewUser) -> Result<User>;

    /// Replace the password hash of an existing user
    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Expiring key-value cache with set operations (Redis semantics)
///
/// Every failure to reach the backend surfaces as
/// [`WardenError::StoreUnavailable`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a string value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value that expires after `ttl_secs`
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Remove a key of any type
    async fn delete(&self, key: &str) -> Result<()>;

    /// Read and remove a string value in one atomic step
    async fn take(&self, key: &str) -> Result<Option<String>>;

    /// Set the expiry of an existing key
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()>;

    /// Remaining lifetime in seconds; `None` if missing or persistent
    async fn ttl(&self, key: &str) -> Result<Option<i64>>;

    /// Add members to a set
    async fn sadd(&self, key: &str, members: &[String]) -> Result<()>;

    /// Remove one member from a set
    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    /// All members of a set (empty if missing)
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Round-trip check used by readiness probes
    async fn ping(&self) -> Result<()>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Outbound email delivery
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one message
    async fn send(&self, email: &OutboundEmail) -> Result<()>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_from_new_assigns_fresh_ids() {
        let new_user = NewUser {
            username: "alice".to_string(),
            email: "alice@x.com".to_string(),
            password_hash: "$argon2id$stub".to_string(),
        };

        let first = User::from_new(new_user.clone());
        let second = User::from_new(new_user);

        assert_ne!(first.id, second.id);
        assert_eq!(first.username, "alice");
        assert!(first.role.is_none());
    }

    #[test]
    fn test_user_serialization_hides_password_hash() {
        let user = User::from_new(NewUser {
            username: "bob".to_string(),
            email: "bob@x.com".to_string(),
            password_hash: "secret-hash".to_string(),
        });

        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("bob@x.com"));
        assert!(!json.contains("secret-hash"));
    }

    #[test]
    fn test_duplicate_error_names_field() {
        let err = WardenError::Duplicate {
            field: "email".to_string(),
        };
        assert_eq!(err.to_string(), "email is already registered");
    }
}
