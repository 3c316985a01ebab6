//! JWT token generation and validation
//!
//! Access and refresh tokens share one claim layout and are told apart by the
//! `typ` claim. Every token carries a fresh `jti` which is the key used by the
//! revocation store.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;
use warden_core::JwtSettings;

/// Which of the two session credentials a token is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT claims carried by both token types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: String,
    /// JWT ID - unique per issuance, used as the revocation key
    pub jti: String,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
    /// Access or refresh
    pub typ: TokenType,
    /// Optional flag-style role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Claims {
    /// Subject parsed as a user id
    pub fn user_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::Malformed)
    }

    /// Seconds left before expiry; negative once expired
    pub fn remaining_secs(&self, now: u64) -> i64 {
        self.exp as i64 - now as i64
    }
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),

    #[error("Malformed token")]
    Malformed,

    #[error("Token has expired")]
    Expired,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("System time error: {0}")]
    SystemTime(#[from] std::time::SystemTimeError),
}

/// JWT Configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret key for HMAC signing
    pub secret: String,
    /// Token issuer identifier
    pub issuer: String,
    /// Access token lifetime in seconds
    pub access_expiration_secs: u64,
    /// Refresh token lifetime in seconds
    pub refresh_expiration_secs: u64,
}

impl From<&JwtSettings> for JwtConfig {
    fn from(settings: &JwtSettings) -> Self {
        Self {
            secret: settings.secret.clone(),
            issuer: settings.issuer.clone(),
            access_expiration_secs: settings.access_expiration_secs,
            refresh_expiration_secs: settings.refresh_expiration_secs,
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self::from(&JwtSettings::default())
    }
}

impl JwtConfig {
    /// Lifetime for the given token type
    pub fn ttl_for(&self, token_type: TokenType) -> u64 {
        match token_type {
            TokenType::Access => self.access_expiration_secs,
            TokenType::Refresh => self.refresh_expiration_secs,
        }
    }
}

/// A signed token together with the claims it encodes
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Current Unix time in seconds
pub fn unix_now() -> Result<u64, JwtError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Mint a token of the given type with a fresh `jti`
///
/// # Example
///
/// ```no_run
/// use warden_api::auth::jwt::{issue_token, parse_token, JwtConfig, TokenType};
/// use uuid::Uuid;
///
/// let config = JwtConfig::default();
/// let issued = issue_token(&config, Uuid::new_v4(), TokenType::Access, None).unwrap();
/// let claims = parse_token(&config, &issued.token).unwrap();
/// assert_eq!(claims.jti, issued.claims.jti);
/// ```
pub fn issue_token(
    config: &JwtConfig,
    user_id: Uuid,
    token_type: TokenType,
    role: Option<&str>,
) -> Result<IssuedToken, JwtError> {
    let now = unix_now()?;

    let claims = Claims {
        iss: config.issuer.clone(),
        sub: user_id.to_string(),
        jti: Uuid::new_v4().to_string(),
        iat: now,
        exp: now + config.ttl_for(token_type),
        typ: token_type,
        role: role.map(str::to_string),
    };

    let token = sign_claims(config, &claims)?;
    Ok(IssuedToken { token, claims })
}

/// Sign an explicit claim set
pub fn sign_claims(config: &JwtConfig, claims: &Claims) -> Result<String, JwtError> {
    let token = encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?;
    Ok(token)
}

/// Validate a token and extract its claims
///
/// Expiry is checked without leeway. The token type is not checked here;
/// callers decide which type they accept.
pub fn parse_token(config: &JwtConfig, token: &str) -> Result<Claims, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => JwtError::Expired,
        ErrorKind::InvalidSignature => JwtError::BadSignature,
        _ => JwtError::Malformed,
    })?;

    Ok(token_data.claims)
}
