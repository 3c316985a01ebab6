//! Session issuance and revocation
//!
//! Tokens are stateless JWTs; revocation is layered on top with two
//! structures in the key-value store:
//!
//! - `revoked:{jti}` marks a revoked token until it would have expired anyway
//! - `user_tokens:{user_id}` indexes every live `jti` of a user so all of them
//!   can be revoked at once
//!
//! Every mutation is independently safe under concurrent access. Revocation is
//! monotonic, so racing writers converge without locking.

use super::jwt::{issue_token, parse_token, unix_now, Claims, IssuedToken, JwtConfig, JwtError, TokenType};
use super::password::{hash_password_with_config, verify_password, PasswordConfig, PasswordError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;
use warden_core::{CredentialStore, KeyValueStore, LoginLookup, SessionConfig, User, WardenError};

const DUMMY_PASSWORD: &str = "warden-dummy-password-for-timing";

/// Key of the revocation record for a token
pub fn revoked_key(jti: &str) -> String {
    format!("revoked:{jti}")
}

/// Key of the live-token index for a user
pub fn user_tokens_key(user_id: Uuid) -> String {
    format!("user_tokens:{user_id}")
}

/// Session manager errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Token(#[from] JwtError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Store(#[from] WardenError),
}

/// A freshly issued access/refresh pair
#[derive(Debug, Clone)]
pub struct Session {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Orchestrates issuance, revocation checks and revocation
pub struct SessionManager {
    jwt: JwtConfig,
    store: Arc<dyn KeyValueStore>,
    users: Arc<dyn CredentialStore>,
    login_lookup: LoginLookup,
    revoke_all_ttl_secs: u64,
    dummy_hash: String,
}

impl SessionManager {
    /// Build a manager; hashes the dummy password used for timing equalisation
    pub fn new(
        jwt: JwtConfig,
        session: &SessionConfig,
        password: &PasswordConfig,
        store: Arc<dyn KeyValueStore>,
        users: Arc<dyn CredentialStore>,
    ) -> Result<Self, PasswordError> {
        let dummy_hash = hash_password_with_config(DUMMY_PASSWORD, password)?;

        // Mass revocation must outlive the longest token it can cover
        let revoke_all_ttl_secs = session
            .revoke_all_ttl_secs
            .max(jwt.refresh_expiration_secs)
            .max(jwt.access_expiration_secs)
            .saturating_add(1);
        if revoke_all_ttl_secs > session.revoke_all_ttl_secs.saturating_add(1) {
            warn!(
                configured = session.revoke_all_ttl_secs,
                effective = revoke_all_ttl_secs,
                "revoke_all_ttl_secs is shorter than the token lifetime, raising it"
            );
        }

        Ok(Self {
            jwt,
            store,
            users,
            login_lookup: session.login_lookup,
            revoke_all_ttl_secs,
            dummy_hash,
        })
    }

    pub fn jwt_config(&self) -> &JwtConfig {
        &self.jwt
    }

    /// TTL written by `revoke_all`, never shorter than any token lifetime
    pub fn revoke_all_ttl_secs(&self) -> u64 {
        self.revoke_all_ttl_secs
    }

    /// Validate a token's signature, issuer and expiry
    pub fn parse(&self, token: &str) -> Result<Claims, JwtError> {
        parse_token(&self.jwt, token)
    }

    /// Mint an access/refresh pair and index both `jti`s under the user
    ///
    /// An unreachable store does not fail issuance; the tokens are then
    /// missing from the index and escape `revoke_all`.
    pub async fn issue_session(&self, user: &User) -> Result<Session, SessionError> {
        let role = user.role.as_deref();
        let access = issue_token(&self.jwt, user.id, TokenType::Access, role)?;
        let refresh = issue_token(&self.jwt, user.id, TokenType::Refresh, role)?;

        self.register_tokens(
            user.id,
            &[access.claims.jti.clone(), refresh.claims.jti.clone()],
        )
        .await;

        Ok(Session { access, refresh })
    }

    /// Verify credentials and issue a session
    ///
    /// A missing user and a wrong password produce the same error after the
    /// same amount of hashing work.
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<(User, Session), SessionError> {
        let user = match self.login_lookup {
            LoginLookup::UsernameOrEmail => self.users.find_by_identifier_or(identifier).await?,
            LoginLookup::Username => self.users.find_by_username(identifier).await?,
        };

        let user = match user {
            Some(user) => {
                if !verify_password(password, &user.password_hash)? {
                    return Err(SessionError::InvalidCredentials);
                }
                user
            }
            None => {
                let _ = verify_password(password, &self.dummy_hash);
                return Err(SessionError::InvalidCredentials);
            }
        };

        let session = self.issue_session(&user).await?;
        Ok((user, session))
    }

    /// Mint a new access token for the holder of a validated refresh token
    ///
    /// The new `jti` is indexed so a later `revoke_all` covers it. The refresh
    /// token itself is not rotated.
    pub async fn refresh_access(
        &self,
        user_id: Uuid,
        role: Option<&str>,
    ) -> Result<IssuedToken, SessionError> {
        let access = issue_token(&self.jwt, user_id, TokenType::Access, role)?;

        self.register_tokens(user_id, &[access.claims.jti.clone()])
            .await;

        Ok(access)
    }

    /// Whether a token has been revoked
    ///
    /// Fails closed: any store error reports the token as revoked.
    pub async fn is_revoked(&self, jti: &str) -> bool {
        match self.store.get(&revoked_key(jti)).await {
            Ok(record) => record.is_some(),
            Err(e) => {
                error!(jti = %jti, error = %e, "Revocation check failed, denying token");
                true
            }
        }
    }

    /// Revoke one token until its natural expiry
    ///
    /// A token is still accepted during its `exp` second, so the record lives
    /// one second longer than the remaining lifetime.
    ///
    /// Errors are logged, never returned; the worst case is a token that
    /// stays usable until it expires.
    pub async fn revoke(&self, jti: &str, token_type: TokenType, expires_at: u64, user_id: Uuid) {
        let now = match unix_now() {
            Ok(now) => now,
            Err(e) => {
                error!(jti = %jti, error = %e, "Cannot read clock, token not revoked");
                return;
            }
        };

        if expires_at < now {
            return;
        }
        let ttl_secs = expires_at - now + 1;

        if let Err(e) = self
            .store
            .set_ex(&revoked_key(jti), "true", ttl_secs)
            .await
        {
            error!(
                jti = %jti,
                token_type = %token_type,
                user_id = %user_id,
                error = %e,
                "Failed to write revocation record"
            );
            return;
        }

        if let Err(e) = self.store.srem(&user_tokens_key(user_id), jti).await {
            warn!(jti = %jti, user_id = %user_id, error = %e, "Failed to unindex revoked token");
        }
    }

    /// Revoke the token described by `claims`
    pub async fn revoke_claims(&self, claims: &Claims) {
        match claims.user_id() {
            Ok(user_id) => self.revoke(&claims.jti, claims.typ, claims.exp, user_id).await,
            Err(_) => warn!(jti = %claims.jti, "Token subject is not a user id, not revoked"),
        }
    }

    /// Revoke every indexed token of a user and unindex them
    ///
    /// Each record gets a TTL covering the longest token lifetime because exact
    /// expiries are not indexed. Only the enumerated members leave the index,
    /// so tokens issued concurrently stay covered by a later call. Individual
    /// failures are logged and skipped. Returns the number of tokens revoked.
    pub async fn revoke_all(&self, user_id: Uuid) -> usize {
        let index_key = user_tokens_key(user_id);

        let jtis = match self.store.smembers(&index_key).await {
            Ok(jtis) => jtis,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to read token index, sessions not revoked");
                return 0;
            }
        };

        let mut revoked = 0;
        for jti in &jtis {
            match self
                .store
                .set_ex(&revoked_key(jti), "true", self.revoke_all_ttl_secs)
                .await
            {
                Ok(()) => revoked += 1,
                Err(e) => {
                    error!(user_id = %user_id, jti = %jti, error = %e, "Failed to revoke token");
                    continue;
                }
            }

            if let Err(e) = self.store.srem(&index_key, jti).await {
                warn!(user_id = %user_id, jti = %jti, error = %e, "Failed to unindex revoked token");
            }
        }

        revoked
    }

    async fn register_tokens(&self, user_id: Uuid, jtis: &[String]) {
        let index_key = user_tokens_key(user_id);

        if let Err(e) = self.store.sadd(&index_key, jtis).await {
            warn!(
                user_id = %user_id,
                error = %e,
                "Failed to index issued tokens, they will escape mass revocation"
            );
            return;
        }

        if let Err(e) = self
            .store
            .expire(&index_key, self.jwt.refresh_expiration_secs)
            .await
        {
            warn!(user_id = %user_id, error = %e, "Failed to set token index expiry");
        }
    }
}
