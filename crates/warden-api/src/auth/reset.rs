//! Password reset
//!
//! Reset tokens are stateless and independent of the JWT codec:
//!
//! ```text
//! base64url(email) "." base64url(issued_at as u64 BE) "." base64url(signature)
//! ```
//!
//! The signature is HMAC-SHA256 over the first two segments, keyed with
//! HMAC-SHA256(secret, salt). A token cannot be revoked on its own; completing
//! a reset revokes every session of the account instead.

use super::jwt::unix_now;
use super::password::{hash_password_with_config, validate_password_policy, PasswordConfig, PasswordError};
use super::session::SessionManager;
use crate::audit::{audit_log, AuditEvent};
use crate::mail::MailQueue;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use warden_core::{CredentialStore, OutboundEmail, PasswordResetConfig, User, WardenError};

type HmacSha256 = Hmac<Sha256>;

/// Reset token verification errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResetTokenError {
    #[error("Reset token has expired")]
    Expired,

    #[error("Invalid reset token")]
    Invalid,

    #[error("System clock unavailable: {0}")]
    Clock(String),

    #[error("Invalid signing key")]
    Key,
}

impl From<hmac::digest::InvalidLength> for ResetTokenError {
    fn from(_: hmac::digest::InvalidLength) -> Self {
        ResetTokenError::Key
    }
}

fn now_secs() -> Result<u64, ResetTokenError> {
    unix_now().map_err(|e| ResetTokenError::Clock(e.to_string()))
}

/// Signs and verifies reset tokens
#[derive(Clone)]
pub struct ResetTokenSigner {
    key: Vec<u8>,
    max_age_secs: u64,
}

impl ResetTokenSigner {
    pub fn new(secret: &str, salt: &str, max_age_secs: u64) -> Result<Self, ResetTokenError> {
        Ok(Self {
            key: hmac_sha256(secret.as_bytes(), salt.as_bytes())?,
            max_age_secs,
        })
    }

    pub fn from_config(config: &PasswordResetConfig) -> Result<Self, ResetTokenError> {
        Self::new(&config.secret, &config.salt, config.max_age_secs)
    }

    pub fn max_age_secs(&self) -> u64 {
        self.max_age_secs
    }

    /// Sign `identity` with the current time
    pub fn generate(&self, identity: &str) -> Result<String, ResetTokenError> {
        self.generate_at(identity, now_secs()?)
    }

    pub fn generate_at(&self, identity: &str, issued_at: u64) -> Result<String, ResetTokenError> {
        let payload = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(identity.as_bytes()),
            URL_SAFE_NO_PAD.encode(issued_at.to_be_bytes())
        );
        let signature = URL_SAFE_NO_PAD.encode(hmac_sha256(&self.key, payload.as_bytes())?);
        Ok(format!("{payload}.{signature}"))
    }

    /// Recover the identity if the token is authentic and younger than `max_age_secs`
    pub fn verify(&self, token: &str, max_age_secs: u64) -> Result<String, ResetTokenError> {
        self.verify_at(token, max_age_secs, now_secs()?)
    }

    pub fn verify_at(
        &self,
        token: &str,
        max_age_secs: u64,
        now: u64,
    ) -> Result<String, ResetTokenError> {
        let mut parts = token.split('.');
        let (Some(identity_b64), Some(ts_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ResetTokenError::Invalid);
        };

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| ResetTokenError::Invalid)?;

        let mut mac = HmacSha256::new_from_slice(&self.key)?;
        mac.update(identity_b64.as_bytes());
        mac.update(b".");
        mac.update(ts_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| ResetTokenError::Invalid)?;

        let ts_bytes: [u8; 8] = URL_SAFE_NO_PAD
            .decode(ts_b64)
            .map_err(|_| ResetTokenError::Invalid)?
            .try_into()
            .map_err(|_| ResetTokenError::Invalid)?;
        let issued_at = u64::from_be_bytes(ts_bytes);

        if issued_at > now.saturating_add(max_age_secs) {
            return Err(ResetTokenError::Invalid);
        }
        if now.saturating_sub(issued_at) > max_age_secs {
            return Err(ResetTokenError::Expired);
        }

        let identity = URL_SAFE_NO_PAD
            .decode(identity_b64)
            .map_err(|_| ResetTokenError::Invalid)?;
        String::from_utf8(identity).map_err(|_| ResetTokenError::Invalid)
    }
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>, ResetTokenError> {
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Errors from completing a reset
#[derive(Debug, Error)]
pub enum ResetError {
    #[error(transparent)]
    Token(#[from] ResetTokenError),

    #[error("User not found")]
    UserNotFound,

    #[error("{0}")]
    InvalidPassword(String),

    #[error(transparent)]
    Hashing(#[from] PasswordError),

    #[error(transparent)]
    Store(#[from] WardenError),
}

/// Issues reset links and applies resets
pub struct PasswordResetManager {
    signer: ResetTokenSigner,
    frontend_url: String,
    users: Arc<dyn CredentialStore>,
    sessions: Arc<SessionManager>,
    mail: MailQueue,
    password: PasswordConfig,
}

impl PasswordResetManager {
    pub fn new(
        config: &PasswordResetConfig,
        password: PasswordConfig,
        users: Arc<dyn CredentialStore>,
        sessions: Arc<SessionManager>,
        mail: MailQueue,
    ) -> Result<Self, ResetTokenError> {
        Ok(Self {
            signer: ResetTokenSigner::from_config(config)?,
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
            users,
            sessions,
            mail,
            password,
        })
    }

    pub fn signer(&self) -> &ResetTokenSigner {
        &self.signer
    }

    /// Link sent to the user
    pub fn reset_link(&self, token: &str) -> String {
        format!("{}/reset-password?token={token}", self.frontend_url)
    }

    /// Mail a reset link if `email` belongs to an account
    ///
    /// Returns whether a message was queued. Callers must not reveal it.
    pub async fn request_reset(&self, email: &str) -> Result<bool, ResetError> {
        let Some(user) = self.users.find_by_email(email).await? else {
            return Ok(false);
        };

        let token = self.signer.generate(&user.email)?;
        let queued = self.mail.submit(OutboundEmail {
            to: user.email.clone(),
            subject: "Reset your password".to_string(),
            body: format!(
                "To reset your password, open the following link: {}\n\n\
                 If you did not ask for a password reset, you can ignore this email.",
                self.reset_link(&token)
            ),
        });

        if queued {
            info!(user_id = %user.id, "Password reset email queued");
        }
        Ok(queued)
    }

    /// Verify the token, set the new password and end every session
    ///
    /// Nothing is written unless the token, user and password all check out.
    pub async fn complete_reset(&self, token: &str, new_password: &str) -> Result<User, ResetError> {
        let email = self.signer.verify(token, self.signer.max_age_secs)?;

        let mut user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(ResetError::UserNotFound)?;

        validate_password_policy(new_password).map_err(ResetError::InvalidPassword)?;

        let password_hash = hash_password_with_config(new_password, &self.password)?;
        self.users
            .update_password_hash(user.id, &password_hash)
            .await?;
        user.password_hash = password_hash;

        let count = self.sessions.revoke_all(user.id).await;
        audit_log(&AuditEvent::SessionsRevoked {
            user_id: user.id,
            count,
            trigger: "password_reset".to_string(),
        });

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::JwtConfig;
    use crate::auth::password::verify_password;
    use crate::mail::testing::RecordingMailer;
    use proptest::prelude::*;
    use warden_core::{KeyValueStore, NewUser, SessionConfig};
    use warden_store::{MemoryCredentialStore, MemoryKeyValueStore};

    const NOW: u64 = 1_700_000_000;

    fn signer() -> ResetTokenSigner {
        ResetTokenSigner::new("secret", "password-reset-salt", 3600).unwrap()
    }

    #[test]
    fn test_generate_and_verify() {
        let token = signer().generate_at("alice@x.com", NOW).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(
            signer().verify_at(&token, 3600, NOW + 10).unwrap(),
            "alice@x.com"
        );
    }

    #[test]
    fn test_expired_token() {
        let token = signer().generate_at("alice@x.com", NOW).unwrap();
        assert_eq!(
            signer().verify_at(&token, 3600, NOW + 3601),
            Err(ResetTokenError::Expired)
        );
        assert!(signer().verify_at(&token, 3600, NOW + 3600).is_ok());
    }

    #[test]
    fn test_future_token_is_invalid() {
        let token = signer().generate_at("alice@x.com", NOW + 10_000).unwrap();
        assert_eq!(
            signer().verify_at(&token, 3600, NOW),
            Err(ResetTokenError::Invalid)
        );
    }

    #[test]
    fn test_other_secret_or_salt_rejected() {
        let token = signer().generate_at("alice@x.com", NOW).unwrap();

        let other_secret = ResetTokenSigner::new("other", "password-reset-salt", 3600).unwrap();
        let other_salt = ResetTokenSigner::new("secret", "email-confirm", 3600).unwrap();

        assert_eq!(
            other_secret.verify_at(&token, 3600, NOW),
            Err(ResetTokenError::Invalid)
        );
        assert_eq!(
            other_salt.verify_at(&token, 3600, NOW),
            Err(ResetTokenError::Invalid)
        );
    }

    #[test]
    fn test_swapped_identity_rejected() {
        let token = signer().generate_at("alice@x.com", NOW).unwrap();
        let (_, rest) = token.split_once('.').unwrap();
        let forged = format!("{}.{rest}", URL_SAFE_NO_PAD.encode("mallory@x.com"));

        assert_eq!(
            signer().verify_at(&forged, 3600, NOW),
            Err(ResetTokenError::Invalid)
        );
    }

    #[test]
    fn test_empty_secret_still_signs() {
        let signer = ResetTokenSigner::new("", "", 60).unwrap();
        let token = signer.generate_at("alice@x.com", NOW).unwrap();
        assert_eq!(signer.verify_at(&token, 60, NOW).unwrap(), "alice@x.com");
        assert_eq!(
            ResetTokenSigner::new("secret", "", 60)
                .unwrap()
                .verify_at(&token, 60, NOW),
            Err(ResetTokenError::Invalid)
        );
    }

    #[test]
    fn test_garbage_rejected() {
        for token in ["", "a.b", "a.b.c.d", "!!.??.**", "YQ.YQ.YQ"] {
            assert_eq!(
                signer().verify_at(token, 3600, NOW),
                Err(ResetTokenError::Invalid),
                "token: {token:?}"
            );
        }
    }

    proptest! {
        #[test]
        fn prop_any_single_byte_change_is_rejected(index in 0usize..64, replacement in "[A-Za-z0-9_-]") {
            let token = signer().generate_at("alice@x.com", NOW).unwrap();
            let index = index % token.len();
            let mut bytes = token.clone().into_bytes();
            let new_byte = replacement.as_bytes()[0];
            prop_assume!(bytes[index] != new_byte && bytes[index] != b'.');
            bytes[index] = new_byte;
            let tampered = String::from_utf8(bytes).unwrap();

            prop_assert!(signer().verify_at(&tampered, 3600, NOW).is_err());
        }
    }

    struct Fixture {
        users: Arc<MemoryCredentialStore>,
        store: Arc<MemoryKeyValueStore>,
        sessions: Arc<SessionManager>,
        mailer: Arc<RecordingMailer>,
        manager: PasswordResetManager,
    }

    async fn fixture() -> Fixture {
        let users = Arc::new(MemoryCredentialStore::new());
        let store = Arc::new(MemoryKeyValueStore::new());
        let sessions = Arc::new(
            SessionManager::new(
                JwtConfig::default(),
                &SessionConfig::default(),
                &PasswordConfig::lightweight(),
                store.clone(),
                users.clone(),
            )
            .unwrap(),
        );
        let mailer = Arc::new(RecordingMailer::new());
        let (mail, _worker) = MailQueue::start(mailer.clone(), 8);
        let manager = PasswordResetManager::new(
            &PasswordResetConfig::default(),
            PasswordConfig::lightweight(),
            users.clone(),
            sessions.clone(),
            mail,
        )
        .unwrap();

        let hash = hash_password_with_config("Abc12345!", &PasswordConfig::lightweight()).unwrap();
        users
            .create(NewUser {
                username: "alice".to_string(),
                email: "alice@x.com".to_string(),
                password_hash: hash,
            })
            .await
            .unwrap();

        Fixture {
            users,
            store,
            sessions,
            mailer,
            manager,
        }
    }

    #[tokio::test]
    async fn test_request_reset_mails_link() {
        let f = fixture().await;

        assert!(f.manager.request_reset("alice@x.com").await.unwrap());
        let sent = f.mailer.wait_for(1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@x.com");
        assert!(sent[0]
            .body
            .contains("http://localhost:3000/reset-password?token="));
    }

    #[tokio::test]
    async fn test_request_reset_for_unknown_email_sends_nothing() {
        let f = fixture().await;
        assert!(!f.manager.request_reset("nobody@x.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_reset_changes_password_and_revokes_sessions() {
        let f = fixture().await;
        let user = f.users.find_by_email("alice@x.com").await.unwrap().unwrap();
        let session = f.sessions.issue_session(&user).await.unwrap();

        let token = f.manager.signer().generate("alice@x.com").unwrap();
        f.manager.complete_reset(&token, "NewPass99#").await.unwrap();

        let reloaded = f.users.find_by_id(user.id).await.unwrap().unwrap();
        assert!(verify_password("NewPass99#", &reloaded.password_hash).unwrap());
        assert!(f.sessions.is_revoked(&session.access.claims.jti).await);
        assert!(f.sessions.is_revoked(&session.refresh.claims.jti).await);
        assert!(f
            .store
            .smembers(&crate::auth::session::user_tokens_key(user.id))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failed_reset_leaves_password_untouched() {
        let f = fixture().await;
        let before = f.users.find_by_email("alice@x.com").await.unwrap().unwrap();

        let expired = f.manager.signer().generate_at("alice@x.com", NOW).unwrap();
        assert!(matches!(
            f.manager.complete_reset(&expired, "NewPass99#").await,
            Err(ResetError::Token(ResetTokenError::Expired))
        ));

        let token = f.manager.signer().generate("alice@x.com").unwrap();
        let tampered = format!("{token}x");
        assert!(matches!(
            f.manager.complete_reset(&tampered, "NewPass99#").await,
            Err(ResetError::Token(ResetTokenError::Invalid))
        ));

        assert!(matches!(
            f.manager.complete_reset(&token, "weak").await,
            Err(ResetError::InvalidPassword(_))
        ));

        let after = f.users.find_by_email("alice@x.com").await.unwrap().unwrap();
        assert_eq!(before.password_hash, after.password_hash);
    }

    #[tokio::test]
    async fn test_reset_for_deleted_account() {
        let f = fixture().await;
        let token = f.manager.signer().generate("ghost@x.com").unwrap();

        assert!(matches!(
            f.manager.complete_reset(&token, "NewPass99#").await,
            Err(ResetError::UserNotFound)
        ));
    }
}
