//! One-time login codes
//!
//! A six-digit code is stored under `one_time_code:{email}` for a limited time.
//! Verification consumes the stored code atomically whether or not it
//! matches, so each code gets exactly one guess.

use super::session::{Session, SessionError, SessionManager};
use crate::mail::MailQueue;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use warden_core::{CredentialStore, KeyValueStore, OutboundEmail, User, WardenError};

/// Key holding the pending code for an email
pub fn code_key(email: &str) -> String {
    format!("one_time_code:{email}")
}

/// Uniform six-digit code, leading zeros kept
pub fn generate_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..=999_999);
    format!("{code:06}")
}

/// Errors from requesting a code
#[derive(Debug, Error)]
pub enum RequestCodeError {
    #[error("User not found")]
    UserNotFound,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Store(WardenError),
}

/// Errors from verifying a code
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("No code pending or code expired")]
    NoCode,

    #[error("Code does not match")]
    Mismatch,

    #[error("User not found")]
    UserNotFound,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Store(WardenError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<WardenError> for RequestCodeError {
    fn from(err: WardenError) -> Self {
        match err {
            WardenError::StoreUnavailable(msg) => RequestCodeError::StoreUnavailable(msg),
            other => RequestCodeError::Store(other),
        }
    }
}

impl From<WardenError> for VerifyError {
    fn from(err: WardenError) -> Self {
        match err {
            WardenError::StoreUnavailable(msg) => VerifyError::StoreUnavailable(msg),
            other => VerifyError::Store(other),
        }
    }
}

pub struct OneTimeCodeManager {
    store: Arc<dyn KeyValueStore>,
    users: Arc<dyn CredentialStore>,
    sessions: Arc<SessionManager>,
    mail: MailQueue,
    expiration_secs: u64,
}

impl OneTimeCodeManager {
    pub fn new(
        expiration_secs: u64,
        store: Arc<dyn KeyValueStore>,
        users: Arc<dyn CredentialStore>,
        sessions: Arc<SessionManager>,
        mail: MailQueue,
    ) -> Self {
        Self {
            store,
            users,
            sessions,
            mail,
            expiration_secs,
        }
    }

    /// Store a fresh code for `email` and mail it
    ///
    /// Replaces any unconsumed code. Mail delivery happens in the background.
    pub async fn request(&self, email: &str) -> Result<(), RequestCodeError> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(RequestCodeError::UserNotFound)?;

        let code = generate_code();
        self.store
            .set_ex(&code_key(email), &code, self.expiration_secs)
            .await?;

        let minutes = (self.expiration_secs / 60).max(1);
        self.mail.submit(OutboundEmail {
            to: user.email.clone(),
            subject: "Your one-time code".to_string(),
            body: format!("Your one-time code is: {code}\n\nThis code is valid for {minutes} minutes."),
        });

        info!(user_id = %user.id, "One-time code issued");
        Ok(())
    }

    /// Consume the pending code and start a session if it matches
    pub async fn verify(&self, email: &str, candidate: &str) -> Result<(User, Session), VerifyError> {
        let stored = self
            .store
            .take(&code_key(email))
            .await?
            .ok_or(VerifyError::NoCode)?;

        if stored != candidate {
            return Err(VerifyError::Mismatch);
        }

        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(VerifyError::UserNotFound)?;

        let session = self.sessions.issue_session(&user).await?;
        Ok((user, session))
    }
}
