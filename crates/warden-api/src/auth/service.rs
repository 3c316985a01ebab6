//! Authentication service layer
//!
//! Request/response types and the translation from the session, reset and
//! one-time-code managers into [`AppError`]. Handlers call only this type.

use super::jwt::TokenType;
use super::middleware::AuthenticatedUser;
use super::one_time_code::{OneTimeCodeManager, RequestCodeError, VerifyError};
use super::password::{hash_password_with_config, validate_password_policy, PasswordConfig, PasswordError};
use super::reset::{PasswordResetManager, ResetError, ResetTokenError};
use super::session::{Session, SessionError, SessionManager};
use crate::audit::{audit_log, AuditEvent, RequestContext};
use crate::error::AppError;
use crate::mail::MailQueue;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};
use warden_core::{AppConfig, CredentialStore, KeyValueStore, NewUser, User};

const RESET_REQUESTED_MESSAGE: &str =
    "If an account with this email exists, a password reset email has been sent.";

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    /// 3 to 50 letters, digits or underscores
    #[validate(length(min = 3, max = 50, message = "Username must be between 3 and 50 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub password: String,
}

/// Login request; `identifier` is a username or an email
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[serde(alias = "username")]
    #[validate(length(min = 1, message = "Identifier is required"))]
    pub identifier: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Body of the password-reset and one-time-code requests
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct EmailRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
    #[serde(alias = "new_password")]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct VerifyCodeRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(equal = 6, message = "Code must have 6 digits"))]
    pub code: String,
}

/// Logout options, all optional
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LogoutRequest {
    /// Refresh token to revoke along with the access token
    pub refresh_token: Option<String>,
    /// Revoke every session of the user
    pub logout_all_devices: Option<bool>,
}

/// Access and refresh token pair
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Public view of an account
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub email: String,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

fn field_error(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

fn into_result(errors: ValidationErrors) -> Result<(), AppError> {
    if errors.field_errors().is_empty() {
        Ok(())
    } else {
        Err(AppError::from(errors))
    }
}

fn validate_registration(request: &RegisterRequest) -> Result<(), AppError> {
    let mut errors = request.validate().err().unwrap_or_else(ValidationErrors::new);

    if !request
        .username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        errors.add(
            "username",
            field_error(
                "username_charset",
                "Username may only contain letters, digits and underscores",
            ),
        );
    }

    if let Err(message) = validate_password_policy(&request.password) {
        errors.add("password", field_error("password_policy", message));
    }

    into_result(errors)
}

fn session_error(err: SessionError) -> AppError {
    match err {
        SessionError::InvalidCredentials => AppError::InvalidCredentials,
        SessionError::Store(e) => AppError::from(e),
        other => AppError::Internal(other.to_string()),
    }
}

fn password_error(err: PasswordError) -> AppError {
    AppError::Internal(format!("Password hashing failed: {err}"))
}

fn reset_error(err: ResetError) -> AppError {
    match err {
        ResetError::Token(ResetTokenError::Expired | ResetTokenError::Invalid) => {
            AppError::BadRequest("Invalid or expired token".to_string())
        }
        ResetError::Token(e @ (ResetTokenError::Clock(_) | ResetTokenError::Key)) => {
            AppError::Internal(format!("Reset token unavailable: {e}"))
        }
        ResetError::UserNotFound => AppError::BadRequest("User not found".to_string()),
        ResetError::InvalidPassword(message) => {
            let mut errors = ValidationErrors::new();
            errors.add("password", field_error("password_policy", message));
            AppError::from(errors)
        }
        ResetError::Hashing(e) => password_error(e),
        ResetError::Store(e) => AppError::from(e),
    }
}

/// Errors building the service at startup
#[derive(Debug, Error)]
pub enum AuthSetupError {
    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    ResetToken(#[from] ResetTokenError),
}

/// Authentication service
pub struct AuthService {
    users: Arc<dyn CredentialStore>,
    sessions: Arc<SessionManager>,
    codes: OneTimeCodeManager,
    resets: PasswordResetManager,
    password: PasswordConfig,
}

impl AuthService {
    pub fn new(
        config: &AppConfig,
        password: PasswordConfig,
        users: Arc<dyn CredentialStore>,
        store: Arc<dyn KeyValueStore>,
        mail: MailQueue,
    ) -> Result<Self, AuthSetupError> {
        let sessions = Arc::new(SessionManager::new(
            (&config.jwt).into(),
            &config.session,
            &password,
            store.clone(),
            users.clone(),
        )?);

        let codes = OneTimeCodeManager::new(
            config.one_time_code.expiration_secs,
            store,
            users.clone(),
            sessions.clone(),
            mail.clone(),
        );

        let resets = PasswordResetManager::new(
            &config.password_reset,
            password.clone(),
            users.clone(),
            sessions.clone(),
            mail,
        )?;

        Ok(Self {
            users,
            sessions,
            codes,
            resets,
            password,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn resets(&self) -> &PasswordResetManager {
        &self.resets
    }

    fn token_pair(&self, session: Session) -> TokenPairResponse {
        TokenPairResponse {
            access_token: session.access.token,
            refresh_token: session.refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: self.sessions.jwt_config().access_expiration_secs,
        }
    }

    /// Create an account
    pub async fn register(
        &self,
        request: RegisterRequest,
        context: &RequestContext,
    ) -> Result<UserInfo, AppError> {
        let fail = |reason: String| {
            audit_log(&AuditEvent::RegistrationFailure {
                username: request.username.clone(),
                reason,
                ip_address: context.ip_address.clone(),
            });
        };

        if let Err(e) = validate_registration(&request) {
            fail("validation failed".to_string());
            return Err(e);
        }

        let password_hash =
            hash_password_with_config(&request.password, &self.password).map_err(password_error)?;

        let user = match self
            .users
            .create(NewUser {
                username: request.username.clone(),
                email: request.email.clone(),
                password_hash,
            })
            .await
        {
            Ok(user) => user,
            Err(e) => {
                fail(e.to_string());
                return Err(AppError::from(e));
            }
        };

        audit_log(&AuditEvent::RegistrationSuccess {
            user_id: user.id,
            username: user.username.clone(),
            ip_address: context.ip_address.clone(),
        });

        Ok(UserInfo::from(&user))
    }

    /// Verify credentials and start a session
    pub async fn login(
        &self,
        request: LoginRequest,
        context: &RequestContext,
    ) -> Result<TokenPairResponse, AppError> {
        request.validate()?;

        match self
            .sessions
            .authenticate(&request.identifier, &request.password)
            .await
        {
            Ok((user, session)) => {
                audit_log(&AuditEvent::LoginSuccess {
                    user_id: user.id,
                    identifier: request.identifier,
                    ip_address: context.ip_address.clone(),
                    user_agent: context.user_agent.clone(),
                });
                Ok(self.token_pair(session))
            }
            Err(e) => {
                if matches!(e, SessionError::InvalidCredentials) {
                    audit_log(&AuditEvent::LoginFailure {
                        identifier: request.identifier,
                        ip_address: context.ip_address.clone(),
                        user_agent: context.user_agent.clone(),
                    });
                }
                Err(session_error(e))
            }
        }
    }

    /// New access token for the holder of a refresh token
    pub async fn refresh(
        &self,
        caller: &AuthenticatedUser,
        context: &RequestContext,
    ) -> Result<AccessTokenResponse, AppError> {
        let access = self
            .sessions
            .refresh_access(caller.user_id, caller.role.as_deref())
            .await
            .map_err(session_error)?;

        audit_log(&AuditEvent::TokenRefresh {
            user_id: caller.user_id,
            ip_address: context.ip_address.clone(),
        });

        Ok(AccessTokenResponse {
            access_token: access.token,
            token_type: "Bearer".to_string(),
            expires_in: self.sessions.jwt_config().access_expiration_secs,
        })
    }

    /// Revoke the presented access token and, optionally, more
    ///
    /// Never fails once the caller is authenticated; revocation errors are
    /// logged by the session manager.
    pub async fn logout(
        &self,
        caller: &AuthenticatedUser,
        request: LogoutRequest,
        context: &RequestContext,
    ) -> Result<MessageResponse, AppError> {
        self.sessions
            .revoke(&caller.jti, caller.token_type, caller.expires_at, caller.user_id)
            .await;

        if let Some(refresh_token) = request.refresh_token.as_deref() {
            match self.sessions.parse(refresh_token) {
                Ok(claims)
                    if claims.typ == TokenType::Refresh
                        && claims.sub == caller.user_id.to_string() =>
                {
                    self.sessions.revoke_claims(&claims).await;
                }
                Ok(_) => {
                    tracing::warn!(user_id = %caller.user_id, "Refresh token passed to logout belongs to another session type or user, ignored");
                }
                Err(e) => {
                    tracing::debug!(user_id = %caller.user_id, error = %e, "Unusable refresh token passed to logout, ignored");
                }
            }
        }

        let logout_all_devices = request.logout_all_devices.unwrap_or(false);
        if logout_all_devices {
            let count = self.sessions.revoke_all(caller.user_id).await;
            audit_log(&AuditEvent::SessionsRevoked {
                user_id: caller.user_id,
                count,
                trigger: "logout_all_devices".to_string(),
            });
        }

        audit_log(&AuditEvent::Logout {
            user_id: caller.user_id,
            jti: caller.jti.clone(),
            logout_all_devices,
            ip_address: context.ip_address.clone(),
        });

        Ok(MessageResponse::new("Logged out successfully"))
    }

    /// Profile of the caller
    pub async fn me(&self, caller: &AuthenticatedUser) -> Result<UserInfo, AppError> {
        let user = self
            .users
            .find_by_id(caller.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        Ok(UserInfo::from(&user))
    }

    /// Always answers with the same message, whether or not the account exists
    pub async fn request_password_reset(
        &self,
        request: EmailRequest,
        context: &RequestContext,
    ) -> Result<MessageResponse, AppError> {
        request.validate()?;

        let account_exists = match self.resets.request_reset(&request.email).await {
            Ok(queued) => queued,
            Err(e) => {
                error!(error = %e, "Password reset request failed");
                false
            }
        };

        audit_log(&AuditEvent::PasswordResetRequested {
            account_exists,
            ip_address: context.ip_address.clone(),
        });

        Ok(MessageResponse::new(RESET_REQUESTED_MESSAGE))
    }

    /// Apply a reset token and end every session of the account
    pub async fn reset_password(
        &self,
        request: ResetPasswordRequest,
        context: &RequestContext,
    ) -> Result<MessageResponse, AppError> {
        request.validate()?;

        let result = self
            .resets
            .complete_reset(&request.token, &request.password)
            .await;

        let user = match result {
            Ok(user) => user,
            Err(e) => {
                audit_log(&AuditEvent::PasswordResetFailed {
                    reason: e.to_string(),
                    ip_address: context.ip_address.clone(),
                });
                return Err(reset_error(e));
            }
        };

        audit_log(&AuditEvent::PasswordResetCompleted {
            user_id: user.id,
            ip_address: context.ip_address.clone(),
        });

        Ok(MessageResponse::new("Password has been reset"))
    }

    /// Mail a one-time login code
    pub async fn request_one_time_code(
        &self,
        request: EmailRequest,
        context: &RequestContext,
    ) -> Result<MessageResponse, AppError> {
        request.validate()?;

        self.codes.request(&request.email).await.map_err(|e| match e {
            RequestCodeError::UserNotFound => AppError::NotFound("User not found".to_string()),
            RequestCodeError::StoreUnavailable(msg) => AppError::ServiceUnavailable(msg),
            RequestCodeError::Store(e) => AppError::from(e),
        })?;

        audit_log(&AuditEvent::OneTimeCodeIssued {
            email: request.email,
            ip_address: context.ip_address.clone(),
        });

        Ok(MessageResponse::new(
            "A one-time code has been sent to your email address.",
        ))
    }

    /// Exchange a one-time code for a session
    pub async fn verify_one_time_code(
        &self,
        request: VerifyCodeRequest,
        context: &RequestContext,
    ) -> Result<TokenPairResponse, AppError> {
        request.validate()?;

        match self.codes.verify(&request.email, &request.code).await {
            Ok((user, session)) => {
                audit_log(&AuditEvent::OneTimeCodeVerified {
                    user_id: user.id,
                    ip_address: context.ip_address.clone(),
                });
                Ok(self.token_pair(session))
            }
            Err(e) => {
                audit_log(&AuditEvent::OneTimeCodeRejected {
                    email: request.email,
                    reason: e.to_string(),
                    ip_address: context.ip_address.clone(),
                });
                Err(match e {
                    VerifyError::NoCode => AppError::BadRequest("Invalid or expired code".to_string()),
                    VerifyError::Mismatch => AppError::BadRequest("Incorrect code".to_string()),
                    VerifyError::UserNotFound => AppError::BadRequest("User not found".to_string()),
                    VerifyError::StoreUnavailable(msg) => AppError::ServiceUnavailable(msg),
                    VerifyError::Store(e) => AppError::from(e),
                    VerifyError::Session(e) => session_error(e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_token_failures_are_client_errors() {
        for e in [ResetTokenError::Expired, ResetTokenError::Invalid] {
            assert!(matches!(
                reset_error(ResetError::Token(e)),
                AppError::BadRequest(_)
            ));
        }
    }

    #[test]
    fn test_reset_clock_failure_is_internal() {
        let err = reset_error(ResetError::Token(ResetTokenError::Clock(
            "second time provided was later than self".to_string(),
        )));
        assert!(matches!(err, AppError::Internal(_)));
        assert!(matches!(
            reset_error(ResetError::Token(ResetTokenError::Key)),
            AppError::Internal(_)
        ));
    }

    #[test]
    fn test_reset_user_not_found_is_bad_request() {
        assert!(matches!(
            reset_error(ResetError::UserNotFound),
            AppError::BadRequest(_)
        ));
    }
}
