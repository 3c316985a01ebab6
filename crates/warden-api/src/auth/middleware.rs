/// Authentication middleware for protecting routes
///
/// Extracts the bearer token, validates it, checks the expected token type and
/// the revocation store, then adds [`AuthenticatedUser`] to request extensions.
use super::jwt::{JwtError, TokenType};
use crate::audit::{audit_log, AuditEvent, RequestContext};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Caller identity taken from a validated token
///
/// Extract in handlers with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    /// JWT ID of the presented token
    pub jti: String,
    pub token_type: TokenType,
    /// Expiration timestamp (Unix epoch)
    pub expires_at: u64,
    pub role: Option<String>,
}

/// Authentication middleware errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    #[error("Invalid Authorization header format")]
    InvalidAuthHeader,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] JwtError),

    #[error("{expected} token required")]
    WrongTokenType { expected: TokenType },

    #[error("Token has been revoked")]
    TokenRevoked,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::MissingAuthHeader => "Missing Authorization header".to_string(),
            AuthError::InvalidAuthHeader => "Invalid Authorization header format".to_string(),
            AuthError::InvalidToken(JwtError::Expired) => "Token has expired".to_string(),
            AuthError::InvalidToken(_) => "Invalid token".to_string(),
            AuthError::WrongTokenType { expected } => format!("{expected} token required"),
            AuthError::TokenRevoked => "Token has been revoked".to_string(),
        };

        (
            StatusCode::UNAUTHORIZED,
            Json(ApiError::new("UNAUTHORIZED", message)),
        )
            .into_response()
    }
}

/// Require a valid, unrevoked access token
///
/// ```ignore
/// let app = Router::new()
///     .route("/auth/me", get(me_handler))
///     .route_layer(middleware::from_fn_with_state(state.clone(), require_access));
/// ```
pub async fn require_access(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    authenticate_request(&state, request, next, TokenType::Access).await
}

/// Require a valid, unrevoked refresh token
pub async fn require_refresh(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    authenticate_request(&state, request, next, TokenType::Refresh).await
}

async fn authenticate_request(
    state: &AppState,
    mut request: Request<Body>,
    next: Next,
    expected: TokenType,
) -> Result<Response, AuthError> {
    let context = RequestContext::from_headers(request.headers());

    let identified = identify(state, request.headers(), expected).await;
    match identified {
        Ok(user) => {
            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Err(e) => {
            audit_log(&AuditEvent::InvalidToken {
                reason: e.to_string(),
                ip_address: context.ip_address,
                user_agent: context.user_agent,
            });
            Err(e)
        }
    }
}

async fn identify(
    state: &AppState,
    headers: &axum::http::HeaderMap,
    expected: TokenType,
) -> Result<AuthenticatedUser, AuthError> {
    let token = bearer_token(headers)?;

    let sessions = state.auth.sessions();
    let claims = sessions.parse(token)?;

    if claims.typ != expected {
        return Err(AuthError::WrongTokenType { expected });
    }

    let user_id = claims.user_id()?;

    if sessions.is_revoked(&claims.jti).await {
        return Err(AuthError::TokenRevoked);
    }

    Ok(AuthenticatedUser {
        user_id,
        jti: claims.jti,
        token_type: claims.typ,
        expires_at: claims.exp,
        role: claims.role,
    })
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::InvalidAuthHeader)
}
