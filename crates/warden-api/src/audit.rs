//! Security audit logging for authentication events
//!
//! All audit events are logged at INFO level with the "audit" target, so they
//! can be filtered and routed separately from application logs, e.g.
//! `RUST_LOG=audit=info`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    RegistrationSuccess {
        user_id: Uuid,
        username: String,
        ip_address: Option<String>,
    },

    RegistrationFailure {
        username: String,
        reason: String,
        ip_address: Option<String>,
    },

    LoginSuccess {
        user_id: Uuid,
        identifier: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    LoginFailure {
        identifier: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    Logout {
        user_id: Uuid,
        jti: String,
        logout_all_devices: bool,
        ip_address: Option<String>,
    },

    TokenRefresh {
        user_id: Uuid,
        ip_address: Option<String>,
    },

    /// Rejected bearer token (bad, expired, wrong type or revoked)
    InvalidToken {
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    PasswordResetRequested {
        /// Whether a mail was actually queued; never shown to the client
        account_exists: bool,
        ip_address: Option<String>,
    },

    PasswordResetCompleted {
        user_id: Uuid,
        ip_address: Option<String>,
    },

    PasswordResetFailed {
        reason: String,
        ip_address: Option<String>,
    },

    OneTimeCodeIssued {
        email: String,
        ip_address: Option<String>,
    },

    OneTimeCodeVerified {
        user_id: Uuid,
        ip_address: Option<String>,
    },

    OneTimeCodeRejected {
        email: String,
        reason: String,
        ip_address: Option<String>,
    },

    /// Every session of a user revoked at once
    SessionsRevoked {
        user_id: Uuid,
        count: usize,
        trigger: String,
    },
}

impl AuditEvent {
    /// Short human-readable label used as the log message
    pub fn label(&self) -> &'static str {
        match self {
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::TokenRefresh { .. } => "Access token refreshed",
            AuditEvent::InvalidToken { .. } => "Invalid token used",
            AuditEvent::PasswordResetRequested { .. } => "Password reset requested",
            AuditEvent::PasswordResetCompleted { .. } => "Password reset completed",
            AuditEvent::PasswordResetFailed { .. } => "Password reset failed",
            AuditEvent::OneTimeCodeIssued { .. } => "One-time code issued",
            AuditEvent::OneTimeCodeVerified { .. } => "One-time code verified",
            AuditEvent::OneTimeCodeRejected { .. } => "One-time code rejected",
            AuditEvent::SessionsRevoked { .. } => "All sessions revoked",
        }
    }

    fn user_id(&self) -> Option<Uuid> {
        match self {
            AuditEvent::RegistrationSuccess { user_id, .. }
            | AuditEvent::LoginSuccess { user_id, .. }
            | AuditEvent::Logout { user_id, .. }
            | AuditEvent::TokenRefresh { user_id, .. }
            | AuditEvent::PasswordResetCompleted { user_id, .. }
            | AuditEvent::OneTimeCodeVerified { user_id, .. }
            | AuditEvent::SessionsRevoked { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }
}

/// Client metadata attached to audit events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Log a security audit event
///
/// The full event is attached as JSON in the `event` field for log
/// aggregators; `user_id` is duplicated as its own field when known.
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    match event.user_id() {
        Some(user_id) => info!(
            target: "audit",
            timestamp = %timestamp,
            user_id = %user_id,
            event = %event_json,
            "{}",
            event.label()
        ),
        None => info!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            "{}",
            event.label()
        ),
    }
}

/// Client IP from X-Forwarded-For or X-Real-IP
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            // First entry is the client
            if let Some(first_ip) = xff_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}
