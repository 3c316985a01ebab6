//! API Integration Tests
//!
//! Drive the full router with in-memory stores and a recording mailer.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use warden_api::auth::PasswordConfig;
use warden_api::mail::testing::RecordingMailer;
use warden_api::mail::MailQueue;
use warden_api::{create_router, state::AppState};
use warden_core::config::AppConfig;
use warden_core::{CredentialStore, KeyValueStore, Mailer, OutboundEmail};
use warden_store::{MemoryCredentialStore, MemoryKeyValueStore};

const PASSWORD: &str = "Abc12345!";

struct TestApp {
    router: Router,
    store: Arc<MemoryKeyValueStore>,
    mailer: Arc<RecordingMailer>,
    mail: MailQueue,
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.jwt.secret = "integration-test-secret".to_string();
    config.password_reset.secret = "integration-reset-secret".to_string();
    config.password_reset.frontend_url = "https://app.example.com".to_string();
    config
}

fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryKeyValueStore::new());
    let users = Arc::new(MemoryCredentialStore::new());
    let mailer = Arc::new(RecordingMailer::new());
    let (mail, _worker) = MailQueue::start(mailer.clone() as Arc<dyn Mailer>, 16);

    let state = AppState::new(
        test_config(),
        PasswordConfig::lightweight(),
        users as Arc<dyn CredentialStore>,
        store.clone() as Arc<dyn KeyValueStore>,
        mail.clone(),
    )
    .unwrap();

    TestApp {
        router: create_router(Arc::new(state)),
        store,
        mailer,
        mail,
    }
}

/// Helper to create a test request
fn create_json_request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(create_json_request("POST", uri, token, Some(body)))
            .await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(create_json_request("GET", uri, token, None)).await
    }

    async fn register(&self, username: &str, email: &str) -> (StatusCode, Value) {
        self.post(
            "/api/v1/auth/register",
            None,
            json!({"username": username, "email": email, "password": PASSWORD}),
        )
        .await
    }

    /// Returns (access_token, refresh_token)
    async fn login(&self, identifier: &str, password: &str) -> (String, String) {
        let (status, body) = self
            .post(
                "/api/v1/auth/login",
                None,
                json!({"identifier": identifier, "password": password}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        (
            body["access_token"].as_str().unwrap().to_string(),
            body["refresh_token"].as_str().unwrap().to_string(),
        )
    }

    async fn login_status(&self, identifier: &str, password: &str) -> StatusCode {
        self.post(
            "/api/v1/auth/login",
            None,
            json!({"identifier": identifier, "password": password}),
        )
        .await
        .0
    }

    /// Push a marker through the mail queue and return everything delivered
    /// up to and including it; the queue is FIFO.
    async fn drain_mail(&self) -> Vec<OutboundEmail> {
        let already = self.mailer.sent().await.len();
        let marker = OutboundEmail {
            to: "marker@test".to_string(),
            subject: "marker".to_string(),
            body: String::new(),
        };
        assert!(self.mail.submit(marker.clone()));

        let mut sent = self.mailer.wait_for(already + 1).await;
        for _ in 0..10 {
            if sent.last() == Some(&marker) {
                break;
            }
            sent = self.mailer.wait_for(sent.len() + 1).await;
        }
        assert_eq!(sent.last(), Some(&marker));

        sent.pop();
        sent.split_off(already)
    }
}

fn reset_token_from(mail: &OutboundEmail) -> String {
    mail.body
        .split("token=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap()
        .to_string()
}

fn code_from(mail: &OutboundEmail) -> String {
    mail.body
        .split("code is: ")
        .nth(1)
        .map(|rest| rest.chars().take(6).collect())
        .unwrap()
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app();

    let (status, json) = app.get("/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_readiness_follows_store() {
    let app = spawn_app();

    let (status, json) = app.get("/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);

    app.store.set_offline(true);
    let (status, json) = app.get("/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["checks"]["key_value_store"], false);
}

#[tokio::test]
async fn test_openapi_document() {
    let app = spawn_app();

    let (status, json) = app.get("/api-docs/openapi.json", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/api/v1/auth/register"].is_object());
    assert!(json["components"]["securitySchemes"]["bearer_auth"].is_object());
}

// =============================================================================
// Registration and Login
// =============================================================================

#[tokio::test]
async fn test_register_login_logout_revokes_access_token() {
    let app = spawn_app();

    let (status, body) = app.register("alice", "alice@x.com").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["username"], "alice");
    assert!(body["message"].is_string());

    let (access, refresh) = app.login("alice", PASSWORD).await;
    assert_ne!(access, refresh);

    let (status, body) = app.get("/api/v1/auth/me", Some(&access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "alice@x.com");

    let (status, _) = app
        .post("/api/v1/auth/logout", Some(&access), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/api/v1/auth/me", Some(&access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Token has been revoked");
}

#[tokio::test]
async fn test_logout_without_body() {
    let app = spawn_app();
    app.register("alice", "alice@x.com").await;
    let (access, _) = app.login("alice", PASSWORD).await;

    let (status, _) = app
        .send(create_json_request("POST", "/api/v1/auth/logout", Some(&access), None))
        .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_register_duplicates_rejected() {
    let app = spawn_app();
    assert_eq!(app.register("alice", "alice@x.com").await.0, StatusCode::CREATED);

    let (status, body) = app.register("alice", "other@x.com").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "DUPLICATE");

    let (status, _) = app.register("bob", "alice@x.com").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_validation_details() {
    let app = spawn_app();

    let (status, body) = app
        .post(
            "/api/v1/auth/register",
            None,
            json!({"username": "a!", "email": "not-an-email", "password": "short"}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    let details = &body["details"];
    assert!(details["username"].is_array());
    assert!(details["email"].is_array());
    assert!(details["password"].is_array());
}

#[tokio::test]
async fn test_login_by_email_and_username_alias() {
    let app = spawn_app();
    app.register("alice", "alice@x.com").await;

    app.login("alice@x.com", PASSWORD).await;

    let (status, body) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({"username": "alice", "password": PASSWORD}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let app = spawn_app();
    app.register("alice", "alice@x.com").await;

    let (status_wrong, body_wrong) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({"identifier": "alice", "password": "Wrong1234!"}),
        )
        .await;
    let (status_unknown, body_unknown) = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({"identifier": "nobody", "password": PASSWORD}),
        )
        .await;

    assert_eq!(status_wrong, StatusCode::UNAUTHORIZED);
    assert_eq!(status_unknown, StatusCode::UNAUTHORIZED);
    assert_eq!(body_wrong, body_unknown);
}

// =============================================================================
// Token handling
// =============================================================================

#[tokio::test]
async fn test_protected_route_requires_bearer() {
    let app = spawn_app();

    let (status, body) = app.get("/api/v1/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Missing Authorization header");

    let (status, _) = app.get("/api/v1/auth/me", Some("garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_requires_refresh_token() {
    let app = spawn_app();
    app.register("alice", "alice@x.com").await;
    let (access, refresh) = app.login("alice", PASSWORD).await;

    let (status, body) = app
        .post("/api/v1/auth/refresh", Some(&access), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "refresh token required");

    let (status, body) = app
        .post("/api/v1/auth/refresh", Some(&refresh), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let new_access = body["access_token"].as_str().unwrap();

    let (status, _) = app.get("/api/v1/auth/me", Some(new_access)).await;
    assert_eq!(status, StatusCode::OK);

    // Refresh tokens do not open access-protected routes
    let (status, _) = app.get("/api/v1/auth/me", Some(&refresh)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_can_revoke_refresh_token() {
    let app = spawn_app();
    app.register("alice", "alice@x.com").await;
    let (access, refresh) = app.login("alice", PASSWORD).await;

    let (status, _) = app
        .post(
            "/api/v1/auth/logout",
            Some(&access),
            json!({"refresh_token": refresh}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/api/v1/auth/refresh", Some(&refresh), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_all_devices() {
    let app = spawn_app();
    app.register("alice", "alice@x.com").await;
    let (laptop, _) = app.login("alice", PASSWORD).await;
    let (phone, phone_refresh) = app.login("alice", PASSWORD).await;

    let (status, _) = app
        .post(
            "/api/v1/auth/logout",
            Some(&laptop),
            json!({"logout_all_devices": true}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(app.get("/api/v1/auth/me", Some(&phone)).await.0, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .post("/api/v1/auth/refresh", Some(&phone_refresh), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_store_outage_fails_closed() {
    let app = spawn_app();
    app.register("alice", "alice@x.com").await;
    let (access, _) = app.login("alice", PASSWORD).await;

    app.store.set_offline(true);
    let (status, _) = app.get("/api/v1/auth/me", Some(&access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    app.store.set_offline(false);
    let (status, _) = app.get("/api/v1/auth/me", Some(&access)).await;
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// Password Reset
// =============================================================================

#[tokio::test]
async fn test_password_reset_unknown_email_sends_nothing() {
    let app = spawn_app();

    let (status, body) = app
        .post(
            "/api/v1/auth/request_password_reset",
            None,
            json!({"email": "ghost@x.com"}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("If an account"));
    assert!(app.drain_mail().await.is_empty());
}

#[tokio::test]
async fn test_password_reset_flow() {
    let app = spawn_app();
    app.register("alice", "alice@x.com").await;
    let (old_access, _) = app.login("alice", PASSWORD).await;

    let (status, unknown_body) = app
        .post(
            "/api/v1/auth/request_password_reset",
            None,
            json!({"email": "ghost@x.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, known_body) = app
        .post(
            "/api/v1/auth/request_password_reset",
            None,
            json!({"email": "alice@x.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(known_body, unknown_body);

    let mails = app.drain_mail().await;
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].to, "alice@x.com");
    assert!(mails[0]
        .body
        .contains("https://app.example.com/reset-password?token="));
    let token = reset_token_from(&mails[0]);

    let (status, _) = app
        .post(
            "/api/v1/auth/reset_password",
            None,
            json!({"token": token, "password": "weak"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/api/v1/auth/reset_password",
            None,
            json!({"token": token, "new_password": "N3wPassw0rd#"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(app.login_status("alice", PASSWORD).await, StatusCode::UNAUTHORIZED);
    app.login("alice", "N3wPassw0rd#").await;

    // Sessions from before the reset are gone
    let (status, _) = app.get("/api/v1/auth/me", Some(&old_access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_reset_password_rejects_bad_token() {
    let app = spawn_app();

    let (status, body) = app
        .post(
            "/api/v1/auth/reset_password",
            None,
            json!({"token": "not.a.token", "password": "N3wPassw0rd#"}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid or expired token");
}

// =============================================================================
// One-time codes
// =============================================================================

#[tokio::test]
async fn test_one_time_code_unknown_email() {
    let app = spawn_app();

    let (status, _) = app
        .post(
            "/api/v1/auth/one_time_code/request",
            None,
            json!({"email": "ghost@x.com"}),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_one_time_code_login() {
    let app = spawn_app();
    app.register("alice", "alice@x.com").await;

    let (status, _) = app
        .post(
            "/api/v1/auth/one_time_code/request",
            None,
            json!({"email": "alice@x.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let mails = app.drain_mail().await;
    assert_eq!(mails.len(), 1);
    let code = code_from(&mails[0]);

    let (status, body) = app
        .post(
            "/api/v1/auth/one_time_code/verify",
            None,
            json!({"email": "alice@x.com", "code": code}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let access = body["access_token"].as_str().unwrap();
    assert_eq!(app.get("/api/v1/auth/me", Some(access)).await.0, StatusCode::OK);

    // Single use
    let (status, _) = app
        .post(
            "/api/v1/auth/one_time_code/verify",
            None,
            json!({"email": "alice@x.com", "code": code}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_one_time_code_wrong_guess_burns_code() {
    let app = spawn_app();
    app.register("alice", "alice@x.com").await;
    app.post(
        "/api/v1/auth/one_time_code/request",
        None,
        json!({"email": "alice@x.com"}),
    )
    .await;
    let code = code_from(&app.drain_mail().await[0]);
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let (status, body) = app
        .post(
            "/api/v1/auth/one_time_code/verify",
            None,
            json!({"email": "alice@x.com", "code": wrong}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Incorrect code");

    let (status, _) = app
        .post(
            "/api/v1/auth/one_time_code/verify",
            None,
            json!({"email": "alice@x.com", "code": code}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_one_time_code_store_outage() {
    let app = spawn_app();
    app.register("alice", "alice@x.com").await;
    app.store.set_offline(true);

    let (status, body) = app
        .post(
            "/api/v1/auth/one_time_code/request",
            None,
            json!({"email": "alice@x.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");

    let (status, _) = app
        .post(
            "/api/v1/auth/one_time_code/verify",
            None,
            json!({"email": "alice@x.com", "code": "123456"}),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
