//! Warden API Server
//!
//! Authentication server: accounts, JWT sessions with revocation, password
//! reset and one-time-code login.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use warden_api::auth::PasswordConfig;
use warden_api::mail::{build_mailer, MailQueue};
use warden_api::{create_router, state::AppState};
use warden_core::config::{AppConfig, LoggingConfig};
use warden_core::CredentialStore;
use warden_store::{MemoryCredentialStore, PgCredentialStore, RedisKeyValueStore};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "warden_api={level},warden_store={level},audit=info,tower_http=info",
            level = logging.level
        )
        .into()
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging);

    let users: Arc<dyn CredentialStore> = if config.database.postgres_url.is_some() {
        let store = PgCredentialStore::connect(&config.database).await?;
        store.init_schema().await?;
        Arc::new(store)
    } else {
        tracing::warn!("No PostgreSQL URL configured, accounts are kept in memory only");
        Arc::new(MemoryCredentialStore::new())
    };

    let store = Arc::new(RedisKeyValueStore::new(&config.redis)?);

    let mailer = build_mailer(&config.mail)?;
    let (mail, _mail_worker) = MailQueue::start(mailer, config.mail.queue_capacity);

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = Arc::new(AppState::new(
        config,
        PasswordConfig::default(),
        users,
        store,
        mail,
    )?);

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Warden API Server starting on http://{}", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
