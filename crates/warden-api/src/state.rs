//! Application state management

use crate::auth::{AuthService, PasswordConfig};
use crate::mail::MailQueue;
use std::sync::Arc;
use std::time::Instant;
use warden_core::config::AppConfig;
use warden_core::{CredentialStore, KeyValueStore};

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Revocation and one-time-code store, also pinged by `/ready`
    pub store: Arc<dyn KeyValueStore>,
    pub auth: AuthService,
}

impl AppState {
    /// Wire the authentication service over the given stores and mail queue
    pub fn new(
        config: AppConfig,
        password: PasswordConfig,
        users: Arc<dyn CredentialStore>,
        store: Arc<dyn KeyValueStore>,
        mail: MailQueue,
    ) -> anyhow::Result<Self> {
        let auth = AuthService::new(&config, password, users, store.clone(), mail)?;

        Ok(Self {
            config,
            start_time: Instant::now(),
            store,
            auth,
        })
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
