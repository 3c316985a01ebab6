//! Warden CLI - operator commands
//!
//! Usage:
//!   warden revoke-all <user-id>
//!   warden is-revoked <jti>
//!   warden reset-token <email>
//!   warden config

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use uuid::Uuid;
use warden_api::auth::session::revoked_key;
use warden_api::auth::{PasswordConfig, ResetTokenSigner, SessionManager};
use warden_core::config::AppConfig;
use warden_core::{CredentialStore, KeyValueStore};
use warden_store::{MemoryCredentialStore, PgCredentialStore, RedisKeyValueStore};

const REDACTED: &str = "<redacted>";

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden authentication server operator CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Revoke every session of a user
    RevokeAll {
        /// User id (token subject)
        user_id: Uuid,
    },
    /// Check whether a token id is on the revocation list
    IsRevoked {
        /// Token `jti` claim
        jti: String,
    },
    /// Mint a password reset token and link for an account
    ResetToken {
        email: String,
    },
    /// Print the effective configuration with secrets redacted
    Config {
        /// Print JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

async fn credential_store(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn CredentialStore>>> {
    if config.database.postgres_url.is_none() {
        return Ok(None);
    }
    let store = PgCredentialStore::connect(&config.database).await?;
    Ok(Some(Arc::new(store)))
}

fn redacted(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    config.jwt.secret = REDACTED.to_string();
    config.password_reset.secret = REDACTED.to_string();
    config.password_reset.salt = REDACTED.to_string();
    if config.mail.password.is_some() {
        config.mail.password = Some(REDACTED.to_string());
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::RevokeAll { user_id } => {
            let store: Arc<dyn KeyValueStore> = Arc::new(RedisKeyValueStore::new(&config.redis)?);
            let users: Arc<dyn CredentialStore> = match credential_store(&config).await? {
                Some(users) => users,
                None => Arc::new(MemoryCredentialStore::new()),
            };
            let sessions = SessionManager::new(
                (&config.jwt).into(),
                &config.session,
                &PasswordConfig::lightweight(),
                store,
                users,
            )?;

            let count = sessions.revoke_all(user_id).await;
            println!("Revoked {count} token(s) for user {user_id}");
        }
        Commands::IsRevoked { jti } => {
            let store = RedisKeyValueStore::new(&config.redis)?;
            let record = store
                .get(&revoked_key(&jti))
                .await
                .context("Revocation store unavailable")?;

            match record {
                Some(_) => {
                    let ttl = store.ttl(&revoked_key(&jti)).await?.unwrap_or(-1);
                    println!("{jti}: revoked (expires in {ttl}s)");
                }
                None => println!("{jti}: not revoked"),
            }
        }
        Commands::ResetToken { email } => {
            match credential_store(&config).await? {
                Some(users) => {
                    if users.find_by_email(&email).await?.is_none() {
                        bail!("No account registered with {email}");
                    }
                }
                None => tracing::warn!("No PostgreSQL URL configured, account existence not checked"),
            }

            let signer = ResetTokenSigner::from_config(&config.password_reset)?;
            let token = signer.generate(&email)?;
            println!("Token: {token}");
            println!(
                "Link:  {}/reset-password?token={token}",
                config.password_reset.frontend_url.trim_end_matches('/')
            );
            println!("Valid for {}s", signer.max_age_secs());
        }
        Commands::Config { json } => {
            let shown = redacted(&config);
            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                println!("{}", toml::to_string_pretty(&shown)?);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_revoke_all() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["warden", "revoke-all", &id.to_string()]).unwrap();
        assert!(matches!(cli.command, Commands::RevokeAll { user_id } if user_id == id));

        assert!(Cli::try_parse_from(["warden", "revoke-all", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = AppConfig::default();
        config.jwt.secret = "top-secret".to_string();
        config.mail.password = Some("smtp-pass".to_string());

        let rendered = toml::to_string_pretty(&redacted(&config)).unwrap();
        assert!(!rendered.contains("top-secret"));
        assert!(!rendered.contains("smtp-pass"));
        assert!(rendered.contains(REDACTED));
    }
}
