//! PostgreSQL credential store
//!
//! Provides user persistence using SQLx and PostgreSQL. Uniqueness of
//! username and email is enforced by the schema, so concurrent
//! registrations cannot both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use uuid::Uuid;
use warden_core::{CredentialStore, DatabaseConfig, NewUser, Result, User, WardenError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY,
    username VARCHAR(50) NOT NULL,
    email TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    role TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT users_username_key UNIQUE (username),
    CONSTRAINT users_email_key UNIQUE (email)
)
"#;

const SELECT_USER: &str =
    "SELECT id, username, email, password_hash, role, created_at FROM users";

/// PostgreSQL credential store
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    /// Connect using the configured URL and pool size
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.postgres_url.as_deref().ok_or_else(|| {
            WardenError::ConfigError("database.postgres_url is not set".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.postgres_pool_size)
            .connect(url)
            .await
            .map_err(|e| WardenError::DatabaseError(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `users` table if it does not exist
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| WardenError::DatabaseError(format!("Failed to create schema: {e}")))?;
        Ok(())
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<User>> {
        let sql = format!("{SELECT_USER} WHERE {column} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| WardenError::DatabaseError(format!("Failed to fetch user: {e}")))?;
        Ok(row.map(User::from))
    }
}

/// User row from database
#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    role: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            role: row.role,
            created_at: row.created_at,
        }
    }
}

/// Map a unique-constraint violation to the field that collided
fn duplicate_field(err: &sqlx::Error) -> Option<&'static str> {
    let db_err = err.as_database_error()?;
    if db_err.code().as_deref() != Some("23505") {
        return None;
    }
    match db_err.constraint() {
        Some("users_email_key") => Some("email"),
        _ => Some("username"),
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let sql = format!("{SELECT_USER} WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| WardenError::DatabaseError(format!("Failed to fetch user: {e}")))?;
        Ok(row.map(User::from))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find_one("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_one("email", email).await
    }

    async fn create(&self, new_user: NewUser) -> Result<User> {
        let user = User::from_new(new_user);

        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, role, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.role)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match duplicate_field(&e) {
            Some(field) => WardenError::Duplicate {
                field: field.to_string(),
            },
            None => WardenError::DatabaseError(format!("Failed to create user: {e}")),
        })?;

        Ok(user)
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| WardenError::DatabaseError(format!("Failed to update password: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(WardenError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
