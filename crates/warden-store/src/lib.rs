//! Warden Store - Collaborator implementations
//!
//! Concrete backends for the traits defined in `warden-core`:
//! - Redis key-value store (revocation records, token index, one-time codes)
//! - PostgreSQL credential store
//! - In-memory variants of both for development and tests

pub mod memory;
pub mod postgres_store;
pub mod redis_store;

pub use memory::{MemoryCredentialStore, MemoryKeyValueStore};
pub use postgres_store::PgCredentialStore;
pub use redis_store::RedisKeyValueStore;
