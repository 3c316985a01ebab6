//! In-memory collaborators
//!
//! `MemoryKeyValueStore` mirrors the subset of Redis semantics Warden relies
//! on (string values with expiry, sets, atomic get-and-delete). Expired
//! entries are dropped lazily on access. It can be switched offline to
//! exercise outage handling.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;
use warden_core::{CredentialStore, KeyValueStore, NewUser, Result, User, WardenError};

// ============================================================================
// Key-Value Store
// ============================================================================

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local key-value store
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, Entry>>,
    offline: AtomicBool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails with `StoreUnavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(WardenError::StoreUnavailable(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn wrong_type(key: &str) -> WardenError {
        WardenError::StoreUnavailable(format!("WRONGTYPE operation against key {key}"))
    }
}

/// Remove `key` if it has expired, then return the live entry
fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_online()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Set(_),
                ..
            }) => Err(Self::wrong_type(key)),
            Some(_) => match entries.remove(key) {
                Some(Entry {
                    value: Value::Text(text),
                    ..
                }) => Ok(Some(text)),
                _ => Ok(None),
            },
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        if let Some(entry) = live_entry(&mut entries, key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(live_entry(&mut entries, key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now).as_secs() as i64))
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                set.extend(members.iter().cloned());
                Ok(())
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(members.iter().cloned().collect()),
                        expires_at: None,
                    },
                );
                Ok(())
            }
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        let now_empty = match live_entry(&mut entries, key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                set.remove(member);
                set.is_empty()
            }
            Some(_) => return Err(Self::wrong_type(key)),
            None => false,
        };
        // Redis deletes a set once its last member is removed
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// Credential Store
// ============================================================================

/// Process-local credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User> {
        let mut users = self.users.write().await;

        if users.values().any(|u| u.username == new_user.username) {
            return Err(WardenError::Duplicate {
                field: "username".to_string(),
            });
        }
        if users.values().any(|u| u.email == new_user.email) {
            return Err(WardenError::Duplicate {
                field: "email".to_string(),
            });
        }

        let user = User::from_new(new_user);
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| WardenError::NotFound(format!("user {id}")))?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
        }
    }

    #[tokio::test]
    async fn test_set_get_and_ttl() {
        let store = MemoryKeyValueStore::new();
        store.set_ex("revoked:a", "true", 600).await.unwrap();

        assert_eq!(store.get("revoked:a").await.unwrap().as_deref(), Some("true"));
        let ttl = store.ttl("revoked:a").await.unwrap().unwrap();
        assert!((595..=600).contains(&ttl), "ttl was {ttl}");
        assert_eq!(store.ttl("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_value_disappears() {
        let store = MemoryKeyValueStore::new();
        store.set_ex("short", "v", 0).await.unwrap();
        assert_eq!(store.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_consumes_value() {
        let store = MemoryKeyValueStore::new();
        store.set_ex("code", "012345", 60).await.unwrap();

        assert_eq!(store.take("code").await.unwrap().as_deref(), Some("012345"));
        assert_eq!(store.take("code").await.unwrap(), None);
        assert_eq!(store.get("code").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryKeyValueStore::new();
        store
            .sadd("user_tokens:1", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        store.sadd("user_tokens:1", &["c".to_string()]).await.unwrap();
        store.srem("user_tokens:1", "b").await.unwrap();

        let mut members = store.smembers("user_tokens:1").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a".to_string(), "c".to_string()]);

        store.srem("user_tokens:1", "a").await.unwrap();
        store.srem("user_tokens:1", "c").await.unwrap();
        assert!(store.smembers("user_tokens:1").await.unwrap().is_empty());
        assert_eq!(store.ttl("user_tokens:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expire_applies_to_sets() {
        let store = MemoryKeyValueStore::new();
        store.sadd("set", &["x".to_string()]).await.unwrap();
        assert_eq!(store.ttl("set").await.unwrap(), None);

        store.expire("set", 120).await.unwrap();
        assert!(store.ttl("set").await.unwrap().is_some());

        store.expire("set", 0).await.unwrap();
        assert!(store.smembers("set").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = MemoryKeyValueStore::new();
        store.set_ex("k", "v", 60).await.unwrap();
        assert!(store.sadd("k", &["m".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_offline_store_fails_every_call() {
        let store = MemoryKeyValueStore::new();
        store.set_offline(true);

        assert!(matches!(
            store.get("k").await,
            Err(WardenError::StoreUnavailable(_))
        ));
        assert!(store.ping().await.is_err());

        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_credential_store_lookup() {
        let store = MemoryCredentialStore::new();
        let alice = store.create(new_user("alice", "alice@x.com")).await.unwrap();

        assert_eq!(
            store.find_by_username("alice").await.unwrap().unwrap().id,
            alice.id
        );
        assert_eq!(
            store.find_by_email("alice@x.com").await.unwrap().unwrap().id,
            alice.id
        );
        assert_eq!(
            store
                .find_by_identifier_or("alice@x.com")
                .await
                .unwrap()
                .unwrap()
                .id,
            alice.id
        );
        assert!(store.find_by_identifier_or("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credential_store_rejects_either_duplicate() {
        let store = MemoryCredentialStore::new();
        store.create(new_user("alice", "alice@x.com")).await.unwrap();

        let same_name = store.create(new_user("alice", "other@x.com")).await;
        assert!(matches!(same_name, Err(WardenError::Duplicate { field }) if field == "username"));

        let same_email = store.create(new_user("alice2", "alice@x.com")).await;
        assert!(matches!(same_email, Err(WardenError::Duplicate { field }) if field == "email"));

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_password_hash() {
        let store = MemoryCredentialStore::new();
        let user = store.create(new_user("carol", "carol@x.com")).await.unwrap();

        store.update_password_hash(user.id, "new-hash").await.unwrap();
        let reloaded = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.password_hash, "new-hash");

        let missing = store.update_password_hash(Uuid::new_v4(), "x").await;
        assert!(matches!(missing, Err(WardenError::NotFound(_))));
    }
}
