//! Shared state store
//!
//! All cluster and cache state lives in one Redis-compatible key-value
//! store with TTL support. The `Store` trait is the seam: nodes get a
//! `RedisStore` from bootstrap, tests get a `MemoryStore`. Connections are
//! passed down explicitly; there is no process-global client.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::common::utils::epoch_secs;
use crate::Result;

/// Shared handle used throughout the crate
pub type SharedStore = Arc<dyn Store>;

/// Key-value store with TTL and key-pattern enumeration
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    async fn set_raw(&self, key: &str, value: &str) -> Result<()>;

    /// Set a TTL in seconds on an existing key
    async fn expire(&self, key: &str, secs: u64) -> Result<()>;

    /// Enumerate keys matching a glob pattern (`*` wildcards only)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Get a key decoded as JSON; missing key yields `None`
    async fn get_json(&self, key: &str) -> Result<Option<Value>> {
        match self.get_raw(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Set a key to a JSON-encoded value
    async fn set_json(&self, key: &str, value: &Value) -> Result<()> {
        self.set_raw(key, &serde_json::to_string(value)?).await
    }
}

// === Redis backend ===

/// Store backed by a Redis server
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect to the store at `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(redis::AsyncCommands::get(&mut conn, key).await?)
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::AsyncCommands::set::<_, _, ()>(&mut conn, key, value).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::AsyncCommands::expire::<_, ()>(&mut conn, key, secs as i64).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(redis::AsyncCommands::keys(&mut conn, pattern).await?)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::AsyncCommands::del::<_, ()>(&mut conn, key).await?;
        Ok(())
    }
}

// === In-memory backend ===

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<u64>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(deadline) if epoch_secs() >= deadline)
    }
}

/// In-memory store with per-key expiry, checked lazily on access.
///
/// Single-process only; used as the test double and for store-less
/// development runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// New store wrapped in the shared handle type
    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, secs: u64) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(epoch_secs() + secs);
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired() && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}

/// Match a key against a `*`-only glob pattern
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(after) => rest = after,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    // Pattern ended with '*'
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("cluster:nodes:*:last_seen", "cluster:nodes:a.1:last_seen"));
        assert!(!glob_match("cluster:nodes:*:last_seen", "cluster:nodes:a.1:started"));
        assert!(glob_match("cache:svc:*", "cache:svc:abc123:data"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exact:no"));
    }

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let store = MemoryStore::new();
        store.set_json("k", &json!({"a": 1})).await.unwrap();
        assert_eq!(store.get_json("k").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(store.get_json("missing").await.unwrap(), None);

        store.del("k").await.unwrap();
        assert_eq!(store.get_json("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_expiry() {
        let store = MemoryStore::new();
        store.set_raw("k", "v").await.unwrap();
        // Zero TTL expires on the next read
        store.expire("k", 0).await.unwrap();
        assert_eq!(store.get_raw("k").await.unwrap(), None);
        assert!(store.keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_keys() {
        let store = MemoryStore::new();
        store.set_raw("cluster:nodes:a:last_seen", "1").await.unwrap();
        store.set_raw("cluster:nodes:b:last_seen", "2").await.unwrap();
        store.set_raw("cluster:master_node", "a").await.unwrap();

        let mut keys = store.keys("cluster:nodes:*:last_seen").await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec!["cluster:nodes:a:last_seen", "cluster:nodes:b:last_seen"]
        );
    }
}
