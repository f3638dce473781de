//! The namespaced key-value cache collaborator (spec §1, §5, §9).
//!
//! The core only specifies a contract — `(namespace, key) -> value` with a
//! TTL, checked on read — and exposes it so a scheduler can hold a cache
//! without depending on any particular backend or eviction policy beyond
//! what the spec already states. Node bodies that want memoized results
//! across invocations are the expected consumer; the scheduler itself
//! never reads or writes the cache on their behalf.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

/// A namespaced, TTL-checked key-value contract. `namespace` is typically a
/// node id (and, for callers that care, a graph version), so cached values
/// from unrelated nodes or incompatible graph revisions never collide.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Option<Value>;

    async fn set(&self, namespace: &str, key: &str, value: Value, ttl: Option<Duration>);

    async fn invalidate(&self, namespace: &str, key: &str);

    async fn clear_namespace(&self, namespace: &str);
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process [`Cache`] backed by an `RwLock<HashMap>`, mirroring the
/// in-memory checkpoint saver's locking pattern. Expired entries are
/// evicted lazily, on the next `get` that observes them.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<(String, String), Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: &str, key: &str) -> (String, String) {
        (namespace.to_string(), key.to_string())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let key = Self::key(namespace, key);
        {
            let entries = self.entries.read();
            match entries.get(&key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.entries.write().remove(&key);
        None
    }

    async fn set(&self, namespace: &str, key: &str, value: Value, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.write().insert(Self::key(namespace, key), Entry { value, expires_at });
    }

    async fn invalidate(&self, namespace: &str, key: &str) {
        self.entries.write().remove(&Self::key(namespace, key));
    }

    async fn clear_namespace(&self, namespace: &str) {
        self.entries.write().retain(|(ns, _), _| ns != namespace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = MemoryCache::new();
        cache.set("node-a", "k", Value::from(42), None).await;
        assert_eq!(cache.get("node-a", "k").await, Some(Value::from(42)));
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_read() {
        let cache = MemoryCache::new();
        cache.set("node-a", "k", Value::from(1), Some(Duration::from_millis(1))).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.get("node-a", "k").await, None);
    }

    #[tokio::test]
    async fn clear_namespace_only_affects_that_namespace() {
        let cache = MemoryCache::new();
        cache.set("a", "k", Value::from(1), None).await;
        cache.set("b", "k", Value::from(2), None).await;
        cache.clear_namespace("a").await;
        assert_eq!(cache.get("a", "k").await, None);
        assert_eq!(cache.get("b", "k").await, Some(Value::from(2)));
    }
}
