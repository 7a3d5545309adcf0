//! Keyed state storage for rate buckets and idempotency records.
//!
//! The pipeline only talks to [`StateStore`], so the in-process
//! [`MemoryStateStore`] can be replaced by a shared cache for multi-instance
//! deployments without touching pipeline logic.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Read-modify-write closure applied atomically by [`StateStore::update`].
pub type UpdateFn<V> = Box<dyn FnOnce(Option<V>) -> V + Send>;

/// Minimal keyed store with get / set / update / expire semantics.
#[async_trait]
pub trait StateStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> Option<V>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: V);

    /// Apply `f` to the current value and store its result, returning it.
    ///
    /// Implementations must not let another writer interleave between the
    /// read and the write for the same key.
    async fn update(&self, key: &str, f: UpdateFn<V>) -> V;

    /// Remove the value stored under `key`.
    async fn remove(&self, key: &str);

    /// Drop every value for which `keep` returns `false`. Returns the number removed.
    async fn purge(&self, keep: &(dyn for<'a> Fn(&'a V) -> bool + Send + Sync)) -> usize;

    /// Number of stored values.
    async fn len(&self) -> usize;
}

/// Process-local [`StateStore`] backed by a `HashMap` behind an async `RwLock`.
#[derive(Debug)]
pub struct MemoryStateStore<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> MemoryStateStore<V> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> Default for MemoryStateStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> StateStore<V> for MemoryStateStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: V) {
        self.entries.write().await.insert(key.to_string(), value);
    }

    async fn update(&self, key: &str, f: UpdateFn<V>) -> V {
        let mut entries = self.entries.write().await;
        let next = f(entries.remove(key));
        entries.insert(key.to_string(), next.clone());
        next
    }

    async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn purge(&self, keep: &(dyn for<'a> Fn(&'a V) -> bool + Send + Sync)) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, value| keep(value));
        before - entries.len()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store: MemoryStateStore<u32> = MemoryStateStore::new();
        assert_eq!(store.get("a").await, None);

        store.set("a", 1).await;
        assert_eq!(store.get("a").await, Some(1));

        store.remove("a").await;
        assert_eq!(store.get("a").await, None);
    }

    #[tokio::test]
    async fn test_update_sees_previous_value() {
        let store: MemoryStateStore<u32> = MemoryStateStore::new();
        let first = store.update("k", Box::new(|prev| prev.unwrap_or(0) + 1)).await;
        let second = store.update("k", Box::new(|prev| prev.unwrap_or(0) + 1)).await;
        assert_eq!((first, second), (1, 2));
    }

    #[tokio::test]
    async fn test_purge() {
        let store: MemoryStateStore<u32> = MemoryStateStore::new();
        for (key, value) in [("a", 1), ("b", 5), ("c", 10)] {
            store.set(key, value).await;
        }
        let removed = store.purge(&|v| *v >= 5).await;
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 2);
    }
}
