//! Replay cache keyed by the caller's `X-Idempotency-Key`.
//!
//! Best effort and time bounded: records live for a fixed TTL in whatever
//! [`StateStore`] backs the cache and do not survive a process restart.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::models::WebhookResult;
use crate::state::{MemoryStateStore, StateStore};

/// Outcome remembered for an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyRecord {
    /// When the result was recorded
    pub timestamp: DateTime<Utc>,
    /// Result returned the first time
    pub result: WebhookResult,
}

impl IdempotencyRecord {
    fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.timestamp >= ttl
    }
}

/// Cache namespace, so one key used on both endpoints does not collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyScope {
    /// Alert ingestion
    Alert,
    /// Recovery signals
    Recovery,
}

impl IdempotencyScope {
    pub(crate) fn cache_key(self, key: &str) -> String {
        match self {
            Self::Alert => format!("alert:{key}"),
            Self::Recovery => format!("recovery:{key}"),
        }
    }
}

/// Time-bounded idempotency cache.
pub struct IdempotencyCache {
    ttl: Duration,
    records: Arc<dyn StateStore<IdempotencyRecord>>,
}

impl IdempotencyCache {
    /// Create a cache backed by an in-process map.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_store(ttl, Arc::new(MemoryStateStore::new()))
    }

    /// Create a cache backed by a custom record store.
    #[must_use]
    pub fn with_store(ttl: Duration, records: Arc<dyn StateStore<IdempotencyRecord>>) -> Self {
        Self { ttl, records }
    }

    /// Look up a previous result at the current time.
    pub async fn lookup(&self, scope: IdempotencyScope, key: &str) -> Option<WebhookResult> {
        self.lookup_at(scope, key, Utc::now()).await
    }

    /// Look up a previous result at `now`. Expired records are evicted and
    /// reported as a miss.
    pub async fn lookup_at(
        &self,
        scope: IdempotencyScope,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<WebhookResult> {
        let cache_key = scope.cache_key(key);
        let record = self.records.get(&cache_key).await?;

        if record.is_expired(self.ttl, now) {
            debug!(idempotency_key = %key, "Idempotency record expired, evicting");
            self.records.remove(&cache_key).await;
            return None;
        }

        Some(record.result)
    }

    /// Remember `result` for `key` at the current time.
    pub async fn record(&self, scope: IdempotencyScope, key: &str, result: WebhookResult) {
        self.record_at(scope, key, result, Utc::now()).await;
    }

    /// Remember `result` for `key` at `now`.
    pub async fn record_at(
        &self,
        scope: IdempotencyScope,
        key: &str,
        result: WebhookResult,
        now: DateTime<Utc>,
    ) {
        self.records
            .set(
                &scope.cache_key(key),
                IdempotencyRecord {
                    timestamp: now,
                    result,
                },
            )
            .await;
    }

    /// Drop expired records. Returns the number removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        self.records
            .purge(&move |record: &IdempotencyRecord| !record.is_expired(ttl, now))
            .await
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.records.len().await
    }

    /// Whether the cache holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WebhookAction;
    use uuid::Uuid;

    fn created() -> WebhookResult {
        WebhookResult {
            incident_id: Some(Uuid::new_v4()),
            action: WebhookAction::Created,
        }
    }

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let cache = IdempotencyCache::new(Duration::minutes(15));
        let start = Utc::now();
        let result = created();

        cache.record_at(IdempotencyScope::Alert, "k1", result, start).await;

        let hit = cache
            .lookup_at(IdempotencyScope::Alert, "k1", start + Duration::minutes(14))
            .await;
        assert_eq!(hit, Some(result));
    }

    #[tokio::test]
    async fn test_expired_record_is_evicted() {
        let cache = IdempotencyCache::new(Duration::minutes(15));
        let start = Utc::now();

        cache.record_at(IdempotencyScope::Alert, "k1", created(), start).await;
        let miss = cache
            .lookup_at(IdempotencyScope::Alert, "k1", start + Duration::minutes(15))
            .await;

        assert_eq!(miss, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_scopes_do_not_collide() {
        let cache = IdempotencyCache::new(Duration::minutes(15));
        cache.record(IdempotencyScope::Alert, "shared", created()).await;

        assert!(cache.lookup(IdempotencyScope::Recovery, "shared").await.is_none());
        assert!(cache.lookup(IdempotencyScope::Alert, "shared").await.is_some());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = IdempotencyCache::new(Duration::minutes(15));
        let start = Utc::now();
        cache.record_at(IdempotencyScope::Alert, "old", created(), start).await;
        cache
            .record_at(IdempotencyScope::Alert, "new", created(), start + Duration::minutes(10))
            .await;

        let removed = cache.purge_expired(start + Duration::minutes(16)).await;
        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 1);
    }
}
