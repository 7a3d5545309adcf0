//! Fixed-window rate limiting per authenticated identity.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::auth::redacted_identity;
use crate::state::{MemoryStateStore, StateStore};

/// Calls counted in the current window for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBucket {
    /// Calls seen in this window, including rejected ones
    pub count: u32,
    /// When the window opened
    pub window_start: DateTime<Utc>,
}

impl RateBucket {
    fn is_expired(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now - self.window_start >= window
    }
}

/// Decision for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Call admitted
    Allowed {
        /// Calls left in this window
        remaining: u32,
    },
    /// Ceiling exceeded
    Limited {
        /// Seconds until the window rolls over
        retry_after_secs: i64,
    },
}

impl RateDecision {
    /// Whether the call was admitted.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Fixed-window rate limiter.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    buckets: Arc<dyn StateStore<RateBucket>>,
}

impl RateLimiter {
    /// Create a limiter backed by an in-process bucket map.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::with_store(limit, window, Arc::new(MemoryStateStore::new()))
    }

    /// Create a limiter backed by a custom bucket store.
    #[must_use]
    pub fn with_store(limit: u32, window: Duration, buckets: Arc<dyn StateStore<RateBucket>>) -> Self {
        Self {
            limit,
            window,
            buckets,
        }
    }

    /// Count a call for `identity` at the current time.
    pub async fn check(&self, identity: &str) -> RateDecision {
        self.check_at(identity, Utc::now()).await
    }

    /// Count a call for `identity` at `now`.
    ///
    /// A missing or elapsed bucket starts a fresh window with count 1. Otherwise
    /// the count is incremented and the call is admitted only while the count
    /// stays within the ceiling.
    pub async fn check_at(&self, identity: &str, now: DateTime<Utc>) -> RateDecision {
        let window = self.window;
        let bucket = self
            .buckets
            .update(
                identity,
                Box::new(move |prev| match prev {
                    Some(bucket) if !bucket.is_expired(window, now) => RateBucket {
                        count: bucket.count.saturating_add(1),
                        window_start: bucket.window_start,
                    },
                    _ => RateBucket {
                        count: 1,
                        window_start: now,
                    },
                }),
            )
            .await;

        debug!(
            identity = %redacted_identity(identity),
            count = bucket.count,
            limit = self.limit,
            "Rate bucket updated"
        );

        if bucket.count <= self.limit {
            RateDecision::Allowed {
                remaining: self.limit - bucket.count,
            }
        } else {
            let reset = bucket.window_start + window;
            RateDecision::Limited {
                retry_after_secs: (reset - now).num_seconds().max(0),
            }
        }
    }

    /// Drop buckets whose window has elapsed. Returns the number removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let window = self.window;
        self.buckets
            .purge(&move |bucket: &RateBucket| !bucket.is_expired(window, now))
            .await
    }

    /// Configured ceiling.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }
}

/// Bucket identity for recovery calls, limited apart from alert calls.
#[must_use]
pub fn recovery_identity(identity: &str) -> String {
    format!("{identity}:recovery")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sixty_first_call_rejected() {
        let limiter = RateLimiter::new(60, Duration::seconds(60));
        let start = Utc::now();

        for i in 0..60 {
            let now = start + Duration::milliseconds(i * 100);
            assert!(limiter.check_at("hmac", now).await.is_allowed(), "call {}", i + 1);
        }

        let decision = limiter.check_at("hmac", start + Duration::seconds(7)).await;
        assert!(!decision.is_allowed());
        assert!(matches!(decision, RateDecision::Limited { retry_after_secs } if retry_after_secs == 53));
    }

    #[tokio::test]
    async fn test_stays_limited_until_rollover() {
        let limiter = RateLimiter::new(2, Duration::seconds(60));
        let start = Utc::now();

        assert!(limiter.check_at("id", start).await.is_allowed());
        assert!(limiter.check_at("id", start).await.is_allowed());
        assert!(!limiter.check_at("id", start + Duration::seconds(10)).await.is_allowed());
        assert!(!limiter.check_at("id", start + Duration::seconds(59)).await.is_allowed());

        let rolled = limiter.check_at("id", start + Duration::seconds(60)).await;
        assert_eq!(rolled, RateDecision::Allowed { remaining: 1 });
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let limiter = RateLimiter::new(1, Duration::seconds(60));
        let now = Utc::now();

        assert!(limiter.check_at("token:a", now).await.is_allowed());
        assert!(!limiter.check_at("token:a", now).await.is_allowed());
        assert!(limiter.check_at(&recovery_identity("token:a"), now).await.is_allowed());
        assert!(limiter.check_at("token:b", now).await.is_allowed());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let limiter = RateLimiter::new(5, Duration::seconds(60));
        let start = Utc::now();
        limiter.check_at("old", start).await;
        limiter.check_at("new", start + Duration::seconds(30)).await;

        let removed = limiter.purge_expired(start + Duration::seconds(61)).await;
        assert_eq!(removed, 1);
    }
}
