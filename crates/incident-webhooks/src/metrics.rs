//! Process-wide webhook pipeline counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters, incremented once per terminal outcome.
#[derive(Debug, Default)]
pub struct WebhookMetrics {
    received: AtomicU64,
    created: AtomicU64,
    deduped: AtomicU64,
    recovered: AtomicU64,
    rejected: AtomicU64,
    rate_limited: AtomicU64,
    idempotent_replay: AtomicU64,
    recovery_miss: AtomicU64,
    notification_failures: AtomicU64,
}

/// Point-in-time copy of [`WebhookMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Requests reaching either endpoint
    pub received: u64,
    /// Incidents created
    pub created: u64,
    /// Alerts folded into an open incident
    pub deduped: u64,
    /// Incidents resolved by a recovery signal
    pub recovered: u64,
    /// Authentication, validation or actor failures
    pub rejected: u64,
    /// Requests over the rate limit
    pub rate_limited: u64,
    /// Idempotency cache hits
    pub idempotent_replay: u64,
    /// Recovery signals matching no open incident
    pub recovery_miss: u64,
    /// Failed best-effort notifications
    pub notification_failures: u64,
}

macro_rules! counter {
    ($($fn_name:ident => $field:ident),+ $(,)?) => {
        $(
            #[doc = concat!("Increment `", stringify!($field), "`.")]
            pub fn $fn_name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )+
    };
}

impl WebhookMetrics {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        inc_received => received,
        inc_created => created,
        inc_deduped => deduped,
        inc_recovered => recovered,
        inc_rejected => rejected,
        inc_rate_limited => rate_limited,
        inc_idempotent_replay => idempotent_replay,
        inc_recovery_miss => recovery_miss,
        inc_notification_failures => notification_failures,
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            deduped: self.deduped.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            idempotent_replay: self.idempotent_replay.load(Ordering::Relaxed),
            recovery_miss: self.recovery_miss.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
        }
    }
}
