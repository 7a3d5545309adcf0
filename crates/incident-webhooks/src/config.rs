//! Configuration for the incident webhook service.

use chrono::Duration;
use std::env;

/// Default calls allowed per identity per window.
pub const DEFAULT_RATE_LIMIT: u32 = 60;
/// Default rate-limit window (seconds).
pub const DEFAULT_RATE_WINDOW_SECS: i64 = 60;
/// Default idempotency record lifetime (seconds).
pub const DEFAULT_IDEMPOTENCY_TTL_SECS: i64 = 15 * 60;
/// Default maximum distance between `occurredAt` and server time (seconds).
pub const DEFAULT_MAX_SKEW_SECS: i64 = 10 * 60;
/// Default dedupe window (seconds).
pub const DEFAULT_DEDUPE_WINDOW_SECS: i64 = 10 * 60;
/// Default expired-state sweep interval (seconds).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Incident webhook service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Shared secret for `X-Signature` HMAC verification.
    pub webhook_secret: Option<String>,
    /// Shared token accepted in `X-Webhook-Token` when no signature is sent.
    pub webhook_token: Option<String>,
    /// Calls allowed per identity per window.
    pub rate_limit: u32,
    /// Rate-limit window length.
    pub rate_window: Duration,
    /// How long an idempotency key replays its first result.
    pub idempotency_ttl: Duration,
    /// Maximum allowed clock skew of `occurredAt`.
    pub max_skew: Duration,
    /// Window in which repeat alerts fold into an existing incident.
    pub dedupe_window: Duration,
    /// System user credited for automated incidents.
    pub system_user_id: Option<String>,
    /// Admin ids used to seed the user directory (comma-separated in env).
    pub admin_ids: Vec<String>,
    /// Interval of the expired-state sweeper.
    pub sweep_interval: std::time::Duration,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
}

impl Config {
    /// Load configuration from `INCIDENT_WEBHOOK_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: parse_env("INCIDENT_WEBHOOK_PORT").unwrap_or(8085),
            webhook_secret: non_empty_env("INCIDENT_WEBHOOK_SECRET"),
            webhook_token: non_empty_env("INCIDENT_WEBHOOK_TOKEN"),
            rate_limit: parse_env("INCIDENT_WEBHOOK_RATE_LIMIT").unwrap_or(DEFAULT_RATE_LIMIT),
            rate_window: seconds_or(
                parse_env("INCIDENT_WEBHOOK_RATE_WINDOW_SECS"),
                DEFAULT_RATE_WINDOW_SECS,
            ),
            idempotency_ttl: seconds_or(
                parse_env("INCIDENT_WEBHOOK_IDEMPOTENCY_TTL_SECS"),
                DEFAULT_IDEMPOTENCY_TTL_SECS,
            ),
            max_skew: seconds_or(
                parse_env("INCIDENT_WEBHOOK_MAX_SKEW_SECS"),
                DEFAULT_MAX_SKEW_SECS,
            ),
            dedupe_window: seconds_or(
                parse_env("INCIDENT_WEBHOOK_DEDUPE_WINDOW_SECS"),
                DEFAULT_DEDUPE_WINDOW_SECS,
            ),
            system_user_id: non_empty_env("INCIDENT_WEBHOOK_SYSTEM_USER_ID"),
            admin_ids: env::var("INCIDENT_WEBHOOK_ADMIN_IDS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|id| id.trim().to_string())
                        .filter(|id| !id.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            sweep_interval: sweep_interval(parse_env("INCIDENT_WEBHOOK_SWEEP_INTERVAL_SECS")),
            max_body_bytes: parse_env("INCIDENT_WEBHOOK_MAX_BODY_BYTES").unwrap_or(64 * 1024),
        }
    }

    /// Whether at least one credential form is configured.
    #[must_use]
    pub const fn has_credentials(&self) -> bool {
        self.webhook_secret.is_some() || self.webhook_token.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Positive seconds as a duration. Unset, non-positive or out-of-range values
/// fall back to `default`.
fn seconds_or(value: Option<i64>, default: i64) -> Duration {
    value
        .filter(|secs| *secs > 0)
        .and_then(Duration::try_seconds)
        .unwrap_or_else(|| Duration::seconds(default))
}

/// Sweep interval, never shorter than one second.
fn sweep_interval(value: Option<u64>) -> std::time::Duration {
    std::time::Duration::from_secs(value.unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS).max(1))
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
