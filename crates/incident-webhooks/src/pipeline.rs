//! The inbound webhook pipeline.
//!
//! Alert calls run: authenticate → rate limit → idempotency lookup → normalize
//! → skew check → resolve actor → correlate → notify → remember result.
//! Recovery calls share the front door and then go to the recovery matcher.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::actor::{ActorResolver, UserDirectory};
use crate::auth::{redacted_identity, Authenticator, WebhookHeaders};
use crate::config::Config;
use crate::correlation::{Correlation, CorrelationEngine};
use crate::error::WebhookError;
use crate::idempotency::{IdempotencyCache, IdempotencyScope};
use crate::incidents::IncidentStore;
use crate::locks::{KeyGuard, KeyedLocks};
use crate::metrics::WebhookMetrics;
use crate::models::{Incident, WebhookAction, WebhookResult};
use crate::notify::IncidentNotifier;
use crate::payload::{check_skew, parse_alert, parse_recovery};
use crate::rate_limit::{recovery_identity, RateDecision, RateLimiter};
use crate::recovery::RecoveryMatcher;

/// Successful pipeline outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOutcome {
    /// Result for the caller
    pub result: WebhookResult,
    /// Whether the result came from the idempotency cache
    pub replayed: bool,
}

impl PipelineOutcome {
    const fn fresh(result: WebhookResult) -> Self {
        Self {
            result,
            replayed: false,
        }
    }

    const fn replayed(result: WebhookResult) -> Self {
        Self {
            result,
            replayed: true,
        }
    }
}

/// Front door shared by both endpoints: authenticated identity plus the
/// idempotency key to record under.
struct Admitted<'a> {
    identity: String,
    idempotency_key: Option<String>,
    // Held until the result is recorded.
    _in_flight: Option<KeyGuard<'a>>,
}

/// Webhook pipeline wiring all components together.
pub struct WebhookPipeline {
    authenticator: Authenticator,
    rate_limiter: RateLimiter,
    idempotency: IdempotencyCache,
    in_flight: KeyedLocks,
    actors: ActorResolver,
    correlation: CorrelationEngine,
    recovery: RecoveryMatcher,
    notifier: Arc<dyn IncidentNotifier>,
    metrics: Arc<WebhookMetrics>,
    max_skew: Duration,
}

impl WebhookPipeline {
    /// Build a pipeline with in-process rate-limit and idempotency state.
    #[must_use]
    pub fn new(
        config: &Config,
        store: Arc<dyn IncidentStore>,
        directory: Arc<dyn UserDirectory>,
        notifier: Arc<dyn IncidentNotifier>,
    ) -> Self {
        Self::with_state(
            config,
            store,
            directory,
            notifier,
            RateLimiter::new(config.rate_limit, config.rate_window),
            IdempotencyCache::new(config.idempotency_ttl),
        )
    }

    /// Build a pipeline around caller-provided rate-limit and idempotency state.
    #[must_use]
    pub fn with_state(
        config: &Config,
        store: Arc<dyn IncidentStore>,
        directory: Arc<dyn UserDirectory>,
        notifier: Arc<dyn IncidentNotifier>,
        rate_limiter: RateLimiter,
        idempotency: IdempotencyCache,
    ) -> Self {
        let fingerprint_locks = Arc::new(KeyedLocks::new());
        Self {
            authenticator: Authenticator::new(
                config.webhook_secret.clone(),
                config.webhook_token.clone(),
            ),
            rate_limiter,
            idempotency,
            in_flight: KeyedLocks::new(),
            actors: ActorResolver::new(config.system_user_id.clone(), directory),
            correlation: CorrelationEngine::with_locks(
                store.clone(),
                config.dedupe_window,
                fingerprint_locks.clone(),
            ),
            recovery: RecoveryMatcher::with_locks(store, fingerprint_locks),
            notifier,
            metrics: Arc::new(WebhookMetrics::new()),
            max_skew: config.max_skew,
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<WebhookMetrics> {
        &self.metrics
    }

    /// Handle an alert call.
    pub async fn handle_alert(
        &self,
        headers: &WebhookHeaders,
        body: &[u8],
    ) -> Result<PipelineOutcome, WebhookError> {
        self.metrics.inc_received();
        let outcome = self.process_alert(headers, body).await;
        self.record_failure("alert", &outcome);
        outcome
    }

    /// Handle a recovery call.
    pub async fn handle_recovery(
        &self,
        headers: &WebhookHeaders,
        body: &[u8],
    ) -> Result<PipelineOutcome, WebhookError> {
        self.metrics.inc_received();
        let outcome = self.process_recovery(headers, body).await;
        self.record_failure("recovery", &outcome);
        outcome
    }

    /// Drop expired idempotency records and elapsed rate buckets.
    pub async fn sweep(&self, now: DateTime<Utc>) -> (usize, usize) {
        let records = self.idempotency.purge_expired(now).await;
        let buckets = self.rate_limiter.purge_expired(now).await;
        if records + buckets > 0 {
            debug!(records, buckets, "Swept expired webhook state");
        }
        (records, buckets)
    }

    async fn admit(
        &self,
        headers: &WebhookHeaders,
        body: &[u8],
        scope: IdempotencyScope,
    ) -> Result<Result<Admitted<'_>, WebhookResult>, WebhookError> {
        let identity = self.authenticator.authenticate(headers, body)?;

        let bucket = match scope {
            IdempotencyScope::Alert => identity.clone(),
            IdempotencyScope::Recovery => recovery_identity(&identity),
        };
        if let RateDecision::Limited { retry_after_secs } = self.rate_limiter.check(&bucket).await {
            let identity = redacted_identity(&bucket);
            warn!(identity = %identity, retry_after_secs, "Webhook caller rate limited");
            return Err(WebhookError::RateLimited { identity });
        }

        let mut in_flight = None;
        if let Some(key) = &headers.idempotency_key {
            // A retry racing the original waits here, then replays its result.
            in_flight = Some(self.in_flight.acquire(&scope.cache_key(key)).await);
            if let Some(result) = self.idempotency.lookup(scope, key).await {
                debug!(
                    identity = %redacted_identity(&identity),
                    idempotency_key = %key,
                    "Replaying cached webhook result"
                );
                self.metrics.inc_idempotent_replay();
                return Ok(Err(result));
            }
        }

        Ok(Ok(Admitted {
            identity,
            idempotency_key: headers.idempotency_key.clone(),
            _in_flight: in_flight,
        }))
    }

    async fn process_alert(
        &self,
        headers: &WebhookHeaders,
        body: &[u8],
    ) -> Result<PipelineOutcome, WebhookError> {
        let admitted = match self.admit(headers, body, IdempotencyScope::Alert).await? {
            Ok(admitted) => admitted,
            Err(cached) => return Ok(PipelineOutcome::replayed(cached)),
        };

        let alert = parse_alert(body)?;
        check_skew(alert.occurred_at, Utc::now(), self.max_skew)?;
        let actor = self.actors.resolve().await?;

        let correlation = self.correlation.correlate(&alert, &actor).await?;
        let result = match &correlation {
            Correlation::Created(incident) => {
                self.notify_created(incident).await;
                self.metrics.inc_created();
                WebhookResult {
                    incident_id: Some(incident.id),
                    action: WebhookAction::Created,
                }
            }
            Correlation::Appended { incident, .. } => {
                self.metrics.inc_deduped();
                WebhookResult {
                    incident_id: Some(incident.id),
                    action: WebhookAction::AppendedUpdate,
                }
            }
        };

        info!(
            identity = %redacted_identity(&admitted.identity),
            incident_id = %correlation.incident().id,
            fingerprint = %alert.fingerprint,
            action = ?result.action,
            "Alert webhook processed"
        );
        self.remember(IdempotencyScope::Alert, admitted.idempotency_key.as_deref(), result)
            .await;
        Ok(PipelineOutcome::fresh(result))
    }

    async fn process_recovery(
        &self,
        headers: &WebhookHeaders,
        body: &[u8],
    ) -> Result<PipelineOutcome, WebhookError> {
        let admitted = match self.admit(headers, body, IdempotencyScope::Recovery).await? {
            Ok(admitted) => admitted,
            Err(cached) => return Ok(PipelineOutcome::replayed(cached)),
        };

        let signal = parse_recovery(body)?;
        let result = match self.recovery.recover(&signal).await? {
            Some(incident) => {
                self.notify_recovered(&incident).await;
                self.metrics.inc_recovered();
                WebhookResult {
                    incident_id: Some(incident.id),
                    action: WebhookAction::Recovered,
                }
            }
            None => {
                self.metrics.inc_recovery_miss();
                WebhookResult {
                    incident_id: None,
                    action: WebhookAction::Noop,
                }
            }
        };

        info!(
            identity = %redacted_identity(&admitted.identity),
            fingerprint = %signal.fingerprint,
            action = ?result.action,
            "Recovery webhook processed"
        );
        self.remember(IdempotencyScope::Recovery, admitted.idempotency_key.as_deref(), result)
            .await;
        Ok(PipelineOutcome::fresh(result))
    }

    async fn remember(&self, scope: IdempotencyScope, key: Option<&str>, result: WebhookResult) {
        if let Some(key) = key {
            self.idempotency.record(scope, key, result).await;
        }
    }

    async fn notify_created(&self, incident: &Incident) {
        if let Err(e) = self.notifier.incident_created(incident).await {
            self.metrics.inc_notification_failures();
            error!(
                notifier = self.notifier.name(),
                incident_id = %incident.id,
                error = %e,
                "Failed to send incident created notification"
            );
        }
    }

    async fn notify_recovered(&self, incident: &Incident) {
        if let Err(e) = self.notifier.incident_recovered(incident).await {
            self.metrics.inc_notification_failures();
            error!(
                notifier = self.notifier.name(),
                incident_id = %incident.id,
                error = %e,
                "Failed to send incident recovered notification"
            );
        }
    }

    fn record_failure(&self, route: &str, outcome: &Result<PipelineOutcome, WebhookError>) {
        let Err(e) = outcome else {
            return;
        };
        match e {
            WebhookError::RateLimited { .. } => self.metrics.inc_rate_limited(),
            WebhookError::ActorUnavailable | WebhookError::Store(_) => {
                self.metrics.inc_rejected();
                error!(route, code = e.code(), error = %e, "Webhook request failed");
            }
            WebhookError::Authentication(_) | WebhookError::Validation(_) => {
                self.metrics.inc_rejected();
                warn!(route, code = e.code(), error = %e, "Webhook request rejected");
            }
        }
    }
}
