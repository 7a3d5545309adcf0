//! Recovery signal matching.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::correlation::{format_time, metadata_line};
use crate::error::StoreError;
use crate::incidents::{IncidentQuery, IncidentStore};
use crate::locks::KeyedLocks;
use crate::models::{Incident, IncidentPatch, IncidentStatus};
use crate::payload::RecoverySignal;

/// Statuses a recovery signal may close. Unlike alert dedupe there is no
/// creation-time bound: a fault may stay open for a long time.
const RECOVERABLE: [IncidentStatus; 3] = IncidentStatus::ACTIVE;

/// Finds and resolves the open incident a recovery signal refers to.
pub struct RecoveryMatcher {
    store: Arc<dyn IncidentStore>,
    locks: Arc<KeyedLocks>,
}

impl RecoveryMatcher {
    /// Create a matcher with its own fingerprint lock table.
    #[must_use]
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self::with_locks(store, Arc::new(KeyedLocks::new()))
    }

    /// Create a matcher sharing `locks` with the correlation engine, so a
    /// resolve never interleaves with a repeat alert on the same fingerprint.
    #[must_use]
    pub fn with_locks(store: Arc<dyn IncidentStore>, locks: Arc<KeyedLocks>) -> Self {
        Self { store, locks }
    }

    /// Resolve the unresolved incident carrying the signal's fingerprint.
    ///
    /// Returns the resolved incident, or `None` when nothing matched and no
    /// state was changed.
    pub async fn recover(&self, signal: &RecoverySignal) -> Result<Option<Incident>, StoreError> {
        let _guard = self.locks.acquire(&signal.fingerprint).await;

        let query = IncidentQuery {
            category: signal.fingerprint_category(),
            statuses: RECOVERABLE.to_vec(),
            created_since: None,
        };

        let Some(incident) = self.store.find_one(&query).await? else {
            info!(fingerprint = %signal.fingerprint, "Recovery signal matched no open incident");
            return Ok(None);
        };

        let resolved_at = signal.occurred_at.unwrap_or_else(Utc::now);
        let resolved = self
            .store
            .update(
                incident.id,
                IncidentPatch {
                    severity: None,
                    status: Some(IncidentStatus::Resolved),
                    resolved_at: Some(resolved_at),
                },
            )
            .await?;

        // Credited to the incident's own author, not the automation actor.
        self.store
            .append_update(resolved.id, &resolved.created_by, recovery_message(signal, &resolved))
            .await?;

        info!(
            incident_id = %resolved.id,
            fingerprint = %signal.fingerprint,
            resolved_at = %format_time(resolved_at),
            "Incident resolved by recovery signal"
        );
        Ok(Some(resolved))
    }
}

fn recovery_message(signal: &RecoverySignal, incident: &Incident) -> String {
    let mut lines = vec![format!(
        "Automated recovery received for fingerprint {}",
        signal.fingerprint
    )];
    if let Some(service) = &signal.service {
        lines.push(format!("Service: {service}"));
    }
    if let Some(environment) = &signal.environment {
        lines.push(format!("Environment: {environment}"));
    }
    if let Some(event_type) = &signal.event_type {
        lines.push(format!("Event: {event_type}"));
    }
    if let Some(resolved_at) = incident.resolved_at {
        lines.push(format!("Resolved at: {}", format_time(resolved_at)));
    }
    if let Some(metadata) = metadata_line(&signal.metadata) {
        lines.push(metadata);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationEngine;
    use crate::incidents::MemoryIncidentStore;
    use crate::models::Severity;
    use crate::payload::{Metadata, NormalizedAlert};
    use chrono::Duration;

    fn signal(fingerprint: &str) -> RecoverySignal {
        RecoverySignal {
            fingerprint: fingerprint.to_string(),
            service: Some("api".to_string()),
            environment: None,
            event_type: None,
            occurred_at: None,
            metadata: Metadata::new(),
        }
    }

    async fn open_incident(store: &Arc<MemoryIncidentStore>, fingerprint: &str) -> Incident {
        let engine = CorrelationEngine::new(store.clone(), Duration::minutes(10));
        let alert = NormalizedAlert {
            service: "api".to_string(),
            environment: "prod".to_string(),
            event_type: "downtime".to_string(),
            message: "down".to_string(),
            severity: Severity::High,
            occurred_at: Utc::now(),
            fingerprint: fingerprint.to_string(),
            metadata: Metadata::new(),
        };
        engine.correlate(&alert, "creator").await.unwrap().incident().clone()
    }

    #[tokio::test]
    async fn test_miss_changes_nothing() {
        let store = Arc::new(MemoryIncidentStore::new());
        open_incident(&store, "fp-a").await;
        let before = store.mutation_count();

        let matcher = RecoveryMatcher::new(store.clone());
        assert!(matcher.recover(&signal("fp-b")).await.unwrap().is_none());
        assert_eq!(store.mutation_count(), before);
    }

    #[tokio::test]
    async fn test_match_resolves_with_signal_time() {
        let store = Arc::new(MemoryIncidentStore::new());
        let incident = open_incident(&store, "fp-a").await;

        let mut recovery = signal("fp-a");
        let at = Utc::now() + Duration::hours(3);
        recovery.occurred_at = Some(at);

        let matcher = RecoveryMatcher::new(store.clone());
        let resolved = matcher.recover(&recovery).await.unwrap().unwrap();
        assert_eq!(resolved.id, incident.id);
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert_eq!(resolved.resolved_at, Some(at));

        let timeline = store.updates_for(incident.id).await;
        let last = timeline.last().unwrap();
        assert_eq!(last.author_id, "creator");
        assert!(last.message.starts_with("Automated recovery received for fingerprint fp-a"));

        // A second signal finds nothing left to resolve.
        assert!(matcher.recover(&recovery).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recover_waits_for_fingerprint_lock() {
        let store = Arc::new(MemoryIncidentStore::new());
        open_incident(&store, "fp-a").await;

        let locks = Arc::new(KeyedLocks::new());
        let matcher = Arc::new(RecoveryMatcher::with_locks(store.clone(), locks.clone()));
        let held = locks.acquire("fp-a").await;

        let pending = {
            let matcher = matcher.clone();
            tokio::spawn(async move { matcher.recover(&signal("fp-a")).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        assert!(store.list().await[0].resolved_at.is_none());

        drop(held);
        assert!(pending.await.unwrap().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_match_defaults_to_now() {
        let store = Arc::new(MemoryIncidentStore::new());
        open_incident(&store, "fp-a").await;

        let before = Utc::now();
        let resolved = RecoveryMatcher::new(store.clone())
            .recover(&signal("fp-a"))
            .await
            .unwrap()
            .unwrap();
        assert!(resolved.resolved_at.unwrap() >= before);
    }
}
