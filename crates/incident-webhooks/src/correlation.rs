//! Alert correlation and severity escalation.
//!
//! A normalized alert either folds into the open incident carrying the same
//! fingerprint category (appending a timeline entry and possibly escalating
//! severity) or opens a new incident.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::incidents::{IncidentQuery, IncidentStore};
use crate::locks::KeyedLocks;
use crate::models::{Incident, IncidentPatch, IncidentStatus, NewIncident, Severity};
use crate::payload::{Metadata, NormalizedAlert};

/// Category marking incidents opened by this pipeline.
pub const AUTO_WEBHOOK_CATEGORY: &str = "auto:webhook";

/// What the engine did with an alert.
#[derive(Debug, Clone, PartialEq)]
pub enum Correlation {
    /// A new incident was opened
    Created(Incident),
    /// The alert was appended to an existing incident
    Appended {
        /// Incident state after the append
        incident: Incident,
        /// Whether severity was raised
        escalated: bool,
    },
}

impl Correlation {
    /// The affected incident.
    #[must_use]
    pub const fn incident(&self) -> &Incident {
        match self {
            Self::Created(incident) | Self::Appended { incident, .. } => incident,
        }
    }
}

/// Correlation and escalation engine.
pub struct CorrelationEngine {
    store: Arc<dyn IncidentStore>,
    dedupe_window: Duration,
    locks: Arc<KeyedLocks>,
}

impl CorrelationEngine {
    /// Create an engine with its own fingerprint lock table.
    #[must_use]
    pub fn new(store: Arc<dyn IncidentStore>, dedupe_window: Duration) -> Self {
        Self::with_locks(store, dedupe_window, Arc::new(KeyedLocks::new()))
    }

    /// Create an engine sharing `locks` with other fingerprint writers.
    #[must_use]
    pub fn with_locks(
        store: Arc<dyn IncidentStore>,
        dedupe_window: Duration,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            store,
            dedupe_window,
            locks,
        }
    }

    /// Fold `alert` into an open incident or open a new one, authored by `actor_id`.
    pub async fn correlate(
        &self,
        alert: &NormalizedAlert,
        actor_id: &str,
    ) -> Result<Correlation, StoreError> {
        let category = alert.fingerprint_category();
        let _guard = self.locks.acquire(&alert.fingerprint).await;

        let query = IncidentQuery {
            category,
            statuses: IncidentStatus::ACTIVE.to_vec(),
            created_since: Some(alert.occurred_at - self.dedupe_window),
        };

        match self.store.find_one(&query).await? {
            Some(existing) => self.append_repeat(existing, alert, actor_id).await,
            None => self.open_incident(alert, actor_id).await,
        }
    }

    async fn append_repeat(
        &self,
        existing: Incident,
        alert: &NormalizedAlert,
        actor_id: &str,
    ) -> Result<Correlation, StoreError> {
        let patch = escalation_patch(&existing, alert.severity);
        let escalated = !patch.is_empty();

        // Timeline first: a failed append leaves severity and status untouched.
        let message = repeat_message(alert, escalated.then_some(alert.severity));
        self.store
            .append_update(existing.id, actor_id, message)
            .await?;

        let incident = if escalated {
            info!(
                incident_id = %existing.id,
                from = %existing.severity,
                to = %alert.severity,
                "Escalating incident severity from repeat alert"
            );
            self.store.update(existing.id, patch).await?
        } else {
            existing
        };

        debug!(
            incident_id = %incident.id,
            fingerprint = %alert.fingerprint,
            escalated,
            "Repeat alert appended"
        );
        Ok(Correlation::Appended {
            incident,
            escalated,
        })
    }

    async fn open_incident(
        &self,
        alert: &NormalizedAlert,
        actor_id: &str,
    ) -> Result<Correlation, StoreError> {
        let status = if alert.severity.needs_immediate_triage() {
            IncidentStatus::Investigating
        } else {
            IncidentStatus::Open
        };

        let incident = self
            .store
            .create(NewIncident {
                title: incident_title(alert),
                description: alert.message.clone(),
                severity: alert.severity,
                status,
                created_by: actor_id.to_string(),
                categories: alert_categories(alert),
            })
            .await?;

        self.store
            .append_update(incident.id, actor_id, creation_message(alert))
            .await?;

        info!(
            incident_id = %incident.id,
            fingerprint = %alert.fingerprint,
            severity = %alert.severity,
            status = %incident.status,
            "Incident opened from webhook alert"
        );
        Ok(Correlation::Created(incident))
    }
}

/// Patch raising `incident` to `severity`, or an empty patch when it is not higher.
///
/// A raised `open` incident also moves to `investigating`; any other status is
/// left alone.
#[must_use]
pub fn escalation_patch(incident: &Incident, severity: Severity) -> IncidentPatch {
    if severity <= incident.severity {
        return IncidentPatch::default();
    }
    IncidentPatch {
        severity: Some(severity),
        status: (incident.status == IncidentStatus::Open).then_some(IncidentStatus::Investigating),
        resolved_at: None,
    }
}

/// Category tags for a new incident.
#[must_use]
pub fn alert_categories(alert: &NormalizedAlert) -> BTreeSet<String> {
    BTreeSet::from([
        AUTO_WEBHOOK_CATEGORY.to_string(),
        format!("service:{}", alert.service),
        format!("env:{}", alert.environment),
        format!("event:{}", alert.event_type),
        alert.fingerprint_category(),
    ])
}

/// Title of the form `[<environment>] <Capitalized service> <eventType>`.
#[must_use]
pub fn incident_title(alert: &NormalizedAlert) -> String {
    format!(
        "[{}] {} {}",
        alert.environment,
        capitalize(&alert.service),
        alert.event_type
    )
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn creation_message(alert: &NormalizedAlert) -> String {
    let mut lines = vec![format!(
        "Incident opened from webhook alert for {} ({}): {}",
        alert.service, alert.environment, alert.event_type
    )];
    lines.extend(alert_summary(alert, None));
    lines.join("\n")
}

fn repeat_message(alert: &NormalizedAlert, escalated_to: Option<Severity>) -> String {
    let mut lines = vec![format!(
        "Repeat alert received for {} ({}): {}",
        alert.service, alert.environment, alert.event_type
    )];
    lines.extend(alert_summary(alert, escalated_to));
    lines.join("\n")
}

fn alert_summary(alert: &NormalizedAlert, escalated_to: Option<Severity>) -> Vec<String> {
    let severity = match escalated_to {
        Some(severity) => format!("Severity: {severity} (escalated)"),
        None => format!("Severity: {}", alert.severity),
    };
    let mut lines = vec![
        severity,
        format!("Environment: {}", alert.environment),
        format!("Occurred at: {}", format_time(alert.occurred_at)),
        format!("Fingerprint: {}", alert.fingerprint),
        format!("Message: {}", alert.message),
    ];
    if let Some(metadata) = metadata_line(&alert.metadata) {
        lines.push(metadata);
    }
    lines
}

pub(crate) fn metadata_line(metadata: &Metadata) -> Option<String> {
    if metadata.is_empty() {
        return None;
    }
    serde_json::to_string(metadata)
        .ok()
        .map(|json| format!("Metadata: {json}"))
}

pub(crate) fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
