//! Notification dispatcher collaborator.
//!
//! Delivery is best effort: the pipeline logs and counts failures but never
//! rolls back the incident change that triggered the notification.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::actor::UserDirectory;
use crate::error::NotificationError;
use crate::models::Incident;

/// Events the pipeline emits to humans.
#[async_trait]
pub trait IncidentNotifier: Send + Sync {
    /// Get the name of this notifier.
    fn name(&self) -> &'static str;

    /// A webhook opened a new incident; tell the administrators.
    async fn incident_created(&self, incident: &Incident) -> Result<(), NotificationError>;

    /// A recovery signal resolved an incident; tell its assignee.
    async fn incident_recovered(&self, incident: &Incident) -> Result<(), NotificationError>;
}

/// Notifier that writes structured log lines only.
///
/// Used when no outbound dispatcher is wired in.
pub struct LogNotifier {
    directory: Arc<dyn UserDirectory>,
}

impl LogNotifier {
    /// Create a log notifier resolving admin recipients from `directory`.
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl IncidentNotifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn incident_created(&self, incident: &Incident) -> Result<(), NotificationError> {
        let recipients: Vec<String> = self
            .directory
            .list_admins()
            .await
            .into_iter()
            .filter(|u| u.active)
            .map(|u| u.id)
            .collect();
        if recipients.is_empty() {
            return Err(NotificationError::NoRecipient(format!(
                "no active admins for incident {}",
                incident.id
            )));
        }
        info!(
            incident_id = %incident.id,
            title = %incident.title,
            severity = %incident.severity,
            recipients = ?recipients,
            "Incident created notification"
        );
        Ok(())
    }

    async fn incident_recovered(&self, incident: &Incident) -> Result<(), NotificationError> {
        let Some(assignee) = &incident.assignee_id else {
            debug!(incident_id = %incident.id, "Recovered incident has no assignee to notify");
            return Ok(());
        };
        info!(
            incident_id = %incident.id,
            assignee = %assignee,
            "Incident recovered notification"
        );
        Ok(())
    }
}

/// Kind of notification captured by [`RecordingNotifier`].
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// `incident_created`
    Created,
    /// `incident_recovered`
    Recovered,
}

/// Notifier that records every call, optionally failing each one.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: tokio::sync::Mutex<Vec<(NotificationKind, uuid::Uuid)>>,
    fail: bool,
}

#[cfg(test)]
impl RecordingNotifier {
    /// Create a notifier that accepts every notification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notifier that records then fails every notification.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            sent: tokio::sync::Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Notifications seen so far.
    pub async fn sent(&self) -> Vec<(NotificationKind, uuid::Uuid)> {
        self.sent.lock().await.clone()
    }

    async fn record(
        &self,
        kind: NotificationKind,
        incident: &Incident,
    ) -> Result<(), NotificationError> {
        self.sent.lock().await.push((kind, incident.id));
        if self.fail {
            return Err(NotificationError::Delivery("recording notifier set to fail".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl IncidentNotifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn incident_created(&self, incident: &Incident) -> Result<(), NotificationError> {
        self.record(NotificationKind::Created, incident).await
    }

    async fn incident_recovered(&self, incident: &Incident) -> Result<(), NotificationError> {
        self.record(NotificationKind::Recovered, incident).await
    }
}
