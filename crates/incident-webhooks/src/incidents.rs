//! Incident store collaborator.
//!
//! The pipeline reads status, severity and categories, and writes severity,
//! status, resolution time and timeline entries through [`IncidentStore`]. The
//! full incident lifecycle belongs to the implementing store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Incident, IncidentPatch, IncidentStatus, IncidentUpdate, NewIncident};

/// Tag-set membership query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentQuery {
    /// Category the incident must carry
    pub category: String,
    /// Accepted statuses
    pub statuses: Vec<IncidentStatus>,
    /// Earliest accepted creation time, if bounded
    pub created_since: Option<DateTime<Utc>>,
}

impl IncidentQuery {
    /// Whether `incident` satisfies the query.
    #[must_use]
    pub fn matches(&self, incident: &Incident) -> bool {
        self.statuses.contains(&incident.status)
            && incident.has_category(&self.category)
            && self
                .created_since
                .map_or(true, |since| incident.created_at >= since)
    }
}

/// Persistence operations the pipeline needs.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Most recently created incident matching `query`.
    async fn find_one(&self, query: &IncidentQuery) -> Result<Option<Incident>, StoreError>;

    /// Create an incident.
    async fn create(&self, incident: NewIncident) -> Result<Incident, StoreError>;

    /// Apply a partial update and return the new state.
    async fn update(&self, id: Uuid, patch: IncidentPatch) -> Result<Incident, StoreError>;

    /// Append a timeline entry.
    async fn append_update(
        &self,
        incident_id: Uuid,
        author_id: &str,
        message: String,
    ) -> Result<IncidentUpdate, StoreError>;
}

/// In-process [`IncidentStore`] used by the standalone service and tests.
#[derive(Debug, Default)]
pub struct MemoryIncidentStore {
    incidents: RwLock<Vec<Incident>>,
    updates: RwLock<Vec<IncidentUpdate>>,
    mutations: AtomicUsize,
}

impl MemoryIncidentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed incident (seeding and tests).
    pub async fn insert(&self, incident: Incident) {
        self.incidents.write().await.push(incident);
    }

    /// Fetch an incident by id.
    pub async fn get(&self, id: Uuid) -> Option<Incident> {
        self.incidents
            .read()
            .await
            .iter()
            .find(|i| i.id == id)
            .cloned()
    }

    /// All incidents in creation order.
    pub async fn list(&self) -> Vec<Incident> {
        self.incidents.read().await.clone()
    }

    /// Timeline of one incident in append order.
    pub async fn updates_for(&self, incident_id: Uuid) -> Vec<IncidentUpdate> {
        self.updates
            .read()
            .await
            .iter()
            .filter(|u| u.incident_id == incident_id)
            .cloned()
            .collect()
    }

    /// Number of create/update/append calls served.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn find_one(&self, query: &IncidentQuery) -> Result<Option<Incident>, StoreError> {
        Ok(self
            .incidents
            .read()
            .await
            .iter()
            .filter(|i| query.matches(i))
            .max_by_key(|i| i.created_at)
            .cloned())
    }

    async fn create(&self, incident: NewIncident) -> Result<Incident, StoreError> {
        let now = Utc::now();
        let created = Incident {
            id: Uuid::new_v4(),
            title: incident.title,
            description: incident.description,
            severity: incident.severity,
            status: incident.status,
            created_by: incident.created_by,
            assignee_id: None,
            categories: incident.categories,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };
        self.incidents.write().await.push(created.clone());
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update(&self, id: Uuid, patch: IncidentPatch) -> Result<Incident, StoreError> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(StoreError::NotFound(id))?;

        if let Some(severity) = patch.severity {
            incident.severity = severity;
        }
        if let Some(status) = patch.status {
            incident.status = status;
        }
        if let Some(resolved_at) = patch.resolved_at {
            incident.resolved_at = Some(resolved_at);
        }
        incident.updated_at = Utc::now();
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(incident.clone())
    }

    async fn append_update(
        &self,
        incident_id: Uuid,
        author_id: &str,
        message: String,
    ) -> Result<IncidentUpdate, StoreError> {
        if self.get(incident_id).await.is_none() {
            return Err(StoreError::NotFound(incident_id));
        }
        let update = IncidentUpdate {
            id: Uuid::new_v4(),
            incident_id,
            author_id: author_id.to_string(),
            message,
            created_at: Utc::now(),
        };
        self.updates.write().await.push(update.clone());
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use std::collections::BTreeSet;

    fn new_incident(category: &str) -> NewIncident {
        NewIncident {
            title: "t".to_string(),
            description: "d".to_string(),
            severity: Severity::Low,
            status: IncidentStatus::Open,
            created_by: "system".to_string(),
            categories: BTreeSet::from([category.to_string()]),
        }
    }

    #[tokio::test]
    async fn test_find_one_filters_status_category_and_age() {
        let store = MemoryIncidentStore::new();
        let created = store.create(new_incident("fingerprint:a")).await.unwrap();

        let mut query = IncidentQuery {
            category: "fingerprint:a".to_string(),
            statuses: IncidentStatus::ACTIVE.to_vec(),
            created_since: Some(created.created_at - chrono::Duration::minutes(1)),
        };
        assert_eq!(store.find_one(&query).await.unwrap().map(|i| i.id), Some(created.id));

        query.created_since = Some(created.created_at + chrono::Duration::seconds(1));
        assert!(store.find_one(&query).await.unwrap().is_none());

        query.created_since = None;
        query.category = "fingerprint:b".to_string();
        assert!(store.find_one(&query).await.unwrap().is_none());

        query.category = "fingerprint:a".to_string();
        query.statuses = vec![IncidentStatus::Resolved];
        assert!(store.find_one(&query).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_and_timeline() {
        let store = MemoryIncidentStore::new();
        let created = store.create(new_incident("x")).await.unwrap();

        let updated = store
            .update(
                created.id,
                IncidentPatch {
                    severity: Some(Severity::High),
                    ..IncidentPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.severity, Severity::High);
        assert_eq!(updated.status, IncidentStatus::Open);

        store.append_update(created.id, "system", "hello".to_string()).await.unwrap();
        assert_eq!(store.updates_for(created.id).await.len(), 1);
        assert_eq!(store.mutation_count(), 3);

        let missing = store.append_update(Uuid::new_v4(), "system", String::new()).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }
}
