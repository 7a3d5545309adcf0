//! Incident entity and webhook result type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Alert and incident severity.
///
/// Variants are declared in ascending order so the derived `Ord` is the
/// escalation order: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low impact
    Low,
    /// Degraded but functional
    Medium,
    /// Significant impact
    High,
    /// Outage
    Critical,
}

impl Severity {
    /// Wire name of this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Whether incidents at this severity skip the unacknowledged `open` state.
    #[must_use]
    pub const fn needs_immediate_triage(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Incident lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    /// Reported, not yet acknowledged
    Open,
    /// Triage in progress
    Investigating,
    /// Fix applied, watching
    Monitoring,
    /// Closed
    Resolved,
}

impl IncidentStatus {
    /// Statuses an alert may be folded into.
    pub const ACTIVE: [Self; 3] = [Self::Open, Self::Investigating, Self::Monitoring];

    /// Wire name of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Investigating => "investigating",
            Self::Monitoring => "monitoring",
            Self::Resolved => "resolved",
        }
    }

    /// Whether the incident is still unresolved.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident record owned by the incident store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Unique identifier
    pub id: Uuid,
    /// Display title
    pub title: String,
    /// Description (the originating alert message for automated incidents)
    pub description: String,
    /// Current severity
    pub severity: Severity,
    /// Current status
    pub status: IncidentStatus,
    /// Author of the incident
    pub created_by: String,
    /// Human owner, if assigned
    #[serde(default)]
    pub assignee_id: Option<String>,
    /// Free-form category tags
    pub categories: BTreeSet<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
    /// Resolution timestamp
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Check whether the incident carries a category tag.
    #[must_use]
    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}

/// Fields needed to create an incident.
#[derive(Debug, Clone)]
pub struct NewIncident {
    /// Display title
    pub title: String,
    /// Description
    pub description: String,
    /// Initial severity
    pub severity: Severity,
    /// Initial status
    pub status: IncidentStatus,
    /// Author id
    pub created_by: String,
    /// Category tags
    pub categories: BTreeSet<String>,
}

/// Partial update applied to an existing incident.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentPatch {
    /// New severity
    pub severity: Option<Severity>,
    /// New status
    pub status: Option<IncidentStatus>,
    /// New resolution timestamp
    pub resolved_at: Option<DateTime<Utc>>,
}

impl IncidentPatch {
    /// Whether the patch would change nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.severity.is_none() && self.status.is_none() && self.resolved_at.is_none()
    }
}

/// Append-only timeline entry on an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentUpdate {
    /// Unique identifier
    pub id: Uuid,
    /// Incident this entry belongs to
    pub incident_id: Uuid,
    /// Author id
    pub author_id: String,
    /// Entry body
    pub message: String,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// User as seen by the automation actor resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique identifier
    pub id: String,
    /// Whether the account may author records
    pub active: bool,
    /// Whether the account is an administrator
    #[serde(default)]
    pub admin: bool,
}

/// Terminal action taken for a webhook call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAction {
    /// A new incident was opened
    Created,
    /// A repeat alert was appended to an open incident
    AppendedUpdate,
    /// A matching incident was resolved
    Recovered,
    /// Recovery signal matched nothing
    Noop,
}

/// Outcome returned to the caller and remembered under the idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResult {
    /// Affected incident, `None` for a recovery miss
    pub incident_id: Option<Uuid>,
    /// Action taken
    pub action: WebhookAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_total_order() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert!(Severity::Medium <= Severity::Medium);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(" High ".parse::<Severity>(), Ok(Severity::High));
        assert_eq!("CRITICAL".parse::<Severity>(), Ok(Severity::Critical));
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_result_serialization() {
        let result = WebhookResult {
            incident_id: None,
            action: WebhookAction::Noop,
        };
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(json, serde_json::json!({ "incidentId": null, "action": "noop" }));

        let result = WebhookResult {
            incident_id: Some(Uuid::nil()),
            action: WebhookAction::AppendedUpdate,
        };
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(json["action"], "appended_update");
    }
}
