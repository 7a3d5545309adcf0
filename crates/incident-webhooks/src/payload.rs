//! Alert and recovery payload parsing, validation and normalization.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::models::Severity;

/// Opaque, order-preserving metadata passed through to timeline entries.
pub type Metadata = Map<String, Value>;

const MAX_SERVICE_LEN: usize = 100;
const MAX_ENVIRONMENT_LEN: usize = 50;
const MAX_EVENT_TYPE_LEN: usize = 100;
const MAX_MESSAGE_LEN: usize = 5000;
const MAX_FINGERPRINT_LEN: usize = 255;

/// Alert body as sent by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAlertPayload {
    /// Service name
    #[serde(default)]
    pub service: Option<String>,
    /// Deployment environment
    #[serde(default)]
    pub environment: Option<String>,
    /// Event type (e.g. "downtime", "deploy_failed")
    #[serde(default)]
    pub event_type: Option<String>,
    /// Free-text message
    #[serde(default)]
    pub message: Option<String>,
    /// Severity name
    #[serde(default)]
    pub severity: Option<String>,
    /// ISO-8601 occurrence timestamp
    #[serde(default)]
    pub occurred_at: Option<String>,
    /// Caller-chosen fingerprint
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Recovery body as sent by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecoveryPayload {
    /// Fingerprint of the fault that cleared
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Service name
    #[serde(default)]
    pub service: Option<String>,
    /// Deployment environment
    #[serde(default)]
    pub environment: Option<String>,
    /// Event type
    #[serde(default)]
    pub event_type: Option<String>,
    /// ISO-8601 recovery timestamp
    #[serde(default)]
    pub occurred_at: Option<String>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Canonical alert the correlation engine reasons about.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAlert {
    /// Lower-cased service
    pub service: String,
    /// Lower-cased environment
    pub environment: String,
    /// Lower-cased event type
    pub event_type: String,
    /// Trimmed message
    pub message: String,
    /// Parsed severity
    pub severity: Severity,
    /// Parsed occurrence time
    pub occurred_at: DateTime<Utc>,
    /// Resolved, lower-cased fingerprint
    pub fingerprint: String,
    /// Caller metadata, untouched
    pub metadata: Metadata,
}

impl NormalizedAlert {
    /// Correlation tag for this alert's fingerprint.
    #[must_use]
    pub fn fingerprint_category(&self) -> String {
        fingerprint_category(&self.fingerprint)
    }
}

/// Canonical recovery signal.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoverySignal {
    /// Lower-cased fingerprint
    pub fingerprint: String,
    /// Lower-cased service
    pub service: Option<String>,
    /// Lower-cased environment
    pub environment: Option<String>,
    /// Lower-cased event type
    pub event_type: Option<String>,
    /// Parsed recovery time
    pub occurred_at: Option<DateTime<Utc>>,
    /// Caller metadata, untouched
    pub metadata: Metadata,
}

impl RecoverySignal {
    /// Correlation tag for this signal's fingerprint.
    #[must_use]
    pub fn fingerprint_category(&self) -> String {
        fingerprint_category(&self.fingerprint)
    }
}

/// Category tag used as the correlation key: `fingerprint:<fingerprint>`.
#[must_use]
pub fn fingerprint_category(fingerprint: &str) -> String {
    format!("fingerprint:{fingerprint}")
}

/// Parse and normalize an alert body.
pub fn parse_alert(body: &[u8]) -> Result<NormalizedAlert, ValidationError> {
    let raw: RawAlertPayload =
        serde_json::from_slice(body).map_err(|e| ValidationError::MalformedBody(e.to_string()))?;
    normalize_alert(raw)
}

/// Validate and normalize a deserialized alert.
pub fn normalize_alert(raw: RawAlertPayload) -> Result<NormalizedAlert, ValidationError> {
    let service = required_lower("service", raw.service, MAX_SERVICE_LEN)?;
    let environment = required_lower("environment", raw.environment, MAX_ENVIRONMENT_LEN)?;
    let event_type = required_lower("eventType", raw.event_type, MAX_EVENT_TYPE_LEN)?;
    let message = required("message", raw.message, MAX_MESSAGE_LEN)?;

    let severity_raw = required("severity", raw.severity, usize::MAX)?;
    let severity = severity_raw
        .parse::<Severity>()
        .map_err(|_| ValidationError::InvalidSeverity(severity_raw))?;

    let occurred_raw = required("occurredAt", raw.occurred_at, usize::MAX)?;
    let occurred_at = parse_timestamp("occurredAt", &occurred_raw)?;

    let fingerprint = match optional_lower("fingerprint", raw.fingerprint, MAX_FINGERPRINT_LEN)? {
        Some(fp) => fp,
        None => format!("{service}|{environment}|{event_type}"),
    };

    Ok(NormalizedAlert {
        service,
        environment,
        event_type,
        message,
        severity,
        occurred_at,
        fingerprint,
        metadata: raw.metadata.unwrap_or_default(),
    })
}

/// Parse and normalize a recovery body.
pub fn parse_recovery(body: &[u8]) -> Result<RecoverySignal, ValidationError> {
    let raw: RawRecoveryPayload =
        serde_json::from_slice(body).map_err(|e| ValidationError::MalformedBody(e.to_string()))?;
    normalize_recovery(raw)
}

/// Validate and normalize a deserialized recovery signal.
pub fn normalize_recovery(raw: RawRecoveryPayload) -> Result<RecoverySignal, ValidationError> {
    let fingerprint = required_lower("fingerprint", raw.fingerprint, MAX_FINGERPRINT_LEN)?;
    let occurred_at = raw
        .occurred_at
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_timestamp("occurredAt", &s))
        .transpose()?;

    Ok(RecoverySignal {
        fingerprint,
        service: optional_lower("service", raw.service, MAX_SERVICE_LEN)?,
        environment: optional_lower("environment", raw.environment, MAX_ENVIRONMENT_LEN)?,
        event_type: optional_lower("eventType", raw.event_type, MAX_EVENT_TYPE_LEN)?,
        occurred_at,
        metadata: raw.metadata.unwrap_or_default(),
    })
}

/// Reject alerts whose occurrence time is more than `max_skew` away from `now`,
/// in either direction. The boundary itself is accepted.
pub fn check_skew(
    occurred_at: DateTime<Utc>,
    now: DateTime<Utc>,
    max_skew: Duration,
) -> Result<(), ValidationError> {
    let skew = (now - occurred_at).abs();
    if skew > max_skew {
        return Err(ValidationError::SkewOutOfRange {
            skew_secs: skew.num_seconds(),
            max_secs: max_skew.num_seconds(),
        });
    }
    Ok(())
}

/// Parse an ISO-8601 timestamp. Values without an offset are read as UTC.
fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, ValidationError> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    // Basic-format offsets such as `+0000`.
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ValidationError::InvalidTimestamp {
            field,
            value: value.to_string(),
        })
}

fn required(
    field: &'static str,
    value: Option<String>,
    max: usize,
) -> Result<String, ValidationError> {
    let trimmed = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingField(field))?;
    if trimmed.chars().count() > max {
        return Err(ValidationError::FieldTooLong { field, max });
    }
    Ok(trimmed)
}

fn required_lower(
    field: &'static str,
    value: Option<String>,
    max: usize,
) -> Result<String, ValidationError> {
    required(field, value, max).map(|v| v.to_lowercase())
}

fn optional_lower(
    field: &'static str,
    value: Option<String>,
    max: usize,
) -> Result<Option<String>, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => required_lower(field, Some(v), max).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alert_body(extra: &Value) -> Vec<u8> {
        let mut body = json!({
            "service": "  Billing-API ",
            "environment": "PROD",
            "eventType": "Downtime",
            "message": "  health check failed  ",
            "severity": "high",
            "occurredAt": "2026-10-19T12:00:00Z",
        });
        if let (Some(base), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        serde_json::to_vec(&body).unwrap()
    }

    #[test]
    fn test_normalizes_and_synthesizes_fingerprint() {
        let alert = parse_alert(&alert_body(&json!({}))).unwrap();
        assert_eq!(alert.service, "billing-api");
        assert_eq!(alert.environment, "prod");
        assert_eq!(alert.event_type, "downtime");
        assert_eq!(alert.message, "health check failed");
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.fingerprint, "billing-api|prod|downtime");
        assert_eq!(alert.fingerprint_category(), "fingerprint:billing-api|prod|downtime");
    }

    #[test]
    fn test_caller_fingerprint_lowercased() {
        let alert = parse_alert(&alert_body(&json!({ "fingerprint": " Disk-Full-DB1 " }))).unwrap();
        assert_eq!(alert.fingerprint, "disk-full-db1");
    }

    #[test]
    fn test_metadata_order_preserved() {
        let body = br#"{"service":"a","environment":"b","eventType":"c","message":"m",
            "severity":"low","occurredAt":"2026-10-19T12:00:00Z",
            "metadata":{"zeta":1,"alpha":{"nested":true},"mid":"x"}}"#;
        let alert = parse_alert(body).unwrap();
        let keys: Vec<&str> = alert.metadata.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_missing_and_invalid_fields() {
        let err = parse_alert(&alert_body(&json!({ "service": "   " }))).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("service"));

        let err = parse_alert(&alert_body(&json!({ "severity": "urgent" }))).unwrap_err();
        assert_eq!(err, ValidationError::InvalidSeverity("urgent".to_string()));

        let err = parse_alert(&alert_body(&json!({ "occurredAt": "yesterday" }))).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTimestamp { field: "occurredAt", .. }));

        let long = "x".repeat(MAX_SERVICE_LEN + 1);
        let err = parse_alert(&alert_body(&json!({ "service": long }))).unwrap_err();
        assert!(matches!(err, ValidationError::FieldTooLong { field: "service", .. }));

        let err = parse_alert(&alert_body(&json!({ "severity": 3 }))).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedBody(_)));

        assert!(matches!(parse_alert(b"not json"), Err(ValidationError::MalformedBody(_))));
    }

    #[test]
    fn test_timestamp_without_offset_is_utc() {
        let alert = parse_alert(&alert_body(&json!({ "occurredAt": "2026-10-19T12:00:00.250" }))).unwrap();
        assert_eq!(alert.occurred_at.to_rfc3339(), "2026-10-19T12:00:00.250+00:00");
    }

    #[test]
    fn test_timestamp_with_basic_offset() {
        let alert = parse_alert(&alert_body(&json!({ "occurredAt": "2026-10-19T14:00:00+0200" }))).unwrap();
        assert_eq!(alert.occurred_at.to_rfc3339(), "2026-10-19T12:00:00+00:00");

        let alert = parse_alert(&alert_body(&json!({ "occurredAt": "2026-10-19T12:00:00.5+0000" }))).unwrap();
        assert_eq!(alert.occurred_at.to_rfc3339(), "2026-10-19T12:00:00.500+00:00");

        assert!(matches!(
            parse_alert(&alert_body(&json!({ "occurredAt": "19/10/2026 12:00" }))),
            Err(ValidationError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_skew_boundaries() {
        let now = Utc::now();
        let max = Duration::minutes(10);

        assert!(check_skew(now - Duration::seconds(599), now, max).is_ok());
        assert!(check_skew(now + Duration::seconds(599), now, max).is_ok());
        assert!(check_skew(now - Duration::minutes(10), now, max).is_ok());

        let err = check_skew(now - Duration::seconds(601), now, max).unwrap_err();
        assert_eq!(
            err,
            ValidationError::SkewOutOfRange {
                skew_secs: 601,
                max_secs: 600
            }
        );
        assert!(check_skew(now + Duration::seconds(601), now, max).is_err());
    }

    #[test]
    fn test_recovery_requires_fingerprint() {
        let err = parse_recovery(br#"{"service":"api"}"#).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("fingerprint"));

        let signal =
            parse_recovery(br#"{"fingerprint":"API|Prod|Downtime","occurredAt":"2026-10-19T12:05:00+02:00"}"#)
                .unwrap();
        assert_eq!(signal.fingerprint, "api|prod|downtime");
        assert_eq!(signal.occurred_at.unwrap().to_rfc3339(), "2026-10-19T10:05:00+00:00");
        assert!(signal.service.is_none());
    }
}
