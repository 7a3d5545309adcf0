//! Error types for the webhook pipeline.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Credential failures. Always rejected with 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Signature header present but did not verify
    #[error("signature does not match request body")]
    InvalidSignature,

    /// Token header present but did not match
    #[error("webhook token does not match")]
    InvalidToken,

    /// No usable credential supplied
    #[error("no signature or token supplied")]
    MissingCredentials,
}

impl AuthError {
    /// Stable error code returned to callers.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidToken => "invalid_token",
            Self::MissingCredentials => "missing_credentials",
        }
    }
}

/// Payload validation failures. Always rejected with 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Body is not a JSON object of the expected shape
    #[error("malformed JSON body: {0}")]
    MalformedBody(String),

    /// Required field absent or blank
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// Field longer than allowed
    #[error("field '{field}' exceeds {max} characters")]
    FieldTooLong {
        /// Field name
        field: &'static str,
        /// Maximum length
        max: usize,
    },

    /// Severity outside the four known levels
    #[error("invalid severity '{0}'")]
    InvalidSeverity(String),

    /// Timestamp not ISO-8601
    #[error("field '{field}' is not an ISO-8601 timestamp: {value}")]
    InvalidTimestamp {
        /// Field name
        field: &'static str,
        /// Offending value
        value: String,
    },

    /// Occurrence time too far from server time
    #[error("occurredAt is {skew_secs}s away from server time (max {max_secs}s)")]
    SkewOutOfRange {
        /// Observed skew in seconds
        skew_secs: i64,
        /// Allowed skew in seconds
        max_secs: i64,
    },
}

impl ValidationError {
    /// Stable error code returned to callers.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SkewOutOfRange { .. } => "skew_out_of_range",
            _ => "invalid_payload",
        }
    }
}

/// Failures reported by the incident store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Incident does not exist
    #[error("incident not found: {0}")]
    NotFound(uuid::Uuid),

    /// Backend failure
    #[error("incident store unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by the notification collaborator.
///
/// Never changes the HTTP outcome of the triggering request.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// No recipient could be determined
    #[error("no recipient for notification: {0}")]
    NoRecipient(String),

    /// Delivery failed
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Terminal failure of a webhook request.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Bad or missing credentials
    #[error(transparent)]
    Authentication(#[from] AuthError),

    /// Identity exceeded its call budget for the current window
    #[error("rate limit exceeded for '{identity}'")]
    RateLimited {
        /// Identity whose bucket overflowed
        identity: String,
    },

    /// Malformed or out-of-range payload
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No automation actor could be resolved
    #[error("no active automation actor available")]
    ActorUnavailable,

    /// Incident store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WebhookError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::ActorUnavailable | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code returned to callers.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Authentication(e) => e.code(),
            Self::RateLimited { .. } => "rate_limited",
            Self::Validation(e) => e.code(),
            Self::ActorUnavailable => "actor_unavailable",
            Self::Store(_) => "internal_error",
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        // Store internals stay in the logs.
        let message = match &self {
            Self::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        let body = Json(json!({
            "error": self.code(),
            "message": message,
        }));
        (self.status_code(), body).into_response()
    }
}
