//! Inbound alert webhooks for incident tracking.
//!
//! This crate provides:
//! - HMAC signature and shared-token authentication for webhook callers
//! - Fixed-window rate limiting and idempotency-key replay
//! - Alert normalization into `service|env|eventType` fingerprints
//! - Correlation of repeat alerts into open incidents, with severity escalation
//! - Recovery signals that resolve the matching incident
//! - HTTP server exposing the webhook, health and metrics endpoints

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod actor;
pub mod auth;
pub mod config;
pub mod correlation;
pub mod error;
pub mod idempotency;
pub mod incidents;
pub mod locks;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod payload;
pub mod pipeline;
pub mod rate_limit;
pub mod recovery;
pub mod server;
pub mod state;

pub use actor::{ActorResolver, StaticUserDirectory, UserDirectory};
pub use auth::{verify_signature, Authenticator, WebhookHeaders};
pub use config::Config;
pub use error::{AuthError, StoreError, ValidationError, WebhookError};
pub use incidents::{IncidentStore, MemoryIncidentStore};
pub use metrics::{MetricsSnapshot, WebhookMetrics};
pub use models::*;
pub use notify::{IncidentNotifier, LogNotifier};
pub use pipeline::{PipelineOutcome, WebhookPipeline};
