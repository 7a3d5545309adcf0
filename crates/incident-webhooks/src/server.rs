//! HTTP server for inbound incident webhooks.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::auth::WebhookHeaders;
use crate::config::Config;
use crate::error::WebhookError;
use crate::metrics::MetricsSnapshot;
use crate::models::WebhookAction;
use crate::pipeline::{PipelineOutcome, WebhookPipeline};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Configuration.
    pub config: Arc<Config>,
    /// Webhook pipeline.
    pub pipeline: Arc<WebhookPipeline>,
}

/// Build the HTTP router for the incident webhook service.
pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.max_body_bytes;

    Router::new()
        .route("/webhooks/incidents", post(alert_webhook_handler))
        .route("/webhooks/incidents/recovery", post(recovery_webhook_handler))
        .route("/metrics/webhooks", get(metrics_handler))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body_bytes)),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Readiness check endpoint. Not ready until a credential is configured.
async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if !state.config.has_credentials() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({ "status": "ready" })))
}

async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.pipeline.metrics().snapshot())
}

/// Handle an alert from an external monitor.
pub async fn alert_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), WebhookError> {
    let headers = extract_headers(&headers);
    let outcome = state.pipeline.handle_alert(&headers, &body).await?;
    Ok(respond(outcome))
}

/// Handle a recovery signal from an external monitor.
pub async fn recovery_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), WebhookError> {
    let headers = extract_headers(&headers);
    let outcome = state.pipeline.handle_recovery(&headers, &body).await?;
    Ok(respond(outcome))
}

fn extract_headers(headers: &HeaderMap) -> WebhookHeaders {
    WebhookHeaders::from_header_map(|name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    })
}

/// Map a pipeline outcome to its status code and body.
fn respond(outcome: PipelineOutcome) -> (StatusCode, Json<Value>) {
    let PipelineOutcome { result, replayed } = outcome;

    let status = if replayed {
        StatusCode::OK
    } else if result.action == WebhookAction::Created {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };

    let mut body = json!({
        "incidentId": result.incident_id,
        "action": result.action,
    });
    if replayed {
        body["idempotent"] = Value::Bool(true);
    }
    (status, Json(body))
}
