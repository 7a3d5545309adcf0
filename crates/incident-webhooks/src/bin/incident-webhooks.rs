//! Incident webhook service binary.
//!
//! Standalone HTTP service receiving alerts and recovery signals from
//! external monitors.

use anyhow::{Context, Result};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use incident_webhooks::{
    config::Config, server, IncidentNotifier, IncidentStore, LogNotifier, MemoryIncidentStore,
    StaticUserDirectory, UserDirectory, WebhookPipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!("Starting incident webhook service...");

    let config = Config::default();

    if !config.has_credentials() {
        warn!(
            "Neither INCIDENT_WEBHOOK_SECRET nor INCIDENT_WEBHOOK_TOKEN is set. All webhook calls will be rejected."
        );
    }
    if config.system_user_id.is_none() && config.admin_ids.is_empty() {
        warn!("No system user or admins configured - alerts cannot be attributed");
    }

    let directory: Arc<dyn UserDirectory> = Arc::new(
        StaticUserDirectory::seeded(config.system_user_id.as_deref(), &config.admin_ids).await,
    );
    let store: Arc<dyn IncidentStore> = Arc::new(MemoryIncidentStore::new());
    let notifier: Arc<dyn IncidentNotifier> = Arc::new(LogNotifier::new(directory.clone()));

    let pipeline = Arc::new(WebhookPipeline::new(&config, store, directory, notifier));

    // Expired idempotency records and rate buckets
    let sweeper = pipeline.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            sweeper.sweep(Utc::now()).await;
        }
    });

    let port = config.port;
    let state = server::AppState {
        config: Arc::new(config),
        pipeline,
    };
    let app = server::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(port, "Incident webhook service listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("incident_webhooks=info".parse()?);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}
