use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ventus_runner::{JobRegistry, JobRunner, RunnerConfig};

pub mod api;
pub mod service;

use service::job_service::JobContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ventus_orchestrator=debug,ventus_runner=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Ventus Orchestrator...");

    let config = RunnerConfig::from_env().context("Failed to load runner configuration")?;
    config.validate().context("Invalid runner configuration")?;
    config
        .ensure_layout()
        .context("Failed to prepare data directories")?;

    tracing::info!(
        "Data directory: {}, geometry directory: {}, {} concurrent job(s)",
        config.data_dir.display(),
        config.geometry_dir.display(),
        config.max_concurrent_jobs
    );

    let config = Arc::new(config);
    let registry = Arc::new(JobRegistry::new(Arc::clone(&config)));
    let runner = Arc::new(JobRunner::new(config));

    // Build router with all API endpoints
    let app = api::create_router(JobContext::new(registry, runner));

    // Get bind address
    let addr =
        std::env::var("ORCHESTRATOR_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
