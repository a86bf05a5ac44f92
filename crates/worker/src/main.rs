//! InfraZero Worker - Main Entry Point
//!
//! Serves the worker contract for one region.

use infrazero_worker::{router, WorkerSettings};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "infrazero_worker=info,axum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = WorkerSettings::from_env()?;
    info!(
        "Starting InfraZero Worker: region={}, engine={}",
        settings.region,
        settings.engine.name()
    );

    let listener = TcpListener::bind(("0.0.0.0", settings.port)).await?;
    info!("Worker listening on {}", listener.local_addr()?);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
        }
        shutdown.cancel();
    });

    axum::serve(listener, router(Arc::new(settings)))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("InfraZero Worker shutdown complete");
    Ok(())
}
