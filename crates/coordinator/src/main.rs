//! InfraZero Coordinator - Main Entry Point
//!
//! This is the main entry point for the InfraZero control plane.
//! It populates the fleet, probes worker health in the background and serves
//! the routing API.

use anyhow::Context;
use infrazero_common::{ControlPlaneConfig, FleetMode};
use infrazero_coordinator::{
    api, AppState, Dispatcher, FleetController, HealthProber, HttpWorkerClient, Registry, VultrClient,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "infrazero_coordinator=info,tower_http=info,axum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting InfraZero Coordinator");

    // Load configuration
    let config = ControlPlaneConfig::load()?;

    info!(
        "Coordinator configuration loaded: mode={}, dispatch={}, bind={}:{}",
        config.mode, config.dispatch.mode, config.bind_address, config.port
    );

    let registry = Registry::new();
    let transport = Arc::new(HttpWorkerClient::new(config.probe_timeout())?);
    let provisioner = Arc::new(VultrClient::new(&config.provisioning)?);

    let fleet = Arc::new(FleetController::new(&config, registry.clone(), provisioner));
    if config.mode == FleetMode::Mock {
        fleet.seed_static();
    }

    let dispatcher = Dispatcher::new(registry.clone(), transport.clone(), &config.dispatch);
    let prober = HealthProber::new(
        registry,
        transport,
        config.probe_interval(),
        config.probe_timeout(),
        config.prober.health_path.clone(),
    );

    let cancel = CancellationToken::new();
    let prober_handle = prober.spawn(cancel.child_token());

    let address = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to address {}", address))?;
    info!("InfraZero Coordinator listening on {}", listener.local_addr()?);

    let mut server_handle = tokio::spawn(api::serve(
        listener,
        AppState::new(fleet, dispatcher),
        cancel.child_token(),
    ));

    // Wait for shutdown signal
    let server_exited = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        result = &mut server_handle => {
            error!("HTTP server exited unexpectedly: {:?}", result);
            true
        }
    };

    cancel.cancel();
    if let Err(e) = prober_handle.await {
        error!("Health prober task failed: {}", e);
    }
    if !server_exited {
        match server_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("HTTP server error: {}", e),
            Err(e) => error!("HTTP server task failed: {}", e),
        }
    }

    info!("InfraZero Coordinator shutdown complete");
    Ok(())
}
