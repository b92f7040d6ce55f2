//! Lodestone Gateway - HTTP API and sweep timer
//!
//! This is the main entry point for the control plane service. Configuration
//! is read from the environment; see `GatewayConfig`, `ControlConfig`,
//! `LauncherConfig` and `RconConfig` for the variables each reads.
//!
//! # Sweeps
//!
//! The idle sweep runs every `SWEEP_INTERVAL_SECONDS` (default 300). Set it
//! to `0` to disable the timer and drive `POST /internal/sweep` from an
//! external scheduler instead.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lodestone_control::{ControlConfig, ControlPlaneService};
use lodestone_gateway::{create_router, spawn_sweeper, GatewayConfig, GatewayState};
use lodestone_launcher::{K8sLauncher, LauncherConfig};
use lodestone_rcon::RconConfig;
use lodestone_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lodestone=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Lodestone Gateway");

    let gateway_config = GatewayConfig::from_env();
    let launcher_config = LauncherConfig::from_env();
    let rcon_config = RconConfig::from_env();
    let control_config = ControlConfig {
        container: launcher_config.default_spec(),
        rcon_port: rcon_config.port,
        ..ControlConfig::from_env()
    };
    launcher_config.validate_resources(&control_config.container)?;

    tracing::info!(
        listen_addr = %gateway_config.listen_addr,
        data_dir = %gateway_config.data_dir,
        table = %gateway_config.table_name,
        namespace = %launcher_config.namespace,
        image = %launcher_config.image,
        idle_timeout_seconds = control_config.idle_timeout_seconds,
        account_match = %control_config.account_match,
        "Gateway configuration loaded"
    );

    tracing::info!(path = %gateway_config.data_dir, "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(
        &gateway_config.data_dir,
        &gateway_config.table_name,
    )?);

    let launcher = Arc::new(K8sLauncher::new(launcher_config).await?);
    let rcon = Arc::new(rcon_config.connector());
    let control = Arc::new(ControlPlaneService::new(
        store,
        launcher,
        rcon,
        control_config,
    ));

    let armed = control.rearm_from_store()?;
    tracing::info!(armed, "Control plane initialized");

    match gateway_config.sweep_interval() {
        Some(period) => {
            tracing::info!(period_seconds = period.as_secs(), "Sweep timer enabled");
            spawn_sweeper(Arc::clone(&control), period);
        }
        None => tracing::warn!("Sweep timer disabled - relying on POST /internal/sweep"),
    }

    let listen_addr = gateway_config.listen_addr.clone();
    let state = GatewayState::new(control, gateway_config);
    let app = create_router(state);

    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
