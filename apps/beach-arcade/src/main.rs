use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use beach_arcade::{
    catalog::SimulationCatalog,
    config::AppConfig,
    routes,
    state::AppState,
    telemetry::init_tracing,
    transport::{RtcSettings, RtcTransportFactory},
};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::from_env();
    let _log_guard = init_tracing(&cfg.rust_log, cfg.log_dir.as_deref());

    let mut catalog = SimulationCatalog::with_builtins();
    if let Some(path) = cfg.catalog_path.as_deref() {
        catalog
            .load_file(Path::new(path))
            .with_context(|| format!("failed to load catalog from {path}"))?;
    }

    let transports = RtcTransportFactory::new(&RtcSettings {
        port_range: cfg.ice_port_range(),
        public_ip: cfg.ice_public_ip.clone(),
    })
    .context("failed to build webrtc api")?;

    let state = AppState::new(cfg.clone(), catalog, Arc::new(transports));
    let liveness = Arc::new(state.liveness_monitor()).spawn(cfg.liveness_sweep_interval());
    let app = routes::build_router(state.clone());

    info!(
        addr = %cfg.bind_addr,
        local_only = cfg.is_local_only(),
        turn_configured = state.turn.is_configured(),
        fps = cfg.target_fps,
        liveness_threshold_ms = cfg.liveness_threshold_ms,
        sweep_interval_ms = cfg.liveness_sweep_interval_ms,
        simulations = state.catalog.all().len(),
        "starting beach-arcade"
    );

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind_addr))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!("shutdown signal received; closing sessions");
    liveness.stop().await;
    state.cleanup.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
