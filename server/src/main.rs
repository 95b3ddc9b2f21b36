//! `SyncGuard` Server - Main Entry Point

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use syncguard_server::ratelimit::{
    audit_channel, load_parameter_file, spawn_audit_worker, spawn_janitor,
    spawn_parameter_reload_task, AdmissionController, ChannelAuditSink, ParameterSnapshot,
    SharedParameters,
};
use syncguard_server::{api, config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syncguard_server=debug,audit=info,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting SyncGuard Server"
    );

    // Parameters: start from the file if present, defaults otherwise
    let initial = match config.parameters_file.as_deref() {
        Some(path) => load_parameter_file(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Failed to load parameters, using defaults");
            ParameterSnapshot::default()
        }),
        None => ParameterSnapshot::default(),
    };
    let parameters = SharedParameters::new(initial);

    let reload_handle = config.parameters_file.clone().map(|path| {
        info!(path = %path.display(), "Watching parameters file");
        spawn_parameter_reload_task(
            path,
            parameters.clone(),
            config.parameters_reload_interval(),
        )
    });

    // Audit pipeline
    let (audit_tx, audit_rx) = audit_channel(config.admission.audit_capacity);
    let audit_handle = spawn_audit_worker(audit_rx);

    let admission = AdmissionController::new(
        config.admission.clone(),
        Arc::new(parameters.clone()),
        Arc::new(ChannelAuditSink::new(audit_tx)),
    );
    if config.admission.enabled {
        info!(damped = config.admission.damped, "Admission control enabled");
    } else {
        info!("Admission control disabled by configuration");
    }

    let janitor_handle = spawn_janitor(
        admission.clone(),
        config.admission.janitor_interval(),
        config.admission.idle_horizon(),
    );

    // Build router
    let state = api::AppState::new(config.clone(), admission, parameters);
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    janitor_handle.abort();
    if let Some(handle) = reload_handle {
        handle.abort();
    }
    // The router (and with it the last audit sender) is gone; let the worker drain.
    match tokio::time::timeout(Duration::from_secs(5), audit_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Audit worker ended abnormally"),
        Err(_) => warn!("Timed out draining audit events"),
    }

    info!("Server shutdown complete");

    Ok(())
}
