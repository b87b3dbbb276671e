//! Shard Manager - runs the IDENTIFY admission controller
//!
//! - Listens for shard clients on a private TCP control port
//! - Admits shard identifies under Discord's max_concurrency
//! - Exposes health/ready endpoints and Prometheus metrics

use anyhow::Result;
use shard_manager::config::ManagerConfig;
use shard_manager::gateway_info::fetch_max_concurrency;
use shard_manager::health::{self, AppState};
use shard_manager::metrics::ManagerMetrics;
use shard_manager::AdmissionController;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let manager_config = ManagerConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("shard_manager={}", manager_config.log_level).parse()?)
                .add_directive("twilight_http=warn".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %manager_config.bind_addr(),
        "Starting shard manager"
    );

    let metrics = ManagerMetrics::install()?;
    info!("Prometheus metrics initialized");

    let max_concurrency = match manager_config.max_concurrency {
        Some(value) => value,
        None => {
            let token = ManagerConfig::discord_token()?;
            fetch_max_concurrency(token).await?
        }
    };
    info!(max_concurrency, "Running shard manager");

    let controller = AdmissionController::new(
        manager_config.controller_settings(max_concurrency),
        metrics.clone(),
    );

    // Failing to bind the control port aborts the process
    let listener = AdmissionController::bind(&manager_config.bind_addr()).await?;

    let app_state = AppState {
        controller: Arc::clone(&controller),
        metrics,
    };
    let health_router = health::router(app_state);
    let addr: SocketAddr = ([0, 0, 0, 0], manager_config.http_port).into();

    info!(port = manager_config.http_port, "Starting HTTP server");

    let http_server = axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        health_router,
    );

    let mut serve = tokio::spawn(Arc::clone(&controller).serve(listener));

    tokio::select! {
        result = &mut serve => {
            match result {
                Ok(Err(e)) => error!(error = %e, "Shard manager error"),
                Err(e) => error!(error = %e, "Shard manager task failed"),
                Ok(Ok(())) => {}
            }
            return Ok(());
        }
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    // Graceful shutdown
    info!("Shutting down shard manager...");
    controller.shutdown();

    match serve.await {
        Ok(Err(e)) => error!(error = %e, "Shard manager error"),
        Err(e) => error!(error = %e, "Shard manager task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shard manager shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
