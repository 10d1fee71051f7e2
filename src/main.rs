//! QuotaGuard - Main application entry point
//!
//! This application starts the HTTP API server.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::{net::TcpListener, signal};

use quotaguard::{Config, create_app, init_tracing};
use quotaguard_core::config::validation::Validate;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run_server().await
}

/// Run the HTTP server
async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        // Only warn if it's not a "file not found" error
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Load configuration
    let config = Config::load().map_err(|e| {
        std::io::Error::other(format!(
            "Failed to load configuration. Check REDIS_URL and QUOTAGUARD__* env vars: {}",
            e
        ))
    })?;

    config
        .validate()
        .map_err(|e| std::io::Error::other(format!("Configuration validation failed: {}", e)))?;

    // Initialize tracing (after config is loaded so we can use logging config)
    init_tracing(&config.logging)?;

    tracing::info!("Starting QuotaGuard server...");
    tracing::info!(
        "Configuration loaded: server={}:{}",
        config.server.host,
        config.server.port
    );

    let server_host = config.server.host.clone();
    let server_port = config.server.port;
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);

    let app_handle = create_app(config).await.map_err(|e| {
        Box::new(std::io::Error::other(format!(
            "Failed to create application: {}",
            e
        )))
    })?;

    let addr = SocketAddr::new(server_host.parse()?, server_port);
    tracing::info!("Server listening on {}", addr);

    // Start server with graceful shutdown
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app_handle.router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the store listener, the sweeper and the store reconnect loop
    if tokio::time::timeout(shutdown_timeout, app_handle.rate_limiter.close())
        .await
        .is_err()
    {
        tracing::warn!("Rate limiter shutdown timeout reached");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolve once Ctrl+C or SIGTERM is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
