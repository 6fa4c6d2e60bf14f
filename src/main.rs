//! modelpool HTTP server
//!
//! Starts an Axum web server that fans requests out over the configured
//! endpoint pool.

use clap::Parser;
use modelpool::cli::{Cli, Command, generate_config_template};
use modelpool::{config::Config, handlers, telemetry};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        return write_template(output.as_deref());
    }

    let config = Arc::new(Config::from_file(&cli.config)?);
    telemetry::init(&config.observability.log_level);

    tracing::info!(
        config_path = %cli.config,
        endpoints = config.enabled_endpoints().count(),
        strategy = %config.pool.strategy,
        "Starting modelpool server on {}:{}",
        config.server.host,
        config.server.port
    );

    let state = handlers::AppState::new(Arc::clone(&config))?;
    let pool = state.shared_pool();
    pool.start_health_monitor();

    let app = handlers::app(state);

    let host = config.server.host.parse::<IpAddr>().unwrap_or_else(|_| {
        tracing::warn!(host = %config.server.host, "Invalid host, binding 0.0.0.0");
        IpAddr::from([0, 0, 0, 0])
    });
    let addr = SocketAddr::from((host, config.server.port));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Health check available at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

fn write_template(output: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let template = generate_config_template();
    match output {
        Some(path) => {
            std::fs::write(path, template)?;
            eprintln!("Configuration template written to {}", path);
        }
        None => print!("{}", template),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
