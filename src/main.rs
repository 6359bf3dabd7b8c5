use std::net::SocketAddr;
use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::http::{Admission, ClientKeyExtractor, HttpServer};
use gatekeeper::ratelimit::{CleanupScheduler, VisitorRegistry};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "gatekeeper")]
#[command(about = "Per-client token bucket admission control", version)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on, overrides the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gatekeeper=info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    info!("Starting Gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatekeeperConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.http_addr = listen;
    }
    config.validate()?;

    let rate_limiting = &config.rate_limiting;
    info!(
        http_addr = %config.server.http_addr,
        requests_per_second = rate_limiting.requests_per_second,
        burst = rate_limiting.burst,
        expiration_secs = rate_limiting.expiration_secs,
        cleanup_interval_secs = rate_limiting.cleanup_interval_secs,
        trust_forwarded_for = rate_limiting.trust_forwarded_for,
        "Configuration loaded"
    );

    // Initialize the visitor registry and its cleanup task
    let registry = Arc::new(VisitorRegistry::new(rate_limiting.limit_config()?));
    let limit = registry.limit();
    info!(
        burst = limit.capacity(),
        refill_period = ?limit.refill_period(),
        "Visitor registry ready"
    );
    let shutdown = CancellationToken::new();
    let cleanup = CleanupScheduler::new(
        registry.clone(),
        rate_limiting.cleanup_interval(),
        rate_limiting.expiration(),
    )?
    .spawn(shutdown.clone());

    let admission = Admission::new(registry)
        .with_extractor(ClientKeyExtractor::from_config(rate_limiting)?);
    let router = admission.wrap(Router::new().route("/health", get(health_handler)));

    let server = HttpServer::new(config.server.http_addr, router);

    // Run the server with graceful shutdown on Ctrl+C
    let stop = shutdown.clone();
    let result = server
        .serve_with_shutdown(async move {
            shutdown_signal().await;
            stop.cancel();
        })
        .await;

    shutdown.cancel();
    cleanup.await?;
    result?;

    info!("Gatekeeper stopped");
    Ok(())
}

/// Health check endpoint, served behind the admission layer.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
