use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chatgate::config::{GatewayConfig, LogFormat};
use chatgate::http::{Admission, GatewayServer, UpstreamProxy};
use chatgate::metrics::AdmissionMetrics;
use chatgate::store::UpstashStore;

/// Rate-limiting admission gateway for LLM chat endpoints.
#[derive(Debug, Parser)]
#[command(name = "chatgate", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "CHATGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Gateway listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Admin (health and metrics) listen address
    #[arg(long)]
    admin: Option<SocketAddr>,

    /// Upstream chat application URL
    #[arg(long)]
    upstream: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(admin) = args.admin {
        config.server.admin_addr = admin;
    }
    if let Some(upstream) = args.upstream {
        config.upstream.url = upstream;
    }

    init_tracing(config.logging.format);

    info!("Starting Chatgate admission gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!(path = %path.display(), "Loaded configuration file"),
        None => info!("No configuration file given, using defaults and environment"),
    }

    config.validate()?;
    info!(
        listen_addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_addr,
        upstream = %config.upstream.url,
        max_requests = config.limiter.max_requests,
        window_secs = config.limiter.window_secs,
        on_store_error = ?config.limiter.on_store_error,
        "Configuration loaded"
    );

    let store = Arc::new(UpstashStore::new(&config.store)?);
    let metrics = Arc::new(AdmissionMetrics::new());
    let admission = Arc::new(Admission::from_config(&config, store, metrics));
    let proxy = Arc::new(UpstreamProxy::new(&config.upstream)?);

    let server = GatewayServer::new(
        config.server.listen_addr,
        config.server.admin_addr,
        admission,
        proxy,
    );

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Chatgate stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
