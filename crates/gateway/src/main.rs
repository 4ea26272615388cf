mod cli;
mod config;
mod error;
mod relay;
mod routes;
mod stream;
#[cfg(test)]
mod test_utils;

use crate::cli::Args;
use crate::config::load_gateway_config;
use crate::relay::DaemonEndpoint;
use crate::routes::{router, AppState};
use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_to_stderr)?;

    info!(
        listen_addr = %args.listen_addr,
        config = %args.config.display(),
        "gateway starting"
    );
    let mut config = load_gateway_config(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    if let Some(daemon_addr) = args.daemon_addr {
        config.daemon_addr = daemon_addr;
    }
    let state = AppState {
        daemon: DaemonEndpoint {
            addr: config.daemon_addr.clone(),
            connect_timeout: config.connect_timeout(),
            idle_timeout: config.idle_timeout(),
        },
    };
    let shutdown = CancellationToken::new();
    let app = router(state);

    let listener = TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.listen_addr))?;
    info!(addr = %args.listen_addr, daemon = %config.daemon_addr, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown.clone()))
        .await?;
    info!("gateway shutting down");
    shutdown.cancel();
    Ok(())
}

fn init_tracing(log_to_stderr: bool) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
    );
    if log_to_stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    shutdown.cancel();
}
