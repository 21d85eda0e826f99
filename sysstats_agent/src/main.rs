//! sysstats_agent entry point: parse args, start the sampler, serve `/ws`.

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sysstats_agent::app;
use sysstats_agent::cli::Args;
use sysstats_agent::procfs::CPU_CORES;
use sysstats_agent::sampler::{spawn_sampler, StatsSampler};
use sysstats_agent::state::AppState;

fn setup_logging(args: &Args) {
    // RUST_LOG wins over --log-level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(&args);

    let config = args.into_config().context("invalid configuration")?;
    let addr = config.socket_addr();
    let state = AppState::new(config);

    let sampler = spawn_sampler(
        state.clone(),
        StatsSampler::new(state.procfs.clone(), *CPU_CORES),
        state.config.sample_interval,
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        "sysstats agent listening on ws://{}/ws (max {} clients)",
        listener.local_addr()?,
        state.config.max_clients
    );

    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .context("server error")?;

    if let Err(e) = sampler.await {
        warn!("sampler task ended abnormally: {e}");
    }
    info!("sysstats agent stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM, after parking the sampler for good.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    state.shutdown_sampler();
}
