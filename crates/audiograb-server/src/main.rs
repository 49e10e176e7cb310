//! audiograb-server entry point.
//!
//! Loads configuration, sets up tracing, builds the conversion pipeline and
//! serves the router until SIGINT/SIGTERM, cancelling in-flight conversions
//! on shutdown.

use anyhow::Context;
use audiograb_core::{CancellationToken, Config, Pipeline};
use audiograb_server::{app, AppState};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "audiograb-server", version, about = "HTTP video-to-audio conversion service")]
struct Args {
    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides server.bind_address)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    init_tracing(&config);

    let pipeline = Pipeline::from_config(&config).context("failed to set up conversion pipeline")?;
    let shutdown = CancellationToken::new();
    let state = AppState::new(Arc::new(pipeline), shutdown.clone(), config.max_upload_bytes());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;
    info!(
        addr = %listener.local_addr()?,
        version = env!("CARGO_PKG_VERSION"),
        "HTTP server listening"
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("audiograb-server stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match config.server.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: server.log_level '{}' is not a valid tracing filter ({}); falling back to 'info'",
                    config.server.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if config.server.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Resolves on SIGINT or SIGTERM after cancelling every in-flight conversion
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; cancelling in-flight conversions");
    token.cancel();
}
