mod protocol;
mod server;

use clap::Parser;
use pressa_core::{Engine, EngineConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Newline-delimited JSON requests on stdin, replies on stdout.
#[derive(Parser)]
#[command(author, version, about = "pressa request bridge", long_about = None)]
struct Args {
    /// Managed store root (overrides the config file)
    #[arg(long, env = "PRESSA_STORE")]
    store: Option<PathBuf>,

    /// TOML engine configuration
    #[arg(long, env = "PRESSA_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let engine = match EngineConfig::load(args.config.as_deref(), args.store)
        .map_err(pressa_core::EngineError::from)
        .and_then(Engine::open)
    {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!(error = %e, "engine failed to open");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(root = %engine.config().store_root.display(), "bridge ready");

    let bridge = server::Bridge::new(engine);
    match bridge.serve(tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "bridge stopped");
            ExitCode::FAILURE
        }
    }
}
