//! lapel server entry point.
//!
//! Loads configuration (env file → environment → CLI overrides), wires the
//! tracing subscriber, bootstraps the server context, and serves until
//! ctrl-c. All wiring happens here or in `lapel_axum::bootstrap`; nothing
//! else reads the environment.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lapel_axum::{bootstrap, serve};
use lapel_core::settings::Settings;

#[derive(Debug, Parser)]
#[command(
    name = "lapel",
    version,
    about = "Server-side orchestrator for a voice+image assistant endpoint"
)]
struct Cli {
    /// Bind address (overrides HOST).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Env file loaded before configuration is read.
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Tracing filter (overrides LOG_LEVEL, e.g. "info,lapel_pipeline=debug").
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing env file is fine; a present one augments the environment.
    let _ = dotenvy::from_path(&cli.env_file);

    let mut settings = Settings::from_env().context("loading configuration")?;
    if let Some(host) = cli.host {
        settings.host = host;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }

    init_tracing(&settings.log_level);

    let ctx = Arc::new(bootstrap(settings).await.context("bootstrap failed")?);
    serve(ctx).await
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
