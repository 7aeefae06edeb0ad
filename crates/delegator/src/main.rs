use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use delegator::config::{load_config, DelegatorConfig};
use delegator::engine::Engine;
use delegator::Context;

#[derive(Parser, Debug)]
#[command(name = "delegatord", version, about = "Keeps declared resources in sync with provider backends")]
struct Cli {
    /// YAML or JSON configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_tracing() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => DelegatorConfig::default(),
    };
    info!("Starting delegatord v{}", env!("CARGO_PKG_VERSION"));

    let engine = Engine::start(&config, Context::background())
        .await
        .context("failed to start engine")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Shutdown requested");

    engine.shutdown().await;
    Ok(())
}
