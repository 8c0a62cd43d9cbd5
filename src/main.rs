//! GrooveGarden Realtime Hub Server
//!
//! Run with: cargo run --bin groovegarden-hub -- --config hub.toml
//!
//! Without `--config` the hub looks for `hub.toml` in the usual config
//! locations and falls back to defaults plus environment overrides.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use groovegarden_hub::api::{serve, AppState};
use groovegarden_hub::config::{
    generate_default_config, Config, ConfigSource, LoadedConfig, LoggingConfig,
};
use groovegarden_hub::realtime::Hub;

#[derive(Parser)]
#[command(name = "groovegarden-hub")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Realtime vote and song notifications for GrooveGarden")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let loaded = match &cli.config {
        Some(path) => LoadedConfig {
            config: Config::load_with_env(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            source: ConfigSource::File(path.clone()),
            skipped: Vec::new(),
        },
        None => Config::load_default().context("loading default config")?,
    };
    let config = loaded.config;

    init_tracing(&config.logging);

    tracing::info!("Starting GrooveGarden hub v{}", env!("CARGO_PKG_VERSION"));
    for error in &loaded.skipped {
        tracing::warn!(error = %error, "Skipped config file");
    }
    match &loaded.source {
        ConfigSource::File(path) => tracing::info!("Loaded config from {:?}", path),
        ConfigSource::Environment => {
            tracing::info!("Using default config with environment overrides")
        }
    }

    let hub = Hub::new(config.hub.clone());
    hub.start()?;

    let state = AppState::new(hub.clone());
    let served = serve(state, &config.server).await;

    tracing::info!("Shutting down realtime hub...");
    hub.shutdown().await?;

    served?;
    tracing::info!("GrooveGarden hub stopped");
    Ok(())
}

/// Initialize tracing from the logging section, `RUST_LOG` wins if set
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("groovegarden_hub={},tower_http=info", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
