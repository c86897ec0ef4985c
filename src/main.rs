//! Duel settlement engine binary.
//!
//! Runs the engine behind the HTTP API with an in-memory escrow ledger;
//! production deployments swap the ledger for the on-chain implementation.

use clap::Parser;
use fartduel::{
    api,
    config::ConfigLoader,
    engine::{DuelEngine, SweepWorker},
    entropy::VrfTargetSource,
    errors::EngineError,
    escrow::InMemoryLedger,
    storage::DuelStorage,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fartduel", about = "FARTDUEL duel settlement engine")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Override the API port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the storage directory.
    #[arg(long)]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fartduel=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::new().with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    info!(
        data_dir = %config.storage.data_dir,
        selection_window_ms = config.duel.selection_window_ms,
        "Starting duel settlement engine"
    );

    let storage = Arc::new(DuelStorage::open(&config.storage.data_dir)?);
    let entropy = Arc::new(
        VrfTargetSource::load_or_create(&storage)
            .map_err(|e| EngineError::EntropyUnavailable(e.to_string()))?,
    );
    info!(vrf_public_key = %entropy.public_key_hex(), "Target source ready");

    let escrow = Arc::new(InMemoryLedger::new());
    let api_config = config.api.clone();
    let engine = DuelEngine::new(config, escrow, entropy, storage);

    let sweeper = SweepWorker::spawn(engine.clone());

    let result = if api_config.enabled {
        api::run_server(api_config, engine).await
    } else {
        info!("API disabled; running sweep-only");
        tokio::signal::ctrl_c().await?;
        Ok(())
    };

    sweeper.stop();
    result
}
