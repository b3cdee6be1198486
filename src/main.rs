use std::sync::Arc;

use tracing::{info, warn};

use agenda::compactor::run_compactor;
use agenda::config::Config;
use agenda::engine::Engine;
use agenda::store::{InMemoryCatalog, WalStore};

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    agenda::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(WalStore::open(&config.wal_path())?);
    let catalog = match &config.catalog_path {
        Some(path) => InMemoryCatalog::from_json_file(path)?,
        None => InMemoryCatalog::new(),
    };
    info!("agenda started");
    info!("  wal: {}", config.wal_path().display());
    info!("  reservations: {}", store.len());
    info!("  spaces: {}", catalog.len());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // The transport that would serve requests through the engine lives outside
    // this crate; the process owns the store's lifecycle and checks the
    // replayed state against the catalog.
    let engine = Engine::new(Arc::new(catalog), store.clone());
    let stranded = engine.stranded().await?;
    for r in &stranded {
        warn!("reservation {} on {} sits on missing or inactive space {}", r.id, r.day, r.space_id);
    }
    info!("  stranded reservations: {}", stranded.len());

    let compactor = tokio::spawn(run_compactor(
        store.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    shutdown_signal().await?;
    info!("shutdown signal received");

    compactor.abort();
    store.compact().await?;
    store.close().await?;

    info!("agenda stopped");
    Ok(())
}
