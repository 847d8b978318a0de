//! The long-running maintenance service.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use stopguard_binance::{BinanceClient, BinanceClientConfig, BinanceGateway};
use stopguard_core::ConfigLoader;
use stopguard_data::PositionDatabase;
use stopguard_manager::{service, LifecycleManager};

pub async fn run(config_path: &str) -> Result<()> {
    let config = ConfigLoader::load_from(config_path).context("failed to load configuration")?;

    let client = BinanceClient::new(BinanceClientConfig::from_settings(&config.binance))
        .context("failed to build Binance client")?;
    let gateway = Arc::new(BinanceGateway::new(Arc::new(client)));

    let database = PositionDatabase::new(&config.database.url, config.database.max_connections)
        .await
        .context("failed to open database")?;

    let manager = Arc::new(LifecycleManager::new(
        gateway.clone(),
        gateway,
        Arc::new(database),
        config.stops.clone(),
        config.service.candle_interval.clone(),
    ));

    // Positions that were open before the restart come back under
    // management; the first maintenance tick reconciles each of them
    // against the exchange, so closes that happened while this process
    // was down are absorbed before any stop is moved.
    let restored = manager.restore_from_store().await?;
    info!(count = restored.len(), "Positions restored from storage");

    service::run(manager, &config.service).await
}
