//! One-shot listing of open positions from storage.

use anyhow::{Context, Result};

use stopguard_core::traits::PositionStore;
use stopguard_core::ConfigLoader;
use stopguard_data::PositionDatabase;

pub async fn run(config_path: &str) -> Result<()> {
    let config = ConfigLoader::load_from(config_path).context("failed to load configuration")?;

    let database = PositionDatabase::new(&config.database.url, config.database.max_connections)
        .await
        .context("failed to open database")?;

    let open = database.open_positions().await?;
    if open.is_empty() {
        println!("No open positions.");
        return Ok(());
    }

    println!(
        "{:<12} {:<6} {:>12} {:>12} {:>12} {:<10} {:<12}",
        "SYMBOL", "SIDE", "QTY", "ENTRY", "STOP", "MODE", "ORDER"
    );
    for record in open {
        println!(
            "{:<12} {:<6} {:>12} {:>12} {:>12} {:<10} {:<12}",
            record.symbol,
            record.side.to_string(),
            record.quantity.to_string(),
            record.entry_price.to_string(),
            record.current_stop_loss.to_string(),
            record.stop_mode.to_string(),
            record.stop_order_id.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}
