//! Interval-driven maintenance loop.
//!
//! Each tick, for every tracked symbol: reconcile against exchange
//! truth, check the protective order's status, then feed fresh market
//! data to the policy engine. Failures are logged per symbol and
//! retried on the next tick; the loop itself never stops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use stopguard_core::config::ServiceConfig;

use crate::manager::{LifecycleManager, ReconcileStatus};

/// Runs the maintenance loop until the process is stopped.
pub async fn run(manager: Arc<LifecycleManager>, config: &ServiceConfig) -> Result<()> {
    info!(
        poll_secs = config.poll_interval_secs,
        candle_interval = %config.candle_interval,
        "Stop-loss maintenance loop started"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));

    loop {
        interval.tick().await;
        run_cycle(&manager).await;
    }
}

/// One maintenance pass over all tracked positions.
pub async fn run_cycle(manager: &LifecycleManager) {
    for pos in manager.all_positions().await {
        let symbol = pos.symbol.clone();

        match manager.reconcile_position(&symbol).await {
            Ok(ReconcileStatus::Closed) => continue,
            Ok(_) => {}
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Reconciliation failed, will retry next cycle");
                continue;
            }
        }

        match manager.check_stop_order_status(&symbol).await {
            Ok(ReconcileStatus::Closed) => continue,
            Ok(_) => {}
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Stop order status check failed");
            }
        }

        if let Err(e) = manager.refresh_market_state(&symbol).await {
            error!(symbol = %symbol, error = %e, "Market refresh failed, will retry next cycle");
        }
    }
}
