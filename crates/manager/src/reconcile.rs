//! Reconciliation of local belief against exchange truth.
//!
//! The exchange executes protective stops server-side, so a position
//! can vanish while this process is not watching. The reconciler
//! detects that drift and reports what should happen; the lifecycle
//! manager performs the actual close so that both triggers (position
//! vanished, stop order filled) funnel through one idempotent path.
//!
//! A position is only ever reported closed on positively-confirmed
//! exchange state. Transient fetch errors propagate and are retried on
//! the next cycle.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use stopguard_core::config::StopPolicyConfig;
use stopguard_core::error::{Result, StopError};
use stopguard_core::position::Position;
use stopguard_core::traits::{ExchangeGateway, OrderState, PriceFeed};

use crate::registry::PositionRegistry;

/// What a reconciliation pass found for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local and exchange state agree (or nothing is tracked locally).
    InSync,
    /// Exchange disagreed on side or size; local state was overwritten
    /// with the exchange's view.
    Adjusted,
    /// The exchange no longer holds the position: the protective stop
    /// was filled (or the position was closed) externally.
    ExternallyClosed {
        close_price: Decimal,
        realized_pnl: Decimal,
        reason: String,
    },
}

/// What the auxiliary stop-order status check found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCheckOutcome {
    /// No tracked position or no live order id to check.
    Nothing,
    /// The order is still working on the exchange.
    StillLive,
    /// The order no longer exists; exchange position state decides.
    OrderGone,
    /// The order filled. Close at the reported average fill price.
    Filled {
        close_price: Decimal,
        realized_pnl: Decimal,
        reason: String,
    },
}

pub struct Reconciler {
    exchange: Arc<dyn ExchangeGateway>,
    feed: Arc<dyn PriceFeed>,
    registry: Arc<PositionRegistry>,
    size_tolerance: Decimal,
}

impl Reconciler {
    pub fn new(
        exchange: Arc<dyn ExchangeGateway>,
        feed: Arc<dyn PriceFeed>,
        registry: Arc<PositionRegistry>,
        config: &StopPolicyConfig,
    ) -> Self {
        Self {
            exchange,
            feed,
            registry,
            size_tolerance: config.size_tolerance,
        }
    }

    /// Compares the tracked position against the exchange's view.
    ///
    /// The caller must hold the symbol guard.
    pub async fn reconcile(&self, symbol: &str) -> Result<ReconcileOutcome> {
        let Some(pos) = self.registry.get(symbol).await else {
            return Ok(ReconcileOutcome::InSync);
        };

        let view = self.exchange.position(&pos.symbol).await?;

        let Some(view) = view else {
            // Tracked locally, gone on the exchange: the stop was
            // filled externally. Determine the best close price.
            let close_price = self.resolve_close_price(&pos).await;
            let realized_pnl = pos.pnl_at(close_price);
            info!(
                symbol = %pos.symbol,
                close_price = %close_price,
                realized_pnl = %realized_pnl,
                "Exchange reports no position, stop was triggered externally"
            );
            return Ok(ReconcileOutcome::ExternallyClosed {
                close_price,
                realized_pnl,
                reason: "stop triggered externally (exchange-side execution)".to_string(),
            });
        };

        // Both sides hold a position: the exchange is authoritative for
        // side and size. Stop state is never re-derived from this.
        let mut adjusted = false;
        let mut updated = pos.clone();

        if view.side != pos.side {
            warn!(
                symbol = %pos.symbol,
                local = %pos.side,
                exchange = %view.side,
                "Position side mismatch, adopting exchange side"
            );
            updated.side = view.side;
            adjusted = true;
        }

        if self.size_differs(&pos, view.size) {
            warn!(
                symbol = %pos.symbol,
                local = %pos.quantity,
                exchange = %view.size,
                "Position size mismatch, adopting exchange size"
            );
            updated.quantity = view.size;
            adjusted = true;
        }

        if adjusted {
            self.registry.replace(&updated).await;
            Ok(ReconcileOutcome::Adjusted)
        } else {
            Ok(ReconcileOutcome::InSync)
        }
    }

    /// Queries the tracked stop order's status. More precise than the
    /// position comparison when the order's fill price is available.
    ///
    /// The caller must hold the symbol guard.
    pub async fn check_stop_order(&self, symbol: &str) -> Result<OrderCheckOutcome> {
        let Some(pos) = self.registry.get(symbol).await else {
            return Ok(OrderCheckOutcome::Nothing);
        };
        let Some(order_id) = pos.stop_order_id.clone() else {
            return Ok(OrderCheckOutcome::Nothing);
        };

        let status = match self.exchange.order_status(&pos.symbol, &order_id).await {
            Ok(status) => status,
            Err(StopError::OrderNotFound { .. }) => {
                info!(
                    symbol = %pos.symbol,
                    order_id = %order_id,
                    "Stop order no longer exists on exchange"
                );
                return Ok(OrderCheckOutcome::OrderGone);
            }
            Err(e) => return Err(e),
        };

        if status.state == OrderState::Filled {
            let close_price = status.avg_fill_price.unwrap_or(pos.current_stop_loss);
            let realized_pnl = pos.pnl_at(close_price);
            info!(
                symbol = %pos.symbol,
                order_id = %order_id,
                fill_price = %close_price,
                "Stop order filled"
            );
            return Ok(OrderCheckOutcome::Filled {
                close_price,
                realized_pnl,
                reason: format!("stop order {order_id} filled"),
            });
        }

        Ok(OrderCheckOutcome::StillLive)
    }

    /// Best-available close price for an externally-closed position:
    /// the stop order's average fill price, else the current market
    /// price, else the stop level itself as last resort.
    async fn resolve_close_price(&self, pos: &Position) -> Decimal {
        if let Some(order_id) = &pos.stop_order_id {
            if let Ok(status) = self.exchange.order_status(&pos.symbol, order_id).await {
                if status.state == OrderState::Filled {
                    if let Some(price) = status.avg_fill_price {
                        return price;
                    }
                }
            }
        }
        match self.feed.latest_price(&pos.symbol).await {
            Ok(price) if price > Decimal::ZERO => price,
            _ => {
                warn!(
                    symbol = %pos.symbol,
                    stop = %pos.current_stop_loss,
                    "Could not determine fill price, falling back to stop level"
                );
                pos.current_stop_loss
            }
        }
    }

    /// Size comparison with a relative tolerance for rounding, plus a
    /// small absolute floor for dust-sized differences.
    fn size_differs(&self, pos: &Position, exchange_size: Decimal) -> bool {
        let tolerance = pos.quantity.abs() * self.size_tolerance;
        let diff = (exchange_size - pos.quantity).abs();
        diff > tolerance && diff > Decimal::new(1, 3)
    }
}
