//! Order synchronization: turns a stop decision into exchange effects.
//!
//! A protective order is replaced by cancel-before-place, so at most
//! one stop order is ever live for a position. In-memory stop state is
//! mutated only after the exchange has accepted the new order; any
//! failure before that point leaves the position at its previous
//! (still protected) level for the caller to retry.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use stopguard_core::error::{Result, StopError};
use stopguard_core::position::{Position, Side, StopInitiator};
use stopguard_core::traits::{ExchangeGateway, PositionStore, PriceFeed};

pub struct OrderSynchronizer {
    exchange: Arc<dyn ExchangeGateway>,
    feed: Arc<dyn PriceFeed>,
    store: Arc<dyn PositionStore>,
}

impl OrderSynchronizer {
    pub fn new(
        exchange: Arc<dyn ExchangeGateway>,
        feed: Arc<dyn PriceFeed>,
        store: Arc<dyn PositionStore>,
    ) -> Self {
        Self {
            exchange,
            feed,
            store,
        }
    }

    /// Places the protective order for a freshly registered position at
    /// its current (initial) stop level.
    pub async fn place_initial(&self, pos: &mut Position) -> Result<()> {
        let stop = pos.current_stop_loss;
        self.validate_stop(pos, stop).await?;

        let order_id = self
            .exchange
            .place_stop_order(&pos.symbol, pos.side, stop, pos.quantity)
            .await?;

        info!(
            symbol = %pos.symbol,
            stop = %stop,
            order_id = %order_id,
            "Initial stop order placed"
        );
        pos.stop_order_id = Some(order_id);
        self.persist(pos).await;
        Ok(())
    }

    /// Moves the protective order to `new_stop`.
    ///
    /// Sequence: record the event, cancel the old order (failure is
    /// non-fatal by policy — a stale protective order is safer than
    /// none), place the new order, and only on acceptance update
    /// `current_stop_loss` / `stop_order_id` and persist.
    pub async fn move_stop(
        &self,
        pos: &mut Position,
        new_stop: Decimal,
        reason: &str,
        initiator: StopInitiator,
    ) -> Result<()> {
        self.validate_stop(pos, new_stop).await?;

        let old_stop = pos.current_stop_loss;
        pos.record_stop_event(old_stop, new_stop, reason, initiator);
        if let Some(event) = pos.stop_events.last() {
            if let Err(e) = self.store.append_stop_event(&pos.id, event).await {
                warn!(symbol = %pos.symbol, error = %e, "Failed to persist stop event");
            }
        }

        if let Some(order_id) = pos.stop_order_id.clone() {
            match self.exchange.cancel_order(&pos.symbol, &order_id).await {
                Ok(()) => {
                    pos.stop_order_id = None;
                }
                Err(StopError::OrderNotFound { .. }) => {
                    // Already gone on the exchange side
                    pos.stop_order_id = None;
                }
                Err(e) => {
                    // Non-fatal by policy: continue with the replacement
                    // so protection is not halted by a cancel hiccup.
                    warn!(
                        symbol = %pos.symbol,
                        order_id = %order_id,
                        error = %e,
                        "Failed to cancel previous stop order, continuing with replacement"
                    );
                }
            }
        }

        let order_id = self
            .exchange
            .place_stop_order(&pos.symbol, pos.side, new_stop, pos.quantity)
            .await?;

        pos.current_stop_loss = new_stop;
        pos.stop_order_id = Some(order_id.clone());
        info!(
            symbol = %pos.symbol,
            old_stop = %old_stop,
            new_stop = %new_stop,
            order_id = %order_id,
            initiator = %initiator,
            reason,
            "Stop order moved"
        );
        self.persist(pos).await;
        Ok(())
    }

    /// Rejects a stop on the wrong side of the live market price, which
    /// would fill the moment it is submitted.
    async fn validate_stop(&self, pos: &Position, stop: Decimal) -> Result<()> {
        let market = self.feed.latest_price(&pos.symbol).await?;
        let safe = match pos.side {
            Side::Long => stop < market,
            Side::Short => stop > market,
        };
        if safe {
            Ok(())
        } else {
            Err(StopError::WouldTriggerImmediately {
                side: pos.side,
                stop,
                market,
            })
        }
    }

    /// Persistence failures are logged and absorbed: in-memory state
    /// stays authoritative and the next successful write carries it.
    async fn persist(&self, pos: &Position) {
        if let Err(e) = self.store.update(&pos.to_record()).await {
            warn!(symbol = %pos.symbol, error = %e, "Failed to persist position state");
        }
    }
}
