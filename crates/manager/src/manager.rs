//! The lifecycle façade other subsystems call.
//!
//! Composes the registry, policy engine, order synchronizer, and
//! reconciler. Every public operation is safe to call concurrently
//! across distinct symbols; operations on the same symbol are
//! serialized by the registry's symbol guard around the whole
//! read→decide→place→persist sequence, while network calls never run
//! under the registry map lock.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use stopguard_core::config::StopPolicyConfig;
use stopguard_core::error::{Result, StopError};
use stopguard_core::position::{Position, Side, StopInitiator};
use stopguard_core::traits::{ExchangeGateway, PositionStore, PriceFeed};

use crate::policy;
use crate::reconcile::{OrderCheckOutcome, ReconcileOutcome, Reconciler};
use crate::registry::PositionRegistry;
use crate::sync::OrderSynchronizer;

/// End state of a reconciliation-style operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStatus {
    /// Local and exchange state agree.
    InSync,
    /// Local side/size was overwritten with the exchange's view.
    Adjusted,
    /// The position was found externally closed and has been absorbed.
    Closed,
}

pub struct LifecycleManager {
    registry: Arc<PositionRegistry>,
    exchange: Arc<dyn ExchangeGateway>,
    store: Arc<dyn PositionStore>,
    synchronizer: OrderSynchronizer,
    reconciler: Reconciler,
    config: StopPolicyConfig,
    candle_interval: String,
    feed: Arc<dyn PriceFeed>,
}

impl LifecycleManager {
    pub fn new(
        exchange: Arc<dyn ExchangeGateway>,
        feed: Arc<dyn PriceFeed>,
        store: Arc<dyn PositionStore>,
        config: StopPolicyConfig,
        candle_interval: impl Into<String>,
    ) -> Self {
        let registry = Arc::new(PositionRegistry::new());
        let synchronizer = OrderSynchronizer::new(
            Arc::clone(&exchange),
            Arc::clone(&feed),
            Arc::clone(&store),
        );
        let reconciler = Reconciler::new(
            Arc::clone(&exchange),
            Arc::clone(&feed),
            Arc::clone(&registry),
            &config,
        );
        Self {
            registry,
            exchange,
            store,
            synchronizer,
            reconciler,
            config,
            candle_interval: candle_interval.into(),
            feed,
        }
    }

    /// Registers a newly opened position for management and persists
    /// its record. The protective order is placed separately via
    /// [`Self::place_initial_stop_loss`].
    pub async fn register_position(&self, position: Position) -> Result<()> {
        let _guard = self.registry.symbol_guard(&position.symbol).await;

        info!(
            symbol = %position.symbol,
            side = %position.side,
            entry = %position.entry_price,
            stop = %position.initial_stop_loss,
            "Position registered"
        );
        if let Err(e) = self.store.insert(&position.to_record()).await {
            warn!(symbol = %position.symbol, error = %e, "Failed to persist new position");
        }
        self.registry.register(position).await;
        Ok(())
    }

    /// Removes a position from management without touching the
    /// exchange. Prefer [`Self::close_position`] for a full close.
    pub async fn remove_position(&self, symbol: &str) {
        let _guard = self.registry.symbol_guard(symbol).await;
        if self.registry.remove(symbol).await.is_some() {
            info!(symbol, "Position removed from management");
        }
    }

    /// Places the initial protective order for a registered position.
    pub async fn place_initial_stop_loss(&self, symbol: &str) -> Result<()> {
        let _guard = self.registry.symbol_guard(symbol).await;

        let mut pos = self
            .registry
            .get(symbol)
            .await
            .ok_or_else(|| StopError::position_not_found(symbol))?;
        self.synchronizer.place_initial(&mut pos).await?;
        self.registry.replace(&pos).await;
        Ok(())
    }

    /// Applies an externally-proposed stop level.
    ///
    /// Rejects any move against the position (long stops only rise,
    /// short stops only fall) with a typed error rather than clamping.
    /// Moves smaller than the configured minimum fraction are skipped
    /// to avoid churning the exchange order.
    pub async fn update_stop_loss(
        &self,
        symbol: &str,
        new_stop: Decimal,
        reason: &str,
    ) -> Result<()> {
        let _guard = self.registry.symbol_guard(symbol).await;

        let mut pos = self
            .registry
            .get(symbol)
            .await
            .ok_or_else(|| StopError::position_not_found(symbol))?;

        let current = pos.current_stop_loss;
        let unfavorable = match pos.side {
            Side::Long => new_stop < current,
            Side::Short => new_stop > current,
        };
        if unfavorable {
            warn!(
                symbol = %pos.symbol,
                current = %current,
                proposed = %new_stop,
                "Rejected proposed stop: previous protective level remains in force"
            );
            return Err(StopError::UnfavorableMove {
                side: pos.side,
                current,
                proposed: new_stop,
            });
        }

        if !current.is_zero() {
            let change = ((new_stop - current) / current).abs();
            if change < self.config.min_stop_move {
                info!(
                    symbol = %pos.symbol,
                    current = %current,
                    proposed = %new_stop,
                    "Proposed stop move below minimum, skipping"
                );
                return Ok(());
            }
        }

        self.synchronizer
            .move_stop(&mut pos, new_stop, reason, StopInitiator::External)
            .await?;
        self.registry.replace(&pos).await;
        Ok(())
    }

    /// Folds the latest candle into the position's price state, then
    /// evaluates the stop policy and applies any resulting move, plus
    /// the one-shot partial take-profit when enabled.
    pub async fn refresh_market_state(&self, symbol: &str) -> Result<()> {
        let _guard = self.registry.symbol_guard(symbol).await;

        let Some(mut pos) = self.registry.get(symbol).await else {
            return Ok(());
        };

        let candle = self
            .feed
            .latest_candle(&pos.symbol, &self.candle_interval)
            .await?;
        pos.observe_candle(candle.high, candle.low, candle.close);
        self.registry.replace(&pos).await;
        if let Err(e) = self.store.update(&pos.to_record()).await {
            warn!(symbol = %pos.symbol, error = %e, "Failed to persist price update");
        }

        if let Some(close_qty) = policy::partial_take_profit(&pos, &self.config) {
            match self
                .exchange
                .close_market(&pos.symbol, pos.side.opposite(), close_qty)
                .await
            {
                Ok(()) => {
                    pos.partial_tp_executed = true;
                    pos.quantity -= close_qty;
                    info!(
                        symbol = %pos.symbol,
                        closed = %close_qty,
                        remaining = %pos.quantity,
                        "Partial take-profit executed"
                    );
                    self.registry.replace(&pos).await;
                    if let Err(e) = self.store.update(&pos.to_record()).await {
                        warn!(symbol = %pos.symbol, error = %e, "Failed to persist partial take-profit");
                    }
                }
                Err(e) => {
                    warn!(symbol = %pos.symbol, error = %e, "Partial take-profit failed, will retry next cycle");
                }
            }
        }

        if let Some(decision) = policy::evaluate(&pos, &self.config) {
            pos.stop_mode = decision.mode;
            pos.trailing_distance = decision.trailing_distance;
            match self
                .synchronizer
                .move_stop(&mut pos, decision.new_stop, &decision.reason, StopInitiator::Policy)
                .await
            {
                Ok(()) => {
                    self.registry.replace(&pos).await;
                }
                Err(e) if e.is_validation() => {
                    // Market moved between decision and validation; the
                    // next cycle re-evaluates against fresh prices.
                    warn!(symbol = %pos.symbol, error = %e, "Policy stop move rejected by price check");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Compares local state against the exchange and repairs drift.
    /// An externally-triggered close is absorbed through the close
    /// path exactly once; repeated calls are no-ops.
    pub async fn reconcile_position(&self, symbol: &str) -> Result<ReconcileStatus> {
        let _guard = self.registry.symbol_guard(symbol).await;
        self.reconcile_locked(symbol).await
    }

    /// Queries the protective order's status directly. A filled order
    /// closes the position with its average fill price; an order that
    /// is merely gone falls back to position reconciliation.
    pub async fn check_stop_order_status(&self, symbol: &str) -> Result<ReconcileStatus> {
        let _guard = self.registry.symbol_guard(symbol).await;

        match self.reconciler.check_stop_order(symbol).await? {
            OrderCheckOutcome::Nothing | OrderCheckOutcome::StillLive => {
                Ok(ReconcileStatus::InSync)
            }
            OrderCheckOutcome::OrderGone => self.reconcile_locked(symbol).await,
            OrderCheckOutcome::Filled {
                close_price,
                realized_pnl,
                reason,
            } => {
                if let Some(pos) = self.registry.get(symbol).await {
                    self.close_locked(pos, close_price, &reason, realized_pnl)
                        .await;
                }
                Ok(ReconcileStatus::Closed)
            }
        }
    }

    /// Fully closes a position: cancels the live protective order
    /// (best-effort), removes the position from management, and marks
    /// the persisted record closed. Idempotent: closing an untracked
    /// symbol is a no-op.
    pub async fn close_position(
        &self,
        symbol: &str,
        close_price: Decimal,
        reason: &str,
        realized_pnl: Decimal,
    ) -> Result<()> {
        let _guard = self.registry.symbol_guard(symbol).await;

        let Some(pos) = self.registry.get(symbol).await else {
            info!(symbol, "Close requested for untracked position, nothing to do");
            return Ok(());
        };
        self.close_locked(pos, close_price, reason, realized_pnl)
            .await;
        Ok(())
    }

    pub async fn get_position(&self, symbol: &str) -> Option<Position> {
        self.registry.get(symbol).await
    }

    pub async fn all_positions(&self) -> Vec<Position> {
        self.registry.list().await
    }

    /// Re-hydrates open positions from storage at startup, including
    /// the persisted stop order id, mode, trail distance and extreme
    /// price. The stop-change trail is not re-loaded: the durable
    /// `stop_loss_events` table remains the authoritative history and
    /// restored positions accumulate only new events. The caller
    /// should run a reconciliation pass afterwards so closes that
    /// happened during downtime are absorbed.
    pub async fn restore_from_store(&self) -> Result<Vec<String>> {
        let records = self.store.open_positions().await?;
        let mut restored = Vec::with_capacity(records.len());
        for record in &records {
            let pos = Position::from_record(record);
            info!(
                symbol = %pos.symbol,
                side = %pos.side,
                stop = %pos.current_stop_loss,
                order_id = pos.stop_order_id.as_deref().unwrap_or("-"),
                "Restored position from storage"
            );
            restored.push(pos.symbol.clone());
            self.registry.register(pos).await;
        }
        Ok(restored)
    }

    async fn reconcile_locked(&self, symbol: &str) -> Result<ReconcileStatus> {
        match self.reconciler.reconcile(symbol).await? {
            ReconcileOutcome::InSync => Ok(ReconcileStatus::InSync),
            ReconcileOutcome::Adjusted => {
                if let Some(pos) = self.registry.get(symbol).await {
                    if let Err(e) = self.store.update(&pos.to_record()).await {
                        warn!(symbol = %pos.symbol, error = %e, "Failed to persist reconciled position");
                    }
                }
                Ok(ReconcileStatus::Adjusted)
            }
            ReconcileOutcome::ExternallyClosed {
                close_price,
                realized_pnl,
                reason,
            } => {
                if let Some(pos) = self.registry.get(symbol).await {
                    self.close_locked(pos, close_price, &reason, realized_pnl)
                        .await;
                }
                Ok(ReconcileStatus::Closed)
            }
        }
    }

    /// The single close path. Caller must hold the symbol guard and
    /// have verified the position is still tracked, which makes the
    /// dual close triggers (position vanished / order filled) safe:
    /// whichever fires first removes the registry entry and the other
    /// becomes a no-op upstream.
    async fn close_locked(
        &self,
        pos: Position,
        close_price: Decimal,
        reason: &str,
        realized_pnl: Decimal,
    ) {
        if let Some(order_id) = &pos.stop_order_id {
            match self.exchange.cancel_order(&pos.symbol, order_id).await {
                Ok(()) => {
                    info!(symbol = %pos.symbol, order_id = %order_id, "Stop order cancelled");
                }
                Err(StopError::OrderNotFound { .. }) => {}
                Err(e) => {
                    warn!(
                        symbol = %pos.symbol,
                        order_id = %order_id,
                        error = %e,
                        "Failed to cancel stop order during close, continuing"
                    );
                }
            }
        }

        self.registry.remove(&pos.symbol).await;

        let mut record = pos.to_record();
        record.mark_closed(close_price, reason, realized_pnl);
        if let Err(e) = self.store.update(&record).await {
            warn!(symbol = %pos.symbol, error = %e, "Failed to persist closed position");
        }

        info!(
            symbol = %pos.symbol,
            close_price = %close_price,
            realized_pnl = %realized_pnl,
            reason,
            "Position closed"
        );
    }
}
