//! Position domain model.
//!
//! A `Position` is the unit of stop-loss management: one open leveraged
//! position on the exchange, together with everything the manager needs
//! to decide how its protective order should evolve — entry, the best
//! price seen since entry, the current stop level and mode, and an
//! append-only history of every stop change.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::symbol;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The opposite side, used when closing a position with a market order.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// How the protective stop is currently being managed.
///
/// The mode only ever advances (`Fixed` → `Breakeven` → `Trailing`);
/// the policy engine never walks it backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMode {
    /// Stop sits where it was placed (at registration or by an external update).
    Fixed,
    /// Stop has been moved to the entry price.
    Breakeven,
    /// Stop follows the extreme price at `trailing_distance`.
    Trailing,
}

impl std::fmt::Display for StopMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Breakeven => write!(f, "breakeven"),
            Self::Trailing => write!(f, "trailing"),
        }
    }
}

impl std::str::FromStr for StopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(Self::Fixed),
            "breakeven" => Ok(Self::Breakeven),
            "trailing" => Ok(Self::Trailing),
            other => Err(format!("unknown stop mode: {other}")),
        }
    }
}

/// Who asked for a stop change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopInitiator {
    /// The internal policy engine (breakeven/trailing transitions).
    Policy,
    /// An external caller proposing a level (e.g. the surrounding signal pipeline).
    External,
}

impl std::fmt::Display for StopInitiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Policy => write!(f, "policy"),
            Self::External => write!(f, "external"),
        }
    }
}

/// One entry in a position's stop-change audit trail. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossEvent {
    pub timestamp: DateTime<Utc>,
    pub old_stop: Decimal,
    pub new_stop: Decimal,
    pub reason: String,
    pub initiator: StopInitiator,
}

/// The exchange's current view of a position, used only while
/// reconciling. Never cached beyond one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangePositionView {
    pub side: Side,
    pub size: Decimal,
}

/// An actively-managed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Key for persistence lookups.
    pub id: String,
    /// Normalized exchange symbol (no separators).
    pub symbol: String,
    pub side: Side,
    /// Base-asset size.
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub leverage: u32,
    /// Last observed price.
    pub current_price: Decimal,
    /// Highest price since entry (long) or lowest (short).
    pub extreme_price: Decimal,
    pub unrealized_pnl: Decimal,
    /// Average true range at entry, if the signal pipeline supplied one.
    /// Scales the trailing distance when present.
    pub atr: Option<Decimal>,
    pub initial_stop_loss: Decimal,
    /// Authoritative protective level.
    pub current_stop_loss: Decimal,
    pub stop_mode: StopMode,
    /// Current trail width as a fraction of price. Only meaningful in trailing mode.
    pub trailing_distance: Decimal,
    /// Exchange order id of the live protective order, if one exists.
    pub stop_order_id: Option<String>,
    pub partial_tp_executed: bool,
    pub open_reason: String,
    /// Stop changes made during this process lifetime. The durable
    /// `stop_loss_events` table holds the full trail across restarts.
    pub stop_events: Vec<StopLossEvent>,
}

impl Position {
    /// Creates a position at trade-open time.
    ///
    /// The symbol is normalized, the extreme price starts at entry, and
    /// the stop mode starts fixed at `initial_stop_loss`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: impl Into<String>,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        entry_price: Decimal,
        initial_stop_loss: Decimal,
        leverage: u32,
        open_reason: impl Into<String>,
        atr: Option<Decimal>,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol::normalize(symbol),
            side,
            quantity,
            entry_price,
            entry_time: Utc::now(),
            leverage,
            current_price: entry_price,
            extreme_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            atr,
            initial_stop_loss,
            current_stop_loss: initial_stop_loss,
            stop_mode: StopMode::Fixed,
            trailing_distance: Decimal::ZERO,
            stop_order_id: None,
            partial_tp_executed: false,
            open_reason: open_reason.into(),
            stop_events: Vec::new(),
        }
    }

    /// Unrealized profit as a fraction of the entry price (0.05 = 5%).
    #[must_use]
    pub fn pnl_fraction(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        match self.side {
            Side::Long => (self.current_price - self.entry_price) / self.entry_price,
            Side::Short => (self.entry_price - self.current_price) / self.entry_price,
        }
    }

    /// Updates the last observed price, extending the extreme price and
    /// recomputing unrealized PnL.
    pub fn observe_price(&mut self, price: Decimal) {
        self.current_price = price;
        match self.side {
            Side::Long => {
                if price > self.extreme_price {
                    self.extreme_price = price;
                }
            }
            Side::Short => {
                if price < self.extreme_price {
                    self.extreme_price = price;
                }
            }
        }
        self.unrealized_pnl = self.pnl_at(price);
    }

    /// Folds the latest candle into the extreme price without replaying
    /// history: the candle high (long) or low (short) can only extend
    /// the stored extreme, and the close becomes the current price.
    pub fn observe_candle(&mut self, high: Decimal, low: Decimal, close: Decimal) {
        match self.side {
            Side::Long => {
                if high > self.extreme_price {
                    self.extreme_price = high;
                }
            }
            Side::Short => {
                if low < self.extreme_price {
                    self.extreme_price = low;
                }
            }
        }
        self.current_price = close;
        self.unrealized_pnl = self.pnl_at(close);
    }

    /// PnL in quote currency if the position were closed at `price`.
    #[must_use]
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        match self.side {
            Side::Long => (price - self.entry_price) * self.quantity,
            Side::Short => (self.entry_price - price) * self.quantity,
        }
    }

    /// Whether `candidate` is strictly more protective than the current
    /// stop. Long stops only move up, short stops only move down.
    #[must_use]
    pub fn is_more_favorable(&self, candidate: Decimal) -> bool {
        match self.side {
            Side::Long => candidate > self.current_stop_loss,
            Side::Short => candidate < self.current_stop_loss,
        }
    }

    /// Appends a stop-change event to the audit trail.
    pub fn record_stop_event(
        &mut self,
        old_stop: Decimal,
        new_stop: Decimal,
        reason: impl Into<String>,
        initiator: StopInitiator,
    ) {
        self.stop_events.push(StopLossEvent {
            timestamp: Utc::now(),
            old_stop,
            new_stop,
            reason: reason.into(),
            initiator,
        });
    }

    /// Builds the persisted record for the current in-memory state.
    #[must_use]
    pub fn to_record(&self) -> PositionRecord {
        PositionRecord {
            id: self.id.clone(),
            symbol: self.symbol.clone(),
            side: self.side,
            quantity: self.quantity,
            entry_price: self.entry_price,
            entry_time: self.entry_time,
            leverage: self.leverage,
            current_price: self.current_price,
            extreme_price: self.extreme_price,
            unrealized_pnl: self.unrealized_pnl,
            atr: self.atr,
            initial_stop_loss: self.initial_stop_loss,
            current_stop_loss: self.current_stop_loss,
            stop_mode: self.stop_mode,
            trailing_distance: self.trailing_distance,
            stop_order_id: self.stop_order_id.clone(),
            partial_tp_executed: self.partial_tp_executed,
            open_reason: self.open_reason.clone(),
            closed: false,
            close_time: None,
            close_price: None,
            close_reason: None,
            realized_pnl: None,
        }
    }

    /// Rebuilds an in-memory position from a persisted record, used
    /// when re-hydrating open positions at startup.
    ///
    /// `stop_events` starts empty: the durable `stop_loss_events`
    /// table is the authoritative audit trail, and the in-memory
    /// vector only collects the changes made during the current
    /// process lifetime.
    #[must_use]
    pub fn from_record(record: &PositionRecord) -> Self {
        Self {
            id: record.id.clone(),
            symbol: symbol::normalize(&record.symbol),
            side: record.side,
            quantity: record.quantity,
            entry_price: record.entry_price,
            entry_time: record.entry_time,
            leverage: record.leverage,
            current_price: record.current_price,
            extreme_price: record.extreme_price,
            unrealized_pnl: record.unrealized_pnl,
            atr: record.atr,
            initial_stop_loss: record.initial_stop_loss,
            current_stop_loss: record.current_stop_loss,
            stop_mode: record.stop_mode,
            trailing_distance: record.trailing_distance,
            stop_order_id: record.stop_order_id.clone(),
            partial_tp_executed: record.partial_tp_executed,
            open_reason: record.open_reason.clone(),
            stop_events: Vec::new(),
        }
    }
}

/// Durable form of a position, as read from and written to storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub leverage: u32,
    pub current_price: Decimal,
    pub extreme_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub atr: Option<Decimal>,
    pub initial_stop_loss: Decimal,
    pub current_stop_loss: Decimal,
    pub stop_mode: StopMode,
    pub trailing_distance: Decimal,
    pub stop_order_id: Option<String>,
    pub partial_tp_executed: bool,
    pub open_reason: String,
    pub closed: bool,
    pub close_time: Option<DateTime<Utc>>,
    pub close_price: Option<Decimal>,
    pub close_reason: Option<String>,
    pub realized_pnl: Option<Decimal>,
}

impl PositionRecord {
    /// Marks the record closed with the final fill details.
    pub fn mark_closed(&mut self, close_price: Decimal, reason: &str, realized_pnl: Decimal) {
        self.closed = true;
        self.close_time = Some(Utc::now());
        self.close_price = Some(close_price);
        self.close_reason = Some(reason.to_string());
        self.realized_pnl = Some(realized_pnl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position() -> Position {
        Position::open(
            "pos-1",
            "BTC/USDT",
            Side::Long,
            dec!(0.5),
            dec!(100),
            dec!(95),
            10,
            "test entry",
            None,
        )
    }

    #[test]
    fn open_normalizes_symbol_and_seeds_extreme() {
        let pos = long_position();
        assert_eq!(pos.symbol, "BTCUSDT");
        assert_eq!(pos.extreme_price, dec!(100));
        assert_eq!(pos.current_price, dec!(100));
        assert_eq!(pos.stop_mode, StopMode::Fixed);
        assert_eq!(pos.current_stop_loss, dec!(95));
    }

    #[test]
    fn observe_price_extends_extreme_for_long() {
        let mut pos = long_position();
        pos.observe_price(dec!(104));
        assert_eq!(pos.extreme_price, dec!(104));
        pos.observe_price(dec!(102));
        // A pullback does not retreat the extreme
        assert_eq!(pos.extreme_price, dec!(104));
        assert_eq!(pos.current_price, dec!(102));
        assert_eq!(pos.unrealized_pnl, dec!(1.0));
    }

    #[test]
    fn observe_price_extends_extreme_down_for_short() {
        let mut pos = long_position();
        pos.side = Side::Short;
        pos.observe_price(dec!(96));
        assert_eq!(pos.extreme_price, dec!(96));
        pos.observe_price(dec!(98));
        assert_eq!(pos.extreme_price, dec!(96));
    }

    #[test]
    fn observe_candle_uses_high_for_long() {
        let mut pos = long_position();
        pos.observe_candle(dec!(107), dec!(101), dec!(105));
        assert_eq!(pos.extreme_price, dec!(107));
        assert_eq!(pos.current_price, dec!(105));
    }

    #[test]
    fn pnl_fraction_is_side_aware() {
        let mut pos = long_position();
        pos.observe_price(dec!(105));
        assert_eq!(pos.pnl_fraction(), dec!(0.05));

        pos.side = Side::Short;
        assert_eq!(pos.pnl_fraction(), dec!(-0.05));
    }

    #[test]
    fn favorability_is_strict() {
        let pos = long_position();
        assert!(pos.is_more_favorable(dec!(96)));
        assert!(!pos.is_more_favorable(dec!(95)));
        assert!(!pos.is_more_favorable(dec!(94)));
    }

    #[test]
    fn record_round_trip_preserves_stop_state() {
        let mut pos = long_position();
        pos.stop_mode = StopMode::Trailing;
        pos.trailing_distance = dec!(0.03);
        pos.stop_order_id = Some("42".to_string());
        pos.observe_price(dec!(110));

        let record = pos.to_record();
        let restored = Position::from_record(&record);
        assert_eq!(restored.stop_mode, StopMode::Trailing);
        assert_eq!(restored.trailing_distance, dec!(0.03));
        assert_eq!(restored.stop_order_id.as_deref(), Some("42"));
        assert_eq!(restored.extreme_price, dec!(110));
    }

    #[test]
    fn rehydration_starts_a_fresh_session_trail() {
        let mut pos = long_position();
        pos.record_stop_event(dec!(95), dec!(100), "breakeven reached", StopInitiator::Policy);
        assert_eq!(pos.stop_events.len(), 1);

        // The durable stop_loss_events table keeps the full history;
        // a restored position only accumulates new changes.
        let restored = Position::from_record(&pos.to_record());
        assert!(restored.stop_events.is_empty());
        assert_eq!(restored.current_stop_loss, pos.current_stop_loss);
    }
}
