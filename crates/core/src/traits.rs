//! Gateway traits for the external collaborators: the price feed, the
//! exchange, and durable storage. The lifecycle manager only ever talks
//! to these seams, so tests swap in in-memory implementations.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::position::{ExchangePositionView, PositionRecord, Side, StopLossEvent};

/// One candle of market data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candle {
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Lifecycle state of an exchange order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
}

/// Status of an order as reported by the exchange.
#[derive(Debug, Clone, Copy)]
pub struct OrderStatus {
    pub state: OrderState,
    /// Average fill price, present once the order has (partially) filled.
    pub avg_fill_price: Option<Decimal>,
}

/// Supplies latest prices and candles for a symbol.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest traded price.
    async fn latest_price(&self, symbol: &str) -> Result<Decimal>;

    /// Latest complete candle for the given interval (e.g. "15m"),
    /// used to extend the extreme price without refetching history.
    async fn latest_candle(&self, symbol: &str, interval: &str) -> Result<Candle>;
}

/// Places, cancels, and queries exchange-side orders and positions.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Places a reduce-only stop order protecting a position of the
    /// given side. Returns the exchange order id.
    async fn place_stop_order(
        &self,
        symbol: &str,
        side: Side,
        stop_price: Decimal,
        quantity: Decimal,
    ) -> Result<String>;

    /// Cancels an order by id.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    /// Queries the status of an order by id.
    async fn order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatus>;

    /// The exchange's current view of the position, or `None` if the
    /// exchange holds no position for the symbol.
    async fn position(&self, symbol: &str) -> Result<Option<ExchangePositionView>>;

    /// Closes (part of) a position at market.
    async fn close_market(&self, symbol: &str, side: Side, quantity: Decimal) -> Result<()>;
}

/// Durable store of position records.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn insert(&self, record: &PositionRecord) -> Result<()>;

    async fn update(&self, record: &PositionRecord) -> Result<()>;

    async fn fetch(&self, id: &str) -> Result<Option<PositionRecord>>;

    /// All records not yet marked closed, for startup re-hydration.
    async fn open_positions(&self) -> Result<Vec<PositionRecord>>;

    async fn append_stop_event(&self, position_id: &str, event: &StopLossEvent) -> Result<()>;
}
