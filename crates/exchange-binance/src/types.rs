//! Raw wire types for the Binance USD-M futures REST API.
//!
//! Prices and quantities arrive as decimal strings; conversions into
//! domain types parse them exactly and reject malformed payloads
//! instead of silently defaulting.

use rust_decimal::Decimal;
use serde::Deserialize;

use stopguard_core::error::{Result, StopError};
use stopguard_core::position::{ExchangePositionView, Side};
use stopguard_core::traits::{Candle, OrderState, OrderStatus};

/// Error body Binance returns alongside non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}

/// Binance error code: unknown order (cancel/query of a gone order).
pub const CODE_UNKNOWN_ORDER: i64 = -2011;

/// Binance error code: no such order exists.
pub const CODE_NO_SUCH_ORDER: i64 = -2013;

/// Binance error code: request weight limit exceeded.
pub const CODE_TOO_MANY_REQUESTS: i64 = -1003;

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str_exact(value)
        .map_err(|e| StopError::Serialization(format!("bad decimal in {field}: {value:?} ({e})")))
}

/// `GET /fapi/v1/ticker/price` response.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: String,
}

impl TickerPrice {
    pub fn price(&self) -> Result<Decimal> {
        parse_decimal("ticker price", &self.price)
    }
}

/// One kline from `GET /fapi/v1/klines`. Binance encodes a kline as a
/// positional JSON array; only the OHLC fields matter here.
#[derive(Debug, Clone, Deserialize)]
pub struct RawKline(
    pub i64,    // open time
    pub String, // open
    pub String, // high
    pub String, // low
    pub String, // close
    pub String, // volume
    pub i64,    // close time
    pub String, // quote asset volume
    pub i64,    // number of trades
    pub String, // taker buy base volume
    pub String, // taker buy quote volume
    pub String, // ignored
);

impl RawKline {
    pub fn to_candle(&self) -> Result<Candle> {
        Ok(Candle {
            high: parse_decimal("kline high", &self.2)?,
            low: parse_decimal("kline low", &self.3)?,
            close: parse_decimal("kline close", &self.4)?,
        })
    }
}

/// Order as returned by `POST`/`GET`/`DELETE /fapi/v1/order`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    pub order_id: i64,
    pub status: String,
    #[serde(default)]
    pub avg_price: Option<String>,
    #[serde(default)]
    pub executed_qty: Option<String>,
}

impl RawOrder {
    pub fn to_status(&self) -> Result<OrderStatus> {
        let state = match self.status.as_str() {
            "NEW" => OrderState::New,
            "PARTIALLY_FILLED" => OrderState::PartiallyFilled,
            "FILLED" => OrderState::Filled,
            "CANCELED" => OrderState::Canceled,
            "EXPIRED" | "EXPIRED_IN_MATCH" => OrderState::Expired,
            other => {
                return Err(StopError::Serialization(format!(
                    "unknown order status: {other:?}"
                )))
            }
        };

        // Binance reports "0" for orders that have not filled at all
        let avg_fill_price = match self.avg_price.as_deref() {
            None | Some("") | Some("0") => None,
            Some(raw) => {
                let price = parse_decimal("order avgPrice", raw)?;
                (price > Decimal::ZERO).then_some(price)
            }
        };

        Ok(OrderStatus {
            state,
            avg_fill_price,
        })
    }
}

/// One entry from `GET /fapi/v2/positionRisk`. In one-way position
/// mode the sign of `positionAmt` carries the side.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPositionRisk {
    pub symbol: String,
    pub position_amt: String,
    #[serde(default)]
    pub entry_price: Option<String>,
}

impl RawPositionRisk {
    /// Converts to the domain view, or `None` for a flat position.
    pub fn to_view(&self) -> Result<Option<ExchangePositionView>> {
        let amt = parse_decimal("positionAmt", &self.position_amt)?;
        if amt.is_zero() {
            return Ok(None);
        }
        let side = if amt > Decimal::ZERO {
            Side::Long
        } else {
            Side::Short
        };
        Ok(Some(ExchangePositionView {
            side,
            size: amt.abs(),
        }))
    }
}
