//! [`ExchangeGateway`] and [`PriceFeed`] implementations over the
//! Binance futures REST client.
//!
//! Read-only calls are retried with exponential backoff on transient
//! failures. Order placement is never retried here: a timed-out
//! placement may still have gone through, and a blind retry could
//! leave two live stop orders. The caller decides how to recover.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use tracing::{info, warn};

use stopguard_core::error::{Result, StopError};
use stopguard_core::position::{ExchangePositionView, Side};
use stopguard_core::symbol::normalize;
use stopguard_core::traits::{Candle, ExchangeGateway, OrderStatus, PriceFeed};

use crate::client::BinanceClient;
use crate::types::{RawKline, RawOrder, RawPositionRisk, TickerPrice, CODE_NO_SUCH_ORDER, CODE_UNKNOWN_ORDER};

const READ_RETRY_ATTEMPTS: u32 = 3;

/// Binance USD-M futures gateway.
pub struct BinanceGateway {
    client: Arc<BinanceClient>,
}

impl BinanceGateway {
    #[must_use]
    pub fn new(client: Arc<BinanceClient>) -> Self {
        Self { client }
    }

    /// Retries a read-only operation on transient errors. Validation
    /// and exchange-rejection errors fail immediately.
    async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < READ_RETRY_ATTEMPTS => {
                    let delay = e.retry_delay_secs().unwrap_or(1) << attempt;
                    warn!(
                        operation = what,
                        attempt = attempt + 1,
                        delay_secs = delay,
                        error = %e,
                        "Transient error, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Binance order side string for the given direction of trade.
    fn order_side(side: Side) -> &'static str {
        match side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        }
    }

    /// Maps "unknown order" exchange rejections to the typed
    /// [`StopError::OrderNotFound`] the lifecycle manager branches on.
    fn map_order_error(err: StopError, order_id: &str) -> StopError {
        match err {
            StopError::Exchange { code, .. }
                if code == CODE_UNKNOWN_ORDER || code == CODE_NO_SUCH_ORDER =>
            {
                StopError::order_not_found(order_id)
            }
            other => other,
        }
    }
}

#[async_trait]
impl PriceFeed for BinanceGateway {
    async fn latest_price(&self, symbol: &str) -> Result<Decimal> {
        let symbol = normalize(symbol);
        Self::with_retry("latest_price", || {
            let client = Arc::clone(&self.client);
            let symbol = symbol.clone();
            async move {
                let params = [("symbol", symbol)];
                let ticker: TickerPrice =
                    client.public_get("/fapi/v1/ticker/price", &params).await?;
                ticker.price()
            }
        })
        .await
    }

    async fn latest_candle(&self, symbol: &str, interval: &str) -> Result<Candle> {
        let symbol = normalize(symbol);
        Self::with_retry("latest_candle", || {
            let client = Arc::clone(&self.client);
            let symbol = symbol.clone();
            let interval = interval.to_string();
            async move {
                let params = [
                    ("symbol", symbol.clone()),
                    ("interval", interval),
                    ("limit", "1".to_string()),
                ];
                let klines: Vec<RawKline> = client.public_get("/fapi/v1/klines", &params).await?;
                let kline = klines.first().ok_or_else(|| {
                    StopError::Serialization(format!("no klines returned for {symbol}"))
                })?;
                kline.to_candle()
            }
        })
        .await
    }
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    async fn place_stop_order(
        &self,
        symbol: &str,
        side: Side,
        stop_price: Decimal,
        quantity: Decimal,
    ) -> Result<String> {
        let symbol = normalize(symbol);
        // A protective stop closes the position, so the order side is
        // the opposite of the position side.
        let params = [
            ("symbol", symbol.clone()),
            ("side", Self::order_side(side.opposite()).to_string()),
            ("type", "STOP_MARKET".to_string()),
            ("stopPrice", stop_price.normalize().to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("reduceOnly", "true".to_string()),
        ];
        let order: RawOrder = self
            .client
            .signed(Method::POST, "/fapi/v1/order", &params)
            .await?;

        info!(
            symbol = %symbol,
            order_id = order.order_id,
            stop = %stop_price,
            "Stop order accepted by exchange"
        );
        Ok(order.order_id.to_string())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let symbol = normalize(symbol);
        let params = [
            ("symbol", symbol),
            ("orderId", order_id.to_string()),
        ];
        let _: RawOrder = self
            .client
            .signed(Method::DELETE, "/fapi/v1/order", &params)
            .await
            .map_err(|e| Self::map_order_error(e, order_id))?;
        Ok(())
    }

    async fn order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatus> {
        let symbol = normalize(symbol);
        Self::with_retry("order_status", || {
            let client = Arc::clone(&self.client);
            let symbol = symbol.clone();
            let order_id = order_id.to_string();
            async move {
                let params = [("symbol", symbol), ("orderId", order_id.clone())];
                let order: RawOrder = client
                    .signed(Method::GET, "/fapi/v1/order", &params)
                    .await
                    .map_err(|e| Self::map_order_error(e, &order_id))?;
                order.to_status()
            }
        })
        .await
    }

    async fn position(&self, symbol: &str) -> Result<Option<ExchangePositionView>> {
        let symbol = normalize(symbol);
        Self::with_retry("position", || {
            let client = Arc::clone(&self.client);
            let symbol = symbol.clone();
            async move {
                let params = [("symbol", symbol.clone())];
                let positions: Vec<RawPositionRisk> = client
                    .signed(Method::GET, "/fapi/v2/positionRisk", &params)
                    .await?;
                match positions.iter().find(|p| p.symbol == symbol) {
                    Some(risk) => risk.to_view(),
                    None => Ok(None),
                }
            }
        })
        .await
    }

    async fn close_market(&self, symbol: &str, side: Side, quantity: Decimal) -> Result<()> {
        let symbol = normalize(symbol);
        let params = [
            ("symbol", symbol.clone()),
            ("side", Self::order_side(side).to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("reduceOnly", "true".to_string()),
        ];
        let order: RawOrder = self
            .client
            .signed(Method::POST, "/fapi/v1/order", &params)
            .await?;

        info!(
            symbol = %symbol,
            order_id = order.order_id,
            quantity = %quantity,
            "Market close order accepted by exchange"
        );
        Ok(())
    }
}
