//! Gateway tests against a mocked Binance REST API.

use std::sync::Arc;

use rust_decimal_macros::dec;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stopguard_binance::{BinanceClient, BinanceClientConfig, BinanceGateway};
use stopguard_core::error::StopError;
use stopguard_core::position::Side;
use stopguard_core::traits::{ExchangeGateway, OrderState, PriceFeed};

fn gateway_for(server: &MockServer) -> BinanceGateway {
    let config = BinanceClientConfig {
        api_key: "test-key".to_string(),
        api_secret: "test-secret".to_string(),
        ..BinanceClientConfig::default()
    }
    .with_base_url(server.uri());
    BinanceGateway::new(Arc::new(BinanceClient::new(config).unwrap()))
}

#[tokio::test]
async fn latest_price_parses_ticker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fapi/v1/ticker/price"))
        .and(query_param("symbol", "BTCUSDT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "symbol": "BTCUSDT",
            "price": "67123.40"
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let price = gateway.latest_price("BTC/USDT").await.unwrap();
    assert_eq!(price, dec!(67123.40));
}

#[tokio::test]
async fn latest_candle_uses_single_kline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fapi/v1/klines"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("interval", "15m"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([[
            1716000000000i64,
            "67000.1",
            "67250.5",
            "66800.0",
            "67100.2",
            "123.4",
            1716000899999i64,
            "8280000.0",
            4521,
            "60.1",
            "4030000.0",
            "0"
        ]])))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let candle = gateway.latest_candle("BTCUSDT", "15m").await.unwrap();
    assert_eq!(candle.high, dec!(67250.5));
    assert_eq!(candle.low, dec!(66800.0));
    assert_eq!(candle.close, dec!(67100.2));
}

#[tokio::test]
async fn stop_order_is_reduce_only_on_the_closing_side() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fapi/v1/order"))
        .and(query_param("type", "STOP_MARKET"))
        .and(query_param("side", "SELL"))
        .and(query_param("reduceOnly", "true"))
        .and(query_param("stopPrice", "95"))
        .and(header_exists("X-MBX-APIKEY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "orderId": 123456789i64,
            "status": "NEW",
            "avgPrice": "0",
            "executedQty": "0"
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let order_id = gateway
        .place_stop_order("BTCUSDT", Side::Long, dec!(95), dec!(0.5))
        .await
        .unwrap();
    assert_eq!(order_id, "123456789");
}

#[tokio::test]
async fn unknown_order_becomes_order_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/fapi/v1/order"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "code": -2011,
            "msg": "Unknown order sent."
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let err = gateway.cancel_order("BTCUSDT", "42").await.unwrap_err();
    assert!(matches!(err, StopError::OrderNotFound { .. }));
}

#[tokio::test]
async fn filled_order_status_carries_fill_price() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fapi/v1/order"))
        .and(query_param("orderId", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "orderId": 42,
            "status": "FILLED",
            "avgPrice": "94.93",
            "executedQty": "0.5"
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let status = gateway.order_status("BTCUSDT", "42").await.unwrap();
    assert_eq!(status.state, OrderState::Filled);
    assert_eq!(status.avg_fill_price, Some(dec!(94.93)));
}

#[tokio::test]
async fn flat_position_risk_maps_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fapi/v2/positionRisk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "symbol": "BTCUSDT",
            "positionAmt": "0",
            "entryPrice": "0.0"
        }])))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    assert!(gateway.position("BTCUSDT").await.unwrap().is_none());
}

#[tokio::test]
async fn short_position_risk_maps_side_and_size() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fapi/v2/positionRisk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "symbol": "ETHUSDT",
            "positionAmt": "-2.000",
            "entryPrice": "3000.0"
        }])))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let view = gateway.position("ETHUSDT").await.unwrap().unwrap();
    assert_eq!(view.side, Side::Short);
    assert_eq!(view.size, dec!(2.000));
}

#[tokio::test]
async fn rate_limit_response_is_typed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fapi/v1/order"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let err = gateway
        .place_stop_order("BTCUSDT", Side::Long, dec!(95), dec!(0.5))
        .await
        .unwrap_err();
    assert!(matches!(err, StopError::RateLimit { retry_after_secs: 7 }));
}
