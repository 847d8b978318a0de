//! Binance USD-M futures integration.
//!
//! [`BinanceClient`] handles transport, signing and rate limiting;
//! [`BinanceGateway`] adapts it to the [`stopguard_core::ExchangeGateway`]
//! and [`stopguard_core::PriceFeed`] seams the lifecycle manager consumes.

pub mod client;
pub mod gateway;
pub mod types;

pub use client::{BinanceClient, BinanceClientConfig, BINANCE_FUTURES_TESTNET_URL, BINANCE_FUTURES_URL};
pub use gateway::BinanceGateway;
