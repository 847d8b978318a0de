pub mod config;
pub mod config_loader;
pub mod error;
pub mod position;
pub mod symbol;
pub mod traits;

pub use config::{AppConfig, BinanceConfig, DatabaseConfig, ServiceConfig, StopPolicyConfig};
pub use config_loader::ConfigLoader;
pub use error::{Result, StopError};
pub use position::{
    ExchangePositionView, Position, PositionRecord, Side, StopInitiator, StopLossEvent, StopMode,
};
pub use traits::{Candle, ExchangeGateway, OrderState, OrderStatus, PositionStore, PriceFeed};
