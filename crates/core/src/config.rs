use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub binance: BinanceConfig,
    pub database: DatabaseConfig,
    pub stops: StopPolicyConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    pub api_url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Binance request validity window in milliseconds.
    pub recv_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Maintenance cycle cadence in seconds.
    pub poll_interval_secs: u64,
    /// Candle interval used for extreme-price updates. Should match the
    /// cycle cadence so each tick folds in exactly one new candle.
    pub candle_interval: String,
}

/// Stop-loss policy parameters. All triggers and distances are
/// fractions of price (0.05 = 5%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopPolicyConfig {
    pub enable_breakeven: bool,
    /// Move the stop to entry once unrealized profit reaches this fraction.
    pub breakeven_trigger: Decimal,
    pub enable_trailing: bool,
    /// Start trailing once unrealized profit reaches this fraction.
    pub trailing_trigger: Decimal,
    /// Trail width at activation when no volatility measure is available.
    pub trailing_distance_initial: Decimal,
    /// Trail width after tightening when no volatility measure is available.
    pub trailing_distance_tight: Decimal,
    /// Tighten the trail once unrealized profit reaches this fraction.
    pub trailing_tighten_trigger: Decimal,
    /// ATR-to-price multiplier for the initial trail width.
    pub atr_multiplier_initial: Decimal,
    /// ATR-to-price multiplier for the tightened trail width.
    pub atr_multiplier_tight: Decimal,
    pub enable_partial_tp: bool,
    /// Fraction of the position closed by the one-shot partial take-profit.
    pub partial_tp_ratio: Decimal,
    /// Unrealized profit fraction that fires the partial take-profit.
    pub partial_tp_trigger: Decimal,
    /// Externally-proposed stop moves smaller than this fraction of the
    /// current stop are skipped to avoid churning the exchange order.
    pub min_stop_move: Decimal,
    /// Relative size difference tolerated before reconciliation
    /// overwrites the local quantity.
    pub size_tolerance: Decimal,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            binance: BinanceConfig::default(),
            database: DatabaseConfig::default(),
            stops: StopPolicyConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://fapi.binance.com".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://stopguard.db".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 900,
            candle_interval: "15m".to_string(),
        }
    }
}

impl Default for StopPolicyConfig {
    fn default() -> Self {
        Self {
            enable_breakeven: true,
            breakeven_trigger: Decimal::new(25, 3), // 0.025
            enable_trailing: true,
            trailing_trigger: Decimal::new(5, 2),            // 0.05
            trailing_distance_initial: Decimal::new(3, 2),   // 0.03
            trailing_distance_tight: Decimal::new(2, 2),     // 0.02
            trailing_tighten_trigger: Decimal::new(10, 2),   // 0.10
            atr_multiplier_initial: Decimal::new(15, 1),     // 1.5
            atr_multiplier_tight: Decimal::ONE,
            enable_partial_tp: false,
            partial_tp_ratio: Decimal::new(3, 1),   // 0.3
            partial_tp_trigger: Decimal::new(75, 3), // 0.075
            min_stop_move: Decimal::new(5, 3),      // 0.005
            size_tolerance: Decimal::new(1, 3),     // 0.001
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_triggers_are_ordered() {
        let cfg = StopPolicyConfig::default();
        // breakeven fires before trailing, trailing before tighten
        assert!(cfg.breakeven_trigger < cfg.trailing_trigger);
        assert!(cfg.trailing_trigger < cfg.trailing_tighten_trigger);
        assert!(cfg.trailing_distance_tight < cfg.trailing_distance_initial);
    }

    #[test]
    fn default_values_match_expected_fractions() {
        let cfg = StopPolicyConfig::default();
        assert_eq!(cfg.breakeven_trigger, dec!(0.025));
        assert_eq!(cfg.trailing_trigger, dec!(0.05));
        assert_eq!(cfg.trailing_distance_initial, dec!(0.03));
        assert_eq!(cfg.trailing_distance_tight, dec!(0.02));
        assert_eq!(cfg.trailing_tighten_trigger, dec!(0.10));
        assert_eq!(cfg.partial_tp_trigger, dec!(0.075));
    }
}
