//! Error types for stop-loss lifecycle management.
//!
//! Validation failures carry no side effects and are surfaced to the
//! caller; transient I/O failures are retried on the next cycle.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::position::Side;

/// Errors that can occur while managing positions and protective orders.
#[derive(Debug, Error)]
pub enum StopError {
    /// A proposed stop would move against the position.
    #[error("{side} stop may only move in the favorable direction: current {current}, proposed {proposed}")]
    UnfavorableMove {
        side: Side,
        current: Decimal,
        proposed: Decimal,
    },

    /// A stop on the wrong side of the market would fill on submission.
    #[error("{side} stop {stop} would trigger immediately at market price {market}")]
    WouldTriggerImmediately {
        side: Side,
        stop: Decimal,
        market: Decimal,
    },

    /// No managed position for the symbol.
    #[error("no managed position for {symbol}")]
    PositionNotFound {
        /// Normalized symbol that was looked up.
        symbol: String,
    },

    /// Order no longer exists on the exchange.
    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: String },

    /// Exchange rejected the request.
    #[error("exchange error {code}: {message}")]
    Exchange { code: i64, message: String },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Persistence layer error. Non-fatal for the running process:
    /// in-memory state remains authoritative.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl StopError {
    /// Creates an exchange error from a code and message.
    pub fn exchange(code: i64, message: impl Into<String>) -> Self {
        Self::Exchange {
            code,
            message: message.into(),
        }
    }

    /// Creates a position-not-found error.
    pub fn position_not_found(symbol: impl Into<String>) -> Self {
        Self::PositionNotFound {
            symbol: symbol.into(),
        }
    }

    /// Creates an order-not-found error.
    pub fn order_not_found(order_id: impl Into<String>) -> Self {
        Self::OrderNotFound {
            order_id: order_id.into(),
        }
    }

    /// Returns true for rejections that carry no side effects and
    /// should not be retried.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnfavorableMove { .. } | Self::WouldTriggerImmediately { .. }
        )
    }

    /// Returns true if the failure is transient and worth retrying on
    /// a later cycle.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimit { .. } => true,
            Self::Exchange { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Suggested retry delay in seconds, if applicable.
    #[must_use]
    pub fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimit { retry_after_secs } => Some(*retry_after_secs),
            Self::Network(_) | Self::Timeout(_) => Some(1),
            Self::Exchange { code, .. } if *code >= 500 => Some(2),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StopError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StopError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for stop-loss operations.
pub type Result<T> = std::result::Result<T, StopError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn unfavorable_move_is_validation_not_transient() {
        let err = StopError::UnfavorableMove {
            side: Side::Long,
            current: dec!(101),
            proposed: dec!(99),
        };
        assert!(err.is_validation());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("101"));
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn would_trigger_immediately_is_validation() {
        let err = StopError::WouldTriggerImmediately {
            side: Side::Short,
            stop: dec!(99),
            market: dec!(100),
        };
        assert!(err.is_validation());
        assert!(err.to_string().contains("immediately"));
    }

    #[test]
    fn network_and_timeout_are_transient() {
        assert!(StopError::Network("refused".into()).is_transient());
        assert!(StopError::Timeout("slow".into()).is_transient());
        assert_eq!(StopError::Network("refused".into()).retry_delay_secs(), Some(1));
    }

    #[test]
    fn exchange_5xx_is_transient_4xx_is_not() {
        assert!(StopError::exchange(503, "unavailable").is_transient());
        assert!(!StopError::exchange(-2011, "Unknown order sent.").is_transient());
        assert_eq!(StopError::exchange(503, "unavailable").retry_delay_secs(), Some(2));
    }

    #[test]
    fn rate_limit_carries_delay() {
        let err = StopError::RateLimit {
            retry_after_secs: 30,
        };
        assert!(err.is_transient());
        assert_eq!(err.retry_delay_secs(), Some(30));
    }

    #[test]
    fn position_not_found_names_symbol() {
        let err = StopError::position_not_found("BTCUSDT");
        assert!(err.to_string().contains("BTCUSDT"));
        assert!(!err.is_validation());
    }
}
