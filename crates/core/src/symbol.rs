//! Symbol normalization.
//!
//! Positions are keyed by the exchange-native symbol with separators
//! stripped ("BTC/USDT", "btc-usdt" and "BTCUSDT" all collapse to
//! "BTCUSDT"), so the same underlying asset is never tracked twice.

/// Normalizes a symbol to its exchange-native form.
#[must_use]
pub fn normalize(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
