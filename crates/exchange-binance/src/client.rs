//! Binance USD-M futures REST client with rate limiting and request
//! signing.
//!
//! Signed endpoints carry an HMAC-SHA256 signature over the query
//! string plus a `recvWindow`/`timestamp` pair; the API key travels in
//! the `X-MBX-APIKEY` header. All requests pass through a shared
//! request-rate limiter.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use nonzero_ext::nonzero;
use reqwest::{Client, Method, Response};
use sha2::Sha256;

use stopguard_core::config::BinanceConfig;
use stopguard_core::error::{Result, StopError};

use crate::types::{ApiError, CODE_TOO_MANY_REQUESTS};

type HmacSha256 = Hmac<Sha256>;

/// Binance USD-M futures production base URL.
pub const BINANCE_FUTURES_URL: &str = "https://fapi.binance.com";

/// Binance USD-M futures testnet base URL.
pub const BINANCE_FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Configuration for the Binance client.
#[derive(Debug, Clone)]
pub struct BinanceClientConfig {
    /// Base URL for the API.
    pub base_url: String,

    /// API key, sent in the `X-MBX-APIKEY` header.
    pub api_key: String,

    /// API secret used for HMAC signing.
    pub api_secret: String,

    /// Signed-request validity window in milliseconds.
    pub recv_window_ms: u64,

    /// Requests per second limit.
    pub requests_per_second: NonZeroU32,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BinanceClientConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_FUTURES_URL.to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5000,
            requests_per_second: nonzero!(20u32),
            timeout_secs: 30,
        }
    }
}

impl BinanceClientConfig {
    /// Builds a client configuration from the application settings.
    #[must_use]
    pub fn from_settings(settings: &BinanceConfig) -> Self {
        Self {
            base_url: settings.api_url.clone(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            recv_window_ms: settings.recv_window_ms,
            ..Self::default()
        }
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// Binance USD-M futures REST client.
pub struct BinanceClient {
    config: BinanceClientConfig,
    http: Client,
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.config.base_url)
            .field("requests_per_second", &self.config.requests_per_second)
            .finish_non_exhaustive()
    }
}

impl BinanceClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built or the API
    /// secret is empty.
    pub fn new(config: BinanceClientConfig) -> Result<Self> {
        if config.api_secret.is_empty() {
            return Err(StopError::Configuration(
                "binance api_secret is not set".to_string(),
            ));
        }

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StopError::Network(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_second(config.requests_per_second);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            config,
            http,
            rate_limiter,
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// HMAC-SHA256 signature over the query string, hex-encoded.
    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|e| StopError::Configuration(format!("invalid api secret: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Waits for the rate limiter and performs an unsigned GET against
    /// a public market-data endpoint.
    pub(crate) async fn public_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let query = Self::build_query(params);
        let url = format!("{}{}?{}", self.config.base_url, path, query);
        tracing::debug!("GET {}", url);

        let response = self.http.get(&url).send().await?;
        Self::handle_response(response).await
    }

    /// Waits for the rate limiter and performs a signed request. The
    /// `recvWindow`, `timestamp` and `signature` parameters are
    /// appended to the caller's query.
    pub(crate) async fn signed<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let mut all = params.to_vec();
        let recv_window = self.config.recv_window_ms.to_string();
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        all.push(("recvWindow", recv_window));
        all.push(("timestamp", timestamp));

        let query = Self::build_query(&all);
        let signature = self.sign(&query)?;
        let url = format!(
            "{}{}?{}&signature={}",
            self.config.base_url, path, query, signature
        );
        tracing::debug!("{} {}{}", method, self.config.base_url, path);

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Maps a raw HTTP response to a typed body or a typed error.
    async fn handle_response<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();

        if status.as_u16() == 429 || status.as_u16() == 418 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(StopError::RateLimit {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ApiError>(&text) {
                Ok(api) if api.code == CODE_TOO_MANY_REQUESTS => StopError::RateLimit {
                    retry_after_secs: 60,
                },
                Ok(api) => StopError::Exchange {
                    code: api.code,
                    message: api.msg,
                },
                Err(_) => StopError::Exchange {
                    code: i64::from(status.as_u16()),
                    message: text,
                },
            });
        }

        let body = response.json::<T>().await?;
        Ok(body)
    }
}
