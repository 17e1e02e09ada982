//! Signed client for the USDT-margined futures API
//!
//! Market-data reads go through retry with exponential backoff; order
//! placement is a single attempt so the caller owns the retry semantics.
//! All requests pass the circuit breaker and rate limiter, and signed
//! requests are stamped with synced venue time.

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::clock::ServerClock;
use super::types::{AccountBalance, MarkPrice, OrderAck, OrderForm, PositionRisk, RawKline, VenueErrorBody};
use crate::common::{CircuitBreaker, RateLimiter};
use crate::types::{Symbol, VenuePosition};

/// Production futures API base URL
pub const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
/// Testnet futures API base URL
pub const TESTNET_BASE_URL: &str = "https://testnet.binancefuture.com";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("venue rejected request (code {code}): {msg}")]
    Api { code: i64, msg: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to parse venue response: {0}")]
    Parse(String),
    #[error("circuit breaker open, request rejected")]
    CircuitOpen,
    #[error("API credentials not configured")]
    MissingCredentials,
}

impl ExchangeError {
    /// Venue rejected the timestamp; a clock resync fixes this
    pub fn is_timestamp_skew(&self) -> bool {
        matches!(self, ExchangeError::Api { code, msg }
            if *code == -1021 || msg.contains("Timestamp for this request"))
    }

    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, ExchangeError::Api { code, msg }
            if *code == -2019 || msg.to_lowercase().contains("insufficient"))
    }

    pub fn is_min_notional(&self) -> bool {
        matches!(self, ExchangeError::Api { code, msg }
            if *code == -4164 || msg.contains("MIN_NOTIONAL") || msg.contains("notional"))
    }

    pub fn is_lot_size(&self) -> bool {
        matches!(self, ExchangeError::Api { code, msg }
            if *code == -1111 || *code == -4003 || msg.contains("LOT_SIZE"))
    }

    /// Reduce-only order rejected because the position is already gone
    pub fn is_reduce_only_rejected(&self) -> bool {
        matches!(self, ExchangeError::Api { code, msg }
            if *code == -2022 || msg.contains("ReduceOnly Order is rejected"))
    }

    /// Margin type already set; the venue reports this as an error
    pub fn is_margin_type_unchanged(&self) -> bool {
        matches!(self, ExchangeError::Api { code, msg }
            if *code == -4046 || msg.contains("No need to change margin type"))
    }

    /// Worth retrying as-is: transport failures and venue-side hiccups
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Transport(_) => true,
            ExchangeError::Api { code, .. } => {
                matches!(code, -1001 | -1003 | -1007 | -1016)
            }
            _ => false,
        }
    }

    /// Failures that indicate venue trouble rather than a bad request.
    /// Only these count toward the circuit breaker; parameter rejections
    /// (min notional, lot size, insufficient margin) do not.
    pub fn is_venue_fault(&self) -> bool {
        match self {
            ExchangeError::Transport(_) => true,
            ExchangeError::Api { code, .. } => {
                // HTTP 5xx bodies without a venue error code map to the
                // raw status code
                matches!(code, -1001 | -1003 | -1007 | -1016) || (500..600).contains(code)
            }
            _ => false,
        }
    }
}

/// Client configuration, builder style
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub testnet: bool,
    pub base_url: Option<String>,
    pub max_retries: u32,
    pub timeout: Duration,
    pub rate_limit: usize,
    pub recv_window_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_key: None,
            api_secret: None,
            testnet: false,
            base_url: None,
            max_retries: 3,
            timeout: Duration::from_secs(30),
            rate_limit: 10,
            recv_window_ms: 60_000,
        }
    }
}

impl ClientConfig {
    pub fn with_credentials(
        mut self,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        self.api_key = Some(api_key.into());
        self.api_secret = Some(api_secret.into());
        self
    }

    pub fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    /// Point the client at an arbitrary endpoint, e.g. a local stub server
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_rate_limit(mut self, per_second: usize) -> Self {
        self.rate_limit = per_second;
        self
    }

    pub fn with_recv_window(mut self, ms: u64) -> Self {
        self.recv_window_ms = ms;
        self
    }
}

/// Futures exchange client
#[derive(Clone)]
pub struct FuturesClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    recv_window_ms: u64,
    max_retries: u32,
    clock: Arc<StdMutex<ServerClock>>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    limiter: RateLimiter,
}

impl FuturesClient {
    pub fn new(config: ClientConfig) -> Self {
        let http = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .build()
            .expect("Failed to build HTTP client");

        let base_url = config.base_url.unwrap_or_else(|| {
            if config.testnet {
                TESTNET_BASE_URL.to_string()
            } else {
                FUTURES_BASE_URL.to_string()
            }
        });

        FuturesClient {
            http,
            base_url,
            api_key: config.api_key,
            api_secret: config.api_secret,
            recv_window_ms: config.recv_window_ms,
            max_retries: config.max_retries,
            clock: Arc::new(StdMutex::new(ServerClock::default())),
            breaker: Arc::new(Mutex::new(CircuitBreaker::with_defaults())),
            limiter: RateLimiter::new(config.rate_limit),
        }
    }

    /// Retry wrapper for idempotent reads
    async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> Result<T, ExchangeError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ExchangeError>>,
    {
        {
            let mut breaker = self.breaker.lock().await;
            if !breaker.allow_request() {
                return Err(ExchangeError::CircuitOpen);
            }
        }

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                debug!("Retrying after {}s", delay.as_secs());
                sleep(delay).await;
            }

            self.limiter.acquire().await;

            match operation().await {
                Ok(result) => {
                    self.breaker.lock().await.on_success();
                    return Ok(result);
                }
                Err(e) => {
                    warn!(
                        "Request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_retries + 1,
                        e
                    );
                    if !e.is_transient() {
                        if e.is_venue_fault() {
                            self.breaker.lock().await.on_failure();
                        }
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        self.breaker.lock().await.on_failure();
        Err(last_error.unwrap_or(ExchangeError::CircuitOpen))
    }

    async fn public_get(&self, path: &str, params: &[(String, String)]) -> Result<String, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).query(params).send().await?;
        Self::read_body(response).await
    }

    async fn read_body(response: reqwest::Response) -> Result<String, ExchangeError> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(body);
        }
        match serde_json::from_str::<VenueErrorBody>(&body) {
            Ok(err) => Err(ExchangeError::Api {
                code: err.code,
                msg: err.msg,
            }),
            Err(_) => Err(ExchangeError::Api {
                code: status.as_u16() as i64,
                msg: body,
            }),
        }
    }

    fn sign(&self, query: &str) -> Result<String, ExchangeError> {
        let secret = self
            .api_secret
            .as_deref()
            .ok_or(ExchangeError::MissingCredentials)?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ExchangeError::Parse(e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Fetch venue time and update the clock offset
    pub async fn sync_clock(&self) -> Result<i64, ExchangeError> {
        let body = self
            .execute_with_retry(|| {
                let this = self.clone();
                async move { this.public_get("/fapi/v1/time", &[]).await }
            })
            .await?;

        #[derive(serde::Deserialize)]
        struct TimeResponse {
            #[serde(rename = "serverTime")]
            server_time: i64,
        }
        let resp: TimeResponse =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))?;

        let local_ms = Utc::now().timestamp_millis();
        let mut clock = self.clock.lock().expect("clock mutex poisoned");
        clock.update(resp.server_time, local_ms);
        Ok(clock.offset_ms())
    }

    /// Force a resync before the next signed request
    pub fn invalidate_clock(&self) {
        self.clock.lock().expect("clock mutex poisoned").invalidate();
    }

    async fn ensure_clock(&self) -> Result<(), ExchangeError> {
        let due = {
            let clock = self.clock.lock().expect("clock mutex poisoned");
            clock.needs_sync(Utc::now())
        };
        if due {
            self.sync_clock().await?;
        }
        Ok(())
    }

    /// Single-attempt signed request; the caller owns retry semantics
    async fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<String, ExchangeError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or(ExchangeError::MissingCredentials)?;

        self.ensure_clock().await?;

        {
            let mut breaker = self.breaker.lock().await;
            if !breaker.allow_request() {
                return Err(ExchangeError::CircuitOpen);
            }
        }
        self.limiter.acquire().await;

        let timestamp = {
            let clock = self.clock.lock().expect("clock mutex poisoned");
            clock.stamp(Utc::now().timestamp_millis())
        };
        params.push(("recvWindow".to_string(), self.recv_window_ms.to_string()));
        params.push(("timestamp".to_string(), timestamp.to_string()));

        let query: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await?;

        let result = Self::read_body(response).await;
        match &result {
            Ok(_) => self.breaker.lock().await.on_success(),
            Err(e) => {
                if e.is_timestamp_skew() {
                    warn!("Timestamp skew rejected by venue, clock resync scheduled");
                    self.invalidate_clock();
                }
                // Parameter rejections are our fault, not the venue's;
                // tripping the breaker on them would blind the whole bot
                if e.is_venue_fault() {
                    self.breaker.lock().await.on_failure();
                }
            }
        }
        result
    }

    /// Fetch klines for a symbol, oldest first
    pub async fn get_klines(
        &self,
        symbol: &Symbol,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<RawKline>, ExchangeError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("interval".to_string(), interval.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        let body = self
            .execute_with_retry(|| {
                let this = self.clone();
                let params = params.clone();
                async move { this.public_get("/fapi/v1/klines", &params).await }
            })
            .await?;

        let raw: Vec<Vec<serde_json::Value>> =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))?;
        Ok(raw.iter().filter_map(|row| RawKline::from_raw(row)).collect())
    }

    /// Current mark price
    pub async fn get_mark_price(&self, symbol: &Symbol) -> Result<f64, ExchangeError> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let body = self
            .execute_with_retry(|| {
                let this = self.clone();
                let params = params.clone();
                async move { this.public_get("/fapi/v1/premiumIndex", &params).await }
            })
            .await?;
        let mark: MarkPrice =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))?;
        mark.mark_price
            .parse()
            .map_err(|_| ExchangeError::Parse(format!("bad mark price {}", mark.mark_price)))
    }

    /// Open positions for a symbol; zero-amount rows are dropped
    pub async fn get_positions(&self, symbol: &Symbol) -> Result<Vec<VenuePosition>, ExchangeError> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let body = self
            .signed_request(reqwest::Method::GET, "/fapi/v2/positionRisk", params)
            .await?;
        let rows: Vec<PositionRisk> =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))?;
        Ok(rows.iter().filter_map(|r| r.to_venue_position()).collect())
    }

    /// Available USDT balance on the futures wallet
    pub async fn get_available_balance(&self) -> Result<f64, ExchangeError> {
        let body = self
            .signed_request(reqwest::Method::GET, "/fapi/v2/balance", vec![])
            .await?;
        let rows: Vec<AccountBalance> =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))?;
        rows.iter()
            .find(|b| b.asset == "USDT")
            .and_then(|b| b.available_balance.parse().ok())
            .ok_or_else(|| ExchangeError::Parse("no USDT balance row".to_string()))
    }

    /// Place an order; single attempt
    pub async fn place_order(&self, form: &OrderForm) -> Result<OrderAck, ExchangeError> {
        let body = self
            .signed_request(reqwest::Method::POST, "/fapi/v1/order", form.to_params())
            .await?;
        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))
    }

    /// Query the current state of an order
    pub async fn get_order(
        &self,
        symbol: &Symbol,
        order_id: i64,
    ) -> Result<OrderAck, ExchangeError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];
        let body = self
            .signed_request(reqwest::Method::GET, "/fapi/v1/order", params)
            .await?;
        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))
    }

    /// Cancel a resting order; the ack carries any quantity that already traded
    pub async fn cancel_order(
        &self,
        symbol: &Symbol,
        order_id: i64,
    ) -> Result<OrderAck, ExchangeError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];
        let body = self
            .signed_request(reqwest::Method::DELETE, "/fapi/v1/order", params)
            .await?;
        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))
    }

    /// Set leverage for a symbol
    pub async fn set_leverage(&self, symbol: &Symbol, leverage: u32) -> Result<(), ExchangeError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("leverage".to_string(), leverage.to_string()),
        ];
        self.signed_request(reqwest::Method::POST, "/fapi/v1/leverage", params)
            .await?;
        Ok(())
    }

    /// Set the margin type for a symbol. The venue answers with an error
    /// when the margin type is already what we asked for; that is not a
    /// failure.
    pub async fn set_margin_type(
        &self,
        symbol: &Symbol,
        margin_type: &str,
    ) -> Result<(), ExchangeError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("marginType".to_string(), margin_type.to_string()),
        ];
        match self
            .signed_request(reqwest::Method::POST, "/fapi/v1/marginType", params)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_margin_type_unchanged() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
