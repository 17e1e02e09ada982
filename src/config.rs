//! Configuration management
//!
//! Loads the JSON settings file once at startup into an immutable bundle.
//! API credentials come from the environment so they never live in the
//! config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::Symbol;

/// Immutable settings bundle for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub exchange: ExchangeSettings,
    pub trading: TradingSettings,
    pub horizons: HorizonSettings,
    /// Number of fine bars fetched per refresh
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u32,
}

fn default_fetch_limit() -> u32 {
    500
}

impl Settings {
    /// Load settings from a JSON file, credentials from the environment
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file {}", path.as_ref().display())
        })?;
        let mut settings: Settings =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        if let Ok(api_key) = std::env::var("BINANCE_API_KEY") {
            settings.exchange.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("BINANCE_API_SECRET") {
            settings.exchange.api_secret = Some(api_secret);
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn symbol(&self) -> Symbol {
        Symbol::new(self.trading.symbol.clone())
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.trading.base_size > 0.0,
            "trading.base_size must be positive"
        );
        anyhow::ensure!(
            self.trading.max_total_size >= self.trading.base_size,
            "trading.max_total_size must cover at least one base-size entry"
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&self.trading.hedge_tolerance),
            "trading.hedge_tolerance must be in [0, 1)"
        );
        anyhow::ensure!(
            self.horizons.long.window >= 2 && self.horizons.short.window >= 2,
            "horizon windows must be at least 2"
        );
        anyhow::ensure!(
            (1..=125).contains(&self.trading.leverage),
            "trading.leverage must be between 1 and 125"
        );
        for tf in [&self.horizons.long.timeframe, &self.horizons.short.timeframe] {
            anyhow::ensure!(
                crate::exchange::types::FUTURES_INTERVALS.contains(&tf.as_str()),
                "unsupported timeframe {}",
                tf
            );
        }
        Ok(())
    }
}

/// Exchange connectivity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub testnet: bool,
    /// Requests per second against the venue API
    pub rate_limit: u32,
    pub max_retries: u32,
    /// recvWindow sent with signed requests, milliseconds
    pub recv_window_ms: u64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        ExchangeSettings {
            api_key: None,
            api_secret: None,
            testnet: false,
            rate_limit: 10,
            max_retries: 3,
            recv_window_ms: 60_000,
        }
    }
}

/// Position sizing and risk limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSettings {
    pub symbol: String,
    /// Notional size of a single entry, USDT
    pub base_size: f64,
    /// Hard cap across both strategy instances, USDT
    pub max_total_size: f64,
    /// Pyramiding additions allowed per position
    pub max_add_times: u32,
    /// Permitted long/short notional imbalance when hedged
    pub hedge_tolerance: f64,
    /// Venue minimum order notional, USDT
    pub min_notional: f64,
    /// Daily realized-loss limit as a fraction of capital
    pub max_daily_loss_pct: f64,
    /// Nominal account capital used for the loss limit, USDT
    pub capital: f64,
    /// Leverage applied to the symbol at startup in live mode
    #[serde(default = "default_leverage")]
    pub leverage: u32,
}

fn default_leverage() -> u32 {
    5
}

impl Default for TradingSettings {
    fn default() -> Self {
        TradingSettings {
            symbol: "ETHUSDT".to_string(),
            base_size: 20.0,
            max_total_size: 40.0,
            max_add_times: 1,
            hedge_tolerance: 0.05,
            min_notional: 20.0,
            max_daily_loss_pct: 0.05,
            capital: 400.0,
            leverage: 5,
        }
    }
}

/// One DMR horizon: which bars it reads and how wide its window is
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonConfig {
    /// Strategy instance name, part of the persistence key
    pub name: String,
    /// Bar interval this horizon trades on (e.g. "15m")
    pub timeframe: String,
    /// Rolling-mean window for the DMR series
    pub window: usize,
}

/// The two horizons driving the quadrant model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonSettings {
    pub long: HorizonConfig,
    pub short: HorizonConfig,
}

impl Default for HorizonSettings {
    fn default() -> Self {
        HorizonSettings {
            long: HorizonConfig {
                name: "trend".to_string(),
                timeframe: "15m".to_string(),
                window: 12,
            },
            short: HorizonConfig {
                name: "swing".to_string(),
                timeframe: "5m".to_string(),
                window: 26,
            },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            exchange: ExchangeSettings::default(),
            trading: TradingSettings::default(),
            horizons: HorizonSettings::default(),
            fetch_limit: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.symbol().as_str(), "ETHUSDT");
    }

    #[test]
    fn test_parse_minimal_config() {
        let json = r#"{
            "trading": { "symbol": "BTCUSDT", "base_size": 20.0, "max_total_size": 40.0,
                         "max_add_times": 1, "hedge_tolerance": 0.05, "min_notional": 20.0,
                         "max_daily_loss_pct": 0.05, "capital": 400.0 },
            "horizons": { "long":  { "name": "trend", "timeframe": "15m", "window": 12 },
                          "short": { "name": "swing", "timeframe": "5m", "window": 26 } }
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.trading.symbol, "BTCUSDT");
        assert_eq!(settings.fetch_limit, 500);
        assert_eq!(settings.exchange.recv_window_ms, 60_000);
        assert_eq!(settings.trading.leverage, 5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_excess_leverage() {
        let mut settings = Settings::default();
        settings.trading.leverage = 126;
        assert!(settings.validate().is_err());
        settings.trading.leverage = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_undersized_cap() {
        let mut settings = Settings::default();
        settings.trading.max_total_size = 10.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_timeframe() {
        let mut settings = Settings::default();
        settings.horizons.long.timeframe = "7m".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_tolerance() {
        let mut settings = Settings::default();
        settings.trading.hedge_tolerance = 1.5;
        assert!(settings.validate().is_err());
    }
}
