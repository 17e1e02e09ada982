//! Market data port
//!
//! The strategy side of the system only ever sees validated `Candle`
//! sequences and domain positions; wire formats stay behind this module.

use anyhow::{Context, Result};
use chrono::DateTime;
use tracing::{info, warn};

use crate::exchange::{FuturesClient, RawKline};
use crate::types::{Candle, Symbol};

/// Convert venue klines into validated candles, oldest first
///
/// Rows that fail validation are dropped with a warning rather than
/// poisoning the whole series.
pub fn candles_from_klines(klines: &[RawKline]) -> Vec<Candle> {
    let mut candles: Vec<Candle> = klines
        .iter()
        .filter_map(|k| {
            let datetime = DateTime::from_timestamp_millis(k.open_time)?;
            let candle = Candle {
                datetime,
                open: k.open,
                high: k.high,
                low: k.low,
                close: k.close,
                volume: k.volume,
            };
            match candle.validate() {
                Ok(()) => Some(candle),
                Err(e) => {
                    warn!("Dropping invalid candle at {}: {}", datetime, e);
                    None
                }
            }
        })
        .collect();
    candles.sort_by_key(|c| c.datetime);
    candles.dedup_by_key(|c| c.datetime);
    candles
}

/// Read-side access to the venue for one symbol
#[derive(Clone)]
pub struct MarketDataPort {
    client: FuturesClient,
    symbol: Symbol,
    interval: String,
    fetch_limit: u32,
}

impl MarketDataPort {
    pub fn new(client: FuturesClient, symbol: Symbol, interval: String, fetch_limit: u32) -> Self {
        MarketDataPort {
            client,
            symbol,
            interval,
            fetch_limit,
        }
    }

    /// Fetch a fresh fine-bar series
    pub async fn refresh(&self) -> Result<Vec<Candle>> {
        let klines = self
            .client
            .get_klines(&self.symbol, &self.interval, self.fetch_limit)
            .await
            .with_context(|| format!("Failed to fetch {} {} klines", self.symbol, self.interval))?;
        let candles = candles_from_klines(&klines);
        anyhow::ensure!(
            !candles.is_empty(),
            "no usable candles for {} {}",
            self.symbol,
            self.interval
        );
        Ok(candles)
    }

    /// Log the account balance at startup
    pub async fn log_account_snapshot(&self) {
        match self.client.get_available_balance().await {
            Ok(balance) => info!("Available balance: {:.2} USDT", balance),
            Err(e) => warn!("Could not fetch account balance: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(open_time: i64, close: f64) -> RawKline {
        RawKline {
            open_time,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
            close_time: open_time + 299_999,
        }
    }

    #[test]
    fn test_conversion_sorted_and_deduped() {
        let klines = vec![kline(2_000, 101.0), kline(1_000, 100.0), kline(2_000, 101.0)];
        let candles = candles_from_klines(&klines);
        assert_eq!(candles.len(), 2);
        assert!(candles[0].datetime < candles[1].datetime);
        assert_eq!(candles[0].close, 100.0);
    }

    #[test]
    fn test_invalid_rows_dropped() {
        let mut bad = kline(1_000, 100.0);
        bad.high = 10.0; // below low
        let klines = vec![bad, kline(2_000, 101.0)];
        let candles = candles_from_klines(&klines);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 101.0);
    }
}
