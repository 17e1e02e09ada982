//! Core data types used across the trading system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Validation errors for candle data received from the venue
#[derive(Debug, Error, PartialEq)]
pub enum CandleValidationError {
    #[error("high {high} is below low {low}")]
    HighBelowLow { high: f64, low: f64 },
    #[error("negative volume {0}")]
    NegativeVolume(f64),
    #[error("non-finite field in candle at {0}")]
    NonFinite(DateTime<Utc>),
}

impl Candle {
    /// Mid price used by the DMR calculation
    pub fn mid(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    pub fn validate(&self) -> Result<(), CandleValidationError> {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(CandleValidationError::NonFinite(self.datetime));
        }
        if self.high < self.low {
            return Err(CandleValidationError::HighBelowLow {
                high: self.high,
                low: self.low,
            });
        }
        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }
        Ok(())
    }
}

/// Trading pair symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position direction on a hedge-mode futures account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The order side that opens this position side
    pub fn order_side(&self) -> &'static str {
        match self {
            Side::Long => "BUY",
            Side::Short => "SELL",
        }
    }

    /// The order side that closes this position side
    pub fn closing_order_side(&self) -> &'static str {
        match self {
            Side::Long => "SELL",
            Side::Short => "BUY",
        }
    }

    pub fn position_side(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.position_side())
    }
}

/// Which DMR horizon a reading or signal belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Horizon {
    Long,
    Short,
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Horizon::Long => f.write_str("long-horizon"),
            Horizon::Short => f.write_str("short-horizon"),
        }
    }
}

/// Market regime from the signs of the two DMR horizons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quadrant {
    /// Long-horizon positive, short-horizon positive: established uptrend
    T1,
    /// Long-horizon negative, short-horizon negative: established downtrend
    T2,
    /// Long-horizon positive, short-horizon negative: pullback in uptrend
    R1,
    /// Long-horizon negative, short-horizon positive: rally in downtrend
    R2,
    /// Either horizon within tolerance of zero
    Neutral,
}

impl std::fmt::Display for Quadrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Quadrant::T1 => "T1",
            Quadrant::T2 => "T2",
            Quadrant::R1 => "R1",
            Quadrant::R2 => "R2",
            Quadrant::Neutral => "NEUTRAL",
        };
        f.write_str(s)
    }
}

/// Zero-line crossing of a single DMR horizon between two consecutive bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crossing {
    NegToPos,
    PosToNeg,
}

impl Crossing {
    /// The position side this crossing argues for
    pub fn side(&self) -> Side {
        match self {
            Crossing::NegToPos => Side::Long,
            Crossing::PosToNeg => Side::Short,
        }
    }
}

/// An open position as tracked by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub side: Side,
    pub amount: f64,
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
    pub add_count: u32,
}

impl PositionRecord {
    /// Unrealized return relative to entry, positive when in profit
    pub fn profit_ratio(&self, current_price: f64) -> f64 {
        match self.side {
            Side::Long => (current_price - self.entry_price) / self.entry_price,
            Side::Short => (self.entry_price - current_price) / self.entry_price,
        }
    }

    pub fn notional(&self) -> f64 {
        self.amount * self.entry_price
    }
}

/// A position as reported by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: Symbol,
    pub side: Side,
    pub amount: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64) -> Candle {
        Candle {
            datetime: Utc::now(),
            open: low,
            high,
            low,
            close: high,
            volume: 1.0,
        }
    }

    #[test]
    fn test_mid_price() {
        assert_eq!(candle(120.0, 80.0).mid(), 100.0);
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut c = candle(100.0, 90.0);
        c.high = 80.0;
        assert!(matches!(
            c.validate(),
            Err(CandleValidationError::HighBelowLow { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_negative_volume() {
        let mut c = candle(100.0, 90.0);
        c.volume = -1.0;
        assert_eq!(
            c.validate(),
            Err(CandleValidationError::NegativeVolume(-1.0))
        );
    }

    #[test]
    fn test_validate_rejects_nan() {
        let mut c = candle(100.0, 90.0);
        c.close = f64::NAN;
        assert!(matches!(c.validate(), Err(CandleValidationError::NonFinite(_))));
    }

    #[test]
    fn test_side_order_mapping() {
        assert_eq!(Side::Long.order_side(), "BUY");
        assert_eq!(Side::Long.closing_order_side(), "SELL");
        assert_eq!(Side::Short.order_side(), "SELL");
        assert_eq!(Side::Short.closing_order_side(), "BUY");
        assert_eq!(Side::Long.opposite(), Side::Short);
    }

    #[test]
    fn test_profit_ratio_by_side() {
        let long = PositionRecord {
            side: Side::Long,
            amount: 1.0,
            entry_price: 100.0,
            opened_at: Utc::now(),
            add_count: 0,
        };
        assert!((long.profit_ratio(110.0) - 0.10).abs() < 1e-12);

        let short = PositionRecord {
            side: Side::Short,
            ..long.clone()
        };
        assert!((short.profit_ratio(110.0) + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_crossing_side() {
        assert_eq!(Crossing::NegToPos.side(), Side::Long);
        assert_eq!(Crossing::PosToNeg.side(), Side::Short);
    }
}
