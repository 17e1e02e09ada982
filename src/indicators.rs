//! DMR (daily mid-price ratio) indicator engine
//!
//! The model tracks one momentum series per horizon:
//! - mid price of each bar: (high + low) / 2
//! - ratio of consecutive mids, first element pinned to 1.0
//! - rolling mean of the ratio minus 1, zero-filled before the window
//!
//! The long horizon reads coarse bars resampled from the fine series with
//! standard OHLC rules; its DMR is always recomputed on the resampled bars,
//! never downsampled from the fine DMR series.

use chrono::{DateTime, TimeZone, Utc};
use itertools::Itertools;
use thiserror::Error;

use crate::types::{Candle, Crossing, Horizon, Quadrant};

/// Band around zero inside which a DMR value counts as flat
pub const ZERO_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error("{horizon}: {have} bars available, {need} required")]
    InsufficientData {
        horizon: Horizon,
        have: usize,
        need: usize,
    },
}

/// Compute the DMR series over a bar sequence
///
/// Returns one value per input bar. Positions with fewer than `window`
/// ratios behind them are filled with 0.0.
pub fn dmr(candles: &[Candle], window: usize) -> Vec<f64> {
    if candles.is_empty() || window == 0 {
        return vec![];
    }

    let mut ratios = Vec::with_capacity(candles.len());
    ratios.push(1.0);
    for (prev, curr) in candles.iter().tuple_windows() {
        let prev_mid = prev.mid();
        if prev_mid == 0.0 {
            ratios.push(1.0);
        } else {
            ratios.push(curr.mid() / prev_mid);
        }
    }

    let mut out = vec![0.0; candles.len()];
    let mut rolling_sum: f64 = ratios.iter().take(window.min(ratios.len())).sum();
    for i in (window - 1)..ratios.len() {
        if i >= window {
            rolling_sum += ratios[i] - ratios[i - window];
        }
        out[i] = rolling_sum / window as f64 - 1.0;
    }

    out
}

/// Resample fine bars into coarse bars aligned to wall-clock boundaries
///
/// OHLC rules: open = first, high = max, low = min, close = last,
/// volume = sum. The trailing partial bucket is included; it represents
/// the bar currently forming.
pub fn resample(candles: &[Candle], bucket_secs: i64) -> Vec<Candle> {
    if candles.is_empty() || bucket_secs <= 0 {
        return vec![];
    }

    let mut out: Vec<Candle> = Vec::new();
    let mut current_bucket: Option<i64> = None;

    for c in candles {
        let bucket = c.datetime.timestamp().div_euclid(bucket_secs) * bucket_secs;
        match current_bucket {
            Some(b) if b == bucket => {
                let last = out.last_mut().expect("bucket open implies a bar");
                last.high = last.high.max(c.high);
                last.low = last.low.min(c.low);
                last.close = c.close;
                last.volume += c.volume;
            }
            _ => {
                current_bucket = Some(bucket);
                out.push(Candle {
                    datetime: Utc
                        .timestamp_opt(bucket, 0)
                        .single()
                        .unwrap_or(c.datetime),
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                    volume: c.volume,
                });
            }
        }
    }

    out
}

/// Classify the market regime from the latest DMR value of each horizon
pub fn classify_quadrant(long_dmr: f64, short_dmr: f64, tolerance: f64) -> Quadrant {
    let sign = |v: f64| -> i8 {
        if v > tolerance {
            1
        } else if v < -tolerance {
            -1
        } else {
            0
        }
    };

    match (sign(long_dmr), sign(short_dmr)) {
        (1, 1) => Quadrant::T1,
        (-1, -1) => Quadrant::T2,
        (1, -1) => Quadrant::R1,
        (-1, 1) => Quadrant::R2,
        _ => Quadrant::Neutral,
    }
}

/// Detect a zero-line crossing between two consecutive DMR samples
///
/// Both samples must clear the tolerance band on their respective sides,
/// so churn inside the band never fires.
pub fn detect_crossing(previous: f64, current: f64, tolerance: f64) -> Option<Crossing> {
    if previous <= -tolerance && current > tolerance {
        Some(Crossing::NegToPos)
    } else if previous >= tolerance && current < -tolerance {
        Some(Crossing::PosToNeg)
    } else {
        None
    }
}

/// Latest state of one horizon
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonReading {
    pub horizon: Horizon,
    pub current: f64,
    pub previous: f64,
    pub crossing: Option<Crossing>,
}

/// One full indicator pass over a fresh fine-bar series
#[derive(Debug, Clone, PartialEq)]
pub struct MarketRead {
    pub quadrant: Quadrant,
    pub long: HorizonReading,
    pub short: HorizonReading,
    pub close: f64,
    pub timestamp: DateTime<Utc>,
}

impl MarketRead {
    pub fn reading(&self, horizon: Horizon) -> &HorizonReading {
        match horizon {
            Horizon::Long => &self.long,
            Horizon::Short => &self.short,
        }
    }
}

/// Computes both DMR horizons from one fine-bar series
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    long_window: usize,
    short_window: usize,
    /// Coarse bucket width in seconds for the long horizon
    coarse_secs: i64,
}

impl IndicatorEngine {
    pub fn new(long_window: usize, short_window: usize, coarse_secs: i64) -> Self {
        IndicatorEngine {
            long_window,
            short_window,
            coarse_secs,
        }
    }

    /// Evaluate both horizons over the fine series
    ///
    /// Errors with `InsufficientData` when either horizon has fewer bars
    /// than its window; callers must not trade on a failed read.
    pub fn evaluate(&self, fine: &[Candle]) -> Result<MarketRead, IndicatorError> {
        if fine.len() < self.short_window {
            return Err(IndicatorError::InsufficientData {
                horizon: Horizon::Short,
                have: fine.len(),
                need: self.short_window,
            });
        }

        let coarse = resample(fine, self.coarse_secs);
        if coarse.len() < self.long_window {
            return Err(IndicatorError::InsufficientData {
                horizon: Horizon::Long,
                have: coarse.len(),
                need: self.long_window,
            });
        }

        let short_series = dmr(fine, self.short_window);
        let long_series = dmr(&coarse, self.long_window);

        let short = Self::reading(Horizon::Short, &short_series);
        let long = Self::reading(Horizon::Long, &long_series);
        let quadrant = classify_quadrant(long.current, short.current, ZERO_TOLERANCE);

        let last = fine.last().expect("length checked above");
        Ok(MarketRead {
            quadrant,
            long,
            short,
            close: last.close,
            timestamp: last.datetime,
        })
    }

    fn reading(horizon: Horizon, series: &[f64]) -> HorizonReading {
        let current = *series.last().expect("window >= 1 implies non-empty");
        let previous = if series.len() >= 2 {
            series[series.len() - 2]
        } else {
            0.0
        };
        HorizonReading {
            horizon,
            current,
            previous,
            crossing: detect_crossing(previous, current, ZERO_TOLERANCE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn bars(mids: &[f64], step_secs: i64) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        mids.iter()
            .enumerate()
            .map(|(i, &m)| Candle {
                datetime: start + Duration::seconds(i as i64 * step_secs),
                open: m,
                high: m + 1.0,
                low: m - 1.0,
                close: m,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_dmr_constant_price_is_zero() {
        let series = dmr(&bars(&[100.0; 10], 300), 3);
        for v in series {
            assert_relative_eq!(v, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_dmr_zero_filled_before_window() {
        let series = dmr(&bars(&[100.0, 101.0, 102.0, 103.0], 300), 3);
        assert_eq!(series.len(), 4);
        assert_eq!(series[0], 0.0);
        assert_eq!(series[1], 0.0);
        assert!(series[2] > 0.0);
    }

    #[test]
    fn test_dmr_rolling_mean_values() {
        // mids 100, 101: ratios [1, 1.01], window 2 => mean - 1 = 0.005
        let series = dmr(&bars(&[100.0, 101.0], 300), 2);
        assert_relative_eq!(series[1], 0.005, epsilon = 1e-12);
    }

    #[test]
    fn test_dmr_rising_prices_positive() {
        let mids: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let series = dmr(&bars(&mids, 300), 5);
        assert!(*series.last().unwrap() > 0.0);
    }

    #[test]
    fn test_resample_ohlc_rules() {
        // Three 5m bars collapse into one 15m bar
        let fine = vec![
            Candle {
                datetime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                open: 10.0,
                high: 12.0,
                low: 9.0,
                close: 11.0,
                volume: 1.0,
            },
            Candle {
                datetime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap(),
                open: 11.0,
                high: 15.0,
                low: 10.0,
                close: 14.0,
                volume: 2.0,
            },
            Candle {
                datetime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap(),
                open: 14.0,
                high: 14.5,
                low: 8.0,
                close: 9.0,
                volume: 3.0,
            },
        ];
        let coarse = resample(&fine, 900);
        assert_eq!(coarse.len(), 1);
        assert_eq!(coarse[0].open, 10.0);
        assert_eq!(coarse[0].high, 15.0);
        assert_eq!(coarse[0].low, 8.0);
        assert_eq!(coarse[0].close, 9.0);
        assert_eq!(coarse[0].volume, 6.0);
        assert_eq!(
            coarse[0].datetime,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_resample_aligns_to_clock_boundaries() {
        // Bars at :05 and :20 land in different 15m buckets
        let fine = bars(&[100.0, 100.0], 900);
        let mut shifted = fine.clone();
        shifted[0].datetime = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        shifted[1].datetime = Utc.with_ymd_and_hms(2024, 1, 1, 0, 20, 0).unwrap();
        let coarse = resample(&shifted, 900);
        assert_eq!(coarse.len(), 2);
        assert_eq!(
            coarse[0].datetime,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            coarse[1].datetime,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_resampled_dmr_differs_from_fine_series() {
        // A zig-zag fine series flattens out when resampled, so the two
        // DMR computations must disagree.
        let mids: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 100.0 } else { 110.0 })
            .collect();
        let fine = bars(&mids, 300);
        let coarse = resample(&fine, 900);

        let fine_dmr = dmr(&fine, 4);
        let coarse_dmr = dmr(&coarse, 4);
        assert_ne!(
            fine_dmr.last().copied().unwrap(),
            coarse_dmr.last().copied().unwrap()
        );
    }

    #[test]
    fn test_quadrant_classification() {
        let t = ZERO_TOLERANCE;
        assert_eq!(classify_quadrant(0.01, 0.02, t), Quadrant::T1);
        assert_eq!(classify_quadrant(-0.01, -0.02, t), Quadrant::T2);
        assert_eq!(classify_quadrant(0.01, -0.02, t), Quadrant::R1);
        assert_eq!(classify_quadrant(-0.01, 0.02, t), Quadrant::R2);
        assert_eq!(classify_quadrant(0.0, 0.02, t), Quadrant::Neutral);
        assert_eq!(classify_quadrant(0.01, 0.0, t), Quadrant::Neutral);
        assert_eq!(classify_quadrant(0.0, 0.0, t), Quadrant::Neutral);
    }

    #[test]
    fn test_quadrant_respects_tolerance_band() {
        let t = ZERO_TOLERANCE;
        // Values inside the band count as zero
        assert_eq!(classify_quadrant(t / 2.0, 0.02, t), Quadrant::Neutral);
        assert_eq!(classify_quadrant(-t / 2.0, -0.02, t), Quadrant::Neutral);
    }

    #[test]
    fn test_crossing_detection() {
        let t = ZERO_TOLERANCE;
        assert_eq!(detect_crossing(-0.01, 0.01, t), Some(Crossing::NegToPos));
        assert_eq!(detect_crossing(0.01, -0.01, t), Some(Crossing::PosToNeg));
        assert_eq!(detect_crossing(0.01, 0.02, t), None);
        assert_eq!(detect_crossing(-0.01, -0.02, t), None);
    }

    #[test]
    fn test_crossing_tolerance_band_is_exact() {
        let t = ZERO_TOLERANCE;
        // prev exactly at -tol qualifies; curr exactly at tol does not
        assert_eq!(detect_crossing(-t, 0.01, t), Some(Crossing::NegToPos));
        assert_eq!(detect_crossing(-0.01, t, t), None);
        assert_eq!(detect_crossing(t, -0.01, t), Some(Crossing::PosToNeg));
        assert_eq!(detect_crossing(0.01, -t, t), None);
        // churn inside the band never fires
        assert_eq!(detect_crossing(-t / 2.0, t / 2.0, t), None);
    }

    #[test]
    fn test_engine_insufficient_data() {
        let engine = IndicatorEngine::new(12, 26, 900);
        let err = engine.evaluate(&bars(&[100.0; 10], 300)).unwrap_err();
        assert_eq!(
            err,
            IndicatorError::InsufficientData {
                horizon: Horizon::Short,
                have: 10,
                need: 26,
            }
        );
    }

    #[test]
    fn test_engine_insufficient_coarse_data() {
        // 30 fine bars cover the short window but only 10 coarse buckets
        let engine = IndicatorEngine::new(12, 26, 900);
        let err = engine.evaluate(&bars(&[100.0; 30], 300)).unwrap_err();
        assert!(matches!(
            err,
            IndicatorError::InsufficientData {
                horizon: Horizon::Long,
                ..
            }
        ));
    }

    #[test]
    fn test_engine_full_read() {
        let mids: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.5).collect();
        let engine = IndicatorEngine::new(12, 26, 900);
        let read = engine.evaluate(&bars(&mids, 300)).unwrap();
        assert_eq!(read.quadrant, Quadrant::T1);
        assert!(read.long.current > 0.0);
        assert!(read.short.current > 0.0);
        assert_eq!(read.close, *mids.last().unwrap());
    }
}
