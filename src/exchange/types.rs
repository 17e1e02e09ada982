//! Wire types for the USDT-margined futures API

use serde::{Deserialize, Serialize};

use crate::types::{Side, Symbol, VenuePosition};

/// Kline row as returned by the venue
/// Array layout: [open_time, open, high, low, close, volume, close_time,
///                quote_volume, trades, taker_buy_base, taker_buy_quote, ignore]
#[derive(Debug, Clone)]
pub struct RawKline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

impl RawKline {
    pub fn from_raw(raw: &[serde_json::Value]) -> Option<Self> {
        if raw.len() < 7 {
            return None;
        }
        Some(RawKline {
            open_time: raw[0].as_i64()?,
            open: raw[1].as_str()?.parse().ok()?,
            high: raw[2].as_str()?.parse().ok()?,
            low: raw[3].as_str()?.parse().ok()?,
            close: raw[4].as_str()?.parse().ok()?,
            volume: raw[5].as_str()?.parse().ok()?,
            close_time: raw[6].as_i64()?,
        })
    }
}

/// Position row from the position-risk endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct PositionRisk {
    pub symbol: String,
    #[serde(rename = "positionAmt")]
    pub position_amt: String,
    #[serde(rename = "entryPrice")]
    pub entry_price: String,
    #[serde(rename = "unRealizedProfit", default)]
    pub unrealized_profit: String,
    #[serde(rename = "positionSide")]
    pub position_side: String,
}

impl PositionRisk {
    /// Convert to a domain position; zero-amount rows map to None
    pub fn to_venue_position(&self) -> Option<VenuePosition> {
        let amount: f64 = self.position_amt.parse().ok()?;
        if amount == 0.0 {
            return None;
        }
        let side = match self.position_side.as_str() {
            "LONG" => Side::Long,
            "SHORT" => Side::Short,
            // One-way mode reports BOTH; infer from the sign
            _ if amount > 0.0 => Side::Long,
            _ => Side::Short,
        };
        Some(VenuePosition {
            symbol: Symbol::new(self.symbol.clone()),
            side,
            amount: amount.abs(),
            entry_price: self.entry_price.parse().ok()?,
            unrealized_pnl: self.unrealized_profit.parse().unwrap_or(0.0),
        })
    }
}

/// Order state from the create/query/cancel endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    #[serde(rename = "orderId")]
    pub order_id: i64,
    pub status: String,
    #[serde(rename = "avgPrice", default)]
    pub avg_price: String,
    #[serde(rename = "executedQty", default)]
    pub executed_qty: String,
}

impl OrderAck {
    pub fn is_filled(&self) -> bool {
        self.status == "FILLED"
    }

    /// No further fills can happen on this order
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "FILLED" | "CANCELED" | "REJECTED" | "EXPIRED")
    }

    /// Executed quantity, when any contracts have traded
    pub fn filled_quantity(&self) -> Option<f64> {
        self.executed_qty.parse::<f64>().ok().filter(|q| *q > 0.0)
    }

    /// Average fill price, when the venue reports one
    pub fn average_price(&self) -> Option<f64> {
        self.avg_price.parse::<f64>().ok().filter(|p| *p > 0.0)
    }
}

/// Mark price response
#[derive(Debug, Clone, Deserialize)]
pub struct MarkPrice {
    #[serde(rename = "markPrice")]
    pub mark_price: String,
}

/// Futures account balance row
#[derive(Debug, Clone, Deserialize)]
pub struct AccountBalance {
    pub asset: String,
    #[serde(rename = "availableBalance")]
    pub available_balance: String,
}

/// Error body returned by the venue on a rejected request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VenueErrorBody {
    pub code: i64,
    pub msg: String,
}

/// Order form for the create-order endpoint, hedge mode
#[derive(Debug, Clone)]
pub struct OrderForm {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderType {
    Market,
    Limit { price: f64 },
}

impl OrderForm {
    /// Query parameters for the signed request
    ///
    /// Closing orders use the opposite order side against the same
    /// positionSide, with reduceOnly set.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let order_side = if self.reduce_only {
            self.side.closing_order_side()
        } else {
            self.side.order_side()
        };
        let mut params = vec![
            ("symbol".to_string(), self.symbol.to_string()),
            ("side".to_string(), order_side.to_string()),
            ("positionSide".to_string(), self.side.position_side().to_string()),
            ("quantity".to_string(), format!("{:.3}", self.quantity)),
        ];
        match self.order_type {
            OrderType::Market => {
                params.push(("type".to_string(), "MARKET".to_string()));
            }
            OrderType::Limit { price } => {
                params.push(("type".to_string(), "LIMIT".to_string()));
                params.push(("timeInForce".to_string(), "GTC".to_string()));
                params.push(("price".to_string(), format!("{:.2}", price)));
            }
        }
        if self.reduce_only {
            params.push(("reduceOnly".to_string(), "true".to_string()));
        }
        params
    }
}

/// Supported bar intervals
pub const FUTURES_INTERVALS: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d",
];

/// Interval string to seconds ("15m" -> 900)
pub fn interval_seconds(interval: &str) -> Option<i64> {
    let (num, unit) = interval.split_at(interval.len().checked_sub(1)?);
    let n: i64 = num.parse().ok()?;
    match unit {
        "m" => Some(n * 60),
        "h" => Some(n * 3600),
        "d" => Some(n * 86_400),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kline_from_raw() {
        let raw: Vec<serde_json::Value> = serde_json::from_str(
            r#"[1700000000000, "100.5", "101.0", "99.5", "100.8", "1234.5",
                1700000899999, "124000.0", 321, "600.0", "60500.0", "0"]"#,
        )
        .unwrap();
        let k = RawKline::from_raw(&raw).unwrap();
        assert_eq!(k.open_time, 1_700_000_000_000);
        assert_eq!(k.high, 101.0);
        assert_eq!(k.volume, 1234.5);
    }

    #[test]
    fn test_kline_from_raw_rejects_short_rows() {
        let raw: Vec<serde_json::Value> = serde_json::from_str(r#"[1, "2"]"#).unwrap();
        assert!(RawKline::from_raw(&raw).is_none());
    }

    #[test]
    fn test_position_risk_filters_zero_amount() {
        let p = PositionRisk {
            symbol: "ETHUSDT".to_string(),
            position_amt: "0.000".to_string(),
            entry_price: "0.0".to_string(),
            unrealized_profit: "0.0".to_string(),
            position_side: "LONG".to_string(),
        };
        assert!(p.to_venue_position().is_none());
    }

    #[test]
    fn test_position_risk_short_amount_is_absolute() {
        let p = PositionRisk {
            symbol: "ETHUSDT".to_string(),
            position_amt: "-0.500".to_string(),
            entry_price: "2000.0".to_string(),
            unrealized_profit: "12.5".to_string(),
            position_side: "SHORT".to_string(),
        };
        let v = p.to_venue_position().unwrap();
        assert_eq!(v.side, Side::Short);
        assert_eq!(v.amount, 0.5);
        assert_eq!(v.entry_price, 2000.0);
    }

    #[test]
    fn test_order_form_open_long() {
        let form = OrderForm {
            symbol: Symbol::new("ETHUSDT"),
            side: Side::Long,
            order_type: OrderType::Limit { price: 1990.0 },
            quantity: 0.01,
            reduce_only: false,
        };
        let params = form.to_params();
        assert!(params.contains(&("side".to_string(), "BUY".to_string())));
        assert!(params.contains(&("positionSide".to_string(), "LONG".to_string())));
        assert!(params.contains(&("type".to_string(), "LIMIT".to_string())));
        assert!(params.contains(&("price".to_string(), "1990.00".to_string())));
        assert!(!params.iter().any(|(k, _)| k == "reduceOnly"));
    }

    #[test]
    fn test_order_form_close_short_flips_order_side() {
        let form = OrderForm {
            symbol: Symbol::new("ETHUSDT"),
            side: Side::Short,
            order_type: OrderType::Market,
            quantity: 0.5,
            reduce_only: true,
        };
        let params = form.to_params();
        assert!(params.contains(&("side".to_string(), "BUY".to_string())));
        assert!(params.contains(&("positionSide".to_string(), "SHORT".to_string())));
        assert!(params.contains(&("reduceOnly".to_string(), "true".to_string())));
    }

    fn ack(status: &str, executed: &str, avg: &str) -> OrderAck {
        OrderAck {
            order_id: 42,
            status: status.to_string(),
            executed_qty: executed.to_string(),
            avg_price: avg.to_string(),
        }
    }

    #[test]
    fn test_order_ack_new_reports_nothing_filled() {
        let a = ack("NEW", "0", "0");
        assert!(!a.is_filled());
        assert!(!a.is_terminal());
        assert_eq!(a.filled_quantity(), None);
        assert_eq!(a.average_price(), None);
    }

    #[test]
    fn test_order_ack_filled_exposes_executed_and_average() {
        let a = ack("FILLED", "0.015", "2001.34");
        assert!(a.is_filled());
        assert!(a.is_terminal());
        assert_eq!(a.filled_quantity(), Some(0.015));
        assert_eq!(a.average_price(), Some(2001.34));
    }

    #[test]
    fn test_order_ack_canceled_partial_keeps_executed() {
        let a = ack("CANCELED", "0.005", "1998.0");
        assert!(!a.is_filled());
        assert!(a.is_terminal());
        assert_eq!(a.filled_quantity(), Some(0.005));
    }

    #[test]
    fn test_interval_seconds() {
        assert_eq!(interval_seconds("5m"), Some(300));
        assert_eq!(interval_seconds("15m"), Some(900));
        assert_eq!(interval_seconds("1h"), Some(3600));
        assert_eq!(interval_seconds("1d"), Some(86_400));
        assert_eq!(interval_seconds("1w"), None);
        assert_eq!(interval_seconds(""), None);
    }
}
