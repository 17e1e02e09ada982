//! Order execution gateway
//!
//! One trait, two implementations: `LiveGateway` talks to the venue,
//! `PaperGateway` records every action and fills synthetically. The
//! strategy layer never learns which one it is driving.
//!
//! Live semantics:
//! - entries are limit orders priced just through the market
//!   (0.995x for buys, 1.005x for sells) so they fill like takers without
//!   paying for a market sweep
//! - quantities are rounded to 3 decimals and inflated past the venue
//!   minimum notional when needed
//! - closes are market reduceOnly orders for the full venue amount; a
//!   close against an empty position is not an error
//! - transient and clock-skew rejections retry with 1s/2s/4s backoff,
//!   parameter and policy rejections never retry
//! - an accepted order is not a fill: the gateway polls the order until
//!   it fills, cancels it when it does not, and books only what actually
//!   traded. An unfilled entry surfaces as an error, never as a fill.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::exchange::{ExchangeError, FuturesClient, OrderAck, OrderForm, OrderType};
use crate::types::{Side, Symbol, VenuePosition};

pub const BUY_PRICE_FACTOR: f64 = 0.995;
pub const SELL_PRICE_FACTOR: f64 = 1.005;
const MAX_ORDER_RETRIES: u32 = 3;
const FILL_POLL_ATTEMPTS: u32 = 3;
const FILL_POLL_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("below minimum notional: {0}")]
    MinNotional(String),
    #[error("lot size rejected: {0}")]
    LotSize(String),
    #[error("order rejected by venue: {0}")]
    Rejected(String),
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("pricing failed: {0}")]
    Pricing(String),
    #[error("position lookup failed: {0}")]
    PositionLookup(String),
    #[error("position already gone on the venue: {0}")]
    PositionGone(String),
    #[error("order {order_id} did not fill (last status {status})")]
    Unfilled { order_id: i64, status: String },
}

impl ExecutionError {
    fn classify(e: ExchangeError) -> Self {
        if e.is_reduce_only_rejected() {
            ExecutionError::PositionGone(e.to_string())
        } else if e.is_insufficient_balance() {
            ExecutionError::InsufficientBalance(e.to_string())
        } else if e.is_min_notional() {
            ExecutionError::MinNotional(e.to_string())
        } else if e.is_lot_size() {
            ExecutionError::LotSize(e.to_string())
        } else {
            ExecutionError::Rejected(e.to_string())
        }
    }
}

/// A confirmed (or synthetic) fill
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub order_id: Option<i64>,
}

/// Result of a close request
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    Closed(Fill),
    /// The venue held no position on that side; nothing to do
    AlreadyFlat,
}

/// Venue-facing order operations for one symbol
pub trait ExecutionGateway {
    /// Open or add `notional` USDT on the given position side
    fn open(
        &self,
        side: Side,
        notional: f64,
    ) -> impl std::future::Future<Output = Result<Fill, ExecutionError>> + Send;
    /// Close the full position on the given side; idempotent
    fn close(
        &self,
        side: Side,
    ) -> impl std::future::Future<Output = Result<CloseOutcome, ExecutionError>> + Send;
    /// Positions currently held on the venue for this gateway's symbol
    fn positions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<VenuePosition>, ExecutionError>> + Send;
    /// Latest market price seen by the caller; synthetic fills use it
    fn observe_price(&self, _price: f64) {}
}

/// Quantity for a notional at a price, inflated past the venue minimum
///
/// Rounds to 3 decimals first; if that lands under the minimum notional the
/// quantity is recomputed from the minimum with a 0.001 safety step.
pub fn sized_quantity(notional: f64, price: f64, min_notional: f64) -> f64 {
    let round3 = |v: f64| (v * 1000.0).round() / 1000.0;
    let quantity = round3(notional / price);
    if quantity * price < min_notional {
        round3(min_notional / price) + 0.001
    } else {
        quantity
    }
}

/// Limit price just through the market for the given order direction
pub fn entry_limit_price(side: Side, market_price: f64) -> f64 {
    match side {
        // Opening a long is a buy; price slightly below market
        Side::Long => market_price * BUY_PRICE_FACTOR,
        Side::Short => market_price * SELL_PRICE_FACTOR,
    }
}

/// Submit an order, retrying transient and clock-skew rejections with
/// 1s/2s/4s backoff; parameter and policy rejections fail immediately
async fn submit_with_retry<F, Fut>(submit: F, max_retries: u32) -> Result<OrderAck, ExecutionError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<OrderAck, ExchangeError>>,
{
    let mut last: Option<ExchangeError> = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1));
            warn!(
                "Retrying order (attempt {}/{}) after {}s",
                attempt + 1,
                max_retries + 1,
                delay.as_secs()
            );
            sleep(delay).await;
        }

        match submit().await {
            Ok(ack) => return Ok(ack),
            Err(e) if e.is_timestamp_skew() => {
                // Client already invalidated its clock; next attempt resyncs
                last = Some(e);
            }
            Err(e) if e.is_transient() => {
                last = Some(e);
            }
            Err(e) => return Err(ExecutionError::classify(e)),
        }
    }
    Err(ExecutionError::RetriesExhausted {
        attempts: max_retries + 1,
        last: last.map(|e| e.to_string()).unwrap_or_default(),
    })
}

/// Fill from an order ack, covering what actually traded.
///
/// Returns `None` while nothing has executed, so a `NEW` ack (and its
/// `avgPrice` of "0") can never be booked at the limit price.
fn settled_fill(ack: &OrderAck, side: Side, fallback_price: f64) -> Option<Fill> {
    let quantity = ack.filled_quantity()?;
    Some(Fill {
        side,
        quantity,
        price: ack.average_price().unwrap_or(fallback_price),
        order_id: Some(ack.order_id),
    })
}

/// Live venue-backed gateway
#[derive(Clone)]
pub struct LiveGateway {
    client: FuturesClient,
    symbol: Symbol,
    min_notional: f64,
}

impl LiveGateway {
    pub fn new(client: FuturesClient, symbol: Symbol, min_notional: f64) -> Self {
        LiveGateway {
            client,
            symbol,
            min_notional,
        }
    }

    /// Wait until the order fills, polling the venue between attempts.
    ///
    /// If the order is still resting after the polls it is cancelled, and
    /// whatever traded before the cancel is booked. Only an order with no
    /// executed quantity at all becomes an `Unfilled` error, so the caller
    /// never commits a position the venue does not hold.
    async fn await_fill(
        &self,
        ack: OrderAck,
        side: Side,
        fallback_price: f64,
    ) -> Result<Fill, ExecutionError> {
        if let Some(fill) = settled_fill(&ack, side, fallback_price).filter(|_| ack.is_filled()) {
            return Ok(fill);
        }

        let order_id = ack.order_id;
        let mut current = ack;
        for _ in 0..FILL_POLL_ATTEMPTS {
            if current.is_terminal() {
                break;
            }
            sleep(FILL_POLL_DELAY).await;
            current = self
                .client
                .get_order(&self.symbol, order_id)
                .await
                .map_err(ExecutionError::classify)?;
            if current.is_filled() {
                if let Some(fill) = settled_fill(&current, side, fallback_price) {
                    return Ok(fill);
                }
            }
        }

        if !current.is_terminal() {
            warn!(
                symbol = %self.symbol,
                order_id,
                status = %current.status,
                "Order did not fill in time, cancelling"
            );
            match self.client.cancel_order(&self.symbol, order_id).await {
                Ok(cancelled) => current = cancelled,
                Err(e) => {
                    // The cancel can race a fill; re-query before giving up
                    warn!(order_id, error = %e, "Cancel failed, re-querying order");
                    current = self
                        .client
                        .get_order(&self.symbol, order_id)
                        .await
                        .map_err(ExecutionError::classify)?;
                }
            }
        }

        match settled_fill(&current, side, fallback_price) {
            // Partial fill before the cancel: book what traded
            Some(fill) => Ok(fill),
            None => Err(ExecutionError::Unfilled {
                order_id,
                status: current.status,
            }),
        }
    }
}

impl ExecutionGateway for LiveGateway {
    async fn open(&self, side: Side, notional: f64) -> Result<Fill, ExecutionError> {
        let market_price = self
            .client
            .get_mark_price(&self.symbol)
            .await
            .map_err(|e| ExecutionError::Pricing(e.to_string()))?;

        let limit_price = entry_limit_price(side, market_price);
        let quantity = sized_quantity(notional, limit_price, self.min_notional);

        let form = OrderForm {
            symbol: self.symbol.clone(),
            side,
            order_type: OrderType::Limit { price: limit_price },
            quantity,
            reduce_only: false,
        };

        let ack = submit_with_retry(|| self.client.place_order(&form), MAX_ORDER_RETRIES).await?;
        let fill = self.await_fill(ack, side, limit_price).await?;
        info!(
            symbol = %self.symbol,
            side = %side,
            quantity = fill.quantity,
            price = fill.price,
            order_id = ?fill.order_id,
            "Entry order filled"
        );
        Ok(fill)
    }

    async fn close(&self, side: Side) -> Result<CloseOutcome, ExecutionError> {
        let positions = self.positions().await?;
        let held = match positions.iter().find(|p| p.side == side) {
            Some(p) => p.clone(),
            None => {
                info!(symbol = %self.symbol, side = %side, "Close requested, venue already flat");
                return Ok(CloseOutcome::AlreadyFlat);
            }
        };

        let form = OrderForm {
            symbol: self.symbol.clone(),
            side,
            order_type: OrderType::Market,
            quantity: held.amount,
            reduce_only: true,
        };

        match submit_with_retry(|| self.client.place_order(&form), MAX_ORDER_RETRIES).await {
            Ok(ack) => {
                let fill = self.await_fill(ack, side, held.entry_price).await?;
                info!(
                    symbol = %self.symbol,
                    side = %side,
                    quantity = fill.quantity,
                    price = fill.price,
                    order_id = ?fill.order_id,
                    "Close order filled"
                );
                Ok(CloseOutcome::Closed(fill))
            }
            Err(ExecutionError::PositionGone(_)) => {
                // The position disappeared between the lookup and the order
                info!(symbol = %self.symbol, side = %side, "Reduce-only rejected, treating as flat");
                Ok(CloseOutcome::AlreadyFlat)
            }
            Err(e) => Err(e),
        }
    }

    async fn positions(&self) -> Result<Vec<VenuePosition>, ExecutionError> {
        self.client
            .get_positions(&self.symbol)
            .await
            .map_err(|e| ExecutionError::PositionLookup(e.to_string()))
    }
}

/// What a paper gateway did, for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedOrder {
    pub side: Side,
    pub action: OrderAction,
    pub quantity: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    Open,
    Close,
}

/// A synthetic position held by the paper gateway
#[derive(Debug, Clone, Copy)]
struct PaperHolding {
    quantity: f64,
    entry_price: f64,
}

/// Recording gateway: no venue, synthetic fills at a settable price
pub struct PaperGateway {
    symbol: Symbol,
    price: Mutex<f64>,
    min_notional: f64,
    holdings: Mutex<HashMap<Side, PaperHolding>>,
    orders: Mutex<Vec<RecordedOrder>>,
    reject_next: Mutex<Option<ExecutionError>>,
}

impl PaperGateway {
    pub fn new(symbol: Symbol, min_notional: f64) -> Self {
        PaperGateway {
            symbol,
            price: Mutex::new(0.0),
            min_notional,
            holdings: Mutex::new(HashMap::new()),
            orders: Mutex::new(Vec::new()),
            reject_next: Mutex::new(None),
        }
    }

    /// Price the next synthetic fills execute at
    pub fn set_price(&self, price: f64) {
        *self.price.lock().expect("paper price mutex poisoned") = price;
    }

    /// Make the next order fail with the given error
    pub fn reject_next(&self, error: ExecutionError) {
        *self.reject_next.lock().expect("paper reject mutex poisoned") = Some(error);
    }

    pub fn orders(&self) -> Vec<RecordedOrder> {
        self.orders.lock().expect("paper orders mutex poisoned").clone()
    }

    /// Net synthetic quantity held on a side
    pub fn held(&self, side: Side) -> f64 {
        self.holdings
            .lock()
            .expect("paper holdings mutex poisoned")
            .get(&side)
            .map(|h| h.quantity)
            .unwrap_or(0.0)
    }

    fn take_rejection(&self) -> Option<ExecutionError> {
        self.reject_next
            .lock()
            .expect("paper reject mutex poisoned")
            .take()
    }
}

impl ExecutionGateway for PaperGateway {
    async fn open(&self, side: Side, notional: f64) -> Result<Fill, ExecutionError> {
        if let Some(err) = self.take_rejection() {
            return Err(err);
        }
        let price = *self.price.lock().expect("paper price mutex poisoned");
        if price <= 0.0 {
            return Err(ExecutionError::Pricing("paper price not set".to_string()));
        }
        let limit_price = entry_limit_price(side, price);
        let quantity = sized_quantity(notional, limit_price, self.min_notional);

        let mut holdings = self.holdings.lock().expect("paper holdings mutex poisoned");
        let entry = holdings.entry(side).or_insert(PaperHolding {
            quantity: 0.0,
            entry_price: limit_price,
        });
        let total = entry.quantity + quantity;
        entry.entry_price =
            (entry.quantity * entry.entry_price + quantity * limit_price) / total;
        entry.quantity = total;
        self.orders
            .lock()
            .expect("paper orders mutex poisoned")
            .push(RecordedOrder {
                side,
                action: OrderAction::Open,
                quantity,
                price: limit_price,
            });
        info!(side = %side, quantity, price = limit_price, "[PAPER] entry filled");
        Ok(Fill {
            side,
            quantity,
            price: limit_price,
            order_id: None,
        })
    }

    async fn close(&self, side: Side) -> Result<CloseOutcome, ExecutionError> {
        if let Some(err) = self.take_rejection() {
            return Err(err);
        }
        let price = *self.price.lock().expect("paper price mutex poisoned");
        let mut holdings = self.holdings.lock().expect("paper holdings mutex poisoned");
        let quantity = match holdings.remove(&side) {
            Some(h) if h.quantity > 0.0 => h.quantity,
            _ => return Ok(CloseOutcome::AlreadyFlat),
        };
        self.orders
            .lock()
            .expect("paper orders mutex poisoned")
            .push(RecordedOrder {
                side,
                action: OrderAction::Close,
                quantity,
                price,
            });
        info!(side = %side, quantity, price, "[PAPER] position closed");
        Ok(CloseOutcome::Closed(Fill {
            side,
            quantity,
            price,
            order_id: None,
        }))
    }

    async fn positions(&self) -> Result<Vec<VenuePosition>, ExecutionError> {
        let price = *self.price.lock().expect("paper price mutex poisoned");
        let holdings = self.holdings.lock().expect("paper holdings mutex poisoned");
        Ok(holdings
            .iter()
            .map(|(side, h)| {
                let unrealized = match side {
                    Side::Long => (price - h.entry_price) * h.quantity,
                    Side::Short => (h.entry_price - price) * h.quantity,
                };
                VenuePosition {
                    symbol: self.symbol.clone(),
                    side: *side,
                    amount: h.quantity,
                    entry_price: h.entry_price,
                    unrealized_pnl: unrealized,
                }
            })
            .collect())
    }

    fn observe_price(&self, price: f64) {
        if price > 0.0 {
            self.set_price(price);
        }
    }
}
