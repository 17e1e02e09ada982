//! DMR Quadrant Trader
//!
//! An automated crypto-futures trading system built around a dual-horizon
//! momentum model: the daily mid-price ratio (DMR) is computed on a fine
//! bar series and on a coarse resampled series, and the sign pair of the
//! two horizons classifies the market into trending and reversal quadrants.
//! Two strategy instances, one per horizon, trade zero-line crossings of
//! their own DMR series against a shared risk budget.
//!
//! The exchange client includes circuit breaker, rate limiting, clock sync,
//! and retry logic; positions survive restarts through a SQLite ledger that
//! is reconciled against the venue before any order is placed.
//!
//! ## Example (Market Data)
//! ```no_run
//! use dmr_quadrant::exchange::{ClientConfig, FuturesClient};
//! use dmr_quadrant::Symbol;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = FuturesClient::new(ClientConfig::default());
//!     let klines = client.get_klines(&Symbol::new("ETHUSDT"), "5m", 100).await?;
//!     println!("Fetched {} klines", klines.len());
//!     Ok(())
//! }
//! ```

pub mod common;
pub mod config;
pub mod data;
pub mod exchange;
pub mod gateway;
pub mod indicators;
pub mod ledger;
pub mod reconcile;
pub mod risk;
pub mod strategy;
pub mod supervisor;
pub mod types;

pub use config::Settings;
pub use gateway::{ExecutionGateway, LiveGateway, PaperGateway};
pub use indicators::IndicatorEngine;
pub use ledger::{LedgerStore, PositionLedger};
pub use reconcile::{Reconciler, ReconcileState};
pub use risk::RiskGate;
pub use strategy::{StrategyInstance, TickInput, TickOutcome};
pub use types::*;

// Re-export the exchange client for convenience
pub use exchange::FuturesClient;
