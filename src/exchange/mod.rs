//! Futures exchange connectivity: signed client, wire types, clock sync

pub mod client;
pub mod clock;
pub mod types;

pub use client::{ClientConfig, ExchangeError, FuturesClient};
pub use clock::ServerClock;
pub use types::{interval_seconds, OrderAck, OrderForm, OrderType, RawKline};
