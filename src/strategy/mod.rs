//! Strategy instances
//!
//! One instance per DMR horizon, each with its own durable ledger key and
//! its own schedule. Both share the gateway, the risk gate, and a trade
//! mutex so only one of them is deciding and placing orders at a time.

mod instance;

pub use instance::{StrategyInstance, TickInput, TickOutcome};
