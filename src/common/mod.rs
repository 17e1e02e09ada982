//! Shared infrastructure for the exchange client
//!
//! - Circuit breaker guarding the venue during outages
//! - Token-bucket rate limiter for API pacing

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use rate_limiter::RateLimiter;
