//! Circuit breaker guarding the venue API
//!
//! After a run of consecutive failures the breaker opens and requests are
//! rejected immediately instead of piling onto a struggling venue. Once the
//! cooldown elapses a probe request is allowed through; its outcome decides
//! whether the breaker closes again or re-opens.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    Probing,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    probe_successes: u32,
    failure_threshold: u32,
    probe_threshold: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// `failure_threshold` consecutive failures open the breaker;
    /// `probe_threshold` successful probes after `cooldown` close it again.
    pub fn new(failure_threshold: u32, probe_threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            probe_successes: 0,
            failure_threshold,
            probe_threshold,
            cooldown,
            opened_at: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(5, 2, Duration::from_secs(60))
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }

    /// Whether a request may go out right now
    ///
    /// Transitions Open -> Probing when the cooldown has elapsed.
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::Probing => true,
            BreakerState::Open => {
                let cooled = self
                    .opened_at
                    .map(|t| t.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if cooled {
                    tracing::info!("Circuit breaker probing after cooldown");
                    self.state = BreakerState::Probing;
                    self.probe_successes = 0;
                }
                cooled
            }
        }
    }

    pub fn on_success(&mut self) {
        match self.state {
            BreakerState::Closed => self.consecutive_failures = 0,
            BreakerState::Probing => {
                self.probe_successes += 1;
                if self.probe_successes >= self.probe_threshold {
                    tracing::info!("Circuit breaker closed, venue recovered");
                    self.state = BreakerState::Closed;
                    self.consecutive_failures = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn on_failure(&mut self) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    tracing::warn!(
                        failures = self.consecutive_failures,
                        "Circuit breaker opened"
                    );
                    self.state = BreakerState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Probing => {
                tracing::warn!("Circuit breaker re-opened, probe failed");
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {
                self.opened_at = Some(Instant::now());
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.probe_successes = 0;
        self.opened_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_closed_and_allows_requests() {
        let mut cb = CircuitBreaker::with_defaults();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_opens_after_threshold() {
        let mut cb = CircuitBreaker::new(3, 1, Duration::from_secs(60));
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.on_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let mut cb = CircuitBreaker::new(3, 1, Duration::from_secs(60));
        cb.on_failure();
        cb.on_failure();
        cb.on_success();
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_probe_closes_after_cooldown() {
        let mut cb = CircuitBreaker::new(1, 2, Duration::from_millis(1));
        cb.on_failure();
        assert_eq!(cb.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), BreakerState::Probing);

        cb.on_success();
        assert_eq!(cb.state(), BreakerState::Probing);
        cb.on_success();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_failed_probe_reopens() {
        let mut cb = CircuitBreaker::new(1, 1, Duration::from_millis(1));
        cb.on_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.allow_request());
        cb.on_failure();
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn test_reset() {
        let mut cb = CircuitBreaker::new(1, 1, Duration::from_secs(60));
        cb.on_failure();
        assert!(cb.is_open());
        cb.reset();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allow_request());
    }
}
