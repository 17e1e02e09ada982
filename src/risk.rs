//! Risk gate
//!
//! Pure checks over a snapshot of both strategy instances. The gate never
//! mutates anything; a rejection is a typed value carrying the numbers the
//! decision was made on. The caller holds the trade mutex while building
//! the snapshot and acting on the verdict, so checks and commits see a
//! consistent world.

use thiserror::Error;

use crate::types::{PositionRecord, Side};

#[derive(Debug, Error, PartialEq)]
pub enum RiskViolation {
    #[error("add limit reached: {count} of {max} additions used")]
    AddLimitExceeded { count: u32, max: u32 },
    #[error("position not in profit (ratio {ratio:.4})")]
    NotProfitable { ratio: f64 },
    #[error(
        "hedge imbalance: long {long_notional:.2} vs short {short_notional:.2} \
         exceeds {tolerance:.1}% tolerance"
    )]
    HedgeImbalance {
        long_notional: f64,
        short_notional: f64,
        tolerance: f64,
    },
    #[error("exposure cap: {current:.2} held + {requested:.2} requested > {max:.2} allowed")]
    ExposureExceeded {
        current: f64,
        requested: f64,
        max: f64,
    },
    #[error("daily loss limit: {loss:.2} lost, {limit:.2} allowed")]
    DailyLossExceeded { loss: f64, limit: f64 },
}

/// Notional held per side across every strategy instance
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExposureSnapshot {
    pub long_notional: f64,
    pub short_notional: f64,
}

impl ExposureSnapshot {
    pub fn total(&self) -> f64 {
        self.long_notional + self.short_notional
    }

    fn with_added(&self, side: Side, notional: f64) -> ExposureSnapshot {
        let mut next = *self;
        match side {
            Side::Long => next.long_notional += notional,
            Side::Short => next.short_notional += notional,
        }
        next
    }
}

/// State the gate evaluates against, assembled under the trade mutex
#[derive(Debug, Clone, Copy)]
pub struct RiskContext {
    pub exposure: ExposureSnapshot,
    /// Realized pnl since the UTC midnight rollover, negative when losing
    pub daily_realized_pnl: f64,
}

#[derive(Debug, Clone)]
pub struct RiskGate {
    max_total_size: f64,
    max_add_times: u32,
    hedge_tolerance: f64,
    max_daily_loss: f64,
}

impl RiskGate {
    pub fn new(
        max_total_size: f64,
        max_add_times: u32,
        hedge_tolerance: f64,
        max_daily_loss: f64,
    ) -> Self {
        RiskGate {
            max_total_size,
            max_add_times,
            hedge_tolerance,
            max_daily_loss,
        }
    }

    /// Check a new entry (or the notional of an add) against global limits
    pub fn check_entry(
        &self,
        side: Side,
        notional: f64,
        ctx: &RiskContext,
    ) -> Result<(), RiskViolation> {
        self.check_daily_loss(ctx)?;

        if ctx.exposure.total() + notional > self.max_total_size {
            return Err(RiskViolation::ExposureExceeded {
                current: ctx.exposure.total(),
                requested: notional,
                max: self.max_total_size,
            });
        }

        let post = ctx.exposure.with_added(side, notional);
        if post.long_notional > 0.0 && post.short_notional > 0.0 {
            let imbalance = (post.long_notional - post.short_notional).abs();
            let allowed = post.long_notional.max(post.short_notional) * self.hedge_tolerance;
            if imbalance > allowed {
                return Err(RiskViolation::HedgeImbalance {
                    long_notional: post.long_notional,
                    short_notional: post.short_notional,
                    tolerance: self.hedge_tolerance * 100.0,
                });
            }
        }

        Ok(())
    }

    /// Check the per-position rules for an add at the current price
    pub fn check_add(
        &self,
        position: &PositionRecord,
        price: f64,
        ctx: &RiskContext,
    ) -> Result<(), RiskViolation> {
        if position.add_count >= self.max_add_times {
            return Err(RiskViolation::AddLimitExceeded {
                count: position.add_count,
                max: self.max_add_times,
            });
        }
        let ratio = position.profit_ratio(price);
        if ratio <= 0.0 {
            return Err(RiskViolation::NotProfitable { ratio });
        }
        self.check_daily_loss(ctx)
    }

    fn check_daily_loss(&self, ctx: &RiskContext) -> Result<(), RiskViolation> {
        let loss = -ctx.daily_realized_pnl;
        if loss >= self.max_daily_loss {
            return Err(RiskViolation::DailyLossExceeded {
                loss,
                limit: self.max_daily_loss,
            });
        }
        Ok(())
    }
}
