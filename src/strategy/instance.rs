use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::gateway::{CloseOutcome, ExecutionGateway};
use crate::indicators::{IndicatorEngine, MarketRead};
use crate::ledger::{LedgerStore, PositionLedger};
use crate::reconcile::Reconciler;
use crate::risk::{ExposureSnapshot, RiskContext, RiskGate, RiskViolation};
use crate::types::{Candle, Horizon, PositionRecord, Quadrant, Side, VenuePosition};

/// Consecutive failed ticks before the instance escalates to error logging
const FAILURE_ESCALATION_THRESHOLD: u32 = 3;

/// Market state handed to one tick, assembled by the caller
#[derive(Debug, Clone, Default)]
pub struct TickInput {
    pub candles: Vec<Candle>,
    pub venue_positions: Vec<VenuePosition>,
}

/// What a tick decided to do
#[derive(Debug, PartialEq)]
pub enum TickOutcome {
    NoAction,
    Opened(Side),
    Added,
    /// Closed the opposite side, then opened fresh
    Flipped(Side),
    /// Adopted an untracked venue position instead of ordering
    Claimed(Side),
    RiskRejected(RiskViolation),
}

/// One trading instance bound to a single DMR horizon
pub struct StrategyInstance<G> {
    name: String,
    horizon: Horizon,
    base_size: f64,
    engine: IndicatorEngine,
    ledger: PositionLedger,
    store: LedgerStore,
    reconciler: Reconciler,
    risk: RiskGate,
    gateway: Arc<G>,
    trade_mutex: Arc<Mutex<()>>,
    consecutive_failures: u32,
}

impl<G: ExecutionGateway> StrategyInstance<G> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        horizon: Horizon,
        base_size: f64,
        engine: IndicatorEngine,
        ledger: PositionLedger,
        store: LedgerStore,
        reconciler: Reconciler,
        risk: RiskGate,
        gateway: Arc<G>,
        trade_mutex: Arc<Mutex<()>>,
    ) -> Self {
        StrategyInstance {
            name: name.into(),
            horizon,
            base_size,
            engine,
            ledger,
            store,
            reconciler,
            risk,
            gateway,
            trade_mutex,
            consecutive_failures: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run one tick, tracking consecutive failures across calls
    ///
    /// Risk rejections are decisions, not failures; only errors (bad data,
    /// venue trouble, storage trouble) count against the instance.
    pub async fn run_tick(&mut self, input: &TickInput) -> Result<TickOutcome> {
        match self.tick(input).await {
            Ok(outcome) => {
                self.consecutive_failures = 0;
                debug!(instance = self.name.as_str(), outcome = ?outcome, "Tick complete");
                Ok(outcome)
            }
            Err(e) => {
                self.note_failure(&format!("{:#}", e));
                Err(e)
            }
        }
    }

    /// Count a failed cycle, escalating the log level after repeated ones
    ///
    /// Also used by the runner for failures before the tick itself, like a
    /// market data fetch that never produced a `TickInput`.
    pub fn note_failure(&mut self, what: &str) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= FAILURE_ESCALATION_THRESHOLD {
            error!(
                instance = self.name.as_str(),
                failures = self.consecutive_failures,
                "Tick failed repeatedly: {}",
                what
            );
        } else {
            warn!(
                instance = self.name.as_str(),
                failures = self.consecutive_failures,
                "Tick failed: {}",
                what
            );
        }
    }

    async fn tick(&mut self, input: &TickInput) -> Result<TickOutcome> {
        // One decision at a time across both instances
        let trade_mutex = Arc::clone(&self.trade_mutex);
        let _guard = trade_mutex.lock().await;

        let read = self
            .engine
            .evaluate(&input.candles)
            .context("indicator evaluation failed")?;

        self.reconciler
            .reconcile(&mut self.ledger, &input.venue_positions)
            .context("reconciliation failed")?;

        let reading = read.reading(self.horizon);
        let crossing = match reading.crossing {
            Some(c) => c,
            None => return Ok(TickOutcome::NoAction),
        };
        let side = crossing.side();
        info!(
            instance = self.name.as_str(),
            crossing = ?crossing,
            quadrant = %read.quadrant,
            dmr = reading.current,
            close = read.close,
            "Signal"
        );

        let outcome = match self.ledger.position().cloned() {
            Some(held) if held.side == side => self.try_add(&held, side, &read).await?,
            Some(held) => {
                self.close_held(held.side, &read).await?;
                match self.try_open(side, &read, &input.venue_positions).await? {
                    TickOutcome::Opened(s) => TickOutcome::Flipped(s),
                    other => other,
                }
            }
            None => self.try_open(side, &read, &input.venue_positions).await?,
        };

        if matches!(
            outcome,
            TickOutcome::Opened(_)
                | TickOutcome::Added
                | TickOutcome::Flipped(_)
                | TickOutcome::Claimed(_)
        ) {
            self.post_verify().await;
        }
        Ok(outcome)
    }

    /// Soft check after a trade: re-read the venue and compare it to what
    /// was just committed. Divergence is logged for the next reconcile to
    /// handle, never treated as a tick failure.
    async fn post_verify(&self) {
        let local = match self.ledger.position() {
            Some(p) => p.clone(),
            None => return,
        };
        match self.gateway.positions().await {
            Ok(venue) => match venue.iter().find(|p| p.side == local.side) {
                // The venue side aggregates every book, so it holds at
                // least this instance's amount
                Some(v) if v.amount + 1e-9 >= local.amount => {}
                Some(v) => warn!(
                    instance = self.name.as_str(),
                    side = %local.side,
                    booked = local.amount,
                    venue = v.amount,
                    "Post-trade check: venue holds less than booked"
                ),
                None => warn!(
                    instance = self.name.as_str(),
                    side = %local.side,
                    booked = local.amount,
                    "Post-trade check: venue does not show the side just booked"
                ),
            },
            Err(e) => warn!(
                instance = self.name.as_str(),
                error = %e,
                "Post-trade check skipped, position lookup failed"
            ),
        }
    }

    /// Entry from flat: claim an untracked venue position if one matches,
    /// otherwise place a fresh base-size order
    async fn try_open(
        &mut self,
        side: Side,
        read: &MarketRead,
        venue_positions: &[VenuePosition],
    ) -> Result<TickOutcome> {
        if let Some(orphan) = self
            .reconciler
            .claimable(&self.ledger, venue_positions, side)?
        {
            self.ledger
                .claim(orphan.side, orphan.amount, orphan.entry_price)?;
            return Ok(TickOutcome::Claimed(side));
        }

        let ctx = self.risk_context()?;
        if let Err(violation) = self.risk.check_entry(side, self.base_size, &ctx) {
            info!(instance = self.name.as_str(), "Entry rejected: {}", violation);
            return Ok(TickOutcome::RiskRejected(violation));
        }

        let fill = self
            .gateway
            .open(side, self.base_size)
            .await
            .context("entry order failed")?;
        self.ledger
            .open(side, fill.quantity, fill.price, Utc::now())?;
        Ok(TickOutcome::Opened(side))
    }

    /// Same-side signal: add only when the quadrant confirms the trend
    async fn try_add(
        &mut self,
        held: &PositionRecord,
        side: Side,
        read: &MarketRead,
    ) -> Result<TickOutcome> {
        let confirming = matches!(
            (side, read.quadrant),
            (Side::Long, Quadrant::T1) | (Side::Short, Quadrant::T2)
        );
        if !confirming {
            info!(
                instance = self.name.as_str(),
                quadrant = %read.quadrant,
                "Same-side signal without trend confirmation, holding"
            );
            return Ok(TickOutcome::NoAction);
        }

        let ctx = self.risk_context()?;
        if let Err(violation) = self.risk.check_add(held, read.close, &ctx) {
            info!(instance = self.name.as_str(), "Add rejected: {}", violation);
            return Ok(TickOutcome::RiskRejected(violation));
        }
        if let Err(violation) = self.risk.check_entry(side, self.base_size, &ctx) {
            info!(instance = self.name.as_str(), "Add rejected: {}", violation);
            return Ok(TickOutcome::RiskRejected(violation));
        }

        let fill = self
            .gateway
            .open(side, self.base_size)
            .await
            .context("add order failed")?;
        self.ledger.add(fill.quantity, fill.price)?;
        Ok(TickOutcome::Added)
    }

    /// Close the held side; a venue already flat just clears the record
    async fn close_held(&mut self, side: Side, read: &MarketRead) -> Result<()> {
        match self
            .gateway
            .close(side)
            .await
            .context("close order failed")?
        {
            CloseOutcome::Closed(fill) => {
                self.ledger.close(fill.price)?;
            }
            CloseOutcome::AlreadyFlat => {
                warn!(
                    instance = self.name.as_str(),
                    side = %side,
                    close = read.close,
                    "Venue flat on close, clearing local record"
                );
                self.ledger.force_flat("venue flat on close")?;
            }
        }
        Ok(())
    }

    /// Snapshot of global exposure and daily pnl from the shared store
    fn risk_context(&self) -> Result<RiskContext> {
        let mut exposure = ExposureSnapshot::default();
        for (_, p) in self.store.open_positions()? {
            match p.side {
                Side::Long => exposure.long_notional += p.notional(),
                Side::Short => exposure.short_notional += p.notional(),
            }
        }
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid")
            .and_utc();
        let daily_realized_pnl = self.store.realized_pnl_since(midnight)?;
        Ok(RiskContext {
            exposure,
            daily_realized_pnl,
        })
    }
}
