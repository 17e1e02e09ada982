//! Instance supervisor
//!
//! Spawns one task per strategy instance and keeps them aligned to their
//! timeframe boundaries: each tick fires shortly after a bar closes, once
//! the venue has had a moment to settle the bar. Shutdown is cooperative
//! via a watch channel wired to Ctrl+C by the command layer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::data::MarketDataPort;
use crate::exchange::{interval_seconds, FuturesClient};
use crate::gateway::ExecutionGateway;
use crate::indicators::IndicatorEngine;
use crate::ledger::LedgerStore;
use crate::reconcile::Reconciler;
use crate::risk::RiskGate;
use crate::strategy::{StrategyInstance, TickInput};
use crate::types::Horizon;

/// Seconds past a bar boundary before the tick fires, letting the venue
/// finalize the closed bar
const SETTLE_DELAY_SECS: i64 = 5;

/// Delay until the next tick for a timeframe, aligned to wall-clock
/// boundaries plus the settle margin
pub fn next_tick_delay(now: DateTime<Utc>, timeframe_secs: i64) -> Duration {
    let ts = now.timestamp();
    let boundary = ts.div_euclid(timeframe_secs) * timeframe_secs;
    let target = if ts < boundary + SETTLE_DELAY_SECS {
        boundary + SETTLE_DELAY_SECS
    } else {
        boundary + timeframe_secs + SETTLE_DELAY_SECS
    };
    Duration::from_secs((target - ts).max(1) as u64)
}

/// One instance plus its market data feed, driven on its own schedule
struct InstanceRunner<G> {
    instance: StrategyInstance<G>,
    data: MarketDataPort,
    gateway: Arc<G>,
    timeframe_secs: i64,
}

impl<G: ExecutionGateway> InstanceRunner<G> {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            instance = self.instance.name(),
            timeframe_secs = self.timeframe_secs,
            "Instance scheduled"
        );
        loop {
            let delay = next_tick_delay(Utc::now(), self.timeframe_secs);
            debug!(
                instance = self.instance.name(),
                delay_secs = delay.as_secs(),
                "Waiting for next bar boundary"
            );
            tokio::select! {
                _ = sleep(delay) => self.tick_once().await,
                _ = shutdown.changed() => {
                    info!(instance = self.instance.name(), "Instance stopping");
                    break;
                }
            }
        }
    }

    async fn tick_once(&mut self) {
        let candles = match self.data.refresh().await {
            Ok(c) => c,
            Err(e) => {
                self.instance
                    .note_failure(&format!("market data refresh failed: {:#}", e));
                return;
            }
        };
        if let Some(last) = candles.last() {
            self.gateway.observe_price(last.close);
        }
        let venue_positions = match self.gateway.positions().await {
            Ok(p) => p,
            Err(e) => {
                self.instance
                    .note_failure(&format!("position lookup failed: {}", e));
                return;
            }
        };

        let input = TickInput {
            candles,
            venue_positions,
        };
        // run_tick logs and counts its own failures
        let _ = self.instance.run_tick(&input).await;
    }
}

/// Build both instances and drive them until shutdown fires
pub async fn run<G>(
    settings: &Settings,
    client: FuturesClient,
    gateway: Arc<G>,
    store: LedgerStore,
    state_dir: impl Into<PathBuf>,
    shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    G: ExecutionGateway + Send + Sync + 'static,
{
    let symbol = settings.symbol();
    let state_dir = state_dir.into();

    let fine_tf = &settings.horizons.short.timeframe;
    let coarse_secs = interval_seconds(&settings.horizons.long.timeframe)
        .with_context(|| format!("bad timeframe {}", settings.horizons.long.timeframe))?;
    let engine = IndicatorEngine::new(
        settings.horizons.long.window,
        settings.horizons.short.window,
        coarse_secs,
    );

    let risk = RiskGate::new(
        settings.trading.max_total_size,
        settings.trading.max_add_times,
        settings.trading.hedge_tolerance,
        settings.trading.capital * settings.trading.max_daily_loss_pct,
    );
    let trade_mutex = Arc::new(Mutex::new(()));

    // Repair both ledgers against the venue before any instance trades
    let startup_positions = gateway
        .positions()
        .await
        .map_err(|e| anyhow::anyhow!("startup position lookup failed: {}", e))?;
    if !startup_positions.is_empty() {
        info!(
            count = startup_positions.len(),
            "Venue reports open positions at startup"
        );
    }

    let mut handles = Vec::new();
    for (horizon_cfg, horizon) in [
        (&settings.horizons.long, Horizon::Long),
        (&settings.horizons.short, Horizon::Short),
    ] {
        let timeframe_secs = interval_seconds(&horizon_cfg.timeframe)
            .with_context(|| format!("bad timeframe {}", horizon_cfg.timeframe))?;
        let mut ledger = store.ledger(
            &horizon_cfg.name,
            &symbol,
            settings.trading.max_add_times,
        )?;
        let reconciler = Reconciler::new(&state_dir, symbol.clone(), store.clone());
        let state = reconciler.reconcile(&mut ledger, &startup_positions)?;
        info!(
            instance = horizon_cfg.name.as_str(),
            state = ?state,
            "Startup reconciliation"
        );

        let instance = StrategyInstance::new(
            horizon_cfg.name.as_str(),
            horizon,
            settings.trading.base_size,
            engine.clone(),
            ledger,
            store.clone(),
            reconciler,
            risk.clone(),
            gateway.clone(),
            trade_mutex.clone(),
        );
        let runner = InstanceRunner {
            instance,
            data: MarketDataPort::new(
                client.clone(),
                symbol.clone(),
                fine_tf.clone(),
                settings.fetch_limit,
            ),
            gateway: gateway.clone(),
            timeframe_secs,
        };
        handles.push(tokio::spawn(runner.run(shutdown.clone())));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Instance task ended abnormally: {}", e);
        }
    }
    info!("All instances stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_tick_delay_aligns_to_boundary() {
        // 00:07:30 on a 15m timeframe: next fire at 00:15:05
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 7, 30).unwrap();
        assert_eq!(next_tick_delay(now, 900), Duration::from_secs(455));
    }

    #[test]
    fn test_next_tick_delay_within_settle_window() {
        // 00:15:02 is inside the settle margin of the 00:15 boundary,
        // so the tick for that bar still fires at 00:15:05
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 15, 2).unwrap();
        assert_eq!(next_tick_delay(now, 900), Duration::from_secs(3));
    }

    #[test]
    fn test_next_tick_delay_just_past_settle() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 15, 5).unwrap();
        assert_eq!(next_tick_delay(now, 900), Duration::from_secs(900));
    }

    #[test]
    fn test_next_tick_delay_never_zero() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 15, 4).unwrap();
        assert!(next_tick_delay(now, 900) >= Duration::from_secs(1));
    }
}
