//! Run command
//!
//! Drives both strategy instances against the venue in paper or live mode.
//! Live mode requires credentials in the environment and counts down before
//! starting; paper mode uses public market data only and records synthetic
//! fills.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use dmr_quadrant::config::Settings;
use dmr_quadrant::data::MarketDataPort;
use dmr_quadrant::exchange::{ClientConfig, FuturesClient};
use dmr_quadrant::gateway::{LiveGateway, PaperGateway};
use dmr_quadrant::ledger::LedgerStore;
use dmr_quadrant::supervisor;

pub fn run(config_path: String, paper: bool, live: bool, state_dir: String) -> Result<()> {
    if !paper && !live {
        anyhow::bail!("Must specify either --paper or --live mode");
    }
    if paper && live {
        anyhow::bail!("Cannot specify both --paper and --live modes");
    }

    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path, paper, state_dir))
}

async fn run_async(config_path: String, paper_mode: bool, state_dir: String) -> Result<()> {
    let settings = Settings::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    let mode_str = if paper_mode { "PAPER" } else { "LIVE" };
    info!("==============================================");
    info!("  DMR QUADRANT TRADER - {} MODE", mode_str);
    info!("==============================================");
    info!("  Symbol:     {}", settings.trading.symbol);
    info!(
        "  Horizons:   {} ({} x{}) / {} ({} x{})",
        settings.horizons.long.name,
        settings.horizons.long.timeframe,
        settings.horizons.long.window,
        settings.horizons.short.name,
        settings.horizons.short.timeframe,
        settings.horizons.short.window,
    );
    info!(
        "  Sizing:     base {:.0} USDT, cap {:.0} USDT, {} add(s)",
        settings.trading.base_size, settings.trading.max_total_size, settings.trading.max_add_times,
    );
    info!("==============================================");

    if !paper_mode {
        warn!("LIVE TRADING MODE - REAL MONEY AT RISK!");
        warn!("Press Ctrl+C within 10 seconds to abort...");
        for i in (1..=10).rev() {
            info!("Starting in {} seconds...", i);
            sleep(Duration::from_secs(1)).await;
        }
    }

    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create state directory {}", state_dir))?;
    let store = LedgerStore::open(Path::new(&state_dir).join("positions.db"))?
        .with_json_backup(Path::new(&state_dir).join("positions.json"));

    let mut client_config = ClientConfig::default()
        .with_testnet(settings.exchange.testnet)
        .with_max_retries(settings.exchange.max_retries)
        .with_rate_limit(settings.exchange.rate_limit as usize)
        .with_recv_window(settings.exchange.recv_window_ms);
    if let (Some(key), Some(secret)) = (
        settings.exchange.api_key.clone(),
        settings.exchange.api_secret.clone(),
    ) {
        client_config = client_config.with_credentials(key, secret);
    } else if !paper_mode {
        anyhow::bail!(
            "Live mode requires BINANCE_API_KEY and BINANCE_API_SECRET in the environment"
        );
    }
    let client = FuturesClient::new(client_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!("Error setting up signal handler: {}", e),
        }
    });

    if paper_mode {
        let gateway = Arc::new(PaperGateway::new(
            settings.symbol(),
            settings.trading.min_notional,
        ));
        supervisor::run(&settings, client, gateway, store, &state_dir, shutdown_rx).await?;
    } else {
        let offset = client.sync_clock().await.context("Clock sync failed")?;
        info!("Clock synced, venue offset {}ms", offset);

        let symbol = settings.symbol();
        client
            .set_leverage(&symbol, settings.trading.leverage)
            .await
            .context("Failed to set leverage")?;
        client
            .set_margin_type(&symbol, "CROSSED")
            .await
            .context("Failed to set margin type")?;
        info!(
            "Trading config applied: {}x leverage, CROSSED margin",
            settings.trading.leverage
        );

        let snapshot_port = MarketDataPort::new(
            client.clone(),
            settings.symbol(),
            settings.horizons.short.timeframe.clone(),
            settings.fetch_limit,
        );
        snapshot_port.log_account_snapshot().await;

        let gateway = Arc::new(LiveGateway::new(
            client.clone(),
            settings.symbol(),
            settings.trading.min_notional,
        ));
        supervisor::run(&settings, client, gateway, store, &state_dir, shutdown_rx).await?;
    }

    info!("Trading session ended.");
    Ok(())
}
