//! Status command
//!
//! Prints the ledger's open positions and today's realized pnl without
//! touching the venue.

use anyhow::Result;
use chrono::Utc;
use std::path::Path;

use dmr_quadrant::ledger::LedgerStore;

pub fn run(state_dir: String) -> Result<()> {
    let db_path = Path::new(&state_dir).join("positions.db");
    anyhow::ensure!(
        db_path.exists(),
        "No state database at {} (has the trader run yet?)",
        db_path.display()
    );
    let store = LedgerStore::open(&db_path)?;

    let positions = store.open_positions()?;
    if positions.is_empty() {
        println!("No open positions");
    } else {
        println!(
            "{:<20} {:>6} {:>10} {:>12} {:>5}  OPENED",
            "KEY", "SIDE", "AMOUNT", "ENTRY", "ADDS"
        );
        for (key, p) in &positions {
            println!(
                "{:<20} {:>6} {:>10.3} {:>12.2} {:>5}  {}",
                key,
                p.side.to_string(),
                p.amount,
                p.entry_price,
                p.add_count,
                p.opened_at.format("%Y-%m-%d %H:%M:%S"),
            );
        }
    }

    let midnight = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid")
        .and_utc();
    let pnl = store.realized_pnl_since(midnight)?;
    println!("Realized pnl today: {:+.2} USDT", pnl);

    Ok(())
}
