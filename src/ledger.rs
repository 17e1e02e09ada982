//! Durable position ledger
//!
//! One SQLite record per strategy instance, keyed `{strategy_name}_{symbol}`.
//! An absent row means flat. Every mutation is committed to the store before
//! the call returns and leaves an audit row with before/after snapshots, so
//! a crash between ticks never loses an open position.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

use crate::types::{PositionRecord, Side, Symbol};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{key}: position already open")]
    AlreadyOpen { key: String },
    #[error("{key}: no open position")]
    NoPosition { key: String },
    #[error("add limit reached: {count} of {max} additions used")]
    AddLimitExceeded { count: u32, max: u32 },
    #[error("position not in profit (ratio {ratio:.4})")]
    NotProfitable { ratio: f64 },
    #[error("{key}: corrupt stored record: {detail}")]
    Corrupt { key: String, detail: String },
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A completed round trip recorded on close
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClosedTrade {
    pub side: Side,
    pub amount: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Shared SQLite store backing every ledger in the process
#[derive(Clone)]
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
    backup_path: Option<PathBuf>,
}

impl LedgerStore {
    /// Open (or create) the store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = LedgerStore {
            conn: Arc::new(Mutex::new(conn)),
            backup_path: None,
        };
        store.create_tables()?;
        Ok(store)
    }

    /// In-memory store for tests
    pub fn in_memory() -> Result<Self, LedgerError> {
        let store = LedgerStore {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            backup_path: None,
        };
        store.create_tables()?;
        Ok(store)
    }

    /// Mirror the positions table to a JSON file after each commit
    pub fn with_json_backup(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_path = Some(path.into());
        self
    }

    fn create_tables(&self) -> Result<(), LedgerError> {
        let conn = self.conn.lock().expect("ledger store mutex poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS positions (
                key         TEXT PRIMARY KEY,
                side        TEXT NOT NULL,
                amount      REAL NOT NULL,
                entry_price REAL NOT NULL,
                opened_at   TEXT NOT NULL,
                add_count   INTEGER NOT NULL,
                updated_at  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS ledger_audit (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                key          TEXT NOT NULL,
                action       TEXT NOT NULL,
                before_state TEXT,
                after_state  TEXT,
                price        REAL,
                created_at   TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS closed_trades (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                key          TEXT NOT NULL,
                side         TEXT NOT NULL,
                amount       REAL NOT NULL,
                entry_price  REAL NOT NULL,
                exit_price   REAL NOT NULL,
                realized_pnl REAL NOT NULL,
                opened_at    TEXT NOT NULL,
                closed_at    TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Attach a ledger view for one strategy instance
    pub fn ledger(
        &self,
        strategy_name: &str,
        symbol: &Symbol,
        max_add_times: u32,
    ) -> Result<PositionLedger, LedgerError> {
        let key = format!("{}_{}", strategy_name, symbol);
        let position = self.load(&key)?;
        if let Some(ref p) = position {
            info!(
                key = key.as_str(),
                side = %p.side,
                amount = p.amount,
                entry_price = p.entry_price,
                "Recovered position from store"
            );
        }
        Ok(PositionLedger {
            store: self.clone(),
            key,
            max_add_times,
            position,
        })
    }

    /// Strict decode of a stored side; a row with an unknown side must not
    /// silently become a short
    fn parse_side(key: &str, raw: &str) -> Result<Side, LedgerError> {
        match raw {
            "LONG" => Ok(Side::Long),
            "SHORT" => Ok(Side::Short),
            other => Err(LedgerError::Corrupt {
                key: key.to_string(),
                detail: format!("unknown side '{}'", other),
            }),
        }
    }

    fn parse_opened_at(key: &str, raw: &str) -> Result<DateTime<Utc>, LedgerError> {
        raw.parse().map_err(|_| LedgerError::Corrupt {
            key: key.to_string(),
            detail: format!("unparseable opened_at '{}'", raw),
        })
    }

    /// Every open position in the store, keyed by instance
    pub fn open_positions(&self) -> Result<Vec<(String, PositionRecord)>, LedgerError> {
        let conn = self.conn.lock().expect("ledger store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT key, side, amount, entry_price, opened_at, add_count
             FROM positions ORDER BY key",
        )?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let side: String = row.get(1)?;
            let opened_at: String = row.get(4)?;
            Ok((key, side, row.get(2)?, row.get(3)?, opened_at, row.get(5)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (key, side, amount, entry_price, opened_at, add_count) = row?;
            let side = Self::parse_side(&key, &side)?;
            let opened_at = Self::parse_opened_at(&key, &opened_at)?;
            out.push((
                key,
                PositionRecord {
                    side,
                    amount,
                    entry_price,
                    opened_at,
                    add_count,
                },
            ));
        }
        Ok(out)
    }

    /// Realized pnl from trades closed at or after the given instant
    pub fn realized_pnl_since(&self, since: DateTime<Utc>) -> Result<f64, LedgerError> {
        let conn = self.conn.lock().expect("ledger store mutex poisoned");
        let pnl: f64 = conn.query_row(
            "SELECT COALESCE(SUM(realized_pnl), 0.0) FROM closed_trades WHERE closed_at >= ?1",
            params![since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(pnl)
    }

    fn load(&self, key: &str) -> Result<Option<PositionRecord>, LedgerError> {
        let conn = self.conn.lock().expect("ledger store mutex poisoned");
        let record = conn
            .query_row(
                "SELECT side, amount, entry_price, opened_at, add_count
                 FROM positions WHERE key = ?1",
                params![key],
                |row| {
                    let side: String = row.get(0)?;
                    let opened_at: String = row.get(3)?;
                    Ok((side, row.get(1)?, row.get(2)?, opened_at, row.get(4)?))
                },
            )
            .optional()?;

        match record {
            Some((side, amount, entry_price, opened_at, add_count)) => {
                let side = Self::parse_side(key, &side)?;
                let opened_at = Self::parse_opened_at(key, &opened_at)?;
                Ok(Some(PositionRecord {
                    side,
                    amount,
                    entry_price,
                    opened_at,
                    add_count,
                }))
            }
            None => Ok(None),
        }
    }

    fn commit(
        &self,
        key: &str,
        action: &str,
        before: Option<&PositionRecord>,
        after: Option<&PositionRecord>,
        price: Option<f64>,
        closed: Option<(&str, &ClosedTrade)>,
    ) -> Result<(), LedgerError> {
        {
            let mut conn = self.conn.lock().expect("ledger store mutex poisoned");
            let tx = conn.transaction()?;

            match after {
                Some(p) => {
                    tx.execute(
                        "INSERT INTO positions
                            (key, side, amount, entry_price, opened_at, add_count, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                         ON CONFLICT(key) DO UPDATE SET
                            side = ?2, amount = ?3, entry_price = ?4,
                            opened_at = ?5, add_count = ?6, updated_at = ?7",
                        params![
                            key,
                            p.side.position_side(),
                            p.amount,
                            p.entry_price,
                            p.opened_at.to_rfc3339(),
                            p.add_count,
                            Utc::now().to_rfc3339(),
                        ],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM positions WHERE key = ?1", params![key])?;
                }
            }

            tx.execute(
                "INSERT INTO ledger_audit (key, action, before_state, after_state, price, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    key,
                    action,
                    before.map(serde_json::to_string).transpose()?,
                    after.map(serde_json::to_string).transpose()?,
                    price,
                    Utc::now().to_rfc3339(),
                ],
            )?;

            if let Some((trade_key, t)) = closed {
                tx.execute(
                    "INSERT INTO closed_trades
                        (key, side, amount, entry_price, exit_price, realized_pnl, opened_at, closed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        trade_key,
                        t.side.position_side(),
                        t.amount,
                        t.entry_price,
                        t.exit_price,
                        t.realized_pnl,
                        t.opened_at.to_rfc3339(),
                        t.closed_at.to_rfc3339(),
                    ],
                )?;
            }

            tx.commit()?;
        }

        if let Some(ref path) = self.backup_path {
            if let Err(e) = self.export_json(path) {
                warn!("JSON backup failed: {}", e);
            }
        }
        Ok(())
    }

    /// Dump every open position to a JSON file
    pub fn export_json(&self, path: impl AsRef<Path>) -> Result<(), LedgerError> {
        let conn = self.conn.lock().expect("ledger store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT key, side, amount, entry_price, opened_at, add_count FROM positions",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(serde_json::json!({
                "key": row.get::<_, String>(0)?,
                "side": row.get::<_, String>(1)?,
                "amount": row.get::<_, f64>(2)?,
                "entry_price": row.get::<_, f64>(3)?,
                "opened_at": row.get::<_, String>(4)?,
                "add_count": row.get::<_, i64>(5)?,
            }))
        })?;
        let positions: Vec<serde_json::Value> = rows.collect::<Result<_, _>>()?;
        let doc = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "positions": positions,
        });
        std::fs::write(path, serde_json::to_string_pretty(&doc)?)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(())
    }
}

/// Position ledger for a single strategy instance
pub struct PositionLedger {
    store: LedgerStore,
    key: String,
    max_add_times: u32,
    position: Option<PositionRecord>,
}

impl PositionLedger {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn position(&self) -> Option<&PositionRecord> {
        self.position.as_ref()
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    /// Open a fresh position; only valid from flat
    pub fn open(
        &mut self,
        side: Side,
        amount: f64,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<&PositionRecord, LedgerError> {
        if self.position.is_some() {
            return Err(LedgerError::AlreadyOpen {
                key: self.key.clone(),
            });
        }
        let record = PositionRecord {
            side,
            amount,
            entry_price: price,
            opened_at: at,
            add_count: 0,
        };
        self.store
            .commit(&self.key, "open", None, Some(&record), Some(price), None)?;
        info!(key = %self.key, side = %side, amount, price, "Position opened");
        self.position = Some(record);
        Ok(self.position.as_ref().expect("just set"))
    }

    /// Add to the open position at the given fill price
    ///
    /// The add limit is checked before profitability, so an exhausted limit
    /// is reported even when the position is deep in profit.
    pub fn add(&mut self, amount: f64, price: f64) -> Result<&PositionRecord, LedgerError> {
        let current = self.position.as_ref().ok_or_else(|| LedgerError::NoPosition {
            key: self.key.clone(),
        })?;

        if current.add_count >= self.max_add_times {
            return Err(LedgerError::AddLimitExceeded {
                count: current.add_count,
                max: self.max_add_times,
            });
        }
        let ratio = current.profit_ratio(price);
        if ratio <= 0.0 {
            return Err(LedgerError::NotProfitable { ratio });
        }

        let before = current.clone();
        let total = before.amount + amount;
        let record = PositionRecord {
            side: before.side,
            amount: total,
            entry_price: (before.amount * before.entry_price + amount * price) / total,
            opened_at: before.opened_at,
            add_count: before.add_count + 1,
        };
        self.store.commit(
            &self.key,
            "add",
            Some(&before),
            Some(&record),
            Some(price),
            None,
        )?;
        info!(
            key = %self.key,
            amount,
            price,
            new_amount = record.amount,
            new_entry = record.entry_price,
            "Position increased"
        );
        self.position = Some(record);
        Ok(self.position.as_ref().expect("just set"))
    }

    /// Close the open position at the given fill price
    pub fn close(&mut self, exit_price: f64) -> Result<ClosedTrade, LedgerError> {
        let before = self.position.clone().ok_or_else(|| LedgerError::NoPosition {
            key: self.key.clone(),
        })?;

        let realized_pnl = match before.side {
            Side::Long => (exit_price - before.entry_price) * before.amount,
            Side::Short => (before.entry_price - exit_price) * before.amount,
        };
        let trade = ClosedTrade {
            side: before.side,
            amount: before.amount,
            entry_price: before.entry_price,
            exit_price,
            realized_pnl,
            opened_at: before.opened_at,
            closed_at: Utc::now(),
        };
        self.store.commit(
            &self.key,
            "close",
            Some(&before),
            None,
            Some(exit_price),
            Some((&self.key, &trade)),
        )?;
        info!(
            key = %self.key,
            exit_price,
            realized_pnl,
            "Position closed"
        );
        self.position = None;
        Ok(trade)
    }

    /// Adopt a position already held on the venue into a flat ledger
    pub fn claim(
        &mut self,
        side: Side,
        amount: f64,
        entry_price: f64,
    ) -> Result<&PositionRecord, LedgerError> {
        if self.position.is_some() {
            return Err(LedgerError::AlreadyOpen {
                key: self.key.clone(),
            });
        }
        let record = PositionRecord {
            side,
            amount,
            entry_price,
            opened_at: Utc::now(),
            add_count: 0,
        };
        self.store
            .commit(&self.key, "claim", None, Some(&record), Some(entry_price), None)?;
        warn!(
            key = %self.key,
            side = %side,
            amount,
            entry_price,
            "Claimed untracked venue position"
        );
        self.position = Some(record);
        Ok(self.position.as_ref().expect("just set"))
    }

    /// Clear the local record unconditionally, returning what was dropped
    pub fn force_flat(&mut self, reason: &str) -> Result<Option<PositionRecord>, LedgerError> {
        let before = self.position.take();
        if let Some(ref p) = before {
            self.store
                .commit(&self.key, "force_flat", Some(p), None, None, None)?;
            warn!(key = %self.key, reason, side = %p.side, amount = p.amount, "Forced flat");
        }
        Ok(before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ledger(max_add_times: u32) -> PositionLedger {
        LedgerStore::in_memory()
            .unwrap()
            .ledger("trend", &Symbol::new("ETHUSDT"), max_add_times)
            .unwrap()
    }

    #[test]
    fn test_open_then_add_weighted_average() {
        let mut l = ledger(1);
        l.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();
        let p = l.add(1.0, 120.0).unwrap();
        assert_relative_eq!(p.entry_price, 110.0);
        assert_relative_eq!(p.amount, 2.0);
        assert_eq!(p.add_count, 1);
    }

    #[test]
    fn test_add_limit_checked_before_profitability() {
        let mut l = ledger(0);
        l.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();
        // Deep in profit, but the limit is already exhausted
        let err = l.add(1.0, 200.0).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::AddLimitExceeded { count: 0, max: 0 }
        ));
    }

    #[test]
    fn test_add_rejected_when_not_profitable() {
        let mut l = ledger(2);
        l.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();
        let err = l.add(1.0, 95.0).unwrap_err();
        assert!(matches!(err, LedgerError::NotProfitable { .. }));
        // At exactly entry price the ratio is zero, still rejected
        let err = l.add(1.0, 100.0).unwrap_err();
        assert!(matches!(err, LedgerError::NotProfitable { ratio } if ratio == 0.0));
    }

    #[test]
    fn test_short_add_profitability() {
        let mut l = ledger(2);
        l.open(Side::Short, 1.0, 100.0, Utc::now()).unwrap();
        // Price dropped, the short is in profit
        let p = l.add(1.0, 90.0).unwrap();
        assert_relative_eq!(p.entry_price, 95.0);
    }

    #[test]
    fn test_open_twice_rejected() {
        let mut l = ledger(1);
        l.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();
        assert!(matches!(
            l.open(Side::Short, 1.0, 100.0, Utc::now()),
            Err(LedgerError::AlreadyOpen { .. })
        ));
    }

    #[test]
    fn test_close_resets_to_flat_and_records_pnl() {
        let mut l = ledger(1);
        l.open(Side::Long, 2.0, 100.0, Utc::now()).unwrap();
        let trade = l.close(110.0).unwrap();
        assert_relative_eq!(trade.realized_pnl, 20.0);
        assert!(l.is_flat());
        assert!(matches!(l.close(110.0), Err(LedgerError::NoPosition { .. })));
    }

    #[test]
    fn test_short_close_pnl() {
        let mut l = ledger(1);
        l.open(Side::Short, 2.0, 100.0, Utc::now()).unwrap();
        let trade = l.close(90.0).unwrap();
        assert_relative_eq!(trade.realized_pnl, 20.0);
    }

    #[test]
    fn test_claim_only_into_flat_ledger() {
        let mut l = ledger(1);
        l.claim(Side::Long, 0.5, 101.0).unwrap();
        assert_eq!(l.position().unwrap().amount, 0.5);
        assert!(matches!(
            l.claim(Side::Long, 0.5, 101.0),
            Err(LedgerError::AlreadyOpen { .. })
        ));
    }

    #[test]
    fn test_force_flat() {
        let mut l = ledger(1);
        l.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();
        let dropped = l.force_flat("venue shows no position").unwrap();
        assert_eq!(dropped.unwrap().amount, 1.0);
        assert!(l.is_flat());
        // Second call is a no-op
        assert!(l.force_flat("again").unwrap().is_none());
    }

    #[test]
    fn test_state_survives_reload() {
        let path = std::env::temp_dir().join(format!(
            "dmr_quadrant_ledger_test_{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let symbol = Symbol::new("ETHUSDT");
        {
            let store = LedgerStore::open(&path).unwrap();
            let mut l = store.ledger("trend", &symbol, 1).unwrap();
            l.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();
            l.add(1.0, 120.0).unwrap();
        }

        let store = LedgerStore::open(&path).unwrap();
        let l = store.ledger("trend", &symbol, 1).unwrap();
        let p = l.position().unwrap();
        assert_relative_eq!(p.entry_price, 110.0);
        assert_relative_eq!(p.amount, 2.0);
        assert_eq!(p.add_count, 1);

        // A different strategy key is independent
        let other = store.ledger("swing", &symbol, 1).unwrap();
        assert!(other.is_flat());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_audit_trail_written() {
        let store = LedgerStore::in_memory().unwrap();
        let mut l = store.ledger("trend", &Symbol::new("ETHUSDT"), 1).unwrap();
        l.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();
        l.add(1.0, 120.0).unwrap();
        l.close(130.0).unwrap();

        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ledger_audit", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 3);

        let (action, before, after): (String, Option<String>, Option<String>) = conn
            .query_row(
                "SELECT action, before_state, after_state FROM ledger_audit
                 WHERE action = 'add'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(action, "add");
        assert!(before.unwrap().contains("100"));
        assert!(after.unwrap().contains("110"));
    }

    #[test]
    fn test_open_positions_across_instances() {
        let store = LedgerStore::in_memory().unwrap();
        let symbol = Symbol::new("ETHUSDT");
        let mut trend = store.ledger("trend", &symbol, 1).unwrap();
        let mut swing = store.ledger("swing", &symbol, 1).unwrap();
        trend.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();
        swing.open(Side::Short, 2.0, 100.0, Utc::now()).unwrap();

        let open = store.open_positions().unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].0, "swing_ETHUSDT");
        assert_eq!(open[0].1.side, Side::Short);
        assert_eq!(open[1].0, "trend_ETHUSDT");
        assert_eq!(open[1].1.side, Side::Long);
    }

    fn insert_raw_position(store: &LedgerStore, key: &str, side: &str, opened_at: &str) {
        let conn = store.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO positions
                (key, side, amount, entry_price, opened_at, add_count, updated_at)
             VALUES (?1, ?2, 1.0, 100.0, ?3, 0, ?3)",
            params![key, side, opened_at],
        )
        .unwrap();
    }

    #[test]
    fn test_unknown_side_surfaces_as_corrupt() {
        let store = LedgerStore::in_memory().unwrap();
        insert_raw_position(&store, "trend_ETHUSDT", "BOTH", "2024-01-01T00:00:00+00:00");

        let err = match store.ledger("trend", &Symbol::new("ETHUSDT"), 1) {
            Err(e) => e,
            Ok(_) => panic!("corrupt side was accepted"),
        };
        assert!(
            matches!(&err, LedgerError::Corrupt { key, detail }
                if key == "trend_ETHUSDT" && detail.contains("BOTH")),
            "got {:?}",
            err
        );
        assert!(matches!(
            store.open_positions(),
            Err(LedgerError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_unparseable_opened_at_surfaces_as_corrupt() {
        let store = LedgerStore::in_memory().unwrap();
        insert_raw_position(&store, "swing_ETHUSDT", "LONG", "not-a-timestamp");

        let err = match store.ledger("swing", &Symbol::new("ETHUSDT"), 1) {
            Err(e) => e,
            Ok(_) => panic!("corrupt opened_at was accepted"),
        };
        assert!(
            matches!(&err, LedgerError::Corrupt { detail, .. }
                if detail.contains("not-a-timestamp")),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_realized_pnl_since() {
        let store = LedgerStore::in_memory().unwrap();
        let mut l = store.ledger("trend", &Symbol::new("ETHUSDT"), 1).unwrap();
        l.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();
        l.close(90.0).unwrap();
        let pnl = store
            .realized_pnl_since(Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        assert_relative_eq!(pnl, -10.0);
    }
}
