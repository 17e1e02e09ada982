//! Startup and per-tick reconciliation between the local ledgers and the venue
//!
//! The ledger is the book of record for what a strategy instance thinks it
//! holds; the venue is the book of record for what is actually held. On a
//! hedge-mode account both instances' longs aggregate into a single venue
//! LONG position (likewise for shorts), so a venue side only counts as
//! untracked when no book in the shared store accounts for it. This module
//! compares the books and repairs the local side; it never places or
//! cancels orders.
//!
//! An operator can force a clean slate for one instance by touching a
//! `{key}.reset` file in the state directory. The flag is consumed on the
//! next reconcile: the local record is cleared (the venue is untouched) and
//! the file is deleted.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::{LedgerError, LedgerStore, PositionLedger};
use crate::types::{Side, Symbol, VenuePosition};

/// Relative amount mismatch between the books and the venue worth flagging
const AMOUNT_MISMATCH_TOLERANCE: f64 = 0.05;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("reset flag io error: {0}")]
    ResetFlag(#[from] std::io::Error),
}

/// Outcome of comparing one instance's ledger against the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    /// Ledger and venue agree
    Synced,
    /// Ledger claimed a position the venue does not hold; the record was cleared
    Divergent,
    /// Venue holds a position no local book knows about
    OrphanDetected,
}

pub struct Reconciler {
    state_dir: PathBuf,
    symbol: Symbol,
    store: LedgerStore,
}

impl Reconciler {
    pub fn new(state_dir: impl Into<PathBuf>, symbol: Symbol, store: LedgerStore) -> Self {
        Reconciler {
            state_dir: state_dir.into(),
            symbol,
            store,
        }
    }

    fn reset_flag_path(&self, key: &str) -> PathBuf {
        self.state_dir.join(format!("{}.reset", key))
    }

    /// Drop a reset flag for the given instance key
    pub fn request_reset(&self, key: &str) -> Result<(), ReconcileError> {
        std::fs::write(self.reset_flag_path(key), b"")?;
        Ok(())
    }

    /// Total amount every local book holds on a side
    fn booked_amount(&self, side: Side) -> Result<f64, ReconcileError> {
        Ok(self
            .store
            .open_positions()?
            .iter()
            .filter(|(_, p)| p.side == side)
            .map(|(_, p)| p.amount)
            .sum())
    }

    /// Compare the ledger against the venue's reported positions and repair
    /// the local side where they disagree
    pub fn reconcile(
        &self,
        ledger: &mut PositionLedger,
        venue_positions: &[VenuePosition],
    ) -> Result<ReconcileState, ReconcileError> {
        self.consume_reset_flag(ledger)?;

        let held: Vec<&VenuePosition> = venue_positions
            .iter()
            .filter(|p| p.symbol == self.symbol)
            .collect();

        match ledger.position().cloned() {
            None => {
                let mut orphaned = false;
                for p in &held {
                    if self.booked_amount(p.side)? > 0.0 {
                        continue;
                    }
                    orphaned = true;
                    warn!(
                        key = ledger.key(),
                        side = %p.side,
                        amount = p.amount,
                        entry_price = p.entry_price,
                        "Reconcile: venue holds a position no local book tracks"
                    );
                }
                if orphaned {
                    Ok(ReconcileState::OrphanDetected)
                } else {
                    debug!(key = ledger.key(), "Reconcile: in sync");
                    Ok(ReconcileState::Synced)
                }
            }
            Some(local) => match held.iter().find(|p| p.side == local.side) {
                None => {
                    ledger.force_flat("venue reports no position on this side")?;
                    Ok(ReconcileState::Divergent)
                }
                Some(venue) => {
                    // The venue aggregates every book on this side
                    let booked = self.booked_amount(local.side)?;
                    let mismatch =
                        (venue.amount - booked).abs() / booked.max(f64::MIN_POSITIVE);
                    if mismatch > AMOUNT_MISMATCH_TOLERANCE {
                        warn!(
                            key = ledger.key(),
                            booked_amount = booked,
                            venue_amount = venue.amount,
                            "Reconcile: amount mismatch beyond tolerance, keeping local record"
                        );
                    }
                    Ok(ReconcileState::Synced)
                }
            },
        }
    }

    /// A venue position on the given side that no local book accounts for,
    /// eligible for claiming before a fresh entry
    pub fn claimable<'a>(
        &self,
        ledger: &PositionLedger,
        venue_positions: &'a [VenuePosition],
        side: Side,
    ) -> Result<Option<&'a VenuePosition>, ReconcileError> {
        if !ledger.is_flat() || self.booked_amount(side)? > 0.0 {
            return Ok(None);
        }
        Ok(venue_positions
            .iter()
            .find(|p| p.symbol == self.symbol && p.side == side))
    }

    fn consume_reset_flag(&self, ledger: &mut PositionLedger) -> Result<bool, ReconcileError> {
        let path = self.reset_flag_path(ledger.key());
        if !path.exists() {
            return Ok(false);
        }
        info!(key = ledger.key(), flag = %path.display(), "Reset flag found, clearing local record");
        ledger.force_flat("operator reset flag")?;
        std::fs::remove_file(&path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn symbol() -> Symbol {
        Symbol::new("ETHUSDT")
    }

    fn venue(side: Side, amount: f64) -> VenuePosition {
        VenuePosition {
            symbol: symbol(),
            side,
            amount,
            entry_price: 100.0,
            unrealized_pnl: 0.0,
        }
    }

    struct Fixture {
        reconciler: Reconciler,
        ledger: PositionLedger,
        store: LedgerStore,
        dir: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn fixture(tag: &str) -> Fixture {
        let dir = std::env::temp_dir().join(format!(
            "dmr_quadrant_reconcile_{}_{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let store = LedgerStore::in_memory().unwrap();
        let ledger = store.ledger("trend", &symbol(), 1).unwrap();
        Fixture {
            reconciler: Reconciler::new(&dir, symbol(), store.clone()),
            ledger,
            store,
            dir,
        }
    }

    #[test]
    fn test_flat_both_sides_is_synced() {
        let mut f = fixture("flat");
        assert_eq!(
            f.reconciler.reconcile(&mut f.ledger, &[]).unwrap(),
            ReconcileState::Synced
        );
    }

    #[test]
    fn test_local_position_missing_on_venue_forces_flat() {
        let mut f = fixture("divergent");
        f.ledger.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();

        let state = f.reconciler.reconcile(&mut f.ledger, &[]).unwrap();
        assert_eq!(state, ReconcileState::Divergent);
        assert!(f.ledger.is_flat());
    }

    #[test]
    fn test_untracked_venue_position_is_orphan() {
        let mut f = fixture("orphan");
        let state = f
            .reconciler
            .reconcile(&mut f.ledger, &[venue(Side::Long, 0.5)])
            .unwrap();
        assert_eq!(state, ReconcileState::OrphanDetected);
        // Detection does not mutate the ledger, claiming is an entry-time decision
        assert!(f.ledger.is_flat());
    }

    #[test]
    fn test_other_books_position_is_not_an_orphan() {
        let mut f = fixture("other_book");
        // The other instance accounts for the venue long
        let mut other = f.store.ledger("swing", &symbol(), 1).unwrap();
        other.open(Side::Long, 0.5, 100.0, Utc::now()).unwrap();

        let state = f
            .reconciler
            .reconcile(&mut f.ledger, &[venue(Side::Long, 0.5)])
            .unwrap();
        assert_eq!(state, ReconcileState::Synced);
    }

    #[test]
    fn test_matching_sides_synced_even_with_amount_drift() {
        let mut f = fixture("drift");
        f.ledger.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();

        // 20% drift logs a warning but stays synced with the local record kept
        let state = f
            .reconciler
            .reconcile(&mut f.ledger, &[venue(Side::Long, 1.2)])
            .unwrap();
        assert_eq!(state, ReconcileState::Synced);
        assert_eq!(f.ledger.position().unwrap().amount, 1.0);
    }

    #[test]
    fn test_aggregate_venue_amount_compared_against_all_books() {
        let mut f = fixture("aggregate");
        f.ledger.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();
        let mut other = f.store.ledger("swing", &symbol(), 1).unwrap();
        other.open(Side::Long, 0.5, 100.0, Utc::now()).unwrap();

        // Venue shows the sum of both books; no mismatch
        let state = f
            .reconciler
            .reconcile(&mut f.ledger, &[venue(Side::Long, 1.5)])
            .unwrap();
        assert_eq!(state, ReconcileState::Synced);
    }

    #[test]
    fn test_opposite_side_on_venue_only_is_divergent() {
        let mut f = fixture("opposite");
        f.ledger.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();

        // The venue only has a SHORT, so the local LONG is stale
        let state = f
            .reconciler
            .reconcile(&mut f.ledger, &[venue(Side::Short, 1.0)])
            .unwrap();
        assert_eq!(state, ReconcileState::Divergent);
        assert!(f.ledger.is_flat());
    }

    #[test]
    fn test_other_symbols_ignored() {
        let mut f = fixture("other_symbol");
        let other = VenuePosition {
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Long,
            amount: 1.0,
            entry_price: 50000.0,
            unrealized_pnl: 0.0,
        };
        assert_eq!(
            f.reconciler.reconcile(&mut f.ledger, &[other]).unwrap(),
            ReconcileState::Synced
        );
    }

    #[test]
    fn test_reset_flag_clears_local_record_once() {
        let mut f = fixture("reset");
        f.ledger.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();

        f.reconciler.request_reset(f.ledger.key()).unwrap();
        assert!(f.reconciler.reset_flag_path(f.ledger.key()).exists());

        // The flag clears the local record regardless of what the venue says
        let state = f
            .reconciler
            .reconcile(&mut f.ledger, &[venue(Side::Long, 1.0)])
            .unwrap();
        assert!(f.ledger.is_flat());
        assert_eq!(state, ReconcileState::OrphanDetected);
        assert!(!f.reconciler.reset_flag_path(f.ledger.key()).exists());

        // Consumed: the next pass behaves normally
        let state = f.reconciler.reconcile(&mut f.ledger, &[]).unwrap();
        assert_eq!(state, ReconcileState::Synced);
    }

    #[test]
    fn test_claimable_requires_flat_books_and_matching_side() {
        let mut f = fixture("claim");
        let positions = [venue(Side::Long, 0.5)];
        assert!(f
            .reconciler
            .claimable(&f.ledger, &positions, Side::Long)
            .unwrap()
            .is_some());
        assert!(f
            .reconciler
            .claimable(&f.ledger, &positions, Side::Short)
            .unwrap()
            .is_none());

        f.ledger.open(Side::Long, 1.0, 100.0, Utc::now()).unwrap();
        assert!(f
            .reconciler
            .claimable(&f.ledger, &positions, Side::Long)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_claimable_refused_when_another_book_holds_the_side() {
        let f = fixture("claim_other");
        let mut other = f.store.ledger("swing", &symbol(), 1).unwrap();
        other.open(Side::Long, 0.5, 100.0, Utc::now()).unwrap();

        let positions = [venue(Side::Long, 0.5)];
        assert!(f
            .reconciler
            .claimable(&f.ledger, &positions, Side::Long)
            .unwrap()
            .is_none());
    }
}
