//! Persisted state snapshot.
//!
//! A small JSON blob with the day's ledger, the active-trade registry, and
//! the last reconciled balances, flushed on state transitions. On restart
//! active trades are never resumed automatically; they are surfaced for
//! operator review because exchange-held positions are the source of
//! truth.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::app::AppState;
use crate::domain::{DailyLedger, TradeSnapshot, VenueId};
use crate::error::Result;
use crate::exchange::Balance;

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedState {
    pub saved_at: DateTime<Utc>,
    pub ledger: DailyLedger,
    pub active_trades: Vec<TradeSnapshot>,
    pub balances: HashMap<VenueId, Balance>,
}

/// JSON state file with atomic replace semantics.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the previous snapshot, if any.
    pub fn load(&self) -> Result<Option<PersistedState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&content)?;
        Ok(Some(state))
    }

    /// Write the current state, replacing the file atomically.
    pub fn flush(&self, state: &AppState) -> Result<()> {
        let snapshot = PersistedState {
            saved_at: Utc::now(),
            ledger: state.ledger_snapshot(),
            active_trades: state.active_trades(),
            balances: state.balances(),
        };
        let content = serde_json::to_string_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Best-effort flush; failures are logged, never propagated into the
    /// trade path.
    pub fn flush_or_warn(&self, state: &AppState) {
        if let Err(e) = self.flush(state) {
            warn!(path = %self.path.display(), error = %e, "State flush failed");
        }
    }

    /// Apply a loaded snapshot at boot: restore the balances view and move
    /// any previously active trades into the review list.
    pub fn restore_into(&self, state: &AppState) -> Result<()> {
        let Some(persisted) = self.load()? else {
            return Ok(());
        };
        for (venue, balance) in persisted.balances {
            state.set_balance(venue, balance);
        }
        if !persisted.active_trades.is_empty() {
            error!(
                trades = persisted.active_trades.len(),
                "Previous run left active trades; NOT resuming. \
                 Review exchange-held positions before trading."
            );
            for trade in &persisted.active_trades {
                error!(
                    trade_id = %trade.id,
                    symbol = %trade.symbol,
                    long = %trade.long_venue,
                    short = %trade.short_venue,
                    state = %trade.state,
                    "Held for operator review"
                );
            }
            state.hold_for_review(persisted.active_trades);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Symbol, TradeId, TradeState};
    use rust_decimal_macros::dec;

    fn snapshot(symbol: &str) -> TradeSnapshot {
        TradeSnapshot {
            id: TradeId::new(),
            symbol: Symbol::parse(symbol).unwrap(),
            long_venue: VenueId::new("a"),
            short_venue: VenueId::new("b"),
            quantity: dec!(2),
            entry_long: dec!(1),
            entry_short: dec!(1.05),
            entry_spread: dec!(5),
            opened_at: Utc::now(),
            state: TradeState::Open,
            close_reason: None,
        }
    }

    #[test]
    fn flush_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let state = AppState::new();
        state.try_register(snapshot("FOO"), 4);
        state.set_balance(
            VenueId::new("a"),
            Balance {
                free: dec!(10),
                used: dec!(0),
                total: dec!(10),
            },
        );

        store.flush(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.active_trades.len(), 1);
        assert_eq!(loaded.balances[&VenueId::new("a")].free, dec!(10));
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn restore_holds_active_trades_for_review() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let old = AppState::new();
        old.try_register(snapshot("FOO"), 4);
        store.flush(&old).unwrap();

        let fresh = AppState::new();
        store.restore_into(&fresh).unwrap();
        assert_eq!(fresh.active_count(), 0);
        assert_eq!(fresh.held_for_review().len(), 1);
    }
}
