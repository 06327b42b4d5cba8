//! Shared application state.
//!
//! The supervisor owns one `AppState` and hands `Arc` clones to the
//! subsystems. Active-trade snapshots are registered here on every state
//! transition; the full `ActiveTrade` stays with its coordinator task.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;

use crate::domain::{
    DailyLedger, Symbol, TradeId, TradeOutcome, TradeSnapshot, VenueId,
};
use crate::exchange::Balance;

/// Balance snapshot with its fetch time.
#[derive(Debug, Clone, Copy)]
pub struct BalanceEntry {
    pub balance: Balance,
    pub fetched_at: Instant,
}

/// Session counters surfaced in logs and the persisted snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub messages_seen: u64,
    pub signals_accepted: u64,
    pub signals_rejected: u64,
    pub trades_opened: u64,
}

pub struct AppState {
    ledger: Mutex<DailyLedger>,
    active: RwLock<HashMap<TradeId, TradeSnapshot>>,
    balances: RwLock<HashMap<VenueId, BalanceEntry>>,
    history: Mutex<Vec<TradeOutcome>>,
    /// Trades found in the persisted snapshot at boot; never auto-resumed.
    held_for_review: Mutex<Vec<TradeSnapshot>>,
    stats: Mutex<SessionStats>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(DailyLedger::new(Utc::now().date_naive())),
            active: RwLock::new(HashMap::new()),
            balances: RwLock::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            held_for_review: Mutex::new(Vec::new()),
            stats: Mutex::new(SessionStats::default()),
        }
    }

    // --- ledger ---------------------------------------------------------

    /// Day's realized P&L, rolling the ledger at the UTC boundary first.
    pub fn daily_pnl(&self) -> Decimal {
        let mut ledger = self.ledger.lock();
        ledger.roll(Utc::now().date_naive());
        ledger.realized
    }

    pub fn ledger_snapshot(&self) -> DailyLedger {
        let mut ledger = self.ledger.lock();
        ledger.roll(Utc::now().date_naive());
        ledger.clone()
    }

    /// Record a closed trade in the ledger and history.
    pub fn record_outcome(&self, outcome: &TradeOutcome) {
        let mut ledger = self.ledger.lock();
        ledger.roll(Utc::now().date_naive());
        ledger.record(outcome);
        drop(ledger);
        self.history.lock().push(outcome.clone());
    }

    pub fn history(&self) -> Vec<TradeOutcome> {
        self.history.lock().clone()
    }

    // --- active trades --------------------------------------------------

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// True when some active trade already covers `symbol`.
    pub fn is_symbol_active(&self, symbol: &Symbol) -> bool {
        self.active.read().values().any(|t| &t.symbol == symbol)
    }

    /// Atomically check the concurrency cap and register the trade.
    ///
    /// Admission runs concurrently with coordinator tasks; checking and
    /// inserting under one write lock keeps the cap exact.
    pub fn try_register(&self, snapshot: TradeSnapshot, max_concurrent: usize) -> bool {
        let mut active = self.active.write();
        if active.len() >= max_concurrent {
            return false;
        }
        active.insert(snapshot.id, snapshot);
        true
    }

    /// Record a state transition announced by a coordinator.
    pub fn update_trade(&self, snapshot: TradeSnapshot) {
        let mut active = self.active.write();
        if snapshot.state.is_terminal() {
            active.remove(&snapshot.id);
        } else {
            active.insert(snapshot.id, snapshot);
        }
    }

    pub fn active_trades(&self) -> Vec<TradeSnapshot> {
        self.active.read().values().cloned().collect()
    }

    // --- balances -------------------------------------------------------

    pub fn set_balance(&self, venue: VenueId, balance: Balance) {
        self.balances.write().insert(
            venue,
            BalanceEntry {
                balance,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn balance(&self, venue: &VenueId) -> Option<Balance> {
        self.balances.read().get(venue).map(|e| e.balance)
    }

    pub fn balances(&self) -> HashMap<VenueId, Balance> {
        self.balances
            .read()
            .iter()
            .map(|(venue, entry)| (venue.clone(), entry.balance))
            .collect()
    }

    // --- restart review -------------------------------------------------

    /// Trades from a previous run; exchange-held positions are the source
    /// of truth, so these are surfaced instead of resumed.
    pub fn hold_for_review(&self, trades: Vec<TradeSnapshot>) {
        self.held_for_review.lock().extend(trades);
    }

    pub fn held_for_review(&self) -> Vec<TradeSnapshot> {
        self.held_for_review.lock().clone()
    }

    // --- stats ----------------------------------------------------------

    pub fn stats(&self) -> SessionStats {
        *self.stats.lock()
    }

    pub fn note_message(&self) {
        self.stats.lock().messages_seen += 1;
    }

    pub fn note_signal_accepted(&self) {
        self.stats.lock().signals_accepted += 1;
    }

    pub fn note_signal_rejected(&self) {
        self.stats.lock().signals_rejected += 1;
    }

    pub fn note_trade_opened(&self) {
        self.stats.lock().trades_opened += 1;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TradeState;
    use rust_decimal_macros::dec;

    fn snapshot(id: TradeId, symbol: &str, state: TradeState) -> TradeSnapshot {
        TradeSnapshot {
            id,
            symbol: Symbol::parse(symbol).unwrap(),
            long_venue: VenueId::new("a"),
            short_venue: VenueId::new("b"),
            quantity: dec!(2),
            entry_long: dec!(1),
            entry_short: dec!(1.05),
            entry_spread: dec!(5),
            opened_at: Utc::now(),
            state,
            close_reason: None,
        }
    }

    #[test]
    fn register_enforces_cap() {
        let state = AppState::new();
        assert!(state.try_register(snapshot(TradeId::new(), "FOO", TradeState::Opening), 1));
        assert!(!state.try_register(snapshot(TradeId::new(), "BAR", TradeState::Opening), 1));
        assert_eq!(state.active_count(), 1);
        assert!(state.is_symbol_active(&Symbol::parse("FOO").unwrap()));
    }

    #[test]
    fn terminal_transition_frees_a_slot() {
        let state = AppState::new();
        let id = TradeId::new();
        assert!(state.try_register(snapshot(id, "FOO", TradeState::Opening), 1));

        state.update_trade(snapshot(id, "FOO", TradeState::Closed));
        assert_eq!(state.active_count(), 0);
        assert!(state.try_register(snapshot(TradeId::new(), "BAR", TradeState::Opening), 1));
    }

    #[test]
    fn balances_round_trip() {
        let state = AppState::new();
        let venue = VenueId::new("a");
        state.set_balance(
            venue.clone(),
            Balance {
                free: dec!(10),
                used: Decimal::ZERO,
                total: dec!(10),
            },
        );
        assert_eq!(state.balance(&venue).unwrap().free, dec!(10));
        assert!(state.balance(&VenueId::new("missing")).is_none());
    }
}
