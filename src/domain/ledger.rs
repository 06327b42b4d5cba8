//! Daily P&L bookkeeping.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{TradeOutcome, VenueId};

/// Realized results for one UTC day.
///
/// Mutated only on trade closure; rolls over at the UTC day boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyLedger {
    pub date: NaiveDate,
    pub realized: Decimal,
    pub fees: Decimal,
    pub trade_count: u32,
    pub wins: u32,
    pub losses: u32,
    pub per_venue: HashMap<VenueId, Decimal>,
}

impl DailyLedger {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            realized: Decimal::ZERO,
            fees: Decimal::ZERO,
            trade_count: 0,
            wins: 0,
            losses: 0,
            per_venue: HashMap::new(),
        }
    }

    /// Reset if `today` has moved past the ledger's date.
    pub fn roll(&mut self, today: NaiveDate) {
        if today != self.date {
            *self = Self::new(today);
        }
    }

    /// Record a closed trade, attributing half of the net to each venue.
    pub fn record(&mut self, outcome: &TradeOutcome) {
        self.realized += outcome.net;
        self.fees += outcome.fees;
        self.trade_count += 1;
        if outcome.net > Decimal::ZERO {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        let half = outcome.net / Decimal::TWO;
        *self
            .per_venue
            .entry(outcome.long_venue.clone())
            .or_insert(Decimal::ZERO) += half;
        *self
            .per_venue
            .entry(outcome.short_venue.clone())
            .or_insert(Decimal::ZERO) += half;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CloseReason, Symbol, TradeId};
    use rust_decimal_macros::dec;

    fn outcome(net: Decimal) -> TradeOutcome {
        TradeOutcome {
            trade_id: TradeId::new(),
            symbol: Symbol::parse("FOO").unwrap(),
            long_venue: VenueId::new("a"),
            short_venue: VenueId::new("b"),
            quantity: dec!(2),
            entry_long: dec!(1),
            entry_short: dec!(1.05),
            exit_long: dec!(1.04),
            exit_short: dec!(1.042),
            gross_long: dec!(0.08),
            gross_short: dec!(0.016),
            fees: dec!(0.0025),
            net,
            close_reason: CloseReason::TargetSpread,
            duration_secs: 25,
            residual_qty: Decimal::ZERO,
            pnl_estimated: false,
        }
    }

    #[test]
    fn record_splits_net_across_venues() {
        let mut ledger = DailyLedger::new(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        ledger.record(&outcome(dec!(0.0935)));

        assert_eq!(ledger.realized, dec!(0.0935));
        assert_eq!(ledger.trade_count, 1);
        assert_eq!(ledger.wins, 1);
        assert_eq!(ledger.per_venue[&VenueId::new("a")], dec!(0.04675));
        assert_eq!(ledger.per_venue[&VenueId::new("b")], dec!(0.04675));
    }

    #[test]
    fn roll_resets_at_day_boundary() {
        let mut ledger = DailyLedger::new(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        ledger.record(&outcome(dec!(-1)));
        ledger.roll(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());

        assert_eq!(ledger.realized, Decimal::ZERO);
        assert_eq!(ledger.trade_count, 0);

        // Same day is a no-op
        ledger.record(&outcome(dec!(1)));
        ledger.roll(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        assert_eq!(ledger.trade_count, 1);
    }
}
