//! Realized and unrealized P&L arithmetic.

use rust_decimal::Decimal;

use crate::domain::ActiveTrade;

/// Unrealized P&L against current marks, net of entry-side fees.
///
/// Used by the monitoring loop for the trailing stop; exit-side fees are
/// unknown until the unwind prices exist.
pub fn unrealized(
    trade: &ActiveTrade,
    long_px: Decimal,
    short_px: Decimal,
    long_fee: Decimal,
    short_fee: Decimal,
) -> Decimal {
    let long_leg = (long_px - trade.entry_long) * trade.quantity;
    let short_leg = (trade.entry_short - short_px) * trade.quantity;
    let entry_fees =
        trade.quantity * (trade.entry_long * long_fee + trade.entry_short * short_fee);
    long_leg + short_leg - entry_fees
}

/// Realized settlement figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub gross_long: Decimal,
    pub gross_short: Decimal,
    pub fees: Decimal,
    pub net: Decimal,
}

/// Realized P&L with commission on every traded price.
///
/// With equal venue fees this reduces to
/// `qty * (entryLong + entryShort + exitLong + exitShort) * takerFee`.
pub fn settle(
    trade: &ActiveTrade,
    exit_long: Decimal,
    exit_short: Decimal,
    long_fee: Decimal,
    short_fee: Decimal,
) -> Settlement {
    let qty = trade.quantity;
    let gross_long = (exit_long - trade.entry_long) * qty;
    let gross_short = (trade.entry_short - exit_short) * qty;
    let fees = qty
        * ((trade.entry_long + exit_long) * long_fee
            + (trade.entry_short + exit_short) * short_fee);
    Settlement {
        gross_long,
        gross_short,
        fees,
        net: gross_long + gross_short - fees,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Symbol, TradeId, TradeRequest, VenueId};
    use rust_decimal_macros::dec;

    fn trade(entry_long: Decimal, entry_short: Decimal, qty: Decimal) -> ActiveTrade {
        let request = TradeRequest {
            symbol: Symbol::parse("FOO").unwrap(),
            long_venue: VenueId::new("a"),
            short_venue: VenueId::new("b"),
            long_native: "FOO-USDT".into(),
            short_native: "FOO-USDT".into(),
            long_price: entry_long,
            short_price: entry_short,
            quantity: qty,
            notional: qty * entry_long,
            reported_spread: dec!(5),
            live_spread: dec!(5),
        };
        ActiveTrade::from_request(TradeId::new(), &request)
    }

    #[test]
    fn settle_matches_the_ledger_formula() {
        // Spread collapse: long 1.00 -> 1.04, short 1.05 -> 1.042, qty 2.
        let t = trade(dec!(1.00), dec!(1.05), dec!(2));
        let s = settle(&t, dec!(1.04), dec!(1.042), dec!(0.0006), dec!(0.0006));

        assert_eq!(s.gross_long, dec!(0.08));
        assert_eq!(s.gross_short, dec!(0.016));
        // qty * (1.00 + 1.05 + 1.04 + 1.042) * 0.0006
        assert_eq!(s.fees, dec!(0.0049584));
        assert_eq!(s.net, s.gross_long + s.gross_short - s.fees);
        assert!(s.net > Decimal::ZERO);
    }

    #[test]
    fn settle_matched_fills_lose_only_fees() {
        let t = trade(dec!(1.00), dec!(1.05), dec!(2));
        let s = settle(&t, dec!(1.00), dec!(1.05), dec!(0.0006), dec!(0.0006));

        assert_eq!(s.gross_long, Decimal::ZERO);
        assert_eq!(s.gross_short, Decimal::ZERO);
        assert_eq!(s.net, -s.fees);
    }

    #[test]
    fn unrealized_nets_entry_fees() {
        let t = trade(dec!(1.00), dec!(1.05), dec!(2));
        let pnl = unrealized(&t, dec!(1.00), dec!(1.05), dec!(0.0006), dec!(0.0006));
        // No price movement: unrealized is minus the entry fees.
        assert_eq!(pnl, dec!(-0.00246));
    }

    #[test]
    fn asymmetric_fees_apply_per_venue() {
        let t = trade(dec!(1.00), dec!(1.00), dec!(1));
        let s = settle(&t, dec!(1.00), dec!(1.00), dec!(0.001), dec!(0.0));
        assert_eq!(s.fees, dec!(0.002));
    }
}
