//! Market metadata as reported by a venue.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Symbol, VenueId};

/// Tradeable contract on one venue.
///
/// `native_symbol` is the venue's own spelling (`BTCUSDT`, `BTC_USDT`, ...);
/// `symbol` is the normalized base ticker shared across the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub native_symbol: String,
    /// Smallest price increment.
    pub price_tick: Decimal,
    /// Smallest quantity increment.
    pub lot_step: Decimal,
    /// Minimum order quantity, in contracts.
    pub min_qty: Decimal,
    /// Minimum order notional in USDT, when the venue enforces one.
    pub min_notional: Option<Decimal>,
    /// Taker fee as a fraction, e.g. 0.0006.
    pub taker_fee: Decimal,
}

impl Market {
    /// Round `qty` up to this market's lot step.
    pub fn ceil_to_lot(&self, qty: Decimal) -> Decimal {
        ceil_to_step(qty, self.lot_step)
    }
}

/// Round `value` up to the next multiple of `step`.
///
/// A zero or negative step passes the value through unchanged.
pub fn ceil_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    let steps = (value / step).ceil();
    (steps * step).normalize()
}

/// Round `value` down to the previous multiple of `step`.
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    let steps = (value / step).floor();
    (steps * step).normalize()
}
