//! Exit predicate evaluation for open pairs.
//!
//! Pure decision logic; the coordinator samples prices and positions and
//! feeds them in each tick.

use std::time::Duration;

use rust_decimal::Decimal;

use crate::config::TradingConfig;
use crate::domain::{ActiveTrade, CloseReason};
use crate::exchange::PositionSide;
use crate::filter::spread_percent;

use super::pnl;

/// What the coordinator observed this tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickSample {
    /// Fresh marks; `None` when the cache was stale this tick.
    pub long_px: Option<Decimal>,
    pub short_px: Option<Decimal>,
    /// Whether each leg's position is still open on its venue. `None`
    /// when the position query failed this tick.
    pub long_position_open: Option<bool>,
    pub short_position_open: Option<bool>,
    pub elapsed: Duration,
}

/// Outcome of one monitoring tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitDecision {
    pub reason: CloseReason,
    /// The leg the venue already closed, for liquidation asymmetry.
    pub liquidated: Option<PositionSide>,
}

/// Evaluate the exit predicates in order; first match wins.
///
/// Stale prices skip the spread predicates without exiting; the timeout
/// and liquidation predicates never need prices. Updates the trade's
/// max-spread and max-P&L tracking as a side effect.
pub fn evaluate(
    trade: &mut ActiveTrade,
    sample: &TickSample,
    trading: &TradingConfig,
    long_fee: Decimal,
    short_fee: Decimal,
) -> Option<ExitDecision> {
    let marks = sample.long_px.zip(sample.short_px);

    let current_pnl = marks.map(|(long_px, short_px)| {
        let spread = spread_percent(long_px, short_px);
        trade.max_spread_seen = trade.max_spread_seen.max(spread);
        pnl::unrealized(trade, long_px, short_px, long_fee, short_fee)
    });
    if let Some(pnl_now) = current_pnl {
        match trade.max_pnl_seen {
            Some(max) if pnl_now <= max => {}
            _ => trade.max_pnl_seen = Some(pnl_now),
        }
    }

    // 1. Target spread reached.
    if let Some((long_px, short_px)) = marks {
        if spread_percent(long_px, short_px) <= trading.close_spread {
            return Some(ExitDecision {
                reason: CloseReason::TargetSpread,
                liquidated: None,
            });
        }
    }

    // 2. Held too long.
    if sample.elapsed > trading.max_hold_time() {
        return Some(ExitDecision {
            reason: CloseReason::Timeout,
            liquidated: None,
        });
    }

    // 3. Trailing stop.
    if trading.trailing_stop_enabled {
        if let (Some(pnl_now), Some(max_pnl)) = (current_pnl, trade.max_pnl_seen) {
            if pnl_now >= trading.trailing_start {
                if let Some(ratio) = trading.keep_ratio(sample.elapsed) {
                    if pnl_now <= max_pnl * ratio {
                        return Some(ExitDecision {
                            reason: CloseReason::TrailingStop,
                            liquidated: None,
                        });
                    }
                }
            }
        }
    }

    // 4. One leg closed by the venue while the other survives.
    if let (Some(long_open), Some(short_open)) =
        (sample.long_position_open, sample.short_position_open)
    {
        match (long_open, short_open) {
            (false, true) => {
                return Some(ExitDecision {
                    reason: CloseReason::LiquidationAsymmetry,
                    liquidated: Some(PositionSide::Long),
                })
            }
            (true, false) => {
                return Some(ExitDecision {
                    reason: CloseReason::LiquidationAsymmetry,
                    liquidated: Some(PositionSide::Short),
                })
            }
            _ => {}
        }
    }

    None
}
