//! Arbitrage pair lifecycle types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Symbol, TradeId, VenueId};
use crate::exchange::OrderId;

/// Fully vetted trade the coordinator is asked to execute.
///
/// Produced by the opportunity filter after every admission check passed.
/// The long venue is always the cheaper of the two live quotes.
#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub symbol: Symbol,
    pub long_venue: VenueId,
    pub short_venue: VenueId,
    /// Native contract spelling on each venue.
    pub long_native: String,
    pub short_native: String,
    /// Live quotes selected at admission time.
    pub long_price: Decimal,
    pub short_price: Decimal,
    /// Identical quantity on both legs.
    pub quantity: Decimal,
    /// `quantity * long_price`.
    pub notional: Decimal,
    /// Spread as reported by the signal.
    pub reported_spread: Decimal,
    /// Spread recomputed from live quotes at admission.
    pub live_spread: Decimal,
}

/// Coordinator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeState {
    Opening,
    Open,
    Closing,
    Settling,
    Closed,
    Aborting,
    Error,
}

impl TradeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeState::Closed | TradeState::Aborting | TradeState::Error
        )
    }
}

impl std::fmt::Display for TradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeState::Opening => "opening",
            TradeState::Open => "open",
            TradeState::Closing => "closing",
            TradeState::Settling => "settling",
            TradeState::Closed => "closed",
            TradeState::Aborting => "aborting",
            TradeState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Why a pair was unwound. First matching exit predicate wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Spread collapsed to the configured target.
    TargetSpread,
    /// Held longer than the configured maximum.
    Timeout,
    /// Trailing stop gave back too much of the peak unrealized P&L.
    TrailingStop,
    /// One leg was closed by the venue while the other survived.
    LiquidationAsymmetry,
    /// Cooperative shutdown.
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::TargetSpread => "target_spread",
            CloseReason::Timeout => "timeout",
            CloseReason::TrailingStop => "trailing_stop",
            CloseReason::LiquidationAsymmetry => "liquidation_asymmetry",
            CloseReason::Shutdown => "shutdown",
        };
        write!(f, "{s}")
    }
}

/// Live arbitrage pair, owned exclusively by its coordinator task.
#[derive(Debug, Clone)]
pub struct ActiveTrade {
    pub id: TradeId,
    pub symbol: Symbol,
    pub long_venue: VenueId,
    pub short_venue: VenueId,
    pub long_native: String,
    pub short_native: String,
    pub entry_long: Decimal,
    pub entry_short: Decimal,
    pub quantity: Decimal,
    pub entry_spread: Decimal,
    pub opened_at: DateTime<Utc>,
    pub state: TradeState,
    /// Highest spread observed while open.
    pub max_spread_seen: Decimal,
    /// Peak unrealized P&L, used by the trailing stop once armed.
    pub max_pnl_seen: Option<Decimal>,
    pub long_order: Option<OrderId>,
    pub short_order: Option<OrderId>,
    pub close_reason: Option<CloseReason>,
}

impl ActiveTrade {
    pub fn from_request(id: TradeId, req: &TradeRequest) -> Self {
        Self {
            id,
            symbol: req.symbol.clone(),
            long_venue: req.long_venue.clone(),
            short_venue: req.short_venue.clone(),
            long_native: req.long_native.clone(),
            short_native: req.short_native.clone(),
            entry_long: req.long_price,
            entry_short: req.short_price,
            quantity: req.quantity,
            entry_spread: req.live_spread,
            opened_at: Utc::now(),
            state: TradeState::Opening,
            max_spread_seen: req.live_spread,
            max_pnl_seen: None,
            long_order: None,
            short_order: None,
            close_reason: None,
        }
    }
}

/// Snapshot of a trade for the registry and the persisted state blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSnapshot {
    pub id: TradeId,
    pub symbol: Symbol,
    pub long_venue: VenueId,
    pub short_venue: VenueId,
    pub quantity: Decimal,
    pub entry_long: Decimal,
    pub entry_short: Decimal,
    pub entry_spread: Decimal,
    pub opened_at: DateTime<Utc>,
    pub state: TradeState,
    pub close_reason: Option<CloseReason>,
}

impl From<&ActiveTrade> for TradeSnapshot {
    fn from(t: &ActiveTrade) -> Self {
        Self {
            id: t.id,
            symbol: t.symbol.clone(),
            long_venue: t.long_venue.clone(),
            short_venue: t.short_venue.clone(),
            quantity: t.quantity,
            entry_long: t.entry_long,
            entry_short: t.entry_short,
            entry_spread: t.entry_spread,
            opened_at: t.opened_at,
            state: t.state,
            close_reason: t.close_reason,
        }
    }
}

/// Final accounting for a closed pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub trade_id: TradeId,
    pub symbol: Symbol,
    pub long_venue: VenueId,
    pub short_venue: VenueId,
    pub quantity: Decimal,
    pub entry_long: Decimal,
    pub entry_short: Decimal,
    pub exit_long: Decimal,
    pub exit_short: Decimal,
    pub gross_long: Decimal,
    pub gross_short: Decimal,
    pub fees: Decimal,
    pub net: Decimal,
    pub close_reason: CloseReason,
    pub duration_secs: i64,
    /// Unfilled remainder across both closing legs, reported but not
    /// re-traded.
    pub residual_qty: Decimal,
    /// True when a liquidated leg's fill could not be queried and the exit
    /// price is the last observed mark.
    pub pnl_estimated: bool,
}
