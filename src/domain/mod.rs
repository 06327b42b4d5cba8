//! Pure domain types.
//!
//! No I/O here; everything is constructed by the subsystems and shared as
//! plain values.

mod ids;
mod ledger;
mod market;
mod quote;
mod signal;
mod trade;

pub use ids::{Symbol, TradeId, VenueId};
pub use ledger::DailyLedger;
pub use market::{ceil_to_step, floor_to_step, Market};
pub use quote::{Quote, QuoteSource};
pub use signal::SignalEvent;
pub use trade::{
    ActiveTrade, CloseReason, TradeOutcome, TradeRequest, TradeSnapshot, TradeState,
};
