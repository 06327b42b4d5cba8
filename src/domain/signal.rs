//! Parsed arbitrage signals.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{Symbol, VenueId};

/// One arbitrage announcement extracted from a raw chat message.
///
/// Ephemeral: consumed once by the opportunity filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub symbol: Symbol,
    /// Spread percentage as reported by the signal source.
    pub spread: Decimal,
    /// Quoted price per venue named in the message.
    pub prices: HashMap<VenueId, Decimal>,
    /// Median of all dollar-prefixed numbers in the message, used to
    /// disambiguate contracts that share a ticker.
    pub ref_price: Option<Decimal>,
    pub parsed_at: DateTime<Utc>,
}

impl SignalEvent {
    /// Venue with the lowest quoted price (long candidate), when at least
    /// two venues are present.
    pub fn cheapest_venue(&self) -> Option<(&VenueId, Decimal)> {
        self.prices
            .iter()
            .min_by_key(|(_, p)| **p)
            .map(|(v, p)| (v, *p))
    }

    /// Venue with the highest quoted price (short candidate).
    pub fn richest_venue(&self) -> Option<(&VenueId, Decimal)> {
        self.prices
            .iter()
            .max_by_key(|(_, p)| **p)
            .map(|(v, p)| (v, *p))
    }
}
