//! Cached last-price quotes.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Where a quote came from, in decreasing order of liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSource {
    /// Persistent watch stream.
    Stream,
    /// One-shot WebSocket request.
    WsOnce,
    /// REST fallback.
    Rest,
}

/// Most recent known price for one (symbol, venue) pair.
#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub price: Decimal,
    /// Wall-clock timestamp for display and the persisted snapshot.
    pub ts: DateTime<Utc>,
    /// Monotonic instant used for freshness checks.
    pub at: Instant,
    pub source: QuoteSource,
}

impl Quote {
    pub fn now(price: Decimal, source: QuoteSource) -> Self {
        Self {
            price,
            ts: Utc::now(),
            at: Instant::now(),
            source,
        }
    }

    /// Age of this quote relative to the caller's clock.
    pub fn age(&self) -> Duration {
        self.at.elapsed()
    }

    /// True when the quote is younger than `window`.
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.age() <= window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fresh_quote_within_window() {
        let q = Quote::now(dec!(1.5), QuoteSource::Stream);
        assert!(q.is_fresh(Duration::from_secs(3)));
    }
}
