//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a specific exchange, e.g. `bybit` or `mexc`.
///
/// Always stored lowercase so config, signals, and adapters agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VenueId(String);

impl VenueId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VenueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VenueId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Normalized base ticker, e.g. `BTC` or `1`.
///
/// Uppercase, 1-15 alphanumeric characters. Digits alone are valid tickers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize and validate a raw ticker.
    ///
    /// Returns `None` when the input is empty, too long, or contains
    /// non-alphanumeric characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim().to_uppercase();
        if s.is_empty() || s.len() > 15 || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of an arbitrage pair trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(Uuid);

impl TradeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TradeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TradeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_id_is_lowercased() {
        assert_eq!(VenueId::new("MEXC").as_str(), "mexc");
    }

    #[test]
    fn symbol_accepts_single_digit_tickers() {
        assert_eq!(Symbol::parse("1").unwrap().as_str(), "1");
        assert_eq!(Symbol::parse("foo").unwrap().as_str(), "FOO");
    }

    #[test]
    fn symbol_rejects_invalid_input() {
        assert!(Symbol::parse("").is_none());
        assert!(Symbol::parse("WAY/TOO/LONG/TO/BE/A/TICKER").is_none());
        assert!(Symbol::parse("BTC-USDT").is_none());
    }
}
