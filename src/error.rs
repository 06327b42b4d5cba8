//! Error types shared across the crate.
//!
//! Venue adapters classify failures truthfully and recover nothing; retry
//! policy lives with the caller.

use thiserror::Error;

use crate::domain::VenueId;

/// Failure reported by a venue adapter.
///
/// Split by recovery policy: transient errors may be retried by the caller,
/// permanent errors disable the venue, market-state errors reject the
/// operation that triggered them.
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("leverage rejected: {0}")]
    LeverageRejected(String),

    #[error("unexpected venue response: {0}")]
    Protocol(String),
}

impl ExchangeError {
    /// True when a bounded retry at the call site is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Network(_) | ExchangeError::Timeout(_) | ExchangeError::RateLimited(_)
        )
    }

    /// True when the venue itself should be disabled rather than retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ExchangeError::Auth(_) | ExchangeError::BadRequest(_))
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Labelled admission rejection emitted by the opportunity filter.
///
/// Checks run in a fixed order; the first failure short-circuits with its
/// label, which is recorded and reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Blacklisted,
    AlreadyTrading,
    MaxTradesReached,
    DailyLossLimit,
    VenueDisabled(VenueId),
    SpreadTooLow,
    SpreadTooHigh,
    QuoteMissing(VenueId),
    LiveSpreadBelowMin,
    MarketMissing(VenueId),
    NotionalCap,
    InsufficientMargin(VenueId),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Blacklisted => write!(f, "Blacklisted"),
            RejectReason::AlreadyTrading => write!(f, "AlreadyTrading"),
            RejectReason::MaxTradesReached => write!(f, "MaxTradesReached"),
            RejectReason::DailyLossLimit => write!(f, "DailyLossLimit"),
            RejectReason::VenueDisabled(v) => write!(f, "VenueDisabled({v})"),
            RejectReason::SpreadTooLow => write!(f, "SpreadTooLow"),
            RejectReason::SpreadTooHigh => write!(f, "SpreadTooHigh"),
            RejectReason::QuoteMissing(v) => write!(f, "QuoteMissing({v})"),
            RejectReason::LiveSpreadBelowMin => write!(f, "LiveSpreadBelowMin"),
            RejectReason::MarketMissing(v) => write!(f, "MarketMissing({v})"),
            RejectReason::NotionalCap => write!(f, "NotionalCap"),
            RejectReason::InsufficientMargin(v) => write!(f, "InsufficientMargin({v})"),
        }
    }
}

/// Top-level error for the supervisor and binary entry point.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("no venue reachable at boot")]
    AllVenuesUnreachable,

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("shutdown requested")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ExchangeError::Network("reset".into()).is_transient());
        assert!(ExchangeError::Timeout(10).is_transient());
        assert!(!ExchangeError::Auth("bad key".into()).is_transient());
        assert!(ExchangeError::Auth("bad key".into()).is_permanent());
        assert!(!ExchangeError::InsufficientFunds("margin".into()).is_transient());
    }

    #[test]
    fn reject_reason_labels() {
        assert_eq!(RejectReason::SpreadTooLow.to_string(), "SpreadTooLow");
        assert_eq!(RejectReason::NotionalCap.to_string(), "NotionalCap");
        assert_eq!(
            RejectReason::QuoteMissing(VenueId::new("mexc")).to_string(),
            "QuoteMissing(mexc)"
        );
    }
}
