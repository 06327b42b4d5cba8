//! Venue adapter contract and shared order types.
//!
//! Every venue-specific quirk (position-mode parameters, hedge-side flags,
//! balance pool shapes, symbol spellings) stays behind [`ExchangeClient`].
//! Adapters classify failures truthfully and never retry; retry policy
//! belongs to the caller.

mod bybit;
mod clock;
mod paper;
mod registry;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::{Market, Symbol, VenueId};
use crate::error::ExchangeError;

pub use bybit::{BybitClient, BybitParams};
pub use clock::{estimate_clock_offset, ClockOffset};
pub use paper::{PaperClient, PaperVenue};
pub use registry::VenueRegistry;

/// Unique identifier for an order on a venue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Which side of a hedged position an order affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

/// Margin mode for a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginMode {
    Isolated,
    Cross,
}

/// Order lifecycle as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Limit order to be placed on a venue.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub native_symbol: String,
    pub side: OrderSide,
    /// Hedge-mode position the order opens or reduces.
    pub position: PositionSide,
    pub quantity: Decimal,
    pub price: Decimal,
    /// True for closing legs; the adapter maps this to the venue's
    /// reduce-only flag.
    pub reduce_only: bool,
}

/// Order as known to the venue.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub native_symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    /// Average fill price, once anything filled.
    pub average_price: Option<Decimal>,
}

impl Order {
    /// Effective exit price for settlement: average fill when available,
    /// otherwise the limit price.
    pub fn settlement_price(&self) -> Decimal {
        self.average_price.unwrap_or(self.price)
    }
}

/// USDT balance pool on one venue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Balance {
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}

/// Open position on one venue.
#[derive(Debug, Clone)]
pub struct Position {
    pub native_symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Option<Decimal>,
}

/// One live ticker update.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub last: Decimal,
    pub ts: DateTime<Utc>,
}

/// Stream of ticker updates for a single contract.
///
/// Backed by a channel fed by the adapter's socket task; the stream ends
/// when the adapter drops the sender (disconnect), and each item may carry
/// a classified error instead of a tick.
pub struct TickerStream {
    rx: mpsc::Receiver<Result<Tick, ExchangeError>>,
}

impl TickerStream {
    pub fn new(rx: mpsc::Receiver<Result<Tick, ExchangeError>>) -> Self {
        Self { rx }
    }

    /// Next tick, `None` when the stream has ended.
    pub async fn next(&mut self) -> Option<Result<Tick, ExchangeError>> {
        self.rx.recv().await
    }
}

/// Uniform venue adapter contract.
///
/// All operations are safe for concurrent invocation; adapters synchronize
/// internally.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn venue(&self) -> &VenueId;

    /// Populate the market metadata map. Called at startup and on refresh.
    async fn load_markets(&self) -> Result<(), ExchangeError>;

    /// Metadata for a native contract.
    async fn market(&self, native_symbol: &str) -> Result<Market, ExchangeError>;

    /// Find the venue's spelling for a base ticker, preferring perpetual
    /// USDT-settled contracts.
    async fn resolve_symbol(&self, base: &Symbol) -> Result<String, ExchangeError>;

    /// Venue server time, for clock-offset estimation.
    async fn server_time(&self) -> Result<DateTime<Utc>, ExchangeError>;

    /// Apply an externally estimated clock offset to request signing.
    /// Venues without signed requests ignore it.
    fn set_clock_offset(&self, _offset_ms: i64) {}

    /// Single-contract live ticker stream. The caller supervises
    /// reconnection.
    async fn watch_ticker(&self, native_symbol: &str) -> Result<TickerStream, ExchangeError>;

    /// One-shot REST price snapshot.
    async fn fetch_ticker(&self, native_symbol: &str) -> Result<Decimal, ExchangeError>;

    /// USDT balance. Venues whose response carries no USDT pool report
    /// zero free balance rather than fabricating one.
    async fn fetch_balance(&self) -> Result<Balance, ExchangeError>;

    /// Idempotent: "not modified" responses are success.
    async fn set_leverage(&self, native_symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    /// Idempotent: "not modified" responses are success.
    async fn set_margin_mode(
        &self,
        native_symbol: &str,
        mode: MarginMode,
    ) -> Result<(), ExchangeError>;

    /// Idempotent: "not modified" responses are success.
    async fn set_position_mode(&self, hedged: bool) -> Result<(), ExchangeError>;

    async fn create_limit_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError>;

    async fn cancel_order(&self, native_symbol: &str, id: &OrderId) -> Result<(), ExchangeError>;

    async fn fetch_order(&self, native_symbol: &str, id: &OrderId) -> Result<Order, ExchangeError>;

    async fn fetch_positions(
        &self,
        native_symbols: &[String],
    ) -> Result<Vec<Position>, ExchangeError>;
}

/// Ordered native-spelling candidates for a base ticker.
///
/// Adapters probe these against their loaded market map; the order prefers
/// perpetual USDT-settled contracts.
pub fn symbol_variants(base: &Symbol) -> [String; 5] {
    let b = base.as_str();
    [
        format!("{b}/USDT:USDT"),
        format!("{b}/USDT"),
        format!("{b}-USDT"),
        format!("{b}_USDT"),
        format!("{b}USDT"),
    ]
}

/// Resolve a base ticker against a loaded market map by trying each
/// variant in order.
pub fn resolve_from_markets(
    base: &Symbol,
    markets: &HashMap<String, Market>,
) -> Option<String> {
    symbol_variants(base)
        .into_iter()
        .find(|candidate| markets.contains_key(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market(venue: &str, base: &str, native: &str) -> Market {
        Market {
            venue: VenueId::new(venue),
            symbol: Symbol::parse(base).unwrap(),
            native_symbol: native.to_string(),
            price_tick: dec!(0.0001),
            lot_step: dec!(1),
            min_qty: dec!(1),
            min_notional: None,
            taker_fee: dec!(0.0006),
        }
    }

    #[test]
    fn resolve_prefers_perp_spelling() {
        let mut markets = HashMap::new();
        markets.insert("FOO/USDT".to_string(), market("a", "FOO", "FOO/USDT"));
        markets.insert(
            "FOO/USDT:USDT".to_string(),
            market("a", "FOO", "FOO/USDT:USDT"),
        );

        let resolved = resolve_from_markets(&Symbol::parse("FOO").unwrap(), &markets);
        assert_eq!(resolved.as_deref(), Some("FOO/USDT:USDT"));
    }

    #[test]
    fn resolve_falls_through_variants() {
        let mut markets = HashMap::new();
        markets.insert("BARUSDT".to_string(), market("a", "BAR", "BARUSDT"));

        let resolved = resolve_from_markets(&Symbol::parse("BAR").unwrap(), &markets);
        assert_eq!(resolved.as_deref(), Some("BARUSDT"));
        assert!(resolve_from_markets(&Symbol::parse("MISSING").unwrap(), &markets).is_none());
    }

    #[test]
    fn settlement_price_prefers_average() {
        let order = Order {
            id: OrderId::new("1"),
            native_symbol: "FOOUSDT".into(),
            side: OrderSide::Buy,
            price: dec!(1.00),
            quantity: dec!(2),
            status: OrderStatus::Filled,
            filled_qty: dec!(2),
            average_price: Some(dec!(0.999)),
        };
        assert_eq!(order.settlement_price(), dec!(0.999));
    }
}
