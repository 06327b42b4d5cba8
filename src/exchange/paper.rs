//! Simulated venue for dry runs and tests.
//!
//! Keeps the whole venue in memory: markets, a USDT balance pool, resting
//! orders, and hedge-mode positions. Failure injection hooks let tests
//! script transient errors, rejections, and liquidations without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::domain::{Market, Symbol, VenueId};
use crate::error::ExchangeError;

use super::{
    resolve_from_markets, Balance, ExchangeClient, MarginMode, Order, OrderId, OrderRequest,
    OrderStatus, Position, PositionSide, Tick, TickerStream,
};

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Shared in-memory venue state.
///
/// Clone the [`Arc`] into a [`PaperClient`] to trade against it and keep a
/// handle in the test to drive prices and inject failures.
pub struct PaperVenue {
    venue: VenueId,
    inner: Mutex<Inner>,
}

struct Inner {
    markets: HashMap<String, Market>,
    prices: HashMap<String, Decimal>,
    balance: Balance,
    orders: HashMap<String, Order>,
    positions: HashMap<(String, PositionSide), Position>,
    next_order_id: u64,
    /// When false, created orders rest as `Open` until filled explicitly.
    fill_immediately: bool,
    tick_interval: Duration,
    fail_orders: VecDeque<ExchangeError>,
    fail_balance: VecDeque<ExchangeError>,
    fail_watch: VecDeque<ExchangeError>,
    fail_resolve: VecDeque<ExchangeError>,
    leverage_calls: Vec<(String, u32)>,
}

impl PaperVenue {
    pub fn new(venue: impl AsRef<str>) -> Arc<Self> {
        Arc::new(Self {
            venue: VenueId::new(venue),
            inner: Mutex::new(Inner {
                markets: HashMap::new(),
                prices: HashMap::new(),
                balance: Balance::default(),
                orders: HashMap::new(),
                positions: HashMap::new(),
                next_order_id: 1,
                fill_immediately: true,
                tick_interval: DEFAULT_TICK_INTERVAL,
                fail_orders: VecDeque::new(),
                fail_balance: VecDeque::new(),
                fail_watch: VecDeque::new(),
                fail_resolve: VecDeque::new(),
                leverage_calls: Vec::new(),
            }),
        })
    }

    pub fn venue_id(&self) -> &VenueId {
        &self.venue
    }

    /// Register a market under the `{base}-USDT` spelling.
    pub fn add_market(
        &self,
        base: &str,
        min_qty: Decimal,
        lot_step: Decimal,
        taker_fee: Decimal,
    ) -> String {
        let symbol = Symbol::parse(base).expect("valid base ticker");
        let native = format!("{}-USDT", symbol.as_str());
        let market = Market {
            venue: self.venue.clone(),
            symbol,
            native_symbol: native.clone(),
            price_tick: Decimal::new(1, 6),
            lot_step,
            min_qty,
            min_notional: None,
            taker_fee,
        };
        self.inner.lock().markets.insert(native.clone(), market);
        native
    }

    pub fn set_price(&self, native_symbol: &str, price: Decimal) {
        self.inner
            .lock()
            .prices
            .insert(native_symbol.to_string(), price);
    }

    pub fn set_balance(&self, free: Decimal) {
        self.inner.lock().balance = Balance {
            free,
            used: Decimal::ZERO,
            total: free,
        };
    }

    /// Let created orders rest as `Open` instead of filling at once.
    pub fn hold_fills(&self) {
        self.inner.lock().fill_immediately = false;
    }

    /// Fill a resting order at its limit price.
    pub fn fill_order(&self, id: &OrderId) {
        let mut inner = self.inner.lock();
        if let Some(order) = inner.orders.get_mut(id.as_str()) {
            order.status = OrderStatus::Filled;
            order.filled_qty = order.quantity;
            order.average_price = Some(order.price);
        }
    }

    /// Next `create_limit_order` on this venue fails with `error`.
    pub fn inject_order_failure(&self, error: ExchangeError) {
        self.inner.lock().fail_orders.push_back(error);
    }

    /// Next `fetch_balance` fails with `error`.
    pub fn inject_balance_failure(&self, error: ExchangeError) {
        self.inner.lock().fail_balance.push_back(error);
    }

    /// Next `watch_ticker` call fails with `error`.
    pub fn inject_watch_failure(&self, error: ExchangeError) {
        self.inner.lock().fail_watch.push_back(error);
    }

    /// Next `resolve_symbol` call fails with `error`.
    pub fn inject_resolve_failure(&self, error: ExchangeError) {
        self.inner.lock().fail_resolve.push_back(error);
    }

    /// Remove a position as if the venue liquidated it.
    pub fn liquidate(&self, native_symbol: &str, side: PositionSide) {
        self.inner
            .lock()
            .positions
            .remove(&(native_symbol.to_string(), side));
    }

    /// Leverage values seen so far, for idempotence assertions.
    pub fn leverage_calls(&self) -> Vec<(String, u32)> {
        self.inner.lock().leverage_calls.clone()
    }

    pub fn open_order_count(&self) -> usize {
        self.inner
            .lock()
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .count()
    }

    pub fn order(&self, id: &OrderId) -> Option<Order> {
        self.inner.lock().orders.get(id.as_str()).cloned()
    }
}

/// [`ExchangeClient`] over a shared [`PaperVenue`].
pub struct PaperClient {
    venue: Arc<PaperVenue>,
}

impl PaperClient {
    pub fn new(venue: Arc<PaperVenue>) -> Self {
        Self { venue }
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    fn venue(&self) -> &VenueId {
        &self.venue.venue
    }

    async fn load_markets(&self) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn market(&self, native_symbol: &str) -> Result<Market, ExchangeError> {
        self.venue
            .inner
            .lock()
            .markets
            .get(native_symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::SymbolNotFound(native_symbol.to_string()))
    }

    async fn resolve_symbol(&self, base: &Symbol) -> Result<String, ExchangeError> {
        let mut inner = self.venue.inner.lock();
        if let Some(error) = inner.fail_resolve.pop_front() {
            return Err(error);
        }
        resolve_from_markets(base, &inner.markets)
            .ok_or_else(|| ExchangeError::SymbolNotFound(base.to_string()))
    }

    async fn server_time(&self) -> Result<DateTime<Utc>, ExchangeError> {
        Ok(Utc::now())
    }

    async fn watch_ticker(&self, native_symbol: &str) -> Result<TickerStream, ExchangeError> {
        let (interval, injected) = {
            let mut inner = self.venue.inner.lock();
            (inner.tick_interval, inner.fail_watch.pop_front())
        };
        if let Some(error) = injected {
            return Err(error);
        }

        let (tx, rx) = mpsc::channel(16);
        let venue = Arc::clone(&self.venue);
        let native = native_symbol.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let price = venue.inner.lock().prices.get(&native).copied();
                let Some(last) = price else { continue };
                if tx.send(Ok(Tick { last, ts: Utc::now() })).await.is_err() {
                    break;
                }
            }
        });
        Ok(TickerStream::new(rx))
    }

    async fn fetch_ticker(&self, native_symbol: &str) -> Result<Decimal, ExchangeError> {
        self.venue
            .inner
            .lock()
            .prices
            .get(native_symbol)
            .copied()
            .ok_or_else(|| ExchangeError::SymbolNotFound(native_symbol.to_string()))
    }

    async fn fetch_balance(&self) -> Result<Balance, ExchangeError> {
        let mut inner = self.venue.inner.lock();
        if let Some(error) = inner.fail_balance.pop_front() {
            return Err(error);
        }
        Ok(inner.balance)
    }

    async fn set_leverage(&self, native_symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.venue
            .inner
            .lock()
            .leverage_calls
            .push((native_symbol.to_string(), leverage));
        Ok(())
    }

    async fn set_margin_mode(
        &self,
        _native_symbol: &str,
        _mode: MarginMode,
    ) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn set_position_mode(&self, _hedged: bool) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn create_limit_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError> {
        let mut inner = self.venue.inner.lock();
        if let Some(error) = inner.fail_orders.pop_front() {
            return Err(error);
        }
        if !inner.markets.contains_key(&request.native_symbol) {
            return Err(ExchangeError::SymbolNotFound(request.native_symbol.clone()));
        }

        let id = inner.next_order_id;
        inner.next_order_id += 1;
        let fill = inner.fill_immediately;

        let order = Order {
            id: OrderId::new(id.to_string()),
            native_symbol: request.native_symbol.clone(),
            side: request.side,
            price: request.price,
            quantity: request.quantity,
            status: if fill { OrderStatus::Filled } else { OrderStatus::Open },
            filled_qty: if fill { request.quantity } else { Decimal::ZERO },
            average_price: fill.then_some(request.price),
        };

        let key = (request.native_symbol.clone(), request.position);
        if fill {
            if request.reduce_only {
                if let Some(position) = inner.positions.get_mut(&key) {
                    position.quantity -= request.quantity;
                    if position.quantity <= Decimal::ZERO {
                        inner.positions.remove(&key);
                    }
                }
            } else {
                inner.positions.insert(
                    key,
                    Position {
                        native_symbol: request.native_symbol.clone(),
                        side: request.position,
                        quantity: request.quantity,
                        entry_price: request.price,
                        mark_price: Some(request.price),
                    },
                );
            }
        }

        inner.orders.insert(order.id.as_str().to_string(), order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, _native_symbol: &str, id: &OrderId) -> Result<(), ExchangeError> {
        let mut inner = self.venue.inner.lock();
        match inner.orders.get_mut(id.as_str()) {
            Some(order) if !order.status.is_terminal() => {
                order.status = OrderStatus::Cancelled;
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(ExchangeError::OrderNotFound(id.to_string())),
        }
    }

    async fn fetch_order(&self, _native_symbol: &str, id: &OrderId) -> Result<Order, ExchangeError> {
        self.venue
            .inner
            .lock()
            .orders
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| ExchangeError::OrderNotFound(id.to_string()))
    }

    async fn fetch_positions(
        &self,
        native_symbols: &[String],
    ) -> Result<Vec<Position>, ExchangeError> {
        let inner = self.venue.inner.lock();
        Ok(inner
            .positions
            .values()
            .filter(|p| native_symbols.contains(&p.native_symbol))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::OrderSide;
    use rust_decimal_macros::dec;

    fn request(native: &str, side: OrderSide, position: PositionSide) -> OrderRequest {
        OrderRequest {
            native_symbol: native.to_string(),
            side,
            position,
            quantity: dec!(2),
            price: dec!(1.0),
            reduce_only: false,
        }
    }

    #[tokio::test]
    async fn order_fills_and_opens_position() {
        let venue = PaperVenue::new("alpha");
        let native = venue.add_market("FOO", dec!(1), dec!(1), dec!(0.0006));
        let client = PaperClient::new(Arc::clone(&venue));

        let order = client
            .create_limit_order(&request(&native, OrderSide::Buy, PositionSide::Long))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);

        let positions = client.fetch_positions(&[native]).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(2));
    }

    #[tokio::test]
    async fn reduce_only_closes_position() {
        let venue = PaperVenue::new("alpha");
        let native = venue.add_market("FOO", dec!(1), dec!(1), dec!(0.0006));
        let client = PaperClient::new(Arc::clone(&venue));

        client
            .create_limit_order(&request(&native, OrderSide::Buy, PositionSide::Long))
            .await
            .unwrap();
        let mut close = request(&native, OrderSide::Sell, PositionSide::Long);
        close.reduce_only = true;
        client.create_limit_order(&close).await.unwrap();

        let positions = client.fetch_positions(&[native]).await.unwrap();
        assert!(positions.is_empty());
    }

    #[tokio::test]
    async fn injected_order_failure_is_returned_once() {
        let venue = PaperVenue::new("alpha");
        let native = venue.add_market("FOO", dec!(1), dec!(1), dec!(0.0006));
        let client = PaperClient::new(Arc::clone(&venue));
        venue.inject_order_failure(ExchangeError::InsufficientFunds("margin".into()));

        let first = client
            .create_limit_order(&request(&native, OrderSide::Buy, PositionSide::Long))
            .await;
        assert!(matches!(first, Err(ExchangeError::InsufficientFunds(_))));

        let second = client
            .create_limit_order(&request(&native, OrderSide::Buy, PositionSide::Long))
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn resolve_symbol_uses_market_map() {
        let venue = PaperVenue::new("alpha");
        venue.add_market("FOO", dec!(1), dec!(1), dec!(0.0006));
        let client = PaperClient::new(venue);

        let native = client
            .resolve_symbol(&Symbol::parse("FOO").unwrap())
            .await
            .unwrap();
        assert_eq!(native, "FOO-USDT");
    }

    #[tokio::test]
    async fn watch_ticker_streams_current_price() {
        let venue = PaperVenue::new("alpha");
        let native = venue.add_market("FOO", dec!(1), dec!(1), dec!(0.0006));
        venue.set_price(&native, dec!(1.25));
        let client = PaperClient::new(Arc::clone(&venue));

        let mut stream = client.watch_ticker(&native).await.unwrap();
        let tick = stream.next().await.unwrap().unwrap();
        assert_eq!(tick.last, dec!(1.25));
    }
}
