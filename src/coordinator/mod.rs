//! Trade lifecycle coordination.
//!
//! One coordinator task owns each arbitrage pair end to end: venue setup,
//! paired entry, monitoring against the exit predicates, paired unwind,
//! and settlement. State transitions are announced to the shared registry
//! and flushed to the persisted snapshot.

mod monitor;
mod pnl;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::config::{CoordinatorConfig, TradingConfig};
use crate::domain::{
    ActiveTrade, CloseReason, Symbol, TradeOutcome, TradeState, VenueId,
};
use crate::error::ExchangeError;
use crate::exchange::{
    ExchangeClient, MarginMode, Order, OrderId, OrderRequest, OrderSide, PositionSide,
    VenueRegistry,
};
use crate::health::VenueHealth;
use crate::persist::StateStore;
use crate::stream::PriceStream;

pub use monitor::{evaluate as evaluate_exit, ExitDecision, TickSample};
pub use pnl::{settle, unrealized, Settlement};

/// Entry limit offsets for closing legs; widened multiplicatively on retry.
const CLOSE_LONG_OFFSET: Decimal = dec!(0.998);
const CLOSE_SHORT_OFFSET: Decimal = dec!(1.002);
const CLOSE_WIDEN_LONG: Decimal = dec!(0.99);
const CLOSE_WIDEN_SHORT: Decimal = dec!(1.01);
/// Price fallbacks when no quote is available at unwind time.
const FALLBACK_LONG: Decimal = dec!(0.99);
const FALLBACK_SHORT: Decimal = dec!(1.01);

pub struct TradeCoordinator {
    venues: Arc<VenueRegistry>,
    stream: Arc<PriceStream>,
    state: Arc<AppState>,
    health: Arc<VenueHealth>,
    store: Option<Arc<StateStore>>,
    trading: TradingConfig,
    timing: CoordinatorConfig,
}

impl TradeCoordinator {
    pub fn new(
        venues: Arc<VenueRegistry>,
        stream: Arc<PriceStream>,
        state: Arc<AppState>,
        health: Arc<VenueHealth>,
        store: Option<Arc<StateStore>>,
        trading: TradingConfig,
        timing: CoordinatorConfig,
    ) -> Self {
        Self {
            venues,
            stream,
            state,
            health,
            store,
            trading,
            timing,
        }
    }

    /// Drive one registered trade to a terminal state.
    ///
    /// Returns the outcome for closed trades, `None` for aborted ones.
    /// A trade that fails during unwind ends in `Error` and is surfaced
    /// for operator attention.
    pub async fn execute(
        &self,
        mut trade: ActiveTrade,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<TradeOutcome> {
        let long_fee = self.taker_fee(&trade.long_venue, &trade.long_native).await;
        let short_fee = self.taker_fee(&trade.short_venue, &trade.short_native).await;

        // --- Opening -----------------------------------------------------
        let opening_deadline = Duration::from_secs(self.timing.opening_deadline_secs);
        let opened = tokio::time::timeout(opening_deadline, self.open(&mut trade)).await;
        let opened = match opened {
            Ok(opened) => opened,
            Err(_) => {
                warn!(trade_id = %trade.id, "Opening deadline missed");
                self.cancel_stray_entries(&trade).await;
                false
            }
        };
        if !opened {
            trade.state = TradeState::Aborting;
            self.announce(&trade);
            info!(trade_id = %trade.id, symbol = %trade.symbol, "Trade aborted before open");
            return None;
        }

        trade.state = TradeState::Open;
        self.announce(&trade);
        self.state.note_trade_opened();
        info!(
            trade_id = %trade.id,
            symbol = %trade.symbol,
            long = %trade.long_venue,
            short = %trade.short_venue,
            qty = %trade.quantity,
            entry_spread = %trade.entry_spread,
            "Pair open"
        );

        // --- Open: monitoring loop --------------------------------------
        let decision = self
            .monitor_until_exit(&mut trade, &mut shutdown, long_fee, short_fee)
            .await;
        trade.close_reason = Some(decision.reason);
        trade.state = TradeState::Closing;
        self.announce(&trade);
        info!(trade_id = %trade.id, reason = %decision.reason, "Closing pair");

        // --- Closing + Settling -----------------------------------------
        let closing_deadline = Duration::from_secs(self.timing.closing_deadline_secs);
        let settled = tokio::time::timeout(
            closing_deadline,
            self.close_and_settle(&mut trade, &decision, long_fee, short_fee),
        )
        .await;

        match settled {
            Ok(Some(outcome)) => {
                trade.state = TradeState::Closed;
                self.announce(&trade);
                self.state.record_outcome(&outcome);
                self.flush();
                info!(
                    trade_id = %trade.id,
                    net = %outcome.net,
                    fees = %outcome.fees,
                    reason = %outcome.close_reason,
                    duration_secs = outcome.duration_secs,
                    "Pair closed"
                );
                Some(outcome)
            }
            Ok(None) => {
                trade.state = TradeState::Error;
                self.announce(&trade);
                error!(trade_id = %trade.id, "Unwind failed; operator attention required");
                None
            }
            Err(_) => {
                trade.state = TradeState::Error;
                self.announce(&trade);
                error!(trade_id = %trade.id, "Closing deadline missed; operator attention required");
                None
            }
        }
    }

    // --- Opening --------------------------------------------------------

    /// Configure both venues and submit both entry legs in parallel.
    async fn open(&self, trade: &mut ActiveTrade) -> bool {
        let Some(long_client) = self.venues.get(&trade.long_venue) else {
            return false;
        };
        let Some(short_client) = self.venues.get(&trade.short_venue) else {
            return false;
        };

        // Leverage and margin mode on both venues; "already set" is
        // success inside the adapters, anything else is fatal here.
        let leverage = self.trading.leverage;
        let (long_setup, short_setup) = tokio::join!(
            prepare_venue(long_client.as_ref(), &trade.long_native, leverage),
            prepare_venue(short_client.as_ref(), &trade.short_native, leverage),
        );
        if let Err(e) = long_setup {
            self.note_venue_error(&trade.long_venue, &e);
            warn!(trade_id = %trade.id, venue = %trade.long_venue, error = %e, "Venue setup failed");
            return false;
        }
        if let Err(e) = short_setup {
            self.note_venue_error(&trade.short_venue, &e);
            warn!(trade_id = %trade.id, venue = %trade.short_venue, error = %e, "Venue setup failed");
            return false;
        }

        let long_request = OrderRequest {
            native_symbol: trade.long_native.clone(),
            side: OrderSide::Buy,
            position: PositionSide::Long,
            quantity: trade.quantity,
            price: trade.entry_long,
            reduce_only: false,
        };
        let short_request = OrderRequest {
            native_symbol: trade.short_native.clone(),
            side: OrderSide::Sell,
            position: PositionSide::Short,
            quantity: trade.quantity,
            price: trade.entry_short,
            reduce_only: false,
        };

        let (long_result, short_result) = tokio::join!(
            self.place_with_retry(long_client.as_ref(), &long_request),
            self.place_with_retry(short_client.as_ref(), &short_request),
        );

        match (long_result, short_result) {
            (Ok(long_order), Ok(short_order)) => {
                trade.long_order = Some(long_order.id);
                trade.short_order = Some(short_order.id);
                true
            }
            (Ok(survivor), Err(e)) => {
                warn!(trade_id = %trade.id, venue = %trade.short_venue, error = %e, "Short leg failed; cancelling long");
                self.note_venue_error(&trade.short_venue, &e);
                self.cancel_with_retry(long_client.as_ref(), &trade.long_native, &survivor.id)
                    .await;
                false
            }
            (Err(e), Ok(survivor)) => {
                warn!(trade_id = %trade.id, venue = %trade.long_venue, error = %e, "Long leg failed; cancelling short");
                self.note_venue_error(&trade.long_venue, &e);
                self.cancel_with_retry(short_client.as_ref(), &trade.short_native, &survivor.id)
                    .await;
                false
            }
            (Err(long_err), Err(short_err)) => {
                warn!(
                    trade_id = %trade.id,
                    long_error = %long_err,
                    short_error = %short_err,
                    "Both entry legs failed"
                );
                self.note_venue_error(&trade.long_venue, &long_err);
                self.note_venue_error(&trade.short_venue, &short_err);
                false
            }
        }
    }

    /// Cancel any entry orders left behind by a timed-out opening phase.
    async fn cancel_stray_entries(&self, trade: &ActiveTrade) {
        if let (Some(client), Some(id)) = (self.venues.get(&trade.long_venue), &trade.long_order) {
            self.cancel_with_retry(client.as_ref(), &trade.long_native, id)
                .await;
        }
        if let (Some(client), Some(id)) = (self.venues.get(&trade.short_venue), &trade.short_order)
        {
            self.cancel_with_retry(client.as_ref(), &trade.short_native, id)
                .await;
        }
    }

    // --- Monitoring -----------------------------------------------------

    async fn monitor_until_exit(
        &self,
        trade: &mut ActiveTrade,
        shutdown: &mut watch::Receiver<bool>,
        long_fee: Decimal,
        short_fee: Decimal,
    ) -> ExitDecision {
        let started = Instant::now();
        let mut tick = tokio::time::interval(Duration::from_secs(self.timing.monitor_tick_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await; // consume the immediate first tick

        // Until both legs have shown up as positions, a missing position
        // is an unfilled entry, not a liquidation.
        let mut both_legs_seen = false;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return ExitDecision {
                            reason: CloseReason::Shutdown,
                            liquidated: None,
                        };
                    }
                }
                _ = tick.tick() => {
                    let mut sample = self.sample(trade, started.elapsed()).await;
                    if !both_legs_seen {
                        if sample.long_position_open == Some(true)
                            && sample.short_position_open == Some(true)
                        {
                            both_legs_seen = true;
                        } else {
                            sample.long_position_open = None;
                            sample.short_position_open = None;
                        }
                    }
                    if let Some(decision) =
                        monitor::evaluate(trade, &sample, &self.trading, long_fee, short_fee)
                    {
                        return decision;
                    }
                }
            }
        }
    }

    /// Gather fresh marks and position liveness for one tick.
    async fn sample(&self, trade: &ActiveTrade, elapsed: Duration) -> TickSample {
        let long_px = self
            .stream
            .fresh_quote(&trade.symbol, &trade.long_venue)
            .map(|q| q.price);
        let short_px = self
            .stream
            .fresh_quote(&trade.symbol, &trade.short_venue)
            .map(|q| q.price);

        let (long_open, short_open) = tokio::join!(
            self.position_open(&trade.long_venue, &trade.long_native, PositionSide::Long),
            self.position_open(&trade.short_venue, &trade.short_native, PositionSide::Short),
        );

        TickSample {
            long_px,
            short_px,
            long_position_open: long_open,
            short_position_open: short_open,
            elapsed,
        }
    }

    async fn position_open(
        &self,
        venue: &VenueId,
        native: &str,
        side: PositionSide,
    ) -> Option<bool> {
        let client = self.venues.get(venue)?;
        match client.fetch_positions(&[native.to_string()]).await {
            Ok(positions) => Some(positions.iter().any(|p| {
                p.native_symbol == native && p.side == side && p.quantity > Decimal::ZERO
            })),
            Err(e) => {
                // A failed query skips the liquidation predicate this tick.
                warn!(venue = %venue, error = %e, "Position query failed");
                None
            }
        }
    }

    // --- Closing + settling ---------------------------------------------

    async fn close_and_settle(
        &self,
        trade: &mut ActiveTrade,
        decision: &ExitDecision,
        long_fee: Decimal,
        short_fee: Decimal,
    ) -> Option<TradeOutcome> {
        let long_client = self.venues.get(&trade.long_venue)?;
        let short_client = self.venues.get(&trade.short_venue)?;

        let long_mark = self
            .current_price(&trade.symbol, &trade.long_venue)
            .unwrap_or(trade.entry_long * FALLBACK_LONG);
        let short_mark = self
            .current_price(&trade.symbol, &trade.short_venue)
            .unwrap_or(trade.entry_short * FALLBACK_SHORT);

        let close_long = decision.liquidated != Some(PositionSide::Long);
        let close_short = decision.liquidated != Some(PositionSide::Short);

        let mut long_close_order: Option<Order> = None;
        let mut short_close_order: Option<Order> = None;

        if close_long {
            long_close_order = self
                .place_closing_leg(
                    long_client.as_ref(),
                    trade,
                    OrderSide::Sell,
                    PositionSide::Long,
                    long_mark,
                )
                .await;
            long_close_order.as_ref()?;
        }
        if close_short {
            short_close_order = self
                .place_closing_leg(
                    short_client.as_ref(),
                    trade,
                    OrderSide::Buy,
                    PositionSide::Short,
                    short_mark,
                )
                .await;
            short_close_order.as_ref()?;
        }

        trade.long_order = long_close_order.as_ref().map(|o| o.id.clone());
        trade.short_order = short_close_order.as_ref().map(|o| o.id.clone());
        trade.state = TradeState::Settling;
        self.announce(trade);

        // Poll both closing orders to a terminal status. Partial fills
        // count as fills for unwinding; the residual is reported.
        let poll = Duration::from_millis(self.timing.settle_poll_ms);
        let mut residual = Decimal::ZERO;
        let mut exit_long = long_mark;
        let mut exit_short = short_mark;
        let mut estimated = decision.liquidated.is_some();

        if let Some(order) = long_close_order {
            let settled = self
                .await_terminal(long_client.as_ref(), &trade.long_native, &order.id, poll)
                .await?;
            residual += (trade.quantity - settled.filled_qty).max(Decimal::ZERO);
            exit_long = settled.settlement_price();
        } else {
            // Liquidated leg: prefer the venue's last mark, else the cached
            // quote already in `long_mark`; either way the P&L is estimated.
            estimated = true;
        }
        if let Some(order) = short_close_order {
            let settled = self
                .await_terminal(short_client.as_ref(), &trade.short_native, &order.id, poll)
                .await?;
            residual += (trade.quantity - settled.filled_qty).max(Decimal::ZERO);
            exit_short = settled.settlement_price();
        } else {
            estimated = true;
        }

        let settlement = pnl::settle(trade, exit_long, exit_short, long_fee, short_fee);
        let duration_secs = (Utc::now() - trade.opened_at).num_seconds();

        Some(TradeOutcome {
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            long_venue: trade.long_venue.clone(),
            short_venue: trade.short_venue.clone(),
            quantity: trade.quantity,
            entry_long: trade.entry_long,
            entry_short: trade.entry_short,
            exit_long,
            exit_short,
            gross_long: settlement.gross_long,
            gross_short: settlement.gross_short,
            fees: settlement.fees,
            net: settlement.net,
            close_reason: trade.close_reason.unwrap_or(CloseReason::Shutdown),
            duration_secs,
            residual_qty: residual,
            pnl_estimated: estimated,
        })
    }

    /// Place one closing leg, widening the limit offset on each attempt.
    async fn place_closing_leg(
        &self,
        client: &dyn ExchangeClient,
        trade: &ActiveTrade,
        side: OrderSide,
        position: PositionSide,
        mark: Decimal,
    ) -> Option<Order> {
        let native = match position {
            PositionSide::Long => &trade.long_native,
            PositionSide::Short => &trade.short_native,
        };
        let (mut offset, widen) = match side {
            OrderSide::Sell => (CLOSE_LONG_OFFSET, CLOSE_WIDEN_LONG),
            OrderSide::Buy => (CLOSE_SHORT_OFFSET, CLOSE_WIDEN_SHORT),
        };

        for attempt in 0..self.timing.close_retry_attempts {
            let request = OrderRequest {
                native_symbol: native.clone(),
                side,
                position,
                quantity: trade.quantity,
                price: mark * offset,
                reduce_only: true,
            };
            match client.create_limit_order(&request).await {
                Ok(order) => return Some(order),
                Err(e) => {
                    warn!(
                        trade_id = %trade.id,
                        venue = %client.venue(),
                        attempt = attempt + 1,
                        error = %e,
                        "Closing leg rejected; widening offset"
                    );
                    self.note_venue_error(client.venue(), &e);
                    offset *= widen;
                }
            }
        }
        None
    }

    async fn await_terminal(
        &self,
        client: &dyn ExchangeClient,
        native: &str,
        id: &OrderId,
        poll: Duration,
    ) -> Option<Order> {
        loop {
            match client.fetch_order(native, id).await {
                Ok(order) if order.status.is_terminal() => return Some(order),
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!(venue = %client.venue(), error = %e, "Order poll failed; retrying");
                }
                Err(e) => {
                    warn!(venue = %client.venue(), error = %e, "Order poll failed");
                    return None;
                }
            }
            tokio::time::sleep(poll).await;
        }
    }

    // --- shared helpers -------------------------------------------------

    async fn place_with_retry(
        &self,
        client: &dyn ExchangeClient,
        request: &OrderRequest,
    ) -> Result<Order, ExchangeError> {
        let attempts = self.timing.order_retry_attempts.max(1);
        let mut delay = Duration::from_millis(self.timing.order_retry_base_ms);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match client.create_limit_order(request).await {
                Ok(order) => return Ok(order),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        venue = %client.venue(),
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Order placement failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn cancel_with_retry(&self, client: &dyn ExchangeClient, native: &str, id: &OrderId) {
        let attempts = self.timing.order_retry_attempts.max(1);
        let mut delay = Duration::from_millis(self.timing.order_retry_base_ms);
        for attempt in 1..=attempts {
            match client.cancel_order(native, id).await {
                Ok(()) => return,
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(venue = %client.venue(), attempt, error = %e, "Cancel failed; backing off");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    error!(venue = %client.venue(), order = %id, error = %e, "Cancel failed");
                    return;
                }
            }
        }
    }

    fn current_price(&self, symbol: &Symbol, venue: &VenueId) -> Option<Decimal> {
        self.stream
            .fresh_quote(symbol, venue)
            .or_else(|| self.stream.quote(symbol, venue))
            .map(|q| q.price)
    }

    async fn taker_fee(&self, venue: &VenueId, native: &str) -> Decimal {
        match self.venues.get(venue) {
            Some(client) => client
                .market(native)
                .await
                .map(|m| m.taker_fee)
                .unwrap_or(self.trading.commission_rate),
            None => self.trading.commission_rate,
        }
    }

    fn note_venue_error(&self, venue: &VenueId, error: &ExchangeError) {
        if error.is_permanent() {
            self.health.disable(venue, error.to_string());
        } else if error.is_transient() {
            self.health.record_failure(venue, error.to_string());
        }
    }

    fn announce(&self, trade: &ActiveTrade) {
        self.state.update_trade(trade.into());
        self.flush();
    }

    fn flush(&self) {
        if let Some(store) = &self.store {
            store.flush_or_warn(&self.state);
        }
    }
}

/// Position mode, isolated margin, and leverage for one leg's venue.
async fn prepare_venue(
    client: &dyn ExchangeClient,
    native: &str,
    leverage: u32,
) -> Result<(), ExchangeError> {
    client.set_position_mode(true).await?;
    client.set_margin_mode(native, MarginMode::Isolated).await?;
    client.set_leverage(native, leverage).await?;
    Ok(())
}
