//! Opportunity admission.
//!
//! Converts a signal event into a trade request or a labelled rejection.
//! Checks run in a fixed order and the first failure short-circuits; cheap
//! checks that need no venue I/O go first.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::config::{StreamConfig, TradingConfig};
use crate::domain::{ceil_to_step, floor_to_step, Market, SignalEvent, Symbol, TradeRequest, VenueId};
use crate::error::RejectReason;
use crate::exchange::{ExchangeClient, VenueRegistry};
use crate::health::VenueHealth;
use crate::stream::PriceStream;

/// Spread percentage between a low and a high price.
pub fn spread_percent(low: Decimal, high: Decimal) -> Decimal {
    if low <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (high - low) / low * Decimal::ONE_HUNDRED
}

pub struct OpportunityFilter {
    venues: Arc<VenueRegistry>,
    stream: Arc<PriceStream>,
    health: Arc<VenueHealth>,
    state: Arc<AppState>,
    trading: TradingConfig,
    acquire_timeout: Duration,
}

impl OpportunityFilter {
    pub fn new(
        venues: Arc<VenueRegistry>,
        stream: Arc<PriceStream>,
        health: Arc<VenueHealth>,
        state: Arc<AppState>,
        trading: TradingConfig,
        stream_config: &StreamConfig,
    ) -> Self {
        Self {
            venues,
            stream,
            health,
            state,
            trading,
            acquire_timeout: Duration::from_secs(stream_config.acquire_timeout_secs),
        }
    }

    /// Run every admission check; emit a request or the first failure.
    pub async fn evaluate(&self, signal: &SignalEvent) -> Result<TradeRequest, RejectReason> {
        let result = self.evaluate_inner(signal).await;
        match &result {
            Ok(request) => info!(
                symbol = %request.symbol,
                long = %request.long_venue,
                short = %request.short_venue,
                qty = %request.quantity,
                notional = %request.notional,
                live_spread = %request.live_spread,
                "Signal admitted"
            ),
            Err(reason) => {
                warn!(symbol = %signal.symbol, reason = %reason, "Signal rejected");
            }
        }
        result
    }

    async fn evaluate_inner(&self, signal: &SignalEvent) -> Result<TradeRequest, RejectReason> {
        let symbol = &signal.symbol;

        // 1. Blacklist.
        if self.trading.symbol_blacklist.contains(symbol.as_str()) {
            return Err(RejectReason::Blacklisted);
        }

        // An active pair on the same symbol would double exposure.
        if self.state.is_symbol_active(symbol) {
            return Err(RejectReason::AlreadyTrading);
        }

        // 2. Concurrency cap (checked again atomically at registration).
        if self.state.active_count() >= self.trading.max_concurrent_trades {
            return Err(RejectReason::MaxTradesReached);
        }

        // 3. Daily loss floor.
        if self.state.daily_pnl() <= -self.trading.max_daily_loss {
            return Err(RejectReason::DailyLossLimit);
        }

        // 4. Both implicated venues must be usable.
        let (venue_a, venue_b) = two_venues(signal)?;
        for venue in [&venue_a, &venue_b] {
            if !self.venues.contains(venue) || self.health.is_disabled(venue) {
                return Err(RejectReason::VenueDisabled((*venue).clone()));
            }
        }

        // 5. Reported spread sanity band.
        if signal.spread < self.trading.min_spread {
            return Err(RejectReason::SpreadTooLow);
        }
        if signal.spread > self.trading.max_allowed_spread {
            return Err(RejectReason::SpreadTooHigh);
        }

        // 6. Fresh quotes on both sides.
        let quote_a = self
            .stream
            .quote_blocking(symbol, &venue_a, self.acquire_timeout)
            .await
            .ok_or_else(|| RejectReason::QuoteMissing(venue_a.clone()))?;
        let quote_b = self
            .stream
            .quote_blocking(symbol, &venue_b, self.acquire_timeout)
            .await
            .ok_or_else(|| RejectReason::QuoteMissing(venue_b.clone()))?;

        // 7. Recompute the spread from live prices; the long side is
        // whichever venue is cheaper right now.
        let (long_venue, long_price, short_venue, short_price) = if quote_a.price <= quote_b.price {
            (venue_a, quote_a.price, venue_b, quote_b.price)
        } else {
            (venue_b, quote_b.price, venue_a, quote_a.price)
        };
        let live_spread = spread_percent(long_price, short_price);
        if live_spread < self.trading.min_spread {
            debug!(
                symbol = %symbol,
                reported = %signal.spread,
                live = %live_spread,
                "Live spread collapsed below minimum"
            );
            return Err(RejectReason::LiveSpreadBelowMin);
        }

        // 8. Market metadata, quantity, and per-leg notional caps.
        let (long_native, long_market) = self.market_for(symbol, &long_venue).await?;
        let (short_native, short_market) = self.market_for(symbol, &short_venue).await?;
        let quantity = self.sized_quantity(symbol, &long_market, &short_market, long_price);
        if quantity <= Decimal::ZERO {
            return Err(RejectReason::NotionalCap);
        }
        let long_notional = quantity * long_price;
        let short_notional = quantity * short_price;
        if long_notional > self.trading.max_single_trade_notional
            || short_notional > self.trading.max_single_trade_notional
        {
            return Err(RejectReason::NotionalCap);
        }

        // 9. Margin availability on both venues.
        let leverage = Decimal::from(self.trading.leverage);
        for (venue, notional) in [(&long_venue, long_notional), (&short_venue, short_notional)] {
            let free = self
                .state
                .balance(venue)
                .map(|b| b.free)
                .unwrap_or(Decimal::ZERO);
            let available = free * self.trading.margin_safety_factor;
            if available < notional / leverage {
                return Err(RejectReason::InsufficientMargin((*venue).clone()));
            }
        }

        Ok(TradeRequest {
            symbol: symbol.clone(),
            long_venue,
            short_venue,
            long_native,
            short_native,
            long_price,
            short_price,
            quantity,
            notional: long_notional,
            reported_spread: signal.spread,
            live_spread,
        })
    }

    async fn market_for(
        &self,
        symbol: &Symbol,
        venue: &VenueId,
    ) -> Result<(String, Market), RejectReason> {
        let client = self
            .venues
            .get(venue)
            .ok_or_else(|| RejectReason::VenueDisabled(venue.clone()))?;
        let native = client
            .resolve_symbol(symbol)
            .await
            .map_err(|_| RejectReason::MarketMissing(venue.clone()))?;
        let market = client
            .market(&native)
            .await
            .map_err(|_| RejectReason::MarketMissing(venue.clone()))?;
        Ok((native, market))
    }

    /// Identical quantity for both legs.
    ///
    /// With reported minimums: the larger of the two, rounded up to the
    /// coarser lot step. A venue minimum cannot be traded below, so the
    /// risky multiplier does not apply to min-sized trades. Without
    /// minimums: sized to the per-leg notional cap scaled by the risky
    /// multiplier, rounded down so the cap holds.
    fn sized_quantity(
        &self,
        symbol: &Symbol,
        long: &Market,
        short: &Market,
        long_price: Decimal,
    ) -> Decimal {
        let coarse_step = long.lot_step.max(short.lot_step);
        let min_qty = long.min_qty.max(short.min_qty);

        if min_qty > Decimal::ZERO {
            ceil_to_step(min_qty, coarse_step)
        } else if long_price > Decimal::ZERO {
            let multiplier = self.trading.risk_multiplier(symbol.as_str());
            let budget = self.trading.max_single_trade_notional / long_price;
            floor_to_step(budget * multiplier, coarse_step)
        } else {
            Decimal::ZERO
        }
    }
}

/// The two distinct venues named by the signal.
///
/// The router guarantees two distinct venues; degenerate events fall out
/// here as a collapsed spread.
fn two_venues(signal: &SignalEvent) -> Result<(VenueId, VenueId), RejectReason> {
    let (cheap, _) = signal
        .cheapest_venue()
        .ok_or(RejectReason::LiveSpreadBelowMin)?;
    let (rich, _) = signal
        .richest_venue()
        .ok_or(RejectReason::LiveSpreadBelowMin)?;
    if cheap == rich {
        return Err(RejectReason::LiveSpreadBelowMin);
    }
    Ok((cheap.clone(), rich.clone()))
}
