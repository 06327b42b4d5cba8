//! A fully wired paper-venue world for integration tests.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::app::AppState;
use crate::config::{CoordinatorConfig, StreamConfig, TradingConfig};
use crate::coordinator::TradeCoordinator;
use crate::domain::VenueId;
use crate::exchange::{Balance, ExchangeClient, PaperClient, PaperVenue, VenueRegistry};
use crate::filter::OpportunityFilter;
use crate::health::VenueHealth;
use crate::signal::SignalRouter;
use crate::stream::PriceStream;

/// Two paper venues (`alpha`, `beta`) wired through the real subsystems.
pub struct TestWorld {
    pub alpha: Arc<PaperVenue>,
    pub beta: Arc<PaperVenue>,
    pub venues: Arc<VenueRegistry>,
    pub state: Arc<AppState>,
    pub health: Arc<VenueHealth>,
    pub stream: Arc<PriceStream>,
    pub router: SignalRouter,
    pub filter: OpportunityFilter,
    pub coordinator: Arc<TradeCoordinator>,
    pub trading: TradingConfig,
}

impl TestWorld {
    pub fn new(trading: TradingConfig, timing: CoordinatorConfig) -> Self {
        let alpha = PaperVenue::new("alpha");
        let beta = PaperVenue::new("beta");
        let clients: Vec<Arc<dyn ExchangeClient>> = vec![
            Arc::new(PaperClient::new(Arc::clone(&alpha))),
            Arc::new(PaperClient::new(Arc::clone(&beta))),
        ];
        let venues = Arc::new(VenueRegistry::new(clients));
        let state = Arc::new(AppState::new());
        let health = Arc::new(VenueHealth::new(5));
        let stream_config = StreamConfig {
            backoff_initial_ms: 10,
            backoff_max_ms: 80,
            acquire_timeout_secs: 2,
            ..StreamConfig::default()
        };
        let stream = Arc::new(PriceStream::new(
            Arc::clone(&venues),
            Arc::clone(&health),
            stream_config.clone(),
        ));
        let router = SignalRouter::new(&Default::default());
        let filter = OpportunityFilter::new(
            Arc::clone(&venues),
            Arc::clone(&stream),
            Arc::clone(&health),
            Arc::clone(&state),
            trading.clone(),
            &stream_config,
        );
        let coordinator = Arc::new(TradeCoordinator::new(
            Arc::clone(&venues),
            Arc::clone(&stream),
            Arc::clone(&state),
            Arc::clone(&health),
            None,
            trading.clone(),
            timing,
        ));

        Self {
            alpha,
            beta,
            venues,
            state,
            health,
            stream,
            router,
            filter,
            coordinator,
            trading,
        }
    }

    /// Scenario defaults: MinSpread 3 %, notional cap $3, leverage 3,
    /// 0.06 bp taker on both venues, fast lifecycle timings.
    pub fn fast() -> Self {
        let trading = TradingConfig {
            min_spread: dec!(3.0),
            max_allowed_spread: dec!(30.0),
            close_spread: dec!(0.5),
            leverage: 3,
            max_concurrent_trades: 1,
            max_single_trade_notional: dec!(3.0),
            max_daily_loss: dec!(50.0),
            max_hold_time_secs: 60,
            commission_rate: dec!(0.0006),
            ..TradingConfig::default()
        };
        let timing = CoordinatorConfig {
            monitor_tick_secs: 1,
            opening_deadline_secs: 10,
            closing_deadline_secs: 15,
            settle_poll_ms: 50,
            order_retry_base_ms: 20,
            ..CoordinatorConfig::default()
        };
        Self::new(trading, timing)
    }

    /// Register `symbol` on both venues with min-qty 2 and list the given
    /// prices; balances default to $10 free on each venue.
    pub fn seed_market(&self, symbol: &str, alpha_price: Decimal, beta_price: Decimal) {
        let a = self.alpha.add_market(symbol, dec!(2), dec!(1), self.trading.commission_rate);
        let b = self.beta.add_market(symbol, dec!(2), dec!(1), self.trading.commission_rate);
        self.alpha.set_price(&a, alpha_price);
        self.beta.set_price(&b, beta_price);
        self.seed_balances(dec!(10));
    }

    pub fn seed_balances(&self, free: Decimal) {
        self.alpha.set_balance(free);
        self.beta.set_balance(free);
        self.state.set_balance(VenueId::new("alpha"), Balance {
            free,
            used: Decimal::ZERO,
            total: free,
        });
        self.state.set_balance(VenueId::new("beta"), Balance {
            free,
            used: Decimal::ZERO,
            total: free,
        });
    }

    /// Move both venue prices, which the watchers and REST fallback see.
    pub fn move_prices(&self, symbol: &str, alpha_price: Decimal, beta_price: Decimal) {
        self.alpha
            .set_price(&format!("{}-USDT", symbol.to_uppercase()), alpha_price);
        self.beta
            .set_price(&format!("{}-USDT", symbol.to_uppercase()), beta_price);
    }
}
