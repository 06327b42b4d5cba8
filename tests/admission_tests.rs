//! Admission boundary behavior against paper venues.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use spreadhound::config::TradingConfig;
use spreadhound::domain::VenueId;
use spreadhound::error::RejectReason;
use spreadhound::signal::parse;
use spreadhound::testkit::{signal_message, TestWorld};

fn signal(symbol: &str, spread: Decimal, alpha: Decimal, beta: Decimal) -> spreadhound::domain::SignalEvent {
    parse(&signal_message(symbol, spread, "alpha", alpha, "beta", beta)).unwrap()
}

#[tokio::test]
async fn spread_exactly_min_is_admitted() {
    let world = TestWorld::fast();
    world.seed_market("FOO", dec!(1.00), dec!(1.03));

    let event = signal("FOO", dec!(3.0), dec!(1.00), dec!(1.03));
    let request = world.filter.evaluate(&event).await.unwrap();
    assert_eq!(request.long_venue, VenueId::new("alpha"));
    assert_eq!(request.short_venue, VenueId::new("beta"));
    assert_eq!(request.quantity, dec!(2));
}

#[tokio::test]
async fn spread_below_min_is_rejected() {
    let world = TestWorld::fast();
    world.seed_market("FOO", dec!(1.00), dec!(1.03));

    let event = signal("FOO", dec!(2.99), dec!(1.00), dec!(1.03));
    assert_eq!(
        world.filter.evaluate(&event).await.unwrap_err(),
        RejectReason::SpreadTooLow
    );
}

#[tokio::test]
async fn implausible_spread_is_rejected() {
    let world = TestWorld::fast();
    world.seed_market("FOO", dec!(1.00), dec!(1.40));

    let event = signal("FOO", dec!(40.0), dec!(1.00), dec!(1.40));
    assert_eq!(
        world.filter.evaluate(&event).await.unwrap_err(),
        RejectReason::SpreadTooHigh
    );
}

#[tokio::test]
async fn notional_exactly_at_cap_is_admitted() {
    let world = TestWorld::fast();
    // qty 2; short leg 2 x 1.50 = $3.00, exactly the cap.
    world.seed_market("FOO", dec!(1.40), dec!(1.50));

    let event = signal("FOO", dec!(7.0), dec!(1.40), dec!(1.50));
    let request = world.filter.evaluate(&event).await.unwrap();
    assert_eq!(request.quantity * request.short_price, dec!(3.00));
}

#[tokio::test]
async fn notional_above_cap_is_rejected() {
    let world = TestWorld::fast();
    // qty 2; short leg 2 x 1.502 = $3.004 breaches the $3 cap.
    world.seed_market("FOO", dec!(1.40), dec!(1.502));

    let event = signal("FOO", dec!(7.0), dec!(1.40), dec!(1.502));
    assert_eq!(
        world.filter.evaluate(&event).await.unwrap_err(),
        RejectReason::NotionalCap
    );
    assert_eq!(world.alpha.open_order_count(), 0);
    assert_eq!(world.beta.open_order_count(), 0);
}

#[tokio::test]
async fn min_quantity_breaching_cap_is_rejected() {
    let world = TestWorld::fast();
    // Both venues require 10 contracts at $1: $10 notional against a $3 cap.
    let a = world.alpha.add_market("BIG", dec!(10), dec!(1), dec!(0.0006));
    let b = world.beta.add_market("BIG", dec!(10), dec!(1), dec!(0.0006));
    world.alpha.set_price(&a, dec!(1.00));
    world.beta.set_price(&b, dec!(1.05));
    world.seed_balances(dec!(10));

    let event = signal("BIG", dec!(5.0), dec!(1.00), dec!(1.05));
    assert_eq!(
        world.filter.evaluate(&event).await.unwrap_err(),
        RejectReason::NotionalCap
    );
}

#[tokio::test]
async fn missing_quote_on_one_venue_is_rejected() {
    let world = TestWorld::fast();
    // Only alpha lists the symbol; beta has no market and no quotes.
    let a = world.alpha.add_market("ORPHAN", dec!(2), dec!(1), dec!(0.0006));
    world.alpha.set_price(&a, dec!(1.00));
    world.seed_balances(dec!(10));

    let event = signal("ORPHAN", dec!(5.0), dec!(1.00), dec!(1.05));
    assert_eq!(
        world.filter.evaluate(&event).await.unwrap_err(),
        RejectReason::QuoteMissing(VenueId::new("beta"))
    );
}

#[tokio::test]
async fn live_spread_collapse_is_rejected() {
    let world = TestWorld::fast();
    // Reported 8% but live quotes have already converged to 2.1%.
    world.seed_market("FOO", dec!(1.000), dec!(1.021));

    let event = signal("FOO", dec!(8.0), dec!(1.00), dec!(1.08));
    assert_eq!(
        world.filter.evaluate(&event).await.unwrap_err(),
        RejectReason::LiveSpreadBelowMin
    );
}

#[tokio::test]
async fn blacklisted_symbol_is_rejected() {
    let mut trading = TradingConfig {
        min_spread: dec!(3.0),
        ..TradingConfig::default()
    };
    trading.symbol_blacklist.insert("SCAM".to_string());
    let world = TestWorld::new(trading, Default::default());
    world.seed_market("SCAM", dec!(1.00), dec!(1.05));

    let event = signal("SCAM", dec!(5.0), dec!(1.00), dec!(1.05));
    assert_eq!(
        world.filter.evaluate(&event).await.unwrap_err(),
        RejectReason::Blacklisted
    );
}

#[tokio::test]
async fn insufficient_margin_is_rejected() {
    let world = TestWorld::fast();
    world.seed_market("FOO", dec!(1.40), dec!(1.50));
    // $3 notional at 3x needs $1 margin; only $1 free and the safety
    // factor shaves it below the requirement.
    world.seed_balances(dec!(1));

    let event = signal("FOO", dec!(7.0), dec!(1.40), dec!(1.50));
    assert!(matches!(
        world.filter.evaluate(&event).await.unwrap_err(),
        RejectReason::InsufficientMargin(_)
    ));
}

#[tokio::test]
async fn disabled_venue_rejects_and_recovers() {
    use spreadhound::reconciler::BalanceReconciler;
    use std::sync::Arc;

    let world = TestWorld::fast();
    world.seed_market("FOO", dec!(1.00), dec!(1.05));

    let reconciler = BalanceReconciler::new(
        Arc::clone(&world.venues),
        Arc::clone(&world.state),
        Arc::clone(&world.health),
        Default::default(),
    );

    // Five consecutive balance failures disable alpha.
    for _ in 0..5 {
        world
            .alpha
            .inject_balance_failure(spreadhound::error::ExchangeError::Network("down".into()));
        reconciler.reconcile_once().await;
    }
    let event = signal("FOO", dec!(5.0), dec!(1.00), dec!(1.05));
    assert_eq!(
        world.filter.evaluate(&event).await.unwrap_err(),
        RejectReason::VenueDisabled(VenueId::new("alpha"))
    );

    // A successful balance fetch re-enables it and admission resumes.
    reconciler.reconcile_once().await;
    let event = signal("FOO", dec!(5.0), dec!(1.00), dec!(1.05));
    assert!(world.filter.evaluate(&event).await.is_ok());
}

#[tokio::test]
async fn concurrency_cap_blocks_second_admission() {
    let world = TestWorld::fast();
    world.seed_market("FOO", dec!(1.00), dec!(1.05));
    world.seed_market("BAR", dec!(2.00), dec!(2.10));

    let first = signal("FOO", dec!(5.0), dec!(1.00), dec!(1.05));
    let request = world.filter.evaluate(&first).await.unwrap();
    let trade = spreadhound::domain::ActiveTrade::from_request(
        spreadhound::domain::TradeId::new(),
        &request,
    );
    assert!(world.state.try_register((&trade).into(), 1));

    let second = signal("BAR", dec!(5.0), dec!(2.00), dec!(2.10));
    assert_eq!(
        world.filter.evaluate(&second).await.unwrap_err(),
        RejectReason::MaxTradesReached
    );
}

#[tokio::test]
async fn same_symbol_already_active_is_rejected() {
    let world = TestWorld::fast();
    world.seed_market("FOO", dec!(1.00), dec!(1.05));

    let event = signal("FOO", dec!(5.0), dec!(1.00), dec!(1.05));
    let request = world.filter.evaluate(&event).await.unwrap();
    let trade = spreadhound::domain::ActiveTrade::from_request(
        spreadhound::domain::TradeId::new(),
        &request,
    );
    assert!(world.state.try_register((&trade).into(), 4));

    let repeat = signal("FOO", dec!(5.0), dec!(1.00), dec!(1.05));
    assert_eq!(
        world.filter.evaluate(&repeat).await.unwrap_err(),
        RejectReason::AlreadyTrading
    );
}

#[tokio::test]
async fn daily_loss_floor_halts_admission() {
    use spreadhound::domain::{CloseReason, Symbol, TradeId, TradeOutcome};

    let world = TestWorld::fast();
    world.seed_market("FOO", dec!(1.00), dec!(1.05));

    // A closed trade with a loss beyond the floor.
    world.state.record_outcome(&TradeOutcome {
        trade_id: TradeId::new(),
        symbol: Symbol::parse("OLD").unwrap(),
        long_venue: VenueId::new("alpha"),
        short_venue: VenueId::new("beta"),
        quantity: dec!(1),
        entry_long: dec!(1),
        entry_short: dec!(1),
        exit_long: dec!(1),
        exit_short: dec!(1),
        gross_long: dec!(-60),
        gross_short: dec!(0),
        fees: dec!(0),
        net: dec!(-60),
        close_reason: CloseReason::Timeout,
        duration_secs: 10,
        residual_qty: dec!(0),
        pnl_estimated: false,
    });

    let event = signal("FOO", dec!(5.0), dec!(1.00), dec!(1.05));
    assert_eq!(
        world.filter.evaluate(&event).await.unwrap_err(),
        RejectReason::DailyLossLimit
    );
}
