//! Full pipeline flows: raw message -> router -> filter -> coordinator.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;

use spreadhound::config::TradingConfig;
use spreadhound::domain::{ActiveTrade, CloseReason, TradeId, VenueId};
use spreadhound::filter::OpportunityFilter;
use spreadhound::testkit::{signal_message, TestWorld};

#[tokio::test]
async fn happy_path_from_message_to_closed_trade() {
    let world = TestWorld::fast();
    world.seed_market("FOO", dec!(1.0000), dec!(1.0500));

    // Signal: #FOO | Spread: 5.00%; Long ALPHA $1.0000; Short BETA $1.0500.
    let raw = signal_message("FOO", dec!(5.00), "alpha", dec!(1.0000), "beta", dec!(1.0500));
    let event = world.router.route(&raw).expect("signal should parse");
    assert_eq!(event.spread, dec!(5.00));

    let request = world.filter.evaluate(&event).await.expect("admitted");
    assert_eq!(request.quantity, dec!(2));
    assert_eq!(request.notional, dec!(2.0000));
    assert_eq!(request.long_venue, VenueId::new("alpha"));

    let trade = ActiveTrade::from_request(TradeId::new(), &request);
    assert!(world
        .state
        .try_register((&trade).into(), world.trading.max_concurrent_trades));

    let (_tx, rx) = watch::channel(false);
    let coordinator = Arc::clone(&world.coordinator);
    let handle = tokio::spawn(async move { coordinator.execute(trade, rx).await });

    // Quotes move: spread collapses to 0.19%, under CloseSpread 0.5%.
    tokio::time::sleep(Duration::from_millis(400)).await;
    world.move_prices("FOO", dec!(1.0400), dec!(1.0420));

    let outcome = tokio::time::timeout(Duration::from_secs(20), handle)
        .await
        .expect("pipeline should finish")
        .unwrap()
        .expect("closed with outcome");

    assert_eq!(outcome.close_reason, CloseReason::TargetSpread);
    // Ledger formula holds and the favorable collapse beats the fees.
    assert_eq!(
        outcome.net,
        outcome.gross_long + outcome.gross_short - outcome.fees
    );
    assert!(outcome.net > Decimal::ZERO);
    assert_eq!(world.state.ledger_snapshot().realized, outcome.net);
}

#[tokio::test]
async fn duplicate_messages_produce_one_trade_request() {
    let world = TestWorld::fast();
    world.seed_market("FOO", dec!(1.00), dec!(1.05));

    let raw = signal_message("FOO", dec!(5.00), "alpha", dec!(1.00), "beta", dec!(1.05));
    assert!(world.router.route(&raw).is_some());
    assert!(world.router.route(&raw).is_none());
}

#[tokio::test]
async fn blacklist_update_spares_existing_trades() {
    let world = TestWorld::fast();
    world.seed_market("FOO", dec!(1.00), dec!(1.05));

    // Admit and register a FOO pair under the original config.
    let raw = signal_message("FOO", dec!(5.00), "alpha", dec!(1.00), "beta", dec!(1.05));
    let event = world.router.route(&raw).unwrap();
    let request = world.filter.evaluate(&event).await.unwrap();
    let trade = ActiveTrade::from_request(TradeId::new(), &request);
    assert!(world.state.try_register((&trade).into(), 4));

    // Operator update: FOO lands on the blacklist.
    let mut updated = world.trading.clone();
    updated.symbol_blacklist.insert("FOO".to_string());
    let updated_filter = OpportunityFilter::new(
        Arc::clone(&world.venues),
        Arc::clone(&world.stream),
        Arc::clone(&world.health),
        Arc::clone(&world.state),
        updated,
        &spreadhound::config::StreamConfig::default(),
    );

    // No new admission for FOO; the existing pair stays registered.
    let again = signal_message("FOO", dec!(6.00), "alpha", dec!(1.00), "beta", dec!(1.06));
    let event = world.router.route(&again).unwrap();
    assert_eq!(
        updated_filter.evaluate(&event).await.unwrap_err(),
        spreadhound::error::RejectReason::Blacklisted
    );
    assert_eq!(world.state.active_count(), 1);
}

#[tokio::test]
async fn risky_multiplier_does_not_shrink_minimum_sized_trades() {
    let mut trading = TradingConfig {
        min_spread: dec!(3.0),
        max_single_trade_notional: dec!(3.0),
        ..TradingConfig::default()
    };
    trading
        .risky_multipliers
        .insert("FOO".to_string(), dec!(0.5));
    let world = TestWorld::new(trading, Default::default());
    world.seed_market("FOO", dec!(1.00), dec!(1.05));

    // Both venues require 2 contracts; the multiplier cannot trade below
    // that, so the quantity stays at the minimum.
    let raw = signal_message("FOO", dec!(5.00), "alpha", dec!(1.00), "beta", dec!(1.05));
    let event = world.router.route(&raw).unwrap();
    let request = world.filter.evaluate(&event).await.unwrap();
    assert_eq!(request.quantity, dec!(2));
}

#[tokio::test]
async fn risky_multiplier_caps_budget_sized_quantity() {
    let mut trading = TradingConfig {
        min_spread: dec!(3.0),
        max_single_trade_notional: dec!(3.0),
        ..TradingConfig::default()
    };
    trading
        .risky_multipliers
        .insert("WILD".to_string(), dec!(0.5));
    let world = TestWorld::new(trading, Default::default());

    // No venue minimum: sizing falls back to the notional budget, and the
    // risky multiplier halves it.
    let a = world.alpha.add_market("WILD", dec!(0), dec!(1), dec!(0.0006));
    let b = world.beta.add_market("WILD", dec!(0), dec!(1), dec!(0.0006));
    world.alpha.set_price(&a, dec!(0.50));
    world.beta.set_price(&b, dec!(0.53));
    world.seed_balances(dec!(10));

    let raw = signal_message("WILD", dec!(6.00), "alpha", dec!(0.50), "beta", dec!(0.53));
    let event = world.router.route(&raw).unwrap();
    let request = world.filter.evaluate(&event).await.unwrap();
    // Budget 3/0.50 = 6 contracts, halved to 3.
    assert_eq!(request.quantity, dec!(3));
}
