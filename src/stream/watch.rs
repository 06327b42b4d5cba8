//! Per-(venue, symbol) watch task.
//!
//! Each task resolves the venue's native spelling, then loops on the
//! adapter's ticker stream, publishing quotes into the shared map. Failures
//! back off exponentially from the configured initial delay up to the cap
//! and reset on the next successful tick.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::domain::{Quote, QuoteSource, Symbol, VenueId};
use crate::error::ExchangeError;
use crate::exchange::ExchangeClient;
use crate::health::VenueHealth;

use super::QuoteKey;

pub(crate) fn spawn_watch_task(
    client: Arc<dyn ExchangeClient>,
    symbol: Symbol,
    venue: VenueId,
    quotes: Arc<DashMap<QuoteKey, Quote>>,
    health: Arc<VenueHealth>,
    config: StreamConfig,
    stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(watch_loop(
        client, symbol, venue, quotes, health, config, stop,
    ))
}

async fn watch_loop(
    client: Arc<dyn ExchangeClient>,
    symbol: Symbol,
    venue: VenueId,
    quotes: Arc<DashMap<QuoteKey, Quote>>,
    health: Arc<VenueHealth>,
    config: StreamConfig,
    mut stop: watch::Receiver<bool>,
) {
    let initial_delay = Duration::from_millis(config.backoff_initial_ms);
    let max_delay = Duration::from_millis(config.backoff_max_ms);
    let mut retry_delay = initial_delay;
    let key = (symbol.clone(), venue.clone());

    // The native spelling is venue-specific and resolved inside the retry
    // loop: a transient resolve failure backs off and retries like any
    // other stream failure. A venue that does not list the symbol simply
    // contributes no quotes.
    let mut native: Option<String> = None;

    loop {
        if *stop.borrow() {
            break;
        }

        if let Some(native_symbol) = native.clone() {
            match client.watch_ticker(&native_symbol).await {
                Ok(mut stream) => loop {
                    tokio::select! {
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                return;
                            }
                        }
                        item = stream.next() => match item {
                            Some(Ok(tick)) => {
                                quotes.insert(
                                    key.clone(),
                                    Quote::now(tick.last, QuoteSource::Stream),
                                );
                                retry_delay = initial_delay;
                            }
                            Some(Err(e)) => {
                                warn!(venue = %venue, symbol = %symbol, error = %e, "Ticker stream error");
                                health.record_failure(&venue, e.to_string());
                                break;
                            }
                            None => {
                                debug!(venue = %venue, symbol = %symbol, "Ticker stream ended");
                                break;
                            }
                        }
                    }
                },
                Err(e) => {
                    warn!(
                        venue = %venue,
                        symbol = %symbol,
                        error = %e,
                        retry_ms = retry_delay.as_millis(),
                        "Watch connect failed"
                    );
                    health.record_failure(&venue, e.to_string());
                }
            }
        } else {
            match client.resolve_symbol(&symbol).await {
                Ok(resolved) => {
                    info!(venue = %venue, symbol = %symbol, native = %resolved, "Watcher started");
                    native = Some(resolved);
                    retry_delay = initial_delay;
                    continue;
                }
                Err(ExchangeError::SymbolNotFound(_)) => {
                    debug!(venue = %venue, symbol = %symbol, "Symbol not listed; watcher exits");
                    return;
                }
                Err(e) => {
                    warn!(
                        venue = %venue,
                        symbol = %symbol,
                        error = %e,
                        retry_ms = retry_delay.as_millis(),
                        "Resolve failed"
                    );
                    health.record_failure(&venue, e.to_string());
                }
            }
        }

        // Backoff before the next attempt; a stop signal cuts the sleep
        // short.
        tokio::select! {
            _ = tokio::time::sleep(retry_delay) => {}
            _ = stop.changed() => {
                if *stop.borrow() {
                    return;
                }
            }
        }
        retry_delay = (retry_delay * 2).min(max_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{PaperClient, PaperVenue};
    use rust_decimal_macros::dec;

    fn fast_config() -> StreamConfig {
        StreamConfig {
            backoff_initial_ms: 10,
            backoff_max_ms: 40,
            ..StreamConfig::default()
        }
    }

    #[tokio::test]
    async fn watcher_publishes_quotes() {
        let venue = PaperVenue::new("alpha");
        let native = venue.add_market("FOO", dec!(1), dec!(1), dec!(0.0006));
        venue.set_price(&native, dec!(1.5));

        let quotes = Arc::new(DashMap::new());
        let health = Arc::new(VenueHealth::new(5));
        let (_stop_tx, stop_rx) = watch::channel(false);
        let symbol = Symbol::parse("FOO").unwrap();

        let handle = spawn_watch_task(
            Arc::new(PaperClient::new(Arc::clone(&venue))),
            symbol.clone(),
            VenueId::new("alpha"),
            Arc::clone(&quotes),
            health,
            fast_config(),
            stop_rx,
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        let quote = quotes
            .get(&(symbol, VenueId::new("alpha")))
            .map(|q| *q.value())
            .expect("quote published");
        assert_eq!(quote.price, dec!(1.5));
        handle.abort();
    }

    #[tokio::test]
    async fn watcher_relaunches_after_connect_failure() {
        let venue = PaperVenue::new("alpha");
        let native = venue.add_market("FOO", dec!(1), dec!(1), dec!(0.0006));
        venue.set_price(&native, dec!(2.5));
        // First watch attempt fails; the relaunch with backoff succeeds.
        venue.inject_watch_failure(ExchangeError::Network("down".into()));

        let quotes = Arc::new(DashMap::new());
        let health = Arc::new(VenueHealth::new(5));
        let (_stop_tx, stop_rx) = watch::channel(false);
        let symbol = Symbol::parse("FOO").unwrap();

        let handle = spawn_watch_task(
            Arc::new(PaperClient::new(Arc::clone(&venue))),
            symbol.clone(),
            VenueId::new("alpha"),
            Arc::clone(&quotes),
            health,
            fast_config(),
            stop_rx,
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(quotes.contains_key(&(symbol, VenueId::new("alpha"))));
        handle.abort();
    }

    #[tokio::test]
    async fn watcher_retries_resolve_after_transient_failure() {
        let venue = PaperVenue::new("alpha");
        let native = venue.add_market("FOO", dec!(1), dec!(1), dec!(0.0006));
        venue.set_price(&native, dec!(4.2));
        // The first resolve attempt hits a network blip; the watcher backs
        // off and resolves on the relaunch instead of exiting.
        venue.inject_resolve_failure(ExchangeError::Network("blip".into()));

        let quotes = Arc::new(DashMap::new());
        let health = Arc::new(VenueHealth::new(5));
        let (_stop_tx, stop_rx) = watch::channel(false);
        let symbol = Symbol::parse("FOO").unwrap();

        let handle = spawn_watch_task(
            Arc::new(PaperClient::new(Arc::clone(&venue))),
            symbol.clone(),
            VenueId::new("alpha"),
            Arc::clone(&quotes),
            health,
            fast_config(),
            stop_rx,
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        let quote = quotes
            .get(&(symbol, VenueId::new("alpha")))
            .map(|q| *q.value())
            .expect("quote published after resolve retry");
        assert_eq!(quote.price, dec!(4.2));
        handle.abort();
    }

    #[tokio::test]
    async fn watcher_exits_for_unlisted_symbol() {
        let venue = PaperVenue::new("alpha");
        let quotes: Arc<DashMap<QuoteKey, Quote>> = Arc::new(DashMap::new());
        let health = Arc::new(VenueHealth::new(5));
        let (_stop_tx, stop_rx) = watch::channel(false);

        let handle = spawn_watch_task(
            Arc::new(PaperClient::new(venue)),
            Symbol::parse("NOPE").unwrap(),
            VenueId::new("alpha"),
            Arc::clone(&quotes),
            health,
            fast_config(),
            stop_rx,
        );

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher should exit quickly")
            .unwrap();
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn stop_signal_ends_watcher() {
        let venue = PaperVenue::new("alpha");
        let native = venue.add_market("FOO", dec!(1), dec!(1), dec!(0.0006));
        venue.set_price(&native, dec!(1.0));

        let quotes = Arc::new(DashMap::new());
        let health = Arc::new(VenueHealth::new(5));
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = spawn_watch_task(
            Arc::new(PaperClient::new(venue)),
            Symbol::parse("FOO").unwrap(),
            VenueId::new("alpha"),
            quotes,
            health,
            fast_config(),
            stop_rx,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher should stop")
            .unwrap();
    }
}
