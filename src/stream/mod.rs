//! Multi-venue price fan-in.
//!
//! Maintains the freshest known price for every (symbol, venue) pair under
//! active subscription. One supervised watch task per pair; readers take
//! snapshots from a concurrent map and never block writers.

mod watch;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch as watch_channel;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::domain::{Quote, QuoteSource, Symbol, VenueId};
use crate::exchange::{ExchangeClient, VenueRegistry};
use crate::health::VenueHealth;

pub(crate) type QuoteKey = (Symbol, VenueId);

struct Subscription {
    stop: watch_channel::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Live price map over all enabled venues.
pub struct PriceStream {
    venues: Arc<VenueRegistry>,
    health: Arc<VenueHealth>,
    quotes: Arc<DashMap<QuoteKey, Quote>>,
    subscriptions: Mutex<HashMap<Symbol, Subscription>>,
    config: StreamConfig,
}

impl PriceStream {
    pub fn new(
        venues: Arc<VenueRegistry>,
        health: Arc<VenueHealth>,
        config: StreamConfig,
    ) -> Self {
        Self {
            venues,
            health,
            quotes: Arc::new(DashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Ensure one watch task per enabled venue for `symbol`. Idempotent.
    pub fn subscribe(&self, symbol: &Symbol) {
        let mut subs = self.subscriptions.lock();
        if subs.contains_key(symbol) {
            debug!(symbol = %symbol, "Already subscribed");
            return;
        }

        let (stop_tx, stop_rx) = watch_channel::channel(false);
        let mut tasks = Vec::new();
        for (venue, client) in self.venues.iter() {
            tasks.push(watch::spawn_watch_task(
                Arc::clone(client),
                symbol.clone(),
                venue.clone(),
                Arc::clone(&self.quotes),
                Arc::clone(&self.health),
                self.config.clone(),
                stop_rx.clone(),
            ));
        }
        info!(symbol = %symbol, venues = tasks.len(), "Subscribed");
        subs.insert(
            symbol.clone(),
            Subscription {
                stop: stop_tx,
                tasks,
            },
        );
    }

    /// Cancel all watch tasks for `symbol` and drop its quotes.
    pub fn unsubscribe(&self, symbol: &Symbol) {
        let subscription = self.subscriptions.lock().remove(symbol);
        let Some(subscription) = subscription else {
            return;
        };
        let _ = subscription.stop.send(true);
        for task in subscription.tasks {
            task.abort();
        }
        self.quotes.retain(|(s, _), _| s != symbol);
        info!(symbol = %symbol, "Unsubscribed");
    }

    /// Cancel every subscription.
    pub fn shutdown(&self) {
        let symbols: Vec<Symbol> = self.subscriptions.lock().keys().cloned().collect();
        for symbol in symbols {
            self.unsubscribe(&symbol);
        }
    }

    /// Most recent cached quote, regardless of age. Non-blocking.
    pub fn quote(&self, symbol: &Symbol, venue: &VenueId) -> Option<Quote> {
        self.quotes
            .get(&(symbol.clone(), venue.clone()))
            .map(|entry| *entry.value())
    }

    /// Cached quote only when younger than the freshness window.
    pub fn fresh_quote(&self, symbol: &Symbol, venue: &VenueId) -> Option<Quote> {
        self.quote(symbol, venue)
            .filter(|q| q.is_fresh(self.config.freshness()))
    }

    /// Blocking quote acquisition: subscribe on demand, poll the cache,
    /// fall back to one REST snapshot before giving up.
    pub async fn quote_blocking(
        &self,
        symbol: &Symbol,
        venue: &VenueId,
        timeout: Duration,
    ) -> Option<Quote> {
        if let Some(quote) = self.fresh_quote(symbol, venue) {
            return Some(quote);
        }

        self.subscribe(symbol);

        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if let Some(quote) = self.fresh_quote(symbol, venue) {
                return Some(quote);
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }

        // REST fallback, once.
        let client = self.venues.get(venue)?;
        let rest_timeout = Duration::from_secs(self.config.rest_timeout_secs);
        let native = tokio::time::timeout(rest_timeout, client.resolve_symbol(symbol))
            .await
            .ok()?
            .ok()?;
        match tokio::time::timeout(rest_timeout, client.fetch_ticker(&native)).await {
            Ok(Ok(price)) => {
                let quote = Quote::now(price, QuoteSource::Rest);
                self.quotes
                    .insert((symbol.clone(), venue.clone()), quote);
                debug!(symbol = %symbol, venue = %venue, %price, "REST fallback quote");
                Some(quote)
            }
            Ok(Err(e)) => {
                warn!(symbol = %symbol, venue = %venue, error = %e, "REST fallback failed");
                None
            }
            Err(_) => {
                warn!(symbol = %symbol, venue = %venue, "REST fallback timed out");
                None
            }
        }
    }

    /// Fan-out symbol resolution across all venues with a per-task timeout.
    ///
    /// Venues that do not list the symbol (or time out) are absent from the
    /// result.
    pub async fn resolve_all(&self, symbol: &Symbol) -> HashMap<VenueId, String> {
        let timeout = Duration::from_secs(self.config.resolve_timeout_secs);
        let futures = self.venues.iter().map(|(venue, client)| {
            let client = Arc::clone(client);
            let venue = venue.clone();
            let symbol = symbol.clone();
            async move {
                match tokio::time::timeout(timeout, client.resolve_symbol(&symbol)).await {
                    Ok(Ok(native)) => Some((venue, native)),
                    Ok(Err(e)) => {
                        debug!(venue = %venue, symbol = %symbol, error = %e, "Resolve failed");
                        None
                    }
                    Err(_) => {
                        warn!(venue = %venue, symbol = %symbol, "Resolve timed out");
                        None
                    }
                }
            }
        });
        futures_util::future::join_all(futures)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Number of active symbol subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}
