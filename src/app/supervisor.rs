//! Supervisor: builds the subsystems, owns their tasks, propagates
//! shutdown, and restarts crashed subsystems with jittered backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::coordinator::TradeCoordinator;
use crate::domain::{ActiveTrade, TradeId, TradeOutcome};
use crate::error::{Error, Result};
use crate::exchange::{estimate_clock_offset, ExchangeClient, VenueRegistry};
use crate::filter::OpportunityFilter;
use crate::health::VenueHealth;
use crate::persist::StateStore;
use crate::reconciler::BalanceReconciler;
use crate::signal::{SignalRouter, SignalSource};
use crate::stream::PriceStream;

use super::AppState;

/// How long subsystems get to reach quiescence at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Clock re-sync cadence.
const CLOCK_SYNC_INTERVAL: Duration = Duration::from_secs(600);
/// Periodic status line cadence.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);
const RESTART_BACKOFF_MAX: Duration = Duration::from_secs(60);

pub struct Supervisor {
    config: Config,
    venues: Arc<VenueRegistry>,
    state: Arc<AppState>,
    health: Arc<VenueHealth>,
    stream: Arc<PriceStream>,
    router: SignalRouter,
    filter: OpportunityFilter,
    coordinator: Arc<TradeCoordinator>,
    reconciler: Arc<BalanceReconciler>,
    store: Arc<StateStore>,
}

impl Supervisor {
    /// Build every subsystem from config. No I/O yet.
    pub fn build(config: Config) -> Result<Self> {
        let venues = Arc::new(VenueRegistry::from_config(&config)?);
        let state = Arc::new(AppState::new());
        let health = Arc::new(VenueHealth::new(
            config.reconciler.max_failures_before_disable,
        ));
        let stream = Arc::new(PriceStream::new(
            Arc::clone(&venues),
            Arc::clone(&health),
            config.stream.clone(),
        ));
        let store = Arc::new(StateStore::new(&config.persist.state_path));
        let router = SignalRouter::new(&config.signals);
        let filter = OpportunityFilter::new(
            Arc::clone(&venues),
            Arc::clone(&stream),
            Arc::clone(&health),
            Arc::clone(&state),
            config.trading.clone(),
            &config.stream,
        );
        let coordinator = Arc::new(TradeCoordinator::new(
            Arc::clone(&venues),
            Arc::clone(&stream),
            Arc::clone(&state),
            Arc::clone(&health),
            Some(Arc::clone(&store)),
            config.trading.clone(),
            config.coordinator.clone(),
        ));
        let reconciler = Arc::new(BalanceReconciler::new(
            Arc::clone(&venues),
            Arc::clone(&state),
            Arc::clone(&health),
            config.reconciler.clone(),
        ));

        Ok(Self {
            config,
            venues,
            state,
            health,
            stream,
            router,
            filter,
            coordinator,
            reconciler,
            store,
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Boot, run until shutdown flips or the source ends, then wind down.
    pub async fn run(
        self,
        mut source: Box<dyn SignalSource>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        self.boot().await?;

        let reconciler_handle = spawn_supervised("reconciler", shutdown.clone(), {
            let reconciler = Arc::clone(&self.reconciler);
            move |stop| {
                let reconciler = Arc::clone(&reconciler);
                async move { reconciler.run(stop).await }
            }
        });
        let clock_handle = tokio::spawn(clock_monitor(
            self.venues.clients(),
            shutdown.clone(),
        ));

        let mut coordinators: JoinSet<Option<TradeOutcome>> = JoinSet::new();
        let mut status = tokio::time::interval(STATUS_INTERVAL);
        status.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        status.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
                message = source.next_message() => {
                    let Some(raw) = message else {
                        info!("Signal source ended");
                        break;
                    };
                    self.handle_message(&raw, &mut coordinators, &shutdown).await;
                }
                Some(result) = coordinators.join_next(), if !coordinators.is_empty() => {
                    if let Err(e) = result {
                        // A coordinator panic is an invariant violation;
                        // its trade stays in the registry as-is.
                        error!(error = %e, "Coordinator task crashed");
                    }
                }
                _ = status.tick() => {
                    let stats = self.state.stats();
                    info!(
                        active = self.state.active_count(),
                        daily_pnl = %self.state.daily_pnl(),
                        messages = stats.messages_seen,
                        accepted = stats.signals_accepted,
                        opened = stats.trades_opened,
                        "Status"
                    );
                }
            }
        }

        self.wind_down(coordinators, reconciler_handle, clock_handle)
            .await;
        Ok(())
    }

    /// Load markets everywhere, estimate the clock offset, restore the
    /// persisted snapshot, and take a first balance pass.
    async fn boot(&self) -> Result<()> {
        info!(venues = self.venues.len(), "Booting");

        let loads = self.venues.iter().map(|(venue, client)| {
            let client = Arc::clone(client);
            let venue = venue.clone();
            async move { (venue, client.load_markets().await) }
        });
        let mut reachable = 0;
        for (venue, result) in futures_util::future::join_all(loads).await {
            match result {
                Ok(()) => reachable += 1,
                Err(e) => {
                    warn!(venue = %venue, error = %e, "Market load failed at boot");
                    self.health.record_failure(&venue, e.to_string());
                }
            }
        }
        if reachable == 0 {
            return Err(Error::AllVenuesUnreachable);
        }

        let offset = estimate_clock_offset(&self.venues.clients()).await;
        for client in self.venues.clients() {
            client.set_clock_offset(offset.offset_ms);
        }

        self.store.restore_into(&self.state)?;
        self.reconciler.reconcile_once().await;
        Ok(())
    }

    /// One raw message through router, filter, and coordinator spawn.
    async fn handle_message(
        &self,
        raw: &str,
        coordinators: &mut JoinSet<Option<TradeOutcome>>,
        shutdown: &watch::Receiver<bool>,
    ) {
        self.state.note_message();
        let Some(event) = self.router.route(raw) else {
            return;
        };

        match self.filter.evaluate(&event).await {
            Ok(request) => {
                let trade = ActiveTrade::from_request(TradeId::new(), &request);
                // Registration re-checks the cap atomically; a concurrent
                // admission may have taken the last slot.
                if !self
                    .state
                    .try_register((&trade).into(), self.config.trading.max_concurrent_trades)
                {
                    warn!(symbol = %trade.symbol, "Slot taken before registration");
                    self.state.note_signal_rejected();
                    return;
                }
                self.state.note_signal_accepted();
                self.store.flush_or_warn(&self.state);
                let coordinator = Arc::clone(&self.coordinator);
                let stop = shutdown.clone();
                coordinators.spawn(async move { coordinator.execute(trade, stop).await });
            }
            Err(_reason) => {
                self.state.note_signal_rejected();
            }
        }
    }

    async fn wind_down(
        &self,
        mut coordinators: JoinSet<Option<TradeOutcome>>,
        reconciler_handle: JoinHandle<()>,
        clock_handle: JoinHandle<()>,
    ) {
        // Coordinators transition to Closing(Shutdown) on the signal; give
        // them the grace window, then abandon the stragglers.
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while coordinators.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Abandoning coordinators still running after grace period");
            coordinators.abort_all();
        }

        self.stream.shutdown();
        reconciler_handle.abort();
        clock_handle.abort();
        self.store.flush_or_warn(&self.state);
        info!("Supervisor stopped");
    }
}

/// Keep a subsystem alive: restart it on unexpected exit or panic with
/// jittered exponential backoff, capped to avoid a restart storm.
fn spawn_supervised<F, Fut>(
    name: &'static str,
    shutdown: watch::Receiver<bool>,
    factory: F,
) -> JoinHandle<()>
where
    F: Fn(watch::Receiver<bool>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut delay = Duration::from_secs(1);
        loop {
            let task = tokio::spawn(factory(shutdown.clone()));
            let result = task.await;
            if *shutdown.borrow() {
                return;
            }
            match result {
                Ok(()) => warn!(subsystem = name, "Subsystem exited; restarting"),
                Err(e) => error!(subsystem = name, error = %e, "Subsystem crashed; restarting"),
            }
            let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 5);
            tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;
            delay = (delay * 2).min(RESTART_BACKOFF_MAX);
        }
    })
}

/// Background clock re-sync against venue time endpoints.
async fn clock_monitor(clients: Vec<Arc<dyn ExchangeClient>>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(CLOCK_SYNC_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tick.tick().await;
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = tick.tick() => {
                let offset = estimate_clock_offset(&clients).await;
                if offset.samples > 0 {
                    for client in &clients {
                        client.set_clock_offset(offset.offset_ms);
                    }
                }
            }
        }
    }
}
