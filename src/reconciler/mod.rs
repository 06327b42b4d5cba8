//! Periodic balance reconciliation and venue probing.
//!
//! Fans out balance queries across enabled venues on a fixed cadence,
//! publishes the snapshot consumed by admission, and drives venue
//! disablement and recovery. Runs independently of trade execution and
//! never blocks it.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::config::ReconcilerConfig;
use crate::exchange::{ExchangeClient, VenueRegistry};
use crate::health::VenueHealth;

pub struct BalanceReconciler {
    venues: Arc<VenueRegistry>,
    state: Arc<AppState>,
    health: Arc<VenueHealth>,
    config: ReconcilerConfig,
}

impl BalanceReconciler {
    pub fn new(
        venues: Arc<VenueRegistry>,
        state: Arc<AppState>,
        health: Arc<VenueHealth>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            venues,
            state,
            health,
            config,
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = tick.tick() => {
                    self.reconcile_once().await;
                }
            }
        }
    }

    /// One fan-out over every venue, including disabled ones: a successful
    /// balance fetch is the recovery probe that re-enables a venue.
    pub async fn reconcile_once(&self) {
        let timeout = Duration::from_secs(self.config.balance_timeout_secs);
        let futures = self.venues.iter().map(|(venue, client)| {
            let client = Arc::clone(client);
            let venue = venue.clone();
            async move {
                let result = tokio::time::timeout(timeout, client.fetch_balance()).await;
                (venue, result)
            }
        });

        for (venue, result) in futures_util::future::join_all(futures).await {
            match result {
                Ok(Ok(balance)) => {
                    debug!(
                        venue = %venue,
                        free = %balance.free,
                        total = %balance.total,
                        "Balance reconciled"
                    );
                    self.state.set_balance(venue.clone(), balance);
                    self.health.record_success(&venue);
                }
                Ok(Err(e)) => {
                    warn!(venue = %venue, error = %e, "Balance fetch failed");
                    self.health.record_failure(&venue, e.to_string());
                }
                Err(_) => {
                    warn!(venue = %venue, "Balance fetch timed out");
                    self.health.record_failure(&venue, "balance fetch timed out");
                }
            }
        }
    }

    /// Sum of free balances across venues, for status reporting.
    pub fn total_free(&self) -> Decimal {
        self.state
            .balances()
            .values()
            .map(|b| b.free)
            .fold(Decimal::ZERO, |acc, free| acc + free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExchangeError;
    use crate::exchange::{PaperClient, PaperVenue};
    use rust_decimal_macros::dec;

    fn reconciler_over(
        venues: Vec<Arc<PaperVenue>>,
        max_failures: u32,
    ) -> (Arc<AppState>, Arc<VenueHealth>, BalanceReconciler) {
        let registry = Arc::new(VenueRegistry::new(
            venues
                .iter()
                .map(|v| Arc::new(PaperClient::new(Arc::clone(v))) as _)
                .collect(),
        ));
        let state = Arc::new(AppState::new());
        let health = Arc::new(VenueHealth::new(max_failures));
        let reconciler = BalanceReconciler::new(
            registry,
            Arc::clone(&state),
            Arc::clone(&health),
            ReconcilerConfig::default(),
        );
        (state, health, reconciler)
    }

    #[tokio::test]
    async fn publishes_balances() {
        let venue = PaperVenue::new("alpha");
        venue.set_balance(dec!(25));
        let other = PaperVenue::new("beta");
        other.set_balance(dec!(5));
        let (state, _, reconciler) = reconciler_over(vec![venue, other], 5);

        reconciler.reconcile_once().await;

        let id = crate::domain::VenueId::new("alpha");
        assert_eq!(state.balance(&id).unwrap().free, dec!(25));
        assert_eq!(reconciler.total_free(), dec!(30));
    }

    #[tokio::test]
    async fn consecutive_failures_disable_then_success_recovers() {
        let venue = PaperVenue::new("alpha");
        venue.set_balance(dec!(10));
        let (_, health, reconciler) = reconciler_over(vec![venue.clone()], 2);

        for _ in 0..2 {
            venue.inject_balance_failure(ExchangeError::Network("down".into()));
        }
        reconciler.reconcile_once().await;
        reconciler.reconcile_once().await;

        let id = crate::domain::VenueId::new("alpha");
        assert!(health.is_disabled(&id));

        // Next cycle succeeds and re-enables the venue.
        reconciler.reconcile_once().await;
        assert!(!health.is_disabled(&id));
    }
}
