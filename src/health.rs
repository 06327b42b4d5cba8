//! Per-venue health tracking.
//!
//! Watch tasks and the balance reconciler record failures here; admission
//! reads it. A venue is disabled after a configured run of consecutive
//! failures and re-enabled by the next successful probe (the reconciler's
//! periodic balance fetch, so re-enablement is never faster than one
//! reconciliation cycle).

use dashmap::DashMap;
use tracing::{info, warn};

use crate::domain::VenueId;

#[derive(Debug, Default, Clone)]
struct VenueStatus {
    consecutive_failures: u32,
    disabled: bool,
    last_error: Option<String>,
}

/// Shared venue health map.
pub struct VenueHealth {
    max_failures: u32,
    venues: DashMap<VenueId, VenueStatus>,
}

impl VenueHealth {
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures,
            venues: DashMap::new(),
        }
    }

    /// Record a failed operation. Returns true when this failure disabled
    /// the venue.
    pub fn record_failure(&self, venue: &VenueId, error: impl Into<String>) -> bool {
        let mut status = self.venues.entry(venue.clone()).or_default();
        status.consecutive_failures += 1;
        status.last_error = Some(error.into());
        if !status.disabled && status.consecutive_failures >= self.max_failures {
            status.disabled = true;
            warn!(
                venue = %venue,
                failures = status.consecutive_failures,
                "Venue disabled after consecutive failures"
            );
            return true;
        }
        false
    }

    /// Record a successful operation, re-enabling the venue if needed.
    pub fn record_success(&self, venue: &VenueId) {
        let mut status = self.venues.entry(venue.clone()).or_default();
        if status.disabled {
            info!(venue = %venue, "Venue re-enabled after successful probe");
        }
        status.consecutive_failures = 0;
        status.disabled = false;
        status.last_error = None;
    }

    /// Force-disable a venue, e.g. on an authentication failure.
    pub fn disable(&self, venue: &VenueId, error: impl Into<String>) {
        let mut status = self.venues.entry(venue.clone()).or_default();
        status.disabled = true;
        status.last_error = Some(error.into());
        warn!(venue = %venue, "Venue force-disabled");
    }

    pub fn is_disabled(&self, venue: &VenueId) -> bool {
        self.venues
            .get(venue)
            .map(|s| s.disabled)
            .unwrap_or(false)
    }

    pub fn disabled_venues(&self) -> Vec<VenueId> {
        self.venues
            .iter()
            .filter(|entry| entry.value().disabled)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disables_after_threshold_and_recovers() {
        let health = VenueHealth::new(3);
        let venue = VenueId::new("alpha");

        assert!(!health.record_failure(&venue, "boom"));
        assert!(!health.record_failure(&venue, "boom"));
        assert!(health.record_failure(&venue, "boom"));
        assert!(health.is_disabled(&venue));

        health.record_success(&venue);
        assert!(!health.is_disabled(&venue));
        assert!(health.disabled_venues().is_empty());
    }

    #[test]
    fn force_disable_is_immediate() {
        let health = VenueHealth::new(10);
        let venue = VenueId::new("alpha");
        health.disable(&venue, "auth");
        assert!(health.is_disabled(&venue));
    }
}
