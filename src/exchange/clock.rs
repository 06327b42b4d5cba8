//! Per-venue clock offset estimation.
//!
//! Samples each venue's time endpoint and takes the median offset against
//! the local clock. The host clock is never modified; the offset is applied
//! to request signing timestamps and each adapter keeps a generous receive
//! window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::ExchangeClient;

const SAMPLE_TIMEOUT: Duration = Duration::from_secs(5);
/// Offsets beyond this are worth an operator's attention.
const LARGE_OFFSET_MS: i64 = 5_000;

/// Median clock offset across reachable venues, in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockOffset {
    pub offset_ms: i64,
    /// How many venues answered.
    pub samples: usize,
}

/// Estimate the clock offset by querying every venue's time endpoint.
///
/// Venues that fail or time out are skipped; with no samples at all the
/// offset is zero.
pub async fn estimate_clock_offset(venues: &[Arc<dyn ExchangeClient>]) -> ClockOffset {
    let mut offsets = Vec::with_capacity(venues.len());

    let futures = venues.iter().map(|client| async move {
        let local_before = Utc::now().timestamp_millis();
        let result = tokio::time::timeout(SAMPLE_TIMEOUT, client.server_time()).await;
        (client.venue().clone(), local_before, result)
    });

    for (venue, local_before, result) in futures_util::future::join_all(futures).await {
        match result {
            Ok(Ok(server)) => {
                let offset = server.timestamp_millis() - local_before;
                debug!(venue = %venue, offset_ms = offset, "Venue time sampled");
                offsets.push(offset);
            }
            Ok(Err(e)) => warn!(venue = %venue, error = %e, "Time endpoint failed"),
            Err(_) => warn!(venue = %venue, "Time endpoint timed out"),
        }
    }

    if offsets.is_empty() {
        warn!("No venue answered a time probe; assuming zero clock offset");
        return ClockOffset::default();
    }

    offsets.sort_unstable();
    let median = offsets[offsets.len() / 2];
    if median.abs() > LARGE_OFFSET_MS {
        warn!(offset_ms = median, "Large clock offset against venues");
    } else {
        info!(offset_ms = median, samples = offsets.len(), "Clock offset estimated");
    }

    ClockOffset {
        offset_ms: median,
        samples: offsets.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_offset_is_zero() {
        let offset = ClockOffset::default();
        assert_eq!(offset.offset_ms, 0);
        assert_eq!(offset.samples, 0);
    }
}
