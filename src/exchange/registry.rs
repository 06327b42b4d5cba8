//! Enabled venues and their adapter instances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::domain::VenueId;
use crate::error::{ConfigError, Result};

use super::{BybitClient, BybitParams, ExchangeClient, PaperClient, PaperVenue};

/// Immutable map of enabled venues, built once at boot.
pub struct VenueRegistry {
    clients: HashMap<VenueId, Arc<dyn ExchangeClient>>,
}

impl VenueRegistry {
    pub fn new(clients: Vec<Arc<dyn ExchangeClient>>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|c| (c.venue().clone(), c))
                .collect(),
        }
    }

    /// Build adapters for every enabled venue in the config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut clients: Vec<Arc<dyn ExchangeClient>> = Vec::new();
        for (name, venue) in &config.venues {
            if !venue.enabled {
                continue;
            }
            match venue.adapter.as_str() {
                "bybit" => {
                    let client = BybitClient::new(BybitParams {
                        venue: VenueId::new(name),
                        api_key: venue.api_key.clone().unwrap_or_default(),
                        api_secret: venue.api_secret.clone().unwrap_or_default(),
                        recv_window_ms: venue.recv_window_ms,
                        taker_fee: config.commission_rate(name),
                        leverage: config.trading.leverage,
                        rest_timeout: Duration::from_secs(config.stream.rest_timeout_secs),
                    })?;
                    clients.push(Arc::new(client));
                }
                "paper" => {
                    let paper = PaperVenue::new(name);
                    clients.push(Arc::new(PaperClient::new(paper)));
                }
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "venue {name}: unknown adapter '{other}'"
                    ))
                    .into())
                }
            }
        }
        Ok(Self::new(clients))
    }

    pub fn get(&self, venue: &VenueId) -> Option<Arc<dyn ExchangeClient>> {
        self.clients.get(venue).cloned()
    }

    pub fn contains(&self, venue: &VenueId) -> bool {
        self.clients.contains_key(venue)
    }

    pub fn ids(&self) -> Vec<VenueId> {
        self.clients.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VenueId, &Arc<dyn ExchangeClient>)> {
        self.clients.iter()
    }

    pub fn clients(&self) -> Vec<Arc<dyn ExchangeClient>> {
        self.clients.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
