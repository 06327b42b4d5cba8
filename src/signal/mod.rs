//! Signal ingestion: parsing, normalization, deduplication.

mod dedup;
mod parser;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::SignalConfig;
use crate::domain::SignalEvent;

pub use dedup::DedupCache;
pub use parser::parse;

/// Transport-agnostic source of raw signal messages.
///
/// The chat client (or a test harness) implements this; the router only
/// ever sees message text.
#[async_trait]
pub trait SignalSource: Send {
    /// Next raw message, `None` when the source is exhausted.
    async fn next_message(&mut self) -> Option<String>;
}

/// Channel-backed source, used by the supervisor and tests.
pub struct ChannelSource {
    rx: tokio::sync::mpsc::Receiver<String>,
}

impl ChannelSource {
    pub fn new(rx: tokio::sync::mpsc::Receiver<String>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl SignalSource for ChannelSource {
    async fn next_message(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Reads blank-line-delimited message blocks from stdin.
///
/// Stands in for a chat transport when running interactively or piping
/// captured messages through the binary.
pub struct StdinSource {
    lines: tokio::io::Lines<tokio::io::BufReader<tokio::io::Stdin>>,
}

impl StdinSource {
    pub fn new() -> Self {
        use tokio::io::AsyncBufReadExt;
        Self {
            lines: tokio::io::BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalSource for StdinSource {
    async fn next_message(&mut self) -> Option<String> {
        let mut block = String::new();
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        if !block.trim().is_empty() {
                            return Some(block);
                        }
                        block.clear();
                    } else {
                        block.push_str(&line);
                        block.push('\n');
                    }
                }
                Ok(None) | Err(_) => {
                    if block.trim().is_empty() {
                        return None;
                    }
                    return Some(block);
                }
            }
        }
    }
}

/// Parses inbound messages and absorbs duplicates.
pub struct SignalRouter {
    dedup: DedupCache,
}

impl SignalRouter {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            dedup: DedupCache::new(
                Duration::from_secs(config.dedup_ttl_secs),
                config.dedup_capacity,
            ),
        }
    }

    /// Convert one raw message into a signal event, or nothing.
    pub fn route(&self, raw: &str) -> Option<SignalEvent> {
        if self.dedup.is_duplicate(raw) {
            debug!("Duplicate message absorbed");
            return None;
        }
        let event = parser::parse(raw)?;
        info!(
            symbol = %event.symbol,
            spread = %event.spread,
            venues = event.prices.len(),
            "Signal accepted"
        );
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &str = "#FOO | Spread: 5.00%\nLong ALPHA: $1.0000\nShort BETA: $1.0500\n";

    #[test]
    fn route_parses_and_deduplicates() {
        let router = SignalRouter::new(&SignalConfig::default());
        assert!(router.route(MESSAGE).is_some());
        assert!(router.route(MESSAGE).is_none());
    }

    #[test]
    fn route_ignores_noise() {
        let router = SignalRouter::new(&SignalConfig::default());
        assert!(router.route("gm everyone").is_none());
    }

    #[tokio::test]
    async fn channel_source_forwards_messages() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let mut source = ChannelSource::new(rx);
        tx.send("hello".to_string()).await.unwrap();
        drop(tx);
        assert_eq!(source.next_message().await.as_deref(), Some("hello"));
        assert!(source.next_message().await.is_none());
    }
}
