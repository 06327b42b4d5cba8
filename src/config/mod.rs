//! Application configuration loading and validation.
//!
//! Configuration is loaded from a TOML file with environment variable
//! overrides for venue credentials (`SPREADHOUND_<VENUE>_API_KEY` /
//! `SPREADHOUND_<VENUE>_API_SECRET`).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub trading: TradingConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub signals: SignalConfig,

    #[serde(default)]
    pub persist: PersistConfig,

    /// Enabled venues and their credentials, keyed by venue id.
    #[serde(default)]
    pub venues: HashMap<String, VenueConfig>,
}

/// Logging and tracing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `trace` | `debug` | `info` | `warn` | `error`, or an env-filter spec.
    pub level: String,
    /// `pretty` | `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

/// Admission and lifecycle limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Minimum acceptable spread percentage to admit a signal.
    pub min_spread: Decimal,
    /// Reject reported spreads above this; implausibly large spreads almost
    /// always indicate a delisted or misprinted side.
    pub max_allowed_spread: Decimal,
    /// Target spread percentage at which to unwind.
    pub close_spread: Decimal,
    /// Isolated-margin leverage applied on both venues.
    pub leverage: u32,
    /// Global cap on simultaneously active pairs.
    pub max_concurrent_trades: usize,
    /// Per-venue notional cap per leg, in USDT.
    pub max_single_trade_notional: Decimal,
    /// Absolute daily loss at which admission halts.
    pub max_daily_loss: Decimal,
    /// Seconds before a pair is force-unwound.
    pub max_hold_time_secs: u64,
    pub trailing_stop_enabled: bool,
    /// Unrealized P&L in USDT at which the trailing stop arms.
    pub trailing_start: Decimal,
    /// `[elapsed_secs, keep_ratio]` steps; the applicable ratio is the one
    /// for the largest threshold not exceeding the hold duration.
    pub trailing_levels: Vec<(u64, Decimal)>,
    /// Default taker fee when a venue does not report one.
    pub commission_rate: Decimal,
    /// Tickers never admitted.
    pub symbol_blacklist: HashSet<String>,
    /// Per-ticker quantity scaler in (0, 1].
    pub risky_multipliers: HashMap<String, Decimal>,
    /// Margin safety factor applied to available balance.
    pub margin_safety_factor: Decimal,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            min_spread: dec!(3.0),
            max_allowed_spread: dec!(30.0),
            close_spread: dec!(0.5),
            leverage: 3,
            max_concurrent_trades: 1,
            max_single_trade_notional: dec!(3.0),
            max_daily_loss: dec!(50.0),
            max_hold_time_secs: 1800,
            trailing_stop_enabled: true,
            trailing_start: dec!(0.5),
            trailing_levels: vec![(60, dec!(0.90)), (180, dec!(0.80)), (600, dec!(0.70))],
            commission_rate: dec!(0.0006),
            symbol_blacklist: HashSet::new(),
            risky_multipliers: HashMap::new(),
            margin_safety_factor: dec!(0.9),
        }
    }
}

impl TradingConfig {
    pub fn max_hold_time(&self) -> Duration {
        Duration::from_secs(self.max_hold_time_secs)
    }

    /// Trailing keep-ratio for a given hold duration, once armed.
    ///
    /// Returns `None` below the first threshold.
    pub fn keep_ratio(&self, elapsed: Duration) -> Option<Decimal> {
        let secs = elapsed.as_secs();
        self.trailing_levels
            .iter()
            .filter(|(threshold, _)| secs >= *threshold)
            .max_by_key(|(threshold, _)| *threshold)
            .map(|(_, ratio)| *ratio)
    }

    /// Quantity scaler for a ticker; 1 when not listed as risky.
    pub fn risk_multiplier(&self, symbol: &str) -> Decimal {
        self.risky_multipliers
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ONE)
    }
}

/// Price stream behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum acceptable quote age at the point of use, in milliseconds.
    pub freshness_ms: u64,
    /// Cache poll interval inside `quote_blocking`, in milliseconds.
    pub poll_interval_ms: u64,
    /// Initial watch-task reconnect delay, in milliseconds.
    pub backoff_initial_ms: u64,
    /// Reconnect delay cap, in milliseconds.
    pub backoff_max_ms: u64,
    /// Per-task timeout for parallel symbol resolution, in seconds.
    pub resolve_timeout_secs: u64,
    /// How long admission waits for a quote to appear, in seconds.
    pub acquire_timeout_secs: u64,
    /// One-shot REST fallback timeout, in seconds.
    pub rest_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            freshness_ms: 3_000,
            poll_interval_ms: 200,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 8_000,
            resolve_timeout_secs: 10,
            acquire_timeout_secs: 5,
            rest_timeout_secs: 10,
        }
    }
}

impl StreamConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Trade lifecycle timing and retry bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Monitoring loop tick, in seconds.
    pub monitor_tick_secs: u64,
    /// Total deadline for the opening phase, in seconds.
    pub opening_deadline_secs: u64,
    /// Total deadline for the closing and settling phases, in seconds.
    pub closing_deadline_secs: u64,
    /// Closing-order poll interval while settling, in milliseconds.
    pub settle_poll_ms: u64,
    /// Bounded retry attempts for order placement and cancellation.
    pub order_retry_attempts: u32,
    /// Base delay between order retries, in milliseconds.
    pub order_retry_base_ms: u64,
    /// Attempts at placing a closing leg with widening price offsets.
    pub close_retry_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            monitor_tick_secs: 5,
            opening_deadline_secs: 30,
            closing_deadline_secs: 120,
            settle_poll_ms: 500,
            order_retry_attempts: 3,
            order_retry_base_ms: 500,
            close_retry_attempts: 3,
        }
    }
}

/// Balance reconciliation cadence and venue health thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub interval_secs: u64,
    /// Consecutive failures before a venue is reported disabled.
    pub max_failures_before_disable: u32,
    /// Balance fetch timeout, in seconds.
    pub balance_timeout_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            max_failures_before_disable: 5,
            balance_timeout_secs: 15,
        }
    }
}

/// Signal routing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Identifiers of the chat channels the transport should monitor.
    pub monitor_channels: Vec<String>,
    /// Dedup cache TTL, in seconds.
    pub dedup_ttl_secs: u64,
    /// Dedup cache capacity.
    pub dedup_capacity: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            monitor_channels: Vec::new(),
            dedup_ttl_secs: 60,
            dedup_capacity: 256,
        }
    }
}

/// Persisted state location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    pub state_path: PathBuf,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("spreadhound_state.json"),
        }
    }
}

/// One venue's adapter selection and credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Adapter kind: `bybit` or `paper`.
    pub adapter: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Taker fee override; falls back to `trading.commission_rate`.
    #[serde(default)]
    pub commission_rate: Option<Decimal>,
    /// Signed-request receive window, in milliseconds.
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_recv_window() -> u64 {
    60_000
}

impl Config {
    /// Load, apply env overrides, and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string without touching the environment.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Default config location: `$XDG_CONFIG_HOME/spreadhound/config.toml`,
    /// falling back to `config.toml` in the working directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("spreadhound").join("config.toml"))
            .filter(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Credentials from `SPREADHOUND_<VENUE>_API_KEY` / `_API_SECRET` win
    /// over values in the file.
    fn apply_env_overrides(&mut self) {
        for (name, venue) in self.venues.iter_mut() {
            let prefix = format!("SPREADHOUND_{}", name.to_uppercase());
            if let Ok(key) = std::env::var(format!("{prefix}_API_KEY")) {
                venue.api_key = Some(key);
            }
            if let Ok(secret) = std::env::var(format!("{prefix}_API_SECRET")) {
                venue.api_secret = Some(secret);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let t = &self.trading;
        if t.min_spread <= Decimal::ZERO {
            return Err(ConfigError::Invalid("min_spread must be positive".into()).into());
        }
        if t.max_allowed_spread < t.min_spread {
            return Err(
                ConfigError::Invalid("max_allowed_spread must be >= min_spread".into()).into(),
            );
        }
        if t.close_spread >= t.min_spread {
            return Err(ConfigError::Invalid("close_spread must be < min_spread".into()).into());
        }
        if t.leverage == 0 {
            return Err(ConfigError::Invalid("leverage must be at least 1".into()).into());
        }
        if t.max_concurrent_trades == 0 {
            return Err(
                ConfigError::Invalid("max_concurrent_trades must be at least 1".into()).into(),
            );
        }
        for (symbol, mult) in &t.risky_multipliers {
            if *mult <= Decimal::ZERO || *mult > Decimal::ONE {
                return Err(ConfigError::Invalid(format!(
                    "risky multiplier for {symbol} must be in (0, 1]"
                ))
                .into());
            }
        }
        let enabled = self.venues.values().filter(|v| v.enabled).count();
        if enabled < 2 {
            return Err(
                ConfigError::Invalid("at least two enabled venues are required".into()).into(),
            );
        }
        for (name, venue) in &self.venues {
            match venue.adapter.as_str() {
                "bybit" | "paper" => {}
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "venue {name}: unknown adapter '{other}'"
                    ))
                    .into())
                }
            }
        }
        Ok(())
    }

    /// Taker fee for a venue, honoring the per-venue override.
    pub fn commission_rate(&self, venue: &str) -> Decimal {
        self.venues
            .get(venue)
            .and_then(|v| v.commission_rate)
            .unwrap_or(self.trading.commission_rate)
    }

    /// Initialize the global tracing subscriber from the logging section.
    pub fn init_logging(&self) {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.logging.level.clone()));

        if self.logging.format == "json" {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [venues.alpha]
        adapter = "paper"

        [venues.beta]
        adapter = "paper"
    "#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = Config::parse_toml(MINIMAL).unwrap();
        assert_eq!(config.trading.min_spread, dec!(3.0));
        assert_eq!(config.trading.max_concurrent_trades, 1);
        assert_eq!(config.stream.freshness_ms, 3_000);
        assert_eq!(config.reconciler.interval_secs, 10);
    }

    #[test]
    fn rejects_single_venue() {
        let toml = r#"
            [venues.alpha]
            adapter = "paper"
        "#;
        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn rejects_unknown_adapter() {
        let toml = r#"
            [venues.alpha]
            adapter = "paper"

            [venues.beta]
            adapter = "nope"
        "#;
        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn rejects_close_spread_at_or_above_min() {
        let toml = r#"
            [trading]
            min_spread = 2.0
            close_spread = 2.0

            [venues.alpha]
            adapter = "paper"

            [venues.beta]
            adapter = "paper"
        "#;
        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn keep_ratio_steps_down_over_time() {
        let t = TradingConfig::default();
        assert_eq!(t.keep_ratio(Duration::from_secs(30)), None);
        assert_eq!(t.keep_ratio(Duration::from_secs(60)), Some(dec!(0.90)));
        assert_eq!(t.keep_ratio(Duration::from_secs(200)), Some(dec!(0.80)));
        assert_eq!(t.keep_ratio(Duration::from_secs(4000)), Some(dec!(0.70)));
    }

    #[test]
    fn commission_rate_honors_override() {
        let toml = r#"
            [venues.alpha]
            adapter = "paper"
            commission_rate = 0.001

            [venues.beta]
            adapter = "paper"
        "#;
        let config = Config::parse_toml(toml).unwrap();
        assert_eq!(config.commission_rate("alpha"), dec!(0.001));
        assert_eq!(config.commission_rate("beta"), dec!(0.0006));
    }
}
