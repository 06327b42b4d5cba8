//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::Result;

#[derive(Debug, Parser)]
#[command(name = "spreadhound", version, about = "Cross-exchange arbitrage executor")]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the executor (default).
    Run,
    /// Load and validate the config, then print a summary.
    CheckConfig,
    /// Parse one signal message and print what the router extracted.
    ParseSignal {
        /// Message text; reads stdin to EOF when omitted.
        #[arg(long)]
        message: Option<String>,
    },
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }
}

/// `check-config`: validate and summarize.
pub fn check_config(path: &PathBuf) -> Result<()> {
    let config = Config::load(path)?;
    println!("config ok: {}", path.display());
    println!("  venues:");
    for (name, venue) in &config.venues {
        println!(
            "    {name}: adapter={} enabled={} credentials={}",
            venue.adapter,
            venue.enabled,
            if venue.api_key.is_some() { "set" } else { "missing" },
        );
    }
    println!(
        "  trading: min_spread={}% close_spread={}% leverage={}x max_trades={}",
        config.trading.min_spread,
        config.trading.close_spread,
        config.trading.leverage,
        config.trading.max_concurrent_trades,
    );
    println!(
        "  caps: per-leg notional ${} daily loss ${}",
        config.trading.max_single_trade_notional, config.trading.max_daily_loss,
    );
    if !config.signals.monitor_channels.is_empty() {
        println!("  channels: {}", config.signals.monitor_channels.join(", "));
    }
    Ok(())
}

/// `parse-signal`: run one message through the parser and report.
pub fn parse_signal(message: &str) {
    match crate::signal::parse(message) {
        Some(event) => {
            println!("signal: {}", event.symbol);
            println!("  reported spread: {}%", event.spread);
            for (venue, price) in &event.prices {
                println!("  {venue}: ${price}");
            }
            match event.ref_price {
                Some(reference) => println!("  reference price: ${reference}"),
                None => println!("  reference price: none"),
            }
        }
        None => println!("not an arbitrage signal"),
    }
}
