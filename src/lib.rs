//! spreadhound - cross-exchange futures arbitrage executor.
//!
//! External signal channels announce a symbol with quoted prices on two
//! venues. The system verifies the opportunity against live market data,
//! opens a delta-neutral pair of leveraged futures positions, monitors it,
//! and unwinds under one of several closing conditions.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── domain/       # Pure domain types
//! ├── exchange/     # Venue adapter contract + implementations
//! ├── stream/       # Multi-venue price fan-in
//! ├── signal/       # Signal parsing and routing
//! ├── filter/       # Opportunity admission
//! ├── coordinator/  # Trade lifecycle state machine
//! ├── reconciler/   # Balance reconciliation and venue health
//! └── app/          # Supervisor and shared state
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod filter;
pub mod health;
pub mod persist;
pub mod reconciler;
pub mod signal;
pub mod stream;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
