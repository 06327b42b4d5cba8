//! Test support: a wired-up paper-venue world and signal builders.
//!
//! Compiled for unit tests and behind the `testkit` feature for
//! integration tests.

pub mod signals;
pub mod world;

pub use signals::signal_message;
pub use world::TestWorld;
