//! Application wiring and supervision.

mod state;
mod supervisor;

pub use state::{AppState, BalanceEntry, SessionStats};
pub use supervisor::Supervisor;
