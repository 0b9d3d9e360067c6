//! Cluster coordination: heartbeat, master election, hot-reload detection

pub mod discovery;
pub mod runner;
pub mod state;

pub use discovery::ServiceStore;
pub use runner::Runner;
pub use state::{State, ACTIVE_THRESHOLD_SECS, MASTER_KEY, RESTART_KEY};
