//! # gantry
//!
//! Middleware and cluster coordination for cooperating service nodes:
//! - Every exposed operation runs through a fixed shim pipeline
//!   (auth, threading, caching, response normalization)
//! - Nodes heartbeat and elect a master through a shared key-value store
//! - Service backing files are polled for changes to trigger hot reloads
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Node 1     │   │   Node 2     │   │   Node 3     │
//! │  dispatcher  │   │  dispatcher  │   │  dispatcher  │
//! │  + shims     │   │  + shims     │   │  + shims     │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │    heartbeats / election / cache    │
//!        └──────────────────┼──────────────────┘
//!                  ┌────────▼────────┐
//!                  │  shared store   │
//!                  │ (Redis, TTLs)   │
//!                  └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a node
//! ```bash
//! gantry-node serve --node node-1 --cluster prod --autoreload
//! ```
//!
//! ### Use the CLI
//! ```bash
//! # Cluster overview
//! gantry status
//!
//! # Mint a token
//! gantry forge-token --tenant acme --username alice --roles admin
//!
//! # Ask every node to rebuild its services
//! gantry restart
//! ```

pub mod cluster;
pub mod common;
pub mod service;
pub mod services;

// Re-export commonly used types
pub use common::{Config, Envelope, Error, Result};
pub use service::{CallValue, Dispatcher, Service};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
