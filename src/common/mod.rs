//! Common utilities and types shared across gantry

pub mod auth;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod store;
pub mod utils;

pub use auth::{forge_token, parse_token, Auth, Claims};
pub use config::Config;
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use store::{MemoryStore, RedisStore, SharedStore, Store};
pub use utils::{content_hash, epoch, epoch_secs, file_hash, short_hostname};
