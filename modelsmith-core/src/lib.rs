//! # modelsmith-core
//!
//! Process-wide plumbing shared by the modelsmith crates:
//! layered configuration loading, tracing subscriber setup and
//! crash-safe JSON persistence.

pub mod config;
pub mod logging;
pub mod persistence;

pub use config::{config_exists, load_layered};
pub use logging::{LoggingError, LoggingOptions, init_tracing};
pub use persistence::{atomic_write_json, load_json};
