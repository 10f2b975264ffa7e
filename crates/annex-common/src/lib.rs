//! # Annex Common
//!
//! Logging configuration shared by the Annex crates.

pub mod logging;

pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};
