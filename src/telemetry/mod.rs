//! Telemetry module.
//!
//! Provides logging configuration and subscriber initialization. The
//! allocators themselves only emit `tracing` events.

mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};
