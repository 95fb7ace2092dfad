//! Logging configuration and initialization.
//!
//! Provides flexible logging setup with support for:
//! - Environment variable (RUST_LOG) configuration
//! - The `[log]` table of config.toml
//! - Multiple output formats (pretty, compact, json)

use serde::Deserialize;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info";

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Logging configuration from config.toml.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level or full filter directive, e.g. `debug` or `leasenat=trace`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_DIRECTIVE.to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Initializes the logging system.
///
/// Priority:
/// 1. RUST_LOG environment variable (if set)
/// 2. config parameter (if provided)
/// 3. Default: info level, pretty format
///
/// Calling it twice is harmless; the first subscriber stays installed.
///
/// # Examples
///
/// ```ignore
/// let config = LogConfig { level: "debug".into(), format: LogFormat::Json };
/// init_logging(Some(&config));
/// ```
pub fn init_logging(config: Option<&LogConfig>) {
    let filter = build_filter(config, std::env::var("RUST_LOG").ok().as_deref());
    let format = config.map(|c| c.format).unwrap_or_default();

    let registry = tracing_subscriber::registry().with(filter);
    let _ = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE),
            ),
        ),
        LogFormat::Compact => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().compact()),
        ),
        LogFormat::Pretty => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer()),
        ),
    };
}

/// Pick the filter directive: env override, then config, then the default.
/// Unparseable directives fall back to the default.
fn build_filter(config: Option<&LogConfig>, env: Option<&str>) -> EnvFilter {
    let directive = env
        .filter(|d| !d.trim().is_empty())
        .or_else(|| config.map(|c| c.level.as_str()))
        .unwrap_or(DEFAULT_DIRECTIVE);

    EnvFilter::try_new(directive.to_lowercase())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}
