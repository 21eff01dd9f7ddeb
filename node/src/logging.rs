//! # Structured Logging
//!
//! Initializes the `tracing` subscriber with a configurable format (JSON or
//! pretty-printed). `RUST_LOG` wins when set; otherwise the filter is the
//! `log_level` from the settings document.
//!
//! All log output is written to stderr.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "KVCHAIN_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored output.
    Pretty,
    /// JSON lines for log aggregation.
    Json,
}

impl LogFormat {
    /// Accepts "json" or "pretty" (case-insensitive). Anything else is `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }

    /// Format from [`LOG_FORMAT_ENV`], `Pretty` when unset.
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .map(|v| Self::from_str_lossy(&v))
            .unwrap_or(LogFormat::Pretty)
    }
}

/// Build the filter: `RUST_LOG`, else `default_level`, else `info`.
///
/// Returns the filter and, when `default_level` did not parse, the rejected
/// directive so the caller can warn once logging is up.
fn build_filter(default_level: &str) -> (EnvFilter, Option<String>) {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return (filter, None);
    }
    match EnvFilter::try_new(default_level) {
        Ok(filter) => (filter, None),
        Err(_) => (EnvFilter::new("info"), Some(default_level.to_string())),
    }
}

/// Initialize the global tracing subscriber.
///
/// Call this exactly once, early in `main()`. Subsequent calls will panic.
pub fn init_logging(default_level: &str, format: LogFormat) {
    let (env_filter, rejected) = build_filter(default_level);

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
                .init();
        }
    }

    if let Some(level) = rejected {
        tracing::warn!(log_level = %level, "invalid log_level in settings, using \"info\"");
    }
    tracing::info!("logging initialized (format={:?})", format);
}
