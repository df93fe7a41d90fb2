//! Tracing/logging initialization.
//!
//! Filtering always comes from `RUST_LOG` (default `info`); only the output
//! format varies.

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const FORMAT_VAR: &str = "LPNFLOW_LOG_FORMAT";

/// Output format of the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line, for log shipping.
    #[default]
    Json,
    /// Multi-line human-readable output for local development.
    Pretty,
}

impl LogFormat {
    /// Read `LPNFLOW_LOG_FORMAT`; unknown or missing values select JSON.
    pub fn from_env() -> Self {
        std::env::var(FORMAT_VAR)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

impl core::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber, reporting whether one was already set.
pub fn try_init_with(format: LogFormat) -> Result<(), InitError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .with_target(false);

    let result = match format {
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_current_span(true)
            .try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    result.map_err(|e| InitError::AlreadyInstalled(e.to_string()))
}

/// Install the global subscriber. Subsequent calls are no-ops.
pub fn init_with(format: LogFormat) {
    let _ = try_init_with(format);
}

/// Compact output routed through the test harness's captured writer.
///
/// Defaults to `warn` so passing tests stay quiet; `RUST_LOG` overrides.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("warn"))
        .with_test_writer()
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_formats_case_insensitively() {
        assert_eq!(" Pretty ".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn deserializes_lowercase_names() {
        let format: LogFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(format, LogFormat::Pretty);
        assert_eq!(LogFormat::default(), LogFormat::Json);
    }

    #[test]
    fn repeated_initialization_is_harmless() {
        init_for_tests();
        init_for_tests();
        init_with(LogFormat::Json);
        assert!(try_init_with(LogFormat::Pretty).is_err());
        ::tracing::info!("still logging");
    }
}
