//! Tracing subscriber setup.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use selfreg_types::{Result, SelfRegError};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines for terminals.
    #[default]
    Pretty,
    /// One JSON object per line for log shippers.
    Json,
}

impl FromStr for LogFormat {
    type Err = SelfRegError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(SelfRegError::Configuration(format!(
                "unknown log format '{other}'"
            ))),
        }
    }
}

/// Filter from `RUST_LOG`, falling back to `info`.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// # Errors
/// `Configuration` if a global subscriber is already installed.
pub fn init(format: LogFormat) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter());
    let installed = match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    installed.map_err(|e| SelfRegError::Configuration(format!("tracing init failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parses() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
        let parsed: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(parsed, LogFormat::Json);
    }

    #[test]
    fn second_init_is_an_error_not_a_panic() {
        let _ = init(LogFormat::Pretty);
        assert!(matches!(
            init(LogFormat::Json),
            Err(SelfRegError::Configuration(_))
        ));
    }
}
