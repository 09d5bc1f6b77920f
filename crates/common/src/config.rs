//! Common configuration types for Infinity client components.

use serde::{Deserialize, Serialize};

/// Default filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error, or an `EnvFilter` expression)
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// Set the log filter directive.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable or disable JSON output.
    #[must_use]
    pub fn with_json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = enabled;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_builders() {
        let config = ObservabilityConfig::default()
            .with_log_level("infinity_client=trace")
            .with_json_logs(true);
        assert_eq!(config.log_level, "infinity_client=trace");
        assert!(config.json_logs);
    }

    #[test]
    fn test_deserialize() {
        let config: ObservabilityConfig =
            serde_json::from_str(r#"{"log_level":"debug","json_logs":true}"#).unwrap();
        assert_eq!(config, ObservabilityConfig::default().with_log_level("debug").with_json_logs(true));
    }
}
