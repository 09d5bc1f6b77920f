//! Probe configuration.
//!
//! Extends the client's `INFINITY_*` variables with what the probe needs
//! to join: the conference address, a display name and an optional PIN.

use common::config::ObservabilityConfig;
use common::secret::SecretString;
use common::types::ConferenceAddress;
use infinity_client::config::ConfigError as ClientConfigError;
use infinity_client::ClientConfig;
use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "infinity_client=debug,infinity_probe=debug";

/// Display name used when `INFINITY_DISPLAY_NAME` is unset.
pub const DEFAULT_DISPLAY_NAME: &str = "Infinity Probe";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid conference address: {0}")]
    InvalidAddress(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error(transparent)]
    Client(#[from] ClientConfigError),
}

/// Everything the probe reads from the environment.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub client: ClientConfig,
    pub address: ConferenceAddress,
    pub display_name: String,
    pub pin: Option<SecretString>,
    pub conference_extension: Option<String>,
    pub observability: ObservabilityConfig,
}

impl ProbeConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`ProbeConfig::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingEnvVar` if `INFINITY_CONFERENCE` is unset
    /// - `ConfigError::InvalidAddress` if it is not `alias@host`
    /// - `ConfigError::InvalidValue` if `INFINITY_LOG_JSON` is not a boolean
    /// - `ConfigError::Client` for invalid client settings
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let raw_address = vars
            .get("INFINITY_CONFERENCE")
            .ok_or_else(|| ConfigError::MissingEnvVar("INFINITY_CONFERENCE".to_string()))?;
        let address = ConferenceAddress::parse(raw_address)
            .map_err(|e| ConfigError::InvalidAddress(format!("{raw_address}: {e}")))?;

        let display_name = vars
            .get("INFINITY_DISPLAY_NAME")
            .filter(|name| !name.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

        let json_logs = match vars.get("INFINITY_LOG_JSON").map(|v| v.trim().to_ascii_lowercase()) {
            None => false,
            Some(v) if v == "1" || v == "true" => true,
            Some(v) if v == "0" || v == "false" => false,
            Some(v) => return Err(ConfigError::InvalidValue(format!("INFINITY_LOG_JSON={v}"))),
        };

        let log_level = vars
            .get("RUST_LOG")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            client: ClientConfig::from_vars(vars)?,
            address,
            display_name,
            pin: vars.get("INFINITY_PIN").cloned().map(SecretString::from),
            conference_extension: vars.get("INFINITY_CONFERENCE_EXTENSION").cloned(),
            observability: ObservabilityConfig::default()
                .with_log_level(log_level)
                .with_json_logs(json_logs),
        })
    }
}
