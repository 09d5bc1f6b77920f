//! Infinity client configuration.
//!
//! Configuration is loaded from `INFINITY_*` environment variables or built
//! directly with the `with_*` setters. Nothing else in the crate reads the
//! environment.

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default DNS lookup timeout in seconds.
pub const DEFAULT_DNS_TIMEOUT_SECONDS: u64 = 5;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// Default HTTP connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 5;

/// Default base reconnect delay for the event stream in milliseconds.
pub const DEFAULT_EVENT_BASE_DELAY_MS: u64 = 1000;

/// Default maximum reconnect delay for the event stream in milliseconds.
pub const DEFAULT_EVENT_MAX_DELAY_MS: u64 = 5000;

/// Default number of consecutive reconnect attempts.
pub const DEFAULT_EVENT_MAX_RETRIES: u32 = 3;

/// Default fraction of the reconnect delay subject to random jitter.
pub const DEFAULT_EVENT_JITTER: f64 = 0.2;

/// Default time `deactivate` waits for the release call, in milliseconds.
pub const DEFAULT_RELEASE_GRACE_PERIOD_MS: u64 = 2000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// DNS discovery settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DnsConfig {
    /// Recursive resolver queried for SRV and A records. `None` uses the
    /// nameservers of the system resolver configuration.
    pub nameserver: Option<SocketAddr>,
    /// Per-lookup timeout.
    pub timeout: Duration,
    /// Require authenticated (DNSSEC validated) answers.
    pub dnssec: bool,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            nameserver: None,
            timeout: Duration::from_secs(DEFAULT_DNS_TIMEOUT_SECONDS),
            dnssec: false,
        }
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Sent as `User-Agent` on every request.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECONDS),
            user_agent: default_user_agent(),
        }
    }
}

/// Event stream reconnect policy.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSourceConfig {
    /// Delay multiplied by the attempt number.
    pub base_delay: Duration,
    /// Upper bound for any reconnect delay.
    pub max_delay: Duration,
    /// Consecutive failed attempts tolerated before the error is surfaced.
    pub max_retries: u32,
    /// Fraction (0.0..=1.0) of each delay that may be shaved off at random.
    pub jitter: f64,
}

impl Default for EventSourceConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_EVENT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_EVENT_MAX_DELAY_MS),
            max_retries: DEFAULT_EVENT_MAX_RETRIES,
            jitter: DEFAULT_EVENT_JITTER,
        }
    }
}

/// Token session settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenConfig {
    /// How long `deactivate` waits for the release call before returning.
    pub release_grace_period: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            release_grace_period: Duration::from_millis(DEFAULT_RELEASE_GRACE_PERIOD_MS),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    pub dns: DnsConfig,
    pub http: HttpConfig,
    pub events: EventSourceConfig,
    pub token: TokenConfig,
}

fn default_user_agent() -> String {
    format!("infinity-client/{}", env!("CARGO_PKG_VERSION"))
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
        None => Ok(default),
    }
}

fn parse_bool(vars: &HashMap<String, String>, name: &str) -> Result<bool, ConfigError> {
    match vars.get(name).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if v == "1" || v == "true" || v == "yes" || v == "on" => Ok(true),
        Some(v) if v == "0" || v == "false" || v == "no" || v == "off" => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(format!("{name}={v}"))),
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed
    /// or a duration/retry bound is out of range.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let nameserver = vars
            .get("INFINITY_DNS_NAMESERVER")
            .map(|raw| parse_nameserver(raw))
            .transpose()?;

        let dns = DnsConfig {
            nameserver,
            timeout: Duration::from_secs(parse_var(
                vars,
                "INFINITY_DNS_TIMEOUT_SECONDS",
                DEFAULT_DNS_TIMEOUT_SECONDS,
            )?),
            dnssec: parse_bool(vars, "INFINITY_DNSSEC")?,
        };

        let http = HttpConfig {
            request_timeout: Duration::from_secs(parse_var(
                vars,
                "INFINITY_REQUEST_TIMEOUT_SECONDS",
                DEFAULT_REQUEST_TIMEOUT_SECONDS,
            )?),
            connect_timeout: Duration::from_secs(parse_var(
                vars,
                "INFINITY_CONNECT_TIMEOUT_SECONDS",
                DEFAULT_CONNECT_TIMEOUT_SECONDS,
            )?),
            user_agent: vars
                .get("INFINITY_USER_AGENT")
                .cloned()
                .unwrap_or_else(default_user_agent),
        };

        let events = EventSourceConfig {
            base_delay: Duration::from_millis(parse_var(
                vars,
                "INFINITY_EVENTS_BASE_DELAY_MS",
                DEFAULT_EVENT_BASE_DELAY_MS,
            )?),
            max_delay: Duration::from_millis(parse_var(
                vars,
                "INFINITY_EVENTS_MAX_DELAY_MS",
                DEFAULT_EVENT_MAX_DELAY_MS,
            )?),
            max_retries: parse_var(vars, "INFINITY_EVENTS_MAX_RETRIES", DEFAULT_EVENT_MAX_RETRIES)?,
            jitter: parse_var(vars, "INFINITY_EVENTS_JITTER", DEFAULT_EVENT_JITTER)?,
        };

        let token = TokenConfig {
            release_grace_period: Duration::from_millis(parse_var(
                vars,
                "INFINITY_RELEASE_GRACE_PERIOD_MS",
                DEFAULT_RELEASE_GRACE_PERIOD_MS,
            )?),
        };

        let config = Self {
            dns,
            http,
            events,
            token,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dns.timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "DNS timeout must be greater than zero".to_string(),
            ));
        }
        if self.events.base_delay > self.events.max_delay {
            return Err(ConfigError::InvalidValue(format!(
                "event base delay {:?} exceeds max delay {:?}",
                self.events.base_delay, self.events.max_delay
            )));
        }
        if !(0.0..=1.0).contains(&self.events.jitter) {
            return Err(ConfigError::InvalidValue(format!(
                "event jitter {} must be within 0.0..=1.0",
                self.events.jitter
            )));
        }
        Ok(())
    }

    /// Require DNSSEC-authenticated answers.
    #[must_use]
    pub fn with_dnssec(mut self, enabled: bool) -> Self {
        self.dns.dnssec = enabled;
        self
    }

    /// Query `nameserver` instead of the system configuration.
    #[must_use]
    pub fn with_nameserver(mut self, nameserver: SocketAddr) -> Self {
        self.dns.nameserver = Some(nameserver);
        self
    }

    /// Set the DNS lookup timeout.
    #[must_use]
    pub fn with_dns_timeout(mut self, timeout: Duration) -> Self {
        self.dns.timeout = timeout;
        self
    }

    /// Set the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.http.request_timeout = timeout;
        self
    }

    /// Set the user agent sent on every request.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.http.user_agent = user_agent.into();
        self
    }

    /// Replace the event stream reconnect policy.
    #[must_use]
    pub fn with_event_source(mut self, events: EventSourceConfig) -> Self {
        self.events = events;
        self
    }

    /// Set the release grace period.
    #[must_use]
    pub fn with_release_grace_period(mut self, grace: Duration) -> Self {
        self.token.release_grace_period = grace;
        self
    }
}

fn parse_nameserver(raw: &str) -> Result<SocketAddr, ConfigError> {
    let raw = raw.trim();
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr);
    }
    raw.parse::<std::net::IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| ConfigError::InvalidValue(format!("INFINITY_DNS_NAMESERVER={raw}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_from_empty_environment() {
        let config = ClientConfig::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.dns.timeout, Duration::from_secs(5));
        assert!(!config.dns.dnssec);
        assert_eq!(config.http.request_timeout, Duration::from_secs(10));
        assert_eq!(config.http.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.events.base_delay, Duration::from_secs(1));
        assert_eq!(config.events.max_delay, Duration::from_secs(5));
        assert_eq!(config.events.max_retries, 3);
        assert_eq!(config.token.release_grace_period, Duration::from_secs(2));
        assert!(config.http.user_agent.starts_with("infinity-client/"));
        assert_eq!(config.dns.nameserver, None);
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_vars(&vars(&[
            ("INFINITY_DNS_NAMESERVER", "9.9.9.9"),
            ("INFINITY_DNS_TIMEOUT_SECONDS", "2"),
            ("INFINITY_DNSSEC", "true"),
            ("INFINITY_REQUEST_TIMEOUT_SECONDS", "30"),
            ("INFINITY_USER_AGENT", "probe/1.0"),
            ("INFINITY_EVENTS_BASE_DELAY_MS", "250"),
            ("INFINITY_EVENTS_MAX_DELAY_MS", "750"),
            ("INFINITY_EVENTS_MAX_RETRIES", "7"),
            ("INFINITY_EVENTS_JITTER", "0"),
            ("INFINITY_RELEASE_GRACE_PERIOD_MS", "100"),
        ]))
        .unwrap();

        assert_eq!(config.dns.nameserver, Some("9.9.9.9:53".parse().unwrap()));
        assert_eq!(config.dns.timeout, Duration::from_secs(2));
        assert!(config.dns.dnssec);
        assert_eq!(config.http.request_timeout, Duration::from_secs(30));
        assert_eq!(config.http.user_agent, "probe/1.0");
        assert_eq!(config.events.base_delay, Duration::from_millis(250));
        assert_eq!(config.events.max_delay, Duration::from_millis(750));
        assert_eq!(config.events.max_retries, 7);
        assert!(config.events.jitter.abs() < f64::EPSILON);
        assert_eq!(config.token.release_grace_period, Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for (name, value) in [
            ("INFINITY_DNS_TIMEOUT_SECONDS", "soon"),
            ("INFINITY_DNS_TIMEOUT_SECONDS", "0"),
            ("INFINITY_DNSSEC", "maybe"),
            ("INFINITY_DNS_NAMESERVER", "not-an-ip"),
            ("INFINITY_EVENTS_MAX_RETRIES", "-1"),
            ("INFINITY_EVENTS_JITTER", "1.5"),
        ] {
            let result = ClientConfig::from_vars(&vars(&[(name, value)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{name}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_base_delay_above_max_rejected() {
        let result = ClientConfig::from_vars(&vars(&[
            ("INFINITY_EVENTS_BASE_DELAY_MS", "6000"),
            ("INFINITY_EVENTS_MAX_DELAY_MS", "5000"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_builders() {
        let config = ClientConfig::default()
            .with_dnssec(true)
            .with_dns_timeout(Duration::from_secs(1))
            .with_nameserver("127.0.0.53:53".parse().unwrap())
            .with_user_agent("embedded/2.0")
            .with_release_grace_period(Duration::ZERO);

        assert!(config.dns.dnssec);
        assert_eq!(config.dns.timeout, Duration::from_secs(1));
        assert_eq!(config.dns.nameserver, Some("127.0.0.53:53".parse().unwrap()));
        assert_eq!(config.http.user_agent, "embedded/2.0");
        assert_eq!(config.token.release_grace_period, Duration::ZERO);
    }
}
