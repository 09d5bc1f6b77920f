//! Common data types for Infinity client components.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced when parsing a [`ConferenceAddress`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The address has no `@` separator.
    #[error("Conference address is missing the '@' separator")]
    MissingSeparator,

    /// The address has more than one `@` separator.
    #[error("Conference address contains more than one '@' separator")]
    MultipleSeparators,

    /// The part before `@` is empty.
    #[error("Conference alias is empty")]
    EmptyAlias,

    /// The part after `@` is empty.
    #[error("Conference host is empty")]
    EmptyHost,

    /// Whitespace or a control character appears in the address.
    #[error("Conference address contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// A conference address of the form `alias@host`.
///
/// The alias names the conference on the node; the host is the domain used
/// for node discovery. Once parsed the address is immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConferenceAddress {
    alias: String,
    host: String,
}

impl ConferenceAddress {
    /// Parse an `alias@host` string.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] unless the input has exactly one `@` with
    /// non-empty text on both sides and no whitespace or control characters.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        if let Some(c) = input
            .chars()
            .find(|c| c.is_whitespace() || c.is_control())
        {
            return Err(AddressError::InvalidCharacter(c));
        }

        let mut parts = input.split('@');
        let (Some(alias), Some(host)) = (parts.next(), parts.next()) else {
            return Err(AddressError::MissingSeparator);
        };
        if parts.next().is_some() {
            return Err(AddressError::MultipleSeparators);
        }

        Self::new(alias, host)
    }

    /// Build an address from its two components.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] if either part is empty or contains `@`.
    pub fn new(alias: impl Into<String>, host: impl Into<String>) -> Result<Self, AddressError> {
        let alias = alias.into();
        let host = host.into();

        if alias.is_empty() {
            return Err(AddressError::EmptyAlias);
        }
        if host.is_empty() {
            return Err(AddressError::EmptyHost);
        }
        if alias.contains('@') || host.contains('@') {
            return Err(AddressError::MultipleSeparators);
        }

        Ok(Self { alias, host })
    }

    /// Conference alias (the part before `@`).
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Discovery host (the part after `@`).
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Display for ConferenceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.alias, self.host)
    }
}

impl FromStr for ConferenceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ConferenceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConferenceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Unique identifier for a conference participant, issued by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Create a new random participant ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a media call within a participant's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub Uuid);

impl CallId {
    /// Create a new random call ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Role granted to a participant by the conference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Host,
    Guest,
}
