//! Infinity client error types.
//!
//! Each component surfaces its own error enum so callers can branch on the
//! failure instead of matching strings. [`JoinError::kind`] collapses the
//! facade-level failures into the categories a user interface needs.

use thiserror::Error;

/// Resource record decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload is shorter than the fixed record header.
    #[error("Record payload too short: need {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// An A record payload that is not exactly four bytes.
    #[error("Address record must be 4 bytes, got {0}")]
    InvalidAddressLength(usize),

    /// Length-prefixed label sequence is truncated, unterminated or not ASCII.
    #[error("Malformed label sequence at offset {offset}")]
    MalformedLabels { offset: usize },

    /// DNS message framing is invalid.
    #[error("Malformed DNS message: {0}")]
    MalformedMessage(String),
}

/// DNS resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    /// No answer arrived within the configured timeout.
    #[error("DNS lookup timed out")]
    Timeout,

    /// The server answered with a non-zero response code.
    #[error("DNS lookup failed with code {code}")]
    LookupFailed { code: u16 },

    /// Validation was requested but the answer was not authenticated.
    #[error("DNS response is not authenticated")]
    UnauthenticatedResponse,

    /// Socket level failure.
    #[error("DNS transport error: {0}")]
    Io(String),

    /// Answer could not be decoded.
    #[error("DNS decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// HTTP transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection could not be established or was interrupted.
    #[error("Request failed: {0}")]
    Request(String),

    /// Request exceeded the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// Response status outside the accepted range.
    #[error("Unexpected status code: {status}")]
    UnexpectedStatus { status: u16 },

    /// Response content type outside the accepted set.
    #[error("Unexpected content type: {content_type}")]
    UnexpectedContentType { content_type: String },

    /// Response body could not be decoded.
    #[error("Invalid response body: {0}")]
    InvalidBody(String),

    /// Request URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl TransportError {
    /// Status code carried by the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::UnexpectedStatus { status } => Some(*status),
            _ => None,
        }
    }

    /// Whether the server rejected the credential (401 or 403).
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_decode() {
            TransportError::InvalidBody(e.to_string())
        } else if e.is_builder() {
            TransportError::InvalidUrl(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::UnexpectedStatus {
                status: status.as_u16(),
            }
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// Node selection errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// Every candidate was unavailable, unknown or unreachable.
    #[error("No reachable node for {host}")]
    NoReachableNode { host: String },

    /// Address record lookup failed.
    #[error("Node discovery failed: {0}")]
    Dns(#[from] DnsError),

    /// Resolution was cancelled by the caller.
    #[error("Node resolution cancelled")]
    Cancelled,
}

/// SSO identity provider offered by a conference.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IdentityProvider {
    pub name: String,
    #[serde(rename = "uuid")]
    pub id: String,
}

/// Authentication rejections and failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// A PIN must be supplied. `guest_pin_required` is false when guests may
    /// join without one (by sending the PIN `"none"`).
    #[error("PIN required")]
    PinRequired { guest_pin_required: bool },

    /// The supplied PIN was rejected.
    #[error("Invalid PIN")]
    InvalidPin,

    /// The alias is a virtual reception; a target conference must be given.
    #[error("Conference extension required")]
    ExtensionRequired { kind: String },

    /// SSO is required; one of the listed providers must be chosen.
    #[error("SSO identity provider required")]
    SsoIdentityProviderRequired { providers: Vec<IdentityProvider> },

    /// Continue SSO at the given URL.
    #[error("SSO redirect required to {provider_name}")]
    SsoRedirect { url: String, provider_name: String },

    /// The node does not know the conference alias.
    #[error("Conference not found")]
    ConferenceNotFound,

    /// Credentials were rejected outright.
    #[error("Unauthorized")]
    Unauthorized,

    /// The response did not match any known shape.
    #[error("Malformed authentication response: {0}")]
    MalformedResponse(String),

    /// Transport failure while authenticating.
    #[error("Authentication transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Token session lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// `activate` was called on an active session.
    #[error("Token session already active")]
    AlreadyActive,

    /// The session was deactivated and cannot be reused.
    #[error("Token session already deactivated")]
    AlreadyDeactivated,

    /// `deactivate` was called before `activate`.
    #[error("Token session is not active")]
    NotActive,

    /// Storage holds no credential.
    #[error("No credential in storage")]
    MissingCredential,

    /// The stored credential expired before activation.
    #[error("Cannot activate an expired credential")]
    CredentialExpired,
}

/// Event stream errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The server answered the stream request with a non-success status.
    #[error("Event stream rejected with status {status}")]
    Http { status: u16 },

    /// Transport failure before or during the stream.
    #[error("Event stream transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server closed the stream.
    #[error("Event stream closed by server")]
    Ended,

    /// A line exceeded the parser's limit without a terminator.
    #[error("Event stream line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// Consecutive reconnect attempts were exhausted.
    #[error("Event stream gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<StreamError> },
}

impl StreamError {
    /// Status code of the terminating response, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Http { status } => Some(*status),
            StreamError::Transport(e) => e.status(),
            StreamError::RetriesExhausted { last, .. } => last.status(),
            StreamError::Ended | StreamError::LineTooLong { .. } => None,
        }
    }

    /// Whether the stream was terminated by a 401 or 403.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

/// Call signaling errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    /// The conference session is not active.
    #[error("Conference session is not active")]
    NotActive,

    /// No call has been started with `send`.
    #[error("No call in progress")]
    NoCall,

    /// The local description contained no ICE password.
    #[error("Local description has no ICE password")]
    MissingIcePassword,

    /// The candidate line has no ufrag or it does not match any known pwd.
    #[error("Candidate has no matching ICE ufrag")]
    UnknownUfrag,

    /// The stored credential has expired or was cleared.
    #[error("No valid credential to subscribe with")]
    CredentialUnavailable,

    /// Request failed.
    #[error("Signaling transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Failures of [`crate::signaling::SignalingClient::join`].
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("Node discovery failed: {0}")]
    Node(#[from] NodeError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Token session failed: {0}")]
    Session(#[from] SessionError),

    /// The caller cancelled the join.
    #[error("Join cancelled")]
    Cancelled,

    /// Join was called while another join is in progress or active.
    #[error("Join already in progress or completed")]
    InvalidState,
}

/// Failures building a [`crate::signaling::SignalingClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP client setup failed: {0}")]
    Transport(#[from] TransportError),

    #[error("DNS setup failed: {0}")]
    Dns(#[from] DnsError),
}

/// Coarse join failure category for user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinErrorKind {
    /// Address not found or no node reachable.
    NotFound,
    /// Authentication rejected.
    Rejected,
    /// Network or server fault.
    Network,
    /// Cancelled by the caller.
    Cancelled,
    /// Misuse of the API or an unexpected internal condition.
    Internal,
}

impl JoinError {
    /// Classify the failure.
    #[must_use]
    pub fn kind(&self) -> JoinErrorKind {
        match self {
            JoinError::Node(NodeError::NoReachableNode { .. })
            | JoinError::Auth(AuthError::ConferenceNotFound) => JoinErrorKind::NotFound,
            JoinError::Node(NodeError::Cancelled) | JoinError::Cancelled => JoinErrorKind::Cancelled,
            JoinError::Node(NodeError::Dns(_))
            | JoinError::Auth(AuthError::Transport(_) | AuthError::MalformedResponse(_)) => {
                JoinErrorKind::Network
            }
            JoinError::Auth(_) => JoinErrorKind::Rejected,
            JoinError::Session(_) | JoinError::InvalidState => JoinErrorKind::Internal,
        }
    }
}
