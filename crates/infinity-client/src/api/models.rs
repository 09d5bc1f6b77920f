//! Request and response bodies of the conference client API.

use crate::errors::IdentityProvider;
use common::secret::SecretString;
use common::types::{CallId, ParticipantId, Role};
use serde::{Deserialize, Deserializer, Serialize};

/// Response envelope. Some API generations include a `status` field.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub status: Option<String>,
    pub result: T,
}

/// Body of `request_token`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenRequestFields {
    /// Name by which the participant is known in the conference.
    pub display_name: String,

    /// Target conference when joining through a virtual reception.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conference_extension: Option<String>,

    /// Identity provider chosen for SSO.
    #[serde(rename = "chosen_idp", skip_serializing_if = "Option::is_none")]
    pub chosen_idp_id: Option<String>,

    /// Token returned by the SSO flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sso_token: Option<String>,

    /// Whether the client supports direct media.
    pub direct_media: bool,
}

/// STUN server advertised with a token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StunServer {
    pub url: String,
}

/// TURN server advertised with a token.
#[derive(Clone, Deserialize)]
pub struct TurnServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: SecretString,
}

impl std::fmt::Debug for TurnServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnServer")
            .field("urls", &self.urls)
            .field("username", &self.username)
            .field("credential", &"[REDACTED]")
            .finish()
    }
}

/// Successful `request_token` result.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub token: SecretString,
    #[serde(deserialize_with = "deserialize_seconds")]
    pub expires: u64,
    pub participant_uuid: ParticipantId,
    pub role: Role,
    pub display_name: String,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub conference_name: String,
    #[serde(default)]
    pub stun: Vec<StunServer>,
    #[serde(default)]
    pub turn: Vec<TurnServer>,
    #[serde(default)]
    pub chat_enabled: bool,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token", &"[REDACTED]")
            .field("expires", &self.expires)
            .field("participant_uuid", &self.participant_uuid)
            .field("role", &self.role)
            .field("display_name", &self.display_name)
            .field("conference_name", &self.conference_name)
            .finish_non_exhaustive()
    }
}

/// `refresh_token` result.
#[derive(Clone, Deserialize)]
pub struct RefreshTokenResponse {
    pub token: SecretString,
    #[serde(deserialize_with = "deserialize_seconds")]
    pub expires: u64,
}

impl std::fmt::Debug for RefreshTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenResponse")
            .field("token", &"[REDACTED]")
            .field("expires", &self.expires)
            .finish()
    }
}

/// Structured body of a 403 `request_token` response.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRejection {
    #[serde(default)]
    pub guest_pin: Option<String>,
    #[serde(default)]
    pub conference_extension: Option<String>,
    #[serde(default)]
    pub idp: Option<Vec<IdentityProvider>>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub redirect_idp: Option<IdentityProvider>,
}

/// Body of `participants/{id}/calls`.
#[derive(Debug, Clone, Serialize)]
pub struct CallRequest {
    pub call_type: &'static str,
    pub sdp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub present: Option<String>,
}

/// Result of `participants/{id}/calls`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CallResponse {
    pub call_uuid: CallId,
    pub sdp: String,
}

/// Body of `calls/{id}/update` and `calls/{id}/ack`.
#[derive(Debug, Clone, Serialize)]
pub struct SdpBody {
    pub sdp: String,
}

/// Body of `calls/{id}/new_candidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateRequest {
    pub candidate: String,
    pub mid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ufrag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwd: Option<String>,
}

/// Body of `message`.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub payload: String,
}

/// Accept a lifetime in seconds encoded as a number or a numeric string.
fn deserialize_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Integer(u64),
        Float(f64),
        Text(String),
    }

    let seconds = match Seconds::deserialize(deserializer)? {
        Seconds::Integer(v) => return Ok(v),
        Seconds::Float(v) => v,
        Seconds::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid expires value {s:?}")))?,
    };

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "invalid expires value {seconds}"
        )));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(seconds.floor() as u64)
}
