//! Typed conference events.
//!
//! Maps the named events of the conference `events` stream to
//! [`ConferenceEvent`]. Unknown names and undecodable payloads are logged
//! and skipped.

use super::StreamEvent;
use common::types::CallId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

/// Conference state flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConferenceStatus {
    pub started: bool,
    pub locked: bool,
    pub all_muted: bool,
    pub guests_muted: bool,
    pub presentation_allowed: bool,
    pub direct_media: bool,
    pub live_captions_available: bool,
}

/// Chat message broadcast to the conference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "origin")]
    pub sender_name: String,
    #[serde(rename = "uuid")]
    pub sender_id: String,
    #[serde(rename = "type", default = "default_message_type")]
    pub kind: String,
    pub payload: String,
}

fn default_message_type() -> String {
    "text/plain".to_string()
}

/// Remote session description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SdpMessage {
    pub sdp: String,
}

/// Remote ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub ufrag: Option<String>,
    #[serde(default)]
    pub pwd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresentationStart {
    #[serde(default)]
    pub presenter_name: String,
    #[serde(default)]
    pub presenter_uri: String,
}

/// Conference participant as reported by the roster events.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Participant {
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    /// `chair` or `guest`.
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub local_alias: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default, deserialize_with = "yes_no")]
    pub is_audio_muted: bool,
    #[serde(default)]
    pub is_video_muted: bool,
    #[serde(default, deserialize_with = "yes_no")]
    pub is_presenting: bool,
}

/// Accept `"YES"`/`"NO"` strings as well as booleans.
fn yes_no<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Text(value) => value.eq_ignore_ascii_case("yes"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParticipantDelete {
    #[serde(rename = "uuid")]
    pub id: String,
}

/// Transfer to another conference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Refer {
    pub token: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CallDisconnected {
    #[serde(rename = "call_uuid")]
    pub call_id: CallId,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Disconnect {
    #[serde(default)]
    pub reason: String,
}

/// Events published on the conference stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ConferenceEvent {
    ConferenceUpdate(ConferenceStatus),
    MessageReceived(ChatMessage),
    NewOffer(SdpMessage),
    UpdateSdp(SdpMessage),
    NewCandidate(IceCandidate),
    PresentationStart(PresentationStart),
    PresentationStop,
    ParticipantSyncBegin,
    ParticipantSyncEnd,
    ParticipantCreate(Participant),
    ParticipantUpdate(Participant),
    ParticipantDelete(ParticipantDelete),
    PeerDisconnected,
    Refer(Refer),
    CallDisconnected(CallDisconnected),
    /// The server is disconnecting this participant.
    Disconnected(Disconnect),
}

impl ConferenceEvent {
    /// Decode a stream event. Returns `None` for unknown or malformed events.
    #[must_use]
    pub fn from_stream_event(event: &StreamEvent) -> Option<Self> {
        let Some(name) = event.name.as_deref() else {
            debug!(target: "infinity.events", id = ?event.id, "Ignoring event without a name");
            return None;
        };

        let data = event.data.as_deref().unwrap_or_default();
        let decoded = match name {
            "conference_update" => decode(data).map(Self::ConferenceUpdate),
            "message_received" => decode(data).map(Self::MessageReceived),
            "new_offer" => decode(data).map(Self::NewOffer),
            "update_sdp" => decode(data).map(Self::UpdateSdp),
            "new_candidate" => decode(data).map(Self::NewCandidate),
            "presentation_start" => decode(data).map(Self::PresentationStart),
            "presentation_stop" => Ok(Self::PresentationStop),
            "participant_sync_begin" => Ok(Self::ParticipantSyncBegin),
            "participant_sync_end" => Ok(Self::ParticipantSyncEnd),
            "participant_create" => decode(data).map(Self::ParticipantCreate),
            "participant_update" => decode(data).map(Self::ParticipantUpdate),
            "participant_delete" => decode(data).map(Self::ParticipantDelete),
            "peer_disconnect" => Ok(Self::PeerDisconnected),
            "refer" => decode(data).map(Self::Refer),
            "call_disconnected" => decode(data).map(Self::CallDisconnected),
            "disconnect" => decode(data).map(Self::Disconnected),
            other => {
                debug!(target: "infinity.events", name = other, "Conference event not handled");
                return None;
            }
        };

        match decoded {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(target: "infinity.events", name, error = %e, "Failed to decode conference event");
                None
            }
        }
    }
}

fn decode<T: DeserializeOwned>(data: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(data)
}
