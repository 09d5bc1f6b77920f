//! wiremock harness for the conference REST API.
//!
//! Provides `TestConferenceServer`, a mock node serving one conference.
//!
//! # Example
//! ```rust,ignore
//! #[tokio::test]
//! async fn test_join_flow() {
//!     let server = TestConferenceServer::start("meet.alice").await;
//!     server.mount_status(200).await;
//!     server.mount_request_token(ParticipantId::new(), 120).await;
//!
//!     let node = server.node_url();
//!     // Point a ScriptedDnsLookup SRV record at node.host() / node.port()...
//! }
//! ```

use common::types::{CallId, ParticipantId};
use reqwest::Url;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path of the conference API for `alias`.
#[must_use]
pub fn conference_path(alias: &str) -> String {
    format!("/api/client/v2/conferences/{alias}")
}

/// `request_token` success body.
#[must_use]
pub fn token_response(token: &str, participant_id: ParticipantId, expires_in: u64) -> Value {
    json!({
        "status": "success",
        "result": {
            "token": token,
            "expires": expires_in.to_string(),
            "participant_uuid": participant_id.to_string(),
            "role": "GUEST",
            "display_name": "Test Participant",
            "conference_name": "Test Conference",
            "service_type": "conference",
            "chat_enabled": true,
            "stun": [{"url": "stun:stun.example.com:3478"}]
        }
    })
}

/// A mock node hosting one conference.
pub struct TestConferenceServer {
    server: MockServer,
    alias: String,
}

impl TestConferenceServer {
    /// Start a server for `alias` on a random local port.
    pub async fn start(alias: &str) -> Self {
        Self {
            server: MockServer::start().await,
            alias: alias.to_string(),
        }
    }

    /// Underlying wiremock server, for custom mounts and request inspection.
    pub fn mock_server(&self) -> &MockServer {
        &self.server
    }

    /// Node URL (scheme, host and port).
    pub fn node_url(&self) -> Url {
        Url::parse(&self.server.uri()).expect("wiremock uri is a valid URL")
    }

    /// Host and port the server listens on.
    pub fn host_port(&self) -> (String, u16) {
        let url = self.node_url();
        (
            url.host_str().expect("wiremock uri has a host").to_string(),
            url.port().expect("wiremock uri has a port"),
        )
    }

    fn conference(&self, suffix: &str) -> String {
        format!("{}/{suffix}", conference_path(&self.alias))
    }

    /// Answer the node liveness probe with `status`.
    pub async fn mount_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path("/api/client/v2/status"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Issue `initial-token` for `participant_id`.
    pub async fn mount_request_token(&self, participant_id: ParticipantId, expires_in: u64) {
        Mock::given(method("POST"))
            .and(path(self.conference("request_token")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_response(
                    "initial-token",
                    participant_id,
                    expires_in,
                )),
            )
            .mount(&self.server)
            .await;
    }

    /// Reject `request_token` with a 403 carrying `result`.
    pub async fn mount_token_rejection(&self, result: Value) {
        Mock::given(method("POST"))
            .and(path(self.conference("request_token")))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({"status": "success", "result": result})),
            )
            .mount(&self.server)
            .await;
    }

    /// Answer `refresh_token` with `refreshed-token`.
    pub async fn mount_refresh_token(&self, expires_in: u64) {
        Mock::given(method("POST"))
            .and(path(self.conference("refresh_token")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "result": {"token": "refreshed-token", "expires": expires_in.to_string()}
            })))
            .mount(&self.server)
            .await;
    }

    /// Accept `release_token`; expect exactly `times` calls when verified.
    pub async fn mount_release_token(&self, times: u64) {
        Mock::given(method("POST"))
            .and(path(self.conference("release_token")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "success", "result": true})),
            )
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Serve `body` as the event stream for requests carrying `token`.
    pub async fn mount_events(&self, token: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(self.conference("events")))
            .and(header("token", token))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/event-stream"),
            )
            .mount(&self.server)
            .await;
    }

    /// Accept a new call for `participant_id`, answering with `remote_sdp`.
    pub async fn mount_new_call(&self, participant_id: ParticipantId, call_id: CallId, remote_sdp: &str) {
        Mock::given(method("POST"))
            .and(path(self.conference(&format!("participants/{participant_id}/calls"))))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "result": {"call_uuid": call_id.to_string(), "sdp": remote_sdp}
            })))
            .mount(&self.server)
            .await;
    }

    /// Accept any call action (`ack`, `new_candidate`, `disconnect`...).
    pub async fn mount_call_action(&self, participant_id: ParticipantId, call_id: CallId, action: &str) {
        Mock::given(method("POST"))
            .and(path(self.conference(&format!(
                "participants/{participant_id}/calls/{call_id}/{action}"
            ))))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "success", "result": true})),
            )
            .mount(&self.server)
            .await;
    }

    /// Accept the participant `disconnect` request.
    pub async fn mount_disconnect(&self, participant_id: ParticipantId) {
        Mock::given(method("POST"))
            .and(path(self.conference(&format!("participants/{participant_id}/disconnect"))))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "success", "result": true})),
            )
            .mount(&self.server)
            .await;
    }
}
