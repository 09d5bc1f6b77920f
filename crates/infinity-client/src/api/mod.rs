//! Conference client REST API.
//!
//! All conference requests live under
//! `{node}/api/client/v2/conferences/{alias}` and, once authenticated,
//! carry the current credential in a `token` header. Response payloads are
//! wrapped in a `{"result": ...}` envelope which is removed here.

pub mod models;

use crate::errors::{AuthError, StreamError, TransportError};
use crate::events::StreamOpener;
use crate::http::{ByteStream, HttpResponse, HttpTransport, Validation, CONTENT_TYPE_EVENT_STREAM};
use crate::token::{system_clock, Clock, Credential, RefreshedToken, TokenService, TokenStore};
use common::secret::{ExposeSecret, SecretString};
use common::types::CallId;
use models::{
    CallRequest, CallResponse, CandidateRequest, Envelope, MessageRequest, RefreshTokenResponse,
    SdpBody, TokenRejection, TokenRequestFields, TokenResponse,
};
use reqwest::header::{HeaderValue, ACCEPT, CACHE_CONTROL};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Header carrying the conference credential.
pub const TOKEN_HEADER: &str = "token";

/// Header carrying the conference PIN.
pub const PIN_HEADER: &str = "pin";

/// Header resuming an event stream.
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-Id";

/// PIN value sent when a guest joins without one.
const NO_PIN: &str = "none";

const CALL_TYPE_WEBRTC: &str = "WEBRTC";
const MESSAGE_TYPE_TEXT: &str = "text/plain";

/// Path of the node liveness endpoint, relative to the node URL.
pub const STATUS_PATH: [&str; 4] = ["api", "client", "v2", "status"];

/// Append path segments to `base`, percent-encoding each one.
///
/// # Errors
///
/// Returns `TransportError::InvalidUrl` if `base` cannot carry a path.
pub fn join_segments<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, TransportError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| TransportError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn secret_header(value: &str) -> Result<HeaderValue, TransportError> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| TransportError::Request("header value is not valid ASCII".to_string()))?;
    header.set_sensitive(true);
    Ok(header)
}

fn unwrap_envelope<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, TransportError> {
    response.json::<Envelope<T>>().map(|envelope| envelope.result)
}

/// Client for one conference on one node.
#[derive(Clone)]
pub struct ConferenceApi {
    transport: HttpTransport,
    node: Url,
    base: Url,
    clock: Clock,
}

impl std::fmt::Debug for ConferenceApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceApi")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl ConferenceApi {
    /// Create a client for `alias` on `node`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidUrl` if `node` cannot carry a path.
    pub fn new(transport: HttpTransport, node: &Url, alias: &str) -> Result<Self, TransportError> {
        let base = join_segments(node, ["api", "client", "v2", "conferences", alias])?;
        Ok(Self {
            transport,
            node: node.clone(),
            base,
            clock: system_clock(),
        })
    }

    /// Replace the clock that stamps newly issued credentials.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Node this client talks to.
    #[must_use]
    pub fn node(&self) -> &Url {
        &self.node
    }

    /// Conference-scoped base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Stream opener for the conference `events` endpoint.
    #[must_use]
    pub fn events_opener(&self, store: Arc<dyn TokenStore>) -> ConferenceEventsOpener {
        ConferenceEventsOpener {
            api: self.clone(),
            store,
        }
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, TransportError> {
        join_segments(&self.base, segments)
    }

    fn authorized(
        &self,
        method: Method,
        url: &Url,
        credential: &Credential,
    ) -> Result<RequestBuilder, TransportError> {
        Ok(self
            .transport
            .request(method, url.as_str())
            .header(TOKEN_HEADER, secret_header(credential.value().expose_secret())?))
    }

    async fn post<B>(
        &self,
        credential: &Credential,
        url: &Url,
        body: Option<&B>,
        validation: Validation,
    ) -> Result<HttpResponse, TransportError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let mut request = self.authorized(Method::POST, url, credential)?;
        if let Some(body) = body {
            request = request.json(body);
        }
        self.transport.send(request, validation).await
    }

    async fn post_json<B, T>(
        &self,
        credential: &Credential,
        url: &Url,
        body: Option<&B>,
    ) -> Result<T, TransportError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.post(credential, url, body, Validation::JSON).await?;
        unwrap_envelope(&response)
    }

    async fn post_ok<B>(
        &self,
        credential: &Credential,
        url: &Url,
        body: Option<&B>,
    ) -> Result<(), TransportError>
    where
        B: Serialize + Sync + ?Sized,
    {
        self.post(credential, url, body, Validation::SUCCESS).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Authentication
    // -------------------------------------------------------------------------

    /// Request a conference credential.
    ///
    /// An empty `pin` is sent as `"none"`, which lets guests join conferences
    /// that only require a host PIN.
    ///
    /// # Errors
    ///
    /// Each rejection is a distinct [`AuthError`] variant: `PinRequired`,
    /// `InvalidPin`, `ExtensionRequired`, `SsoIdentityProviderRequired`,
    /// `SsoRedirect`, `ConferenceNotFound` (404) and `Unauthorized` (401).
    /// Unknown 403 bodies yield `MalformedResponse`.
    #[instrument(skip_all, fields(conference = %self.base.as_str()))]
    pub async fn request_token(
        &self,
        fields: &TokenRequestFields,
        pin: Option<&SecretString>,
    ) -> Result<Credential, AuthError> {
        let url = self.endpoint(["request_token"])?;
        let mut request = self.transport.request(Method::POST, url.as_str()).json(fields);
        if let Some(pin) = pin {
            let value = pin.expose_secret().trim();
            let value = if value.is_empty() { NO_PIN } else { value };
            request = request.header(PIN_HEADER, secret_header(value)?);
        }

        let issued_at = (self.clock)();
        let response = self.transport.send(request, Validation::NONE).await?;

        match response.status {
            200..=299 => {
                let token: TokenResponse = unwrap_envelope(&response)
                    .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
                let credential = Credential::from_response(token, issued_at);
                info!(
                    target: "infinity.api",
                    participant_id = %credential.participant_id(),
                    role = ?credential.role(),
                    expires_in_secs = credential.expires_in(),
                    "Conference credential issued"
                );
                Ok(credential)
            }
            401 => Err(AuthError::Unauthorized),
            403 => {
                let rejection = classify_rejection(&response, pin.is_some());
                debug!(target: "infinity.api", error = %rejection, "Token request rejected");
                Err(rejection)
            }
            404 => Err(AuthError::ConferenceNotFound),
            status => {
                warn!(target: "infinity.api", status, "Unexpected token request status");
                Err(AuthError::Transport(TransportError::UnexpectedStatus { status }))
            }
        }
    }

    /// Exchange a credential for a fresh one.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` on connectivity or status failures.
    #[instrument(skip_all)]
    pub async fn refresh_token(&self, credential: &Credential) -> Result<RefreshedToken, TransportError> {
        let url = self.endpoint(["refresh_token"])?;
        let refreshed: RefreshTokenResponse = self.post_json::<(), _>(credential, &url, None).await?;
        Ok(RefreshedToken {
            token: refreshed.token,
            expires_in: refreshed.expires,
        })
    }

    /// Invalidate a credential server-side.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` on connectivity or status failures.
    #[instrument(skip_all)]
    pub async fn release_token(&self, credential: &Credential) -> Result<(), TransportError> {
        let url = self.endpoint(["release_token"])?;
        self.post_ok::<()>(credential, &url, None).await
    }

    // -------------------------------------------------------------------------
    // Calls
    // -------------------------------------------------------------------------

    /// Start a WebRTC call with a local session description.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` on connectivity, status or body failures.
    #[instrument(skip_all)]
    pub async fn new_call(
        &self,
        credential: &Credential,
        sdp: &str,
        present: Option<&str>,
    ) -> Result<CallResponse, TransportError> {
        let participant = credential.participant_id().to_string();
        let url = self.endpoint(["participants", participant.as_str(), "calls"])?;
        let body = CallRequest {
            call_type: CALL_TYPE_WEBRTC,
            sdp: sdp.to_string(),
            present: present.map(str::to_string),
        };
        self.post_json(credential, &url, Some(&body)).await
    }

    /// Renegotiate an existing call; returns the remote description.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` on connectivity, status or body failures.
    #[instrument(skip_all, fields(call_id = %call))]
    pub async fn update_call(
        &self,
        credential: &Credential,
        call: CallId,
        sdp: &str,
    ) -> Result<String, TransportError> {
        let url = self.call_endpoint(credential, call, "update")?;
        let body = SdpBody {
            sdp: sdp.to_string(),
        };
        self.post_json(credential, &url, Some(&body)).await
    }

    /// Acknowledge a call, optionally answering a server offer.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` on connectivity or status failures.
    #[instrument(skip_all, fields(call_id = %call))]
    pub async fn ack(
        &self,
        credential: &Credential,
        call: CallId,
        sdp: Option<&str>,
    ) -> Result<(), TransportError> {
        let url = self.call_endpoint(credential, call, "ack")?;
        let body = sdp.map(|sdp| SdpBody {
            sdp: sdp.to_string(),
        });
        self.post_ok(credential, &url, body.as_ref()).await
    }

    /// Send a local ICE candidate.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` on connectivity or status failures.
    #[instrument(skip_all, fields(call_id = %call))]
    pub async fn new_candidate(
        &self,
        credential: &Credential,
        call: CallId,
        candidate: &CandidateRequest,
    ) -> Result<(), TransportError> {
        let url = self.call_endpoint(credential, call, "new_candidate")?;
        self.post_ok(credential, &url, Some(candidate)).await
    }

    /// Hang up a call while staying in the conference.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` on connectivity or status failures.
    #[instrument(skip_all, fields(call_id = %call))]
    pub async fn disconnect_call(&self, credential: &Credential, call: CallId) -> Result<(), TransportError> {
        let url = self.call_endpoint(credential, call, "disconnect")?;
        self.post_ok::<()>(credential, &url, None).await
    }

    /// Leave the conference.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` on connectivity or status failures.
    #[instrument(skip_all)]
    pub async fn disconnect_participant(&self, credential: &Credential) -> Result<(), TransportError> {
        let participant = credential.participant_id().to_string();
        let url = self.endpoint(["participants", participant.as_str(), "disconnect"])?;
        self.post_ok::<()>(credential, &url, None).await
    }

    /// Send a chat message to the conference.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` on connectivity or status failures.
    #[instrument(skip_all)]
    pub async fn send_message(&self, credential: &Credential, text: &str) -> Result<(), TransportError> {
        let url = self.endpoint(["message"])?;
        let body = MessageRequest {
            kind: MESSAGE_TYPE_TEXT,
            payload: text.to_string(),
        };
        self.post_ok(credential, &url, Some(&body)).await
    }

    fn call_endpoint(&self, credential: &Credential, call: CallId, action: &str) -> Result<Url, TransportError> {
        let participant = credential.participant_id().to_string();
        let call = call.to_string();
        self.endpoint([
            "participants",
            participant.as_str(),
            "calls",
            call.as_str(),
            action,
        ])
    }
}

#[async_trait::async_trait]
impl TokenService for ConferenceApi {
    async fn refresh_token(&self, credential: &Credential) -> Result<RefreshedToken, TransportError> {
        ConferenceApi::refresh_token(self, credential).await
    }

    async fn release_token(&self, credential: &Credential) -> Result<(), TransportError> {
        ConferenceApi::release_token(self, credential).await
    }
}

/// Map a 403 `request_token` body to a named rejection.
fn classify_rejection(response: &HttpResponse, pin_supplied: bool) -> AuthError {
    let result = match response.json::<Envelope<serde_json::Value>>() {
        Ok(envelope) => envelope.result,
        Err(e) => return AuthError::MalformedResponse(e.to_string()),
    };

    if let serde_json::Value::String(message) = &result {
        return if pin_supplied {
            AuthError::InvalidPin
        } else {
            AuthError::MalformedResponse(message.clone())
        };
    }

    let rejection: TokenRejection = match serde_json::from_value(result) {
        Ok(rejection) => rejection,
        Err(e) => return AuthError::MalformedResponse(e.to_string()),
    };

    if let Some(guest_pin) = rejection.guest_pin {
        return if pin_supplied {
            AuthError::InvalidPin
        } else {
            AuthError::PinRequired {
                guest_pin_required: guest_pin == "required",
            }
        };
    }

    if let Some(kind) = rejection.conference_extension {
        return AuthError::ExtensionRequired { kind };
    }

    if let Some(providers) = rejection.idp {
        return AuthError::SsoIdentityProviderRequired { providers };
    }

    match (rejection.redirect_url, rejection.redirect_idp) {
        (Some(url), Some(idp)) => AuthError::SsoRedirect {
            url,
            provider_name: idp.name,
        },
        _ => AuthError::MalformedResponse("unrecognised rejection".to_string()),
    }
}

/// Opens the conference `events` stream with the current stored credential.
#[derive(Clone)]
pub struct ConferenceEventsOpener {
    api: ConferenceApi,
    store: Arc<dyn TokenStore>,
}

impl std::fmt::Debug for ConferenceEventsOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceEventsOpener")
            .field("api", &self.api)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl StreamOpener for ConferenceEventsOpener {
    async fn open(&self, last_event_id: Option<&str>) -> Result<ByteStream, StreamError> {
        // No credential is treated like the server rejecting a stale one.
        let credential = self
            .store
            .load()
            .await
            .ok_or(StreamError::Http { status: 401 })?;

        let url = self.api.endpoint(["events"])?;
        let mut request = self
            .api
            .transport
            .stream_request(Method::GET, url.as_str())
            .header(ACCEPT, CONTENT_TYPE_EVENT_STREAM)
            .header(CACHE_CONTROL, "no-cache")
            .header(TOKEN_HEADER, secret_header(credential.value().expose_secret())?);

        if let Some(id) = last_event_id {
            request = request.header(LAST_EVENT_ID_HEADER, id);
        }

        self.api
            .transport
            .open_stream(request, Validation::EVENT_STREAM)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::errors::IdentityProvider;
    use crate::token::MemoryTokenStore;
    use chrono::Utc;
    use common::types::{ParticipantId, Role};
    use futures::TryStreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONFERENCE_PATH: &str = "/api/client/v2/conferences/meet.alice";

    async fn api(server: &MockServer) -> ConferenceApi {
        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let node = Url::parse(&server.uri()).unwrap();
        ConferenceApi::new(transport, &node, "meet.alice").unwrap()
    }

    fn credential() -> Credential {
        Credential::new(
            SecretString::from("current-token"),
            ParticipantId::new(),
            Role::Host,
            120,
            Utc::now(),
        )
    }

    fn token_body() -> serde_json::Value {
        json!({
            "result": {
                "token": "issued-token",
                "expires": "120",
                "participant_uuid": "2c0b4e7e-7a1f-4d61-9d44-6a1ef2f5b9a1",
                "role": "GUEST",
                "display_name": "Bob",
                "conference_name": "meet.alice"
            }
        })
    }

    async fn reject_with(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path(format!("{CONFERENCE_PATH}/request_token")))
            .respond_with(ResponseTemplate::new(403).set_body_json(body))
            .mount(server)
            .await;
    }

    fn fields() -> TokenRequestFields {
        TokenRequestFields {
            display_name: "Bob".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_url_encodes_alias() {
        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let node = Url::parse("https://node.example.com/").unwrap();
        let api = ConferenceApi::new(transport, &node, "meet alice").unwrap();
        assert_eq!(
            api.base_url().as_str(),
            "https://node.example.com/api/client/v2/conferences/meet%20alice"
        );
    }

    #[tokio::test]
    async fn test_request_token_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{CONFERENCE_PATH}/request_token")))
            .and(body_json(json!({"display_name": "Bob", "direct_media": false})))
            .and(header("pin", "none"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let credential = api(&server)
            .await
            .request_token(&fields(), Some(&SecretString::from("")))
            .await
            .unwrap();

        assert_eq!(credential.value().expose_secret(), "issued-token");
        assert_eq!(credential.expires_in(), 120);
        assert_eq!(credential.role(), Role::Guest);
        assert_eq!(credential.display_name(), "Bob");
    }

    #[tokio::test]
    async fn test_request_token_pin_required() {
        let server = MockServer::start().await;
        reject_with(
            &server,
            json!({"status": "success", "result": {"pin": "required", "guest_pin": "none"}}),
        )
        .await;

        let result = api(&server).await.request_token(&fields(), None).await;
        assert_eq!(
            result.unwrap_err(),
            AuthError::PinRequired {
                guest_pin_required: false
            }
        );
    }

    #[tokio::test]
    async fn test_request_token_invalid_pin() {
        let server = MockServer::start().await;
        reject_with(&server, json!({"status": "success", "result": "Invalid PIN"})).await;

        let result = api(&server)
            .await
            .request_token(&fields(), Some(&SecretString::from("1234")))
            .await;
        assert_eq!(result.unwrap_err(), AuthError::InvalidPin);
    }

    #[tokio::test]
    async fn test_request_token_extension_required() {
        let server = MockServer::start().await;
        reject_with(&server, json!({"result": {"conference_extension": "standard"}})).await;

        let result = api(&server).await.request_token(&fields(), None).await;
        assert_eq!(
            result.unwrap_err(),
            AuthError::ExtensionRequired {
                kind: "standard".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_request_token_sso_rejections() {
        let server = MockServer::start().await;
        reject_with(
            &server,
            json!({"result": {"idp": [{"name": "Corp", "uuid": "idp-1"}]}}),
        )
        .await;
        let result = api(&server).await.request_token(&fields(), None).await;
        assert_eq!(
            result.unwrap_err(),
            AuthError::SsoIdentityProviderRequired {
                providers: vec![IdentityProvider {
                    name: "Corp".to_string(),
                    id: "idp-1".to_string()
                }]
            }
        );

        let server = MockServer::start().await;
        reject_with(
            &server,
            json!({"result": {
                "redirect_url": "https://sso.example.com/login",
                "redirect_idp": {"name": "Corp", "uuid": "idp-1"}
            }}),
        )
        .await;
        let result = api(&server).await.request_token(&fields(), None).await;
        assert_eq!(
            result.unwrap_err(),
            AuthError::SsoRedirect {
                url: "https://sso.example.com/login".to_string(),
                provider_name: "Corp".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_request_token_status_mapping() {
        for (status, expected) in [
            (401, AuthError::Unauthorized),
            (404, AuthError::ConferenceNotFound),
            (
                502,
                AuthError::Transport(TransportError::UnexpectedStatus { status: 502 }),
            ),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let result = api(&server).await.request_token(&fields(), None).await;
            assert_eq!(result.unwrap_err(), expected);
        }
    }

    #[tokio::test]
    async fn test_refresh_and_release_send_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{CONFERENCE_PATH}/refresh_token")))
            .and(header("token", "current-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"result": {"token": "next-token", "expires": "120"}})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{CONFERENCE_PATH}/release_token")))
            .and(header("token", "current-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
            .expect(1)
            .mount(&server)
            .await;

        let api = api(&server).await;
        let refreshed = api.refresh_token(&credential()).await.unwrap();
        assert_eq!(refreshed.token.expose_secret(), "next-token");
        assert_eq!(refreshed.expires_in, 120);

        api.release_token(&credential()).await.unwrap();
    }

    #[tokio::test]
    async fn test_call_lifecycle_paths() {
        let server = MockServer::start().await;
        let credential = credential();
        let call_id = "6f0a3a53-0c4e-4c3c-9d8b-0d6a3c1f2e11";
        let participant_path = format!(
            "{CONFERENCE_PATH}/participants/{}",
            credential.participant_id()
        );

        Mock::given(method("POST"))
            .and(path(format!("{participant_path}/calls")))
            .and(body_json(json!({"call_type": "WEBRTC", "sdp": "v=0 local"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"result": {"call_uuid": call_id, "sdp": "v=0 remote"}}),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{participant_path}/calls/{call_id}/update")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"result": "v=0 updated"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{participant_path}/calls/{call_id}/ack")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{participant_path}/calls/{call_id}/new_candidate")))
            .and(body_json(json!({"candidate": "candidate:1", "mid": "0", "ufrag": "u", "pwd": "p"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
            .expect(1)
            .mount(&server)
            .await;

        let api = api(&server).await;
        let call = api.new_call(&credential, "v=0 local", None).await.unwrap();
        assert_eq!(call.call_uuid.to_string(), call_id);
        assert_eq!(call.sdp, "v=0 remote");

        let updated = api
            .update_call(&credential, call.call_uuid, "v=0 again")
            .await
            .unwrap();
        assert_eq!(updated, "v=0 updated");

        api.ack(&credential, call.call_uuid, None).await.unwrap();
        api.new_candidate(
            &credential,
            call.call_uuid,
            &CandidateRequest {
                candidate: "candidate:1".to_string(),
                mid: "0".to_string(),
                ufrag: Some("u".to_string()),
                pwd: Some("p".to_string()),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_send_message_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{CONFERENCE_PATH}/message")))
            .and(body_json(json!({"type": "text/plain", "payload": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
            .expect(1)
            .mount(&server)
            .await;

        api(&server)
            .await
            .send_message(&credential(), "hello")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_events_opener_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{CONFERENCE_PATH}/events")))
            .and(header("token", "current-token"))
            .and(header("accept", "text/event-stream"))
            .and(header("last-event-id", "41"))
            .and(header_exists("user-agent"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("id: 42\ndata: {}\n\n", "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::with_credential(credential()));
        let opener = api(&server).await.events_opener(store);
        let stream = opener.open(Some("41")).await.unwrap();
        let body: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(body.concat(), b"id: 42\ndata: {}\n\n");
    }

    #[tokio::test]
    async fn test_events_opener_without_credential() {
        let server = MockServer::start().await;
        let opener = api(&server)
            .await
            .events_opener(Arc::new(MemoryTokenStore::new()));
        let result = opener.open(None).await;
        assert!(matches!(result, Err(StreamError::Http { status: 401 })));
    }
}
