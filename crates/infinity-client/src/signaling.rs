//! Signaling facade.
//!
//! [`SignalingClient::join`] walks a conference address through node
//! selection, authentication and token activation, and returns a
//! [`ConferenceSession`] for exchanging session descriptions, ICE
//! candidates and chat, and for reading conference events.
//!
//! # State machine
//!
//! ```text
//! Idle -> Resolving -> Authenticating -> Active -> Closing -> Closed
//!            |              |              |
//!            +--------------+--------------+--> Failed(reason)
//! ```
//!
//! The facade is the only owner of [`SessionState`]. A session fails when
//! its event stream gives up or a background token refresh fails. A 401 or
//! 403 on the event stream leaves the session active: the caller decides
//! whether to [`ConferenceSession::resubscribe`] once the credential has
//! been refreshed.

use crate::api::models::{CandidateRequest, TokenRequestFields};
use crate::api::ConferenceApi;
use crate::config::ClientConfig;
use crate::dns::{DnsResolver, SystemDnsLookup};
use crate::errors::{AuthError, ClientError, JoinError, SignalingError, StreamError};
use crate::events::conference::ConferenceEvent;
use crate::events::{EventSource, EventStream, EventStreamStats};
use crate::http::HttpTransport;
use crate::node::{HttpNodeProbe, NodeSelector};
use crate::token::{
    system_clock, Clock, Credential, MemoryTokenStore, TokenSession, TokenSessionEvent, TokenStore,
};
use common::secret::SecretString;
use common::types::{CallId, ConferenceAddress};
use regex::Regex;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[allow(clippy::expect_used)]
static ICE_UFRAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^a=ice-ufrag:([^\r\n]+)").expect("literal pattern"));

#[allow(clippy::expect_used)]
static ICE_PWD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^a=ice-pwd:([^\r\n]+)").expect("literal pattern"));

#[allow(clippy::expect_used)]
static CANDIDATE_UFRAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bufrag\s+(\S+)").expect("literal pattern"));

/// ICE `ufrag -> pwd` pairs of a session description, in media order.
#[must_use]
pub fn ice_credentials(sdp: &str) -> HashMap<String, String> {
    let ufrags = ICE_UFRAG.captures_iter(sdp).filter_map(|c| c.get(1));
    let pwds = ICE_PWD.captures_iter(sdp).filter_map(|c| c.get(1));
    ufrags
        .zip(pwds)
        .map(|(ufrag, pwd)| (ufrag.as_str().trim().to_string(), pwd.as_str().trim().to_string()))
        .collect()
}

/// `ufrag` attribute of an ICE candidate line.
#[must_use]
pub fn candidate_ufrag(candidate: &str) -> Option<&str> {
    CANDIDATE_UFRAG
        .captures(candidate)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Lifecycle of a conference session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Resolving,
    Authenticating,
    Active,
    Closing,
    Closed,
    Failed(String),
}

impl SessionState {
    /// Whether a new join may start from this state.
    #[must_use]
    pub fn can_join(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Closed | SessionState::Failed(_))
    }
}

/// Parameters of a join.
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    pub display_name: String,
    /// Conference PIN; an empty PIN joins as a guest where allowed.
    pub pin: Option<SecretString>,
    /// Target conference when the alias is a virtual reception.
    pub conference_extension: Option<String>,
    /// Identity provider chosen after an SSO rejection.
    pub chosen_idp_id: Option<String>,
    /// Token returned by the SSO flow.
    pub sso_token: Option<String>,
}

impl JoinOptions {
    #[must_use]
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(SecretString::from(pin.into()));
        self
    }

    #[must_use]
    pub fn with_conference_extension(mut self, extension: impl Into<String>) -> Self {
        self.conference_extension = Some(extension.into());
        self
    }

    fn fields(&self) -> TokenRequestFields {
        TokenRequestFields {
            display_name: self.display_name.clone(),
            conference_extension: self.conference_extension.clone(),
            chosen_idp_id: self.chosen_idp_id.clone(),
            sso_token: self.sso_token.clone(),
            direct_media: false,
        }
    }
}

/// Entry point for joining conferences.
pub struct SignalingClient {
    config: ClientConfig,
    selector: NodeSelector,
    transport: HttpTransport,
    clock: Clock,
    state: Arc<watch::Sender<SessionState>>,
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("state", &*self.state.borrow())
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

impl SignalingClient {
    /// Build a client that resolves nodes through the configured nameserver,
    /// or the system resolver configuration when none is set.
    ///
    /// # Errors
    ///
    /// - `ClientError::Transport` if the HTTP client cannot be built
    /// - `ClientError::Dns` if the system resolver configuration is unusable
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(&config.http)?;
        let lookup = match config.dns.nameserver {
            Some(nameserver) => SystemDnsLookup::with_nameservers(vec![nameserver]),
            None => SystemDnsLookup::from_system_conf()?,
        };
        let resolver = DnsResolver::new(Arc::new(lookup), config.dns.timeout);
        let selector = NodeSelector::new(
            resolver,
            Arc::new(HttpNodeProbe::new(transport.clone())),
            config.dns.dnssec,
        );
        Ok(Self::with_components(config, selector, transport))
    }

    /// Build a client from preassembled components.
    #[must_use]
    pub fn with_components(config: ClientConfig, selector: NodeSelector, transport: HttpTransport) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            selector,
            transport,
            clock: system_clock(),
            state: Arc::new(state),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Observe state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Join the conference at `address`.
    ///
    /// # Errors
    ///
    /// - `JoinError::InvalidState` if a join is in progress or a session is active
    /// - `JoinError::Node` if no node could be selected
    /// - `JoinError::Auth` if the conference rejected the request
    /// - `JoinError::Session` if the issued credential could not be activated
    /// - `JoinError::Cancelled` if `cancel` fired
    #[instrument(skip_all, fields(address = %address))]
    pub async fn join(
        &self,
        address: &ConferenceAddress,
        options: JoinOptions,
        cancel: &CancellationToken,
    ) -> Result<ConferenceSession, JoinError> {
        let started = self.state.send_if_modified(|state| {
            if state.can_join() {
                *state = SessionState::Resolving;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(JoinError::InvalidState);
        }

        match self.establish(address, &options, cancel).await {
            Ok(session) => {
                self.state.send_replace(SessionState::Active);
                info!(target: "infinity.signaling", node = %session.node(), "Joined conference");
                Ok(session)
            }
            Err(e) => {
                warn!(target: "infinity.signaling", error = %e, kind = ?e.kind(), "Join failed");
                self.state.send_replace(SessionState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        address: &ConferenceAddress,
        options: &JoinOptions,
        cancel: &CancellationToken,
    ) -> Result<ConferenceSession, JoinError> {
        let node = self.selector.resolve(address, cancel).await?;

        self.state.send_replace(SessionState::Authenticating);
        let api = ConferenceApi::new(self.transport.clone(), &node, address.alias())
            .map_err(AuthError::from)?
            .with_clock(Arc::clone(&self.clock));

        let fields = options.fields();
        let credential = tokio::select! {
            () = cancel.cancelled() => return Err(JoinError::Cancelled),
            result = api.request_token(&fields, options.pin.as_ref()) => result?,
        };

        let store = Arc::new(MemoryTokenStore::with_credential(credential.clone()));
        let token = Arc::new(
            TokenSession::new(
                Arc::new(api.clone()),
                Arc::clone(&store) as Arc<dyn TokenStore>,
                self.config.token.clone(),
            )
            .with_clock(Arc::clone(&self.clock)),
        );
        if let Err(e) = token.activate().await {
            self.release_unused(&api, &credential).await;
            return Err(e.into());
        }

        let source = EventSource::new(
            Arc::new(api.events_opener(Arc::clone(&store) as Arc<dyn TokenStore>)),
            self.config.events.clone(),
        );
        let events = source.events(None);

        let watcher = CancellationToken::new();
        tokio::spawn(watch_token(
            token.subscribe(),
            Arc::clone(&self.state),
            watcher.clone(),
        ));

        Ok(ConferenceSession {
            api,
            store,
            token,
            source,
            events,
            clock: Arc::clone(&self.clock),
            state: Arc::clone(&self.state),
            call: Mutex::new(None),
            watcher,
        })
    }

    /// Release a credential the session never took over.
    async fn release_unused(&self, api: &ConferenceApi, credential: &Credential) {
        let grace = self.config.token.release_grace_period;
        match tokio::time::timeout(grace, api.release_token(credential)).await {
            Ok(Ok(())) => debug!(target: "infinity.signaling", "Released unused credential"),
            Ok(Err(e)) => {
                warn!(target: "infinity.signaling", error = %e, "Failed to release unused credential");
            }
            Err(_) => {
                warn!(
                    target: "infinity.signaling",
                    grace_ms = grace.as_millis(),
                    "Release of unused credential timed out"
                );
            }
        }
    }
}

/// Fail the session when a background refresh fails.
async fn watch_token(
    mut events: watch::Receiver<TokenSessionEvent>,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            changed = events.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let event = events.borrow_and_update().clone();
        if let TokenSessionEvent::Failed { reason } = event {
            warn!(target: "infinity.signaling", reason = %reason, "Credential lost, session failed");
            state.send_if_modified(|current| {
                if *current == SessionState::Active {
                    *current = SessionState::Failed(format!("token refresh failed: {reason}"));
                    true
                } else {
                    false
                }
            });
            return;
        }
    }
}

#[derive(Debug, Clone)]
struct CallContext {
    id: CallId,
    ice: HashMap<String, String>,
}

/// An active conference session.
pub struct ConferenceSession {
    api: ConferenceApi,
    store: Arc<MemoryTokenStore>,
    token: Arc<TokenSession>,
    source: EventSource,
    events: EventStream,
    clock: Clock,
    state: Arc<watch::Sender<SessionState>>,
    call: Mutex<Option<CallContext>>,
    watcher: CancellationToken,
}

impl std::fmt::Debug for ConferenceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceSession")
            .field("api", &self.api)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ConferenceSession {
    /// Node serving the conference.
    #[must_use]
    pub fn node(&self) -> &Url {
        self.api.node()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Current credential, if the session still holds one.
    pub async fn credential(&self) -> Option<Credential> {
        self.store.load().await
    }

    /// Id of the call started by [`ConferenceSession::send`].
    #[must_use]
    pub fn call_id(&self) -> Option<CallId> {
        self.lock_call().as_ref().map(|call| call.id)
    }

    #[must_use]
    pub fn event_stats(&self) -> EventStreamStats {
        self.events.stats()
    }

    /// Observe background credential refreshes.
    #[must_use]
    pub fn token_events(&self) -> watch::Receiver<TokenSessionEvent> {
        self.token.subscribe()
    }

    fn lock_call(&self) -> std::sync::MutexGuard<'_, Option<CallContext>> {
        self.call.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn active_credential(&self) -> Result<Credential, SignalingError> {
        if self.state() != SessionState::Active {
            return Err(SignalingError::NotActive);
        }
        self.store.load().await.ok_or(SignalingError::NotActive)
    }

    /// Send a local session description and return the remote one.
    ///
    /// The first call starts the media call; later calls renegotiate it.
    ///
    /// # Errors
    ///
    /// - `SignalingError::NotActive` if the session is not active
    /// - `SignalingError::Transport` if the request fails
    #[instrument(skip_all)]
    pub async fn send(&self, local_sdp: &str) -> Result<String, SignalingError> {
        let credential = self.active_credential().await?;
        let ice = ice_credentials(local_sdp);
        let existing = self.call_id();

        let remote = match existing {
            None => {
                let call = self.api.new_call(&credential, local_sdp, None).await?;
                debug!(target: "infinity.signaling", call_id = %call.call_uuid, "Call started");
                *self.lock_call() = Some(CallContext {
                    id: call.call_uuid,
                    ice,
                });
                call.sdp
            }
            Some(id) => {
                let sdp = self.api.update_call(&credential, id, local_sdp).await?;
                if let Some(call) = self.lock_call().as_mut() {
                    call.ice = ice;
                }
                sdp
            }
        };
        Ok(remote)
    }

    /// Acknowledge the call, answering a server offer if `sdp` is given.
    ///
    /// # Errors
    ///
    /// - `SignalingError::NotActive` / `SignalingError::NoCall`
    /// - `SignalingError::Transport` if the request fails
    pub async fn ack(&self, sdp: Option<&str>) -> Result<(), SignalingError> {
        let credential = self.active_credential().await?;
        let call = self.call_id().ok_or(SignalingError::NoCall)?;
        self.api.ack(&credential, call, sdp).await?;
        Ok(())
    }

    /// Send a local ICE candidate with the password matching its ufrag.
    ///
    /// # Errors
    ///
    /// - `SignalingError::NotActive` / `SignalingError::NoCall`
    /// - `SignalingError::MissingIcePassword` if the local description had none
    /// - `SignalingError::UnknownUfrag` if the candidate's ufrag is absent or unknown
    /// - `SignalingError::Transport` if the request fails
    #[instrument(skip_all, fields(mid = %mid))]
    pub async fn submit_candidate(&self, candidate: &str, mid: &str) -> Result<(), SignalingError> {
        let credential = self.active_credential().await?;
        let call = self.lock_call().clone().ok_or(SignalingError::NoCall)?;
        if call.ice.is_empty() {
            return Err(SignalingError::MissingIcePassword);
        }

        let ufrag = candidate_ufrag(candidate).ok_or(SignalingError::UnknownUfrag)?;
        let pwd = call.ice.get(ufrag).ok_or(SignalingError::UnknownUfrag)?;

        let request = CandidateRequest {
            candidate: candidate.to_string(),
            mid: mid.to_string(),
            ufrag: Some(ufrag.to_string()),
            pwd: Some(pwd.clone()),
        };
        self.api.new_candidate(&credential, call.id, &request).await?;
        Ok(())
    }

    /// Send a chat message.
    ///
    /// # Errors
    ///
    /// - `SignalingError::NotActive` if the session is not active
    /// - `SignalingError::Transport` if the request fails
    pub async fn send_message(&self, text: &str) -> Result<(), SignalingError> {
        let credential = self.active_credential().await?;
        self.api.send_message(&credential, text).await?;
        Ok(())
    }

    /// Next conference event.
    ///
    /// Events that are not conference events are skipped. When the stream
    /// gives up the session fails and the error is returned once. A 401 or
    /// 403 is returned without failing the session; see
    /// [`ConferenceSession::resubscribe`].
    pub async fn next_event(&mut self) -> Option<Result<ConferenceEvent, StreamError>> {
        loop {
            match self.events.next().await? {
                Ok(event) => {
                    if let Some(event) = ConferenceEvent::from_stream_event(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(e) if e.is_auth_failure() => {
                    warn!(target: "infinity.signaling", error = %e, "Event stream rejected the credential");
                    return Some(Err(e));
                }
                Err(e) => {
                    warn!(target: "infinity.signaling", error = %e, "Event stream failed");
                    self.state.send_if_modified(|state| {
                        if *state == SessionState::Active {
                            *state = SessionState::Failed(e.to_string());
                            true
                        } else {
                            false
                        }
                    });
                    return Some(Err(e));
                }
            }
        }
    }

    /// Reopen the event stream after the previous one ended.
    ///
    /// The new stream resumes after the last event id received and
    /// authenticates with the credential currently in storage, so call this
    /// once a rejected credential has been refreshed.
    ///
    /// # Errors
    ///
    /// - `SignalingError::NotActive` if the session is not active
    /// - `SignalingError::CredentialUnavailable` if storage holds no
    ///   unexpired credential
    #[instrument(skip_all)]
    pub async fn resubscribe(&mut self) -> Result<(), SignalingError> {
        if self.state() != SessionState::Active {
            return Err(SignalingError::NotActive);
        }
        let credential = self
            .store
            .load()
            .await
            .ok_or(SignalingError::CredentialUnavailable)?;
        if credential.is_expired((self.clock)()) {
            return Err(SignalingError::CredentialUnavailable);
        }

        let last_event_id = self.events.last_event_id();
        self.events.close();
        self.events = self.source.events(last_event_id.clone());
        info!(target: "infinity.signaling", last_event_id = ?last_event_id, "Event stream resubscribed");
        Ok(())
    }

    /// Leave the conference.
    ///
    /// Disconnects the call and participant when the session is active,
    /// then stops the event stream and the token session. Request failures
    /// are logged; teardown always completes.
    #[instrument(skip_all)]
    pub async fn leave(self) {
        let was_active = self.state.send_if_modified(|state| {
            if *state == SessionState::Active {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        });

        self.events.close();
        self.watcher.cancel();

        if was_active {
            if let Some(credential) = self.store.load().await {
                if let Some(call) = self.call_id() {
                    if let Err(e) = self.api.disconnect_call(&credential, call).await {
                        warn!(target: "infinity.signaling", error = %e, "Call disconnect failed");
                    }
                }
                if let Err(e) = self.api.disconnect_participant(&credential).await {
                    warn!(target: "infinity.signaling", error = %e, "Participant disconnect failed");
                }
            }
        }

        if let Err(e) = self.token.deactivate().await {
            debug!(target: "infinity.signaling", error = %e, "Token session already stopped");
        }

        self.state.send_if_modified(|state| {
            if matches!(state, SessionState::Failed(_)) {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
        info!(target: "infinity.signaling", "Left conference");
    }
}

impl Drop for ConferenceSession {
    fn drop(&mut self) {
        self.watcher.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const LOCAL_SDP: &str = "v=0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        a=ice-ufrag:audioU\r\n\
        a=ice-pwd:audioPassword\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
        a=ice-ufrag:videoU\r\n\
        a=ice-pwd:videoPassword\r\n";

    #[test]
    fn test_ice_credentials() {
        let ice = ice_credentials(LOCAL_SDP);
        assert_eq!(ice.len(), 2);
        assert_eq!(ice.get("audioU").map(String::as_str), Some("audioPassword"));
        assert_eq!(ice.get("videoU").map(String::as_str), Some("videoPassword"));

        assert!(ice_credentials("v=0\r\nm=audio 9 RTP/AVP 0\r\n").is_empty());
    }

    #[test]
    fn test_candidate_ufrag() {
        let candidate = "candidate:842163049 1 udp 1677729535 192.0.2.1 46154 typ srflx \
                         raddr 10.0.0.1 rport 46154 generation 0 ufrag audioU network-cost 999";
        assert_eq!(candidate_ufrag(candidate), Some("audioU"));
        assert_eq!(candidate_ufrag("candidate:1 1 udp 1 10.0.0.1 1 typ host"), None);
    }

    #[test]
    fn test_can_join() {
        assert!(SessionState::Idle.can_join());
        assert!(SessionState::Closed.can_join());
        assert!(SessionState::Failed("x".to_string()).can_join());
        assert!(!SessionState::Resolving.can_join());
        assert!(!SessionState::Active.can_join());
    }

    #[test]
    fn test_join_options_fields() {
        let options = JoinOptions::new("Alice")
            .with_pin("1234")
            .with_conference_extension("meet.bob");
        let fields = options.fields();
        assert_eq!(fields.display_name, "Alice");
        assert_eq!(fields.conference_extension.as_deref(), Some("meet.bob"));
        assert!(!fields.direct_media);
    }
}
