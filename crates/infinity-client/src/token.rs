//! Conference token session.
//!
//! Keeps a short-lived conference credential alive for the life of a call.
//! The caller acquires the first credential and puts it in a [`TokenStore`];
//! [`TokenSession::activate`] then runs one background task that sleeps
//! until the credential's refresh point, refreshes it, swaps the stored
//! value and repeats.
//!
//! # Lifecycle
//!
//! ```text
//! Inactive --activate()--> Active --deactivate()--> Deactivated
//! ```
//!
//! A deactivated session cannot be reactivated. `deactivate` cancels the
//! refresh task, releases the credential server-side if it has not expired,
//! and clears storage.
//!
//! # Security
//!
//! - Credential values are held as `SecretString` and never logged
//! - Refresh and release outcomes are logged without the token value

use crate::api::models::{StunServer, TokenResponse, TurnServer};
use crate::config::TokenConfig;
use crate::errors::{SessionError, TransportError};
use chrono::{DateTime, Utc};
use common::secret::SecretString;
use common::types::{ParticipantId, Role};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

// =============================================================================
// Constants
// =============================================================================

/// Upper bound on a credential lifetime (one year).
///
/// Keeps timestamp arithmetic in range for nonsensical server values.
const MAX_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;

// =============================================================================
// Clock
// =============================================================================

/// Source of the current time for expiry calculations.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wall clock.
#[must_use]
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

// =============================================================================
// Credential
// =============================================================================

/// A conference credential.
///
/// The identity fields (participant id, role) are fixed at issuance; a
/// refresh produces a new `Credential` through [`Credential::renewed`].
#[derive(Clone)]
pub struct Credential {
    value: SecretString,
    participant_id: ParticipantId,
    role: Role,
    expires_in: u64,
    issued_at: DateTime<Utc>,
    display_name: String,
    conference_name: String,
    service_type: Option<String>,
    chat_enabled: bool,
    stun: Vec<StunServer>,
    turn: Vec<TurnServer>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"[REDACTED]")
            .field("participant_id", &self.participant_id)
            .field("role", &self.role)
            .field("expires_in", &self.expires_in)
            .field("issued_at", &self.issued_at)
            .field("display_name", &self.display_name)
            .field("conference_name", &self.conference_name)
            .finish_non_exhaustive()
    }
}

impl Credential {
    /// Create a credential with only the fields the session needs.
    #[must_use]
    pub fn new(
        value: SecretString,
        participant_id: ParticipantId,
        role: Role,
        expires_in: u64,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            value,
            participant_id,
            role,
            expires_in: expires_in.min(MAX_LIFETIME_SECS),
            issued_at,
            display_name: String::new(),
            conference_name: String::new(),
            service_type: None,
            chat_enabled: false,
            stun: Vec::new(),
            turn: Vec::new(),
        }
    }

    /// Build a credential from a `request_token` response received at `issued_at`.
    #[must_use]
    pub fn from_response(response: TokenResponse, issued_at: DateTime<Utc>) -> Self {
        Self {
            value: response.token,
            participant_id: response.participant_uuid,
            role: response.role,
            expires_in: response.expires.min(MAX_LIFETIME_SECS),
            issued_at,
            display_name: response.display_name,
            conference_name: response.conference_name,
            service_type: response.service_type,
            chat_enabled: response.chat_enabled,
            stun: response.stun,
            turn: response.turn,
        }
    }

    /// The same identity with a new value and lifetime.
    #[must_use]
    pub fn renewed(&self, value: SecretString, expires_in: u64, issued_at: DateTime<Utc>) -> Self {
        Self {
            value,
            expires_in: expires_in.min(MAX_LIFETIME_SECS),
            issued_at,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    #[must_use]
    pub fn with_chat_enabled(mut self, enabled: bool) -> Self {
        self.chat_enabled = enabled;
        self
    }

    /// Token value for the `token` request header.
    #[must_use]
    pub fn value(&self) -> &SecretString {
        &self.value
    }

    #[must_use]
    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Lifetime in seconds from `issued_at`.
    #[must_use]
    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn conference_name(&self) -> &str {
        &self.conference_name
    }

    #[must_use]
    pub fn service_type(&self) -> Option<&str> {
        self.service_type.as_deref()
    }

    #[must_use]
    pub fn chat_enabled(&self) -> bool {
        self.chat_enabled
    }

    #[must_use]
    pub fn stun(&self) -> &[StunServer] {
        &self.stun
    }

    #[must_use]
    pub fn turn(&self) -> &[TurnServer] {
        &self.turn
    }

    /// `issued_at + expires_in`.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + seconds_to_delta(self.expires_in, 1)
    }

    /// `issued_at + expires_in / 2`.
    #[must_use]
    pub fn refresh_at(&self) -> DateTime<Utc> {
        self.issued_at + seconds_to_delta(self.expires_in, 2)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

fn seconds_to_delta(seconds: u64, divisor: u64) -> chrono::Duration {
    let millis = seconds.saturating_mul(1000) / divisor;
    chrono::Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX / 1_000_000))
}

fn until(target: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

// =============================================================================
// Storage
// =============================================================================

/// Storage for the current credential.
///
/// Implementations must replace the whole value atomically; readers never
/// observe a partially updated credential.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    /// Current credential, if any.
    async fn load(&self) -> Option<Credential>;

    /// Replace the current credential.
    async fn store(&self, credential: Credential);

    /// Remove the current credential.
    async fn clear(&self);
}

/// In-memory [`TokenStore`] backed by a watch channel.
#[derive(Debug)]
pub struct MemoryTokenStore {
    sender: watch::Sender<Option<Credential>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Create a store holding `credential`.
    #[must_use]
    pub fn with_credential(credential: Credential) -> Self {
        let (sender, _) = watch::channel(Some(credential));
        Self { sender }
    }

    /// Observe every replacement of the stored credential.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.sender.subscribe()
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Option<Credential> {
        self.sender.borrow().clone()
    }

    async fn store(&self, credential: Credential) {
        self.sender.send_replace(Some(credential));
    }

    async fn clear(&self) {
        self.sender.send_replace(None);
    }
}

// =============================================================================
// Token Service
// =============================================================================

/// New value and lifetime returned by a refresh.
#[derive(Clone)]
pub struct RefreshedToken {
    pub token: SecretString,
    pub expires_in: u64,
}

impl std::fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Server endpoints used by the session (enables mocking).
#[async_trait::async_trait]
pub trait TokenService: Send + Sync {
    /// Exchange `credential` for a fresh one.
    async fn refresh_token(&self, credential: &Credential) -> Result<RefreshedToken, TransportError>;

    /// Invalidate `credential` server-side.
    async fn release_token(&self, credential: &Credential) -> Result<(), TransportError>;
}

// =============================================================================
// Token Session
// =============================================================================

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSessionState {
    Inactive,
    Active,
    Deactivated,
}

/// Notifications published by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSessionEvent {
    /// Nothing has happened yet.
    Idle,
    /// A refresh succeeded; the next one is due at `refresh_at`.
    Refreshed { refresh_at: DateTime<Utc> },
    /// A refresh failed; storage was cleared and refreshing stopped.
    Failed { reason: String },
    /// The session was deactivated and storage cleared.
    Released,
}

struct RefreshTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum Phase {
    Inactive,
    Active(RefreshTask),
    Deactivated,
}

/// Background refresh of a stored conference credential.
pub struct TokenSession {
    service: Arc<dyn TokenService>,
    store: Arc<dyn TokenStore>,
    config: TokenConfig,
    clock: Clock,
    phase: Mutex<Phase>,
    events: watch::Sender<TokenSessionEvent>,
}

impl std::fmt::Debug for TokenSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSession")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenSession {
    #[must_use]
    pub fn new(
        service: Arc<dyn TokenService>,
        store: Arc<dyn TokenStore>,
        config: TokenConfig,
    ) -> Self {
        let (events, _) = watch::channel(TokenSessionEvent::Idle);
        Self {
            service,
            store,
            config,
            clock: system_clock(),
            phase: Mutex::new(Phase::Inactive),
            events,
        }
    }

    /// Replace the clock used for expiry calculations.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> TokenSessionState {
        match &*self.phase.lock().await {
            Phase::Inactive => TokenSessionState::Inactive,
            Phase::Active(_) => TokenSessionState::Active,
            Phase::Deactivated => TokenSessionState::Deactivated,
        }
    }

    /// Subscribe to refresh outcomes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TokenSessionEvent> {
        self.events.subscribe()
    }

    /// The stored credential.
    pub async fn credential(&self) -> Option<Credential> {
        self.store.load().await
    }

    /// Start refreshing the stored credential.
    ///
    /// # Errors
    ///
    /// - `SessionError::AlreadyActive` if the session is active
    /// - `SessionError::AlreadyDeactivated` if the session was deactivated
    /// - `SessionError::MissingCredential` if storage is empty
    /// - `SessionError::CredentialExpired` if the stored credential has expired
    #[instrument(skip_all)]
    pub async fn activate(&self) -> Result<(), SessionError> {
        let mut phase = self.phase.lock().await;
        match &*phase {
            Phase::Active(_) => return Err(SessionError::AlreadyActive),
            Phase::Deactivated => return Err(SessionError::AlreadyDeactivated),
            Phase::Inactive => {}
        }

        let credential = self
            .store
            .load()
            .await
            .ok_or(SessionError::MissingCredential)?;

        if credential.is_expired((self.clock)()) {
            warn!(
                target: "infinity.token",
                participant_id = %credential.participant_id(),
                expires_at = %credential.expires_at(),
                "Refusing to activate an expired credential"
            );
            return Err(SessionError::CredentialExpired);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(refresh_loop(
            Arc::clone(&self.service),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.events.clone(),
            cancel.clone(),
            credential.clone(),
        ));

        info!(
            target: "infinity.token",
            participant_id = %credential.participant_id(),
            refresh_at = %credential.refresh_at(),
            "Token session activated"
        );

        *phase = Phase::Active(RefreshTask { cancel, handle });
        Ok(())
    }

    /// Stop refreshing, release the credential and clear storage.
    ///
    /// The release call runs in its own task; this waits for it at most the
    /// configured grace period.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotActive` if the session was never activated
    /// - `SessionError::AlreadyDeactivated` if called twice
    #[instrument(skip_all)]
    pub async fn deactivate(&self) -> Result<(), SessionError> {
        let mut phase = self.phase.lock().await;
        let task = match std::mem::replace(&mut *phase, Phase::Deactivated) {
            Phase::Active(task) => task,
            Phase::Inactive => {
                *phase = Phase::Inactive;
                return Err(SessionError::NotActive);
            }
            Phase::Deactivated => return Err(SessionError::AlreadyDeactivated),
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(target: "infinity.token", error = %e, "Refresh task ended abnormally");
        }

        if let Some(credential) = self.store.load().await {
            if credential.is_expired((self.clock)()) {
                debug!(target: "infinity.token", "Credential already expired, skipping release");
            } else {
                self.release(credential).await;
            }
        }

        self.store.clear().await;
        self.events.send_replace(TokenSessionEvent::Released);
        info!(target: "infinity.token", "Token session deactivated");
        Ok(())
    }

    async fn release(&self, credential: Credential) {
        let service = Arc::clone(&self.service);
        let release = tokio::spawn(async move { service.release_token(&credential).await });

        match tokio::time::timeout(self.config.release_grace_period, release).await {
            Ok(Ok(Ok(()))) => debug!(target: "infinity.token", "Credential released"),
            Ok(Ok(Err(e))) => {
                warn!(target: "infinity.token", error = %e, "Credential release failed");
            }
            Ok(Err(e)) => {
                warn!(target: "infinity.token", error = %e, "Credential release task failed");
            }
            Err(_) => {
                debug!(
                    target: "infinity.token",
                    grace_ms = self.config.release_grace_period.as_millis(),
                    "Release still in flight after grace period, continuing"
                );
            }
        }
    }
}

impl Drop for TokenSession {
    fn drop(&mut self) {
        if let Ok(phase) = self.phase.try_lock() {
            if let Phase::Active(task) = &*phase {
                task.cancel.cancel();
            }
        }
    }
}

/// Sleep until the refresh point, refresh, store, repeat.
///
/// Exits on cancellation or on the first failed refresh. A failure clears
/// storage, since the credential can no longer be kept alive.
async fn refresh_loop(
    service: Arc<dyn TokenService>,
    store: Arc<dyn TokenStore>,
    clock: Clock,
    events: watch::Sender<TokenSessionEvent>,
    cancel: CancellationToken,
    mut credential: Credential,
) {
    loop {
        let wait = until(credential.refresh_at(), clock());
        debug!(target: "infinity.token", wait_ms = wait.as_millis(), "Scheduling credential refresh");

        tokio::select! {
            () = cancel.cancelled() => {
                debug!(target: "infinity.token", "Refresh cancelled while waiting");
                return;
            }
            () = tokio::time::sleep(wait) => {}
        }

        let result = tokio::select! {
            () = cancel.cancelled() => {
                debug!(target: "infinity.token", "Refresh cancelled while in flight");
                return;
            }
            result = service.refresh_token(&credential) => result,
        };

        let failure = match result {
            Ok(refreshed) if refreshed.expires_in == 0 => {
                "refreshed credential has no lifetime".to_string()
            }
            Ok(refreshed) => {
                let renewed = credential.renewed(refreshed.token, refreshed.expires_in, clock());
                store.store(renewed.clone()).await;
                debug!(
                    target: "infinity.token",
                    expires_in_secs = renewed.expires_in(),
                    refresh_at = %renewed.refresh_at(),
                    "Credential refreshed"
                );
                events.send_replace(TokenSessionEvent::Refreshed {
                    refresh_at: renewed.refresh_at(),
                });
                credential = renewed;
                continue;
            }
            Err(e) => e.to_string(),
        };

        warn!(target: "infinity.token", error = %failure, "Credential refresh failed, clearing storage");
        store.clear().await;
        events.send_replace(TokenSessionEvent::Failed { reason: failure });
        return;
    }
}

// =============================================================================
// Tests
// =============================================================================
