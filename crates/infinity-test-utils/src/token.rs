//! Token service mock and credential fixtures.

use chrono::{DateTime, Utc};
use common::types::{ParticipantId, Role};
use infinity_client::errors::TransportError;
use infinity_client::token::{Credential, RefreshedToken, TokenService};
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Builder for test credentials.
///
/// Defaults: value `"test-token"`, a random participant id, guest role,
/// 120 second lifetime, issued now.
#[derive(Debug, Clone)]
pub struct TestCredential {
    value: String,
    participant_id: ParticipantId,
    role: Role,
    expires_in: u64,
    issued_at: DateTime<Utc>,
    display_name: String,
}

impl Default for TestCredential {
    fn default() -> Self {
        Self {
            value: "test-token".to_string(),
            participant_id: ParticipantId::new(),
            role: Role::Guest,
            expires_in: 120,
            issued_at: Utc::now(),
            display_name: "Test Participant".to_string(),
        }
    }
}

impl TestCredential {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    #[must_use]
    pub fn participant_id(mut self, id: ParticipantId) -> Self {
        self.participant_id = id;
        self
    }

    #[must_use]
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    #[must_use]
    pub fn expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = seconds;
        self
    }

    #[must_use]
    pub fn issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.issued_at = at;
        self
    }

    /// Issue the credential `seconds` before `now`.
    #[must_use]
    pub fn issued_ago(self, now: DateTime<Utc>, seconds: i64) -> Self {
        self.issued_at(now - chrono::Duration::seconds(seconds))
    }

    #[must_use]
    pub fn build(self) -> Credential {
        Credential::new(
            SecretString::from(self.value),
            self.participant_id,
            self.role,
            self.expires_in,
            self.issued_at,
        )
        .with_display_name(self.display_name)
    }
}

/// [`TokenService`] mock counting calls.
///
/// Refreshes return `refreshed-{n}` with the configured lifetime unless a
/// failure status is set.
#[derive(Debug)]
pub struct MockTokenService {
    refreshes: AtomicU32,
    releases: AtomicU32,
    refresh_lifetime: u64,
    refresh_failure: Option<u16>,
    release_delay: Duration,
    released_values: Mutex<Vec<String>>,
}

impl Default for MockTokenService {
    fn default() -> Self {
        Self {
            refreshes: AtomicU32::new(0),
            releases: AtomicU32::new(0),
            refresh_lifetime: 120,
            refresh_failure: None,
            release_delay: Duration::ZERO,
            released_values: Mutex::default(),
        }
    }
}

impl MockTokenService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime of refreshed credentials in seconds.
    #[must_use]
    pub fn with_refresh_lifetime(mut self, seconds: u64) -> Self {
        self.refresh_lifetime = seconds;
        self
    }

    /// Fail every refresh with `status`.
    #[must_use]
    pub fn failing_refresh(mut self, status: u16) -> Self {
        self.refresh_failure = Some(status);
        self
    }

    #[must_use]
    pub fn with_release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = delay;
        self
    }

    pub fn refresh_count(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }

    /// Token values passed to `release_token`.
    pub fn released_values(&self) -> Vec<String> {
        self.released_values.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TokenService for MockTokenService {
    async fn refresh_token(&self, _credential: &Credential) -> Result<RefreshedToken, TransportError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(status) = self.refresh_failure {
            return Err(TransportError::UnexpectedStatus { status });
        }
        Ok(RefreshedToken {
            token: SecretString::from(format!("refreshed-{n}")),
            expires_in: self.refresh_lifetime,
        })
    }

    async fn release_token(&self, credential: &Credential) -> Result<(), TransportError> {
        if !self.release_delay.is_zero() {
            tokio::time::sleep(self.release_delay).await;
        }
        self.released_values
            .lock()
            .unwrap()
            .push(credential.value().expose_secret().to_string());
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
