//! In-memory upstream used by the orchestration tests.
//!
//! Each operation can be scripted to fail a controlled number of times. Every
//! call is appended to a log so tests can assert on ordering.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    AccessToken, CallbackUrl, Credential, DeliveryServer, EventFilter, RegistrationId, ServeError,
    UpstreamApi, UpstreamError, WebhookRegistration, WebhookSecret, WebhookSummary,
};
use secrecy::SecretString;

/// One observed call against the fake upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Health,
    Login,
    List,
    Register { token: String },
    Unregister { token: String, id: String },
}

#[derive(Default)]
pub struct FakeUpstream {
    health_failures: AtomicU32,
    login_results: Mutex<VecDeque<UpstreamError>>,
    register_results: Mutex<VecDeque<UpstreamError>>,
    unregister_results: Mutex<VecDeque<UpstreamError>>,
    existing: Mutex<Vec<WebhookSummary>>,
    issued_secret: Option<String>,
    login_delay: Option<Duration>,
    logins: AtomicU32,
    calls: Mutex<Vec<Call>>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// The health endpoint fails `n` times before answering.
    pub fn with_health_failures(self, n: u32) -> Self {
        self.health_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Login fails with these errors, in order, before succeeding.
    pub fn with_login_errors(self, errors: impl IntoIterator<Item = UpstreamError>) -> Self {
        self.login_results.lock().unwrap().extend(errors);
        self
    }

    /// Registration fails with these errors, in order, before succeeding.
    pub fn with_register_errors(self, errors: impl IntoIterator<Item = UpstreamError>) -> Self {
        self.register_results.lock().unwrap().extend(errors);
        self
    }

    /// Deletion fails with these errors, in order, before succeeding.
    pub fn with_unregister_errors(self, errors: impl IntoIterator<Item = UpstreamError>) -> Self {
        self.unregister_results.lock().unwrap().extend(errors);
        self
    }

    /// Registrations returned by the listing endpoint.
    pub fn with_existing(self, hooks: impl IntoIterator<Item = (&'static str, &'static str)>) -> Self {
        self.existing.lock().unwrap().extend(hooks.into_iter().map(|(id, url)| WebhookSummary {
            id: RegistrationId::new(id).unwrap(),
            callback_url: Some(url.to_string()),
        }));
        self
    }

    /// Registration responses carry this secret.
    pub fn with_issued_secret(mut self, secret: &str) -> Self {
        self.issued_secret = Some(secret.to_string());
        self
    }

    /// Every login takes this long.
    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn login_count(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn transient(message: &str) -> UpstreamError {
    UpstreamError::Transient {
        message: message.to_string(),
        retry_after: None,
    }
}

#[async_trait]
impl UpstreamApi for FakeUpstream {
    async fn health_check(&self) -> bool {
        self.record(Call::Health);
        self.health_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    async fn login(
        &self,
        _email: &str,
        _password: &SecretString,
    ) -> Result<Credential, UpstreamError> {
        self.record(Call::Login);
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.login_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.login_results.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(Credential::issued_now(
            AccessToken::new(format!("token-{n}")).unwrap(),
        ))
    }

    async fn register_webhook(
        &self,
        token: &AccessToken,
        callback_url: &CallbackUrl,
        events: &EventFilter,
    ) -> Result<WebhookRegistration, UpstreamError> {
        self.record(Call::Register {
            token: token.expose().to_string(),
        });
        if let Some(err) = self.register_results.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(WebhookRegistration {
            id: RegistrationId::new("wh-1").unwrap(),
            callback_url: callback_url.clone(),
            subscribed_events: events.clone(),
            secret: self.issued_secret.as_deref().and_then(WebhookSecret::new),
        })
    }

    async fn unregister_webhook(
        &self,
        token: &AccessToken,
        id: &RegistrationId,
    ) -> Result<(), UpstreamError> {
        self.record(Call::Unregister {
            token: token.expose().to_string(),
            id: id.to_string(),
        });
        match self.unregister_results.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn list_webhooks(&self, _token: &AccessToken) -> Result<Vec<WebhookSummary>, UpstreamError> {
        self.record(Call::List);
        Ok(self.existing.lock().unwrap().clone())
    }
}

/// A delivery server that returns immediately and remembers the secret bytes.
#[derive(Default)]
pub struct FakeServer {
    pub served_with: Mutex<Option<Vec<u8>>>,
}

#[async_trait]
impl DeliveryServer for FakeServer {
    async fn serve(&self, secret: WebhookSecret) -> Result<(), ServeError> {
        *self.served_with.lock().unwrap() = Some(secret.expose_bytes().to_vec());
        Ok(())
    }
}
