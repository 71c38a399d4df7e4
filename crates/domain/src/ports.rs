//! Port traits implemented by infrastructure crates.
//!
//! The orchestration layer depends only on these traits, which lets tests
//! substitute an in-memory upstream that fails a controlled number of times.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::{
    AccessToken, CallbackUrl, Credential, Event, EventFilter, ProcessingError, RegistrationId,
    ServeError, UpstreamError, WebhookRegistration, WebhookSecret, WebhookSummary,
};

/// Typed access to the upstream task API.
///
/// Every call is bounded by a per-request timeout; a timeout surfaces as
/// [`UpstreamError::Transient`].
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Returns `true` when the upstream reports itself ready.
    ///
    /// Never fails: connection errors and timeouts yield `false`.
    async fn health_check(&self) -> bool;

    /// Exchanges admin credentials for a bearer credential.
    async fn login(&self, email: &str, password: &SecretString)
        -> Result<Credential, UpstreamError>;

    /// Creates a webhook subscription delivering `events` to `callback_url`.
    async fn register_webhook(
        &self,
        token: &AccessToken,
        callback_url: &CallbackUrl,
        events: &EventFilter,
    ) -> Result<WebhookRegistration, UpstreamError>;

    /// Deletes a webhook subscription.
    async fn unregister_webhook(
        &self,
        token: &AccessToken,
        id: &RegistrationId,
    ) -> Result<(), UpstreamError>;

    /// Lists the subscriptions currently known to the upstream.
    async fn list_webhooks(&self, token: &AccessToken)
        -> Result<Vec<WebhookSummary>, UpstreamError>;
}

/// The processing hook that receives verified events.
///
/// Implementations may be slow; the consumer never awaits them on the request
/// path.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Handles one event.
    async fn process(&self, event: Event) -> Result<(), ProcessingError>;
}

/// The inbound delivery server started once startup reaches `Serving`.
#[async_trait]
pub trait DeliveryServer: Send + Sync {
    /// Serves deliveries verified with `secret` until shutdown is requested.
    ///
    /// Must return only after in-flight deliveries have been handled.
    async fn serve(&self, secret: WebhookSecret) -> Result<(), ServeError>;
}
