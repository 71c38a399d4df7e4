//! Webhook subscription lifecycle.
//!
//! The [`RegistryManager`] creates the subscription that points the upstream
//! at our callback URL and remembers its id so the subscription can be removed
//! on shutdown. Removal is best-effort: the process is already exiting, so
//! failures are logged and swallowed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use domain::{
    AccessToken, CallbackUrl, EventFilter, RegistrationId, UpstreamApi, UpstreamError,
    WebhookRegistration,
};
use tracing::{info, warn};

use crate::AuthManager;

/// Creates and removes the webhook subscription.
pub struct RegistryManager {
    api: Arc<dyn UpstreamApi>,
    held: Mutex<Option<RegistrationId>>,
}

impl RegistryManager {
    /// Creates a manager holding no registration.
    pub fn new(api: Arc<dyn UpstreamApi>) -> Self {
        Self {
            api,
            held: Mutex::new(None),
        }
    }

    /// Registers a webhook delivering `event_filter` to `callback_url`.
    ///
    /// Issues exactly one request. On success the registration id is held for
    /// [`Self::unregister`].
    ///
    /// # Errors
    ///
    /// Returns the upstream error unchanged; the caller owns retry policy.
    pub async fn register(
        &self,
        token: &AccessToken,
        callback_url: &CallbackUrl,
        event_filter: &EventFilter,
    ) -> Result<WebhookRegistration, UpstreamError> {
        info!(
            callback_url = %callback_url,
            events = %event_filter,
            "Registering webhook"
        );
        let registration = self
            .api
            .register_webhook(token, callback_url, event_filter)
            .await?;

        info!(
            registration_id = %registration.id,
            events = %registration.subscribed_events,
            upstream_secret = registration.secret.is_some(),
            "Webhook registered"
        );
        *self.lock_held() = Some(registration.id.clone());
        Ok(registration)
    }

    /// Deletes subscriptions that already point at `callback_url`.
    ///
    /// Such leftovers come from a previous run that did not shut down cleanly;
    /// keeping them would double every delivery. Best-effort: failures are
    /// logged and ignored.
    pub async fn remove_stale(&self, token: &AccessToken, callback_url: &CallbackUrl) {
        let existing = match self.api.list_webhooks(token).await {
            Ok(existing) => existing,
            Err(error) => {
                warn!(error = %error, "Could not list existing webhooks; skipping cleanup");
                return;
            }
        };

        let stale = existing
            .into_iter()
            .filter(|hook| hook.callback_url.as_deref() == Some(callback_url.as_str()));
        for hook in stale {
            match self.api.unregister_webhook(token, &hook.id).await {
                Ok(()) => info!(registration_id = %hook.id, "Deleted stale webhook"),
                Err(error) => warn!(
                    registration_id = %hook.id,
                    error = %error,
                    "Could not delete stale webhook"
                ),
            }
        }
    }

    /// Deletes the held registration, if any.
    ///
    /// Idempotent: the id is released before the request is sent, so a second
    /// call never issues a second request. A rejected credential is refreshed
    /// once before giving up.
    pub async fn unregister(&self, auth: &AuthManager) {
        let held = self.lock_held().take();
        let Some(id) = held else {
            return;
        };

        for attempt in 1..=2 {
            let token = match auth.get_token().await {
                Ok(token) => token,
                Err(error) => {
                    warn!(registration_id = %id, error = %error, "Cannot unregister webhook: login failed");
                    return;
                }
            };

            match self.api.unregister_webhook(&token, &id).await {
                Ok(()) => {
                    info!(registration_id = %id, "Webhook unregistered");
                    return;
                }
                Err(error) if error.is_auth_rejected() && attempt == 1 => {
                    auth.invalidate(&token);
                }
                Err(error) => {
                    warn!(registration_id = %id, error = %error, "Failed to unregister webhook");
                    return;
                }
            }
        }
    }

    /// Returns the id of the held registration, if any.
    pub fn held_registration(&self) -> Option<RegistrationId> {
        self.lock_held().clone()
    }

    fn lock_held(&self) -> MutexGuard<'_, Option<RegistrationId>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
