//! Bearer credential ownership with single-flight refresh.
//!
//! The [`AuthManager`] holds at most one [`Credential`]. When none is cached,
//! the first caller of [`AuthManager::get_token`] becomes the *leader*: it
//! marks a refresh as in progress and performs the login without holding the
//! state lock. Every caller that arrives while the refresh is in progress
//! waits on a `watch` channel and receives the leader's outcome, so any number
//! of concurrent callers produce exactly one login request.
//!
//! The manager never retries. Retry policy belongs to the orchestrator.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use domain::{AccessToken, Credential, UpstreamApi, UpstreamError};
use secrecy::SecretString;
use tokio::sync::watch;
use tracing::{debug, info, warn};

type LoginOutcome = Result<Credential, UpstreamError>;

/// Shared cell guarded by [`AuthManager::state`].
#[derive(Default)]
struct AuthState {
    /// The live credential, if any.
    credential: Option<Credential>,
    /// Present while a login is in flight. `None` in the channel means the
    /// leader has not finished yet.
    refresh: Option<watch::Receiver<Option<LoginOutcome>>>,
}

enum Role {
    Leader(watch::Sender<Option<LoginOutcome>>),
    Follower(watch::Receiver<Option<LoginOutcome>>),
}

/// Obtains, caches, and invalidates the upstream bearer credential.
pub struct AuthManager {
    api: Arc<dyn UpstreamApi>,
    email: String,
    password: SecretString,
    state: Mutex<AuthState>,
}

impl AuthManager {
    /// Creates a manager that logs in with the given admin account.
    pub fn new(api: Arc<dyn UpstreamApi>, email: impl Into<String>, password: SecretString) -> Self {
        Self {
            api,
            email: email.into(),
            password,
            state: Mutex::new(AuthState::default()),
        }
    }

    /// Returns the cached token, logging in first if there is none.
    ///
    /// # Errors
    ///
    /// Returns the login error unchanged. Concurrent callers that coalesced
    /// onto the same login all receive the same error.
    pub async fn get_token(&self) -> Result<AccessToken, UpstreamError> {
        loop {
            let role = {
                let mut state = self.lock_state();
                if let Some(credential) = &state.credential {
                    return Ok(credential.token.clone());
                }
                match &state.refresh {
                    // A closed channel means the previous leader was cancelled
                    // before it published an outcome.
                    Some(rx) if rx.has_changed().is_ok() => Role::Follower(rx.clone()),
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        state.refresh = Some(rx);
                        Role::Leader(tx)
                    }
                }
            };

            match role {
                Role::Leader(tx) => return self.refresh(tx).await,
                Role::Follower(mut rx) => {
                    debug!("login already in flight, waiting for its outcome");
                    let shared = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => (*outcome).clone(),
                        Err(_) => None,
                    };
                    if let Some(outcome) = shared {
                        return outcome.map(|credential| credential.token);
                    }
                    debug!("login leader went away before finishing; retrying");
                }
            }
        }
    }

    /// Discards the cached credential if it is still `rejected`, so the next
    /// [`Self::get_token`] logs in again.
    ///
    /// Called by anything that receives a 401/403 from the upstream. A
    /// credential another caller already refreshed is left alone.
    pub fn invalidate(&self, rejected: &AccessToken) {
        let mut state = self.lock_state();
        if state.credential.as_ref().map(|c| &c.token) != Some(rejected) {
            debug!(token = rejected.fingerprint(), "Rejected credential already replaced");
            return;
        }
        if let Some(old) = state.credential.take() {
            info!(
                token = old.token.fingerprint(),
                obtained_at = %old.obtained_at,
                "Discarding rejected credential"
            );
        }
    }

    /// Returns `true` if a credential is currently cached.
    pub fn has_credential(&self) -> bool {
        self.lock_state().credential.is_some()
    }

    async fn refresh(&self, tx: watch::Sender<Option<LoginOutcome>>) -> Result<AccessToken, UpstreamError> {
        info!(email = %self.email, "Logging in to upstream");
        let outcome = self.api.login(&self.email, &self.password).await;

        {
            let mut state = self.lock_state();
            state.refresh = None;
            match &outcome {
                Ok(credential) => {
                    info!(token = credential.token.fingerprint(), "Authenticated");
                    state.credential = Some(credential.clone());
                }
                Err(error) => warn!(error = %error, "Login failed"),
            }
        }

        tx.send_replace(Some(outcome.clone()));
        outcome.map(|credential| credential.token)
    }

    fn lock_state(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
