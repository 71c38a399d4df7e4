//! Startup state machine.
//!
//! | State | Action | Success | Failure |
//! |-------|--------|---------|---------|
//! | `WaitingForUpstream` | poll health every `poll_interval` | `Authenticating` | `Failed` after `max_wait` |
//! | `Authenticating` | `AuthManager::get_token` | `Registering` | back-off retry, `Failed` when exhausted |
//! | `Registering` | stale cleanup, `RegistryManager::register` | `Serving` | back-off retry; 401/403 invalidates and returns to `Authenticating`; `Failed` when exhausted |
//! | `Serving` | run the delivery server | shutdown, then unregister | n/a |
//!
//! Every wait is bounded, so startup either reaches `Serving` or fails within
//! a predictable window.

use std::sync::Arc;
use std::time::Duration;

use domain::{
    AccessToken, CallbackUrl, DeliveryServer, EventFilter, RegistrationId, RetryPolicy,
    StartupError, StartupStage, UpstreamApi, UpstreamError, WebhookRegistration, WebhookSecret,
};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::{AuthManager, BackoffPolicy, RegistryManager};

/// States of the startup state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartupState {
    /// Polling the upstream health endpoint.
    WaitingForUpstream,
    /// Obtaining a bearer credential.
    Authenticating,
    /// Creating the webhook subscription.
    Registering,
    /// Running the delivery server.
    Serving,
    /// Terminal: startup gave up.
    Failed,
}

/// Tunables for the startup sequence.
#[derive(Debug, Clone)]
pub struct StartupSettings {
    /// Delay between health polls.
    pub poll_interval: Duration,
    /// Upper bound on the time spent waiting for the upstream.
    pub max_wait: Duration,
    /// Retry policy for authentication and registration.
    pub backoff: BackoffPolicy,
    /// URL registered with the upstream.
    pub callback_url: CallbackUrl,
    /// Events to subscribe to, forwarded verbatim.
    pub events: EventFilter,
    /// Delete leftover subscriptions for `callback_url` before registering.
    pub cleanup_stale: bool,
}

/// Everything the delivery server needs once startup has succeeded.
#[derive(Debug)]
pub struct ReadySession {
    /// Id of the live subscription.
    pub registration_id: RegistrationId,
    /// Key used to verify deliveries.
    pub secret: WebhookSecret,
}

/// Drives the service from process start to `Serving`.
pub struct StartupOrchestrator {
    settings: StartupSettings,
    api: Arc<dyn UpstreamApi>,
    auth: Arc<AuthManager>,
    registry: Arc<RegistryManager>,
    configured_secret: Option<WebhookSecret>,
    state: StartupState,
    visited: Vec<StartupState>,
    token: Option<AccessToken>,
    session: Option<ReadySession>,
    registration_attempts: u32,
}

impl StartupOrchestrator {
    /// Creates an orchestrator in `WaitingForUpstream`.
    ///
    /// `configured_secret` takes precedence over a secret issued by the
    /// upstream at registration time.
    pub fn new(
        settings: StartupSettings,
        api: Arc<dyn UpstreamApi>,
        auth: Arc<AuthManager>,
        registry: Arc<RegistryManager>,
        configured_secret: Option<WebhookSecret>,
    ) -> Self {
        Self {
            settings,
            api,
            auth,
            registry,
            configured_secret,
            state: StartupState::WaitingForUpstream,
            visited: vec![StartupState::WaitingForUpstream],
            token: None,
            session: None,
            registration_attempts: 0,
        }
    }

    /// The current state.
    pub fn state(&self) -> StartupState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn visited(&self) -> &[StartupState] {
        &self.visited
    }

    /// Runs the full lifecycle: startup, serving until shutdown, then
    /// best-effort unregistration.
    ///
    /// # Errors
    ///
    /// Returns a [`StartupError`] if startup fails or the server stops
    /// abnormally. The caller should exit with a non-zero status.
    pub async fn run(mut self, server: &dyn DeliveryServer) -> Result<(), StartupError> {
        let session = self.bootstrap().await?;

        info!(registration_id = %session.registration_id, "Serving webhook deliveries");
        let served = server.serve(session.secret).await;

        // The server only returns after draining in-flight deliveries.
        self.registry.unregister(&self.auth).await;
        served.map_err(StartupError::from)
    }

    /// Runs the pre-serving states and returns the session to serve with.
    ///
    /// On success the orchestrator is in `Serving`; on failure, in `Failed`.
    ///
    /// # Errors
    ///
    /// Returns the [`StartupError`] that moved the machine to `Failed`.
    pub async fn bootstrap(&mut self) -> Result<ReadySession, StartupError> {
        loop {
            let next = match self.state {
                StartupState::WaitingForUpstream => self.wait_for_upstream().await,
                StartupState::Authenticating => self.authenticate().await,
                StartupState::Registering => self.register().await,
                StartupState::Serving | StartupState::Failed => {
                    return self.session.take().ok_or(StartupError::AlreadyFinished);
                }
            };

            match next {
                Ok(state) => self.transition(state),
                Err(err) => {
                    error!(error = %err, "Startup failed");
                    self.transition(StartupState::Failed);
                    return Err(err);
                }
            }
        }
    }

    fn transition(&mut self, next: StartupState) {
        info!(from = ?self.state, to = ?next, "Startup state transition");
        self.state = next;
        self.visited.push(next);
    }

    async fn wait_for_upstream(&mut self) -> Result<StartupState, StartupError> {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            polls += 1;
            if self.api.health_check().await {
                info!(polls, elapsed = ?started.elapsed(), "Upstream is healthy");
                return Ok(StartupState::Authenticating);
            }

            let waited = started.elapsed();
            if waited + self.settings.poll_interval > self.settings.max_wait {
                return Err(StartupError::UpstreamNeverReady { waited });
            }
            debug!(polls, "Upstream not ready yet");
            sleep(self.settings.poll_interval).await;
        }
    }

    async fn authenticate(&mut self) -> Result<StartupState, StartupError> {
        let stage = StartupStage::Authenticating;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.auth.get_token().await {
                Ok(token) => {
                    self.token = Some(token);
                    return Ok(StartupState::Registering);
                }
                Err(error) => {
                    let delay = self.retry_delay(stage, attempts, error)?;
                    sleep(delay).await;
                }
            }
        }
    }

    async fn register(&mut self) -> Result<StartupState, StartupError> {
        let stage = StartupStage::Registering;

        loop {
            let Some(token) = self.token.clone() else {
                return Ok(StartupState::Authenticating);
            };

            if self.settings.cleanup_stale {
                self.registry
                    .remove_stale(&token, &self.settings.callback_url)
                    .await;
            }

            self.registration_attempts += 1;
            let result = self
                .registry
                .register(&token, &self.settings.callback_url, &self.settings.events)
                .await;

            match result {
                Ok(registration) => {
                    self.session = Some(self.open_session(registration).await?);
                    return Ok(StartupState::Serving);
                }
                Err(error) => {
                    let reauthenticate = error.is_auth_rejected();
                    let delay = self.retry_delay(stage, self.registration_attempts, error)?;
                    sleep(delay).await;

                    if reauthenticate {
                        // Never retry with the rejected token.
                        self.auth.invalidate(&token);
                        self.token = None;
                        return Ok(StartupState::Authenticating);
                    }
                }
            }
        }
    }

    /// Decides whether a failed attempt may be retried and how long to wait.
    fn retry_delay(
        &self,
        stage: StartupStage,
        attempts: u32,
        error: UpstreamError,
    ) -> Result<Duration, StartupError> {
        let policy = error.retry_policy();
        if policy == RetryPolicy::NonRetryable {
            return Err(StartupError::NonRetryable { stage, error });
        }
        if self.settings.backoff.is_exhausted(attempts) {
            return Err(StartupError::RetriesExhausted {
                stage,
                attempts,
                last_error: error,
            });
        }

        let delay = self.settings.backoff.delay_after(attempts, &policy);
        warn!(
            stage = %stage,
            attempt = attempts,
            max_attempts = self.settings.backoff.max_attempts,
            retry_in = ?delay,
            error = %error,
            "Startup step failed; retrying"
        );
        Ok(delay)
    }

    /// Picks the key deliveries are verified with. A configured secret wins
    /// over one issued by the upstream.
    async fn open_session(
        &mut self,
        registration: WebhookRegistration,
    ) -> Result<ReadySession, StartupError> {
        match self.configured_secret.take().or(registration.secret) {
            Some(secret) => Ok(ReadySession {
                registration_id: registration.id,
                secret,
            }),
            None => {
                // Deliveries could never be verified; do not leave a dangling
                // subscription behind.
                self.registry.unregister(&self.auth).await;
                Err(StartupError::MissingSecret)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{transient, Call, FakeServer, FakeUpstream};
    use secrecy::SecretString;

    fn settings() -> StartupSettings {
        StartupSettings {
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(5),
            backoff: BackoffPolicy::new(3, Duration::from_secs(1)),
            callback_url: CallbackUrl::new("http://receiver:9000/webhook").unwrap(),
            events: EventFilter::parse("task.created,task.*"),
            cleanup_stale: false,
        }
    }

    fn orchestrator_with(
        api: FakeUpstream,
        settings: StartupSettings,
        secret: Option<&str>,
    ) -> (Arc<FakeUpstream>, StartupOrchestrator) {
        let api = Arc::new(api);
        let auth = Arc::new(AuthManager::new(
            api.clone(),
            "admin@example.com",
            SecretString::from("admin123"),
        ));
        let registry = Arc::new(RegistryManager::new(api.clone()));
        let orchestrator = StartupOrchestrator::new(
            settings,
            api.clone(),
            auth,
            registry,
            secret.and_then(WebhookSecret::new),
        );
        (api, orchestrator)
    }

    fn orchestrator(api: FakeUpstream) -> (Arc<FakeUpstream>, StartupOrchestrator) {
        orchestrator_with(api, settings(), Some("shared-secret"))
    }

    fn count(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
        calls.iter().filter(|c| pred(c)).count()
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_reaches_serving() {
        let (api, mut orch) = orchestrator(FakeUpstream::new());

        let session = orch.bootstrap().await.unwrap();

        assert_eq!(orch.state(), StartupState::Serving);
        assert_eq!(session.registration_id.as_str(), "wh-1");
        assert_eq!(session.secret.expose_bytes(), b"shared-secret");
        assert_eq!(
            orch.visited(),
            [
                StartupState::WaitingForUpstream,
                StartupState::Authenticating,
                StartupState::Registering,
                StartupState::Serving,
            ]
        );
        assert_eq!(
            api.calls(),
            vec![
                Call::Health,
                Call::Login,
                Call::Register {
                    token: "token-1".into()
                }
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn health_failures_within_budget_reach_serving() {
        // Polls happen at t = 0, 1, 2, 3, 4, 5; the sixth poll is the last.
        let (api, mut orch) = orchestrator(FakeUpstream::new().with_health_failures(5));
        let started = Instant::now();

        orch.bootstrap().await.unwrap();

        assert_eq!(orch.state(), StartupState::Serving);
        assert_eq!(count(&api.calls(), |c| *c == Call::Health), 6);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn health_failures_beyond_budget_fail() {
        let (api, mut orch) = orchestrator(FakeUpstream::new().with_health_failures(6));

        let err = orch.bootstrap().await.unwrap_err();

        assert!(matches!(err, StartupError::UpstreamNeverReady { .. }));
        assert_eq!(orch.state(), StartupState::Failed);
        assert_eq!(count(&api.calls(), |c| *c == Call::Health), 6);
        assert_eq!(count(&api.calls(), |c| *c == Call::Login), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn login_failures_are_retried_with_backoff() {
        let (api, mut orch) = orchestrator(FakeUpstream::new().with_login_errors([
            UpstreamError::AuthRejected { status: 401 },
            transient("connection refused"),
        ]));
        let started = Instant::now();

        orch.bootstrap().await.unwrap();

        assert_eq!(count(&api.calls(), |c| *c == Call::Login), 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn login_failures_beyond_budget_fail() {
        let (api, mut orch) = orchestrator(FakeUpstream::new().with_login_errors(
            std::iter::repeat_with(|| transient("503")).take(3),
        ));

        let err = orch.bootstrap().await.unwrap_err();

        match err {
            StartupError::RetriesExhausted {
                stage, attempts, ..
            } => {
                assert_eq!(stage, StartupStage::Authenticating);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(orch.state(), StartupState::Failed);
        assert_eq!(count(&api.calls(), |c| *c == Call::Login), 3);
        assert_eq!(count(&api.calls(), |c| matches!(c, Call::Register { .. })), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_login_error_fails_immediately() {
        let (api, mut orch) = orchestrator(FakeUpstream::new().with_login_errors([
            UpstreamError::Configuration {
                message: "bad base url".into(),
            },
        ]));

        let err = orch.bootstrap().await.unwrap_err();

        assert!(matches!(
            err,
            StartupError::NonRetryable {
                stage: StartupStage::Authenticating,
                ..
            }
        ));
        assert_eq!(count(&api.calls(), |c| *c == Call::Login), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_rejection_during_registration_reauthenticates_first() {
        let (api, mut orch) = orchestrator(
            FakeUpstream::new().with_register_errors([UpstreamError::AuthRejected { status: 401 }]),
        );

        orch.bootstrap().await.unwrap();

        assert_eq!(
            api.calls(),
            vec![
                Call::Health,
                Call::Login,
                Call::Register {
                    token: "token-1".into()
                },
                Call::Login,
                Call::Register {
                    token: "token-2".into()
                },
            ]
        );
        assert_eq!(
            orch.visited(),
            [
                StartupState::WaitingForUpstream,
                StartupState::Authenticating,
                StartupState::Registering,
                StartupState::Authenticating,
                StartupState::Registering,
                StartupState::Serving,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_registration_failures_retry_with_same_token() {
        let (api, mut orch) = orchestrator(
            FakeUpstream::new().with_register_errors([transient("502"), transient("504")]),
        );

        orch.bootstrap().await.unwrap();

        let registers: Vec<_> = api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Register { .. }))
            .collect();
        assert_eq!(
            registers,
            vec![
                Call::Register {
                    token: "token-1".into()
                };
                3
            ]
        );
        assert_eq!(count(&api.calls(), |c| *c == Call::Login), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn registration_budget_counts_reauthentication_rounds() {
        let (api, mut orch) = orchestrator(FakeUpstream::new().with_register_errors(
            std::iter::repeat_with(|| UpstreamError::AuthRejected { status: 403 }).take(3),
        ));

        let err = orch.bootstrap().await.unwrap_err();

        assert!(matches!(
            err,
            StartupError::RetriesExhausted {
                stage: StartupStage::Registering,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(count(&api.calls(), |c| matches!(c, Call::Register { .. })), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_registrations_are_removed_before_registering() {
        let mut settings = settings();
        settings.cleanup_stale = true;
        let (api, mut orch) = orchestrator_with(
            FakeUpstream::new().with_existing([("old", "http://receiver:9000/webhook")]),
            settings,
            Some("shared-secret"),
        );

        orch.bootstrap().await.unwrap();

        assert_eq!(
            api.calls()[2..],
            [
                Call::List,
                Call::Unregister {
                    token: "token-1".into(),
                    id: "old".into()
                },
                Call::Register {
                    token: "token-1".into()
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_issued_secret_used_when_none_configured() {
        let (_api, mut orch) = orchestrator_with(
            FakeUpstream::new().with_issued_secret("from-upstream"),
            settings(),
            None,
        );

        let session = orch.bootstrap().await.unwrap();

        assert_eq!(session.secret.expose_bytes(), b"from-upstream");
    }

    #[tokio::test(start_paused = true)]
    async fn configured_secret_wins_over_issued_secret() {
        let (_api, mut orch) = orchestrator_with(
            FakeUpstream::new().with_issued_secret("from-upstream"),
            settings(),
            Some("configured"),
        );

        let session = orch.bootstrap().await.unwrap();

        assert_eq!(session.secret.expose_bytes(), b"configured");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_secret_fails_and_removes_registration() {
        let (api, mut orch) = orchestrator_with(FakeUpstream::new(), settings(), None);

        let err = orch.bootstrap().await.unwrap_err();

        assert!(matches!(err, StartupError::MissingSecret));
        assert_eq!(orch.state(), StartupState::Failed);
        assert_eq!(
            api.calls().last(),
            Some(&Call::Unregister {
                token: "token-1".into(),
                id: "wh-1".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_serves_then_unregisters_exactly_once() {
        let (api, orch) = orchestrator(FakeUpstream::new());
        let server = FakeServer::default();

        orch.run(&server).await.unwrap();

        assert_eq!(
            server.served_with.lock().unwrap().as_deref(),
            Some(&b"shared-secret"[..])
        );
        assert_eq!(count(&api.calls(), |c| matches!(c, Call::Unregister { .. })), 1);
        assert!(matches!(api.calls().last(), Some(Call::Unregister { .. })));
    }
}
