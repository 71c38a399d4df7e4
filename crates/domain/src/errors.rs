//! Error taxonomy and retry-policy types for the taskhook domain.
//!
//! [`UpstreamError`] covers every failure talking to the task API.
//! [`StartupError`] covers conditions that stop the process from ever serving.
//! Per-delivery errors are defined by the listener, since they map directly to
//! HTTP responses.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by upstream error types to let the startup orchestrator decide
/// whether to re-invoke an operation or give up.
///
/// - `Retryable` errors: timeouts, connection failures, 5xx, rate limits,
///   authorization rejections (after re-authenticating).
/// - `NonRetryable` errors: requests that can never be built (bad base URL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from a `Retry-After` response header).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried; startup fails.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Upstream errors
// ---------------------------------------------------------------------------

/// Failures of calls to the upstream task API.
///
/// `Clone` so that one login outcome can be handed to every caller waiting on
/// the same refresh.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpstreamError {
    /// Network failure, timeout, 5xx, or rate limiting.
    ///
    /// Timeouts are deliberately not distinguished from other network errors.
    #[error("transient upstream failure: {message}")]
    Transient {
        /// Human-readable description of the failure.
        message: String,
        /// Delay requested by the upstream via `Retry-After`, if any.
        retry_after: Option<Duration>,
    },

    /// The upstream answered 401 or 403.
    ///
    /// The credential in use must be discarded before the call is retried.
    #[error("upstream rejected the credential (HTTP {status})")]
    AuthRejected {
        /// HTTP status code returned.
        status: u16,
    },

    /// Any other 4xx response.
    #[error("upstream rejected the request (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code returned.
        status: u16,
        /// Response body (truncated) or reason phrase.
        message: String,
    },

    /// A 2xx response whose body did not match the documented shape.
    #[error("unexpected upstream response: {message}")]
    InvalidResponse {
        /// Description of the decoding problem.
        message: String,
    },

    /// The request could not be constructed (e.g. malformed base URL).
    #[error("invalid upstream client configuration: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl UpstreamError {
    /// Returns the retry policy for this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Transient { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::AuthRejected { .. } | Self::Rejected { .. } | Self::InvalidResponse { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            Self::Configuration { .. } => RetryPolicy::NonRetryable,
        }
    }

    /// Returns `true` if the upstream refused the credential (401/403).
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }
}

// ---------------------------------------------------------------------------
// Startup errors
// ---------------------------------------------------------------------------

/// The startup stage that was executing when a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupStage {
    /// Polling the upstream health endpoint.
    WaitingForUpstream,
    /// Obtaining a bearer credential.
    Authenticating,
    /// Creating the webhook subscription.
    Registering,
    /// Running the webhook consumer.
    Serving,
}

impl std::fmt::Display for StartupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::WaitingForUpstream => "waiting_for_upstream",
            Self::Authenticating => "authenticating",
            Self::Registering => "registering",
            Self::Serving => "serving",
        };
        f.write_str(name)
    }
}

/// Permanent startup failures. Any of these ends the process with a non-zero
/// exit status; there is no in-process restart.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The upstream health endpoint never answered within the startup window.
    #[error("upstream did not become healthy within {waited:?}")]
    UpstreamNeverReady {
        /// How long the orchestrator waited.
        waited: Duration,
    },

    /// The retry budget of a stage was used up.
    #[error("{stage} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Stage whose budget ran out.
        stage: StartupStage,
        /// Number of attempts made.
        attempts: u32,
        /// The error returned by the final attempt.
        last_error: UpstreamError,
    },

    /// An error that retrying cannot fix.
    #[error("{stage} failed permanently: {error}")]
    NonRetryable {
        /// Stage that failed.
        stage: StartupStage,
        /// The underlying error.
        error: UpstreamError,
    },

    /// Neither a configured nor an upstream-issued signing secret exists, so
    /// deliveries could not be verified.
    #[error("no webhook secret configured and none returned by the upstream")]
    MissingSecret,

    /// Startup was driven again after it had already succeeded or failed.
    #[error("startup has already finished")]
    AlreadyFinished,

    /// The webhook consumer could not be started or stopped abnormally.
    #[error(transparent)]
    Serve(#[from] ServeError),
}

// ---------------------------------------------------------------------------
// Consumer-side errors
// ---------------------------------------------------------------------------

/// The webhook consumer failed to bind or serve.
#[derive(Debug, Error)]
#[error("webhook server failed: {message}")]
pub struct ServeError {
    /// Description of the failure.
    pub message: String,
}

/// The processing hook failed to handle an event.
///
/// Logged by the dispatcher; never surfaced to the delivery sender.
#[derive(Debug, Error)]
#[error("event processing failed: {message}")]
pub struct ProcessingError {
    /// Description of the failure.
    pub message: String,
}
