//! reqwest-backed implementation of [`UpstreamApi`].

use std::time::Duration;

use async_trait::async_trait;
use domain::{
    AccessToken, CallbackUrl, Credential, EventFilter, RegistrationId, UpstreamApi, UpstreamError,
    WebhookRegistration, WebhookSecret, WebhookSummary,
};
use reqwest::{header::RETRY_AFTER, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::wire::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, WebhookList};

/// Longest slice of an error body carried into [`UpstreamError::Rejected`].
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for [`UpstreamClient`].
#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    /// Scheme, host, and port of the task API, e.g. `http://app:8000`.
    pub base_url: String,
    /// Path prefix for versioned endpoints, e.g. `/api/v1`. `/health` is
    /// never prefixed.
    pub api_prefix: String,
    /// Upper bound on every request, connect time included.
    pub timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://app:8000".to_string(),
            api_prefix: "/api/v1".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP client for the upstream task API.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_prefix: String,
}

impl UpstreamClient {
    /// Builds a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Configuration`] when the base URL is not an
    /// absolute `http`/`https` URL or the HTTP client cannot be constructed.
    pub fn new(config: UpstreamClientConfig) -> Result<Self, UpstreamError> {
        let parsed = Url::parse(&config.base_url).map_err(|e| UpstreamError::Configuration {
            message: format!("invalid base URL {:?}: {e}", config.base_url),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(UpstreamError::Configuration {
                message: format!("unsupported scheme in base URL {:?}", config.base_url),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_prefix: normalize_prefix(&config.api_prefix),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.api_prefix, path)
    }

    /// `{base}{prefix}/webhooks/{id}` with `id` percent-encoded as a single
    /// path segment.
    fn webhook_url(&self, id: &RegistrationId) -> Result<Url, UpstreamError> {
        let mut url = Url::parse(&self.api_url("/webhooks")).map_err(|e| {
            UpstreamError::Configuration {
                message: e.to_string(),
            }
        })?;
        url.path_segments_mut()
            .map_err(|()| UpstreamError::Configuration {
                message: format!("base URL {:?} cannot carry a path", self.base_url),
            })?
            .push(id.as_str());
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, UpstreamError> {
        let response = request.send().await.map_err(transport_error)?;
        check_status(response).await
    }
}

#[async_trait]
impl UpstreamApi for UpstreamClient {
    #[instrument(skip_all)]
    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => {
                debug!(status = %response.status(), "Upstream health check answered");
                response.status().is_success()
            }
            Err(error) => {
                debug!(error = %error, "Upstream health check failed");
                false
            }
        }
    }

    #[instrument(skip_all, fields(email = %email))]
    async fn login(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Credential, UpstreamError> {
        let body = LoginRequest {
            email,
            password: password.expose_secret(),
        };
        let response = self
            .send(self.http.post(self.api_url("/auth/login")).json(&body))
            .await?;
        let parsed: LoginResponse = decode(response).await?;

        let token = AccessToken::new(parsed.token).ok_or_else(|| UpstreamError::InvalidResponse {
            message: "login response carried an empty token".to_string(),
        })?;
        Ok(Credential::issued_now(token))
    }

    #[instrument(skip_all, fields(callback_url = %callback_url))]
    async fn register_webhook(
        &self,
        token: &AccessToken,
        callback_url: &CallbackUrl,
        events: &EventFilter,
    ) -> Result<WebhookRegistration, UpstreamError> {
        let body = RegisterRequest {
            callback_url: callback_url.as_str(),
            events: events.names(),
        };
        let response = self
            .send(
                self.http
                    .post(self.api_url("/webhooks"))
                    .bearer_auth(token.expose())
                    .json(&body),
            )
            .await?;
        let parsed: RegisterResponse = decode(response).await?;

        let id = parsed
            .id
            .into_registration_id()
            .ok_or_else(|| UpstreamError::InvalidResponse {
                message: "registration response carried an empty id".to_string(),
            })?;
        let confirmed_url = parsed
            .target
            .into_url()
            .and_then(CallbackUrl::new)
            .unwrap_or_else(|| callback_url.clone());
        let subscribed_events = if parsed.events.is_empty() {
            events.clone()
        } else {
            EventFilter::from_names(parsed.events)
        };

        Ok(WebhookRegistration {
            id,
            callback_url: confirmed_url,
            subscribed_events,
            secret: parsed.secret.and_then(WebhookSecret::new),
        })
    }

    #[instrument(skip_all, fields(registration_id = %id))]
    async fn unregister_webhook(
        &self,
        token: &AccessToken,
        id: &RegistrationId,
    ) -> Result<(), UpstreamError> {
        let request = self
            .http
            .delete(self.webhook_url(id)?)
            .bearer_auth(token.expose());
        match self.send(request).await {
            Ok(_) => Ok(()),
            // Already gone is the outcome we wanted.
            Err(UpstreamError::Rejected { status: 404, .. }) => {
                debug!("Webhook was already deleted");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    #[instrument(skip_all)]
    async fn list_webhooks(&self, token: &AccessToken) -> Result<Vec<WebhookSummary>, UpstreamError> {
        let response = self
            .send(
                self.http
                    .get(self.api_url("/webhooks"))
                    .bearer_auth(token.expose()),
            )
            .await?;
        let parsed: WebhookList = decode(response).await?;
        Ok(parsed.into_summaries())
    }
}

// ---------------------------------------------------------------------------
// Response classification
// ---------------------------------------------------------------------------

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn transport_error(error: reqwest::Error) -> UpstreamError {
    if error.is_builder() {
        UpstreamError::Configuration {
            message: error.to_string(),
        }
    } else {
        UpstreamError::Transient {
            message: error.to_string(),
            retry_after: None,
        }
    }
}

/// Maps a non-2xx status to the matching [`UpstreamError`] variant.
async fn check_status(response: Response) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(UpstreamError::AuthRejected {
            status: status.as_u16(),
        });
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(UpstreamError::Transient {
            message: format!("HTTP {status}"),
            retry_after,
        });
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.to_string()
    } else {
        truncate(body, MAX_ERROR_BODY)
    };
    Err(UpstreamError::Rejected {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, UpstreamError> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| UpstreamError::InvalidResponse {
        message: e.to_string(),
    })
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push('…');
    }
    text
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
