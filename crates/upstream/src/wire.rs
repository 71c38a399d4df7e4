//! Request and response bodies exchanged with the task API.
//!
//! Response types are lenient where the upstream is known to vary: ids may be
//! strings or integers, and a couple of fields have alternate names.

use domain::{RegistrationId, WebhookSummary};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    #[serde(alias = "access_token")]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub callback_url: &'a str,
    pub events: &'a [String],
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterResponse {
    pub id: WireId,
    #[serde(flatten)]
    pub target: WireTarget,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

/// The delivery URL, which the upstream sends as `callback_url`, `url`, or
/// both.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireTarget {
    #[serde(default)]
    callback_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl WireTarget {
    pub fn into_url(self) -> Option<String> {
        self.callback_url.or(self.url)
    }
}

/// An identifier the upstream may encode as a string or an integer.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireId {
    Text(String),
    Number(i64),
}

impl WireId {
    pub fn into_registration_id(self) -> Option<RegistrationId> {
        match self {
            Self::Text(s) => RegistrationId::new(s),
            Self::Number(n) => RegistrationId::new(n.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireWebhook {
    pub id: WireId,
    #[serde(flatten)]
    pub target: WireTarget,
}

/// The listing endpoint wraps results in `data`; a bare array is accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WebhookList {
    Wrapped { data: Vec<WireWebhook> },
    Bare(Vec<WireWebhook>),
}

impl WebhookList {
    pub fn into_summaries(self) -> Vec<WebhookSummary> {
        let hooks = match self {
            Self::Wrapped { data } => data,
            Self::Bare(hooks) => hooks,
        };
        hooks
            .into_iter()
            .filter_map(|hook| {
                Some(WebhookSummary {
                    id: hook.id.into_registration_id()?,
                    callback_url: hook.target.into_url(),
                })
            })
            .collect()
    }
}
