//! Shared value types for the taskhook domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. a credential always has a non-empty
//! token, an event always has a type) and participate in domain computations.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{CallbackUrl, DeliveryId, EventType, RegistrationId};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// An opaque bearer token issued by the upstream login endpoint.
///
/// The `Debug` representation never includes the token value.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Creates an [`AccessToken`], returning `None` if the value is empty.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        if v.is_empty() {
            None
        } else {
            Some(Self(v))
        }
    }

    /// Returns the raw token for use in an `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns the last few characters of the token, for log correlation.
    pub fn fingerprint(&self) -> &str {
        let start = self
            .0
            .char_indices()
            .rev()
            .nth(5)
            .map(|(i, _)| i)
            .unwrap_or(0);
        &self.0[start..]
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessToken(…{})", self.fingerprint())
    }
}

// ---------------------------------------------------------------------------

/// A bearer credential and the moment it was obtained.
///
/// Owned exclusively by the auth manager. It is replaced as a whole on
/// re-login; callers only ever see a cloned [`AccessToken`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// The bearer token.
    pub token: AccessToken,
    /// When the login call that produced this credential completed.
    pub obtained_at: Timestamp,
}

impl Credential {
    /// Creates a credential stamped with the current time.
    pub fn issued_now(token: AccessToken) -> Self {
        Self {
            token,
            obtained_at: Timestamp::now(),
        }
    }
}

// ---------------------------------------------------------------------------

/// The shared HMAC key used to sign deliveries.
///
/// Either configured locally or issued by the upstream at registration time.
/// Held in a [`SecretString`] so it cannot leak through `Debug` or logs.
pub struct WebhookSecret(SecretString);

impl WebhookSecret {
    /// Creates a [`WebhookSecret`], returning `None` if the value is empty.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v: String = value.into();
        if v.is_empty() {
            None
        } else {
            Some(Self(SecretString::from(v)))
        }
    }

    /// Returns the key bytes for HMAC computation.
    pub fn expose_bytes(&self) -> &[u8] {
        self.0.expose_secret().as_bytes()
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebhookSecret([REDACTED])")
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// The set of event names a webhook subscribes to.
///
/// Parsed from a comma-separated list. Entries are kept verbatim and in order,
/// including wildcard patterns such as `task.*`; the upstream owns their
/// matching semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventFilter(Vec<String>);

impl EventFilter {
    /// Parses a comma-separated list, trimming whitespace and dropping empty
    /// entries.
    pub fn parse(list: &str) -> Self {
        Self(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    /// Creates a filter from already-separated event names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Returns the event names in configured order.
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// Returns `true` if the filter subscribes to nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

// ---------------------------------------------------------------------------

/// A webhook subscription created on the upstream.
#[derive(Debug)]
pub struct WebhookRegistration {
    /// Upstream-assigned identifier, needed to delete the subscription.
    pub id: RegistrationId,
    /// The URL deliveries are sent to.
    pub callback_url: CallbackUrl,
    /// The events the upstream confirmed the subscription for.
    pub subscribed_events: EventFilter,
    /// HMAC secret issued by the upstream, if it returned one.
    pub secret: Option<WebhookSecret>,
}

/// An existing subscription as reported by the upstream's listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSummary {
    /// Upstream-assigned identifier.
    pub id: RegistrationId,
    /// Delivery URL, when the upstream reports one.
    pub callback_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Deliveries and events
// ---------------------------------------------------------------------------

/// One inbound HTTP delivery, alive only for the duration of its request.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    /// Locally generated correlation id.
    pub delivery_id: DeliveryId,
    /// The body exactly as received; the signature covers these bytes.
    pub raw_body: Bytes,
    /// Value of the signature header, if present.
    pub signature_header: Option<String>,
    /// All headers that were valid UTF-8, keyed by lowercase name.
    pub headers: HashMap<String, String>,
}

impl WebhookDelivery {
    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------

/// A verified, parsed event handed to the processing hook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Event type, e.g. `"task.created"`.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// The rest of the delivered document.
    pub payload: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp, displayed in RFC 3339 form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_displays_as_rfc3339() {
        let shown = Timestamp::now().to_string();
        assert!(DateTime::parse_from_rfc3339(&shown).is_ok());
    }

    #[test]
    fn event_filter_trims_and_drops_empty_entries() {
        let filter = EventFilter::parse(" task.created, ,task.updated ,,user.*");
        assert_eq!(filter.names(), ["task.created", "task.updated", "user.*"]);
        assert_eq!(filter.to_string(), "task.created,task.updated,user.*");
    }

    #[test]
    fn event_filter_of_blank_string_is_empty() {
        assert!(EventFilter::parse("  , ").is_empty());
    }

    #[test]
    fn event_filter_serialises_as_array() {
        let filter = EventFilter::from_names(["task.*"]);
        assert_eq!(serde_json::to_string(&filter).unwrap(), r#"["task.*"]"#);
    }

    #[test]
    fn access_token_debug_hides_value() {
        let token = AccessToken::new("eyJhbGciOiJIUzI1NiJ9.secret-part").unwrap();
        let debug = format!("{token:?}");
        assert!(!debug.contains("eyJhbGciOiJIUzI1NiJ9"));
        assert!(debug.ends_with("t-part)"));
    }

    #[test]
    fn access_token_fingerprint_of_short_token_is_whole_token() {
        let token = AccessToken::new("abc").unwrap();
        assert_eq!(token.fingerprint(), "abc");
    }

    #[test]
    fn webhook_secret_debug_is_redacted() {
        let secret = WebhookSecret::new("hunter2").unwrap();
        assert_eq!(format!("{secret:?}"), "WebhookSecret([REDACTED])");
        assert_eq!(secret.expose_bytes(), b"hunter2");
        assert!(WebhookSecret::new("").is_none());
    }

    #[test]
    fn delivery_header_lookup_is_case_insensitive() {
        let delivery = WebhookDelivery {
            delivery_id: DeliveryId::new_random(),
            raw_body: Bytes::from_static(b"{}"),
            signature_header: None,
            headers: HashMap::from([("x-webhook-event".to_string(), "task.moved".to_string())]),
        };
        assert_eq!(delivery.header("X-Webhook-Event"), Some("task.moved"));
    }
}
