//! Delivery and health endpoint handlers.

use std::collections::HashMap;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use domain::{verify, DeliveryId, Event, EventType, WebhookDelivery};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{server::AppState, DispatchError};

/// Header carrying `sha256=<hex>` over the raw body.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
/// Header naming the event type when the body does not.
pub const EVENT_HEADER: &str = "x-webhook-event";

/// Body fields that may carry the event type, in order of preference.
const TYPE_FIELDS: [&str; 2] = ["type", "event"];

/// Per-delivery failures, each mapped to the status the sender sees.
///
/// Bodies never echo the signature or secret.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No signature header was sent.
    #[error("missing signature")]
    MissingSignature,

    /// The signature did not match the body.
    #[error("invalid signature")]
    InvalidSignature,

    /// The body is not a JSON object.
    #[error("malformed body: {0}")]
    MalformedBody(String),

    /// No event type in the body or headers.
    #[error("missing event type")]
    MissingEventType,

    /// The processing queue cannot take the event right now.
    #[error("event queue unavailable")]
    QueueFull,
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::MissingSignature | Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::MalformedBody(_) | Self::MissingEventType => StatusCode::BAD_REQUEST,
            Self::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<DispatchError> for DeliveryError {
    fn from(_: DispatchError) -> Self {
        Self::QueueFull
    }
}

/// Webhook delivery handler.
///
/// # Response
///
/// - 200 OK: `{"status": "received", "delivery_id": "..."}`
/// - 400 Bad Request: body is not a JSON object or names no event type
/// - 401 Unauthorized: signature missing or wrong (body is never parsed)
/// - 503 Service Unavailable: processing queue full; the sender retries
#[instrument(skip_all, fields(delivery_id))]
pub async fn delivery_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, DeliveryError> {
    let delivery = capture(&headers, body);
    tracing::Span::current().record("delivery_id", tracing::field::display(delivery.delivery_id));
    debug!(bytes = delivery.raw_body.len(), "Received delivery");

    let Some(signature) = delivery.signature_header.as_deref() else {
        warn!(delivery_id = %delivery.delivery_id, "Delivery without signature rejected");
        return Err(DeliveryError::MissingSignature);
    };
    if !verify(&delivery.raw_body, state.secret(), signature) {
        warn!(delivery_id = %delivery.delivery_id, "Delivery with invalid signature rejected");
        return Err(DeliveryError::InvalidSignature);
    }

    let event = parse_event(&delivery).inspect_err(|error| {
        warn!(delivery_id = %delivery.delivery_id, error = %error, "Malformed delivery rejected");
    })?;

    info!(
        delivery_id = %delivery.delivery_id,
        event_type = %event.event_type,
        "Delivery accepted"
    );
    state.dispatcher().dispatch(event).inspect_err(|error| {
        warn!(delivery_id = %delivery.delivery_id, error = %error, "Could not enqueue event");
    })?;

    Ok(Json(json!({
        "status": "received",
        "delivery_id": delivery.delivery_id.to_string(),
    })))
}

/// Liveness check.
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn capture(headers: &HeaderMap, body: Bytes) -> WebhookDelivery {
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();

    WebhookDelivery {
        delivery_id: DeliveryId::new_random(),
        raw_body: body,
        signature_header: headers.get(SIGNATURE_HEADER).cloned(),
        headers,
    }
}

/// Turns a verified delivery into an [`Event`].
///
/// The type comes from the first non-empty string among the body's `type` and
/// `event` fields, falling back to the event header. That field is removed
/// from the payload.
fn parse_event(delivery: &WebhookDelivery) -> Result<Event, DeliveryError> {
    let document: Value = serde_json::from_slice(&delivery.raw_body)
        .map_err(|e| DeliveryError::MalformedBody(e.to_string()))?;
    let Value::Object(mut payload) = document else {
        return Err(DeliveryError::MalformedBody(
            "expected a JSON object".to_string(),
        ));
    };

    let event_type = match type_field(&payload) {
        Some(field) => payload
            .remove(field)
            .and_then(|v| v.as_str().and_then(EventType::new)),
        None => delivery.header(EVENT_HEADER).and_then(EventType::new),
    }
    .ok_or(DeliveryError::MissingEventType)?;

    Ok(Event {
        event_type,
        payload,
    })
}

fn type_field(payload: &Map<String, Value>) -> Option<&'static str> {
    TYPE_FIELDS.into_iter().find(|field| {
        payload
            .get(*field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty())
    })
}
