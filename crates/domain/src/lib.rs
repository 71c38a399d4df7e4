//! Core domain for taskhook.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, and cross-cutting error type used by the webhook receiver, plus the
//! HMAC-SHA256 signature verifier. Infrastructure crates implement the port
//! traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RegistrationId`, `EventType`, `DeliveryId`, etc.) |
//! | [`types`] | Value types (`Credential`, `WebhookRegistration`, `Event`, `EventFilter`, etc.) |
//! | [`errors`] | Error taxonomy and retry-policy types |
//! | [`ports`] | Traits implemented by infrastructure (`UpstreamApi`, `EventProcessor`, `DeliveryServer`) |
//! | [`signature`] | Delivery signature verification |

pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod signature;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{ProcessingError, RetryPolicy, ServeError, StartupError, StartupStage, UpstreamError};
pub use identifiers::{CallbackUrl, DeliveryId, EventType, RegistrationId};
pub use ports::{DeliveryServer, EventProcessor, UpstreamApi};
pub use signature::{compute_signature, format_signature_header, verify, SIGNATURE_PREFIX};
pub use types::{
    AccessToken, Credential, Event, EventFilter, Timestamp, WebhookDelivery, WebhookRegistration,
    WebhookSecret, WebhookSummary,
};
