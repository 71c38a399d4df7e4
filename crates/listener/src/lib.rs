//! taskhook webhook consumer.
//!
//! Receives signed deliveries from the upstream task API, verifies them, turns
//! them into [`domain::Event`]s, and hands them to an
//! [`domain::EventProcessor`] without blocking the HTTP response.
//!
//! ## Request flow
//!
//! ```text
//! POST /webhook ──► verify signature ──► parse event ──► EventDispatcher ──► 200
//!                        │ 401               │ 400            │ 503 (full)
//!                                                            ▼
//!                                               worker ──► EventProcessor (spawned)
//! ```
//!
//! ## Endpoints
//!
//! | Route | Handler | Notes |
//! |-------|---------|-------|
//! | `POST {webhook_path}` | [`delivery_handler`] | default path `/webhook` |
//! | `GET /health` | [`health_handler`] | liveness check |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Transport details and HTTP status mapping live here.
//! The [`domain`] crate sees only [`domain::DeliveryServer`] and
//! [`domain::EventProcessor`].

mod dispatcher;
mod handler;
mod processor;
mod server;

pub use dispatcher::{DispatchError, DispatchWorker, EventDispatcher};
pub use handler::{
    delivery_handler, health_handler, DeliveryError, EVENT_HEADER, SIGNATURE_HEADER,
};
pub use processor::LoggingProcessor;
pub use server::{build_router, shutdown_signal, AppState, WebhookServer, WebhookServerConfig};
