//! taskhook startup orchestration.
//!
//! This crate provides the auth manager that owns the upstream bearer
//! credential, the registry manager that owns the webhook subscription, the
//! back-off policy, and the [`StartupOrchestrator`] state machine that
//! sequences them:
//!
//! ```text
//! WaitingForUpstream ──► Authenticating ──► Registering ──► Serving
//!         │                    │  ▲              │
//!         │                    │  └── 401/403 ───┤
//!         └────────────────────┴─────────────────┴──► Failed
//! ```
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The state machine sequences calls to the
//! [`domain::UpstreamApi`] and [`domain::DeliveryServer`] ports. It owns all
//! retry and back-off policy; the managers it drives never retry on their own.

pub mod auth;
pub mod backoff;
pub mod orchestrator;
pub mod registry;

#[cfg(test)]
mod test_support;

pub use auth::AuthManager;
pub use backoff::BackoffPolicy;
pub use orchestrator::{ReadySession, StartupOrchestrator, StartupSettings, StartupState};
pub use registry::RegistryManager;
