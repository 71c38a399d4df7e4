//! taskhook upstream API client adapter.
//!
//! Implements the [`domain::UpstreamApi`] trait over the task API's JSON/HTTP
//! endpoints:
//!
//! | Operation | Request | Response |
//! |-----------|---------|----------|
//! | health | `GET {base}/health` | `200` when ready |
//! | login | `POST {base}{prefix}/auth/login {email, password}` | `{token}` (or `{access_token}`) |
//! | register | `POST {base}{prefix}/webhooks {callback_url, events}` | `{id, callback_url, events, secret?}` |
//! | unregister | `DELETE {base}{prefix}/webhooks/{id}` | `204` |
//! | list | `GET {base}{prefix}/webhooks` | `{data: [{id, url}]}` |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Transport, timeouts, serialisation, and HTTP status
//! classification all live here. The [`bootstrap`] crate sees only
//! [`domain::UpstreamApi`] and [`domain::UpstreamError`].
//!
//! [`bootstrap`]: ../bootstrap/index.html

mod client;
mod wire;

pub use client::{UpstreamClient, UpstreamClientConfig};
