//! HTTP server wiring: shared state, router, and the [`DeliveryServer`]
//! implementation.

use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use axum::{
    routing::{get, post},
    Router,
};
use domain::{DeliveryServer, EventProcessor, ServeError, WebhookSecret};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{delivery_handler, health_handler, EventDispatcher};

type ShutdownFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Shared application state.
///
/// Passed to all handlers via axum's `State` extractor. Read-only apart from
/// the dispatcher's queue.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    secret: WebhookSecret,
    dispatcher: EventDispatcher,
}

impl AppState {
    /// Creates state verifying deliveries with `secret` and enqueueing events
    /// on `dispatcher`.
    pub fn new(secret: WebhookSecret, dispatcher: EventDispatcher) -> Self {
        Self {
            inner: Arc::new(AppStateInner { secret, dispatcher }),
        }
    }

    /// Returns the HMAC key bytes.
    pub fn secret(&self) -> &[u8] {
        self.inner.secret.expose_bytes()
    }

    /// Returns the event dispatcher.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }
}

/// Builds the axum router serving deliveries on `webhook_path`.
pub fn build_router(state: AppState, webhook_path: &str) -> Router {
    Router::new()
        .route(webhook_path, post(delivery_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Completes on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        () = terminate => info!("Received terminate signal, starting graceful shutdown"),
    }
}

// ---------------------------------------------------------------------------
// WebhookServer
// ---------------------------------------------------------------------------

/// Listen settings for [`WebhookServer`].
#[derive(Debug, Clone)]
pub struct WebhookServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,
    /// Route deliveries are posted to, e.g. `/webhook`.
    pub webhook_path: String,
    /// Maximum number of events waiting for the processor.
    pub queue_capacity: usize,
}

/// The webhook consumer.
///
/// The socket is bound by [`WebhookServer::bind`], before registration, so
/// deliveries sent right after the upstream accepts the subscription wait in
/// the accept backlog instead of being refused.
pub struct WebhookServer {
    config: WebhookServerConfig,
    processor: Arc<dyn EventProcessor>,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    shutdown: Mutex<Option<ShutdownFuture>>,
}

impl WebhookServer {
    /// Binds the listen socket.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError`] if the address cannot be bound.
    pub async fn bind(
        config: WebhookServerConfig,
        processor: Arc<dyn EventProcessor>,
    ) -> Result<Self, ServeError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| ServeError {
                message: format!("failed to bind {}: {e}", config.bind_addr),
            })?;
        let local_addr = listener.local_addr().map_err(|e| ServeError {
            message: e.to_string(),
        })?;

        Ok(Self {
            config,
            processor,
            local_addr,
            listener: Mutex::new(Some(listener)),
            shutdown: Mutex::new(None),
        })
    }

    /// Replaces the default SIGINT/SIGTERM trigger with `signal`.
    pub fn with_shutdown(self, signal: impl Future<Output = ()> + Send + 'static) -> Self {
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::pin(signal));
        self
    }

    /// Returns the address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl DeliveryServer for WebhookServer {
    async fn serve(&self, secret: WebhookSecret) -> Result<(), ServeError> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ServeError {
                message: "server has already been run".to_string(),
            })?;
        let shutdown = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let (dispatcher, worker) =
            EventDispatcher::start(Arc::clone(&self.processor), self.config.queue_capacity);
        let state = AppState::new(secret, dispatcher);
        let router = build_router(state.clone(), &self.config.webhook_path);

        info!(
            addr = %self.local_addr,
            path = %self.config.webhook_path,
            "Webhook server listening"
        );
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                match shutdown {
                    Some(signal) => signal.await,
                    None => shutdown_signal().await,
                }
            })
            .await;

        info!("Webhook server stopped accepting; draining queued events");
        state.dispatcher().close();
        worker.drain().await;
        info!("Event queue drained");

        served.map_err(|e| ServeError {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
