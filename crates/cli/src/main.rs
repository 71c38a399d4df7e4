//! taskhook entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Read configuration** from the environment and validate it. Any error
//!    exits with status 1 before the upstream is contacted.
//! 2. **Wire observability**: `tracing-subscriber` with a JSON (or pretty)
//!    layer and an optional OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: the [`upstream::UpstreamClient`], the
//!    [`listener::WebhookServer`] with its [`listener::LoggingProcessor`], and
//!    the managers from [`bootstrap`], then hand them to the
//!    [`bootstrap::StartupOrchestrator`].
//! 4. **Run** until SIGINT/SIGTERM, unregister, and exit 0; or exit 1 if
//!    startup fails.

mod config;
mod telemetry;

use std::{process::ExitCode, sync::Arc};

use anyhow::Context;
use bootstrap::{AuthManager, BackoffPolicy, RegistryManager, StartupOrchestrator, StartupSettings};
use domain::UpstreamApi;
use listener::{LoggingProcessor, WebhookServer, WebhookServerConfig};
use tracing::{error, info};
use upstream::{UpstreamClient, UpstreamClientConfig};

use crate::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("taskhook: configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let telemetry = match telemetry::init(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("taskhook: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(config).await;
    if let Err(e) = &outcome {
        error!(error = %format!("{e:#}"), "taskhook exited with an error");
    }
    telemetry.shutdown();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let Config {
        api_base_url,
        api_prefix,
        admin_email,
        admin_password,
        listen_addr,
        webhook_path,
        callback_url,
        events,
        webhook_secret,
        cleanup_stale,
        request_timeout,
        poll_interval,
        max_wait,
        retry_max_attempts,
        retry_base_delay,
        queue_capacity,
        ..
    } = config;

    info!(
        upstream = %api_base_url,
        callback_url = %callback_url,
        events = %events,
        listen = %listen_addr,
        "Starting taskhook"
    );

    let client = UpstreamClient::new(UpstreamClientConfig {
        base_url: api_base_url,
        api_prefix,
        timeout: request_timeout,
    })
    .context("invalid upstream configuration")?;
    let api: Arc<dyn UpstreamApi> = Arc::new(client);

    let server = WebhookServer::bind(
        WebhookServerConfig {
            bind_addr: listen_addr,
            webhook_path,
            queue_capacity,
        },
        Arc::new(LoggingProcessor),
    )
    .await?;

    let auth = Arc::new(AuthManager::new(Arc::clone(&api), admin_email, admin_password));
    let registry = Arc::new(RegistryManager::new(Arc::clone(&api)));
    let settings = StartupSettings {
        poll_interval,
        max_wait,
        backoff: BackoffPolicy::new(retry_max_attempts, retry_base_delay),
        callback_url,
        events,
        cleanup_stale,
    };

    StartupOrchestrator::new(settings, api, auth, registry, webhook_secret)
        .run(&server)
        .await?;

    info!("taskhook stopped");
    Ok(())
}
