//! The default processing hook.

use async_trait::async_trait;
use domain::{Event, EventProcessor, ProcessingError};
use tracing::info;

/// Logs every event it receives at `info` and does nothing else.
///
/// Stands in for real business logic until a deployment supplies its own
/// [`EventProcessor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProcessor;

#[async_trait]
impl EventProcessor for LoggingProcessor {
    async fn process(&self, event: Event) -> Result<(), ProcessingError> {
        let payload = serde_json::to_string(&event.payload).map_err(|e| ProcessingError {
            message: e.to_string(),
        })?;
        info!(event_type = %event.event_type, payload = %payload, "Processing event");
        Ok(())
    }
}
