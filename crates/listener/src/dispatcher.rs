//! Bounded hand-off between the delivery handler and the processing hook.
//!
//! The handler must answer quickly, so it only enqueues. A single worker task
//! drains the queue and spawns one processing call per event; a slow event
//! therefore never delays the ones behind it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use domain::{Event, EventProcessor};
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info, warn};

/// Why an event could not be enqueued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The queue is at capacity.
    #[error("dispatch queue is full")]
    QueueFull,
    /// The dispatcher has been closed for shutdown.
    #[error("dispatch queue is closed")]
    Closed,
}

/// Enqueues verified events for asynchronous processing.
pub struct EventDispatcher {
    sender: Mutex<Option<mpsc::Sender<Event>>>,
}

/// Handle to the worker draining an [`EventDispatcher`].
pub struct DispatchWorker {
    handle: JoinHandle<()>,
}

impl EventDispatcher {
    /// Starts a worker invoking `processor` and returns the dispatcher feeding
    /// it. At most `capacity` events wait in the queue.
    pub fn start(processor: Arc<dyn EventProcessor>, capacity: usize) -> (Self, DispatchWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(rx, processor));
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            DispatchWorker { handle },
        )
    }

    /// Enqueues `event` without waiting.
    ///
    /// # Errors
    ///
    /// [`DispatchError::QueueFull`] when the queue is at capacity, and
    /// [`DispatchError::Closed`] after [`Self::close`].
    pub fn dispatch(&self, event: Event) -> Result<(), DispatchError> {
        let guard = self.lock_sender();
        let Some(sender) = guard.as_ref() else {
            return Err(DispatchError::Closed);
        };
        sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::QueueFull,
            TrySendError::Closed(_) => DispatchError::Closed,
        })
    }

    /// Stops accepting events. Already queued events are still processed.
    pub fn close(&self) {
        if self.lock_sender().take().is_some() {
            debug!("Dispatch queue closed");
        }
    }

    fn lock_sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<Event>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DispatchWorker {
    /// Waits until every queued and in-flight event has been processed.
    ///
    /// Returns only after the owning [`EventDispatcher`] is closed or dropped.
    pub async fn drain(self) {
        if let Err(join_error) = self.handle.await {
            error!(error = %join_error, "Dispatch worker terminated abnormally");
        }
    }
}

async fn run_worker(mut rx: mpsc::Receiver<Event>, processor: Arc<dyn EventProcessor>) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(event) = received else { break };
                let processor = Arc::clone(&processor);
                in_flight.spawn(async move {
                    let event_type = event.event_type.clone();
                    if let Err(error) = processor.process(event).await {
                        warn!(event_type = %event_type, error = %error, "Event processing failed");
                    }
                });
            }
            Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                log_panic(finished);
            }
        }
    }

    let remaining = in_flight.len();
    if remaining > 0 {
        info!(remaining, "Waiting for in-flight event processing");
    }
    while let Some(finished) = in_flight.join_next().await {
        log_panic(finished);
    }
}

fn log_panic(result: Result<(), tokio::task::JoinError>) {
    if let Err(join_error) = result {
        error!(error = %join_error, "Event processing task panicked");
    }
}
