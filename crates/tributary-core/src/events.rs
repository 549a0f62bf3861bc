//! Delivery events for observability subscribers.
//!
//! Consumer workers publish one event per failed attempt and one terminal
//! event per batch. Subscribers implement [`EventHandler`] and are injected
//! into the pipeline, so metrics exporters, audit logs, or test recorders can
//! observe delivery without the engine knowing about them.
//!
//! ```text
//! ┌────────────────┐  Delivered / AttemptFailed / Abandoned  ┌───────────────────┐
//! │ ConsumerWorker │ ───────────────────────────────────────▶│ MulticastHandler  │
//! └────────────────┘                                          └───────────────────┘
//!                                                                      │
//!                                                   ┌──────────────────┼─────────────┐
//!                                                   ▼                  ▼             ▼
//!                                              metrics            audit log    test recorder
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted by consumer workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryEvent {
    /// A batch reached the collector and was accepted.
    Delivered(BatchDeliveredEvent),

    /// A single attempt failed; the batch may still be retried.
    AttemptFailed(AttemptFailedEvent),

    /// A batch was given up on; its records are acknowledged but lost.
    Abandoned(BatchAbandonedEvent),
}

impl DeliveryEvent {
    /// Identifier of the batch the event refers to.
    pub fn batch_id(&self) -> Uuid {
        match self {
            Self::Delivered(event) => event.batch_id,
            Self::AttemptFailed(event) => event.batch_id,
            Self::Abandoned(event) => event.batch_id,
        }
    }
}

/// Emitted when a batch is accepted by the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDeliveredEvent {
    /// Identifier assigned when the batch was accumulated.
    pub batch_id: Uuid,

    /// Worker that delivered the batch.
    pub worker_id: usize,

    /// Number of records in the batch.
    pub record_count: usize,

    /// Sum of the encoded record sizes in bytes.
    pub encoded_bytes: usize,

    /// Status code returned by the collector.
    pub status_code: u16,

    /// Attempts made, including the successful one (1-based).
    pub attempts: u32,

    /// When the collector answered.
    pub delivered_at: DateTime<Utc>,
}

/// Emitted for every attempt that did not succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptFailedEvent {
    /// Identifier assigned when the batch was accumulated.
    pub batch_id: Uuid,

    /// Worker that made the attempt.
    pub worker_id: usize,

    /// Attempt number (1-based).
    pub attempt_number: u32,

    /// Status code, if the collector answered at all.
    pub status_code: Option<u16>,

    /// Human readable failure reason.
    pub error_message: String,

    /// Whether the failure classifies as transient.
    pub is_retryable: bool,

    /// When the attempt failed.
    pub failed_at: DateTime<Utc>,
}

/// Why a batch was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbandonReason {
    /// Transient failures persisted past the retry budget.
    RetriesExhausted,
    /// A non-transient transport error ended the attempt loop.
    Aborted,
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RetriesExhausted => write!(f, "retries_exhausted"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Emitted when a batch reaches a terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAbandonedEvent {
    /// Identifier assigned when the batch was accumulated.
    pub batch_id: Uuid,

    /// Worker that gave up on the batch.
    pub worker_id: usize,

    /// Number of records lost with the batch.
    pub record_count: usize,

    /// Attempts made before giving up.
    pub attempts: u32,

    /// Terminal failure kind.
    pub reason: AbandonReason,

    /// Error from the last attempt.
    pub error_message: String,

    /// When the batch was abandoned.
    pub abandoned_at: DateTime<Utc>,
}

/// Subscriber side of the delivery event stream.
///
/// Handlers run inline on the worker that produced the event, so they should
/// return quickly. Failures inside a handler must be dealt with by the
/// handler itself; they never affect delivery.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles a delivery event.
    async fn handle_event(&self, event: DeliveryEvent);
}

/// Handler that discards every event.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op event handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: DeliveryEvent) {}
}

/// Forwards each event to every registered subscriber concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Registers a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        let deliveries = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move { handler.handle_event(event).await }
        });

        futures::future::join_all(deliveries).await;
    }
}
