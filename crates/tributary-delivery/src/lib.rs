//! Batching delivery engine with bounded memory and retry guarantees.
//!
//! Callers submit records to a [`Pipeline`]; records are encoded by the
//! pipeline's [`Transport`], held in a fixed-capacity queue, accumulated into
//! size-bounded batches by a pool of consumer workers, and delivered with
//! linear backoff on transient failures.
//!
//! # Architecture
//!
//! 1. **Submit** - records are encoded and enqueued; producers wait while the
//!    queue is full
//! 2. **Accumulate** - a worker claims one record, then everything
//!    immediately available up to the batch size threshold
//! 3. **Deliver** - the batch is sent, retried on retryable statuses and
//!    timeouts, and aborted on any other transport error
//! 4. **Acknowledge** - whatever the outcome, the batch's records are counted
//!    as processed and released so shutdown can drain
//!
//! # Key Features
//!
//! - **Backpressure** - the queue never drops records; producers suspend
//! - **Drain on shutdown** - every accepted record reaches a terminal state
//!   before workers stop
//! - **Pluggable transports** - event collector and KV-store shapings over a
//!   pooled HTTP client, plus a scripted mock for tests
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use tributary_delivery::{
//!     ClientConfig, DeliveryError, EventCollectorTarget, HttpTransport, Pipeline,
//!     PipelineConfig,
//! };
//!
//! # async fn example() -> std::result::Result<(), DeliveryError> {
//! let target = EventCollectorTarget::new("splunk.example.com", "token");
//! let transport = HttpTransport::event_collector(&target, ClientConfig::default())?;
//!
//! let (_, stats) = Pipeline::run(transport, PipelineConfig::default(), |handle| async move {
//!     handle.submit(json!({"message": "hello"})).await?;
//!     Ok::<_, DeliveryError>(())
//! })
//! .await?;
//!
//! println!("processed {} records", stats.records_processed);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod client;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod transport;
pub mod worker;
mod worker_pool;

pub use batch::{Batch, BatchAccumulator};
pub use client::{ClientConfig, EventCollectorTarget, HttpTransport, KvStoreTarget, PayloadFraming};
pub use error::{DeliveryError, Result};
pub use pipeline::{Pipeline, PipelineConfig, PipelineHandle};
pub use queue::BoundedQueue;
pub use retry::{AttemptResult, RetryDecision, RetryPolicy};
pub use transport::{Transport, TransportResponse};
pub use worker::{BatchOutcome, PipelineStats};

/// Default number of concurrent consumer workers.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Default maximum number of queued records.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50_000;

/// Default batch size threshold for event collector payloads, in bytes.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 100_000;

/// Default batch size threshold for KV-store payloads, in bytes.
pub const DEFAULT_KV_STORE_MAX_BATCH_BYTES: usize = 1_000;
