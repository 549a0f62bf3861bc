//! Delivery pipeline with bounded queue, worker pool and drain-on-shutdown.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────┐   ┌───────────┐
//! │ PipelineHandle│──▶│ BoundedQueue │──▶│ ConsumerWorker │──▶│ Transport │
//! │   submit()   │   │  (capacity)  │   │  x concurrency │   │  send()   │
//! └──────────────┘   └──────────────┘   └────────────────┘   └───────────┘
//!                            ▲                    │
//!                            └──── acknowledge ───┘
//! ```
//!
//! Records are encoded at submit time, so the queue bounds memory by record
//! count while batches are cut by encoded size. [`Pipeline::shutdown`] closes
//! the queue, waits until every accepted record reached a terminal state,
//! then stops the workers. [`Pipeline::run`] wraps that in a scope that
//! drains on every exit path of the caller's future.

use std::{future::Future, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tributary_core::{Clock, EventHandler, NoOpEventHandler, RealClock, Record, RecordMeta};

use crate::{
    batch::BatchAccumulator,
    error::{DeliveryError, Result},
    queue::BoundedQueue,
    retry::RetryPolicy,
    transport::Transport,
    worker::{DeliveryContext, PipelineCounters, PipelineStats},
    worker_pool::WorkerPool,
};

/// Configuration for a delivery pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of concurrent consumer workers.
    pub concurrency: usize,

    /// Maximum number of queued, unclaimed records.
    pub queue_capacity: usize,

    /// Encoded size at which a batch stops growing.
    pub max_batch_bytes: usize,

    /// Retry policy applied to every batch.
    pub retry_policy: RetryPolicy,

    /// Routing metadata applied to records that do not set their own.
    pub default_meta: RecordMeta,

    /// Upper bound on waiting for the queue to drain; unbounded if `None`.
    pub drain_timeout: Option<Duration>,

    /// Maximum time to wait for workers to stop once drained.
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: crate::DEFAULT_CONCURRENCY,
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            max_batch_bytes: crate::DEFAULT_MAX_BATCH_BYTES,
            retry_policy: RetryPolicy::default(),
            default_meta: RecordMeta::default(),
            drain_timeout: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    /// Checks the values that would otherwise fail deep inside the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(DeliveryError::configuration("concurrency must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(DeliveryError::configuration("queue_capacity must be greater than 0"));
        }
        if self.max_batch_bytes == 0 {
            return Err(DeliveryError::configuration("max_batch_bytes must be greater than 0"));
        }
        Ok(())
    }
}

/// Running delivery pipeline.
///
/// Dropping a pipeline without calling [`shutdown`](Self::shutdown) closes
/// the queue and cancels the workers; records still queued or in flight are
/// lost.
pub struct Pipeline<T: Transport> {
    context: Arc<DeliveryContext<T>>,
    handle: PipelineHandle<T>,
    config: PipelineConfig,
    worker_pool: Option<WorkerPool<T>>,
}

impl<T: Transport> Pipeline<T> {
    /// Starts a pipeline using the real clock and no event subscribers.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if `config` is invalid.
    pub fn start(transport: T, config: PipelineConfig) -> Result<Self> {
        Self::with_event_handler(
            transport,
            config,
            Arc::new(RealClock::new()),
            Arc::new(NoOpEventHandler::new()),
        )
    }

    /// Starts a pipeline with an injected clock and event handler.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if `config` is invalid.
    pub fn with_event_handler(
        transport: T,
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let context = Arc::new(DeliveryContext {
            queue: Arc::new(BoundedQueue::new(config.queue_capacity)?),
            accumulator: BatchAccumulator::new(config.max_batch_bytes)?,
            transport: Arc::new(transport),
            policy: config.retry_policy.clone(),
            counters: Arc::new(PipelineCounters::new()),
            event_handler,
            clock,
        });

        info!(
            endpoint = context.transport.endpoint(),
            concurrency = config.concurrency,
            queue_capacity = config.queue_capacity,
            max_batch_bytes = config.max_batch_bytes,
            max_retries = config.retry_policy.max_retries,
            "starting delivery pipeline"
        );

        let mut worker_pool =
            WorkerPool::new(context.clone(), config.concurrency, CancellationToken::new());
        worker_pool.spawn_workers()?;

        let handle = PipelineHandle {
            context: context.clone(),
            default_meta: Arc::new(config.default_meta.clone()),
        };

        Ok(Self { context, handle, config, worker_pool: Some(worker_pool) })
    }

    /// Starts a pipeline, runs `scope` against it and shuts it down.
    ///
    /// See [`scope`](Self::scope).
    ///
    /// # Errors
    ///
    /// Returns the scope's error if it failed, otherwise any startup or
    /// shutdown error.
    pub async fn run<F, Fut, R, E>(
        transport: T,
        config: PipelineConfig,
        scope: F,
    ) -> std::result::Result<(R, PipelineStats), E>
    where
        F: FnOnce(PipelineHandle<T>) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: From<DeliveryError>,
    {
        Self::start(transport, config)?.scope(scope).await
    }

    /// Runs `scope` with a submission handle, then drains and shuts down.
    ///
    /// The drain happens whether the scope returns `Ok` or `Err`. If the
    /// scope panics or the returned future is dropped, the pipeline is
    /// dropped instead and workers are cancelled without draining.
    ///
    /// # Errors
    ///
    /// Returns the scope's error if it failed, otherwise any shutdown error.
    pub async fn scope<F, Fut, R, E>(self, scope: F) -> std::result::Result<(R, PipelineStats), E>
    where
        F: FnOnce(PipelineHandle<T>) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: From<DeliveryError>,
    {
        let result = scope(self.handle()).await;
        if result.is_err() {
            debug!("pipeline scope failed, draining before returning its error");
        }

        let shutdown = self.shutdown().await;
        let value = result?;
        Ok((value, shutdown?))
    }

    /// Cloneable submission handle.
    pub fn handle(&self) -> PipelineHandle<T> {
        self.handle.clone()
    }

    /// Submits one record; see [`PipelineHandle::submit`].
    ///
    /// # Errors
    ///
    /// Returns `EncodingError` or `QueueClosed`.
    pub async fn submit(&self, record: impl Into<Record>) -> Result<()> {
        self.handle.submit(record).await
    }

    /// Current counter snapshot.
    pub fn stats(&self) -> PipelineStats {
        self.context.counters.snapshot()
    }

    /// Records queued or in flight.
    pub fn pending(&self) -> usize {
        self.context.queue.pending()
    }

    /// Closes submissions, drains, stops the workers and returns the final
    /// counters.
    ///
    /// # Errors
    ///
    /// Returns `DrainTimeout` if the drain timeout elapsed, `ShutdownTimeout`
    /// if workers did not stop in time, or `WorkerPanic` if one panicked.
    /// Workers are stopped in every case.
    pub async fn shutdown(mut self) -> Result<PipelineStats> {
        let queue = self.context.queue.clone();
        info!(pending = queue.pending(), "draining delivery pipeline");

        queue.close();
        let drained = match self.config.drain_timeout {
            Some(timeout) => tokio::time::timeout(timeout, queue.drain_wait()).await.map_err(|_| {
                let pending = queue.pending();
                warn!(
                    timeout_seconds = timeout.as_secs(),
                    pending,
                    "drain timed out, abandoning pending records"
                );
                queue.terminate();
                DeliveryError::DrainTimeout { timeout, pending }
            }),
            None => {
                queue.drain_wait().await;
                Ok(())
            },
        };

        let stopped = match self.worker_pool.take() {
            Some(worker_pool) => worker_pool.shutdown_graceful(self.config.shutdown_timeout).await,
            None => Ok(()),
        };

        let stats = self.stats();
        info!(
            records_processed = stats.records_processed,
            batches_delivered = stats.batches_delivered,
            batches_exhausted = stats.batches_exhausted,
            batches_aborted = stats.batches_aborted,
            attempts = stats.attempts,
            "delivery pipeline stopped"
        );

        drained?;
        stopped?;
        Ok(stats)
    }
}

impl<T: Transport> Drop for Pipeline<T> {
    fn drop(&mut self) {
        if self.worker_pool.is_some() {
            warn!(
                pending = self.context.queue.pending(),
                "pipeline dropped without shutdown, cancelling workers"
            );
            self.context.queue.terminate();
        }
    }
}

/// Cloneable handle for submitting records to a running pipeline.
#[derive(Debug)]
pub struct PipelineHandle<T> {
    context: Arc<DeliveryContext<T>>,
    default_meta: Arc<RecordMeta>,
}

impl<T> Clone for PipelineHandle<T> {
    fn clone(&self) -> Self {
        Self { context: self.context.clone(), default_meta: self.default_meta.clone() }
    }
}

impl<T: Transport> PipelineHandle<T> {
    /// Encodes `record` and enqueues it, suspending while the queue is full.
    ///
    /// The record's own routing metadata wins over the pipeline defaults;
    /// empty values fall back to the defaults. Delivery failures are never
    /// reported here.
    ///
    /// # Errors
    ///
    /// Returns `EncodingError` if the transport cannot encode the record, or
    /// `QueueClosed` once shutdown has begun.
    pub async fn submit(&self, record: impl Into<Record>) -> Result<()> {
        let record = record.into();
        let meta = record.meta().merged_over(&self.default_meta);
        let record = record.with_meta(meta);

        let encoded = self.context.transport.encode(&record)?;
        self.context.queue.submit(encoded).await
    }

    /// Submits `payload` with per-call routing metadata.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub async fn submit_with_meta(&self, payload: serde_json::Value, meta: RecordMeta) -> Result<()> {
        self.submit(Record::new(payload).with_meta(meta)).await
    }

    /// Current counter snapshot.
    pub fn stats(&self) -> PipelineStats {
        self.context.counters.snapshot()
    }

    /// Records queued or in flight.
    pub fn pending(&self) -> usize {
        self.context.queue.pending()
    }

    /// Whether the pipeline has stopped accepting records.
    pub fn is_closed(&self) -> bool {
        self.context.queue.is_closed()
    }
}
