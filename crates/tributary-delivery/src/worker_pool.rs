//! Worker pool management with structured concurrency.
//!
//! Spawns a fixed number of consumer workers over a shared delivery context
//! and joins them on shutdown within a timeout.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    transport::Transport,
    worker::{ConsumerWorker, DeliveryContext},
};

/// Supervised set of consumer worker tasks.
pub struct WorkerPool<T> {
    context: Arc<DeliveryContext<T>>,
    worker_count: usize,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
}

impl<T: Transport> WorkerPool<T> {
    /// Creates a pool that will run `worker_count` workers.
    pub fn new(
        context: Arc<DeliveryContext<T>>,
        worker_count: usize,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { context, worker_count, cancellation_token, worker_handles: Vec::new() }
    }

    /// Spawns every worker on the current runtime.
    ///
    /// Returns immediately; workers run until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the pool size is zero or the workers
    /// were already spawned.
    pub fn spawn_workers(&mut self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(DeliveryError::configuration("worker count must be greater than 0"));
        }
        if !self.worker_handles.is_empty() {
            return Err(DeliveryError::configuration("workers already spawned"));
        }

        debug!(worker_count = self.worker_count, "spawning consumer workers");

        for worker_id in 0..self.worker_count {
            let worker =
                ConsumerWorker::new(worker_id, self.context.clone(), self.cancellation_token.clone());
            let counters = self.context.counters.clone();
            counters.worker_started();

            let handle = tokio::spawn(async move {
                let result = worker.run().await;
                counters.worker_stopped();

                if let Err(ref error) = result {
                    error!(
                        worker_id,
                        error = %error,
                        "consumer worker terminated with error"
                    );
                }

                result
            });

            self.worker_handles.push(handle);
        }

        info!(spawned_workers = self.worker_handles.len(), "consumer workers spawned");

        Ok(())
    }

    /// Cancels all workers and waits for them to finish.
    ///
    /// Workers in the middle of a batch finish that batch first, including
    /// its backoff sleeps, so `timeout` should cover the longest retry chain
    /// expected at shutdown.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers do not stop in time, or
    /// `WorkerPanic` for the first worker that panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let shutdown_future = async {
            let mut first_panic = None;

            for (worker_id, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(
                            worker_id,
                            error = %error,
                            "worker completed with error during shutdown"
                        );
                    },
                    Err(join_error) => {
                        error!(
                            worker_id,
                            error = %join_error,
                            "worker task panicked"
                        );
                        if join_error.is_panic() {
                            // The panicking task never reached its own bookkeeping.
                            self.context.counters.worker_stopped();
                        }
                        first_panic.get_or_insert(DeliveryError::WorkerPanic {
                            worker_id,
                            error: join_error.to_string(),
                        });
                    },
                }
            }

            first_panic
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(None) => {
                info!("worker pool shutdown completed");
                Ok(())
            },
            Ok(Some(panic)) => Err(panic),
            Err(_timeout) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Number of spawned worker tasks not yet joined.
    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if !self.worker_handles.is_empty() {
            let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

            if active_count > 0 && !self.cancellation_token.is_cancelled() {
                warn!(
                    active_workers = active_count,
                    "WorkerPool dropped without shutdown, cancelling workers; in-flight records are lost"
                );

                self.cancellation_token.cancel();
            }
        }
    }
}
