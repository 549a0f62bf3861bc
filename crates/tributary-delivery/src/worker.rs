//! Consumer workers and the per-batch retry state machine.
//!
//! Each worker loops over accumulate and deliver. A batch moves through
//! `Attempting -> {Succeeded, Retrying, Exhausted, Aborted}`; whatever the
//! terminal state, its records are counted as processed and acknowledged on
//! the queue so shutdown can drain.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tributary_core::{
    AbandonReason, AttemptFailedEvent, BatchAbandonedEvent, BatchDeliveredEvent, Clock,
    DeliveryEvent, EventHandler,
};

use crate::{
    batch::{Batch, BatchAccumulator},
    error::Result,
    queue::BoundedQueue,
    retry::{AttemptResult, RetryDecision, RetryPolicy},
    transport::Transport,
};

/// Process-lifetime delivery counters.
///
/// Only workers write to these; readers take a [`PipelineStats`] snapshot.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    records_processed: AtomicU64,
    batches_delivered: AtomicU64,
    batches_exhausted: AtomicU64,
    batches_aborted: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    active_workers: AtomicUsize,
}

impl PipelineCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            records_processed: self.records_processed.load(Ordering::Acquire),
            batches_delivered: self.batches_delivered.load(Ordering::Acquire),
            batches_exhausted: self.batches_exhausted.load(Ordering::Acquire),
            batches_aborted: self.batches_aborted.load(Ordering::Acquire),
            attempts: self.attempts.load(Ordering::Acquire),
            retries: self.retries.load(Ordering::Acquire),
            active_workers: self.active_workers.load(Ordering::Acquire),
        }
    }

    pub(crate) fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn worker_stopped(&self) {
        self.active_workers.fetch_sub(1, Ordering::AcqRel);
    }

    fn record_outcome(&self, outcome: BatchOutcome, records: usize) {
        let counter = match outcome {
            BatchOutcome::Succeeded => &self.batches_delivered,
            BatchOutcome::Exhausted => &self.batches_exhausted,
            BatchOutcome::Aborted => &self.batches_aborted,
        };
        counter.fetch_add(1, Ordering::AcqRel);
        self.records_processed.fetch_add(records as u64, Ordering::AcqRel);
    }
}

/// Snapshot of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Records whose batch reached a terminal state, delivered or not.
    pub records_processed: u64,
    /// Batches accepted by the collector.
    pub batches_delivered: u64,
    /// Batches abandoned after the retry budget ran out.
    pub batches_exhausted: u64,
    /// Batches abandoned on a non-retryable transport error.
    pub batches_aborted: u64,
    /// Send attempts across all batches.
    pub attempts: u64,
    /// Backoff sleeps taken before re-sending.
    pub retries: u64,
    /// Workers currently running.
    pub active_workers: usize,
}

/// Terminal state of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The collector answered with a non-retryable status.
    Succeeded,
    /// Retryable failures persisted past `max_retries`.
    Exhausted,
    /// A non-retryable transport error ended the attempt loop.
    Aborted,
}

/// State shared by every worker of one pipeline.
#[derive(Debug)]
pub struct DeliveryContext<T> {
    /// Queue of encoded records.
    pub queue: Arc<BoundedQueue<Bytes>>,
    /// Batch size policy.
    pub accumulator: BatchAccumulator,
    /// Transport shared by all workers.
    pub transport: Arc<T>,
    /// Retry policy applied to every batch.
    pub policy: RetryPolicy,
    /// Delivery counters.
    pub counters: Arc<PipelineCounters>,
    /// Observability sink.
    pub event_handler: Arc<dyn EventHandler>,
    /// Clock used for backoff sleeps and event timestamps.
    pub clock: Arc<dyn Clock>,
}

/// Worker that drains the queue batch by batch until cancelled.
#[derive(Debug)]
pub struct ConsumerWorker<T> {
    id: usize,
    context: Arc<DeliveryContext<T>>,
    cancellation_token: CancellationToken,
}

impl<T: Transport> ConsumerWorker<T> {
    /// Creates a worker bound to a shared delivery context.
    pub fn new(
        id: usize,
        context: Arc<DeliveryContext<T>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, context, cancellation_token }
    }

    /// Main worker loop.
    ///
    /// Cancellation is only observed while waiting for the first record of a
    /// batch. Once a batch exists it is carried through to a terminal state.
    ///
    /// # Errors
    ///
    /// Currently never fails; delivery failures are handled per batch.
    pub async fn run(&self) -> Result<()> {
        debug!(worker_id = self.id, "consumer worker starting");

        loop {
            let batch = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => {
                    debug!(worker_id = self.id, "consumer worker received shutdown signal");
                    break;
                }
                batch = self.context.accumulator.build(&self.context.queue) => batch,
            };

            let Some(batch) = batch else {
                debug!(worker_id = self.id, "work queue terminated");
                break;
            };

            self.deliver(batch).await;
        }

        debug!(worker_id = self.id, "consumer worker stopped");
        Ok(())
    }

    /// Sends `batch` until it succeeds, exhausts its retries or aborts.
    ///
    /// Counters are updated and the terminal event is published before the
    /// records are acknowledged, so a completed drain always observes them.
    pub async fn deliver(&self, batch: Batch) -> BatchOutcome {
        let context = &self.context;
        let batch_size = batch.len();
        let started = context.clock.now();
        let mut attempt: u32 = 0;
        let mut retry_count: u32 = 0;

        let (outcome, terminal_event) = loop {
            attempt += 1;
            context.counters.attempts.fetch_add(1, Ordering::AcqRel);

            let result = context.transport.send(&batch).await;

            match context.policy.classify(&result) {
                AttemptResult::Success { status_code } => {
                    if (200..300).contains(&status_code) {
                        debug!(
                            worker_id = self.id,
                            batch_id = %batch.id(),
                            batch_size,
                            attempt,
                            status_code,
                            "batch delivered"
                        );
                    } else {
                        warn!(
                            worker_id = self.id,
                            batch_id = %batch.id(),
                            batch_size,
                            attempt,
                            status_code,
                            "collector rejected batch with a non-retryable status"
                        );
                    }

                    let event = DeliveryEvent::Delivered(BatchDeliveredEvent {
                        batch_id: batch.id(),
                        worker_id: self.id,
                        record_count: batch_size,
                        encoded_bytes: batch.encoded_len(),
                        status_code,
                        attempts: attempt,
                        delivered_at: self.timestamp(),
                    });
                    break (BatchOutcome::Succeeded, event);
                },
                AttemptResult::RetryableFailure { reason, status_code } => {
                    warn!(
                        worker_id = self.id,
                        batch_id = %batch.id(),
                        batch_size,
                        attempt,
                        status_code,
                        error = %reason,
                        "batch delivery attempt failed"
                    );
                    self.publish(self.attempt_failed(&batch, attempt, status_code, &reason, true))
                        .await;

                    retry_count += 1;
                    match context.policy.decide(retry_count) {
                        RetryDecision::Retry { delay } => {
                            context.counters.retries.fetch_add(1, Ordering::AcqRel);
                            debug!(
                                worker_id = self.id,
                                batch_id = %batch.id(),
                                delay_ms = delay.as_millis(),
                                "backing off before retry"
                            );
                            context.clock.sleep(delay).await;
                        },
                        RetryDecision::GiveUp { reason: give_up } => {
                            error!(
                                worker_id = self.id,
                                batch_id = %batch.id(),
                                batch_size,
                                attempts = attempt,
                                error = %reason,
                                "abandoning batch: {give_up}"
                            );
                            let event = self.abandoned(
                                &batch,
                                attempt,
                                AbandonReason::RetriesExhausted,
                                reason,
                            );
                            break (BatchOutcome::Exhausted, event);
                        },
                    }
                },
                AttemptResult::FatalFailure { reason } => {
                    warn!(
                        worker_id = self.id,
                        batch_id = %batch.id(),
                        batch_size,
                        attempt,
                        error = %reason,
                        "aborting batch on non-retryable transport error"
                    );
                    self.publish(self.attempt_failed(&batch, attempt, None, &reason, false)).await;

                    let event = self.abandoned(&batch, attempt, AbandonReason::Aborted, reason);
                    break (BatchOutcome::Aborted, event);
                },
            }
        };

        debug!(
            worker_id = self.id,
            batch_id = %batch.id(),
            ?outcome,
            attempts = attempt,
            elapsed_ms = context.clock.now().duration_since(started).as_millis() as u64,
            "batch finished"
        );

        context.counters.record_outcome(outcome, batch_size);
        self.publish(terminal_event).await;
        context.queue.acknowledge(batch_size);

        outcome
    }

    fn attempt_failed(
        &self,
        batch: &Batch,
        attempt_number: u32,
        status_code: Option<u16>,
        reason: &str,
        is_retryable: bool,
    ) -> DeliveryEvent {
        DeliveryEvent::AttemptFailed(AttemptFailedEvent {
            batch_id: batch.id(),
            worker_id: self.id,
            attempt_number,
            status_code,
            error_message: reason.to_string(),
            is_retryable,
            failed_at: self.timestamp(),
        })
    }

    fn abandoned(
        &self,
        batch: &Batch,
        attempts: u32,
        reason: AbandonReason,
        error_message: String,
    ) -> DeliveryEvent {
        DeliveryEvent::Abandoned(BatchAbandonedEvent {
            batch_id: batch.id(),
            worker_id: self.id,
            record_count: batch.len(),
            attempts,
            reason,
            error_message,
            abandoned_at: self.timestamp(),
        })
    }

    fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from(self.context.clock.now_system())
    }

    async fn publish(&self, event: DeliveryEvent) {
        self.context.event_handler.handle_event(event).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Mutex;
    use tributary_core::{NoOpEventHandler, TestClock};

    use super::*;
    use crate::transport::mock::{MockOutcome, ScriptedTransport};

    #[derive(Debug, Default)]
    struct RecordingHandler {
        events: Mutex<Vec<DeliveryEvent>>,
    }

    #[async_trait::async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle_event(&self, event: DeliveryEvent) {
            self.events.lock().await.push(event);
        }
    }

    struct Fixture {
        worker: ConsumerWorker<ScriptedTransport>,
        transport: ScriptedTransport,
        clock: TestClock,
        context: Arc<DeliveryContext<ScriptedTransport>>,
    }

    fn fixture(transport: ScriptedTransport, event_handler: Arc<dyn EventHandler>) -> Fixture {
        let clock = TestClock::new();
        let context = Arc::new(DeliveryContext {
            queue: Arc::new(BoundedQueue::new(16).unwrap()),
            accumulator: BatchAccumulator::new(usize::MAX).unwrap(),
            transport: Arc::new(transport.clone()),
            policy: RetryPolicy::default(),
            counters: Arc::new(PipelineCounters::new()),
            event_handler,
            clock: Arc::new(clock.clone()),
        });
        let worker = ConsumerWorker::new(7, context.clone(), CancellationToken::new());
        Fixture { worker, transport, clock, context }
    }

    async fn claimed_batch(context: &DeliveryContext<ScriptedTransport>, records: usize) -> Batch {
        for n in 0..records {
            context.queue.submit(Bytes::from(format!("{{\"n\":{n}}}"))).await.unwrap();
        }
        context.accumulator.build(&context.queue).await.unwrap()
    }

    #[tokio::test]
    async fn retryable_statuses_then_success_counts_once() {
        let transport = ScriptedTransport::new()
            .with_script([MockOutcome::Status(503), MockOutcome::Status(500)]);
        let f = fixture(transport, Arc::new(NoOpEventHandler));
        let batch = claimed_batch(&f.context, 3).await;

        let outcome = f.worker.deliver(batch).await;

        assert_eq!(outcome, BatchOutcome::Succeeded);
        assert_eq!(f.transport.attempts(), 3);
        let stats = f.context.counters.snapshot();
        assert_eq!(stats.records_processed, 3);
        assert_eq!(stats.batches_delivered, 1);
        assert_eq!(stats.retries, 2);
        assert_eq!(f.context.queue.pending(), 0);
    }

    #[tokio::test]
    async fn always_retryable_exhausts_with_linear_backoff() {
        let transport = ScriptedTransport::always(MockOutcome::Status(503));
        let f = fixture(transport, Arc::new(NoOpEventHandler));
        let batch = claimed_batch(&f.context, 2).await;

        let outcome = f.worker.deliver(batch).await;

        assert_eq!(outcome, BatchOutcome::Exhausted);
        assert_eq!(f.transport.attempts(), 3);
        assert_eq!(f.clock.recorded_sleeps(), [Duration::from_secs(2), Duration::from_secs(4)]);
        let stats = f.context.counters.snapshot();
        assert_eq!(stats.records_processed, 2);
        assert_eq!(stats.batches_exhausted, 1);
        assert_eq!(f.context.queue.pending(), 0);
    }

    #[tokio::test]
    async fn timeouts_are_retried() {
        let transport = ScriptedTransport::new().with_script([MockOutcome::Timeout]);
        let f = fixture(transport, Arc::new(NoOpEventHandler));
        let batch = claimed_batch(&f.context, 1).await;

        assert_eq!(f.worker.deliver(batch).await, BatchOutcome::Succeeded);
        assert_eq!(f.transport.attempts(), 2);
        assert_eq!(f.clock.recorded_sleeps(), [Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn network_error_aborts_after_one_attempt() {
        let transport = ScriptedTransport::always(MockOutcome::NetworkError);
        let f = fixture(transport, Arc::new(NoOpEventHandler));
        let batch = claimed_batch(&f.context, 4).await;

        let outcome = f.worker.deliver(batch).await;

        assert_eq!(outcome, BatchOutcome::Aborted);
        assert_eq!(f.transport.attempts(), 1);
        assert!(f.clock.recorded_sleeps().is_empty());
        let stats = f.context.counters.snapshot();
        assert_eq!(stats.records_processed, 4);
        assert_eq!(stats.batches_aborted, 1);
    }

    #[tokio::test]
    async fn client_error_status_is_terminal_success() {
        let transport = ScriptedTransport::always(MockOutcome::Status(400));
        let f = fixture(transport, Arc::new(NoOpEventHandler));
        let batch = claimed_batch(&f.context, 1).await;

        assert_eq!(f.worker.deliver(batch).await, BatchOutcome::Succeeded);
        assert_eq!(f.transport.attempts(), 1);
    }

    #[tokio::test]
    async fn events_are_published_per_attempt_and_terminal_state() {
        let handler = Arc::new(RecordingHandler::default());
        let transport = ScriptedTransport::always(MockOutcome::Status(500));
        let f = fixture(transport, handler.clone());
        let batch = claimed_batch(&f.context, 2).await;
        let batch_id = batch.id();

        f.worker.deliver(batch).await;

        let events = handler.events.lock().await;
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|event| event.batch_id() == batch_id));
        assert!(events[..3].iter().all(|event| matches!(event, DeliveryEvent::AttemptFailed(_))));
        match &events[3] {
            DeliveryEvent::Abandoned(abandoned) => {
                assert_eq!(abandoned.reason, AbandonReason::RetriesExhausted);
                assert_eq!(abandoned.attempts, 3);
                assert_eq!(abandoned.record_count, 2);
                assert_eq!(abandoned.worker_id, 7);
            },
            other => panic!("expected abandoned event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn event_timestamps_follow_the_injected_clock() {
        let handler = Arc::new(RecordingHandler::default());
        let transport = ScriptedTransport::always(MockOutcome::Status(503));
        let f = fixture(transport, handler.clone());
        let batch = claimed_batch(&f.context, 1).await;
        let start = DateTime::<Utc>::from(f.clock.now_system());

        f.worker.deliver(batch).await;

        let events = handler.events.lock().await;
        let failed_at: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                DeliveryEvent::AttemptFailed(failed) => Some(failed.failed_at),
                _ => None,
            })
            .collect();
        assert_eq!(failed_at.len(), 3);
        assert_eq!((failed_at[0] - start).num_seconds(), 0);
        assert_eq!((failed_at[1] - start).num_seconds(), 2);
        assert_eq!((failed_at[2] - start).num_seconds(), 6);
        match &events[3] {
            DeliveryEvent::Abandoned(abandoned) => {
                assert_eq!((abandoned.abandoned_at - start).num_seconds(), 6);
            },
            other => panic!("expected abandoned event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_worker_stops_while_idle() {
        let f = fixture(ScriptedTransport::new(), Arc::new(NoOpEventHandler));
        let token = f.worker.cancellation_token.clone();

        let handle = tokio::spawn(async move { f.worker.run().await });
        tokio::task::yield_now().await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap().unwrap();
    }
}
