//! Transport abstraction between the delivery engine and a collector.
//!
//! A transport shapes requests for one kind of collector: it encodes each
//! record when it is submitted and turns a whole batch into one request. The
//! engine only sees status codes and [`DeliveryError`]s, so retry behavior is
//! independent of the wire format.
//!
//! [`DeliveryError`]: crate::error::DeliveryError

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tributary_core::Record;

use crate::{batch::Batch, error::Result};

/// Response returned by a collector for one batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code
    pub status_code: u16,
    /// Response body, possibly truncated
    pub body: String,
    /// Time from request start to response
    pub duration: Duration,
}

impl TransportResponse {
    /// Creates a response record.
    pub fn new(status_code: u16, body: String, duration: Duration) -> Self {
        Self { status_code, body, duration }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Request shaping for a single collector endpoint.
///
/// One instance is shared by every worker of a pipeline, so implementations
/// must be internally thread-safe and should reuse connections.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug + 'static {
    /// Encodes one record into the bytes that will travel in a batch.
    ///
    /// # Errors
    ///
    /// Returns `EncodingError` if the record cannot be serialized.
    fn encode(&self, record: &Record) -> Result<Bytes>;

    /// Sends `batch` as one request.
    ///
    /// Any HTTP status is returned as `Ok`; classification is up to the
    /// retry policy.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the request timed out and `NetworkError` for
    /// every other transport failure.
    async fn send(&self, batch: &Batch) -> Result<TransportResponse>;

    /// Endpoint URL, for logs.
    fn endpoint(&self) -> &str;
}

pub mod mock {
    //! Scripted transport for testing delivery logic without a network.
    //!
    //! Outcomes are consumed in order, one per send attempt, and the fallback
    //! outcome applies once the script runs out. An optional gate holds every
    //! send until permits are released, which lets tests pause consumers.

    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::{RwLock, Semaphore};
    use tributary_core::Record;
    use uuid::Uuid;

    use super::{Transport, TransportResponse};
    use crate::{
        batch::Batch,
        error::{DeliveryError, Result},
    };

    /// Outcome of one scripted send attempt.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockOutcome {
        /// Collector answers with this HTTP status.
        Status(u16),
        /// Request times out.
        Timeout,
        /// Connection fails.
        NetworkError,
    }

    /// Deterministic in-memory transport.
    ///
    /// Clones share state, so a test can keep one handle for assertions
    /// while the pipeline owns another.
    #[derive(Debug, Clone)]
    pub struct ScriptedTransport {
        script: Arc<RwLock<VecDeque<MockOutcome>>>,
        fallback: MockOutcome,
        sent: Arc<RwLock<Vec<Batch>>>,
        attempts: Arc<AtomicU32>,
        gate: Option<Arc<Semaphore>>,
    }

    impl ScriptedTransport {
        /// Creates a transport that accepts every batch with HTTP 200.
        pub fn new() -> Self {
            Self::always(MockOutcome::Status(200))
        }

        /// Creates a transport that answers every attempt with `outcome`.
        pub fn always(outcome: MockOutcome) -> Self {
            Self {
                script: Arc::new(RwLock::new(VecDeque::new())),
                fallback: outcome,
                sent: Arc::new(RwLock::new(Vec::new())),
                attempts: Arc::new(AtomicU32::new(0)),
                gate: None,
            }
        }

        /// Plays `outcomes` in order before falling back.
        #[must_use]
        pub fn with_script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
            Self { script: Arc::new(RwLock::new(outcomes.into_iter().collect())), ..self }
        }

        /// Sets the outcome used once the script is exhausted.
        #[must_use]
        pub fn with_fallback(self, outcome: MockOutcome) -> Self {
            Self { fallback: outcome, ..self }
        }

        /// Holds every send until a permit is released with
        /// [`release`](Self::release).
        #[must_use]
        pub fn gated(self) -> Self {
            Self { gate: Some(Arc::new(Semaphore::new(0))), ..self }
        }

        /// Lets `sends` more gated send attempts proceed.
        pub fn release(&self, sends: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(sends);
            }
        }

        /// Send attempts that reached the transport, including gated ones.
        pub fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }

        /// Batches in the order their attempts completed.
        ///
        /// A batch retried three times appears three times.
        pub async fn sent_batches(&self) -> Vec<Batch> {
            self.sent.read().await.clone()
        }

        /// Attempts recorded for one batch.
        pub async fn attempts_for(&self, batch_id: Uuid) -> usize {
            self.sent.read().await.iter().filter(|batch| batch.id() == batch_id).count()
        }

        /// Distinct records delivered across all attempts.
        pub async fn records_sent(&self) -> usize {
            let sent = self.sent.read().await;
            let mut seen = std::collections::HashSet::new();
            sent.iter().filter(|batch| seen.insert(batch.id())).map(Batch::len).sum()
        }
    }

    impl Default for ScriptedTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn encode(&self, record: &Record) -> Result<Bytes> {
            Ok(Bytes::from(serde_json::to_vec(record.payload())?))
        }

        async fn send(&self, batch: &Batch) -> Result<TransportResponse> {
            self.attempts.fetch_add(1, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|_| DeliveryError::network("transport gate closed"))?
                    .forget();
            }

            let outcome = self.script.write().await.pop_front().unwrap_or(self.fallback);
            self.sent.write().await.push(batch.clone());

            match outcome {
                MockOutcome::Status(status_code) => {
                    Ok(TransportResponse::new(status_code, String::new(), Duration::ZERO))
                },
                MockOutcome::Timeout => Err(DeliveryError::timeout(Duration::from_secs(600))),
                MockOutcome::NetworkError => {
                    Err(DeliveryError::network("connection refused (scripted)"))
                },
            }
        }

        fn endpoint(&self) -> &str {
            "mock://collector"
        }
    }
}
