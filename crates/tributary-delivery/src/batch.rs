//! Size-bounded batch accumulation.
//!
//! A batch always starts with one record claimed from the queue (waiting for
//! it if needed), then greedily takes every immediately available record
//! until the encoded size reaches the threshold. The size check happens after
//! each append, so the record that crosses the threshold is kept.

use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{DeliveryError, Result},
    queue::BoundedQueue,
};

/// Ordered, non-empty group of encoded records delivered together.
///
/// A batch is built once and re-sent verbatim on every retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    id: Uuid,
    records: Vec<Bytes>,
    encoded_len: usize,
}

impl Batch {
    fn starting_with(record: Bytes) -> Self {
        let encoded_len = record.len();
        Self { id: Uuid::new_v4(), records: vec![record], encoded_len }
    }

    /// Builds a batch from already encoded records.
    ///
    /// Returns `None` for an empty input.
    pub fn from_records(records: Vec<Bytes>) -> Option<Self> {
        let mut records = records.into_iter();
        let mut batch = Self::starting_with(records.next()?);
        records.for_each(|record| batch.push(record));
        Some(batch)
    }

    fn push(&mut self, record: Bytes) {
        self.encoded_len += record.len();
        self.records.push(record);
    }

    /// Identifier used in logs and delivery events.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Encoded records in claim order.
    pub fn records(&self) -> &[Bytes] {
        &self.records
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records.
    ///
    /// Both constructors, [`from_records`](Self::from_records) and
    /// [`BatchAccumulator::build`], refuse to produce an empty batch, so this
    /// is `false` for every `Batch` in existence.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of the encoded record sizes in bytes.
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }
}

/// Greedy batch builder bounded by encoded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchAccumulator {
    max_batch_bytes: usize,
}

impl BatchAccumulator {
    /// Creates an accumulator that stops once a batch reaches
    /// `max_batch_bytes`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if `max_batch_bytes` is zero.
    pub fn new(max_batch_bytes: usize) -> Result<Self> {
        if max_batch_bytes == 0 {
            return Err(DeliveryError::configuration("max batch size must be greater than 0"));
        }
        Ok(Self { max_batch_bytes })
    }

    /// Size threshold in bytes.
    pub fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }

    /// Claims records from `queue` into a new batch.
    ///
    /// Waits for the first record; afterwards only takes records that are
    /// immediately available. Returns `None` only if the queue was
    /// terminated while waiting.
    ///
    /// Cancel-safe: once the first record is claimed the rest of the build
    /// runs without suspending.
    pub async fn build(&self, queue: &BoundedQueue<Bytes>) -> Option<Batch> {
        let mut batch = Batch::starting_with(queue.claim().await?);

        while batch.encoded_len < self.max_batch_bytes {
            let Some(record) = queue.try_claim() else {
                break;
            };
            batch.push(record);
        }

        debug!(
            batch_id = %batch.id,
            records = batch.len(),
            encoded_bytes = batch.encoded_len,
            queued = queue.len(),
            "accumulated batch"
        );
        Some(batch)
    }
}
