//! Property-based tests for batch accumulation and retry scheduling.
//!
//! Drives the queue and accumulator with arbitrary record sizes and
//! thresholds, and the retry policy with arbitrary budgets and units, checking the
//! invariants the workers rely on.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use bytes::Bytes;
use proptest::{prelude::*, test_runner::Config as ProptestConfig};
use tributary_delivery::{Batch, BatchAccumulator, BoundedQueue, RetryDecision, RetryPolicy};

fn proptest_config() -> ProptestConfig {
    ProptestConfig { cases: 64, failure_persistence: None, ..ProptestConfig::default() }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

/// Records of 1..=64 bytes, each tagged with its position.
fn records_strategy() -> impl Strategy<Value = Vec<Bytes>> {
    prop::collection::vec(1usize..=64, 1..40).prop_map(|sizes| {
        sizes
            .into_iter()
            .enumerate()
            .map(|(i, size)| {
                let mut record = format!("{i:04}").into_bytes();
                record.resize(size.max(4), b'x');
                Bytes::from(record)
            })
            .collect()
    })
}

fn accumulate_all(records: &[Bytes], threshold: usize) -> Vec<Batch> {
    runtime().block_on(async {
        let queue = BoundedQueue::new(records.len()).unwrap();
        for record in records {
            queue.submit(record.clone()).await.unwrap();
        }

        let accumulator = BatchAccumulator::new(threshold).unwrap();
        let mut batches = Vec::new();
        while !queue.is_empty() {
            batches.push(accumulator.build(&queue).await.unwrap());
        }
        batches
    })
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn batches_are_never_empty(records in records_strategy(), threshold in 1usize..512) {
        for batch in accumulate_all(&records, threshold) {
            prop_assert!(!batch.is_empty());
        }
    }

    #[test]
    fn accumulation_preserves_claim_order(records in records_strategy(), threshold in 1usize..512) {
        let batches = accumulate_all(&records, threshold);

        let flattened: Vec<Bytes> =
            batches.iter().flat_map(|batch| batch.records().iter().cloned()).collect();
        prop_assert_eq!(flattened, records);
    }

    #[test]
    fn only_the_last_record_may_cross_the_threshold(
        records in records_strategy(),
        threshold in 1usize..512,
    ) {
        for batch in accumulate_all(&records, threshold) {
            let last = batch.records().last().map_or(0, Bytes::len);
            prop_assert!(batch.encoded_len() - last < threshold);
            prop_assert_eq!(
                batch.encoded_len(),
                batch.records().iter().map(Bytes::len).sum::<usize>()
            );
        }
    }

    #[test]
    fn linear_backoff_is_proportional_to_retry_count(
        max_retries in 0u32..10,
        unit_ms in 1u64..5_000,
    ) {
        let policy = RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(unit_ms),
            ..RetryPolicy::default()
        };

        for retry in 1..=max_retries {
            prop_assert_eq!(
                policy.decide(retry),
                RetryDecision::Retry { delay: Duration::from_millis(unit_ms * u64::from(retry)) }
            );
        }
        let gave_up = matches!(policy.decide(max_retries + 1), RetryDecision::GiveUp { .. });
        prop_assert!(gave_up);
        prop_assert_eq!(policy.max_attempts(), max_retries + 1);
    }
}
