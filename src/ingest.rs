//! Newline-delimited JSON ingestion.
//!
//! Reads one JSON document per line and submits it to a pipeline. Blank lines
//! are ignored and lines that fail to parse are logged and skipped, so one bad
//! producer line never stops the stream.

use std::future::Future;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};
use tributary_delivery::{PipelineHandle, Transport};

/// Line counts for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Lines accepted by the pipeline.
    pub submitted: u64,
    /// Lines that were not valid JSON.
    pub skipped: u64,
}

/// Submits every JSON line from `reader` until end of input or until `stop`
/// resolves.
///
/// `stop` is also observed while a submit waits for queue space, so a full
/// pipeline never delays an interrupt.
///
/// # Errors
///
/// Returns an error if reading fails or the pipeline rejects a record.
pub async fn submit_lines<R, T, S>(
    reader: R,
    handle: &PipelineHandle<T>,
    stop: S,
) -> Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
    T: Transport,
    S: Future<Output = ()>,
{
    let mut lines = reader.lines();
    let mut summary = IngestSummary::default();
    tokio::pin!(stop);

    loop {
        let line = tokio::select! {
            biased;
            () = &mut stop => {
                info!(submitted = summary.submitted, "input interrupted, stopping ingestion");
                break;
            }
            line = lines.next_line() => line.context("Failed to read input")?,
        };

        let Some(line) = line else {
            debug!(submitted = summary.submitted, "end of input");
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(line) {
            Ok(payload) => tokio::select! {
                biased;
                () = &mut stop => {
                    info!(
                        submitted = summary.submitted,
                        "input interrupted while waiting for queue space, stopping ingestion"
                    );
                    break;
                }
                submitted = handle.submit(payload) => {
                    submitted.context("Pipeline rejected record")?;
                    summary.submitted += 1;
                }
            },
            Err(e) => {
                summary.skipped += 1;
                warn!(error = %e, "skipping line that is not valid JSON");
            },
        }
    }

    Ok(summary)
}
