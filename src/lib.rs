//! Command-line forwarder for newline-delimited JSON.
//!
//! Wires the delivery pipeline to a configured collector: [`config`] loads
//! and validates settings, [`ingest`] feeds input lines into the pipeline.

pub mod config;
pub mod ingest;

pub use config::{Config, SinkKind};
pub use ingest::{submit_lines, IngestSummary};
