//! Record model submitted to delivery pipelines.
//!
//! A record is an opaque JSON payload plus optional routing metadata. The
//! metadata fields mirror the routing tags understood by event collectors
//! (`host`, `source`, `index`, `sourcetype`); transports that have no use for
//! them simply ignore the metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Routing metadata attached to a record.
///
/// Empty strings are treated the same as absent values, so a caller passing
/// `Some("")` never masks a pipeline-level default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Originating host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Source identifier (file, stream, service).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Destination index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Source type used for parsing on the collector side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sourcetype: Option<String>,
}

impl RecordMeta {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the host tag.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the source tag.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the index tag.
    #[must_use]
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Sets the sourcetype tag.
    #[must_use]
    pub fn with_sourcetype(mut self, sourcetype: impl Into<String>) -> Self {
        self.sourcetype = Some(sourcetype.into());
        self
    }

    /// Returns `true` when no tag carries a non-empty value.
    pub fn is_empty(&self) -> bool {
        [&self.host, &self.source, &self.index, &self.sourcetype]
            .into_iter()
            .all(|tag| present(tag).is_none())
    }

    /// Layers these tags over `defaults`.
    ///
    /// Each tag set on `self` wins; unset or empty tags fall back to the
    /// matching default.
    pub fn merged_over(&self, defaults: &RecordMeta) -> RecordMeta {
        RecordMeta {
            host: present(&self.host).or_else(|| present(&defaults.host)),
            source: present(&self.source).or_else(|| present(&defaults.source)),
            index: present(&self.index).or_else(|| present(&defaults.index)),
            sourcetype: present(&self.sourcetype).or_else(|| present(&defaults.sourcetype)),
        }
    }
}

fn present(tag: &Option<String>) -> Option<String> {
    tag.as_deref().filter(|value| !value.is_empty()).map(str::to_owned)
}

/// A unit of data submitted to a pipeline.
///
/// Records are immutable once built; the pipeline encodes them with the
/// configured transport at submit time and only the encoded bytes travel
/// through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    payload: Value,
    #[serde(default, skip_serializing_if = "RecordMeta::is_empty")]
    meta: RecordMeta,
}

impl Record {
    /// Creates a record without routing metadata.
    pub fn new(payload: Value) -> Self {
        Self { payload, meta: RecordMeta::default() }
    }

    /// Attaches routing metadata to the record.
    #[must_use]
    pub fn with_meta(mut self, meta: RecordMeta) -> Self {
        self.meta = meta;
        self
    }

    /// The opaque payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Routing metadata supplied with the record.
    pub fn meta(&self) -> &RecordMeta {
        &self.meta
    }
}

impl From<Value> for Record {
    fn from(payload: Value) -> Self {
        Self::new(payload)
    }
}
