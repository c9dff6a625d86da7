//! The span: the unit of ingestion
//!
//! Spans arrive from the message bus, pass through the per-service admission
//! filter, and are indexed into chunks. The wire representation is JSON;
//! unknown fields are ignored on decode so older readers tolerate newer
//! producers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single log span as consumed from the message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Unique span id
    pub id: String,
    /// Trace this span belongs to, if any
    #[serde(default)]
    pub trace_id: String,
    /// Service that emitted the span. Empty means the producer did not set it;
    /// the admission filter drops such spans.
    #[serde(default)]
    pub service_name: String,
    /// Operation name
    #[serde(default)]
    pub name: String,
    /// Event time in epoch milliseconds
    pub timestamp_epoch_ms: i64,
    /// Span duration in microseconds
    #[serde(default)]
    pub duration_micros: i64,
    /// Free-form key/value tags. BTreeMap keeps the serialized form canonical.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Span {
    pub fn new(id: impl Into<String>, service_name: impl Into<String>, timestamp_epoch_ms: i64) -> Self {
        Self {
            id: id.into(),
            trace_id: String::new(),
            service_name: service_name.into(),
            name: String::new(),
            timestamp_epoch_ms,
            duration_micros: 0,
            tags: BTreeMap::new(),
        }
    }

    /// Approximate serialized size in bytes, used to charge the rate limiter.
    ///
    /// This counts field contents rather than re-encoding the span, so it is
    /// stable and allocation-free on the hot path.
    pub fn size_bytes(&self) -> u64 {
        let tag_bytes: usize = self
            .tags
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        (self.id.len()
            + self.trace_id.len()
            + self.service_name.len()
            + self.name.len()
            + 8 // timestamp
            + 8 // duration
            + tag_bytes) as u64
    }
}
