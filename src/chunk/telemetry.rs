//! Chunk pipeline telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

pub const LIVE_MESSAGES_INDEXED: &str = "live_messages_indexed";
pub const LIVE_BYTES_INDEXED: &str = "live_bytes_indexed";

struct ChunkInstruments {
    live_messages_indexed: UpDownCounter<i64>,
    live_bytes_indexed: UpDownCounter<i64>,
    rollovers_initiated: Counter<u64>,
    rollovers_completed: Counter<u64>,
    rollover_duration_seconds: Histogram<f64>,
    rollover_files_uploaded: Counter<u64>,
    rollover_bytes_uploaded: Counter<u64>,
}

fn instruments() -> &'static ChunkInstruments {
    static INSTRUMENTS: OnceLock<ChunkInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("spanvault.chunk");
        ChunkInstruments {
            live_messages_indexed: meter
                .i64_up_down_counter(LIVE_MESSAGES_INDEXED)
                .with_description("Messages indexed into the live chunk")
                .init(),
            live_bytes_indexed: meter
                .i64_up_down_counter(LIVE_BYTES_INDEXED)
                .with_description("Bytes indexed into the live chunk")
                .with_unit("By")
                .init(),
            rollovers_initiated: meter
                .u64_counter("chunk_rollovers_initiated")
                .with_description("Chunk rollovers submitted to the rollover worker")
                .init(),
            rollovers_completed: meter
                .u64_counter("chunk_rollovers_completed")
                .with_description("Chunk rollover outcomes by result")
                .init(),
            rollover_duration_seconds: meter
                .f64_histogram("chunk_rollover_duration")
                .with_description("Seal + upload + publish duration per rollover")
                .with_unit("s")
                .init(),
            rollover_files_uploaded: meter
                .u64_counter("chunk_rollover_files_uploaded")
                .with_description("Files uploaded to object storage by rollovers")
                .init(),
            rollover_bytes_uploaded: meter
                .u64_counter("chunk_rollover_bytes_uploaded")
                .with_description("Bytes uploaded to object storage by rollovers")
                .with_unit("By")
                .init(),
        }
    })
}

/// Adjust the live gauges. Rollover passes the negated totals to reset.
pub fn record_live_indexed(message_delta: i64, byte_delta: i64) {
    let i = instruments();
    i.live_messages_indexed.add(message_delta, &[]);
    i.live_bytes_indexed.add(byte_delta, &[]);
}

pub fn record_rollover_initiated() {
    instruments().rollovers_initiated.add(1, &[]);
}

pub fn record_rollover_result(success: bool, duration_seconds: f64) {
    let i = instruments();
    let result = if success { "success" } else { "failure" };
    i.rollovers_completed
        .add(1, &[KeyValue::new("result", result)]);
    i.rollover_duration_seconds.record(duration_seconds, &[]);
}

pub fn record_upload(files: u64, bytes: u64) {
    let i = instruments();
    i.rollover_files_uploaded.add(files, &[]);
    i.rollover_bytes_uploaded.add(bytes, &[]);
}
