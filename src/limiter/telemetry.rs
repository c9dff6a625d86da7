//! Admission filter telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use std::sync::OnceLock;

use super::MessageDropReason;

pub const MESSAGES_DROPPED: &str = "preprocessor_rate_limit_messages_dropped";
pub const BYTES_DROPPED: &str = "preprocessor_rate_limit_bytes_dropped";

struct LimiterInstruments {
    messages_dropped: Counter<u64>,
    bytes_dropped: Counter<u64>,
}

fn instruments() -> &'static LimiterInstruments {
    static INSTRUMENTS: OnceLock<LimiterInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("spanvault.preprocessor");
        LimiterInstruments {
            messages_dropped: meter
                .u64_counter(MESSAGES_DROPPED)
                .with_description("Messages dropped by the per-service admission filter")
                .init(),
            bytes_dropped: meter
                .u64_counter(BYTES_DROPPED)
                .with_description("Bytes dropped by the per-service admission filter")
                .with_unit("By")
                .init(),
        }
    })
}

/// Record one dropped message. The same record is charged exactly one reason.
pub fn record_dropped(service: &str, reason: MessageDropReason, bytes: u64) {
    let attrs = [
        KeyValue::new("service", service.to_string()),
        KeyValue::new("reason", reason.as_str()),
    ];
    let i = instruments();
    i.messages_dropped.add(1, &attrs);
    i.bytes_dropped.add(bytes, &attrs);
}
