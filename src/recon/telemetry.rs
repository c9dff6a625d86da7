//! Reconciliation telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct ReconInstruments {
    runs: Counter<u64>,
    files_without_snapshots: Counter<u64>,
    snapshots_without_files: Counter<u64>,
}

fn instruments() -> &'static ReconInstruments {
    static INSTRUMENTS: OnceLock<ReconInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("spanvault.reconciliation");
        ReconInstruments {
            runs: meter
                .u64_counter("reconciliation_runs")
                .with_description("Reconciliation iterations by result")
                .init(),
            files_without_snapshots: meter
                .u64_counter("reconciliation_files_without_snapshots")
                .with_description("Object storage files with no declaring snapshot, per run")
                .init(),
            snapshots_without_files: meter
                .u64_counter("reconciliation_snapshots_without_files")
                .with_description("Snapshots whose path matched no stored file, per run")
                .init(),
        }
    })
}

pub fn record_run(success: bool) {
    let result = if success { "success" } else { "failure" };
    instruments()
        .runs
        .add(1, &[KeyValue::new("result", result)]);
}

pub fn record_deltas(files_without_snapshots: u64, snapshots_without_files: u64) {
    let i = instruments();
    i.files_without_snapshots.add(files_without_snapshots, &[]);
    i.snapshots_without_files.add(snapshots_without_files, &[]);
}
