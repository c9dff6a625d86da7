//! Object storage reconciliation tests

mod common;

use common::wait_until;
use spanvault::metadata::{MemoryCoordination, SnapshotMetadata, SnapshotMetadataStore};
use spanvault::recon::{ReconciliationConfig, ReconciliationService};

use bytes::Bytes;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const POLL_TIMEOUT: Duration = Duration::from_secs(10);

struct ReconHarness {
    object_store: Arc<InMemory>,
    snapshot_store: Arc<SnapshotMetadataStore>,
    service: ReconciliationService,
}

async fn harness() -> ReconHarness {
    let object_store = Arc::new(InMemory::new());
    let coordination = Arc::new(MemoryCoordination::new());
    let snapshot_store = Arc::new(
        SnapshotMetadataStore::new(coordination, "snapshots")
            .await
            .unwrap(),
    );
    let service = ReconciliationService::new(
        object_store.clone(),
        snapshot_store.clone(),
        ReconciliationConfig::default(),
    );
    ReconHarness {
        object_store,
        snapshot_store,
        service,
    }
}

async fn put_file(store: &InMemory, path: &str) {
    store
        .put(&ObjectPath::from(path), Bytes::from_static(b"data").into())
        .await
        .unwrap();
}

async fn publish_snapshot(harness: &ReconHarness, chunk: &str) -> SnapshotMetadata {
    let snapshot = SnapshotMetadata::new(
        format!("id-{chunk}"),
        format!("chunks/{chunk}"),
        0,
        1,
        0,
        "p0",
    )
    .unwrap();
    harness.snapshot_store.create(&snapshot).await.unwrap();

    let store = harness.snapshot_store.clone();
    let name = snapshot.name.clone();
    wait_until("snapshot cached", POLL_TIMEOUT, move || {
        let store = store.clone();
        let name = name.clone();
        async move { store.list_cached().iter().any(|s| s.name == name) }
    })
    .await;
    snapshot
}

#[tokio::test]
async fn test_orphan_file_is_reported() {
    let h = harness().await;
    put_file(&h.object_store, "chunks/X/file1").await;

    // Give the empty cache a moment to finish its first sync.
    let store = h.snapshot_store.clone();
    wait_until("cache ready", POLL_TIMEOUT, move || {
        let store = store.clone();
        async move { !store.cache_is_stale() }
    })
    .await;

    let report = h.service.run_once().await.unwrap();
    assert_eq!(
        report.files_without_snapshots,
        HashSet::from(["chunks/X/file1".to_string()])
    );
    assert!(report.snapshots_without_files.is_empty());
}

#[tokio::test]
async fn test_orphan_snapshot_is_reported() {
    let h = harness().await;
    let snapshot = publish_snapshot(&h, "Y").await;

    let report = h.service.run_once().await.unwrap();
    assert!(report.files_without_snapshots.is_empty());
    assert_eq!(report.snapshots_without_files, vec![snapshot]);
}

#[tokio::test]
async fn test_matched_snapshot_and_files_report_nothing() {
    let h = harness().await;
    put_file(&h.object_store, "chunks/Z/file1").await;
    put_file(&h.object_store, "chunks/Z/file2").await;
    publish_snapshot(&h, "Z").await;

    let report = h.service.run_once().await.unwrap();
    assert!(report.files_without_snapshots.is_empty());
    assert!(report.snapshots_without_files.is_empty());
}

#[tokio::test]
async fn test_mixed_delta_reports_each_side_once() {
    let h = harness().await;
    // Matched pair, one orphan file, one drifting snapshot.
    put_file(&h.object_store, "chunks/good/file1").await;
    publish_snapshot(&h, "good").await;
    put_file(&h.object_store, "chunks/orphan/file1").await;
    let drifted = publish_snapshot(&h, "drifted").await;

    let report = h.service.run_once().await.unwrap();
    assert_eq!(
        report.files_without_snapshots,
        HashSet::from(["chunks/orphan/file1".to_string()])
    );
    assert_eq!(report.snapshots_without_files, vec![drifted]);
}

#[tokio::test]
async fn test_scheduled_loop_runs_and_shuts_down() {
    let h = harness().await;
    put_file(&h.object_store, "chunks/X/file1").await;

    let service = Arc::new(ReconciliationService::new(
        h.object_store.clone(),
        h.snapshot_store.clone(),
        ReconciliationConfig {
            schedule_interval: Duration::from_millis(50),
            list_timeout: Duration::from_secs(5),
        },
    ));
    let token = service.shutdown_token();

    let runner = {
        let service = service.clone();
        tokio::spawn(async move { service.run().await })
    };

    // Let a couple of iterations fire, then stop.
    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("service loop should stop on cancellation")
        .unwrap();
}
