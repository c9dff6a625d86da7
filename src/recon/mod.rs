//! Object storage reconciliation
//!
//! Periodically compares what object storage holds against what the
//! snapshot store declares, in both directions. Files without a declaring
//! snapshot are deletion candidates; snapshots without files indicate
//! metadata drift. Both sets are reported, neither is acted on here:
//! deleting without an age threshold could race a rollover that has
//! uploaded its files but not yet published its snapshot.

mod telemetry;

use crate::metadata::{SnapshotMetadata, SnapshotMetadataStore};
use crate::{Error, Result};

use futures::TryStreamExt;
use object_store::ObjectStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Reconciliation service configuration.
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// How often an iteration runs
    pub schedule_interval: Duration,
    /// Bound on a single object-storage listing
    pub list_timeout: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_secs(15 * 60),
            list_timeout: Duration::from_secs(60),
        }
    }
}

/// The two delta sets computed by one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconciliationReport {
    /// Stored files whose path matches no snapshot. Deletion candidates.
    pub files_without_snapshots: HashSet<String>,
    /// Snapshots whose path matches no stored file. Metadata drift.
    pub snapshots_without_files: Vec<SnapshotMetadata>,
}

/// Scheduled task comparing object-storage contents to declared snapshots.
pub struct ReconciliationService {
    object_store: Arc<dyn ObjectStore>,
    snapshot_store: Arc<SnapshotMetadataStore>,
    config: ReconciliationConfig,
    shutdown: CancellationToken,
}

impl ReconciliationService {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        snapshot_store: Arc<SnapshotMetadataStore>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            object_store,
            snapshot_store,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the service loop. Returns when the shutdown token is cancelled.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.schedule_interval.as_secs(),
            "Starting object storage reconciliation service"
        );
        let mut interval = tokio::time::interval(self.config.schedule_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(_) => telemetry::record_run(true),
                        Err(e) => {
                            error!(error = %e, "Reconciliation iteration failed");
                            telemetry::record_run(false);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Reconciliation service shutting down");
                    break;
                }
            }
        }
    }

    /// One reconciliation pass.
    ///
    /// Files are listed before snapshots on purpose: the two reads are not
    /// atomic, and listing files first means a concurrently publishing
    /// snapshot can only appear as a file without a snapshot (ignorable for
    /// one cycle), never as a snapshot without files.
    pub async fn run_once(&self) -> Result<ReconciliationReport> {
        let file_paths = self.list_all_files().await?;
        let snapshots = self.snapshot_store.list_cached();

        let files_without_snapshots = files_without_snapshots(&file_paths, &snapshots);
        let snapshots_without_files = snapshots_without_files(&snapshots, &file_paths);

        if !files_without_snapshots.is_empty() {
            warn!(
                count = files_without_snapshots.len(),
                "Found stored files without a declaring snapshot"
            );
        }
        if !snapshots_without_files.is_empty() {
            warn!(
                count = snapshots_without_files.len(),
                "Found snapshots without stored files"
            );
        }
        telemetry::record_deltas(
            files_without_snapshots.len() as u64,
            snapshots_without_files.len() as u64,
        );

        Ok(ReconciliationReport {
            files_without_snapshots,
            snapshots_without_files,
        })
    }

    async fn list_all_files(&self) -> Result<HashSet<String>> {
        let listing = async {
            let mut files = HashSet::new();
            let mut stream = self.object_store.list(None);
            while let Some(meta) = stream.try_next().await? {
                files.insert(meta.location.to_string());
            }
            Ok::<_, Error>(files)
        };
        tokio::time::timeout(self.config.list_timeout, listing)
            .await
            .map_err(|_| Error::Timeout)?
    }
}

/// Stored files that no snapshot declares, at any path depth.
fn files_without_snapshots(
    file_paths: &HashSet<String>,
    snapshots: &[SnapshotMetadata],
) -> HashSet<String> {
    let snapshot_paths: HashSet<&str> =
        snapshots.iter().map(|s| s.snapshot_path.as_str()).collect();

    file_paths
        .iter()
        .filter(|file| {
            explode_path(file)
                .iter()
                .all(|prefix| !snapshot_paths.contains(prefix.as_str()))
        })
        .cloned()
        .collect()
}

/// Snapshots whose path matches no stored file at any depth.
fn snapshots_without_files(
    snapshots: &[SnapshotMetadata],
    file_paths: &HashSet<String>,
) -> Vec<SnapshotMetadata> {
    let exploded: HashSet<String> = file_paths
        .iter()
        .flat_map(|file| explode_path(file))
        .collect();

    snapshots
        .iter()
        .filter(|s| !exploded.contains(s.snapshot_path.as_str()))
        .cloned()
        .collect()
}

/// Decompose `a/b/c` into `{a, a/b, a/b/c}` so a snapshot referencing a
/// directory matches any file below it.
fn explode_path(path: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut current = String::with_capacity(path.len());
    for (i, part) in path.split('/').enumerate() {
        if i > 0 {
            current.push('/');
        }
        current.push_str(part);
        prefixes.push(current.clone());
    }
    prefixes
}
