//! Snapshot metadata: the record advertising a rolled-over chunk
//!
//! A snapshot is immutable once written. The only legal terminal operation
//! is deletion, so the store deliberately exposes no update.

use super::coordination::CoordinationClient;
use super::store::{MetadataEntity, StoreCore};
use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Metadata for one uploaded chunk, published after its files are durable in
/// object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Node name, derived from the last segment of `snapshot_path`
    pub name: String,
    /// Globally unique snapshot id
    pub snapshot_id: String,
    /// Object storage location of the chunk's files (directory-level path)
    pub snapshot_path: String,
    /// Earliest event time contained in the chunk, epoch millis
    pub start_time_epoch_ms: i64,
    /// Latest event time contained in the chunk, epoch millis
    pub end_time_epoch_ms: i64,
    /// Partition the chunk consumed from
    pub partition_id: String,
    /// Last consumed offset for the partition contained in this chunk
    pub max_offset: i64,
}

impl SnapshotMetadata {
    pub fn new(
        snapshot_id: impl Into<String>,
        snapshot_path: impl Into<String>,
        start_time_epoch_ms: i64,
        end_time_epoch_ms: i64,
        max_offset: i64,
        partition_id: impl Into<String>,
    ) -> Result<Self> {
        let snapshot_id = snapshot_id.into();
        let snapshot_path = snapshot_path.into();
        let partition_id = partition_id.into();

        if snapshot_id.is_empty() {
            return Err(Error::Metadata("snapshot id cannot be empty".to_string()));
        }
        if snapshot_path.is_empty() {
            return Err(Error::Metadata("snapshot path cannot be empty".to_string()));
        }
        if partition_id.is_empty() {
            return Err(Error::Metadata("partition id cannot be empty".to_string()));
        }
        if start_time_epoch_ms > end_time_epoch_ms {
            return Err(Error::Metadata(format!(
                "snapshot start time {start_time_epoch_ms} is after end time {end_time_epoch_ms}"
            )));
        }
        if max_offset < 0 {
            return Err(Error::Metadata(format!(
                "snapshot max offset cannot be negative, got {max_offset}"
            )));
        }

        let name = snapshot_path
            .rsplit('/')
            .next()
            .unwrap_or(snapshot_path.as_str())
            .to_string();

        Ok(Self {
            name,
            snapshot_id,
            snapshot_path,
            start_time_epoch_ms,
            end_time_epoch_ms,
            partition_id,
            max_offset,
        })
    }
}

impl MetadataEntity for SnapshotMetadata {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Store for [`SnapshotMetadata`]: create, get, delete, and the cached
/// listing. No update, snapshots never mutate.
pub struct SnapshotMetadataStore {
    core: StoreCore<SnapshotMetadata>,
}

impl SnapshotMetadataStore {
    pub async fn new(
        client: Arc<dyn CoordinationClient>,
        store_folder: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            core: StoreCore::new(client, store_folder).await?,
        })
    }

    pub async fn create(&self, snapshot: &SnapshotMetadata) -> Result<()> {
        self.core.create(snapshot).await
    }

    pub async fn get(&self, name: &str) -> Result<SnapshotMetadata> {
        self.core.get(name).await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.core.delete(name).await
    }

    /// Point-in-time view of the watched cache; empty while stale.
    pub fn list_cached(&self) -> Vec<SnapshotMetadata> {
        self.core.list_cached()
    }

    pub fn cache_is_stale(&self) -> bool {
        self.core.cache_is_stale()
    }

    pub fn store_folder(&self) -> &str {
        self.core.store_folder()
    }
}
