//! Chunks: the unit of indexed log data
//!
//! A chunk owns a local log store bound to one partition, accumulates spans
//! while live, and becomes an immutable object-storage artifact after
//! rollover. Lifecycle: `Live` accepts writes, `ReadOnly` is sealed and
//! awaiting upload, `Uploaded` has durable files and published snapshot
//! metadata, `Closed` has released local resources.

mod factory;
mod manager;
mod rollover;
pub(crate) mod telemetry;

pub use factory::{ChunkFactory, LogChunkFactory, LogStoreFactory};
pub use manager::{ChunkManager, ChunkManagerVariant, DEFAULT_ROLLOVER_DEADLINE};
pub use rollover::{
    ChunkRollOverStrategy, ChunkRolloverFactory, RollOverChunkTask, SizeOrCountStrategy,
};

use crate::clock::BoundedClock;
use crate::logstore::LogStore;
use crate::metadata::{SearchMetadata, SearchMetadataStore, SnapshotMetadata, SnapshotMetadataStore};
use crate::span::Span;
use crate::{Error, Result};

use parking_lot::RwLock;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Chunk lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Live,
    ReadOnly,
    Uploaded,
    Closed,
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChunkState::Live => "live",
            ChunkState::ReadOnly => "read_only",
            ChunkState::Uploaded => "uploaded",
            ChunkState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Where this node serves queries from, advertised in search metadata.
#[derive(Debug, Clone)]
pub struct SearchContext {
    pub hostname: String,
    pub port: u16,
}

impl SearchContext {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }
}

/// Descriptive state of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub chunk_id: String,
    pub partition_id: String,
    pub chunk_creation_time_epoch_ms: i64,
    pub chunk_last_updated_time_epoch_ms: i64,
    /// Earliest event time seen, i64::MAX until the first message lands
    pub data_start_time_epoch_ms: i64,
    /// Latest event time seen
    pub data_end_time_epoch_ms: i64,
    /// Highest consumed offset indexed into this chunk
    pub max_offset: i64,
}

impl ChunkInfo {
    pub fn new(chunk_id: String, partition_id: String, creation_time_epoch_ms: i64) -> Self {
        Self {
            chunk_id,
            partition_id,
            chunk_creation_time_epoch_ms: creation_time_epoch_ms,
            chunk_last_updated_time_epoch_ms: creation_time_epoch_ms,
            data_start_time_epoch_ms: i64::MAX,
            data_end_time_epoch_ms: 0,
            max_offset: 0,
        }
    }

    /// Event-time range for snapshot publication. An empty chunk collapses
    /// to its creation instant.
    fn data_time_range(&self) -> (i64, i64) {
        if self.data_start_time_epoch_ms == i64::MAX {
            (
                self.chunk_creation_time_epoch_ms,
                self.chunk_creation_time_epoch_ms,
            )
        } else {
            (self.data_start_time_epoch_ms, self.data_end_time_epoch_ms)
        }
    }
}

/// A chunk with a thread-safe write path while live and an immutable view
/// once sealed.
pub struct ReadWriteChunk {
    info: RwLock<ChunkInfo>,
    state: RwLock<ChunkState>,
    log_store: Arc<dyn LogStore>,
    snapshot_store: Arc<SnapshotMetadataStore>,
    search_store: Arc<SearchMetadataStore>,
    search_context: SearchContext,
    clock: Arc<BoundedClock>,
}

impl ReadWriteChunk {
    pub fn new(
        chunk_id: String,
        partition_id: String,
        log_store: Arc<dyn LogStore>,
        snapshot_store: Arc<SnapshotMetadataStore>,
        search_store: Arc<SearchMetadataStore>,
        search_context: SearchContext,
        clock: Arc<BoundedClock>,
    ) -> Self {
        let info = ChunkInfo::new(chunk_id, partition_id, clock.now_epoch_ms());
        Self {
            info: RwLock::new(info),
            state: RwLock::new(ChunkState::Live),
            log_store,
            snapshot_store,
            search_store,
            search_context,
            clock,
        }
    }

    pub fn id(&self) -> String {
        self.info.read().chunk_id.clone()
    }

    pub fn partition_id(&self) -> String {
        self.info.read().partition_id.clone()
    }

    pub fn info(&self) -> ChunkInfo {
        self.info.read().clone()
    }

    pub fn state(&self) -> ChunkState {
        *self.state.read()
    }

    pub fn message_count(&self) -> u64 {
        self.log_store.message_count()
    }

    /// Append one span. Only legal while live; the message's partition must
    /// match the chunk's binding.
    pub fn add_message(&self, span: &Span, partition_id: &str, offset: i64) -> Result<()> {
        {
            let state = *self.state.read();
            if state != ChunkState::Live {
                return Err(Error::ChunkNotLive {
                    chunk_id: self.id(),
                    state: state.to_string(),
                });
            }
        }
        {
            let info = self.info.read();
            if info.partition_id != partition_id {
                return Err(Error::PartitionMismatch {
                    chunk_partition: info.partition_id.clone(),
                    message_partition: partition_id.to_string(),
                });
            }
        }

        self.log_store.add_message(span)?;

        let mut info = self.info.write();
        info.data_start_time_epoch_ms = info.data_start_time_epoch_ms.min(span.timestamp_epoch_ms);
        info.data_end_time_epoch_ms = info.data_end_time_epoch_ms.max(span.timestamp_epoch_ms);
        info.max_offset = info.max_offset.max(offset);
        info.chunk_last_updated_time_epoch_ms = self.clock.now_epoch_ms();
        Ok(())
    }

    pub fn set_last_updated(&self, epoch_ms: i64) {
        self.info.write().chunk_last_updated_time_epoch_ms = epoch_ms;
    }

    /// Advertise this live chunk as queryable at the node's search endpoint.
    pub async fn post_create(&self) -> Result<()> {
        let chunk_id = self.id();
        let search = SearchMetadata::new(&chunk_id, &chunk_id, self.search_context.url());
        self.search_store.create(&search).await?;
        debug!(chunk_id = %chunk_id, url = %self.search_context.url(), "Registered live chunk");
        Ok(())
    }

    /// Seal the chunk: no more writes, local files flushed and final.
    pub fn pre_snapshot(&self) -> Result<()> {
        let mut state = self.state.write();
        if *state != ChunkState::Live {
            // Already sealed by an earlier attempt.
            return Ok(());
        }
        self.log_store.commit()?;
        *state = ChunkState::ReadOnly;
        info!(chunk_id = %self.id(), "Sealed chunk");
        Ok(())
    }

    /// The sealed local files to upload.
    pub fn sealed_files(&self) -> Result<Vec<PathBuf>> {
        self.log_store.sealed_files()
    }

    /// Publish the snapshot record and retire the live search entry. Only
    /// called after every file for the chunk is durable in object storage.
    pub async fn post_snapshot(&self, snapshot_path: &str) -> Result<()> {
        let snapshot = {
            let info = self.info.read();
            let (start, end) = info.data_time_range();
            SnapshotMetadata::new(
                info.chunk_id.clone(),
                snapshot_path,
                start,
                end,
                info.max_offset,
                info.partition_id.clone(),
            )?
        };
        self.snapshot_store.create(&snapshot).await?;

        // Retiring the search entry is idempotent: a crash between upload
        // and retirement re-runs this path.
        match self.search_store.delete(&self.id()).await {
            Ok(()) | Err(Error::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        *self.state.write() = ChunkState::Uploaded;
        info!(chunk_id = %self.id(), snapshot_path = %snapshot_path, "Published snapshot");
        Ok(())
    }

    /// Release local resources. Never fails the caller's shutdown path.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if *state == ChunkState::Closed {
            return Ok(());
        }
        self.log_store.close()?;
        *state = ChunkState::Closed;
        Ok(())
    }

    /// Delete local files after a successful upload.
    pub fn cleanup(&self) -> Result<()> {
        self.log_store.cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_chunk_time_range_collapses_to_creation() {
        let info = ChunkInfo::new("c1".into(), "p0".into(), 5000);
        assert_eq!(info.data_time_range(), (5000, 5000));
    }

    #[test]
    fn test_search_context_url() {
        let ctx = SearchContext::new("10.0.0.5", 8080);
        assert_eq!(ctx.url(), "http://10.0.0.5:8080");
    }
}
