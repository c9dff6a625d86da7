//! Chunk construction
//!
//! A factory builds writable chunks bound to a partition and the metadata
//! stores they publish through. The log store backing each chunk comes from
//! a builder closure so the index implementation stays pluggable.

use super::{ReadWriteChunk, SearchContext};
use crate::clock::BoundedClock;
use crate::logstore::LogStore;
use crate::metadata::{SearchMetadataStore, SnapshotMetadataStore};
use crate::Result;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Builds the log store for a new chunk, keyed by chunk id.
pub type LogStoreFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn LogStore>> + Send + Sync>;

/// Builds new writable chunks for the chunk manager.
#[async_trait]
pub trait ChunkFactory: Send + Sync {
    async fn make_chunk(&self, partition_id: &str) -> Result<Arc<ReadWriteChunk>>;
}

/// Standard factory wiring a log store builder to the metadata stores and
/// this node's search endpoint.
pub struct LogChunkFactory {
    log_store_factory: LogStoreFactory,
    snapshot_store: Arc<SnapshotMetadataStore>,
    search_store: Arc<SearchMetadataStore>,
    search_context: SearchContext,
    clock: Arc<BoundedClock>,
}

impl LogChunkFactory {
    pub fn new(
        log_store_factory: LogStoreFactory,
        snapshot_store: Arc<SnapshotMetadataStore>,
        search_store: Arc<SearchMetadataStore>,
        search_context: SearchContext,
        clock: Arc<BoundedClock>,
    ) -> Self {
        Self {
            log_store_factory,
            snapshot_store,
            search_store,
            search_context,
            clock,
        }
    }
}

#[async_trait]
impl ChunkFactory for LogChunkFactory {
    async fn make_chunk(&self, partition_id: &str) -> Result<Arc<ReadWriteChunk>> {
        let chunk_id = format!("{}_{}", partition_id, Uuid::new_v4());
        let log_store = (self.log_store_factory)(&chunk_id)?;
        debug!(chunk_id = %chunk_id, partition_id = %partition_id, "Created chunk");
        Ok(Arc::new(ReadWriteChunk::new(
            chunk_id,
            partition_id.to_string(),
            log_store,
            Arc::clone(&self.snapshot_store),
            Arc::clone(&self.search_store),
            self.search_context.clone(),
            Arc::clone(&self.clock),
        )))
    }
}
