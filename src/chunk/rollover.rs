//! Chunk rollover: seal, upload, publish
//!
//! A rollover turns a live chunk into a durable object-storage artifact:
//! the local store is sealed, its files are uploaded under the chunk data
//! prefix, and only then is the snapshot record published. Re-running a
//! task against an already-uploaded chunk is a no-op success so a retried
//! rollover cannot publish twice.

use super::{telemetry, ChunkState, ReadWriteChunk};
use crate::{Error, Result};

use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Decides when the live chunk is full, over `(bytes, messages)` indexed.
pub trait ChunkRollOverStrategy: Send + Sync {
    fn should_roll_over(&self, bytes_indexed: u64, messages_indexed: u64) -> bool;
}

/// Default strategy: roll over when either threshold is reached.
pub struct SizeOrCountStrategy {
    max_bytes_per_chunk: u64,
    max_messages_per_chunk: u64,
}

impl SizeOrCountStrategy {
    pub fn new(max_bytes_per_chunk: u64, max_messages_per_chunk: u64) -> Self {
        Self {
            max_bytes_per_chunk,
            max_messages_per_chunk,
        }
    }
}

impl ChunkRollOverStrategy for SizeOrCountStrategy {
    fn should_roll_over(&self, bytes_indexed: u64, messages_indexed: u64) -> bool {
        bytes_indexed >= self.max_bytes_per_chunk
            || messages_indexed >= self.max_messages_per_chunk
    }
}

/// Builds rollover tasks and holds the strategy consulted by the write path.
pub struct ChunkRolloverFactory {
    strategy: Arc<dyn ChunkRollOverStrategy>,
    object_store: Arc<dyn ObjectStore>,
    chunk_data_prefix: String,
}

impl ChunkRolloverFactory {
    pub fn new(
        strategy: Arc<dyn ChunkRollOverStrategy>,
        object_store: Arc<dyn ObjectStore>,
        chunk_data_prefix: impl Into<String>,
    ) -> Self {
        Self {
            strategy,
            object_store,
            chunk_data_prefix: chunk_data_prefix.into(),
        }
    }

    pub fn strategy(&self) -> &Arc<dyn ChunkRollOverStrategy> {
        &self.strategy
    }

    pub fn task_for(&self, chunk: Arc<ReadWriteChunk>) -> RollOverChunkTask {
        RollOverChunkTask {
            chunk,
            object_store: Arc::clone(&self.object_store),
            chunk_data_prefix: self.chunk_data_prefix.clone(),
        }
    }
}

/// One rollover execution for one chunk.
pub struct RollOverChunkTask {
    chunk: Arc<ReadWriteChunk>,
    object_store: Arc<dyn ObjectStore>,
    chunk_data_prefix: String,
}

impl RollOverChunkTask {
    /// Seal the chunk, upload its files, publish the snapshot.
    ///
    /// The snapshot write is strictly ordered after the last object-storage
    /// put so a published snapshot always has durable files behind it.
    pub async fn run(&self) -> Result<()> {
        let chunk_id = self.chunk.id();
        if self.chunk.state() == ChunkState::Uploaded {
            info!(chunk_id = %chunk_id, "Chunk already uploaded, skipping rollover");
            return Ok(());
        }

        let start = Instant::now();
        telemetry::record_rollover_initiated();

        self.chunk.pre_snapshot()?;

        let mut files_uploaded = 0u64;
        let mut bytes_uploaded = 0u64;
        for file in self.chunk.sealed_files()? {
            let file_name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unnamed")
                .to_string();
            let data = Bytes::from(tokio::fs::read(&file).await?);
            bytes_uploaded += data.len() as u64;
            let location =
                ObjectPath::from(format!("{}/{}/{}", self.chunk_data_prefix, chunk_id, file_name));
            self.object_store
                .put(&location, data.into())
                .await
                .map_err(|e| Error::RolloverFailed(format!("uploading {location}: {e}")))?;
            files_uploaded += 1;
        }
        telemetry::record_upload(files_uploaded, bytes_uploaded);

        let snapshot_path = format!("{}/{}", self.chunk_data_prefix, chunk_id);
        self.chunk.post_snapshot(&snapshot_path).await?;

        // Local files are dead weight once durable remotely.
        if let Err(e) = self.chunk.cleanup() {
            warn!(chunk_id = %chunk_id, error = %e, "Failed to clean up local chunk files");
        }

        info!(
            chunk_id = %chunk_id,
            files_uploaded,
            bytes_uploaded,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Rolled over chunk"
        );
        Ok(())
    }
}
