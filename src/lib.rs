//! # spanvault
//!
//! The core of a distributed log indexing and search cluster: spans are
//! admitted per service by a token-bucket rate limiter, indexed into chunks
//! bound to one partition each, rolled over into immutable object-storage
//! artifacts, and advertised to the rest of the fleet through typed
//! metadata stores over a coordination service.
//!
//! ## Architecture
//!
//! - **Limiter**: per-service admission predicate over the inbound stream
//! - **ChunkManager**: owns the chunk list, keeps exactly one live chunk,
//!   rolls full chunks over to object storage, publishes snapshots
//! - **Metadata**: namespaced, typed, cached stores for snapshot, search,
//!   and service records
//! - **Reconciliation**: periodic comparison of object storage against
//!   declared snapshots

pub mod chunk;
pub mod clock;
pub mod limiter;
pub mod logstore;
pub mod metadata;
pub mod recon;
pub mod span;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

use std::time::Duration;

/// Configuration for the spanvault core
#[derive(Debug, Clone)]
pub struct Config {
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Indexer configuration
    pub indexer: IndexerConfig,
    /// Admission limiter configuration
    pub limiter: LimiterConfig,
    /// Reconciliation configuration
    pub reconciliation: recon::ReconciliationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            indexer: IndexerConfig::default(),
            limiter: LimiterConfig::default(),
            reconciliation: recon::ReconciliationConfig::default(),
        }
    }
}

/// Object storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Bucket-relative prefix under which chunk files are uploaded
    pub chunk_data_prefix: String,
    /// Local scratch directory for live chunk stores
    pub data_directory: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_data_prefix: "chunks".to_string(),
            data_directory: "/tmp/spanvault".to_string(),
        }
    }
}

/// Indexer configuration
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Roll over the live chunk at this many indexed bytes
    pub max_bytes_per_chunk: u64,
    /// Roll over the live chunk at this many indexed messages
    pub max_messages_per_chunk: u64,
    /// Bound on draining rollovers at shutdown
    pub rollover_deadline: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_chunk: 1024 * 1024 * 1024, // 1 GB
            max_messages_per_chunk: 10_000_000,
            rollover_deadline: chunk::DEFAULT_ROLLOVER_DEADLINE,
        }
    }
}

/// Admission limiter configuration
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Number of peer preprocessor instances sharing each service budget
    pub preprocessor_count: u32,
    /// Seconds of unused budget a service may accumulate
    pub max_burst_seconds: u32,
    /// Whether buckets start full or must warm up
    pub initialize_warm: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            preprocessor_count: 1,
            max_burst_seconds: 1,
            initialize_warm: false,
        }
    }
}

/// Re-exports for convenience
pub mod prelude {
    pub use crate::chunk::{
        ChunkFactory, ChunkManager, ChunkRolloverFactory, LogChunkFactory, SizeOrCountStrategy,
    };
    pub use crate::limiter::{AdmissionFilter, PreprocessorRateLimiter};
    pub use crate::metadata::{
        MemoryCoordination, SearchMetadataStore, ServiceMetadataStore, SnapshotMetadataStore,
    };
    pub use crate::recon::ReconciliationService;
    pub use crate::span::Span;
    pub use crate::{Config, Error, Result, StorageConfig};
}
