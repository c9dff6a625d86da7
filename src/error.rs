//! Error types for spanvault

/// Result type alias for spanvault operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for spanvault
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Object store errors
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
    /// Metadata validation errors
    #[error("Metadata error: {0}")]
    Metadata(String),
    /// Coordination node not found
    #[error("Node not found: {path}")]
    NotFound { path: String },
    /// Coordination node already exists
    #[error("Node already exists: {path}")]
    AlreadyExists { path: String },
    /// Node payload failed to deserialize
    #[error("Corrupt payload at {path}")]
    Corrupt { path: String },
    /// Coordination service unreachable after retries
    #[error("Metadata store unavailable: {0}")]
    StoreUnavailable(String),
    /// Versioned update lost the race (CAS failure)
    #[error("Version conflict at {path}: expected {expected}, found {actual}")]
    Conflict {
        path: String,
        expected: u64,
        actual: u64,
    },
    /// Writes rejected because the chunk manager is shut down or a rollover failed
    #[error("Ingestion is stopped due to shutdown or rollover failure")]
    IngestionStopped,
    /// Chunk rollover did not complete
    #[error("Chunk rollover failed: {0}")]
    RolloverFailed(String),
    /// Chunk is no longer writable
    #[error("Chunk {chunk_id} is not live (state: {state})")]
    ChunkNotLive { chunk_id: String, state: String },
    /// Message routed to a chunk bound to a different partition
    #[error("Partition mismatch: chunk is bound to {chunk_partition}, message is for {message_partition}")]
    PartitionMismatch {
        chunk_partition: String,
        message_partition: String,
    },
    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
