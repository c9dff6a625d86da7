//! Metadata layer for spanvault
//!
//! Namespaced, typed, serialized node storage over the coordination service.
//! Each entity type binds to its own store folder with a restricted
//! operation set, and every store carries an eventually-consistent cache fed
//! by the coordination watch stream.

mod coordination;
mod search;
mod service;
mod snapshot;
pub(crate) mod store;

pub use coordination::{
    make_path, CoordinationClient, MemoryCoordination, VersionedValue, WatchEvent,
};
pub use search::{SearchMetadata, SearchMetadataStore};
pub use service::{ServiceMetadata, ServiceMetadataStore, THROUGHPUT_UNCHANGED};
pub use snapshot::{SnapshotMetadata, SnapshotMetadataStore};
pub use store::MetadataEntity;
