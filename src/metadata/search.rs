//! Search metadata: where a live or loaded chunk can be queried
//!
//! A search node exists while its chunk is queryable at some address and is
//! deleted when the chunk closes or finishes uploading. Unlike snapshots,
//! the url may be updated while the chunk is live.

use super::coordination::CoordinationClient;
use super::store::{MetadataEntity, StoreCore};
use crate::Result;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Advertises that a chunk is queryable at a network address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMetadata {
    /// Node name, unique per store
    pub name: String,
    /// Snapshot the queryable chunk corresponds to
    pub snapshot_name: String,
    /// Address serving queries for this chunk
    pub url: String,
}

impl SearchMetadata {
    pub fn new(
        name: impl Into<String>,
        snapshot_name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            snapshot_name: snapshot_name.into(),
            url: url.into(),
        }
    }
}

impl MetadataEntity for SearchMetadata {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Store for [`SearchMetadata`]: full lifecycle except that entries are
/// keyed by name and replaced, never versioned.
pub struct SearchMetadataStore {
    core: StoreCore<SearchMetadata>,
}

impl SearchMetadataStore {
    pub async fn new(
        client: Arc<dyn CoordinationClient>,
        store_folder: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            core: StoreCore::new(client, store_folder).await?,
        })
    }

    pub async fn create(&self, search: &SearchMetadata) -> Result<()> {
        self.core.create(search).await
    }

    pub async fn get(&self, name: &str) -> Result<SearchMetadata> {
        self.core.get(name).await
    }

    /// Replace an existing entry, for url changes while the chunk is live.
    pub async fn update(&self, search: &SearchMetadata) -> Result<()> {
        self.core.update(search, None).await.map(|_| ())
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.core.delete(name).await
    }

    pub fn list_cached(&self) -> Vec<SearchMetadata> {
        self.core.list_cached()
    }
}
