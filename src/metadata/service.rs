//! Service metadata: per-tenant provisioning records
//!
//! Each ingesting service has one record carrying its owner, provisioned
//! byte throughput, and assigned partitions. Records are versioned by the
//! coordination service; owner and assignment updates are compare-and-set
//! so concurrent admin operations cannot silently overwrite each other.

use super::coordination::CoordinationClient;
use super::store::{MetadataEntity, StoreCore};
use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Sentinel for "keep the existing throughput" in assignment updates.
pub const THROUGHPUT_UNCHANGED: i64 = -1;

/// Per-tenant provisioning record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    /// Unique service name
    pub name: String,
    /// Owning team or contact
    pub owner: String,
    /// Provisioned ingest budget in bytes per second
    pub throughput_bytes: i64,
    /// Partitions assigned to this service, sorted and deduplicated
    pub partition_ids: Vec<String>,
}

impl ServiceMetadata {
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        throughput_bytes: i64,
        partition_ids: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        let owner = owner.into();
        if name.is_empty() {
            return Err(Error::Metadata("service name cannot be empty".to_string()));
        }
        if throughput_bytes < 0 {
            return Err(Error::Metadata(format!(
                "service throughput cannot be negative, got {throughput_bytes}"
            )));
        }
        let mut partition_ids = partition_ids;
        partition_ids.sort();
        partition_ids.dedup();
        Ok(Self {
            name,
            owner,
            throughput_bytes,
            partition_ids,
        })
    }
}

impl MetadataEntity for ServiceMetadata {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Store for [`ServiceMetadata`] with the full operation set plus the admin
/// semantics served over it.
pub struct ServiceMetadataStore {
    core: StoreCore<ServiceMetadata>,
}

impl ServiceMetadataStore {
    pub async fn new(
        client: Arc<dyn CoordinationClient>,
        store_folder: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            core: StoreCore::new(client, store_folder).await?,
        })
    }

    pub async fn create(&self, service: &ServiceMetadata) -> Result<()> {
        self.core.create(service).await
    }

    pub async fn get(&self, name: &str) -> Result<ServiceMetadata> {
        self.core.get(name).await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.core.delete(name).await
    }

    pub fn list_cached(&self) -> Vec<ServiceMetadata> {
        self.core.list_cached()
    }

    /// Register a new service with no throughput and no partitions. Fails if
    /// the name is taken.
    pub async fn create_service(&self, name: &str, owner: &str) -> Result<()> {
        let service = ServiceMetadata::new(name, owner, 0, Vec::new())?;
        self.core.create(&service).await?;
        info!(service = %name, owner = %owner, "Created service");
        Ok(())
    }

    /// Change a service's owner. Fails if the service is missing; retries
    /// are the caller's concern on `Conflict`.
    pub async fn update_owner(&self, name: &str, owner: &str) -> Result<()> {
        let (mut service, version) = self.core.get_versioned(name).await?;
        service.owner = owner.to_string();
        self.core.update(&service, Some(version)).await?;
        Ok(())
    }

    /// Update a service's throughput and partition assignment.
    ///
    /// A `throughput_bytes` of [`THROUGHPUT_UNCHANGED`] keeps the current
    /// budget. An empty `partition_ids` would mean automatic assignment,
    /// which has no allocator yet and is rejected rather than guessed at.
    pub async fn update_partition_assignment(
        &self,
        name: &str,
        throughput_bytes: i64,
        partition_ids: Vec<String>,
    ) -> Result<()> {
        if throughput_bytes < THROUGHPUT_UNCHANGED {
            return Err(Error::Metadata(format!(
                "invalid throughput {throughput_bytes}"
            )));
        }
        if partition_ids.is_empty() {
            return Err(Error::Config(
                "partition auto-assignment is not implemented; pass an explicit list".to_string(),
            ));
        }

        let (current, version) = self.core.get_versioned(name).await?;
        let throughput = if throughput_bytes == THROUGHPUT_UNCHANGED {
            current.throughput_bytes
        } else {
            throughput_bytes
        };
        let updated = ServiceMetadata::new(name, &current.owner, throughput, partition_ids)?;
        self.core.update(&updated, Some(version)).await?;
        info!(
            service = %name,
            throughput_bytes = throughput,
            partitions = updated.partition_ids.len(),
            "Updated partition assignment"
        );
        Ok(())
    }
}
