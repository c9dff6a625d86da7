//! Typed metadata store core
//!
//! Binds one entity type to a store folder in the coordination service and a
//! canonical JSON encoding. The concrete entity stores (snapshot, search,
//! service) embed [`StoreCore`] and expose only the operations legal for
//! their type, so illegal operations (for example updating a snapshot) do
//! not compile.
//!
//! Every store keeps an eventually-consistent in-memory cache fed by the
//! coordination watch stream. The cache is rebuilt from scratch after a
//! session is re-established and reads as empty while the session is down.

use super::coordination::{make_path, CoordinationClient, WatchEvent};
use crate::{Error, Result};

use bytes::Bytes;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// An entity that can live in a typed metadata store.
///
/// The serialized form is canonical UTF-8 JSON in struct field order, so a
/// decode/encode round trip is byte-identical. Unknown fields are ignored on
/// decode for forward compatibility.
pub trait MetadataEntity:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// Node name under the store folder. Unique per store.
    fn name(&self) -> &str;
}

/// Encode an entity to its canonical JSON string.
pub fn to_canonical_json<T: MetadataEntity>(entity: &T) -> Result<String> {
    serde_json::to_string(entity).map_err(|e| Error::Serialization(e.to_string()))
}

/// Shared implementation embedded by each concrete entity store.
pub(crate) struct StoreCore<T: MetadataEntity> {
    client: Arc<dyn CoordinationClient>,
    store_folder: String,
    cache: Arc<DashMap<String, T>>,
    cache_stale: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl<T: MetadataEntity> StoreCore<T> {
    /// Bind a store to `store_folder` and start its cache watcher.
    pub(crate) async fn new(
        client: Arc<dyn CoordinationClient>,
        store_folder: impl Into<String>,
    ) -> Result<Self> {
        let store_folder = store_folder.into();
        if store_folder.is_empty() {
            return Err(Error::Config("store folder cannot be empty".to_string()));
        }

        let cache = Arc::new(DashMap::new());
        // Stale until the first full sync completes.
        let cache_stale = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        // Subscribe before the initial listing so no event can fall between
        // the snapshot and the stream.
        let events = client.watch();
        tokio::spawn(cache_watcher(
            Arc::clone(&client),
            store_folder.clone(),
            Arc::clone(&cache),
            Arc::clone(&cache_stale),
            cancel.clone(),
            events,
        ));

        Ok(Self {
            client,
            store_folder,
            cache,
            cache_stale,
            cancel,
        })
    }

    pub(crate) fn node_path(&self, name: &str) -> String {
        make_path(&self.store_folder, name)
    }

    pub(crate) fn store_folder(&self) -> &str {
        &self.store_folder
    }

    /// Serialize and create the entity's node. Completes when the
    /// coordination service acknowledges the write.
    pub(crate) async fn create(&self, entity: &T) -> Result<()> {
        let payload = to_canonical_json(entity)?;
        self.client
            .create(&self.node_path(entity.name()), Bytes::from(payload))
            .await
    }

    /// Fetch and decode one entity by name.
    pub(crate) async fn get(&self, name: &str) -> Result<T> {
        self.get_versioned(name).await.map(|(entity, _)| entity)
    }

    /// Fetch one entity together with its coordination version, for
    /// compare-and-set updates.
    pub(crate) async fn get_versioned(&self, name: &str) -> Result<(T, u64)> {
        let path = self.node_path(name);
        let node = self.client.get(&path).await?;
        let entity = decode_node(&path, &node.data)?;
        Ok((entity, node.version))
    }

    /// Replace the entity's node, optionally as a compare-and-set against
    /// `expected_version`. Returns the new version.
    pub(crate) async fn update(&self, entity: &T, expected_version: Option<u64>) -> Result<u64> {
        let payload = to_canonical_json(entity)?;
        self.client
            .update(
                &self.node_path(entity.name()),
                Bytes::from(payload),
                expected_version,
            )
            .await
    }

    /// Delete the entity's node. A missing node is an error; callers with
    /// idempotent retry semantics match on `NotFound` themselves.
    pub(crate) async fn delete(&self, name: &str) -> Result<()> {
        self.client.delete(&self.node_path(name)).await
    }

    /// Point-in-time view of the watched cache.
    ///
    /// Returns empty while the cache is stale (before the first sync, or
    /// after a session loss until resynchronized).
    pub(crate) fn list_cached(&self) -> Vec<T> {
        if self.cache_stale.load(Ordering::Acquire) {
            return Vec::new();
        }
        self.cache.iter().map(|e| e.value().clone()).collect()
    }

    /// Whether the cache is currently serving the frozen/empty stale view.
    pub(crate) fn cache_is_stale(&self) -> bool {
        self.cache_stale.load(Ordering::Acquire)
    }
}

impl<T: MetadataEntity> Drop for StoreCore<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn decode_node<T: MetadataEntity>(path: &str, data: &Bytes) -> Result<T> {
    let text = std::str::from_utf8(data).map_err(|_| Error::Corrupt {
        path: path.to_string(),
    })?;
    match serde_json::from_str(text) {
        Ok(entity) => Ok(entity),
        Err(e) => {
            error!(path = %path, payload = %text, error = %e, "Unable to deserialize node payload");
            Err(Error::Corrupt {
                path: path.to_string(),
            })
        }
    }
}

/// Background task keeping one store's cache in sync with its subtree.
async fn cache_watcher<T: MetadataEntity>(
    client: Arc<dyn CoordinationClient>,
    folder: String,
    cache: Arc<DashMap<String, T>>,
    stale: Arc<AtomicBool>,
    cancel: CancellationToken,
    mut events: broadcast::Receiver<WatchEvent>,
) {
    if sync_all(&client, &folder, &cache).await {
        stale.store(false, Ordering::Release);
    }

    let subtree_prefix = format!("{}/", folder.trim_end_matches('/'));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(folder = %folder, "Cache watcher stopped");
                return;
            }
            event = events.recv() => match event {
                Ok(WatchEvent::NodeCreated(path)) | Ok(WatchEvent::NodeUpdated(path)) => {
                    if path.starts_with(&subtree_prefix) {
                        apply_upsert(&client, &path, &cache).await;
                    }
                }
                Ok(WatchEvent::NodeDeleted(path)) => {
                    if let Some(name) = path.strip_prefix(&subtree_prefix) {
                        cache.remove(name);
                    }
                }
                Ok(WatchEvent::SessionLost) => {
                    warn!(folder = %folder, "Coordination session lost, freezing cache");
                    stale.store(true, Ordering::Release);
                    cache.clear();
                }
                Ok(WatchEvent::SessionRestored) => {
                    debug!(folder = %folder, "Coordination session restored, rebuilding cache");
                    if sync_all(&client, &folder, &cache).await {
                        stale.store(false, Ordering::Release);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed notifications are fine to recover from with a
                    // full resync because events are only hints.
                    warn!(folder = %folder, skipped, "Watch stream lagged, resynchronizing");
                    if sync_all(&client, &folder, &cache).await {
                        stale.store(false, Ordering::Release);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!(folder = %folder, "Watch stream closed, freezing cache");
                    stale.store(true, Ordering::Release);
                    return;
                }
            }
        }
    }
}

/// Rebuild the cache from a full listing. Returns true on success.
async fn sync_all<T: MetadataEntity>(
    client: &Arc<dyn CoordinationClient>,
    folder: &str,
    cache: &DashMap<String, T>,
) -> bool {
    let paths = match client.list(folder).await {
        Ok(paths) => paths,
        Err(e) => {
            warn!(folder = %folder, error = %e, "Cache sync listing failed");
            return false;
        }
    };

    cache.clear();
    for path in paths {
        apply_upsert(client, &path, cache).await;
    }
    true
}

async fn apply_upsert<T: MetadataEntity>(
    client: &Arc<dyn CoordinationClient>,
    path: &str,
    cache: &DashMap<String, T>,
) {
    let name = match path.rsplit_once('/') {
        Some((_, name)) => name.to_string(),
        None => path.to_string(),
    };
    match client.get(path).await {
        Ok(node) => match decode_node::<T>(path, &node.data) {
            Ok(entity) => {
                cache.insert(name, entity);
            }
            Err(_) => {
                // Already logged with payload; keep the corrupt node out of
                // the cached view.
                cache.remove(&name);
            }
        },
        Err(Error::NotFound { .. }) => {
            // The node was deleted between the event and our read.
            cache.remove(&name);
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Cache upsert read failed");
        }
    }
}
