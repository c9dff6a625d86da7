//! Coordination service client abstraction
//!
//! A thin client interface over a strongly-consistent hierarchical KV store
//! with per-node versioning and change notifications. The typed metadata
//! stores are layered on top of this trait; production deployments bind it
//! to the real coordination fleet, development and tests use the in-memory
//! implementation below.

use crate::{Error, Result};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Capacity of the watch fan-out channel. Slow subscribers observe a lag
/// error and must resynchronize from a full listing.
const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// A node payload together with its store-assigned version.
#[derive(Debug, Clone)]
pub struct VersionedValue {
    pub data: Bytes,
    pub version: u64,
}

/// Change notification emitted by the coordination service.
///
/// Notifications are at-least-once: consumers must treat them as hints and
/// re-read the node rather than trusting event ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    NodeCreated(String),
    NodeUpdated(String),
    NodeDeleted(String),
    /// The client session was lost. Cached state derived from watches is no
    /// longer trustworthy until a resync completes.
    SessionLost,
    /// The session was re-established; watchers should rebuild from scratch.
    SessionRestored,
}

/// Join a store folder and a node name into a node path.
pub fn make_path(folder: &str, name: &str) -> String {
    format!("{}/{}", folder.trim_end_matches('/'), name)
}

/// Client interface to the coordination service.
///
/// Implementations retry transport failures with bounded backoff and
/// surface `Error::StoreUnavailable` only after exhaustion.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Create a persistent node. Fails with `AlreadyExists` if present.
    async fn create(&self, path: &str, data: Bytes) -> Result<()>;

    /// Read a node's payload and version. Fails with `NotFound` if absent.
    async fn get(&self, path: &str) -> Result<VersionedValue>;

    /// Replace a node's payload. With `expected_version`, the write is a
    /// compare-and-set and fails with `Conflict` on a version mismatch.
    /// Returns the new version.
    async fn update(&self, path: &str, data: Bytes, expected_version: Option<u64>) -> Result<u64>;

    /// Delete a node. Fails with `NotFound` if absent.
    async fn delete(&self, path: &str) -> Result<()>;

    /// List node paths directly under `folder`.
    async fn list(&self, folder: &str) -> Result<Vec<String>>;

    /// Subscribe to the change notification stream.
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

/// In-memory coordination client for development and testing.
///
/// Strongly consistent by construction (one process, one lock). Watch events
/// are emitted after the mutation commits. Session loss does not exist here
/// naturally, so tests inject it with [`MemoryCoordination::expire_session`].
pub struct MemoryCoordination {
    nodes: RwLock<HashMap<String, VersionedValue>>,
    events: broadcast::Sender<WatchEvent>,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            nodes: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn emit(&self, event: WatchEvent) {
        // No receivers is fine; watches are optional.
        let _ = self.events.send(event);
    }

    /// Simulate losing the session with the coordination service.
    pub fn expire_session(&self) {
        self.emit(WatchEvent::SessionLost);
    }

    /// Simulate re-establishing the session.
    pub fn restore_session(&self) {
        self.emit(WatchEvent::SessionRestored);
    }

    /// Number of nodes currently stored, for diagnostics.
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }
}

impl Default for MemoryCoordination {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordination {
    async fn create(&self, path: &str, data: Bytes) -> Result<()> {
        {
            let mut nodes = self.nodes.write();
            if nodes.contains_key(path) {
                return Err(Error::AlreadyExists {
                    path: path.to_string(),
                });
            }
            nodes.insert(path.to_string(), VersionedValue { data, version: 1 });
        }
        self.emit(WatchEvent::NodeCreated(path.to_string()));
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<VersionedValue> {
        self.nodes
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                path: path.to_string(),
            })
    }

    async fn update(&self, path: &str, data: Bytes, expected_version: Option<u64>) -> Result<u64> {
        let new_version;
        {
            let mut nodes = self.nodes.write();
            let node = nodes.get_mut(path).ok_or_else(|| Error::NotFound {
                path: path.to_string(),
            })?;
            if let Some(expected) = expected_version {
                if node.version != expected {
                    return Err(Error::Conflict {
                        path: path.to_string(),
                        expected,
                        actual: node.version,
                    });
                }
            }
            node.data = data;
            node.version += 1;
            new_version = node.version;
        }
        self.emit(WatchEvent::NodeUpdated(path.to_string()));
        Ok(new_version)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        {
            let mut nodes = self.nodes.write();
            if nodes.remove(path).is_none() {
                return Err(Error::NotFound {
                    path: path.to_string(),
                });
            }
        }
        self.emit(WatchEvent::NodeDeleted(path.to_string()));
        Ok(())
    }

    async fn list(&self, folder: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", folder.trim_end_matches('/'));
        let mut paths: Vec<String> = self
            .nodes
            .read()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_get_round_trips() {
        let client = MemoryCoordination::new();
        client
            .create("services/auth", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        let node = client.get("services/auth").await.unwrap();
        assert_eq!(node.data, Bytes::from_static(b"{}"));
        assert_eq!(node.version, 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let client = MemoryCoordination::new();
        client.create("a/b", Bytes::new()).await.unwrap();
        let err = client.create("a/b", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_cas_detects_conflict() {
        let client = MemoryCoordination::new();
        client.create("a/b", Bytes::new()).await.unwrap();
        let v = client
            .update("a/b", Bytes::from_static(b"x"), Some(1))
            .await
            .unwrap();
        assert_eq!(v, 2);

        let err = client
            .update("a/b", Bytes::from_static(b"y"), Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let client = MemoryCoordination::new();
        let err = client.delete("a/missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_folder() {
        let client = MemoryCoordination::new();
        client.create("snapshots/s1", Bytes::new()).await.unwrap();
        client.create("snapshots/s2", Bytes::new()).await.unwrap();
        client.create("services/auth", Bytes::new()).await.unwrap();

        let paths = client.list("snapshots").await.unwrap();
        assert_eq!(paths, vec!["snapshots/s1", "snapshots/s2"]);
    }

    #[tokio::test]
    async fn test_watch_sees_lifecycle_events() {
        let client = MemoryCoordination::new();
        let mut rx = client.watch();

        client.create("a/b", Bytes::new()).await.unwrap();
        client.update("a/b", Bytes::new(), None).await.unwrap();
        client.delete("a/b").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), WatchEvent::NodeCreated("a/b".into()));
        assert_eq!(rx.recv().await.unwrap(), WatchEvent::NodeUpdated("a/b".into()));
        assert_eq!(rx.recv().await.unwrap(), WatchEvent::NodeDeleted("a/b".into()));
    }

    #[test]
    fn test_make_path_normalizes_trailing_slash() {
        assert_eq!(make_path("snapshots", "s1"), "snapshots/s1");
        assert_eq!(make_path("snapshots/", "s1"), "snapshots/s1");
    }
}
