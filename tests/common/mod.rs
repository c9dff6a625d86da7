//! Shared helpers for integration tests
#![allow(dead_code)]

use spanvault::chunk::{
    ChunkManager, ChunkRolloverFactory, LogChunkFactory, SearchContext, SizeOrCountStrategy,
};
use spanvault::clock::BoundedClock;
use spanvault::logstore::{JournalLogStore, LogStore};
use spanvault::metadata::{
    MemoryCoordination, SearchMetadataStore, SnapshotMetadataStore,
};
use spanvault::span::Span;

use async_trait::async_trait;
use futures::stream::BoxStream;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore, PutMultipartOpts,
    PutOptions, PutPayload, PutResult,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Poll `condition` until it holds or the timeout elapses.
pub async fn wait_until<F, Fut>(what: &str, timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A span of a known service/partition shape for driving the pipeline.
pub fn span_at(id: u64, timestamp_epoch_ms: i64) -> Span {
    let mut span = Span::new(format!("span-{id}"), "test-service", timestamp_epoch_ms);
    span.name = "op".to_string();
    span
}

/// Everything a chunk pipeline test needs, wired against in-memory stores.
pub struct PipelineHarness {
    pub coordination: Arc<MemoryCoordination>,
    pub snapshot_store: Arc<SnapshotMetadataStore>,
    pub search_store: Arc<SearchMetadataStore>,
    pub object_store: Arc<dyn ObjectStore>,
    pub clock: Arc<BoundedClock>,
    // Keeps chunk scratch directories alive for the test's duration
    pub scratch: TempDir,
}

impl PipelineHarness {
    pub async fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        let coordination = Arc::new(MemoryCoordination::new());
        let snapshot_store = Arc::new(
            SnapshotMetadataStore::new(coordination.clone(), "snapshots")
                .await
                .unwrap(),
        );
        let search_store = Arc::new(
            SearchMetadataStore::new(coordination.clone(), "search")
                .await
                .unwrap(),
        );
        Self {
            coordination,
            snapshot_store,
            search_store,
            object_store,
            clock: Arc::new(BoundedClock::default()),
            scratch: tempfile::tempdir().unwrap(),
        }
    }

    pub fn chunk_factory(&self) -> Arc<LogChunkFactory> {
        let root = self.scratch.path().to_path_buf();
        Arc::new(LogChunkFactory::new(
            Arc::new(move |chunk_id: &str| -> spanvault::Result<Arc<dyn LogStore>> {
                Ok(Arc::new(JournalLogStore::create(root.join(chunk_id))?))
            }),
            self.snapshot_store.clone(),
            self.search_store.clone(),
            SearchContext::new("localhost", 8080),
            self.clock.clone(),
        ))
    }

    pub fn rollover_factory(&self, max_bytes: u64, max_messages: u64) -> Arc<ChunkRolloverFactory> {
        Arc::new(ChunkRolloverFactory::new(
            Arc::new(SizeOrCountStrategy::new(max_bytes, max_messages)),
            self.object_store.clone(),
            "chunks",
        ))
    }

    pub fn recovery_manager(&self, max_bytes: u64, max_messages: u64) -> ChunkManager {
        ChunkManager::for_recovery(
            self.chunk_factory(),
            self.rollover_factory(max_bytes, max_messages),
            Duration::from_secs(30),
            self.clock.clone(),
        )
    }

    pub fn indexing_manager(&self, max_bytes: u64, max_messages: u64) -> ChunkManager {
        ChunkManager::for_indexing(
            self.chunk_factory(),
            self.rollover_factory(max_bytes, max_messages),
            Duration::from_secs(30),
            self.clock.clone(),
        )
    }
}

fn failing_put_error() -> object_store::Error {
    object_store::Error::Generic {
        store: "failing",
        source: "injected put failure".into(),
    }
}

/// Object store double whose writes always fail, for rollover failure paths.
#[derive(Debug)]
pub struct FailingObjectStore {
    inner: InMemory,
}

impl Default for FailingObjectStore {
    fn default() -> Self {
        Self {
            inner: InMemory::new(),
        }
    }
}

impl fmt::Display for FailingObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FailingObjectStore")
    }
}

#[async_trait]
impl ObjectStore for FailingObjectStore {
    async fn put_opts(
        &self,
        _location: &ObjectPath,
        _payload: PutPayload,
        _opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        Err(failing_put_error())
    }

    async fn put_multipart_opts(
        &self,
        _location: &ObjectPath,
        _opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        Err(failing_put_error())
    }

    async fn get_opts(
        &self,
        location: &ObjectPath,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &ObjectPath) -> object_store::Result<()> {
        self.inner.delete(location).await
    }

    fn list(
        &self,
        prefix: Option<&ObjectPath>,
    ) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(
        &self,
        prefix: Option<&ObjectPath>,
    ) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &ObjectPath, to: &ObjectPath) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(
        &self,
        from: &ObjectPath,
        to: &ObjectPath,
    ) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

/// Object store double that delays every write, for observing rollover
/// queueing behavior.
#[derive(Debug)]
pub struct SlowObjectStore {
    inner: InMemory,
    put_delay: Duration,
}

impl SlowObjectStore {
    pub fn new(put_delay: Duration) -> Self {
        Self {
            inner: InMemory::new(),
            put_delay,
        }
    }
}

impl fmt::Display for SlowObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlowObjectStore")
    }
}

#[async_trait]
impl ObjectStore for SlowObjectStore {
    async fn put_opts(
        &self,
        location: &ObjectPath,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        tokio::time::sleep(self.put_delay).await;
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &ObjectPath,
        opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(
        &self,
        location: &ObjectPath,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &ObjectPath) -> object_store::Result<()> {
        self.inner.delete(location).await
    }

    fn list(
        &self,
        prefix: Option<&ObjectPath>,
    ) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(
        &self,
        prefix: Option<&ObjectPath>,
    ) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &ObjectPath, to: &ObjectPath) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(
        &self,
        from: &ObjectPath,
        to: &ObjectPath,
    ) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}
