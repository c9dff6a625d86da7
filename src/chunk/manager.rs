//! Chunk manager state machine
//!
//! Owns the chunk list, routes writes to the single live chunk, triggers
//! rollover when the strategy says the chunk is full, and publishes cluster
//! metadata through the chunk lifecycle hooks. Rollovers run on a dedicated
//! worker task so the write path never blocks on upload; the first rollover
//! failure latches and stops ingestion, because durability can no longer be
//! promised without unbounded buffering. Upstream re-dispatches from the
//! last committed offset.

use super::rollover::ChunkRolloverFactory;
use super::{telemetry, ChunkFactory, ReadWriteChunk};
use crate::clock::BoundedClock;
use crate::span::Span;
use crate::{Error, Result};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long `wait_for_rollovers` waits for the worker to drain.
pub const DEFAULT_ROLLOVER_DEADLINE: Duration = Duration::from_secs(600);

/// Queue depth for the recovery variant. Recovery tasks ingest far more data
/// in parallel than they can upload, so completed chunks pile up behind the
/// single uploader.
const RECOVERY_MAX_QUEUED_ROLLOVERS: usize = 1024;

/// Which writer model this manager serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkManagerVariant {
    /// Single-threaded writer, strict one-rollover-in-flight.
    Indexing,
    /// Multi-threaded writers, rollovers queue behind the uploader.
    Recovery,
}

struct RolloverRequest {
    chunk: Arc<ReadWriteChunk>,
    /// Held until the rollover completes; bounds rollovers in flight.
    permit: OwnedSemaphorePermit,
}

/// The chunk manager state machine shared by the indexing and recovery
/// writers.
pub struct ChunkManager {
    variant: ChunkManagerVariant,
    chunk_factory: Arc<dyn ChunkFactory>,
    rollover_factory: Arc<ChunkRolloverFactory>,
    chunks: parking_lot::Mutex<Vec<Arc<ReadWriteChunk>>>,
    /// The single writable chunk. The reference and the rollover transition
    /// form one critical section.
    active: Mutex<Option<Arc<ReadWriteChunk>>>,
    live_messages: AtomicU64,
    live_bytes: AtomicU64,
    read_only: AtomicBool,
    rollover_failed: Arc<AtomicBool>,
    rollover_tx: parking_lot::Mutex<Option<UnboundedSender<RolloverRequest>>>,
    rollover_slots: Arc<Semaphore>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    rollover_deadline: Duration,
    clock: Arc<BoundedClock>,
}

impl ChunkManager {
    /// Manager for the indexer: one writer, at most one rollover in flight.
    /// Must be called from within a tokio runtime.
    pub fn for_indexing(
        chunk_factory: Arc<dyn ChunkFactory>,
        rollover_factory: Arc<ChunkRolloverFactory>,
        rollover_deadline: Duration,
        clock: Arc<BoundedClock>,
    ) -> Self {
        Self::new(
            ChunkManagerVariant::Indexing,
            chunk_factory,
            rollover_factory,
            1,
            rollover_deadline,
            clock,
        )
    }

    /// Manager for recovery tasks: many writers, many chunks may await the
    /// single uploader. Must be called from within a tokio runtime.
    pub fn for_recovery(
        chunk_factory: Arc<dyn ChunkFactory>,
        rollover_factory: Arc<ChunkRolloverFactory>,
        rollover_deadline: Duration,
        clock: Arc<BoundedClock>,
    ) -> Self {
        Self::new(
            ChunkManagerVariant::Recovery,
            chunk_factory,
            rollover_factory,
            RECOVERY_MAX_QUEUED_ROLLOVERS,
            rollover_deadline,
            clock,
        )
    }

    fn new(
        variant: ChunkManagerVariant,
        chunk_factory: Arc<dyn ChunkFactory>,
        rollover_factory: Arc<ChunkRolloverFactory>,
        max_rollovers_in_flight: usize,
        rollover_deadline: Duration,
        clock: Arc<BoundedClock>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let rollover_failed = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(rollover_worker(
            rx,
            Arc::clone(&rollover_factory),
            Arc::clone(&rollover_failed),
        ));
        info!(variant = ?variant, "Created chunk manager");

        Self {
            variant,
            chunk_factory,
            rollover_factory,
            chunks: parking_lot::Mutex::new(Vec::new()),
            active: Mutex::new(None),
            live_messages: AtomicU64::new(0),
            live_bytes: AtomicU64::new(0),
            read_only: AtomicBool::new(false),
            rollover_failed,
            rollover_tx: parking_lot::Mutex::new(Some(tx)),
            rollover_slots: Arc::new(Semaphore::new(max_rollovers_in_flight)),
            worker: parking_lot::Mutex::new(Some(worker)),
            rollover_deadline,
            clock,
        }
    }

    pub fn variant(&self) -> ChunkManagerVariant {
        self.variant
    }

    /// Ingest one span into the live chunk, creating it if necessary, and
    /// roll over when the strategy says the chunk is full.
    pub async fn add_message(
        &self,
        span: &Span,
        msg_size: u64,
        partition_id: &str,
        offset: i64,
    ) -> Result<()> {
        if self.rollover_failed.load(Ordering::Acquire) || self.read_only.load(Ordering::Acquire) {
            warn!("Ingestion is stopped since the manager is closing or a rollover failed");
            return Err(Error::IngestionStopped);
        }

        let mut active = self.active.lock().await;
        let chunk = match active.as_ref() {
            Some(chunk) => Arc::clone(chunk),
            None => {
                let chunk = self.chunk_factory.make_chunk(partition_id).await?;
                chunk.post_create().await?;
                self.chunks.lock().push(Arc::clone(&chunk));
                *active = Some(Arc::clone(&chunk));
                chunk
            }
        };

        chunk.add_message(span, partition_id, offset)?;
        let messages = self.live_messages.fetch_add(1, Ordering::AcqRel) + 1;
        let bytes = self.live_bytes.fetch_add(msg_size, Ordering::AcqRel) + msg_size;
        telemetry::record_live_indexed(1, msg_size as i64);

        if self
            .rollover_factory
            .strategy()
            .should_roll_over(bytes, messages)
        {
            info!(
                messages,
                bytes,
                chunk_id = %chunk.id(),
                "Rolling over chunk"
            );
            self.begin_rollover(&mut active).await?;
        }
        Ok(())
    }

    /// Roll over the live chunk, if any. Used by the shutdown path and
    /// exposed for operational tooling.
    pub async fn rollover_active_chunk(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        self.begin_rollover(&mut active).await
    }

    /// Clear the active slot, reset the live gauges, stamp the chunk, and
    /// hand it to the rollover worker. Caller holds the active-chunk lock.
    async fn begin_rollover(&self, active: &mut Option<Arc<ReadWriteChunk>>) -> Result<()> {
        let Some(chunk) = active.take() else {
            return Ok(());
        };

        let messages = self.live_messages.swap(0, Ordering::AcqRel);
        let bytes = self.live_bytes.swap(0, Ordering::AcqRel);
        telemetry::record_live_indexed(-(messages as i64), -(bytes as i64));
        chunk.set_last_updated(self.clock.now_epoch_ms());

        // For the indexing variant this has one permit, so the writer waits
        // here until the previous rollover completes.
        let permit = Arc::clone(&self.rollover_slots)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("rollover slots closed".to_string()))?;

        let tx = self.rollover_tx.lock();
        match tx.as_ref() {
            Some(tx) => tx
                .send(RolloverRequest { chunk, permit })
                .map_err(|_| Error::Internal("rollover worker stopped".to_string())),
            None => Err(Error::IngestionStopped),
        }
    }

    /// Stop accepting writes, roll over the live chunk, and wait for all
    /// queued rollovers to finish within the deadline. Returns true iff no
    /// rollover failed.
    pub async fn wait_for_rollovers(&self) -> bool {
        info!("Waiting for rollovers to complete");
        self.read_only.store(true, Ordering::Release);

        {
            let mut active = self.active.lock().await;
            if active.is_some() {
                if let Err(e) = self.begin_rollover(&mut active).await {
                    warn!(error = %e, "Failed to submit final rollover");
                    self.rollover_failed.store(true, Ordering::Release);
                }
            }
        }

        // Closing the channel lets the worker drain and exit.
        drop(self.rollover_tx.lock().take());

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(self.rollover_deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "Rollover worker terminated abnormally");
                    return false;
                }
                Err(_) => {
                    warn!(
                        deadline_secs = self.rollover_deadline.as_secs(),
                        "Timed out waiting for rollovers"
                    );
                    return false;
                }
            }
        }

        if self.rollover_failed.load(Ordering::Acquire) {
            info!("Some rollovers failed");
            false
        } else {
            info!("All rollovers completed");
            true
        }
    }

    /// Close every chunk best-effort. Errors are logged, never thrown, so a
    /// partial failure cannot leak the remaining chunks' resources.
    pub async fn shut_down(&self) {
        info!("Closing chunk manager");
        self.read_only.store(true, Ordering::Release);

        let chunks = self.chunks.lock().clone();
        for chunk in chunks {
            if let Err(e) = chunk.close() {
                error!(chunk_id = %chunk.id(), error = %e, "Failed to close chunk");
            }
        }
        info!("Closed chunk manager");
    }

    pub async fn active_chunk(&self) -> Option<Arc<ReadWriteChunk>> {
        self.active.lock().await.clone()
    }

    pub fn chunk_list(&self) -> Vec<Arc<ReadWriteChunk>> {
        self.chunks.lock().clone()
    }

    pub fn live_messages_indexed(&self) -> u64 {
        self.live_messages.load(Ordering::Acquire)
    }

    pub fn live_bytes_indexed(&self) -> u64 {
        self.live_bytes.load(Ordering::Acquire)
    }

    pub fn rollover_failed(&self) -> bool {
        self.rollover_failed.load(Ordering::Acquire)
    }
}

/// Drains rollover requests one at a time. Upload is the bottleneck, so a
/// single worker is deliberate; queue depth is governed by the semaphore in
/// the manager.
async fn rollover_worker(
    mut rx: UnboundedReceiver<RolloverRequest>,
    factory: Arc<ChunkRolloverFactory>,
    rollover_failed: Arc<AtomicBool>,
) {
    while let Some(request) = rx.recv().await {
        let chunk_id = request.chunk.id();
        let start = std::time::Instant::now();
        match factory.task_for(Arc::clone(&request.chunk)).run().await {
            Ok(()) => {
                telemetry::record_rollover_result(true, start.elapsed().as_secs_f64());
            }
            Err(e) => {
                warn!(chunk_id = %chunk_id, error = %e, "Roll over failed");
                rollover_failed.store(true, Ordering::Release);
                telemetry::record_rollover_result(false, start.elapsed().as_secs_f64());
            }
        }
        drop(request.permit);
    }
}
