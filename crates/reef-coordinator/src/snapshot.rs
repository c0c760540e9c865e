//! Background persistence of reassembled worlds.
//!
//! One task owns a bounded queue. The gather loop moves each world in and
//! moves on; the task writes it to `world-NNNN.bin` and records the counts in
//! the run ledger. Writes happen one at a time, in generation order.

use crate::database::Database;
use parking_lot::Mutex;
use reef_core::{Error, GridSnapshot, Result, RunId};
use reef_world::Reassembled;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Saved and failed writes so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceStats {
    pub saved: u64,
    pub failed: u64,
    pub last_generation: Option<u64>,
}

pub struct SnapshotWriter {
    sender: mpsc::Sender<Reassembled>,
    task: JoinHandle<()>,
    stats: Arc<Mutex<PersistenceStats>>,
}

impl SnapshotWriter {
    pub async fn spawn(dir: PathBuf, db: Database, run_id: RunId, queue_depth: usize) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Writing snapshots to {:?}", dir);

        let (sender, mut receiver) = mpsc::channel::<Reassembled>(queue_depth.max(1));
        let stats = Arc::new(Mutex::new(PersistenceStats::default()));

        let task_stats = stats.clone();
        let task = tokio::spawn(async move {
            while let Some(world) = receiver.recv().await {
                let generation = world.world.generation;
                match persist(&dir, &db, run_id, world).await {
                    Ok(path) => {
                        debug!(event = "snapshot_saved", generation, path = %path.display(), "Snapshot saved");
                        let mut stats = task_stats.lock();
                        stats.saved += 1;
                        stats.last_generation = Some(generation);
                    }
                    Err(e) => {
                        error!(event = "snapshot_failed", generation, "Failed to save snapshot: {}", e);
                        task_stats.lock().failed += 1;
                    }
                }
            }
        });

        Ok(Self { sender, task, stats })
    }

    pub fn sink(&self) -> SnapshotSink {
        SnapshotSink {
            sender: self.sender.clone(),
        }
    }

    /// Close the queue and wait until everything in it is on disk.
    ///
    /// Waits for outstanding sinks to be dropped too.
    pub async fn finish(self) -> PersistenceStats {
        drop(self.sender);
        if let Err(e) = self.task.await {
            error!("Snapshot writer task failed: {}", e);
        }
        let stats = *self.stats.lock();
        info!(
            event = "snapshots_flushed",
            saved = stats.saved,
            failed = stats.failed,
            "Snapshot writer finished"
        );
        stats
    }
}

/// Producer side of the writer's queue, for the blocking gather loop
#[derive(Clone)]
pub struct SnapshotSink {
    sender: mpsc::Sender<Reassembled>,
}

impl SnapshotSink {
    /// Hand a world to the writer, blocking while the queue is full.
    ///
    /// Must not be called from inside the async runtime.
    pub fn submit(&self, world: Reassembled) -> Result<()> {
        self.sender
            .blocking_send(world)
            .map_err(|_| Error::Other("snapshot writer has stopped".to_string()))
    }
}

pub fn snapshot_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("world-{:04}.bin", generation + 1))
}

pub async fn save_snapshot(path: &Path, world: &GridSnapshot) -> Result<()> {
    let bytes = bincode::serialize(world)
        .map_err(|e| Error::Serialization(format!("Failed to serialize snapshot: {}", e)))?;
    fs::write(path, &bytes).await?;
    Ok(())
}

pub async fn load_snapshot(path: &Path) -> Result<GridSnapshot> {
    let bytes = fs::read(path).await?;
    bincode::deserialize(&bytes)
        .map_err(|e| Error::Serialization(format!("Failed to deserialize snapshot: {}", e)))
}

async fn persist(dir: &Path, db: &Database, run_id: RunId, world: Reassembled) -> Result<PathBuf> {
    let generation = world.world.generation;
    let path = snapshot_path(dir, generation);
    save_snapshot(&path, &world.world).await?;
    db.record_generation(run_id, generation, world.counts, &path.to_string_lossy())
        .await?;
    Ok(path)
}
