//! Bounded concurrency for batch intake and per-image work.
//!
//! Two global semaphores cap the number of admitted batches and the number
//! of images in flight across all batches. Each admitted batch additionally
//! holds its own semaphore sized to its concurrency limit. A [`WorkerSlot`]
//! owns one permit from each and gives both back when dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::config::ProcessingConfig;
use crate::error::BatchError;

/// Process-wide worker pool.
pub struct WorkerPool {
    item_slots: Arc<Semaphore>,
    batch_slots: Arc<Semaphore>,
    global_workers: usize,
    max_batches: usize,
}

impl WorkerPool {
    pub fn new(global_workers: usize, max_batches: usize) -> Self {
        let global_workers = global_workers.max(1);
        let max_batches = max_batches.max(1);
        Self {
            item_slots: Arc::new(Semaphore::new(global_workers)),
            batch_slots: Arc::new(Semaphore::new(max_batches)),
            global_workers,
            max_batches,
        }
    }

    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self::new(config.global_workers, config.max_concurrent_batches)
    }

    /// Admit a batch, waiting at most `wait` for a batch slot.
    pub async fn admit(
        &self,
        concurrency_limit: usize,
        wait: Duration,
    ) -> Result<BatchAdmission, BatchError> {
        let started = Instant::now();
        let permit = match timeout(wait, Arc::clone(&self.batch_slots).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(waited_ms, "No batch slot available");
                return Err(BatchError::Backpressure { waited_ms });
            }
        };
        let concurrency_limit = concurrency_limit.max(1);
        Ok(BatchAdmission {
            _batch_permit: permit,
            local: Arc::new(Semaphore::new(concurrency_limit)),
            global: Arc::clone(&self.item_slots),
            gauge: Arc::new(SlotGauge::default()),
            concurrency_limit,
        })
    }

    pub fn global_workers(&self) -> usize {
        self.global_workers
    }

    /// Images currently holding a global slot.
    pub fn busy_workers(&self) -> usize {
        self.global_workers - self.item_slots.available_permits()
    }

    pub fn active_batches(&self) -> usize {
        self.max_batches - self.batch_slots.available_permits()
    }

    /// Stop handing out slots. Pending waits resolve to `None` or
    /// `Backpressure`.
    pub fn shutdown(&self) {
        self.item_slots.close();
        self.batch_slots.close();
    }
}

#[derive(Debug, Default)]
struct SlotGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl SlotGauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A batch's hold on the pool. Dropping it frees the batch slot.
#[derive(Debug)]
pub struct BatchAdmission {
    _batch_permit: OwnedSemaphorePermit,
    local: Arc<Semaphore>,
    global: Arc<Semaphore>,
    gauge: Arc<SlotGauge>,
    concurrency_limit: usize,
}

impl BatchAdmission {
    /// Wait for a per-batch slot, then a global slot. Returns `None` once
    /// the pool has shut down.
    pub async fn slot(&self) -> Option<WorkerSlot> {
        let local = Arc::clone(&self.local).acquire_owned().await.ok()?;
        let global = Arc::clone(&self.global).acquire_owned().await.ok()?;
        self.gauge.enter();
        Some(WorkerSlot {
            _local: local,
            _global: global,
            gauge: Arc::clone(&self.gauge),
        })
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn in_flight(&self) -> usize {
        self.gauge.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously held slots so far.
    pub fn peak_in_flight(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }
}

/// Permission to process one image.
pub struct WorkerSlot {
    _local: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
    gauge: Arc<SlotGauge>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.gauge.exit();
    }
}
