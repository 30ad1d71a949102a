//! Bounded worker pools: `general` for I/O-bound tasks, `process` for heavy ones.
//!
//! Each pool is a semaphore; a job holds a [`PoolPermit`] for the whole
//! invocation, so at most `max_concurrent` callables of a pool run at once.

use deskpilot_core::PoolKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Per-pool state.
struct PoolState {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    active: AtomicUsize,
    total_processed: AtomicU64,
}

impl PoolState {
    fn new(max_concurrent: usize) -> Arc<Self> {
        let max_concurrent = max_concurrent.max(1);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            active: AtomicUsize::new(0),
            total_processed: AtomicU64::new(0),
        })
    }

    fn permit(state: &Arc<Self>, pool: PoolKind, inner: OwnedSemaphorePermit) -> PoolPermit {
        state.active.fetch_add(1, Ordering::SeqCst);
        PoolPermit {
            pool,
            state: state.clone(),
            _inner: inner,
        }
    }
}

/// A held concurrency slot. Released on drop.
pub struct PoolPermit {
    pool: PoolKind,
    state: Arc<PoolState>,
    _inner: OwnedSemaphorePermit,
}

impl PoolPermit {
    pub fn pool(&self) -> PoolKind {
        self.pool
    }
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        self.state.total_processed.fetch_add(1, Ordering::SeqCst);
    }
}

/// The two worker pools.
pub struct WorkerPools {
    general: Arc<PoolState>,
    process: Arc<PoolState>,
}

impl WorkerPools {
    pub fn new(general_workers: usize, process_workers: usize) -> Self {
        Self {
            general: PoolState::new(general_workers),
            process: PoolState::new(process_workers),
        }
    }

    fn state(&self, pool: PoolKind) -> &Arc<PoolState> {
        match pool {
            PoolKind::General => &self.general,
            PoolKind::Process => &self.process,
        }
    }

    /// Wait for a slot. Returns `None` once the pools are closed.
    pub async fn acquire(&self, pool: PoolKind) -> Option<PoolPermit> {
        let state = self.state(pool);
        let inner = state.semaphore.clone().acquire_owned().await.ok()?;
        Some(PoolState::permit(state, pool, inner))
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self, pool: PoolKind) -> Option<PoolPermit> {
        let state = self.state(pool);
        let inner = state.semaphore.clone().try_acquire_owned().ok()?;
        Some(PoolState::permit(state, pool, inner))
    }

    /// Reject all pending and future acquisitions.
    pub fn close(&self) {
        self.general.semaphore.close();
        self.process.semaphore.close();
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        [PoolKind::General, PoolKind::Process]
            .into_iter()
            .map(|pool| {
                let state = self.state(pool);
                PoolStats {
                    pool,
                    active: state.active.load(Ordering::SeqCst),
                    max_concurrent: state.max_concurrent,
                    total_processed: state.total_processed.load(Ordering::SeqCst),
                }
            })
            .collect()
    }
}

/// Statistics for a single pool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub pool: PoolKind,
    pub active: usize,
    pub max_concurrent: usize,
    pub total_processed: u64,
}
