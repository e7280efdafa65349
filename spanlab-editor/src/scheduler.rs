//! Deferred tick queue
//!
//! Derived recomputations (label summaries after a history switch) are not
//! run inside the operation that triggers them. The operation enqueues a
//! job; jobs run in FIFO order once the operation has returned and its
//! write guard is released, either by the host calling
//! `LifecycleManager::run_deferred` or by [`flush_after_tick`].
//!
//! Ordering guarantees:
//! - a job never runs before the operation that enqueued it has finished
//! - jobs run in enqueue order
//! - an equal job already pending is not enqueued twice

use crate::lifecycle::SharedStore;
use std::collections::VecDeque;

/// Work deferred to the next tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredJob {
    /// Recompute the label summary of whatever is currently viewed
    RefreshLabelSummary,
}

#[derive(Debug, Clone)]
pub struct TickQueue<T> {
    pending: VecDeque<T>,
}

impl<T: PartialEq> TickQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// Returns false when an equal job was already pending
    pub fn push(&mut self, job: T) -> bool {
        if self.pending.contains(&job) {
            return false;
        }
        self.pending.push_back(job);
        true
    }

    /// Take all pending jobs in FIFO order
    pub fn drain(&mut self) -> Vec<T> {
        self.pending.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl<T: PartialEq> Default for TickQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Yield once, then run the store's deferred jobs under a fresh write guard
///
/// Returns the number of jobs executed.
pub async fn flush_after_tick(store: &SharedStore) -> usize {
    tokio::task::yield_now().await;
    let mut manager = store.write().await;
    manager.run_deferred()
}
