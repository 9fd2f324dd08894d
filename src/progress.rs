//! Cancellation and progress reporting for long-running operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared token observed by extract/add/remove between chunks.
///
/// Clone it, hand one half to the engine, keep the other to poll completion
/// or to cancel. Cancellation takes effect at the next chunk boundary; a
/// cancelled add rolls the archive back to its pre-operation bytes before
/// the call returns.
#[derive(Clone, Debug, Default)]
pub struct Progress {
    inner: Arc<State>,
}

#[derive(Debug, Default)]
struct State {
    cancelled: AtomicBool,
    completed: AtomicU64,
    total: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The engine polls this between chunks.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Bytes processed so far by the current operation.
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Total bytes the current operation expects to process, when known.
    pub fn total(&self) -> u64 {
        self.inner.total.load(Ordering::Relaxed)
    }

    /// Completed bytes as a fraction of the total, in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.completed() as f64 / total as f64).min(1.0)
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.inner.total.store(total, Ordering::Relaxed);
        self.inner.completed.store(0, Ordering::Relaxed);
    }

    pub(crate) fn add_completed(&self, bytes: u64) {
        self.inner.completed.fetch_add(bytes, Ordering::Relaxed);
    }
}
