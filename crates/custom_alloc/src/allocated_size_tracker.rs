//! Two-level live-byte accounting: a per-page buffer that only talks to the
//! heap-wide atomic when its recorded total actually changes, and the
//! heap-wide atomic itself, which is what a `GcScheduler` is notified about.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::sweep::GcScheduler;

/// Per-page buffer of the last byte total reported to the heap tracker.
///
/// Pages bump-allocate many times between sweeps; without this buffer every
/// single allocation would need to touch a heap-wide atomic. Instead only
/// `on_page_overflow` (once per page, when it runs out of bump space) and
/// `after_sweep` (once per sweep) report a delta.
pub struct PageSizeTracker {
    last_recorded: usize,
}

impl PageSizeTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self { last_recorded: 0 }
    }

    /// Called when a page exhausts its bump-allocation space, with the page's
    /// current total allocated bytes (everything handed out since creation or
    /// the last sweep).
    pub fn on_page_overflow(&mut self, allocated_bytes: usize, heap: &HeapSizeTracker, scheduler: &dyn GcScheduler) {
        let delta = allocated_bytes as i64 - self.last_recorded as i64;
        self.last_recorded = allocated_bytes;
        debug_assert!(delta >= 0, "a page's allocated byte total must not shrink between overflows");
        heap.record_difference(delta);
        heap.notify_scheduler(scheduler);
    }

    /// Called once per sweep with the page's alive-byte total. Unlike
    /// `on_page_overflow` this does not notify the scheduler: sweep already
    /// has its own, coarser-grained reporting at the `Heap::sweep` level.
    pub fn after_sweep(&mut self, allocated_bytes: usize, heap: &HeapSizeTracker) {
        let delta = allocated_bytes as i64 - self.last_recorded as i64;
        self.last_recorded = allocated_bytes;
        heap.record_difference(delta);
    }
}

impl Default for PageSizeTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Heap-wide atomic live-byte counter, fed by every page's [`PageSizeTracker`]
/// and by `SingleObjectPage`, which reports directly (it has nothing to
/// amortize: exactly one object per page).
pub struct HeapSizeTracker {
    allocated_bytes: AtomicI64,
}

impl HeapSizeTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocated_bytes: AtomicI64::new(0),
        }
    }

    /// Applies a signed byte delta. Never observed to go negative.
    pub fn record_difference(&self, delta_bytes: i64) {
        let previous = self.allocated_bytes.fetch_add(delta_bytes, Ordering::Relaxed);
        debug_assert!(
            delta_bytes >= 0 || previous >= -delta_bytes,
            "heap allocated-bytes counter would go negative: previous={previous}, delta={delta_bytes}"
        );
    }

    /// Fires the scheduler hook with the current running total.
    pub fn notify_scheduler(&self, scheduler: &dyn GcScheduler) {
        scheduler.on_memory_allocation(self.allocated_bytes() as u64);
    }

    #[must_use]
    pub fn allocated_bytes(&self) -> i64 {
        self.allocated_bytes.load(Ordering::Relaxed)
    }
}

impl Default for HeapSizeTracker {
    fn default() -> Self {
        Self::new()
    }
}
