//! `Heap<M>` — the process-wide collection of every page tier, and the
//! single owner of the live-byte tracker and GC scheduler callback.

use std::marker::PhantomData;

use parking_lot::Mutex;

use crate::allocated_size_tracker::HeapSizeTracker;
use crate::config::{EXTRA_OBJECT_PAGE_SIZE, FIXED_BLOCK_MAX_BLOCK_SIZE, FIXED_BLOCK_PAGE_SIZE, NEXT_FIT_PAGE_SIZE};
use crate::object_model::ObjectModel;
use crate::page::{ExtraObjectPage, FixedBlockPage, NextFitPage, SingleObjectPage};
use crate::page_store::PageStore;
use crate::sweep::{FinalizerQueue, GcScheduler, NullSweepScope, SweepScope};

/// Every page tier a `CustomAllocator<M>` can draw from, plus the shared
/// accounting and scheduling state that spans all of them.
pub struct Heap<M: ObjectModel> {
    fixed_block_stores: [PageStore<FixedBlockPage>; FIXED_BLOCK_MAX_BLOCK_SIZE + 1],
    next_fit_store: PageStore<NextFitPage>,
    single_object_store: PageStore<SingleObjectPage>,
    extra_object_store: PageStore<ExtraObjectPage>,
    pending_finalizer_queue: Mutex<FinalizerQueue>,
    size_tracker: HeapSizeTracker,
    scheduler: Box<dyn GcScheduler + Send + Sync>,
    _model: PhantomData<fn() -> M>,
}

impl<M: ObjectModel> Heap<M> {
    #[must_use]
    pub fn new(scheduler: Box<dyn GcScheduler + Send + Sync>) -> Self {
        Self {
            fixed_block_stores: std::array::from_fn(|_| PageStore::new()),
            next_fit_store: PageStore::new(),
            single_object_store: PageStore::new(),
            extra_object_store: PageStore::new(),
            pending_finalizer_queue: Mutex::new(FinalizerQueue::new()),
            size_tracker: HeapSizeTracker::new(),
            scheduler,
            _model: PhantomData,
        }
    }

    #[must_use]
    pub fn size_tracker(&self) -> &HeapSizeTracker {
        &self.size_tracker
    }

    #[must_use]
    pub fn scheduler(&self) -> &dyn GcScheduler {
        self.scheduler.as_ref()
    }

    /// Drops every page cache. Called by the GC under STW before a sweep.
    pub fn prepare_for_gc(&self) {
        for store in &self.fixed_block_stores {
            store.prepare_for_gc();
        }
        self.next_fit_store.prepare_for_gc();
        self.single_object_store.prepare_for_gc();
        self.extra_object_store.prepare_for_gc();
    }

    /// Sweeps every tier, waits for cooperative sweepers to finish, then
    /// drains and returns the finalizer queue accumulated this pass (the
    /// sweep's own discoveries plus anything threads merged in via
    /// [`Self::add_to_finalizer_queue`] since the previous sweep).
    pub fn sweep(&self, scope: &mut impl SweepScope) -> FinalizerQueue {
        let finalizer_queue = FinalizerQueue::new();

        for store in &self.fixed_block_stores {
            // SAFETY: every occupied cell in a store of this heap's pages
            // holds a live instance of a type managed by `M`, by the
            // allocator's own allocation discipline.
            store.sweep(|page| unsafe { FixedBlockPage::sweep::<M>(page, &finalizer_queue, scope, &self.size_tracker) });
        }
        // SAFETY: see above.
        self.next_fit_store
            .sweep(|page| unsafe { NextFitPage::sweep::<M>(page, &finalizer_queue, scope, &self.size_tracker) });
        // SAFETY: see above.
        self.single_object_store
            .sweep_and_free(|page| unsafe { SingleObjectPage::sweep::<M>(page, &finalizer_queue, scope, &self.size_tracker) });

        self.extra_object_store.sweep(|page| ExtraObjectPage::sweep(page));

        while self.has_concurrent_sweepers() {
            std::hint::spin_loop();
        }

        #[cfg(feature = "tracing")]
        tracing::info!(allocated_bytes = self.size_tracker.allocated_bytes(), "heap sweep complete");

        let pending = self.pending_finalizer_queue.lock();
        finalizer_queue.transfer_all_from(&pending);
        drop(pending);
        finalizer_queue
    }

    #[must_use]
    fn has_concurrent_sweepers(&self) -> bool {
        self.fixed_block_stores.iter().any(PageStore::has_concurrent_sweepers)
            || self.next_fit_store.has_concurrent_sweepers()
            || self.single_object_store.has_concurrent_sweepers()
            || self.extra_object_store.has_concurrent_sweepers()
    }

    /// Merges a dying thread's private finalizer queue into the heap's
    /// pending queue, to be drained by the next [`Self::sweep`].
    pub fn add_to_finalizer_queue(&self, thread_queue: &FinalizerQueue) {
        let pending = self.pending_finalizer_queue.lock();
        pending.transfer_all_from(thread_queue);
    }

    pub(crate) fn get_fixed_block_page(&self, block_size: u32, finalizer_queue: &FinalizerQueue) -> *mut FixedBlockPage {
        self.fixed_block_stores[block_size as usize].get_page(block_size, self.scheduler.as_ref(), |page| unsafe {
            // SAFETY: see `Self::sweep`.
            FixedBlockPage::sweep::<M>(page, finalizer_queue, &mut NullSweepScope, &self.size_tracker)
        })
    }

    pub(crate) fn get_next_fit_page(&self, finalizer_queue: &FinalizerQueue) -> *mut NextFitPage {
        self.next_fit_store.get_page(0, self.scheduler.as_ref(), |page| unsafe {
            // SAFETY: see `Self::sweep`.
            NextFitPage::sweep::<M>(page, finalizer_queue, &mut NullSweepScope, &self.size_tracker)
        })
    }

    /// A `SingleObjectPage` is always freshly procured; the page's bytes are
    /// recorded to the heap tracker here, since `Page::create` has no access
    /// to it. The scheduler is not notified again here: `Page::create`'s
    /// underlying `raw::safe_alloc` already fired it once for this page.
    pub(crate) fn get_single_object_page(&self, cell_count: u32) -> *mut SingleObjectPage {
        let page = self.single_object_store.new_page(cell_count, self.scheduler.as_ref());
        let size_bytes = SingleObjectPage::size_in_bytes(cell_count);
        self.size_tracker.record_difference(size_bytes as i64);
        page
    }

    pub(crate) fn get_extra_object_page(&self) -> *mut ExtraObjectPage {
        self.extra_object_store
            .get_page(0, self.scheduler.as_ref(), |page| ExtraObjectPage::sweep(page))
    }

    /// Worst-case per-thread cached-page footprint: the nominal size of
    /// every tier that currently has at least one page anywhere in its
    /// store. `SingleObjectPage` is excluded: it is always sized exactly to
    /// its one object, so it carries no slack to estimate.
    #[must_use]
    pub fn estimate_overhead_per_thread(&self) -> u64 {
        let mut total = 0u64;
        if self.fixed_block_stores.iter().any(|store| !store.is_empty()) {
            total += FIXED_BLOCK_PAGE_SIZE as u64 * (FIXED_BLOCK_MAX_BLOCK_SIZE + 1) as u64;
        }
        if !self.next_fit_store.is_empty() {
            total += NEXT_FIT_PAGE_SIZE as u64;
        }
        if !self.extra_object_store.is_empty() {
            total += EXTRA_OBJECT_PAGE_SIZE as u64;
        }
        total
    }
}
