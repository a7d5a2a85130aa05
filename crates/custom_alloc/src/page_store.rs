//! `PageStore<P>` — the four-queue state machine (`empty`, `ready`, `used`,
//! `unswept`) that every page tier is built from.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::atomic_stack::{AtomicStack, Linked};
use crate::sweep::GcScheduler;

/// A page type manageable by a [`PageStore`]: knows how to procure itself
/// from the OS and how to give itself back.
///
/// # Safety
/// A page handed to `destroy` must not still be linked into any
/// `AtomicStack`, and must not be dereferenced again afterwards.
pub unsafe trait Page: Linked + Sized {
    /// Procures a fresh page. `cell_count` is the size hint the requesting
    /// tier cares about (a block size for `FixedBlockPage`, an object's cell
    /// count for `NextFitPage`/`SingleObjectPage`, ignored by
    /// `ExtraObjectPage`).
    fn create(cell_count: u32, scheduler: &dyn GcScheduler) -> *mut Self;

    /// Releases a page's memory back to the OS.
    ///
    /// # Safety
    /// `page` must have just been popped from its owning queue and must not
    /// be used again.
    unsafe fn destroy(page: *mut Self);
}

/// Four-queue page lifecycle: `empty → used → unswept → {ready, empty}`.
///
/// All transitions are lock-free; see the module-level queue diagram in the
/// allocator's design notes for the full state table.
pub struct PageStore<P: Page> {
    empty: AtomicStack<P>,
    ready: AtomicStack<P>,
    used: AtomicStack<P>,
    unswept: AtomicStack<P>,
    /// Mutators racing `sweep`/`sweep_and_free` for a page via `get_page`
    /// register here so `Heap::sweep` can wait for them to finish.
    concurrent_sweepers: AtomicUsize,
}

impl<P: Page> PageStore<P> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            empty: AtomicStack::new(),
            ready: AtomicStack::new(),
            used: AtomicStack::new(),
            unswept: AtomicStack::new(),
            concurrent_sweepers: AtomicUsize::new(0),
        }
    }

    /// `true` if every queue is empty (no pages of this tier currently
    /// exist). Used by `Heap::estimate_overhead_per_thread`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.empty.is_empty() && self.ready.is_empty() && self.used.is_empty() && self.unswept.is_empty()
    }

    /// Moves `ready` and `used` into `unswept`, destroys every `empty` page.
    /// Called once, single-threaded, under STW before a GC cycle's sweep.
    pub fn prepare_for_gc(&self) {
        self.unswept.transfer_all_from(&self.ready);
        self.unswept.transfer_all_from(&self.used);
        while let Some(page) = self.empty.pop() {
            // SAFETY: just popped, uniquely owned here.
            unsafe { P::destroy(page) };
        }
    }

    /// Drains `unswept`: pages `sweep_one` reports alive go to `ready`, dead
    /// ones go to `empty` for reuse. Used by tiers whose pages can host more
    /// than one live object (`FixedBlockPage`, `NextFitPage`,
    /// `ExtraObjectPage`).
    pub fn sweep(&self, mut sweep_one: impl FnMut(*mut P) -> bool) {
        let mut page = self.unswept.pop();
        while self.sweep_single(&self.ready, &mut page, &mut sweep_one).is_some() {
            page = self.unswept.pop();
        }
    }

    /// Like [`Self::sweep`], but survivors are destroyed instead of emptied
    /// out; used by the `SingleObjectPage` tier, which never reuses a page
    /// across objects.
    pub fn sweep_and_free(&self, mut sweep_one: impl FnMut(*mut P) -> bool) {
        while let Some(page) = self.unswept.pop() {
            if sweep_one(page) {
                // SAFETY: just popped, uniquely owned here.
                unsafe { self.ready.push(page) };
            } else {
                // SAFETY: just popped, uniquely owned here.
                unsafe { P::destroy(page) };
            }
        }
    }

    /// Sweeps `page` (and, if dead, every following page popped from
    /// `unswept`) until one survives or `unswept` runs dry. Survivors are
    /// pushed onto `to` and returned; dead pages are pushed onto `empty`.
    fn sweep_single(
        &self,
        to: &AtomicStack<P>,
        page: &mut Option<*mut P>,
        sweep_one: &mut impl FnMut(*mut P) -> bool,
    ) -> Option<*mut P> {
        while let Some(p) = *page {
            if sweep_one(p) {
                // SAFETY: `p` was just popped from `unswept`, uniquely owned.
                unsafe { to.push(p) };
                return Some(p);
            }
            // SAFETY: `p` was just popped from `unswept`, uniquely owned.
            unsafe { self.empty.push(p) };
            *page = self.unswept.pop();
        }
        None
    }

    /// Gets a page ready for allocation: a swept-and-ready page, a page
    /// cooperatively swept off `unswept` (assisting a concurrent GC sweep),
    /// a reclaimed empty page, or a freshly procured one — in that order.
    pub fn get_page(
        &self,
        cell_count: u32,
        scheduler: &dyn GcScheduler,
        mut sweep_one: impl FnMut(*mut P) -> bool,
    ) -> *mut P {
        if let Some(page) = self.ready.pop() {
            // SAFETY: just popped, uniquely owned here.
            unsafe { self.used.push(page) };
            return page;
        }
        if !self.unswept.is_empty() {
            self.concurrent_sweepers.fetch_add(1, Ordering::AcqRel);
            let mut page = self.unswept.pop();
            let found = self.sweep_single(&self.used, &mut page, &mut sweep_one);
            self.concurrent_sweepers.fetch_sub(1, Ordering::AcqRel);
            if let Some(page) = found {
                return page;
            }
        }
        if let Some(page) = self.empty.pop() {
            // SAFETY: just popped, uniquely owned here.
            unsafe { self.used.push(page) };
            return page;
        }
        self.new_page(cell_count, scheduler)
    }

    /// Procures a brand-new page and registers it as `used` immediately.
    pub fn new_page(&self, cell_count: u32, scheduler: &dyn GcScheduler) -> *mut P {
        let page = P::create(cell_count, scheduler);
        // SAFETY: freshly created, not linked anywhere yet.
        unsafe { self.used.push(page) };
        page
    }

    /// `true` while any mutator is cooperatively sweeping a page taken from
    /// this store's `unswept` queue via `get_page`. `Heap::sweep` waits for
    /// this to drop to zero before declaring a sweep pass complete.
    #[must_use]
    pub fn has_concurrent_sweepers(&self) -> bool {
        self.concurrent_sweepers.load(Ordering::Acquire) != 0
    }
}

impl<P: Page> Default for PageStore<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Page> Drop for PageStore<P> {
    fn drop(&mut self) {
        for stack in [&self.empty, &self.ready, &self.used, &self.unswept] {
            while let Some(page) = stack.pop() {
                // SAFETY: just popped, uniquely owned here; the store owns
                // every page reachable from its queues.
                unsafe { P::destroy(page) };
            }
        }
    }
}
