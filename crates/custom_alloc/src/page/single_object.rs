//! `SingleObjectPage` — one object per page, for blocks too large for
//! `NextFitPage`. Its bytes are recorded to the heap tracker directly by the
//! caller, on creation and again on death: there is nothing to amortize
//! through a per-page buffer when a page holds exactly one object.

use std::ptr::NonNull;
use std::sync::atomic::AtomicPtr;

use crate::allocated_size_tracker::HeapSizeTracker;
use crate::atomic_stack::Linked;
use crate::config::CELL_SIZE;
use crate::object_model::ObjectModel;
use crate::page_store::Page;
use crate::raw;
use crate::sweep::{self, FinalizerQueue, GcScheduler, SweepScope};

/// Page holding exactly one object, sized to fit it (plus its own header).
#[repr(C, align(8))]
pub struct SingleObjectPage {
    next: AtomicPtr<SingleObjectPage>,
    size_bytes: u64,
}

unsafe impl Linked for SingleObjectPage {
    fn atomic_next(&self) -> &AtomicPtr<Self> {
        &self.next
    }
}

impl SingleObjectPage {
    /// Total page footprint (header plus `cell_count` payload cells) for a
    /// page about to be created — or already holding — `cell_count` cells.
    #[must_use]
    pub fn size_in_bytes(cell_count: u32) -> u64 {
        std::mem::size_of::<Self>() as u64 + u64::from(cell_count) * CELL_SIZE as u64
    }

    /// Pointer to the page's single object.
    #[must_use]
    pub fn payload(page: *mut Self) -> NonNull<u8> {
        // SAFETY: the payload directly trails the header in a live page.
        unsafe { NonNull::new_unchecked(page.add(1).cast::<u8>()) }
    }

    /// Sweeps the page's single object: a pure alive/dead predicate. Does
    /// *not* destroy the page on death — `PageStore::sweep_and_free` owns
    /// that decision so a page is never destroyed twice. On death, subtracts
    /// the page's bytes from `heap_tracker` before reporting the object dead.
    ///
    /// # Safety
    /// `page` must point at a live, exclusively-owned `SingleObjectPage`
    /// holding a live instance of a type managed by `M`.
    pub unsafe fn sweep<M: ObjectModel>(
        page: *mut Self,
        finalizer_queue: &FinalizerQueue,
        scope: &mut impl SweepScope,
        heap_tracker: &HeapSizeTracker,
    ) -> bool {
        let object = Self::payload(page);
        // SAFETY: forwarded from this function's contract.
        let alive = unsafe { sweep::sweep_object::<M>(object, finalizer_queue, scope) };
        if !alive {
            // SAFETY: `page` is still valid; only read before the caller frees it.
            let size_bytes = unsafe { (*page).size_bytes };
            heap_tracker.record_difference(-(size_bytes as i64));
        }
        alive
    }

    /// Visits the page's single object's payload pointer.
    pub fn traverse_allocated_blocks(page: *mut Self, mut visit: impl FnMut(NonNull<u8>)) {
        visit(Self::payload(page));
    }
}

unsafe impl Page for SingleObjectPage {
    fn create(cell_count: u32, scheduler: &dyn GcScheduler) -> *mut Self {
        let size_bytes = Self::size_in_bytes(cell_count);
        // SAFETY: `size_bytes` is computed to fit the header plus
        // `cell_count` cells, and the OS hands back zeroed memory.
        let ptr = unsafe { raw::safe_alloc(size_bytes, scheduler) };
        let page = ptr.cast::<Self>();
        #[cfg(feature = "tracing")]
        tracing::debug!(cell_count, size_bytes, "SingleObjectPage::create");
        // SAFETY: `page` was just procured, zeroed, and sized for `Self`.
        unsafe {
            page.write(Self {
                next: AtomicPtr::new(std::ptr::null_mut()),
                size_bytes,
            });
        }
        page
    }

    unsafe fn destroy(page: *mut Self) {
        // SAFETY: `page` is still valid; we only read its size before freeing.
        let size_bytes = unsafe { (*page).size_bytes };
        #[cfg(feature = "tracing")]
        tracing::debug!(page = ?page, "SingleObjectPage::destroy");
        // SAFETY: forwarded from this function's contract; `page` was
        // procured by `create` with the same size.
        unsafe { raw::free(page.cast::<u8>(), size_bytes) };
    }
}
