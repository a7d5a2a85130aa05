//! `NextFitPage` — variable-size blocks served by a next-fit walk over a
//! linked sequence of [`Cell`] headers, coalesced on sweep.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::allocated_size_tracker::{HeapSizeTracker, PageSizeTracker};
use crate::atomic_stack::Linked;
use crate::cell::{AllocationSize, Cell};
use crate::config::{CELL_SIZE, NEXT_FIT_PAGE_SIZE};
use crate::object_model::ObjectModel;
use crate::page_store::Page;
use crate::raw;
use crate::sweep::{self, FinalizerQueue, GcScheduler, SweepScope};

/// Page serving medium variable-size allocations via next-fit search.
#[repr(C, align(8))]
pub struct NextFitPage {
    next: AtomicPtr<NextFitPage>,
    tracker: PageSizeTracker,
    cur_block: *mut Cell,
}

unsafe impl Linked for NextFitPage {
    fn atomic_next(&self) -> &AtomicPtr<Self> {
        &self.next
    }
}

// SAFETY: `cur_block` is only ever touched by whichever thread currently
// holds this page (either exclusively via `used`, or cooperatively during a
// sweep where only one thread at a time pops it off `unswept`).
unsafe impl Send for NextFitPage {}

impl NextFitPage {
    #[must_use]
    pub const fn cell_count() -> usize {
        AllocationSize::bytes_exactly((NEXT_FIT_PAGE_SIZE - std::mem::size_of::<Self>()) as u64).in_cells() as usize
    }

    /// Largest single block (in cells) this page type can serve; bigger
    /// requests go to `SingleObjectPage` instead.
    #[must_use]
    pub const fn max_block_size() -> u32 {
        Self::cell_count() as u32 - 2
    }

    /// # Safety
    /// `page` must point at a live `NextFitPage` and `index` must be within
    /// `[0, Self::cell_count()]`.
    unsafe fn cell_ptr(page: *mut Self, index: u32) -> *mut Cell {
        // SAFETY: the cells array directly trails the header.
        unsafe { page.add(1).cast::<Cell>().add(index as usize) }
    }

    fn end_ptr(page: *mut Self) -> *mut Cell {
        // SAFETY: `Self::cell_count()` is exactly one past the last index.
        unsafe { Self::cell_ptr(page, Self::cell_count() as u32) }
    }

    /// Tries to allocate `block_size` cells of payload (a header cell is
    /// added automatically). Falls back to [`Self::update_cur_block`] once,
    /// then reports overflow.
    pub fn try_allocate(
        page: *mut Self,
        block_size: u32,
        heap_tracker: &HeapSizeTracker,
        scheduler: &dyn GcScheduler,
    ) -> Option<NonNull<u8>> {
        let cells_needed = block_size + Cell::HEADER_CELLS as u32;
        // SAFETY: `page` is a live page exclusively owned by the caller.
        let this = unsafe { &mut *page };
        // SAFETY: `cur_block` always points within this page's cell array.
        if let Some(ptr) = unsafe { (*this.cur_block).try_allocate(cells_needed) } {
            return NonNull::new(ptr);
        }
        Self::update_cur_block(page, cells_needed);
        // SAFETY: `update_cur_block` leaves `cur_block` within the array.
        if let Some(ptr) = unsafe { (*this.cur_block).try_allocate(cells_needed) } {
            return NonNull::new(ptr);
        }
        let allocated_bytes = Self::allocated_size_bytes(page);
        this.tracker.on_page_overflow(allocated_bytes, heap_tracker, scheduler);
        None
    }

    /// Two-pass next-fit search for a free block of at least `cells_needed`
    /// cells, tracking the largest free block seen as a fallback.
    fn update_cur_block(page: *mut Self, cells_needed: u32) {
        // SAFETY: `page` is a live page exclusively owned by the caller.
        let this = unsafe { &mut *page };
        // SAFETY: index 0 is always within range.
        let cells_base = unsafe { Self::cell_ptr(page, 0) };
        let mut start = this.cur_block;
        if start == cells_base {
            // SAFETY: index 1 is always within range.
            start = unsafe { Self::cell_ptr(page, 1) };
        }
        let end = Self::end_ptr(page);
        let mut max_block = cells_base;

        let mut block = start;
        while block != end {
            // SAFETY: `block` is within `[cells_base, end)` by the chain invariant.
            let cell = unsafe { &*block };
            // SAFETY: `max_block` is within the array.
            if !cell.is_allocated() && cell.size() > unsafe { (*max_block).size() } {
                max_block = block;
                if cell.size() >= cells_needed {
                    this.cur_block = max_block;
                    return;
                }
            }
            block = unsafe { cell.next() };
        }
        // SAFETY: index 1 is always within range.
        let first = unsafe { Self::cell_ptr(page, 1) };
        let mut block = first;
        while block != start {
            let cell = unsafe { &*block };
            if !cell.is_allocated() && cell.size() > unsafe { (*max_block).size() } {
                max_block = block;
                if cell.size() >= cells_needed {
                    this.cur_block = max_block;
                    return;
                }
            }
            block = unsafe { cell.next() };
        }
        this.cur_block = max_block;
    }

    fn allocated_size_bytes(page: *mut Self) -> usize {
        let end = Self::end_ptr(page);
        // SAFETY: index 1 is always within range; the chain terminates at `end`.
        let mut block = unsafe { Self::cell_ptr(page, 1) };
        let mut total = 0usize;
        while block != end {
            let cell = unsafe { &*block };
            if cell.is_allocated() {
                total += cell.size() as usize * CELL_SIZE;
            }
            block = unsafe { cell.next() };
        }
        total
    }

    /// Sweeps every allocated block, deallocating the dead ones, then
    /// coalesces adjacent free runs and repositions `cur_block` at the
    /// largest surviving free run. Returns `true` iff any bytes remain alive.
    ///
    /// # Safety
    /// `page` must point at a live, exclusively-owned `NextFitPage`; every
    /// allocated block must hold a live instance of a type managed by `M`.
    pub unsafe fn sweep<M: ObjectModel>(
        page: *mut Self,
        finalizer_queue: &FinalizerQueue,
        scope: &mut impl SweepScope,
        heap_tracker: &HeapSizeTracker,
    ) -> bool {
        let this = unsafe { &mut *page };
        let end = Self::end_ptr(page);
        let mut alive_bytes: u64 = 0;

        // SAFETY: index 1 is always within range.
        let mut block = unsafe { Self::cell_ptr(page, 1) };
        while block != end {
            // SAFETY: `block` is within the chain by its invariant.
            let cell = unsafe { &mut *block };
            let next = unsafe { cell.next() };
            if cell.is_allocated() {
                // SAFETY: allocated cells hold live instances by contract.
                let object = unsafe { NonNull::new_unchecked(cell.payload()) };
                // SAFETY: forwarded from this function's contract.
                if unsafe { sweep::sweep_object::<M>(object, finalizer_queue, scope) } {
                    alive_bytes += u64::from(cell.size()) * CELL_SIZE as u64;
                } else {
                    // SAFETY: `cell` points into this page's cell array.
                    unsafe { cell.deallocate() };
                }
            }
            block = next;
        }

        let mut max_block = unsafe { Self::cell_ptr(page, 0) };
        let mut block = unsafe { Self::cell_ptr(page, 1) };
        while block != end {
            let cell = unsafe { &mut *block };
            if cell.is_allocated() {
                block = unsafe { cell.next() };
                continue;
            }
            loop {
                let next = unsafe { cell.next() };
                if next == end {
                    break;
                }
                // SAFETY: `next` is within the chain by its invariant.
                let next_cell = unsafe { &*next };
                if next_cell.is_allocated() {
                    break;
                }
                // SAFETY: merging two adjacent free blocks into one.
                unsafe {
                    let merged_size = cell.size() + next_cell.size();
                    std::ptr::write_bytes(next, 0, 1);
                    *block = Cell::free(merged_size);
                }
            }
            // SAFETY: `max_block` is within the array.
            if cell.size() > unsafe { (*max_block).size() } {
                max_block = block;
            }
            block = unsafe { cell.next() };
        }
        this.cur_block = max_block;

        debug_assert_eq!(
            alive_bytes,
            Self::allocated_size_bytes(page) as u64,
            "sweep's alive byte count disagrees with a direct scan"
        );
        this.tracker.after_sweep(alive_bytes as usize, heap_tracker);

        alive_bytes > 0
    }

    /// Visits every allocated block's payload pointer, in chain order.
    pub fn traverse_allocated_blocks(page: *mut Self, mut visit: impl FnMut(NonNull<u8>)) {
        let end = Self::end_ptr(page);
        // SAFETY: index 1 is always within range.
        let mut block = unsafe { Self::cell_ptr(page, 1) };
        while block != end {
            // SAFETY: `block` is within the chain by its invariant.
            let cell = unsafe { &*block };
            if cell.is_allocated() {
                // SAFETY: allocated cells hold live instances by contract.
                visit(unsafe { NonNull::new_unchecked(cell.payload()) });
            }
            block = unsafe { cell.next() };
        }
    }
}

unsafe impl Page for NextFitPage {
    fn create(_cell_count: u32, scheduler: &dyn GcScheduler) -> *mut Self {
        // SAFETY: `NEXT_FIT_PAGE_SIZE` fits the header plus a whole number of
        // cells, and the OS hands back zeroed memory.
        let ptr = unsafe { raw::safe_alloc(NEXT_FIT_PAGE_SIZE as u64, scheduler) };
        let page = ptr.cast::<Self>();
        // SAFETY: `page` was just procured, zeroed, and sized for `Self`.
        let cells_base = unsafe { page.add(1).cast::<Cell>() };
        #[cfg(feature = "tracing")]
        tracing::debug!(cell_count = Self::cell_count(), "NextFitPage::create");
        unsafe {
            page.write(Self {
                next: AtomicPtr::new(std::ptr::null_mut()),
                tracker: PageSizeTracker::new(),
                cur_block: cells_base,
            });
            cells_base.write(Cell::free(0));
            cells_base.add(1).write(Cell::free(Self::cell_count() as u32 - 1));
        }
        page
    }

    unsafe fn destroy(page: *mut Self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(page = ?page, "NextFitPage::destroy");
        // SAFETY: forwarded from this function's contract; `page` was
        // procured by `create` with the same size.
        unsafe { raw::free(page.cast::<u8>(), NEXT_FIT_PAGE_SIZE as u64) };
    }
}
