//! `FixedBlockPage` — bump-allocates fixed-size blocks (2–128 cells), then
//! free-lists the cells sweep reclaims.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::allocated_size_tracker::{HeapSizeTracker, PageSizeTracker};
use crate::atomic_stack::Linked;
use crate::config::{CELL_SIZE, FIXED_BLOCK_PAGE_SIZE};
use crate::object_model::ObjectModel;
use crate::page_store::Page;
use crate::raw;
use crate::sweep::{self, FinalizerQueue, GcScheduler, SweepScope};

/// A half-open range `[first, last)` of unoccupied, contiguous cell indices,
/// or (when threaded through a dead cell's slot) the head of the free list.
#[derive(Clone, Copy)]
#[repr(C, align(8))]
struct FixedCellRange {
    first: u32,
    last: u32,
}

/// One cell-sized slot: either live block payload, or — while free — a
/// `FixedCellRange` pointing at the next free run.
#[repr(C, align(8))]
struct FixedBlockCell {
    bytes: [u8; CELL_SIZE],
}

impl FixedBlockCell {
    fn data(&self) -> *mut u8 {
        std::ptr::addr_of!(self.bytes).cast::<u8>().cast_mut()
    }

    fn read_next_free(&self) -> FixedCellRange {
        // SAFETY: a free cell's bytes were written as a `FixedCellRange` by
        // sweep when the run it heads was last rewritten; same 8-byte
        // alignment on both sides.
        unsafe { *self.data().cast::<FixedCellRange>() }
    }

    fn zero(&mut self) {
        // SAFETY: `data()` is valid for `CELL_SIZE` bytes.
        unsafe { std::ptr::write_bytes(self.data(), 0, CELL_SIZE) };
    }
}

/// Page serving exactly one block size for its entire lifetime.
#[repr(C, align(8))]
pub struct FixedBlockPage {
    next: AtomicPtr<FixedBlockPage>,
    tracker: PageSizeTracker,
    next_free: FixedCellRange,
    block_size: u32,
    end: u32,
}

unsafe impl Linked for FixedBlockPage {
    fn atomic_next(&self) -> &AtomicPtr<Self> {
        &self.next
    }
}

impl FixedBlockPage {
    /// Largest block size (in cells) a `FixedBlockPage` may serve; beyond
    /// this a `NextFitPage` is used instead.
    pub const MAX_BLOCK_SIZE: u32 = 128;

    const fn cell_count() -> usize {
        (FIXED_BLOCK_PAGE_SIZE - std::mem::size_of::<Self>()) / std::mem::size_of::<FixedBlockCell>()
    }

    /// # Safety
    /// `page` must point at a live `FixedBlockPage` and `index` must be
    /// within its cells array.
    unsafe fn cell_ptr(page: *mut Self, index: u32) -> *mut FixedBlockCell {
        // SAFETY: the cells array directly trails the header, matching this
        // type's `repr(C, align(8))` layout with no declared tail field.
        unsafe { page.add(1).cast::<FixedBlockCell>().add(index as usize) }
    }

    /// Tries to bump-allocate (or reclaim from the free list) one block.
    /// Returns `None` once the page has neither bump space nor free cells
    /// left, after reporting the overflow to byte accounting.
    pub fn try_allocate(page: *mut Self, heap_tracker: &HeapSizeTracker, scheduler: &dyn GcScheduler) -> Option<NonNull<u8>> {
        // SAFETY: `page` is a live page exclusively owned by the caller.
        let this = unsafe { &mut *page };
        let next = this.next_free.first;
        if next < this.next_free.last {
            this.next_free.first += this.block_size;
            // SAFETY: `next` is within `[0, end)` by the range invariant.
            let cell = unsafe { &mut *Self::cell_ptr(page, next) };
            return NonNull::new(cell.data());
        }
        if next >= this.end {
            this.tracker
                .on_page_overflow(this.end as usize * CELL_SIZE, heap_tracker, scheduler);
            return None;
        }
        // SAFETY: `next < end` by the check above.
        let cell = unsafe { &mut *Self::cell_ptr(page, next) };
        this.next_free = cell.read_next_free();
        cell.zero();
        NonNull::new(cell.data())
    }

    /// Reclaims dead blocks into the free list, rewriting it in one pass
    /// over the page. Returns `true` iff at least one block survives.
    ///
    /// # Safety
    /// `page` must point at a live, exclusively-owned `FixedBlockPage`; every
    /// occupied cell must hold a live instance of a type managed by `M`.
    pub unsafe fn sweep<M: ObjectModel>(
        page: *mut Self,
        finalizer_queue: &FinalizerQueue,
        scope: &mut impl SweepScope,
        heap_tracker: &HeapSizeTracker,
    ) -> bool {
        // SAFETY: forwarded from the caller's contract.
        let this = unsafe { &mut *page };
        let block_size = this.block_size;
        let end = this.end;
        let mut next_free = this.next_free;
        let mut prev_range: *mut FixedCellRange = std::ptr::addr_of_mut!(this.next_free);
        // Wraps so the first alive cell at index 0 computes a zero-length
        // preceding dead run instead of needing a special case.
        let mut prev_live: i64 = -i64::from(block_size);
        let mut alive_blocks: u64 = 0;
        let mut cell: u32 = 0;

        loop {
            while cell < next_free.first {
                // SAFETY: `cell` indexes an occupied block within the page.
                let cell_ptr = unsafe { &*Self::cell_ptr(page, cell) };
                // SAFETY: occupied cells hold live instances by contract.
                let object = unsafe { NonNull::new_unchecked(cell_ptr.data()) };
                // SAFETY: forwarded from this function's contract.
                let alive = unsafe { sweep::sweep_object::<M>(object, finalizer_queue, scope) };
                if alive {
                    alive_blocks += 1;
                    if prev_live + i64::from(block_size) < i64::from(cell) {
                        let prev_cell = cell - block_size;
                        let zero_start = (prev_live + i64::from(block_size)) as u32;
                        let zero_cells = (i64::from(prev_cell) - prev_live) as usize;
                        // SAFETY: `[zero_start, zero_start + zero_cells)` is
                        // the run of cells just established to be dead.
                        unsafe {
                            std::ptr::write_bytes(Self::cell_ptr(page, zero_start), 0, zero_cells);
                            (*prev_range).first = zero_start;
                            (*prev_range).last = prev_cell;
                            prev_range = Self::cell_ptr(page, prev_cell).cast::<FixedCellRange>();
                        }
                    }
                    prev_live = i64::from(cell);
                }
                cell += block_size;
            }
            if next_free.last < end {
                cell = next_free.last;
                // SAFETY: `cell` is the head of a previously-recorded free run.
                next_free = unsafe { (*Self::cell_ptr(page, cell)).read_next_free() };
                continue;
            }
            let zero_start = (prev_live + i64::from(block_size)) as u32;
            let zero_cells = (i64::from(cell) - prev_live - i64::from(block_size)) as usize;
            // SAFETY: `[zero_start, zero_start + zero_cells)` is the trailing
            // dead run up to the page's end.
            unsafe {
                (*prev_range).first = zero_start;
                std::ptr::write_bytes(Self::cell_ptr(page, zero_start), 0, zero_cells);
                (*prev_range).last = end;
            }
            break;
        }

        this.tracker
            .after_sweep(alive_blocks as usize * block_size as usize * CELL_SIZE, heap_tracker);

        this.next_free.first > 0 || this.next_free.last < end
    }

    /// Visits every occupied block's payload pointer, in index order.
    pub fn traverse_allocated_blocks(page: *mut Self, mut visit: impl FnMut(NonNull<u8>)) {
        // SAFETY: `page` is a live page; read-only traversal.
        let this = unsafe { &*page };
        let mut next_free = this.next_free;
        let mut cell = 0u32;
        while cell < this.end {
            while cell < next_free.first {
                // SAFETY: `cell` indexes an occupied block.
                let cell_ref = unsafe { &*Self::cell_ptr(page, cell) };
                // SAFETY: occupied cells hold live instances by contract.
                visit(unsafe { NonNull::new_unchecked(cell_ref.data()) });
                cell += this.block_size;
            }
            if next_free.last >= this.end {
                break;
            }
            cell = next_free.last;
            // SAFETY: `cell` is the head of a previously-recorded free run.
            next_free = unsafe { (*Self::cell_ptr(page, cell)).read_next_free() };
        }
    }
}

unsafe impl Page for FixedBlockPage {
    fn create(block_size: u32, scheduler: &dyn GcScheduler) -> *mut Self {
        debug_assert!(block_size >= 2 && block_size <= Self::MAX_BLOCK_SIZE, "blockSize out of range for FixedBlockPage");
        // SAFETY: `FIXED_BLOCK_PAGE_SIZE` fits the header plus a whole number
        // of cells, and the OS hands back zeroed memory.
        let ptr = unsafe { raw::safe_alloc(FIXED_BLOCK_PAGE_SIZE as u64, scheduler) };
        let page = ptr.cast::<Self>();
        let end = (Self::cell_count() as u32 / block_size) * block_size;
        #[cfg(feature = "tracing")]
        tracing::debug!(block_size, end, "FixedBlockPage::create");
        // SAFETY: `page` was just procured, zeroed, and sized for `Self`.
        unsafe {
            page.write(Self {
                next: AtomicPtr::new(std::ptr::null_mut()),
                tracker: PageSizeTracker::new(),
                next_free: FixedCellRange { first: 0, last: end },
                block_size,
                end,
            });
        }
        page
    }

    unsafe fn destroy(page: *mut Self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(page = ?page, "FixedBlockPage::destroy");
        // SAFETY: forwarded from this function's contract; `page` was
        // procured by `create` with the same size.
        unsafe { raw::free(page.cast::<u8>(), FIXED_BLOCK_PAGE_SIZE as u64) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extra_object::ExtraObjectData;
    use crate::sweep::NullSweepScope;

    struct NoFinalizers;

    impl ObjectModel for NoFinalizers {
        type TypeInfo = ();

        fn type_info_bits(_: ()) -> u32 {
            0
        }
        fn instance_size(_: ()) -> u64 {
            CELL_SIZE as u64
        }
        fn array_element_size(_: ()) -> u64 {
            0
        }
        fn array_header_size(_: ()) -> u64 {
            0
        }
        unsafe fn install_type_info(_: NonNull<u8>, _: ()) {}
        unsafe fn install_meta(_: NonNull<u8>, _: NonNull<ExtraObjectData>) {}
        unsafe fn try_reset_mark(object: NonNull<u8>) -> bool {
            // SAFETY: test double; the first byte is the liveness flag.
            unsafe { *object.as_ptr() != 0 }
        }
        unsafe fn extra_object(_: NonNull<u8>) -> Option<NonNull<ExtraObjectData>> {
            None
        }
        unsafe fn allocated_heap_size(_: NonNull<u8>) -> u64 {
            CELL_SIZE as u64
        }
    }

    #[test]
    fn allocate_then_sweep_reclaims_dead_blocks() {
        let heap_tracker = HeapSizeTracker::new();
        let scheduler = crate::sweep::NoopScheduler;
        let page = FixedBlockPage::create(2, &scheduler);

        let a = FixedBlockPage::try_allocate(page, &heap_tracker, &scheduler).unwrap();
        let b = FixedBlockPage::try_allocate(page, &heap_tracker, &scheduler).unwrap();
        unsafe {
            *a.as_ptr() = 1; // alive
            *b.as_ptr() = 0; // dead
        }

        let finalizer_queue = FinalizerQueue::new();
        let mut scope = NullSweepScope;
        let survives = unsafe { FixedBlockPage::sweep::<NoFinalizers>(page, &finalizer_queue, &mut scope, &heap_tracker) };
        assert!(survives);

        let mut seen = vec![];
        FixedBlockPage::traverse_allocated_blocks(page, |p| seen.push(p));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], a);

        unsafe { FixedBlockPage::destroy(page) };
    }

    #[test]
    fn fully_dead_page_reports_not_surviving() {
        let heap_tracker = HeapSizeTracker::new();
        let scheduler = crate::sweep::NoopScheduler;
        let page = FixedBlockPage::create(4, &scheduler);
        let a = FixedBlockPage::try_allocate(page, &heap_tracker, &scheduler).unwrap();
        unsafe { *a.as_ptr() = 0 };

        let finalizer_queue = FinalizerQueue::new();
        let mut scope = NullSweepScope;
        let survives = unsafe { FixedBlockPage::sweep::<NoFinalizers>(page, &finalizer_queue, &mut scope, &heap_tracker) };
        assert!(!survives);

        unsafe { FixedBlockPage::destroy(page) };
    }
}
