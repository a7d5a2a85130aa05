//! `CustomAllocator<M>` — one per mutator thread: caches the page each tier
//! is currently bump-allocating from, and routes requests between tiers.

use std::ptr::NonNull;

use crate::cell::AllocationSize;
use crate::config::{FIXED_BLOCK_MAX_BLOCK_SIZE, MAX_PAGE_ACQUIRE_RETRIES};
use crate::extra_object::{ExtraObjectData, SWEEPABLE};
use crate::heap::Heap;
use crate::object_model::{ObjectModel, HAS_FINALIZER};
use crate::page::{ExtraObjectPage, FixedBlockPage, NextFitPage, SingleObjectPage};
use crate::sweep::FinalizerQueue;

/// Per-thread allocation front end. Not `Sync`: exactly one mutator thread
/// drives a given instance, matching the teacher's thread-local allocator
/// discipline.
pub struct CustomAllocator<'heap, M: ObjectModel> {
    heap: &'heap Heap<M>,
    next_fit_page: Option<NonNull<NextFitPage>>,
    fixed_block_pages: [Option<NonNull<FixedBlockPage>>; FIXED_BLOCK_MAX_BLOCK_SIZE + 1],
    extra_object_page: Option<NonNull<ExtraObjectPage>>,
    finalizer_queue: FinalizerQueue,
}

impl<'heap, M: ObjectModel> CustomAllocator<'heap, M> {
    #[must_use]
    pub fn new(heap: &'heap Heap<M>) -> Self {
        Self {
            heap,
            next_fit_page: None,
            fixed_block_pages: [None; FIXED_BLOCK_MAX_BLOCK_SIZE + 1],
            extra_object_page: None,
            finalizer_queue: FinalizerQueue::new(),
        }
    }

    /// Allocates a scalar object of `type_info`, installing its type-info (or
    /// meta, if the type carries a finalizer) pointer.
    pub fn allocate_object(&mut self, type_info: M::TypeInfo) -> NonNull<u8> {
        let size = M::instance_size(type_info);
        let object = self.allocate(size);
        // SAFETY: `object` was just allocated with room for `type_info`'s instance.
        unsafe { M::install_type_info(object, type_info) };
        if M::type_info_bits(type_info) & HAS_FINALIZER != 0 {
            let extra = self.allocate_extra_object_data(object);
            // SAFETY: `object` was just allocated; `extra` was just attached to it.
            unsafe { M::install_meta(object, extra) };
        }
        object
    }

    /// Allocates an array of `count` elements of `type_info`. Arrays never
    /// carry an `ExtraObjectData`/finalizer, matching the source's
    /// `CreateArray`, which sets the type-info-or-meta pointer directly
    /// regardless of `HAS_FINALIZER`.
    pub fn allocate_array(&mut self, type_info: M::TypeInfo, count: u32) -> NonNull<u8> {
        let size = M::array_size(type_info, count);
        let object = self.allocate(size);
        // SAFETY: `object` was just allocated with room for `count` elements.
        unsafe { M::install_type_info(object, type_info) };
        object
    }

    /// Attaches a fresh `ExtraObjectData` to `object`.
    pub fn allocate_extra_object_data(&mut self, object: NonNull<u8>) -> NonNull<ExtraObjectData> {
        for _ in 0..MAX_PAGE_ACQUIRE_RETRIES {
            if let Some(page) = self.extra_object_page {
                if let Some(extra) = ExtraObjectPage::try_allocate(page.as_ptr(), object.as_ptr()) {
                    return extra;
                }
            }
            let page = self.heap.get_extra_object_page();
            self.extra_object_page = NonNull::new(page);
        }
        fatal_retry_exhausted("ExtraObjectPage");
    }

    /// Marks previously-allocated extra data sweepable without ever having
    /// attached it, so the next sweep reclaims it without routing it through
    /// the finalizer path.
    pub fn destroy_unattached_extra_object_data(extra: NonNull<ExtraObjectData>) {
        // SAFETY: `extra` was returned by `allocate_extra_object_data` and is
        // not yet reachable from any object, so no one else observes it.
        unsafe {
            (*extra.as_ptr()).unlink_from_base_object();
            (*extra.as_ptr()).set_flag(SWEEPABLE);
        }
    }

    /// Drops all cached pages. Called by the heap under STW before a sweep.
    pub fn prepare_for_gc(&mut self) {
        self.next_fit_page = None;
        self.fixed_block_pages = [None; FIXED_BLOCK_MAX_BLOCK_SIZE + 1];
        self.extra_object_page = None;
    }

    fn allocate(&mut self, size: u64) -> NonNull<u8> {
        let cell_count = AllocationSize::bytes_at_least(size).in_cells() as u32;
        if cell_count <= FixedBlockPage::MAX_BLOCK_SIZE {
            self.allocate_in_fixed_block_page(cell_count.max(2))
        } else if cell_count > NextFitPage::max_block_size() {
            self.allocate_in_single_object_page(cell_count)
        } else {
            self.allocate_in_next_fit_page(cell_count)
        }
    }

    fn allocate_in_fixed_block_page(&mut self, block_size: u32) -> NonNull<u8> {
        let scheduler = self.heap.scheduler();
        let size_tracker = self.heap.size_tracker();
        for _ in 0..MAX_PAGE_ACQUIRE_RETRIES {
            if let Some(page) = self.fixed_block_pages[block_size as usize] {
                if let Some(ptr) = FixedBlockPage::try_allocate(page.as_ptr(), size_tracker, scheduler) {
                    return ptr;
                }
            }
            let page = self.heap.get_fixed_block_page(block_size, &self.finalizer_queue);
            self.fixed_block_pages[block_size as usize] = NonNull::new(page);
        }
        fatal_retry_exhausted("FixedBlockPage")
    }

    fn allocate_in_next_fit_page(&mut self, block_size: u32) -> NonNull<u8> {
        let scheduler = self.heap.scheduler();
        let size_tracker = self.heap.size_tracker();
        for _ in 0..MAX_PAGE_ACQUIRE_RETRIES {
            if let Some(page) = self.next_fit_page {
                if let Some(ptr) = NextFitPage::try_allocate(page.as_ptr(), block_size, size_tracker, scheduler) {
                    return ptr;
                }
            }
            let page = self.heap.get_next_fit_page(&self.finalizer_queue);
            self.next_fit_page = NonNull::new(page);
        }
        fatal_retry_exhausted("NextFitPage")
    }

    fn allocate_in_single_object_page(&mut self, cell_count: u32) -> NonNull<u8> {
        let page = self.heap.get_single_object_page(cell_count);
        SingleObjectPage::payload(page)
    }
}

impl<M: ObjectModel> Drop for CustomAllocator<'_, M> {
    fn drop(&mut self) {
        self.heap.add_to_finalizer_queue(&self.finalizer_queue);
    }
}

/// `PageStore::get_page` is specified to always eventually produce a usable
/// page via `NewPage`, which never fails; exceeding the retry bound means
/// that invariant broke, not that the caller should keep looping.
fn fatal_retry_exhausted(tier: &str) -> ! {
    #[cfg(feature = "tracing")]
    tracing::error!(tier, retries = MAX_PAGE_ACQUIRE_RETRIES, "page acquisition retry bound exceeded");
    panic!("{tier}: exceeded {MAX_PAGE_ACQUIRE_RETRIES} page-acquisition retries; PageStore invariant violated");
}
