//! `ExtraObjectPage` — a fixed pool of [`ExtraObjectCell`] slots, free-listed
//! like `FixedBlockPage` but never bump-allocated: every slot is the same
//! size, so the whole pool is threaded onto the free list up front.

use std::ptr::NonNull;
use std::sync::atomic::AtomicPtr;

use crate::atomic_stack::Linked;
use crate::config::EXTRA_OBJECT_PAGE_SIZE;
use crate::extra_object::{ExtraObjectCell, ExtraObjectData};
use crate::page_store::Page;
use crate::raw;
use crate::sweep::{self, GcScheduler};

/// Page serving fixed-size `ExtraObjectData` slots from a free list.
#[repr(C, align(8))]
pub struct ExtraObjectPage {
    next: AtomicPtr<ExtraObjectPage>,
    free_list: *mut ExtraObjectCell,
}

unsafe impl Linked for ExtraObjectPage {
    fn atomic_next(&self) -> &AtomicPtr<Self> {
        &self.next
    }
}

// SAFETY: `free_list` is only touched by whichever thread currently holds
// this page (exclusively via `used`, or cooperatively one at a time during a
// sweep popped off `unswept`).
unsafe impl Send for ExtraObjectPage {}

impl ExtraObjectPage {
    #[must_use]
    pub const fn slot_count() -> usize {
        (EXTRA_OBJECT_PAGE_SIZE - std::mem::size_of::<Self>()) / ExtraObjectCell::size_in_bytes()
    }

    /// # Safety
    /// `page` must point at a live `ExtraObjectPage` and `index` must be
    /// within `[0, Self::slot_count())`.
    unsafe fn slot_ptr(page: *mut Self, index: usize) -> *mut ExtraObjectCell {
        // SAFETY: the slot array directly trails the header.
        unsafe { page.add(1).cast::<ExtraObjectCell>().add(index) }
    }

    /// Pops a free slot and initializes it to point at `object`. `None` if
    /// the page's free list is exhausted.
    pub fn try_allocate(page: *mut Self, object: *mut u8) -> Option<NonNull<ExtraObjectData>> {
        // SAFETY: `page` is a live page exclusively owned by the caller.
        let this = unsafe { &mut *page };
        let slot = this.free_list;
        if slot.is_null() {
            return None;
        }
        // SAFETY: `slot` is the head of this page's free list.
        let slot_ref = unsafe { &*slot };
        this.free_list = slot_ref.free_next();
        // SAFETY: `slot` was just popped off the free list, uniquely owned.
        let data = unsafe { slot_ref.allocate(object) };
        NonNull::new(data)
    }

    /// Sweeps every slot currently marked allocated, returning dead ones to
    /// the free list. Returns `true` iff at least one slot remains allocated.
    pub fn sweep(page: *mut Self) -> bool {
        // SAFETY: `page` is a live page exclusively owned by the caller.
        let this = unsafe { &mut *page };
        let mut any_alive = false;
        for index in 0..Self::slot_count() {
            // SAFETY: `index` is within `[0, slot_count())`.
            let slot = unsafe { Self::slot_ptr(page, index) };
            // SAFETY: `slot` is a live cell within this page.
            let slot_ref = unsafe { &*slot };
            if !slot_ref.is_allocated() {
                continue;
            }
            // SAFETY: allocated slots hold an initialized `ExtraObjectData`.
            let data = unsafe { &*slot_ref.data() };
            if sweep::sweep_extra_object(data) {
                any_alive = true;
            } else {
                slot_ref.set_free_next(this.free_list);
                this.free_list = slot;
            }
        }
        any_alive
    }

    /// Visits every currently-allocated slot's data pointer.
    pub fn traverse_allocated(page: *mut Self, mut visit: impl FnMut(NonNull<ExtraObjectData>)) {
        for index in 0..Self::slot_count() {
            // SAFETY: `index` is within `[0, slot_count())`.
            let slot = unsafe { Self::slot_ptr(page, index) };
            // SAFETY: `slot` is a live cell within this page.
            let slot_ref = unsafe { &*slot };
            if slot_ref.is_allocated() {
                // SAFETY: allocated slots hold an initialized `ExtraObjectData`.
                visit(unsafe { NonNull::new_unchecked(slot_ref.data()) });
            }
        }
    }
}

unsafe impl Page for ExtraObjectPage {
    fn create(_cell_count: u32, scheduler: &dyn GcScheduler) -> *mut Self {
        // SAFETY: `EXTRA_OBJECT_PAGE_SIZE` fits the header plus a whole
        // number of slots, and the OS hands back zeroed memory.
        let ptr = unsafe { raw::safe_alloc(EXTRA_OBJECT_PAGE_SIZE as u64, scheduler) };
        let page = ptr.cast::<Self>();
        #[cfg(feature = "tracing")]
        tracing::debug!(slot_count = Self::slot_count(), "ExtraObjectPage::create");
        // SAFETY: `page` was just procured, zeroed, and sized for `Self`.
        unsafe {
            page.write(Self {
                next: AtomicPtr::new(std::ptr::null_mut()),
                free_list: std::ptr::null_mut(),
            });
        }
        let mut head = std::ptr::null_mut();
        for index in (0..Self::slot_count()).rev() {
            // SAFETY: `index` is within `[0, slot_count())`.
            let slot = unsafe { Self::slot_ptr(page, index) };
            // SAFETY: `slot` is freshly procured, zeroed memory of the right
            // layout; it is safe to reference before being individually
            // initialized since `ExtraObjectCell`'s fields are all
            // zero-valid (`AtomicPtr`, `AtomicBool`, `MaybeUninit`).
            unsafe { (*slot).set_free_next(head) };
            head = slot;
        }
        // SAFETY: `page` was just written above.
        unsafe { (*page).free_list = head };
        page
    }

    unsafe fn destroy(page: *mut Self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(page = ?page, "ExtraObjectPage::destroy");
        // SAFETY: forwarded from this function's contract; `page` was
        // procured by `create` with the same size.
        unsafe { raw::free(page.cast::<u8>(), EXTRA_OBJECT_PAGE_SIZE as u64) };
    }
}
