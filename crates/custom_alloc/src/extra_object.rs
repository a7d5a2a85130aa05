//! `ExtraObjectData` — the side-table record attached to objects that need a
//! finalizer, an associated native object, or a regular (non-tracked) weak
//! reference — and `ExtraObjectCell`, the page-resident slot that holds one.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};

use crate::atomic_stack::Linked;

/// Set once an object's extra data has been pushed onto a finalizer queue, so
/// sweep does not enqueue it a second time on a later GC cycle.
pub const IN_FINALIZER_QUEUE: u8 = 1 << 0;
/// Set by the external finalizer processor once it has run the object's
/// finalizer.
pub const FINALIZED: u8 = 1 << 1;
/// Set by sweep once an extra object has nothing left attached to it and its
/// cell may be returned to the page's free list.
pub const SWEEPABLE: u8 = 1 << 2;

/// Side-table metadata for one object: which object it is attached to (if
/// any) and its finalization state flags.
pub struct ExtraObjectData {
    base_object: AtomicPtr<u8>,
    flags: AtomicU8,
}

impl ExtraObjectData {
    /// Initializes a fresh `ExtraObjectData` pointing at `object`.
    pub fn init(&mut self, object: *mut u8) {
        self.base_object = AtomicPtr::new(object);
        self.flags = AtomicU8::new(0);
    }

    #[must_use]
    pub fn get_flag(&self, bit: u8) -> bool {
        self.flags.load(Ordering::Relaxed) & bit != 0
    }

    pub fn set_flag(&self, bit: u8) {
        self.flags.fetch_or(bit, Ordering::Relaxed);
    }

    /// The object this extra data is attached to, or `None` if unattached
    /// (e.g. after [`Self::unlink_from_base_object`]).
    #[must_use]
    pub fn base_object(&self) -> Option<NonNull<u8>> {
        NonNull::new(self.base_object.load(Ordering::Relaxed))
    }

    pub fn unlink_from_base_object(&self) {
        self.base_object.store(std::ptr::null_mut(), Ordering::Relaxed);
    }

    /// Clears any non-tracked ("regular") weak reference pointed at this
    /// object. Weak-reference bookkeeping belongs to the broader object
    /// model and is not reimplemented here; runtimes that need it should
    /// override by wrapping allocation through their own `ObjectModel`.
    pub fn clear_regular_weak_reference(&self) {}
}

/// A page-resident slot: either free (linked into the page's free list via
/// `next`) or holding a live `ExtraObjectData`. The same `next` field is
/// reused, once allocated, to link the cell into a finalizer queue.
#[repr(C, align(8))]
pub struct ExtraObjectCell {
    next: AtomicPtr<ExtraObjectCell>,
    /// Distinguishes a free slot (threaded into the page's free list) from an
    /// initialized `ExtraObjectData`, since the free list reuses `next` and
    /// leaves `data` uninitialized.
    allocated: AtomicBool,
    data: UnsafeCell<MaybeUninit<ExtraObjectData>>,
}

unsafe impl Linked for ExtraObjectCell {
    fn atomic_next(&self) -> &AtomicPtr<Self> {
        &self.next
    }
}

impl ExtraObjectCell {
    /// Size of a cell, rounded up to whole allocation cells.
    #[must_use]
    pub const fn size_in_bytes() -> usize {
        std::mem::size_of::<Self>()
    }

    /// Links this (free) cell to `next` in a page's free list.
    pub fn set_free_next(&self, next: *mut ExtraObjectCell) {
        self.allocated.store(false, Ordering::Relaxed);
        self.next.store(next, Ordering::Relaxed);
    }

    #[must_use]
    pub fn free_next(&self) -> *mut ExtraObjectCell {
        self.next.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Marks this cell allocated and initializes its payload in one step.
    ///
    /// # Safety
    /// `self` must currently be a free, unlinked (just-popped) cell.
    pub unsafe fn allocate(&self, object: *mut u8) -> *mut ExtraObjectData {
        self.allocated.store(true, Ordering::Relaxed);
        let data = self.data();
        // SAFETY: forwarded from this function's contract.
        unsafe { (*data).init(object) };
        data
    }

    /// Pointer to the payload slot. Only valid to dereference as
    /// `ExtraObjectData` once initialized via [`ExtraObjectData::init`].
    #[must_use]
    pub fn data(&self) -> *mut ExtraObjectData {
        self.data.get().cast::<ExtraObjectData>()
    }

    /// Recovers the enclosing cell from a pointer to its payload, via the
    /// same reverse pointer-arithmetic the finalizer queue needs to turn a
    /// `*mut ExtraObjectData` (all sweep sees) back into the intrusively
    /// linkable cell.
    ///
    /// # Safety
    /// `data` must point at the `data` field of a live `ExtraObjectCell`.
    #[must_use]
    pub unsafe fn from_extra_object(data: *mut ExtraObjectData) -> *mut ExtraObjectCell {
        let offset = std::mem::offset_of!(ExtraObjectCell, data);
        unsafe { data.cast::<u8>().sub(offset).cast::<ExtraObjectCell>() }
    }
}
