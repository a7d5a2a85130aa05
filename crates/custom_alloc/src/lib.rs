//! A three-tier segregated-fit heap allocator for a managed runtime.
//!
//! Allocations route to one of three page kinds by size: fixed 2–128 cell
//! blocks ([`page::FixedBlockPage`]), larger variable-size blocks served by a
//! next-fit search ([`page::NextFitPage`]), and oversized objects each given
//! a dedicated page ([`page::SingleObjectPage`]). A fourth page kind
//! ([`page::ExtraObjectPage`]) holds finalizer/associated-object metadata.
//!
//! Every page kind shares the same four-queue lifecycle
//! ([`page_store::PageStore`]): `empty → used → unswept → {ready, empty}`.
//! Mutator threads can cooperatively assist an in-progress GC sweep when
//! they run out of cached pages, rather than blocking on it.
//!
//! The allocator is generic over [`object_model::ObjectModel`], the
//! embedding runtime's boundary for mark queries, extra-object lookup, and
//! type sizing — there is no GC or object layout logic in this crate itself.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

pub mod allocated_size_tracker;
pub mod atomic_stack;
pub mod cell;
pub mod config;
pub mod custom_allocator;
pub mod extra_object;
pub mod heap;
pub mod object_model;
pub mod page;
pub mod page_store;
pub mod raw;
pub mod sweep;

use sweep::SweepScope;

pub use cell::{AllocationSize, Cell};
pub use custom_allocator::CustomAllocator;
pub use extra_object::ExtraObjectData;
pub use heap::Heap;
pub use object_model::{ObjectModel, HAS_FINALIZER, IS_ARRAY};
pub use sweep::{FinalizerQueue, GcScheduler, NoopScheduler, NullSweepScope};

/// Per-thread allocation handle, as seen by the embedding runtime.
pub type ThreadData<'heap, M> = CustomAllocator<'heap, M>;

/// Process-wide entry point: owns the [`Heap`] and hands out [`ThreadData`]
/// per mutator thread.
pub struct Allocator<M: ObjectModel> {
    heap: Heap<M>,
}

impl<M: ObjectModel> Allocator<M> {
    /// Builds a fresh allocator backed by a new, empty heap.
    #[must_use]
    pub fn new(scheduler: Box<dyn GcScheduler + Send + Sync>) -> Self {
        Self {
            heap: Heap::new(scheduler),
        }
    }

    /// Creates a new per-thread allocation handle.
    #[must_use]
    pub fn new_thread_data(&self) -> ThreadData<'_, M> {
        CustomAllocator::new(&self.heap)
    }

    /// Drops every cached page across every thread tier. Must be called
    /// under STW, and only after every live [`ThreadData`] has had
    /// [`CustomAllocator::prepare_for_gc`] called on it.
    pub fn prepare_for_gc(&self) {
        self.heap.prepare_for_gc();
    }

    /// Drives a full sweep pass and returns the accumulated finalizer queue
    /// for the GC's finalizer processor to drain.
    pub fn sweep(&self, scope: &mut impl SweepScope) -> FinalizerQueue {
        self.heap.sweep(scope)
    }

    /// Current OS-backed footprint across every page this process has
    /// procured (not just this allocator's heap — the counter is
    /// process-wide, matching the source).
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        raw::allocated_bytes()
    }

    /// Worst-case per-thread cached-page footprint.
    #[must_use]
    pub fn estimate_overhead_per_thread(&self) -> u64 {
        self.heap.estimate_overhead_per_thread()
    }

    /// Direct access to the heap, for callers that need tier-specific
    /// operations ([`Heap::size_tracker`], cross-allocator page inspection).
    #[must_use]
    pub fn heap(&self) -> &Heap<M> {
        &self.heap
    }
}

/// Exact on-heap size of a live object, obtained through `M`.
///
/// # Safety
/// `object` must point at a live instance of a type managed by `M`.
#[must_use]
pub unsafe fn allocated_heap_size<M: ObjectModel>(object: std::ptr::NonNull<u8>) -> u64 {
    // SAFETY: forwarded from this function's contract.
    unsafe { M::allocated_heap_size(object) }
}
