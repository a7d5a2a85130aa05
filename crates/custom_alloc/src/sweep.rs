//! Sweep-time collaboration with the GC: the per-object/per-extra-object
//! survive-or-reclaim predicates, the scheduler hook fired on every OS
//! allocation, and the scope a sweep pass reports its counters through.
//!
//! Mark itself is entirely the GC's business (`ObjectModel::try_reset_mark`);
//! this module only implements what a custom-allocator sweep does with the
//! answer.

use std::ptr::NonNull;

use crate::atomic_stack::AtomicStack;
use crate::extra_object::{ExtraObjectCell, ExtraObjectData, FINALIZED, IN_FINALIZER_QUEUE, SWEEPABLE};
use crate::object_model::ObjectModel;

/// Cells awaiting finalization, handed off from a sweep pass to whatever
/// external finalizer processor the embedder runs.
pub type FinalizerQueue = AtomicStack<ExtraObjectCell>;

/// Notified on every successful OS-level page procurement, so the embedder's
/// GC can decide whether the new total footprint warrants scheduling a
/// collection.
pub trait GcScheduler {
    /// `total` is the process-wide allocated-bytes counter after this
    /// allocation landed.
    fn on_memory_allocation(&self, total: u64);
}

/// A scheduler that never triggers anything; used by tests and by embedders
/// that drive collection on their own cadence.
pub struct NoopScheduler;

impl GcScheduler for NoopScheduler {
    fn on_memory_allocation(&self, _total: u64) {}
}

/// Per-sweep-pass counters. A page's sweep loop reports every element it
/// visits through exactly one of these three calls.
pub trait SweepScope {
    /// The element survived sweep untouched (still reachable, no
    /// finalization pending).
    fn add_kept_object(&mut self) {}
    /// The element survived this pass because it was newly queued for, or is
    /// still waiting on, finalization.
    fn add_marked_object(&mut self) {}
    /// The element did not survive and its cell was returned to the page.
    fn add_swept_object(&mut self) {}
}

/// A [`SweepScope`] that discards every counter; used by tests and by
/// embedders that don't yet report GC statistics.
pub struct NullSweepScope;

impl SweepScope for NullSweepScope {}

/// The survive-or-reclaim decision for one live object during sweep.
///
/// Returns `true` if `object`'s cell must stay allocated (the object is
/// reachable, or is queued/waiting for finalization), `false` if the cell
/// may be returned to the page's free list.
///
/// # Safety
/// `object` must point at a live, fully initialized instance of a type
/// managed by `M`.
pub unsafe fn sweep_object<M: ObjectModel>(
    object: NonNull<u8>,
    finalizer_queue: &FinalizerQueue,
    scope: &mut impl SweepScope,
) -> bool {
    // SAFETY: forwarded from the caller's contract.
    if unsafe { M::try_reset_mark(object) } {
        scope.add_kept_object();
        return true;
    }
    // SAFETY: forwarded from the caller's contract.
    let Some(mut extra) = (unsafe { M::extra_object(object) }) else {
        scope.add_swept_object();
        return false;
    };
    // SAFETY: `extra` was just returned live from `M::extra_object`.
    let extra_ref = unsafe { extra.as_mut() };
    if !extra_ref.get_flag(IN_FINALIZER_QUEUE) {
        extra_ref.set_flag(IN_FINALIZER_QUEUE);
        extra_ref.clear_regular_weak_reference();
        // SAFETY: `extra` is a live `ExtraObjectData` inside its owning cell.
        let cell = unsafe { ExtraObjectCell::from_extra_object(extra.as_ptr()) };
        // SAFETY: `cell` is the allocated (not free-listed) cell `extra`
        // lives in, and is being handed exclusively to the finalizer queue.
        unsafe { finalizer_queue.push(cell) };
        scope.add_marked_object();
        scope.add_kept_object();
        return true;
    }
    if !extra_ref.get_flag(FINALIZED) {
        scope.add_marked_object();
        scope.add_kept_object();
        return true;
    }
    extra_ref.unlink_from_base_object();
    extra_ref.set_flag(SWEEPABLE);
    scope.add_swept_object();
    false
}

/// The survive-or-reclaim decision for one `ExtraObjectData` slot during the
/// dedicated extra-object-page sweep pass (run after object sweep, once every
/// survivor has had a chance to mark its extra data [`SWEEPABLE`]).
#[must_use]
pub fn sweep_extra_object(extra: &ExtraObjectData) -> bool {
    !extra.get_flag(SWEEPABLE)
}
