//! Finalizer-queue round-trip (P11) and the unattached-extra-data discard
//! path (`destroy_unattached_extra_object_data`), both driven through the
//! public `Allocator`/`ThreadData` surface.

mod common;

use custom_alloc::extra_object::SWEEPABLE;
use custom_alloc::object_model::HAS_FINALIZER;
use custom_alloc::sweep::NoopScheduler;
use custom_alloc::{Allocator, CustomAllocator};

use common::{CountingScope, FinalizableModel, TestType};

/// P11: an object allocated with the finalizer bit set gets an
/// `ExtraObjectData` whose owning cell is reachable from the finalizer queue
/// once the object is swept while unmarked.
#[test]
fn p11_finalizable_object_round_trips_through_the_finalizer_queue() {
    let allocator: Allocator<FinalizableModel> = Allocator::new(Box::new(NoopScheduler));
    let mut thread_data = allocator.new_thread_data();

    let ty = TestType::scalar(HAS_FINALIZER, 16);
    let object = thread_data.allocate_object(ty);
    let extra_before = FinalizableModel::extra_of(object).expect("HAS_FINALIZER must attach an ExtraObjectData");
    FinalizableModel::mark_dead(object);

    thread_data.prepare_for_gc();
    allocator.prepare_for_gc();
    let mut scope = CountingScope::default();
    let finalizer_queue = allocator.sweep(&mut scope);

    let cell = finalizer_queue.pop().expect("a dead, finalizable object must be queued for finalization");
    assert!(finalizer_queue.pop().is_none(), "only one object was eligible");
    // SAFETY: `cell` was just popped, uniquely owned here.
    let queued_data = unsafe { (*cell).data() };
    assert_eq!(queued_data, extra_before.as_ptr());

    // The object's cell itself must have survived this pass (it is still
    // reachable through the queued extra data, pending finalization).
    assert_eq!(scope.kept, 1);
    assert_eq!(scope.marked, 1);
}

/// Extra data allocated but never attached to an object (the attachment was
/// aborted) is reclaimed on the next sweep without ever entering the
/// finalizer queue.
#[test]
fn destroy_unattached_extra_object_data_is_reclaimed_without_finalizing() {
    let allocator: Allocator<FinalizableModel> = Allocator::new(Box::new(NoopScheduler));
    let mut thread_data = allocator.new_thread_data();

    let dummy_object = std::ptr::NonNull::dangling();
    let extra = thread_data.allocate_extra_object_data(dummy_object);
    CustomAllocator::<FinalizableModel>::destroy_unattached_extra_object_data(extra);
    assert!(unsafe { (*extra.as_ptr()).get_flag(SWEEPABLE) });

    thread_data.prepare_for_gc();
    allocator.prepare_for_gc();
    let mut scope = CountingScope::default();
    let finalizer_queue = allocator.sweep(&mut scope);
    assert!(finalizer_queue.pop().is_none(), "an unattached cell must never reach the finalizer queue");
}
