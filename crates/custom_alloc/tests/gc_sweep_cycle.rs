//! Full allocate → mark → `PrepareForGC` → `Sweep` → reallocate cycles,
//! driven only through the public `Allocator`/`ThreadData` surface — the
//! same sequence an embedding GC controller runs around a collection.

mod common;

use std::collections::HashSet;

use custom_alloc::page::NextFitPage;
use custom_alloc::sweep::NoopScheduler;
use custom_alloc::Allocator;

use common::{CountingScope, RecordingScheduler, SimpleModel, TestType};

/// S3: one live, one dead object in a `FixedBlockPage`; sweep survives the
/// page; the next allocation reclaims the dead object's address.
#[test]
fn s3_sweep_reclaims_a_single_dead_cell() {
    let allocator: Allocator<SimpleModel> = Allocator::new(Box::new(NoopScheduler));
    let mut thread_data = allocator.new_thread_data();
    let ty = TestType::scalar(0, 32);

    let alive = thread_data.allocate_object(ty);
    let dead = thread_data.allocate_object(ty);
    SimpleModel::mark_alive(alive);
    SimpleModel::mark_dead(dead);

    thread_data.prepare_for_gc();
    allocator.prepare_for_gc();
    let mut scope = CountingScope::default();
    let finalizer_queue = allocator.sweep(&mut scope);
    assert!(finalizer_queue.pop().is_none());
    assert_eq!(scope.kept, 1);
    assert_eq!(scope.swept, 1);

    let reused = thread_data.allocate_object(ty);
    assert_eq!(reused.as_ptr(), dead.as_ptr());
}

/// S4: half of a run of fixed-block allocations survive; the reclaimed
/// addresses are exactly the set of those that didn't, and the next
/// allocation past that set lands on fresh (never-before-seen) space.
#[test]
fn s4_sweep_reclaims_exactly_the_dead_half() {
    let allocator: Allocator<SimpleModel> = Allocator::new(Box::new(NoopScheduler));
    let mut thread_data = allocator.new_thread_data();
    let ty = TestType::scalar(0, 16);

    let objects: Vec<_> = (0..20).map(|_| thread_data.allocate_object(ty)).collect();
    let mut dead_addrs = HashSet::new();
    for (i, &object) in objects.iter().enumerate() {
        if i % 2 == 0 {
            SimpleModel::mark_alive(object);
        } else {
            SimpleModel::mark_dead(object);
            dead_addrs.insert(object.as_ptr() as usize);
        }
    }
    assert_eq!(dead_addrs.len(), 10);

    thread_data.prepare_for_gc();
    allocator.prepare_for_gc();
    let mut scope = CountingScope::default();
    allocator.sweep(&mut scope);
    assert_eq!(scope.kept, 10);
    assert_eq!(scope.swept, 10);

    let reallocated: HashSet<usize> = (0..10).map(|_| thread_data.allocate_object(ty).as_ptr() as usize).collect();
    assert_eq!(reallocated, dead_addrs, "the first 10 post-sweep allocations must be exactly the reclaimed cells");

    let fresh = thread_data.allocate_object(ty).as_ptr() as usize;
    assert!(!dead_addrs.contains(&fresh), "the 11th allocation must be new space, not a reclaimed cell");
}

/// S6: a `NextFitPage` whose sole block dies is fully reclaimed, and a
/// request sized to almost the whole page succeeds against the coalesced
/// free extent.
#[test]
fn s6_next_fit_coalesces_after_its_only_block_dies() {
    let allocator: Allocator<SimpleModel> = Allocator::new(Box::new(NoopScheduler));
    let mut thread_data = allocator.new_thread_data();
    let half_cells = u64::from(NextFitPage::max_block_size()) / 2;
    let half = thread_data.allocate_object(TestType::scalar(0, half_cells * 8));
    SimpleModel::mark_dead(half);

    thread_data.prepare_for_gc();
    allocator.prepare_for_gc();
    let mut scope = CountingScope::default();
    allocator.sweep(&mut scope);
    assert_eq!(scope.swept, 1);

    let almost_full_cells = u64::from(NextFitPage::max_block_size()) - 8;
    let big = thread_data.allocate_object(TestType::scalar(0, almost_full_cells * 8));
    assert_eq!(big.as_ptr() as usize % 8, 0);
}

/// S8 (adapted): a `FixedBlockPage` whose sole object survives an entire GC
/// cycle is hand back to the same thread for the next bump-allocation — the
/// cursor-contiguity a brand-new page could not produce.
#[test]
fn s8_surviving_page_is_reused_for_the_next_bump_slot() {
    let allocator: Allocator<SimpleModel> = Allocator::new(Box::new(NoopScheduler));
    let mut thread_data = allocator.new_thread_data();

    for block_cells in [2u64, 4, 8, 16, 32] {
        let ty = TestType::scalar(0, block_cells * 8);
        let first = thread_data.allocate_object(ty);
        SimpleModel::mark_alive(first);

        thread_data.prepare_for_gc();
        allocator.prepare_for_gc();
        let mut scope = CountingScope::default();
        allocator.sweep(&mut scope);

        let second = thread_data.allocate_object(ty);
        assert_eq!(
            second.as_ptr() as usize - first.as_ptr() as usize,
            block_cells as usize * 8,
            "a fully-survived page's bump cursor must pick up exactly where sweep left it"
        );
    }
}

/// P10: every `SingleObjectPage` creation notifies the scheduler exactly
/// once, with the process-wide `SafeAlloc` total (§4.11) — not the heap's own
/// tracker, which `get_single_object_page` updates without a second
/// notification (the page's bytes were already reported once, by `safe_alloc`
/// itself, at OS-procurement time).
#[test]
fn p10_single_object_allocation_notifies_scheduler_once() {
    let scheduler = std::sync::Arc::new(RecordingScheduler::default());
    struct Forwarding(std::sync::Arc<RecordingScheduler>);
    impl custom_alloc::sweep::GcScheduler for Forwarding {
        fn on_memory_allocation(&self, total: u64) {
            self.0.on_memory_allocation(total);
        }
    }
    let allocator: Allocator<SimpleModel> = Allocator::new(Box::new(Forwarding(scheduler.clone())));
    let mut thread_data = allocator.new_thread_data();

    let size = u64::from(NextFitPage::max_block_size()) * 8 + 800;
    thread_data.allocate_object(TestType::scalar(0, size));

    assert_eq!(scheduler.notifications.load(std::sync::atomic::Ordering::Relaxed), 1);
    assert_eq!(
        scheduler.last_total.load(std::sync::atomic::Ordering::Relaxed),
        allocator.allocated_bytes() as u64
    );
}

/// P6/P7: sweeping a page with nothing alive reports it dead, and a freshly
/// requested page of the same bucket afterward starts from a clean bump
/// cursor (no trace of the dead page's contents reappears).
#[test]
fn p6_p7_fully_dead_page_behaves_like_a_fresh_one() {
    let allocator: Allocator<SimpleModel> = Allocator::new(Box::new(NoopScheduler));
    let mut thread_data = allocator.new_thread_data();
    let ty = TestType::scalar(0, 32);

    let a = thread_data.allocate_object(ty);
    let b = thread_data.allocate_object(ty);
    SimpleModel::mark_dead(a);
    SimpleModel::mark_dead(b);

    thread_data.prepare_for_gc();
    allocator.prepare_for_gc();
    let mut scope = CountingScope::default();
    allocator.sweep(&mut scope);
    assert_eq!(scope.kept, 0);
    assert_eq!(scope.swept, 2);

    let reused = thread_data.allocate_object(ty);
    assert!(reused.as_ptr() == a.as_ptr() || reused.as_ptr() == b.as_ptr());
}
