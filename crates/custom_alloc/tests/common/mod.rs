//! Shared test doubles for the scenario/property integration tests: a tiny
//! `ObjectModel` that stores its liveness flag (and, for the finalizer
//! variant, its extra-object pointer) directly in the object payload, plus a
//! `GcScheduler` that records every notification it receives.

#![allow(dead_code)]

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use custom_alloc::sweep::{GcScheduler, SweepScope};
use custom_alloc::{ExtraObjectData, ObjectModel};

/// Per-allocation-site handle for [`SimpleModel`]/[`FinalizableModel`]: the
/// allocator never interprets this beyond the queries `ObjectModel` defines.
#[derive(Clone, Copy)]
pub struct TestType {
    pub bits: u32,
    pub instance_size: u64,
    pub array_element_size: u64,
    pub array_header_size: u64,
}

impl TestType {
    pub const fn scalar(bits: u32, instance_size: u64) -> Self {
        Self {
            bits,
            instance_size,
            array_element_size: 0,
            array_header_size: 0,
        }
    }

    pub const fn array(bits: u32, header_size: u64, element_size: u64) -> Self {
        Self {
            bits,
            instance_size: 0,
            array_element_size: element_size,
            array_header_size: header_size,
        }
    }
}

/// An 8-byte header carrying only a liveness flag; no extra-object support.
/// Used for scenarios that never touch finalization (S1, S2, S5, S6).
#[repr(C, align(8))]
struct PlainHeader {
    alive: AtomicU8,
}

/// Object model whose objects are exactly one `PlainHeader` (8 bytes) plus
/// whatever tail space `instance_size` calls for; never reports an
/// extra-object, matching a type with no finalizer.
pub struct SimpleModel;

impl SimpleModel {
    pub fn mark_alive(object: NonNull<u8>) {
        // SAFETY: `object` points at a live `PlainHeader`.
        unsafe { (*object.as_ptr().cast::<PlainHeader>()).alive.store(1, Ordering::Relaxed) };
    }

    pub fn mark_dead(object: NonNull<u8>) {
        // SAFETY: `object` points at a live `PlainHeader`.
        unsafe { (*object.as_ptr().cast::<PlainHeader>()).alive.store(0, Ordering::Relaxed) };
    }
}

impl ObjectModel for SimpleModel {
    type TypeInfo = TestType;

    fn type_info_bits(type_info: TestType) -> u32 {
        type_info.bits
    }
    fn instance_size(type_info: TestType) -> u64 {
        type_info.instance_size
    }
    fn array_element_size(type_info: TestType) -> u64 {
        type_info.array_element_size
    }
    fn array_header_size(type_info: TestType) -> u64 {
        type_info.array_header_size
    }
    unsafe fn install_type_info(object: NonNull<u8>, _type_info: TestType) {
        // SAFETY: forwarded from this function's contract; every allocation
        // of this model has room for at least a `PlainHeader`.
        unsafe { object.as_ptr().cast::<PlainHeader>().write(PlainHeader { alive: AtomicU8::new(1) }) };
    }
    unsafe fn install_meta(_object: NonNull<u8>, _extra: NonNull<ExtraObjectData>) {
        unreachable!("SimpleModel types never set HAS_FINALIZER");
    }
    unsafe fn try_reset_mark(object: NonNull<u8>) -> bool {
        // SAFETY: forwarded from this function's contract.
        unsafe { (*object.as_ptr().cast::<PlainHeader>()).alive.swap(0, Ordering::Relaxed) != 0 }
    }
    unsafe fn extra_object(_object: NonNull<u8>) -> Option<NonNull<ExtraObjectData>> {
        None
    }
    unsafe fn allocated_heap_size(_object: NonNull<u8>) -> u64 {
        8
    }
}

/// A 16-byte header: a liveness flag plus a slot for an `ExtraObjectData`
/// pointer, for scenarios exercising finalization (S7, P11).
#[repr(C, align(8))]
struct FinalizableHeader {
    alive: AtomicU8,
    extra: AtomicU64,
}

pub struct FinalizableModel;

impl FinalizableModel {
    pub fn mark_alive(object: NonNull<u8>) {
        // SAFETY: `object` points at a live `FinalizableHeader`.
        unsafe { (*object.as_ptr().cast::<FinalizableHeader>()).alive.store(1, Ordering::Relaxed) };
    }

    pub fn mark_dead(object: NonNull<u8>) {
        // SAFETY: `object` points at a live `FinalizableHeader`.
        unsafe { (*object.as_ptr().cast::<FinalizableHeader>()).alive.store(0, Ordering::Relaxed) };
    }

    pub fn extra_of(object: NonNull<u8>) -> Option<NonNull<ExtraObjectData>> {
        // SAFETY: `object` points at a live `FinalizableHeader`.
        let raw = unsafe { (*object.as_ptr().cast::<FinalizableHeader>()).extra.load(Ordering::Relaxed) };
        NonNull::new(raw as *mut ExtraObjectData)
    }
}

impl ObjectModel for FinalizableModel {
    type TypeInfo = TestType;

    fn type_info_bits(type_info: TestType) -> u32 {
        type_info.bits
    }
    fn instance_size(type_info: TestType) -> u64 {
        type_info.instance_size
    }
    fn array_element_size(type_info: TestType) -> u64 {
        type_info.array_element_size
    }
    fn array_header_size(type_info: TestType) -> u64 {
        type_info.array_header_size
    }
    unsafe fn install_type_info(object: NonNull<u8>, _type_info: TestType) {
        // SAFETY: forwarded from this function's contract.
        unsafe {
            object.as_ptr().cast::<FinalizableHeader>().write(FinalizableHeader {
                alive: AtomicU8::new(1),
                extra: AtomicU64::new(0),
            });
        }
    }
    unsafe fn install_meta(object: NonNull<u8>, extra: NonNull<ExtraObjectData>) {
        // SAFETY: forwarded from this function's contract.
        unsafe {
            object.as_ptr().cast::<FinalizableHeader>().write(FinalizableHeader {
                alive: AtomicU8::new(1),
                extra: AtomicU64::new(extra.as_ptr() as u64),
            });
        }
    }
    unsafe fn try_reset_mark(object: NonNull<u8>) -> bool {
        // SAFETY: forwarded from this function's contract.
        unsafe { (*object.as_ptr().cast::<FinalizableHeader>()).alive.swap(0, Ordering::Relaxed) != 0 }
    }
    unsafe fn extra_object(object: NonNull<u8>) -> Option<NonNull<ExtraObjectData>> {
        Self::extra_of(object)
    }
    unsafe fn allocated_heap_size(_object: NonNull<u8>) -> u64 {
        16
    }
}

/// Records every `on_memory_allocation` notification, for asserting on P10.
#[derive(Default)]
pub struct RecordingScheduler {
    pub notifications: AtomicUsize,
    pub last_total: AtomicU64,
}

impl GcScheduler for RecordingScheduler {
    fn on_memory_allocation(&self, total: u64) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
        self.last_total.store(total, Ordering::Relaxed);
    }
}

/// Tallies what a sweep pass reported, for asserting on kept/marked/swept
/// counts without needing a real GC controller.
#[derive(Default)]
pub struct CountingScope {
    pub kept: usize,
    pub marked: usize,
    pub swept: usize,
}

impl SweepScope for CountingScope {
    fn add_kept_object(&mut self) {
        self.kept += 1;
    }
    fn add_marked_object(&mut self) {
        self.marked += 1;
    }
    fn add_swept_object(&mut self) {
        self.swept += 1;
    }
}

/// Scheduler that panics if ever notified; used by tests asserting a code
/// path takes no allocation-overflow path at all.
pub struct PanicScheduler;

impl GcScheduler for PanicScheduler {
    fn on_memory_allocation(&self, _total: u64) {
        panic!("unexpected scheduler notification");
    }
}

/// True once, then false forever: a trivial one-shot gate some tests use to
/// assert a callback fires exactly once.
#[derive(Default)]
pub struct OneShot(pub AtomicBool);

impl OneShot {
    pub fn fire(&self) -> bool {
        !self.0.swap(true, Ordering::Relaxed)
    }
}
