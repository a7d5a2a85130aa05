//! The boundary this crate shares with the embedding language runtime's
//! object model. Everything about object layout, field tracing, and type
//! dispatch beyond what is needed to size an allocation and cooperate with
//! mark/sweep lives on the other side of [`ObjectModel`].

use std::ptr::NonNull;

use crate::extra_object::ExtraObjectData;

/// Instances of this type need an `ExtraObjectData` companion cell allocated
/// (and linked via the meta-object convention) at allocation time, e.g.
/// because they declare a finalizer.
pub const HAS_FINALIZER: u32 = 1 << 0;
/// This type describes an array rather than a scalar object.
pub const IS_ARRAY: u32 = 1 << 1;

/// The embedding runtime's object model, as consumed by allocation and sweep.
///
/// `TypeInfo` is an opaque per-allocation-site handle (a `const TypeInfo*` in
/// the source runtime): the allocator never interprets it beyond the queries
/// below.
pub trait ObjectModel: 'static {
    /// Opaque type handle supplied by the caller of `allocate_object`/
    /// `allocate_array`.
    type TypeInfo: Copy + 'static;

    /// Bits describing this type: an OR of [`HAS_FINALIZER`]/[`IS_ARRAY`].
    fn type_info_bits(type_info: Self::TypeInfo) -> u32;

    /// Size of one scalar instance, in bytes, header included.
    fn instance_size(type_info: Self::TypeInfo) -> u64;

    /// Per-element stride for an array of this type, in bytes. Only called
    /// for types with [`TypeInfoBits::IS_ARRAY`] set.
    fn array_element_size(type_info: Self::TypeInfo) -> u64;

    /// Size, in bytes header included, of an array of `count` elements.
    fn array_size(type_info: Self::TypeInfo, count: u32) -> u64 {
        Self::array_header_size(type_info) + Self::array_element_size(type_info) * u64::from(count)
    }

    /// Size of an array's header, before its elements.
    fn array_header_size(type_info: Self::TypeInfo) -> u64;

    /// Writes `type_info` into a freshly allocated object's type-info-or-meta
    /// slot directly (the type does not need an `ExtraObjectData`).
    ///
    /// # Safety
    /// `object` must point at a freshly allocated, still-uninitialized
    /// instance of the type described by `type_info`.
    unsafe fn install_type_info(object: NonNull<u8>, type_info: Self::TypeInfo);

    /// Writes `extra` into a freshly allocated object's type-info-or-meta
    /// slot, following the meta-object convention used when the type
    /// requires finalization.
    ///
    /// # Safety
    /// `object` must point at a freshly allocated, still-uninitialized
    /// instance, and `extra` must already be initialized to point back at
    /// `object`.
    unsafe fn install_meta(object: NonNull<u8>, extra: NonNull<ExtraObjectData>);

    /// The GC's mark query: returns `true` (and atomically clears the mark)
    /// iff `object` is still reachable. Owned entirely by the GC; the
    /// allocator only consumes the result.
    ///
    /// # Safety
    /// `object` must point at a live, fully initialized instance.
    unsafe fn try_reset_mark(object: NonNull<u8>) -> bool;

    /// The `ExtraObjectData` attached to `object`, if any.
    ///
    /// # Safety
    /// `object` must point at a live, fully initialized instance.
    unsafe fn extra_object(object: NonNull<u8>) -> Option<NonNull<ExtraObjectData>>;

    /// Exact on-heap size of a live object (header + payload). Used for
    /// `SingleObjectPage` byte accounting and the `allocated_heap_size`
    /// external operation.
    ///
    /// # Safety
    /// `object` must point at a live, fully initialized instance.
    unsafe fn allocated_heap_size(object: NonNull<u8>) -> u64;
}
