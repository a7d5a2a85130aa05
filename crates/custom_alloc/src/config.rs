//! Compile-time constants shared by every page and tier.

/// The minimum granularity of every allocation, and the size of a `Cell` header.
pub const CELL_SIZE: usize = 8;

/// Required alignment of every page (and therefore of every allocation).
pub const PAGE_ALIGNMENT: usize = 8;

/// Nominal size of a `FixedBlockPage`, before subtracting the page header.
pub const FIXED_BLOCK_PAGE_SIZE: usize = 256 * 1024;

/// Nominal size of a `NextFitPage`, before subtracting the page header.
pub const NEXT_FIT_PAGE_SIZE: usize = 256 * 1024;

/// Nominal size of an `ExtraObjectPage`, before subtracting the page header.
pub const EXTRA_OBJECT_PAGE_SIZE: usize = 64 * 1024;

/// Largest block size, in cells, served by a `FixedBlockPage`. Anything larger
/// either goes to `NextFitPage` or, past `NEXT_FIT_MAX_BLOCK_SIZE`, to a
/// dedicated `SingleObjectPage`.
pub const FIXED_BLOCK_MAX_BLOCK_SIZE: usize = 128;

/// Hard bound on how many times `CustomAllocator` will re-fetch a page from the
/// heap after a cached page turns out to already be full. `PageStore::get_page`
/// is specified to always eventually return a page with free space (its last
/// resort is `NewPage`, which never fails), so exceeding this is an internal
/// invariant violation rather than an expected retry path.
pub const MAX_PAGE_ACQUIRE_RETRIES: u32 = 8;
