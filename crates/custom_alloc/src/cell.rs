//! The allocation quantum (`AllocationSize`) and the `NextFitPage` block header (`Cell`).

use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::config::CELL_SIZE;

/// A count of allocation cells, saturating on overflow so a 32-bit host can
/// never silently wrap before reaching the OS-level size check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllocationSize {
    cells: u64,
}

impl AllocationSize {
    /// Zero cells.
    pub const ZERO: AllocationSize = AllocationSize { cells: 0 };

    /// A size expressed directly in cells.
    #[must_use]
    pub const fn cells(n: u64) -> Self {
        Self { cells: n }
    }

    /// The smallest cell count covering `bytes` (ceiling division).
    #[must_use]
    pub const fn bytes_at_least(bytes: u64) -> Self {
        let cell_size = CELL_SIZE as u64;
        Self {
            cells: (bytes + cell_size - 1) / cell_size,
        }
    }

    /// Like [`Self::bytes_at_least`], but panics if `bytes` is not an exact
    /// multiple of the cell size. Used where the caller must guarantee
    /// alignment (e.g. struct sizes that are statically known to be 8-byte
    /// multiples).
    #[must_use]
    pub const fn bytes_exactly(bytes: u64) -> Self {
        let at_least = Self::bytes_at_least(bytes);
        assert!(
            at_least.in_bytes() == bytes,
            "bytes must be an exact multiple of the cell size"
        );
        at_least
    }

    /// The cell count as a plain integer.
    #[must_use]
    pub const fn in_cells(self) -> u64 {
        self.cells
    }

    /// The cell count converted back to bytes.
    #[must_use]
    pub const fn in_bytes(self) -> u64 {
        self.cells * CELL_SIZE as u64
    }
}

impl Add for AllocationSize {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            cells: self.cells.saturating_add(rhs.cells),
        }
    }
}

impl AddAssign for AllocationSize {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for AllocationSize {
    type Output = Self;
    /// # Panics
    /// Panics (in debug) if `rhs` exceeds `self` — sizes never go negative.
    fn sub(self, rhs: Self) -> Self {
        debug_assert!(self.cells >= rhs.cells, "AllocationSize underflow");
        Self {
            cells: self.cells.saturating_sub(rhs.cells),
        }
    }
}

impl SubAssign for AllocationSize {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

/// A block header inside a [`crate::page::next_fit::NextFitPage`].
///
/// Lives at the start of every block, whether allocated or free. Free blocks
/// store nothing beyond `size` (their payload bytes are zeroed); allocated
/// blocks hand the bytes after the header to the caller.
#[repr(C)]
pub struct Cell {
    allocated: bool,
    size: u32,
}

impl Cell {
    /// Cells occupied by the header itself.
    pub const HEADER_CELLS: u64 = 1;

    /// Builds a free header of the given size (in cells, header included).
    #[must_use]
    pub const fn free(size: u32) -> Self {
        Self {
            allocated: false,
            size,
        }
    }

    /// Total size of this block in cells, header included.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Pointer to this cell's payload, i.e. immediately after the header.
    ///
    /// # Safety
    /// `self` must point into a live `NextFitPage`'s cell array.
    unsafe fn data(&mut self) -> *mut u8 {
        unsafe { (self as *mut Self).add(1).cast::<u8>() }
    }

    /// Pointer to this (allocated) cell's payload, for callers outside this
    /// module that only need to read or hand the pointer onward (sweep,
    /// traversal).
    ///
    /// # Safety
    /// `self` must point into a live `NextFitPage`'s cell array and must be
    /// allocated.
    #[must_use]
    pub unsafe fn payload(&self) -> *mut u8 {
        unsafe { (self as *const Self as *mut Self).add(1).cast::<u8>() }
    }

    /// The next block in the chain: `self + size`.
    ///
    /// # Safety
    /// `self + size` must still be within the page's cell array (or exactly
    /// at its end, which the caller must treat as "past the last block").
    #[must_use]
    pub unsafe fn next(&self) -> *mut Cell {
        unsafe { (self as *const Self as *mut Self).add(self.size as usize) }
    }

    /// Attempts to carve `cells_needed` cells (header included) off the *end*
    /// of this free block. On success this cell shrinks to the remainder and
    /// the new header — placed at `self + remainder` — is returned, already
    /// marked allocated; on failure (too small, or already allocated) returns
    /// `None` and leaves `self` untouched.
    ///
    /// # Safety
    /// `self` must point into a live `NextFitPage`'s cell array and have
    /// `cells_needed` additional cells of capacity past it if splitting.
    pub unsafe fn try_allocate(&mut self, cells_needed: u32) -> Option<*mut u8> {
        if self.allocated || cells_needed > self.size {
            return None;
        }
        let remaining = self.size - cells_needed;
        // Split from the END of the free run: the new allocated header lands
        // at `self + remaining`, and this header shrinks to the remainder.
        let new_block = unsafe { (self as *mut Self).add(remaining as usize) };
        self.size = remaining;
        unsafe {
            (*new_block).allocated = true;
            (*new_block).size = cells_needed;
            Some((*new_block).data())
        }
    }

    /// Marks this block free and zeroes its payload (`size - 1` cells).
    ///
    /// # Safety
    /// `self` must point into a live `NextFitPage`'s cell array.
    pub unsafe fn deallocate(&mut self) {
        let payload_cells = self.size as usize - 1;
        if payload_cells > 0 {
            unsafe {
                let data = self.data();
                std::ptr::write_bytes(data, 0, payload_cells * CELL_SIZE);
            }
        }
        self.allocated = false;
    }
}
