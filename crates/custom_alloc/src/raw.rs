//! OS-backed raw page procurement: `mmap`/`VirtualAlloc` (or `calloc` when the
//! `disable-mmap` feature is enabled), plus the process-wide allocated-bytes
//! counter that every `SafeAlloc`/`Free` call maintains.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::sweep::GcScheduler;

static ALLOCATED_BYTES: AtomicUsize = AtomicUsize::new(0);

/// Current OS-backed footprint across every page this process has procured.
#[must_use]
pub fn allocated_bytes() -> usize {
    ALLOCATED_BYTES.load(Ordering::Relaxed)
}

fn abort_with_message(action: &str, size: u64, detail: &dyn std::fmt::Display) -> ! {
    eprintln!("Out of memory trying to {action} {size} bytes: {detail}. Aborting.");
    #[cfg(feature = "tracing")]
    tracing::error!(size, action, %detail, "OS allocation failure, aborting process");
    std::process::abort();
}

/// Procures `size` bytes of zeroed, page-aligned memory from the OS, aborting
/// the process on failure. Fires `scheduler.on_memory_allocation` with the new
/// running total.
///
/// # Safety
/// The returned pointer is valid for `size` bytes until passed to [`free`].
#[must_use]
pub unsafe fn safe_alloc(size: u64, scheduler: &dyn GcScheduler) -> *mut u8 {
    if size > usize::MAX as u64 {
        abort_with_message("allocate", size, &"requested size exceeds usize::MAX");
    }
    let size_usize = size as usize;

    let ptr = if cfg!(feature = "disable-mmap") {
        // SAFETY: calloc(1, size) zero-initializes a freshly owned buffer.
        unsafe { libc::calloc(1, size_usize) }.cast::<u8>()
    } else {
        unsafe { os_map(size_usize) }
    };

    if ptr.is_null() {
        let err = std::io::Error::last_os_error();
        abort_with_message("allocate", size, &err);
    }

    let previous = ALLOCATED_BYTES.fetch_add(size_usize, Ordering::Relaxed);
    let total = previous as u64 + size;
    #[cfg(feature = "tracing")]
    tracing::debug!(size, total, "safe_alloc");
    scheduler.on_memory_allocation(total);
    ptr
}

/// Releases memory previously returned by [`safe_alloc`].
///
/// # Safety
/// `ptr` must have been returned by `safe_alloc` with the same `size`, and
/// must not be used again afterwards.
pub unsafe fn free(ptr: *mut u8, size: u64) {
    let size_usize = size as usize;
    if cfg!(feature = "disable-mmap") {
        unsafe { libc::free(ptr.cast::<libc::c_void>()) };
    } else {
        unsafe { os_unmap(ptr, size_usize) };
    }
    ALLOCATED_BYTES.fetch_sub(size_usize, Ordering::Relaxed);
    #[cfg(feature = "tracing")]
    tracing::debug!(size, "free");
}

#[cfg(unix)]
unsafe fn os_map(size: usize) -> *mut u8 {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    const POPULATE: libc::c_int = libc::MAP_POPULATE;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const POPULATE: libc::c_int = 0;

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_vendor = "apple",
        target_os = "netbsd",
        target_os = "solaris",
        target_os = "illumos",
    ))]
    const NORESERVE: libc::c_int = libc::MAP_NORESERVE;
    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_vendor = "apple",
        target_os = "netbsd",
        target_os = "solaris",
        target_os = "illumos",
    )))]
    const NORESERVE: libc::c_int = 0;

    let flags = libc::MAP_PRIVATE | libc::MAP_ANON | POPULATE | NORESERVE;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        std::ptr::null_mut()
    } else {
        ptr.cast::<u8>()
    }
}

#[cfg(unix)]
unsafe fn os_unmap(ptr: *mut u8, size: usize) {
    let result = unsafe { libc::munmap(ptr.cast::<libc::c_void>(), size) };
    debug_assert!(result == 0, "munmap failed");
}

#[cfg(windows)]
unsafe fn os_map(size: usize) -> *mut u8 {
    use windows_sys::Win32::System::Memory::{VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE};
    let ptr = unsafe {
        VirtualAlloc(
            std::ptr::null(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        )
    };
    ptr.cast::<u8>()
}

#[cfg(windows)]
unsafe fn os_unmap(ptr: *mut u8, _size: usize) {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};
    // MEM_RELEASE requires the size argument to be zero.
    unsafe { VirtualFree(ptr.cast(), 0, MEM_RELEASE) };
}
