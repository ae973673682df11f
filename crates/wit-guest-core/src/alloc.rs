//! The C allocator pair behind every owned linear-memory region.
//!
//! Regions owned by [`LinearBuffer`](crate::LinearBuffer) and
//! [`LinearVector`](crate::LinearVector) are allocated with `malloc` and
//! released with `free`. The host and generated code release leaked regions
//! with the same pair, so nothing here may switch to the Rust global allocator.
//!
//! Every allocation and release made through this module is counted per
//! thread; [`stats`] exposes the counters.

use std::alloc::{Layout, handle_alloc_error};
use std::cell::Cell;
use std::ptr::{self, NonNull};

use tracing::trace;

/// Alignment every `malloc` implementation we target guarantees.
///
/// Canonical ABI values never need more than 8.
pub const MALLOC_ALIGN: usize = 8;

thread_local! {
    static ALLOCATIONS: Cell<u64> = const { Cell::new(0) };
    static RELEASES: Cell<u64> = const { Cell::new(0) };
}

/// Allocation counters of the current thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Regions obtained from the allocator.
    pub allocations: u64,
    /// Regions handed back to the allocator.
    pub releases: u64,
}

impl AllocStats {
    /// Regions allocated but not yet released.
    pub fn live(&self) -> u64 {
        self.allocations.saturating_sub(self.releases)
    }

    /// Counter deltas since an earlier snapshot.
    pub fn since(&self, earlier: AllocStats) -> AllocStats {
        AllocStats {
            allocations: self.allocations.saturating_sub(earlier.allocations),
            releases: self.releases.saturating_sub(earlier.releases),
        }
    }
}

/// Snapshot of the current thread's counters.
pub fn stats() -> AllocStats {
    AllocStats {
        allocations: ALLOCATIONS.with(Cell::get),
        releases: RELEASES.with(Cell::get),
    }
}

fn bump(counter: &'static std::thread::LocalKey<Cell<u64>>) {
    counter.with(|c| c.set(c.get() + 1));
}

fn out_of_memory(size: usize, align: usize) -> ! {
    let layout = Layout::from_size_align(size, align).unwrap_or(Layout::new::<u8>());
    handle_alloc_error(layout)
}

/// Allocate a region for `layout` with `malloc`.
///
/// Allocation failure is fatal.
///
/// # Panics
///
/// Panics if `layout` is zero-sized or needs more than [`MALLOC_ALIGN`].
pub fn allocate(layout: Layout) -> NonNull<u8> {
    assert!(layout.size() > 0, "zero-sized regions are never allocated");
    assert!(
        layout.align() <= MALLOC_ALIGN,
        "alignment {} exceeds the malloc guarantee",
        layout.align()
    );

    // SAFETY: malloc accepts any non-zero size.
    let raw = unsafe { libc::malloc(layout.size()) }.cast::<u8>();
    let Some(region) = NonNull::new(raw) else {
        handle_alloc_error(layout)
    };

    bump(&ALLOCATIONS);
    trace!(size = layout.size(), ptr = ?region, "linear memory allocated");
    region
}

/// Release a region obtained from this allocator pair.
///
/// Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or come from `malloc`/`realloc` and not have been
/// released yet.
pub unsafe fn release(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: guaranteed by the caller.
    unsafe { libc::free(ptr.cast()) };

    bump(&RELEASES);
    trace!(?ptr, "linear memory released");
}

/// Canonical ABI `cabi_realloc`.
///
/// The host calls this to place lowered values in guest memory. A zero
/// `new_size` yields `align` as a dangling, never-released pointer; an
/// `old_size` of zero means `ptr` holds no allocation.
///
/// # Safety
///
/// `ptr` must be null, a dangling pointer paired with `old_size == 0`, or a
/// live region from this allocator pair of `old_size` bytes.
pub unsafe fn realloc(ptr: *mut u8, old_size: usize, align: usize, new_size: usize) -> *mut u8 {
    if new_size == 0 {
        if old_size != 0 {
            // SAFETY: a non-empty old region is live per the contract.
            unsafe { release(ptr) };
        }
        return ptr::without_provenance_mut(align);
    }
    if align > MALLOC_ALIGN {
        out_of_memory(new_size, align);
    }

    let old = if old_size == 0 { ptr::null_mut() } else { ptr };
    // SAFETY: `old` is null or a live malloc region.
    let raw = unsafe { libc::realloc(old.cast(), new_size) }.cast::<u8>();
    if raw.is_null() {
        out_of_memory(new_size, align);
    }
    if old.is_null() {
        bump(&ALLOCATIONS);
    }

    trace!(old_size, new_size, ptr = ?raw, "linear memory reallocated");
    raw
}

#[cfg(feature = "cabi-realloc")]
#[unsafe(export_name = "cabi_realloc")]
unsafe extern "C" fn cabi_realloc(
    ptr: *mut u8,
    old_size: usize,
    align: usize,
    new_size: usize,
) -> *mut u8 {
    // SAFETY: the host upholds the canonical ABI contract.
    unsafe { realloc(ptr, old_size, align, new_size) }
}
