//! Owned byte regions in linear memory.
//!
//! [`LinearBuffer`] is the storage behind the canonical ABI `string` type (and
//! `list<u8>`). It owns a contiguous region obtained from the C allocator and
//! releases it with `free` when dropped.
//!
//! # Ownership
//!
//! A buffer is never cloned, so exactly one value references a region at a
//! time. Moves follow Rust semantics; [`LinearBuffer::take`] models a move
//! that leaves an empty buffer behind. Assigning over a buffer (`*dst = src`)
//! releases the old region before adopting the new one.
//!
//! When a region is handed across the ABI (a return value, an argument the
//! callee frees) the giver calls [`LinearBuffer::leak`]. The receiver later
//! releases it with [`LinearBuffer::drop_raw`] or its own `free`.

use std::alloc::Layout;
use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::str::Utf8Error;

use crate::alloc;

/// A byte region in linear memory, freed with `free`.
pub struct LinearBuffer {
    ptr: Option<NonNull<u8>>,
    len: usize,
}

impl LinearBuffer {
    /// An empty buffer that owns nothing.
    pub const fn new() -> Self {
        Self { ptr: None, len: 0 }
    }

    /// Adopt a region produced by ABI lowering.
    ///
    /// A null `ptr` yields an empty buffer.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must point to `len` initialized bytes allocated with
    /// the C allocator (or be a dangling pointer with `len == 0`), and no other
    /// owner may release it.
    pub unsafe fn from_raw(ptr: *mut u8, len: usize) -> Self {
        match NonNull::new(ptr) {
            Some(ptr) => Self { ptr: Some(ptr), len },
            None => Self::new(),
        }
    }

    /// Copy `bytes` into a freshly allocated region.
    ///
    /// Allocation failure is fatal.
    pub fn from_view(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::new();
        }
        let region = alloc::allocate(Layout::for_value(bytes));
        // SAFETY: the new region holds `bytes.len()` bytes and is disjoint.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), region.as_ptr(), bytes.len()) };
        Self {
            ptr: Some(region),
            len: bytes.len(),
        }
    }

    /// Start of the region, null when empty.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.map_or(ptr::null(), |p| p.as_ptr().cast_const())
    }

    /// Length of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow the region.
    pub fn as_bytes(&self) -> &[u8] {
        match self.ptr {
            // SAFETY: `ptr` owns `len` initialized bytes while `self` lives.
            Some(ptr) if self.len > 0 => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), self.len)
            },
            _ => &[],
        }
    }

    /// Borrow the region as UTF-8.
    pub fn to_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }

    /// Decode the region, replacing invalid UTF-8.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// Move the region out, leaving this buffer empty.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Stop tracking the region without releasing it.
    ///
    /// Returns the pointer and length the receiver becomes responsible for.
    /// The buffer is empty afterwards, so dropping it releases nothing.
    pub fn leak(&mut self) -> (*mut u8, usize) {
        let len = std::mem::take(&mut self.len);
        let ptr = self.ptr.take().map_or(ptr::null_mut(), NonNull::as_ptr);
        (ptr, len)
    }

    /// Release a region previously leaked from a buffer.
    ///
    /// Typically called from a post-return function.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a leaked region from this allocator pair that has
    /// not been released yet.
    pub unsafe fn drop_raw(ptr: *mut u8) {
        // SAFETY: guaranteed by the caller.
        unsafe { alloc::release(ptr) };
    }
}

impl Drop for LinearBuffer {
    fn drop(&mut self) {
        let (ptr, len) = self.leak();
        // Zero-length regions may be the dangling `align` pointer.
        if len > 0 {
            // SAFETY: the buffer was the region's only owner.
            unsafe { alloc::release(ptr) };
        }
    }
}

impl Default for LinearBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for LinearBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for LinearBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<&[u8]> for LinearBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::from_view(bytes)
    }
}

impl From<&str> for LinearBuffer {
    fn from(s: &str) -> Self {
        Self::from_view(s.as_bytes())
    }
}

impl fmt::Debug for LinearBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearBuffer")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len)
            .field("text", &self.to_string_lossy())
            .finish()
    }
}
