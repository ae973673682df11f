//! Owned element arrays in linear memory.
//!
//! [`LinearVector<T>`] is the element-typed counterpart of
//! [`LinearBuffer`](crate::LinearBuffer), backing canonical ABI `list<T>`
//! values. Dropping it frees the whole block at once: element destructors do
//! not run, so `T` is expected to be plain data laid out for the ABI.

use std::alloc::Layout;
use std::fmt;
use std::mem;
use std::ops::{Index, IndexMut};
use std::ptr::{self, NonNull};

use crate::alloc;

/// An element array in linear memory, freed with `free`.
pub struct LinearVector<T> {
    ptr: Option<NonNull<T>>,
    len: usize,
}

impl<T> LinearVector<T> {
    /// An empty vector that owns nothing.
    pub const fn new() -> Self {
        Self { ptr: None, len: 0 }
    }

    /// Adopt an array produced by ABI lowering.
    ///
    /// A null `ptr` yields an empty vector.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must point to `len` initialized, properly aligned
    /// elements allocated with the C allocator (or be dangling when the block
    /// is zero bytes long), and no other owner may release it.
    pub unsafe fn from_raw(ptr: *mut T, len: usize) -> Self {
        match NonNull::new(ptr) {
            Some(ptr) => Self { ptr: Some(ptr), len },
            None => Self::new(),
        }
    }

    fn byte_len(&self) -> usize {
        self.len * mem::size_of::<T>()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the vector holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start of the array, null when empty.
    pub fn as_ptr(&self) -> *const T {
        self.ptr.map_or(ptr::null(), |p| p.as_ptr().cast_const())
    }

    /// Mutable start of the array, null when empty.
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Borrow the elements.
    pub fn as_slice(&self) -> &[T] {
        match self.ptr {
            // SAFETY: `ptr` owns `len` initialized elements while `self` lives.
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.len) },
            None => &[],
        }
    }

    /// Mutably borrow the elements.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match self.ptr {
            // SAFETY: as in `as_slice`, and `&mut self` guarantees exclusivity.
            Some(ptr) => unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.len) },
            None => &mut [],
        }
    }

    /// Iterate over the elements.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Element at `index` without a bounds check.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len()`.
    pub unsafe fn get_unchecked(&self, index: usize) -> &T {
        // SAFETY: guaranteed by the caller.
        unsafe { self.as_slice().get_unchecked(index) }
    }

    /// Mutable element at `index` without a bounds check.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len()`.
    pub unsafe fn get_unchecked_mut(&mut self, index: usize) -> &mut T {
        // SAFETY: guaranteed by the caller.
        unsafe { self.as_mut_slice().get_unchecked_mut(index) }
    }

    /// Move the array out, leaving this vector empty.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Stop tracking the array without releasing it.
    ///
    /// Returns the pointer and element count the receiver becomes responsible
    /// for.
    pub fn leak(&mut self) -> (*mut T, usize) {
        let len = mem::take(&mut self.len);
        let ptr = self.ptr.take().map_or(ptr::null_mut(), NonNull::as_ptr);
        (ptr, len)
    }

    /// Release an array previously leaked from a vector.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a leaked, non-empty block from this allocator
    /// pair that has not been released yet.
    pub unsafe fn drop_raw(ptr: *mut T) {
        // SAFETY: guaranteed by the caller.
        unsafe { alloc::release(ptr.cast()) };
    }
}

impl<T: Copy> LinearVector<T> {
    /// Copy `elements` into a freshly allocated block.
    ///
    /// Allocation failure is fatal.
    pub fn from_slice(elements: &[T]) -> Self {
        if elements.is_empty() {
            return Self::new();
        }
        let layout = Layout::for_value(elements);
        if layout.size() == 0 {
            return Self {
                ptr: Some(NonNull::dangling()),
                len: elements.len(),
            };
        }
        let block = alloc::allocate(layout).cast::<T>();
        // SAFETY: the new block holds `elements.len()` elements and is disjoint.
        unsafe { ptr::copy_nonoverlapping(elements.as_ptr(), block.as_ptr(), elements.len()) };
        Self {
            ptr: Some(block),
            len: elements.len(),
        }
    }
}

impl<T> Drop for LinearVector<T> {
    fn drop(&mut self) {
        let bytes = self.byte_len();
        let (ptr, _) = self.leak();
        if bytes > 0 {
            // SAFETY: the vector was the block's only owner.
            unsafe { alloc::release(ptr.cast()) };
        }
    }
}

impl<T> Default for LinearVector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<usize> for LinearVector<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<T> IndexMut<usize> for LinearVector<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.as_mut_slice()[index]
    }
}

impl<'a, T> IntoIterator for &'a LinearVector<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Copy> From<&[T]> for LinearVector<T> {
    fn from(elements: &[T]) -> Self {
        Self::from_slice(elements)
    }
}

impl<T: fmt::Debug> fmt::Debug for LinearVector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_copies_elements() {
        let source = [1_u32, 2, 3, 4];
        let vector = LinearVector::from_slice(&source);

        assert_eq!(vector.len(), 4);
        assert_eq!(vector.as_slice(), &source);
        assert_ne!(vector.as_ptr(), source.as_ptr());
    }

    #[test]
    fn test_index_reads_and_writes() {
        let mut vector = LinearVector::from_slice(&[10_i64, 20, 30]);
        vector[1] = 25;
        vector[2] += 5;

        assert_eq!(vector[0], 10);
        assert_eq!(vector[1], 25);
        assert_eq!(vector[2], 35);
        assert_eq!(vector.iter().sum::<i64>(), 70);
    }

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn test_safe_index_is_bounds_checked() {
        let vector = LinearVector::from_slice(&[1_u8, 2]);
        assert_eq!(vector[2], 0);
    }

    #[test]
    fn test_unchecked_access() {
        let mut vector = LinearVector::from_slice(&[7_u16, 8]);
        unsafe {
            *vector.get_unchecked_mut(0) = 9;
            assert_eq!(*vector.get_unchecked(0), 9);
            assert_eq!(*vector.get_unchecked(1), 8);
        }
    }

    #[test]
    fn test_drop_releases_whole_block_once() {
        let before = alloc::stats();
        let vector = LinearVector::from_slice(&[1.5_f64; 64]);
        assert_eq!(alloc::stats().since(before).allocations, 1);

        drop(vector);
        let delta = alloc::stats().since(before);
        assert_eq!(delta.releases, 1);
        assert_eq!(delta.live(), 0);
    }

    #[test]
    fn test_take_and_assignment() {
        let before = alloc::stats();
        let mut source = LinearVector::from_slice(&[1_u32, 2]);
        let mut target = LinearVector::from_slice(&[9_u32]);
        assert_eq!(target.len(), 1);

        target = source.take();
        assert!(source.is_empty());
        assert!(source.as_ptr().is_null());
        assert_eq!(target.as_slice(), &[1, 2]);
        assert_eq!(alloc::stats().since(before).releases, 1);

        drop(source);
        assert_eq!(alloc::stats().since(before).releases, 1);
        drop(target);
        assert_eq!(alloc::stats().since(before).live(), 0);
    }

    #[test]
    fn test_leak_and_drop_raw() {
        let before = alloc::stats();
        let mut vector = LinearVector::from_slice(&[3_u32, 4, 5]);
        let (ptr, len) = vector.leak();
        drop(vector);
        assert_eq!(alloc::stats().since(before).releases, 0);

        let mut adopted = unsafe { LinearVector::from_raw(ptr, len) };
        assert_eq!(adopted.as_slice(), &[3, 4, 5]);
        let (ptr, _) = adopted.leak();
        drop(adopted);
        unsafe { LinearVector::<u32>::drop_raw(ptr) };
        assert_eq!(alloc::stats().since(before).live(), 0);
    }

    #[test]
    fn test_zero_sized_elements_never_allocate() {
        let before = alloc::stats();
        let vector = LinearVector::from_slice(&[(); 5]);
        assert_eq!(vector.len(), 5);
        assert_eq!(vector.iter().count(), 5);
        drop(vector);
        assert_eq!(alloc::stats().since(before), alloc::AllocStats::default());
    }

    #[test]
    fn test_empty_vector() {
        let mut vector = LinearVector::<u8>::new();
        assert!(vector.as_slice().is_empty());
        assert!(vector.as_mut_slice().is_empty());
        assert_eq!(vector.leak(), (ptr::null_mut(), 0));
    }
}
