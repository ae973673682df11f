//! Resource handle representations.
//!
//! A handle is the value the host hands out for a resource registration. Two
//! representations exist, one per ABI flavour:
//!
//! | Backend   | Rust type  | Invalid sentinel |
//! |-----------|------------|------------------|
//! | Integer   | `i32`      | `-1`             |
//! | Pointer   | `*mut u8`  | null             |
//!
//! Resource wrappers are generic over [`HandleRepr`]. [`Handle`] names the
//! backend a guest build uses by default; the `symmetric` feature switches it
//! to the pointer backend.

use std::fmt;
use std::ptr;

pub use wit_guest_common::HandleMode;

/// A raw resource handle value.
pub trait HandleRepr: Copy + Eq + fmt::Debug + 'static {
    /// Sentinel for "no registration": empty, moved-from, or transferred.
    const INVALID: Self;

    /// The ABI flavour this representation belongs to.
    const MODE: HandleMode;

    /// Returns `true` if the value can name a live registration.
    fn is_valid(self) -> bool;
}

impl HandleRepr for i32 {
    const INVALID: Self = -1;
    const MODE: HandleMode = HandleMode::Integer;

    fn is_valid(self) -> bool {
        self >= 0
    }
}

impl HandleRepr for *mut u8 {
    const INVALID: Self = ptr::null_mut();
    const MODE: HandleMode = HandleMode::Pointer;

    fn is_valid(self) -> bool {
        !self.is_null()
    }
}

/// Handle type of this build.
#[cfg(not(feature = "symmetric"))]
pub type Handle = i32;

/// Handle type of this build.
#[cfg(feature = "symmetric")]
pub type Handle = *mut u8;

/// Invalid sentinel of [`Handle`].
pub const INVALID: Handle = <Handle as HandleRepr>::INVALID;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_sentinel() {
        assert_eq!(<i32 as HandleRepr>::INVALID, -1);
        assert!(!(-1_i32).is_valid());
        assert!(!i32::MIN.is_valid());
        assert!(0_i32.is_valid());
        assert!(42_i32.is_valid());
        assert_eq!(<i32 as HandleRepr>::MODE, HandleMode::Integer);
    }

    #[test]
    fn test_pointer_sentinel() {
        let invalid = <*mut u8 as HandleRepr>::INVALID;
        assert!(invalid.is_null());
        assert!(!invalid.is_valid());

        let token = ptr::without_provenance_mut::<u8>(8);
        assert!(token.is_valid());
        assert_eq!(<*mut u8 as HandleRepr>::MODE, HandleMode::Pointer);
    }

    #[test]
    fn test_build_handle_matches_feature() {
        assert!(!INVALID.is_valid());
        if cfg!(feature = "symmetric") {
            assert_eq!(<Handle as HandleRepr>::MODE, HandleMode::Pointer);
        } else {
            assert_eq!(<Handle as HandleRepr>::MODE, HandleMode::Integer);
        }
    }
}
