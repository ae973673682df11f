//! Error types for wit-guest.
//!
//! The guest-side ownership types have no recoverable errors: misuse is an
//! assertion failure and allocation failure is fatal. Errors only exist on the
//! host side of the boundary, where a contract violation by the guest must be
//! reported rather than crash the host:
//! - [`HostError`]: Rejected resource table operations

use thiserror::Error;

use crate::HandleMode;

/// Resource table operations the host refused.
///
/// Handle values are carried in their debug rendering so both handle
/// representations share one error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The guest passed the invalid sentinel where a live handle was required.
    #[error("Invalid handle sentinel passed to {operation}")]
    InvalidHandle {
        /// The host operation that received the sentinel.
        operation: &'static str,
    },

    /// The handle names no live registration (never issued or already dropped).
    #[error("Unknown resource handle: {handle}")]
    UnknownHandle {
        /// The offending handle value.
        handle: String,
    },

    /// The handle names a registration of the other resource kind.
    #[error("Handle {handle} is not an {expected} resource")]
    KindMismatch {
        /// The offending handle value.
        handle: String,
        /// The kind the operation expected (`exported` or `imported`).
        expected: &'static str,
    },

    /// The guest uses a different handle representation than the host.
    #[error("Handle mode mismatch: host uses {expected}, guest passed {found}")]
    ModeMismatch {
        /// The mode the host was configured with.
        expected: HandleMode,
        /// The mode of the handle type the guest used.
        found: HandleMode,
    },

    /// The resource table reached its configured capacity.
    #[error("Resource table full: {capacity} handles")]
    TableFull {
        /// The configured capacity.
        capacity: usize,
    },

    /// The underlying table rejected the operation for another reason.
    #[error("Resource table error: {reason}")]
    Table {
        /// Description of the table failure.
        reason: String,
    },
}

impl HostError {
    /// Create a new `UnknownHandle` error.
    pub fn unknown_handle(handle: impl std::fmt::Debug) -> Self {
        Self::UnknownHandle {
            handle: format!("{handle:?}"),
        }
    }

    /// Create a new `KindMismatch` error.
    pub fn kind_mismatch(handle: impl std::fmt::Debug, expected: &'static str) -> Self {
        Self::KindMismatch {
            handle: format!("{handle:?}"),
            expected,
        }
    }

    /// Create a new `Table` error.
    pub fn table(reason: impl Into<String>) -> Self {
        Self::Table {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the handle did not name a live registration.
    ///
    /// A double drop of the same handle surfaces this way.
    pub fn is_stale_handle(&self) -> bool {
        matches!(
            self,
            Self::UnknownHandle { .. } | Self::InvalidHandle { .. }
        )
    }

    /// Returns `true` if this error indicates a capacity limit was exceeded.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::TableFull { .. })
    }
}
