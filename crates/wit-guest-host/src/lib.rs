//! In-process host for wit-guest.
//!
//! This crate stands in for the host runtime on the other side of the
//! canonical ABI, so the guest ownership types can be driven end to end
//! without a WebAssembly engine:
//!
//! - [`table`]: Resource table of live registrations
//! - [`runtime`]: Per-thread host implementing the resource built-ins
//! - [`audit`]: Lifecycle audit of the guest types against the host
//!
//! # Example
//!
//! ```
//! use wit_guest_common::{AuditConfig, HostConfig};
//! use wit_guest_host::{audit, runtime};
//!
//! runtime::install(HostConfig::default());
//! let report = audit::run(&AuditConfig::default(), &[]);
//! assert!(report.passed());
//! ```

pub mod audit;
pub mod runtime;
pub mod table;

pub use audit::{AuditReport, CheckOutcome};
pub use runtime::HostStats;
pub use table::{Destructor, HandleTable, HostEntry, SlotHandle};
