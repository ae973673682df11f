//! Guest-side ownership types for the WebAssembly canonical ABI.
//!
//! This crate provides the storage and handle types generated bindings embed
//! in their wrapper types:
//! - [`LinearBuffer`]: Owned byte region (`string`, `list<u8>`)
//! - [`LinearVector`]: Owned element array (`list<T>`)
//! - [`ExportedResourceHandle`] / [`Owned`]: Guest resource registered with the host
//! - [`ImportedResourceHandle`] / [`HostOwned`]: Handle to a host resource
//!
//! # Ownership Contract
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Buffers and vectors                                          │
//! │  malloc ──► owner ──(drop)──► free                           │
//! │                 └──(leak)───► receiver ──► free              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Exported resources                                           │
//! │  new ──► resource.new ──► Owned ──(drop)──► resource.drop    │
//! │                                    host ──► dtor (frees)     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Imported resources                                           │
//! │  host handle ──► HostOwned ──(drop)──► resource.drop         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of these types implement `Clone`: a region or handle has exactly one
//! owner at a time. All of them assume the single-threaded execution of a
//! WebAssembly instance.

// This crate owns raw linear memory and host registrations.
#![allow(unsafe_code)]

pub mod alloc;
pub mod buffer;
pub mod export;
pub mod handle;
pub mod import;
pub mod vector;

pub use alloc::AllocStats;
pub use buffer::LinearBuffer;
pub use export::{ExportedResourceHandle, GuestResource, Owned};
pub use handle::{Handle, HandleMode, HandleRepr, INVALID};
pub use import::{HostOwned, ImportedResource, ImportedResourceHandle};
pub use vector::LinearVector;
