//! Host-side resource table.
//!
//! This module provides [`HandleTable`], the host's record of every live
//! resource registration, built on Wasmtime's [`ResourceTable`]. Table slots
//! are turned into guest handle values by [`SlotHandle`].

use std::ptr;

use tracing::trace;
use wasmtime::component::{Resource, ResourceTable, ResourceTableError};

use wit_guest_common::HostError;
use wit_guest_core::HandleRepr;

/// Destructor entry point of an exported resource type.
pub type Destructor = unsafe fn(*mut u8);

/// A live registration in the host table.
#[derive(Debug)]
pub enum HostEntry {
    /// A guest object registered through `resource.new`.
    Exported {
        /// Address of the guest registration.
        rep: usize,
        /// Destructor to invoke when the registration is dropped.
        dtor: Destructor,
        /// Resource type name, for diagnostics.
        type_name: &'static str,
    },
    /// A host-owned resource handed to the guest.
    Imported {
        /// Label given when the host created it.
        name: String,
    },
}

impl HostEntry {
    /// Kind label used in diagnostics and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            HostEntry::Exported { .. } => "exported",
            HostEntry::Imported { .. } => "imported",
        }
    }
}

/// Conversion between table slots and handle values.
pub trait SlotHandle: HandleRepr {
    /// Handle value for `slot`, or `None` if it is not representable.
    fn from_slot(slot: u32) -> Option<Self>;

    /// Slot named by this handle, or `None` for values no slot maps to.
    fn slot(self) -> Option<u32>;
}

impl SlotHandle for i32 {
    fn from_slot(slot: u32) -> Option<Self> {
        i32::try_from(slot).ok()
    }

    fn slot(self) -> Option<u32> {
        u32::try_from(self).ok()
    }
}

/// Pointer handles are address-only tokens, `slot + 1`, never dereferenced.
impl SlotHandle for *mut u8 {
    fn from_slot(slot: u32) -> Option<Self> {
        let addr = usize::try_from(slot).ok()?.checked_add(1)?;
        Some(ptr::without_provenance_mut(addr))
    }

    fn slot(self) -> Option<u32> {
        let slot = self.addr().checked_sub(1)?;
        u32::try_from(slot).ok()
    }
}

/// Capacity-limited table of live registrations.
pub struct HandleTable {
    inner: ResourceTable,
    live: usize,
    capacity: usize,
}

impl HandleTable {
    /// Create an empty table holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ResourceTable::new(),
            live: 0,
            capacity,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if no entries are live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Maximum number of live entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert an entry and return its slot.
    pub fn insert(&mut self, entry: HostEntry) -> Result<u32, HostError> {
        if self.live >= self.capacity {
            return Err(HostError::TableFull {
                capacity: self.capacity,
            });
        }
        let kind = entry.kind();
        let resource = self.inner.push(entry).map_err(table_error)?;
        self.live += 1;

        trace!(slot = resource.rep(), kind, live = self.live, "table entry inserted");
        Ok(resource.rep())
    }

    /// Look up the entry at `slot`.
    pub fn get(&self, slot: u32) -> Result<&HostEntry, HostError> {
        self.inner
            .get(&Resource::<HostEntry>::new_borrow(slot))
            .map_err(|e| slot_error(slot, &e))
    }

    /// Remove and return the entry at `slot`.
    pub fn remove(&mut self, slot: u32) -> Result<HostEntry, HostError> {
        let entry = self
            .inner
            .delete(Resource::<HostEntry>::new_own(slot))
            .map_err(|e| slot_error(slot, &e))?;
        self.live -= 1;

        trace!(slot, kind = entry.kind(), live = self.live, "table entry removed");
        Ok(entry)
    }
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("live", &self.live)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

fn table_error(error: ResourceTableError) -> HostError {
    HostError::table(error.to_string())
}

fn slot_error(slot: u32, error: &ResourceTableError) -> HostError {
    match error {
        ResourceTableError::NotPresent => HostError::unknown_handle(slot),
        other => HostError::table(other.to_string()),
    }
}
