//! Per-thread host runtime.
//!
//! This module plays the host side of the canonical ABI resource built-ins
//! for guest code running on the same thread:
//!
//! - [`resource_new`] / [`resource_drop`] / [`resource_rep`] for exported
//!   (guest-defined) resources
//! - [`import_new`] / [`import_drop`] for imported (host-owned) resources
//! - [`flush_deferred`] to run destructors queued under
//!   [`DestructorTiming::Deferred`]
//!
//! The host never panics on guest misuse. Rejected operations are recorded as
//! faults ([`take_faults`]) and logged.
//!
//! # Reentrancy
//!
//! A guest destructor may drop further resources, which calls back into this
//! module. The host state is never borrowed while a destructor runs.

use std::cell::RefCell;

use serde::Serialize;
use tracing::{debug, error, info};

use wit_guest_common::{DestructorTiming, HandleMode, HostConfig, HostError};

use crate::table::{Destructor, HandleTable, HostEntry, SlotHandle};

thread_local! {
    static HOST: RefCell<HostRuntime> = RefCell::new(HostRuntime::new(HostConfig::default()));
}

/// Counters of host activity since the last [`install`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostStats {
    /// Successful `resource.new` calls.
    pub registered: u64,
    /// Accepted drop requests for exported resources.
    pub drop_requests: u64,
    /// Guest destructors invoked.
    pub destructors_run: u64,
    /// Host-owned resources handed to the guest.
    pub imports_created: u64,
    /// Host-owned resources the guest released.
    pub imports_released: u64,
    /// Rejected operations.
    pub faults: u64,
}

/// A destructor call taken out of the table.
struct PendingDtor {
    rep: usize,
    dtor: Destructor,
    type_name: &'static str,
}

impl PendingDtor {
    #[allow(unsafe_code)]
    fn run(self) {
        debug!(rep = self.rep, resource = self.type_name, "running guest destructor");
        // SAFETY: the entry was registered by `resource_new` with this
        // destructor and has just left the table, so this is its only call.
        unsafe { (self.dtor)(self.rep as *mut u8) };
        with_host(|host| host.stats.destructors_run += 1);
    }
}

/// Host state of the current thread.
struct HostRuntime {
    config: HostConfig,
    table: HandleTable,
    pending: Vec<PendingDtor>,
    stats: HostStats,
    faults: Vec<HostError>,
}

impl HostRuntime {
    fn new(config: HostConfig) -> Self {
        Self {
            table: HandleTable::new(config.max_handles),
            config,
            pending: Vec::new(),
            stats: HostStats::default(),
            faults: Vec::new(),
        }
    }

    fn check_mode<H: SlotHandle>(&self) -> Result<(), HostError> {
        if H::MODE == self.config.handle_mode {
            Ok(())
        } else {
            Err(HostError::ModeMismatch {
                expected: self.config.handle_mode,
                found: H::MODE,
            })
        }
    }

    fn slot_of<H: SlotHandle>(&self, handle: H, operation: &'static str) -> Result<u32, HostError> {
        self.check_mode::<H>()?;
        if !handle.is_valid() {
            return Err(HostError::InvalidHandle { operation });
        }
        handle.slot().ok_or_else(|| HostError::unknown_handle(handle))
    }

    fn insert<H: SlotHandle>(&mut self, entry: HostEntry) -> Result<H, HostError> {
        self.check_mode::<H>()?;
        let slot = self.table.insert(entry)?;
        match H::from_slot(slot) {
            Some(handle) => Ok(handle),
            None => {
                self.table.remove(slot)?;
                Err(HostError::TableFull {
                    capacity: self.table.capacity(),
                })
            }
        }
    }

    /// Remove an entry after checking its kind, leaving mismatches in place.
    fn remove_kind<H: SlotHandle>(
        &mut self,
        handle: H,
        operation: &'static str,
        expected: &'static str,
    ) -> Result<HostEntry, HostError> {
        let slot = self.slot_of(handle, operation)?;
        let kind = self
            .table
            .get(slot)
            .map_err(|_| HostError::unknown_handle(handle))?
            .kind();
        if kind != expected {
            return Err(HostError::kind_mismatch(handle, expected));
        }
        self.table.remove(slot)
    }

    fn record(&mut self, fault: HostError) {
        error!(%fault, "host rejected resource operation");
        self.stats.faults += 1;
        self.faults.push(fault);
    }
}

fn with_host<T>(f: impl FnOnce(&mut HostRuntime) -> T) -> T {
    HOST.with(|host| f(&mut host.borrow_mut()))
}

fn record<T>(result: Result<T, HostError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(fault) => {
            with_host(|host| host.record(fault));
            None
        }
    }
}

/// Replace this thread's host with a fresh one using `config`.
///
/// Destructors still queued in the previous host are discarded with it.
pub fn install(config: HostConfig) {
    info!(
        handle_mode = %config.handle_mode,
        max_handles = config.max_handles,
        destructor_timing = ?config.destructor_timing,
        "host installed"
    );
    let previous = with_host(|host| std::mem::replace(host, HostRuntime::new(config)));
    if !previous.table.is_empty() || !previous.pending.is_empty() {
        debug!(
            live = previous.table.len(),
            pending = previous.pending.len(),
            "previous host discarded with live registrations"
        );
    }
}

/// Handle mode of the installed host.
pub fn handle_mode() -> HandleMode {
    with_host(|host| host.config.handle_mode)
}

/// Destructor timing of the installed host.
pub fn destructor_timing() -> DestructorTiming {
    with_host(|host| host.config.destructor_timing)
}

/// `resource.new`: register a guest object and return its handle.
///
/// A rejected registration returns the invalid sentinel and records a fault.
pub fn resource_new<H: SlotHandle>(rep: *mut u8, dtor: Destructor, type_name: &'static str) -> H {
    let entry = HostEntry::Exported {
        rep: rep as usize,
        dtor,
        type_name,
    };
    let handle = record(with_host(|host| host.insert::<H>(entry)));
    match handle {
        Some(handle) => {
            with_host(|host| host.stats.registered += 1);
            debug!(?handle, resource = type_name, "resource.new");
            handle
        }
        None => H::INVALID,
    }
}

/// `resource.drop` for an exported resource.
///
/// The registration leaves the table at once. Its destructor runs before
/// this returns under [`DestructorTiming::Immediate`], or at the next
/// [`flush_deferred`] otherwise.
pub fn resource_drop<H: SlotHandle>(handle: H) {
    let removed = with_host(|host| host.remove_kind(handle, "resource.drop", "exported"));
    let Some(entry) = record(removed) else {
        return;
    };
    let HostEntry::Exported {
        rep,
        dtor,
        type_name,
    } = entry
    else {
        return;
    };

    debug!(?handle, resource = type_name, "resource.drop");
    let call = PendingDtor {
        rep,
        dtor,
        type_name,
    };
    let timing = with_host(|host| {
        host.stats.drop_requests += 1;
        host.config.destructor_timing
    });
    match timing {
        DestructorTiming::Immediate => call.run(),
        DestructorTiming::Deferred => with_host(|host| host.pending.push(call)),
    }
}

/// `resource.rep`: the guest representation behind an exported handle.
pub fn resource_rep<H: SlotHandle>(handle: H) -> Result<*mut u8, HostError> {
    with_host(|host| {
        let slot = host.slot_of(handle, "resource.rep")?;
        match host.table.get(slot) {
            Ok(HostEntry::Exported { rep, .. }) => Ok(*rep as *mut u8),
            Ok(HostEntry::Imported { .. }) => Err(HostError::kind_mismatch(handle, "exported")),
            Err(_) => Err(HostError::unknown_handle(handle)),
        }
    })
}

/// Create a host-owned resource and hand its handle to the guest.
pub fn import_new<H: SlotHandle>(name: &str) -> Result<H, HostError> {
    let entry = HostEntry::Imported {
        name: name.to_string(),
    };
    let handle = with_host(|host| host.insert::<H>(entry))?;
    with_host(|host| host.stats.imports_created += 1);
    debug!(?handle, name, "imported resource created");
    Ok(handle)
}

/// `resource.drop` for an imported resource: the guest gives its handle back.
pub fn import_drop<H: SlotHandle>(handle: H) {
    let removed = with_host(|host| host.remove_kind(handle, "resource.drop", "imported"));
    if let Some(HostEntry::Imported { name }) = record(removed) {
        with_host(|host| host.stats.imports_released += 1);
        debug!(?handle, name, "imported resource released");
    }
}

/// Run every queued destructor, including ones queued while flushing.
///
/// Returns how many destructors ran.
pub fn flush_deferred() -> usize {
    let mut ran = 0;
    loop {
        let batch = with_host(|host| std::mem::take(&mut host.pending));
        if batch.is_empty() {
            return ran;
        }
        ran += batch.len();
        for call in batch {
            call.run();
        }
    }
}

/// Counters since the last [`install`].
pub fn stats() -> HostStats {
    with_host(|host| host.stats.clone())
}

/// Number of live table entries.
pub fn live_handles() -> usize {
    with_host(|host| host.table.len())
}

/// Number of destructors waiting for [`flush_deferred`].
pub fn pending_destructors() -> usize {
    with_host(|host| host.pending.len())
}

/// Drain the recorded faults.
pub fn take_faults() -> Vec<HostError> {
    with_host(|host| std::mem::take(&mut host.faults))
}
