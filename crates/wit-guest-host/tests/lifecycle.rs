//! Integration tests for wit-guest-host.
//!
//! These tests drive the guest ownership types against the in-process host:
//! - Buffer ownership transfer and allocator pairing
//! - Exported resource registration, drop and destructor dispatch
//! - Reentrant teardown under both destructor timings
//! - Imported resource release and transfer
//! - Host fault recording

use std::cell::{Cell, RefCell};

use wit_guest_common::{ConfigFile, DestructorTiming, HandleMode, HostConfig, HostError};
use wit_guest_core::{
    alloc, ExportedResourceHandle, GuestResource, HostOwned, ImportedResource,
    ImportedResourceHandle, LinearBuffer, Owned,
};
use wit_guest_host::{audit, runtime};

thread_local! {
    static EVENTS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn log(event: impl Into<String>) {
    EVENTS.with(|e| e.borrow_mut().push(event.into()));
}

fn events() -> Vec<String> {
    EVENTS.with(|e| e.borrow_mut().drain(..).collect())
}

/// Guest resource backed by the host runtime, integer handles.
struct Counter {
    label: &'static str,
    hits: Cell<u32>,
    inner: Option<Owned<Counter>>,
}

impl Counter {
    fn new(label: &'static str) -> Owned<Counter> {
        ExportedResourceHandle::new(Counter {
            label,
            hits: Cell::new(0),
            inner: None,
        })
    }

    fn wrapping(label: &'static str, inner: Owned<Counter>) -> Owned<Counter> {
        ExportedResourceHandle::new(Counter {
            label,
            hits: Cell::new(0),
            inner: Some(inner),
        })
    }
}

impl Drop for Counter {
    fn drop(&mut self) {
        log(format!("drop {}", self.label));
    }
}

impl GuestResource for Counter {
    type Handle = i32;

    fn resource_new(rep: *mut u8) -> i32 {
        runtime::resource_new(rep, ExportedResourceHandle::<Self>::dtor, "counter")
    }

    fn resource_drop(handle: i32) {
        log(format!("request {handle}"));
        runtime::resource_drop(handle);
    }
}

/// Same shape with pointer-sized handles.
struct Token;

impl Drop for Token {
    fn drop(&mut self) {
        log("drop token");
    }
}

impl GuestResource for Token {
    type Handle = *mut u8;

    fn resource_new(rep: *mut u8) -> *mut u8 {
        runtime::resource_new(rep, ExportedResourceHandle::<Self>::dtor, "token")
    }

    fn resource_drop(handle: *mut u8) {
        runtime::resource_drop(handle);
    }
}

struct Logger;

impl ImportedResource for Logger {
    type Handle = i32;

    fn resource_drop(handle: i32) {
        log(format!("release {handle}"));
        runtime::import_drop(handle);
    }
}

fn deferred() -> HostConfig {
    HostConfig {
        destructor_timing: DestructorTiming::Deferred,
        ..Default::default()
    }
}

// ============================================================================
// Test: Buffers
// ============================================================================

#[test]
fn test_hello_buffer_move() {
    let before = alloc::stats();

    let mut first = LinearBuffer::from_view(b"hello");
    assert_eq!(first.len(), 5);
    assert_eq!(first.as_bytes(), b"hello");

    let second = first.take();
    assert_eq!(first.len(), 0);
    assert!(first.as_ptr().is_null());
    assert_eq!(second.to_str().unwrap(), "hello");

    drop(first);
    assert_eq!(alloc::stats().since(before).releases, 0);
    drop(second);
    assert_eq!(alloc::stats().since(before).releases, 1);
    assert_eq!(alloc::stats().since(before).live(), 0);
}

#[test]
fn test_leaked_buffer_crosses_to_receiver() {
    let before = alloc::stats();
    let mut buffer = LinearBuffer::from("returned to the host");
    let (ptr, len) = buffer.leak();
    drop(buffer);
    assert_eq!(alloc::stats().since(before).live(), 1);

    // The receiver adopts the region and frees it with the same allocator.
    let adopted = unsafe { LinearBuffer::from_raw(ptr, len) };
    assert_eq!(adopted.to_string_lossy(), "returned to the host");
    drop(adopted);
    assert_eq!(alloc::stats().since(before).live(), 0);
}

// ============================================================================
// Test: Exported Resources
// ============================================================================

#[test]
fn test_drop_requests_once_and_runs_destructor() {
    runtime::install(HostConfig::default());
    events();

    let counter = Counter::new("solo");
    let handle = counter.get_handle();
    assert!(handle >= 0);
    counter.hits.set(3);
    assert_eq!(counter.hits.get(), 3);

    drop(counter);
    assert_eq!(events(), vec![format!("request {handle}"), "drop solo".to_string()]);

    let stats = runtime::stats();
    assert_eq!(stats.registered, 1);
    assert_eq!(stats.drop_requests, 1);
    assert_eq!(stats.destructors_run, 1);
    assert_eq!(runtime::live_handles(), 0);
    assert!(runtime::take_faults().is_empty());
}

#[test]
fn test_borrowed_method_call_through_rep() {
    runtime::install(HostConfig::default());

    let counter = Counter::new("borrowed");
    let rep = runtime::resource_rep(counter.get_handle()).unwrap();
    // An exported method receives `rep` for a borrowed handle.
    let borrowed = unsafe { ExportedResourceHandle::<Counter>::from_rep(rep) };
    borrowed.hits.set(borrowed.hits.get() + 1);

    assert_eq!(counter.hits.get(), 1);
    assert_eq!(borrowed.label, "borrowed");
}

#[test]
fn test_transferred_handle_is_released_by_host() {
    runtime::install(HostConfig::default());
    events();

    let counter = Counter::new("moved");
    let handle = counter.into_handle();
    assert!(events().is_empty(), "transfer issues no drop request");
    assert_eq!(runtime::live_handles(), 1);

    // The host, now owning the handle, drops it.
    runtime::resource_drop(handle);
    assert_eq!(events(), vec!["drop moved".to_string()]);
    assert_eq!(runtime::live_handles(), 0);
}

#[test]
fn test_nested_teardown_immediate() {
    runtime::install(HostConfig::default());
    events();

    let inner = Counter::new("inner");
    let inner_handle = inner.get_handle();
    let outer = Counter::wrapping("outer", inner);
    let outer_handle = outer.get_handle();

    drop(outer);
    assert_eq!(
        events(),
        vec![
            format!("request {outer_handle}"),
            "drop outer".to_string(),
            format!("request {inner_handle}"),
            "drop inner".to_string(),
        ]
    );
    assert_eq!(runtime::stats().destructors_run, 2);
    assert!(runtime::take_faults().is_empty());
}

#[test]
fn test_nested_teardown_deferred() {
    runtime::install(deferred());
    events();

    let outer = Counter::wrapping("outer", Counter::new("inner"));
    drop(outer);
    assert_eq!(runtime::live_handles(), 1, "inner stays registered until outer's destructor");
    assert_eq!(runtime::pending_destructors(), 1);
    assert_eq!(events().len(), 1, "only the drop request so far");

    assert_eq!(runtime::flush_deferred(), 2);
    let seen = events();
    assert_eq!(seen[0], "drop outer");
    assert_eq!(seen[2], "drop inner");
    assert_eq!(runtime::live_handles(), 0);
    assert_eq!(runtime::stats().destructors_run, 2);
}

#[test]
fn test_deferred_value_survives_until_flush() {
    runtime::install(deferred());
    events();

    let counter = Counter::new("late");
    let handle = counter.get_handle();
    let rep = counter.rep();
    drop(counter);
    assert!(runtime::resource_rep(handle).unwrap_err().is_stale_handle());

    // Still allocated: the destructor has not run.
    let pending = unsafe { ExportedResourceHandle::<Counter>::from_rep(rep) };
    assert_eq!(pending.label, "late");
    assert_eq!(pending.get_handle(), -1);

    runtime::flush_deferred();
    assert!(events().contains(&"drop late".to_string()));
}

#[test]
fn test_double_drop_is_a_stale_handle_fault() {
    runtime::install(HostConfig::default());
    let counter = Counter::new("twice");
    let handle = counter.get_handle();
    drop(counter);

    Counter::resource_drop(handle);
    let faults = runtime::take_faults();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].is_stale_handle());
    assert_eq!(runtime::stats().destructors_run, 1);
}

#[test]
fn test_slots_are_reused_across_registrations() {
    runtime::install(HostConfig::default());

    let first = Counter::new("a");
    let first_handle = first.get_handle();
    drop(first);

    let second = Counter::new("b");
    assert_eq!(second.get_handle(), first_handle);
    assert_eq!(runtime::live_handles(), 1);
}

#[test]
#[should_panic(expected = "invalid handle")]
fn test_full_table_fails_registration() {
    runtime::install(HostConfig {
        max_handles: 1,
        ..Default::default()
    });
    let _first = Counter::new("fits");
    let _second = Counter::new("overflows");
}

#[test]
fn test_pointer_mode_resources() {
    runtime::install(HostConfig {
        handle_mode: HandleMode::Pointer,
        ..Default::default()
    });
    events();

    let token = ExportedResourceHandle::new(Token);
    assert!(!token.get_handle().is_null());
    drop(token);
    assert_eq!(events(), vec!["drop token".to_string()]);
}

#[test]
#[should_panic(expected = "invalid handle")]
fn test_handle_mode_mismatch_fails_registration() {
    runtime::install(HostConfig::default());
    let _token = ExportedResourceHandle::new(Token);
}

// ============================================================================
// Test: Imported Resources
// ============================================================================

#[test]
fn test_host_owned_releases_once() {
    runtime::install(HostConfig::default());
    events();

    let handle = runtime::import_new::<i32>("logger").unwrap();
    let logger = HostOwned::<Logger>::from_handle(handle);
    drop(logger);

    assert_eq!(events(), vec![format!("release {handle}")]);
    let stats = runtime::stats();
    assert_eq!(stats.imports_created, 1);
    assert_eq!(stats.imports_released, 1);
    assert!(runtime::take_faults().is_empty());
}

#[test]
fn test_imported_handle_passed_back_to_host() {
    runtime::install(HostConfig::default());

    let handle = runtime::import_new::<i32>("logger").unwrap();
    let logger = HostOwned::<Logger>::from_handle(handle);
    // `own<logger>` argument: the host takes the handle back itself.
    let passed = logger.into_handle();
    runtime::import_drop(passed);

    assert_eq!(runtime::stats().imports_released, 1);
    assert!(runtime::take_faults().is_empty());
}

#[test]
fn test_imported_move_assign_into_empty() {
    runtime::install(HostConfig::default());
    let handle = runtime::import_new::<i32>("logger").unwrap();

    let mut slot = ImportedResourceHandle::<i32>::default();
    let mut source = ImportedResourceHandle::new(handle);
    slot.assign(source.take());
    assert!(!source.is_valid());
    assert_eq!(slot.get_handle(), handle);

    runtime::import_drop(slot.into_handle());
    assert_eq!(runtime::live_handles(), 0);
}

#[test]
#[should_panic(expected = "assigning over live imported handle")]
fn test_imported_move_assign_over_live_is_rejected() {
    runtime::install(HostConfig::default());
    let held = runtime::import_new::<i32>("a").unwrap();
    let incoming = runtime::import_new::<i32>("b").unwrap();

    let mut target = ImportedResourceHandle::new(held);
    target.assign(ImportedResourceHandle::new(incoming));
}

#[test]
fn test_exported_handle_rejected_as_import() {
    runtime::install(HostConfig::default());
    let counter = Counter::new("wrong-kind");

    runtime::import_drop(counter.get_handle());
    let faults = runtime::take_faults();
    assert!(matches!(
        faults.as_slice(),
        [HostError::KindMismatch {
            expected: "imported",
            ..
        }]
    ));
    assert_eq!(runtime::live_handles(), 1);
}

// ============================================================================
// Test: Audit
// ============================================================================

#[test]
fn test_audit_from_config_file() {
    let config = ConfigFile::from_toml(
        r#"
        [host]
        handle_mode = "pointer"
        destructor_timing = "deferred"

        [audit]
        iterations = 2
        payload = "ünïcödé"

        [[imports]]
        name = "logger"

        [[imports]]
        name = "clock"
        "#,
    )
    .unwrap();

    runtime::install(config.host.clone());
    let report = audit::run(&config.audit, &config.imports);

    assert!(report.passed(), "failures: {:?}", report.failures());
    assert_eq!(report.mode, HandleMode::Pointer);
    assert!(report.checks.iter().any(|c| c.name == "import.clock.transfer"));
    assert_eq!(report.host.imports_created, report.host.imports_released);
    assert_eq!(report.host.registered, report.host.destructors_run);
}

#[test]
fn test_audit_leaves_host_clean() {
    runtime::install(deferred());
    let report = audit::run(&Default::default(), &[]);

    assert!(report.passed(), "failures: {:?}", report.failures());
    assert_eq!(runtime::live_handles(), 0);
    assert_eq!(runtime::pending_destructors(), 0);
    assert!(runtime::take_faults().is_empty());
}
