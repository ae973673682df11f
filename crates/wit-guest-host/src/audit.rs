//! Lifecycle audit.
//!
//! Drives the guest ownership types against the installed host and checks the
//! exactly-once contracts they promise:
//!
//! | Check                      | Contract                                             |
//! |----------------------------|------------------------------------------------------|
//! | `buffer.copy_from_view`    | copy matches the view, one allocation, one release   |
//! | `buffer.move`              | moved-from buffer is empty and releases nothing      |
//! | `buffer.leak`              | leaked buffer releases nothing until `drop_raw`      |
//! | `vector.elements`          | element access, move and leak on a vector            |
//! | `export.registration`      | new registrations carry a valid handle               |
//! | `export.drop_once`         | one drop request, one destructor, stale second drop  |
//! | `export.into_handle_once`  | only the first transfer yields the handle            |
//! | `export.reattach`          | a transferred handle can be adopted back             |
//! | `export.nested_teardown`   | destructors may drop further resources               |
//! | `import.<name>.release`    | an owning wrapper releases its handle once           |
//! | `import.<name>.transfer`   | moves clear the source                               |
//! | `import.assign_over_live`  | assigning over a live handle is rejected             |
//! | `host.no_leaks`            | no live handles or pending destructors remain        |
//!
//! Every scenario runs `iterations` times; a check fails if any iteration
//! fails. Host faults a scenario does not expect fail that scenario.

use std::cell::Cell;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use wit_guest_common::{AuditConfig, DestructorTiming, HandleMode, ImportEntry};
use wit_guest_core::{
    alloc, ExportedResourceHandle, GuestResource, HostOwned, ImportedResource,
    ImportedResourceHandle, LinearBuffer, LinearVector, Owned,
};

use crate::runtime::{self, HostStats};
use crate::table::SlotHandle;

/// Serializes panic hook swaps across threads.
static PANIC_HOOK: Mutex<()> = Mutex::new(());

/// Result of one named check over all iterations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    /// Check name, e.g. `export.drop_once`.
    pub name: String,
    /// Whether every iteration passed.
    pub passed: bool,
    /// First failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Audit results and the host counters after the run.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    /// Handle mode the audit ran in.
    pub mode: HandleMode,
    /// Destructor timing of the host.
    pub timing: DestructorTiming,
    /// Iterations per scenario.
    pub iterations: u32,
    /// Outcome per check, in first-run order.
    pub checks: Vec<CheckOutcome>,
    /// Host counters at the end of the run.
    pub host: HostStats,
}

impl AuditReport {
    /// Returns `true` if every check passed.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    /// Checks that failed.
    pub fn failures(&self) -> Vec<&CheckOutcome> {
        self.checks.iter().filter(|check| !check.passed).collect()
    }
}

/// Run the audit against the host installed on this thread.
pub fn run(config: &AuditConfig, imports: &[ImportEntry]) -> AuditReport {
    match runtime::handle_mode() {
        HandleMode::Integer => run_with::<i32>(config, imports),
        HandleMode::Pointer => run_with::<*mut u8>(config, imports),
    }
}

fn run_with<H: SlotHandle>(config: &AuditConfig, imports: &[ImportEntry]) -> AuditReport {
    let mode = H::MODE;
    let iterations = config.iterations.max(1);
    let timing = runtime::destructor_timing();
    info!(%mode, ?timing, iterations, imports = imports.len(), "starting lifecycle audit");

    let earlier = runtime::take_faults();
    if !earlier.is_empty() {
        warn!(faults = earlier.len(), "discarding host faults recorded before the audit");
    }

    let live_at_start = runtime::live_handles();
    let memory_at_start = alloc::stats();
    let mut recorder = Recorder::default();

    for iteration in 0..iterations {
        debug!(iteration, "audit iteration");
        let payload = config.payload.as_str();

        recorder.run("buffer.copy_from_view", iteration, || buffer_copy(payload));
        recorder.run("buffer.move", iteration, || buffer_move(payload));
        recorder.run("buffer.leak", iteration, || buffer_leak(payload));
        recorder.run("vector.elements", iteration, vector_elements);

        recorder.run("export.registration", iteration, export_registration::<H>);
        recorder.run("export.drop_once", iteration, export_drop_once::<H>);
        recorder.run("export.into_handle_once", iteration, export_into_handle_once::<H>);
        recorder.run("export.reattach", iteration, export_reattach::<H>);
        recorder.run("export.nested_teardown", iteration, export_nested_teardown::<H>);

        for entry in imports {
            let name = entry.name.as_str();
            recorder.run(&format!("import.{name}.release"), iteration, || {
                import_release::<H>(name)
            });
            recorder.run(&format!("import.{name}.transfer"), iteration, || {
                import_transfer::<H>(name)
            });
        }
        recorder.run("import.assign_over_live", iteration, import_assign_over_live::<H>);
    }

    runtime::flush_deferred();
    recorder.run("host.no_leaks", iterations, || -> CheckResult {
        let live = runtime::live_handles();
        ensure(live == live_at_start, || {
            format!("{} handles left in the table", live.saturating_sub(live_at_start))
        })?;
        let pending = runtime::pending_destructors();
        ensure(pending == 0, || format!("{pending} destructors never ran"))?;
        let memory = alloc::stats().since(memory_at_start);
        ensure(memory.live() == 0, || {
            format!("{} linear memory regions never released", memory.live())
        })
    });

    let report = AuditReport {
        mode,
        timing,
        iterations,
        checks: recorder.checks,
        host: runtime::stats(),
    };
    info!(
        passed = report.passed(),
        checks = report.checks.len(),
        failures = report.failures().len(),
        "lifecycle audit finished"
    );
    report
}

type CheckResult = Result<(), String>;

fn ensure(condition: bool, detail: impl FnOnce() -> String) -> CheckResult {
    if condition { Ok(()) } else { Err(detail()) }
}

/// Folds per-iteration results into one outcome per check.
#[derive(Default)]
struct Recorder {
    checks: Vec<CheckOutcome>,
}

impl Recorder {
    fn run(&mut self, name: &str, iteration: u32, scenario: impl FnOnce() -> CheckResult) {
        let result = scenario();
        let faults = runtime::take_faults();
        let result = result.and_then(|()| {
            ensure(faults.is_empty(), || {
                let faults: Vec<String> = faults.iter().map(ToString::to_string).collect();
                format!("unexpected host faults: {}", faults.join("; "))
            })
        });
        self.record(name, iteration, result);
    }

    fn record(&mut self, name: &str, iteration: u32, result: CheckResult) {
        let index = match self.checks.iter().position(|check| check.name == name) {
            Some(index) => index,
            None => {
                self.checks.push(CheckOutcome {
                    name: name.to_string(),
                    passed: true,
                    detail: None,
                });
                self.checks.len() - 1
            }
        };

        if let Err(detail) = result {
            warn!(check = name, iteration, %detail, "audit check failed");
            let check = &mut self.checks[index];
            if check.passed {
                check.passed = false;
                check.detail = Some(format!("iteration {iteration}: {detail}"));
            }
        }
    }
}

/// Exported resource used by the audit; may own further probes.
struct Probe<H: SlotHandle> {
    dropped: Rc<Cell<bool>>,
    children: Vec<Owned<Probe<H>>>,
}

impl<H: SlotHandle> Probe<H> {
    fn with_children(children: Vec<Owned<Probe<H>>>) -> (Self, Rc<Cell<bool>>) {
        let dropped = Rc::new(Cell::new(false));
        let probe = Self {
            dropped: Rc::clone(&dropped),
            children,
        };
        (probe, dropped)
    }

    fn leaf() -> (Self, Rc<Cell<bool>>) {
        Self::with_children(Vec::new())
    }
}

impl<H: SlotHandle> Drop for Probe<H> {
    fn drop(&mut self) {
        self.dropped.set(true);
        if !self.children.is_empty() {
            debug!(children = self.children.len(), "probe releasing children");
        }
    }
}

impl<H: SlotHandle> GuestResource for Probe<H> {
    type Handle = H;

    fn resource_new(rep: *mut u8) -> H {
        runtime::resource_new(rep, ExportedResourceHandle::<Self>::dtor, "probe")
    }

    fn resource_drop(handle: H) {
        runtime::resource_drop(handle);
    }
}

/// Host-owned resource used by the audit.
#[allow(dead_code)] // type-level only
struct HostResource<H>(PhantomData<H>);

impl<H: SlotHandle> ImportedResource for HostResource<H> {
    type Handle = H;

    fn resource_drop(handle: H) {
        runtime::import_drop(handle);
    }
}

fn buffer_copy(payload: &str) -> CheckResult {
    let before = alloc::stats();
    let buffer = LinearBuffer::from_view(payload.as_bytes());
    ensure(buffer.len() == payload.len(), || {
        format!("length {} for a {}-byte view", buffer.len(), payload.len())
    })?;
    ensure(buffer.as_bytes() == payload.as_bytes(), || {
        "contents differ from the view".to_string()
    })?;
    drop(buffer);

    let delta = alloc::stats().since(before);
    ensure(delta.allocations == delta.releases, || {
        format!("{} allocations, {} releases", delta.allocations, delta.releases)
    })
}

fn buffer_move(payload: &str) -> CheckResult {
    let mut source = LinearBuffer::from_view(payload.as_bytes());
    let target = source.take();
    ensure(source.is_empty() && source.as_ptr().is_null(), || {
        "moved-from buffer still owns a region".to_string()
    })?;
    ensure(target.as_bytes() == payload.as_bytes(), || {
        "moved buffer lost its contents".to_string()
    })?;

    let before = alloc::stats();
    drop(source);
    let released = alloc::stats().since(before).releases;
    ensure(released == 0, || format!("moved-from buffer released {released} regions"))?;

    drop(target);
    let released = alloc::stats().since(before).releases;
    let expected = u64::from(!payload.is_empty());
    ensure(released == expected, || {
        format!("owner released {released} regions, expected {expected}")
    })
}

#[allow(unsafe_code)]
fn buffer_leak(payload: &str) -> CheckResult {
    let mut buffer = LinearBuffer::from_view(payload.as_bytes());
    let (ptr, len) = buffer.leak();

    let before = alloc::stats();
    drop(buffer);
    let released_on_drop = alloc::stats().since(before).releases;
    // SAFETY: the region was leaked above and is released only here.
    unsafe { LinearBuffer::drop_raw(ptr) };
    let released = alloc::stats().since(before).releases;

    ensure(len == payload.len(), || format!("leaked {len} bytes of {}", payload.len()))?;
    ensure(released_on_drop == 0, || "dropping a leaked buffer released it".to_string())?;
    ensure(released == u64::from(len > 0), || {
        format!("receiver released {released} regions")
    })
}

#[allow(unsafe_code)]
fn vector_elements() -> CheckResult {
    let elements: Vec<u32> = (1..=8).collect();
    let mut vector = LinearVector::from_slice(&elements);
    vector[3] = 40;
    // SAFETY: the vector holds eight elements.
    let first = unsafe { *vector.get_unchecked(0) };
    let sum: u32 = vector.iter().sum();
    ensure(vector.len() == 8 && first == 1 && sum == 72, || {
        format!("len {}, first {first}, sum {sum}", vector.len())
    })?;

    let before = alloc::stats();
    let mut moved = vector.take();
    drop(vector);
    ensure(alloc::stats().since(before).releases == 0, || {
        "moved-from vector released its block".to_string()
    })?;

    let (ptr, len) = moved.leak();
    drop(moved);
    ensure(alloc::stats().since(before).releases == 0, || {
        "leaked vector released its block".to_string()
    })?;
    // SAFETY: the block was leaked above and is released only here.
    unsafe { LinearVector::drop_raw(ptr) };
    ensure(len == 8 && alloc::stats().since(before).releases == 1, || {
        format!("leaked {len} elements, receiver release not counted")
    })
}

fn export_registration<H: SlotHandle>() -> CheckResult {
    runtime::flush_deferred();
    let (probe, _) = Probe::<H>::leaf();
    let owned = ExportedResourceHandle::new(probe);
    let handle = owned.get_handle();
    ensure(handle.is_valid(), || format!("registered with {handle:?}"))?;

    let rep = runtime::resource_rep(handle).map_err(|e| e.to_string())?;
    ensure(rep == owned.rep(), || {
        format!("host stores {rep:?}, registration lives at {:?}", owned.rep())
    })
}

fn export_drop_once<H: SlotHandle>() -> CheckResult {
    runtime::flush_deferred();
    let (probe, dropped) = Probe::<H>::leaf();
    let owned = ExportedResourceHandle::new(probe);
    let handle = owned.get_handle();

    let before = runtime::stats();
    drop(owned);
    runtime::flush_deferred();
    let after = runtime::stats();

    let requests = after.drop_requests - before.drop_requests;
    ensure(requests == 1, || format!("{requests} drop requests for {handle:?}"))?;
    let destructors = after.destructors_run - before.destructors_run;
    ensure(destructors == 1, || format!("{destructors} destructor calls"))?;
    ensure(dropped.get(), || "resource value was not dropped".to_string())?;

    // The host refuses a second drop of the same handle.
    runtime::resource_drop(handle);
    runtime::flush_deferred();
    let faults = runtime::take_faults();
    ensure(
        matches!(faults.as_slice(), [fault] if fault.is_stale_handle()),
        || format!("second drop produced {faults:?}"),
    )?;
    let destructors = runtime::stats().destructors_run - after.destructors_run;
    ensure(destructors == 0, || "second drop ran the destructor again".to_string())
}

#[allow(unsafe_code)]
fn export_into_handle_once<H: SlotHandle>() -> CheckResult {
    runtime::flush_deferred();
    let (probe, dropped) = Probe::<H>::leaf();
    let owned = ExportedResourceHandle::new(probe);
    let registration = owned.registration();
    // SAFETY: `owned` is dropped below, before `first` is released.
    let first = unsafe { registration.into_handle() };
    // SAFETY: as above.
    let second = unsafe { registration.into_handle() };

    let before = runtime::stats();
    drop(owned);
    runtime::flush_deferred();
    let requests = runtime::stats().drop_requests - before.drop_requests;
    let survived = !dropped.get();

    // The caller now owns the handle and releases it.
    runtime::resource_drop(first);
    runtime::flush_deferred();

    ensure(first.is_valid(), || format!("first transfer yielded {first:?}"))?;
    ensure(second == H::INVALID, || format!("second transfer yielded {second:?}"))?;
    ensure(requests == 0, || "detached owner requested a drop".to_string())?;
    ensure(survived, || "detached owner destroyed the value".to_string())?;
    ensure(dropped.get(), || "host release did not run the destructor".to_string())
}

#[allow(unsafe_code)]
fn export_reattach<H: SlotHandle>() -> CheckResult {
    runtime::flush_deferred();
    let (probe, dropped) = Probe::<H>::leaf();
    let owned = ExportedResourceHandle::new(probe);
    let handle = owned.into_handle();
    ensure(!dropped.get(), || "transfer destroyed the value".to_string())?;

    let rep = runtime::resource_rep(handle).map_err(|e| e.to_string())?;
    // SAFETY: `rep` is the live, detached registration behind `handle` and
    // nothing else owns it.
    let owned = unsafe { Owned::<Probe<H>>::reattach(handle, rep) };
    ensure(owned.get_handle() == handle, || {
        format!("reattached with {:?}, expected {handle:?}", owned.get_handle())
    })?;

    drop(owned);
    runtime::flush_deferred();
    ensure(dropped.get(), || "reattached owner did not release".to_string())
}

fn export_nested_teardown<H: SlotHandle>() -> CheckResult {
    runtime::flush_deferred();
    let baseline = runtime::live_handles();

    let (left, left_dropped) = Probe::<H>::leaf();
    let (right, right_dropped) = Probe::<H>::leaf();
    let children = vec![ExportedResourceHandle::new(left), ExportedResourceHandle::new(right)];
    let (parent, parent_dropped) = Probe::with_children(children);
    let parent = ExportedResourceHandle::new(parent);
    let live = runtime::live_handles() - baseline;
    ensure(live == 3, || format!("{live} registrations for a parent with two children"))?;

    let before = runtime::stats();
    drop(parent);
    runtime::flush_deferred();
    let destructors = runtime::stats().destructors_run - before.destructors_run;

    ensure(
        parent_dropped.get() && left_dropped.get() && right_dropped.get(),
        || {
            format!(
                "dropped: parent {}, left {}, right {}",
                parent_dropped.get(),
                left_dropped.get(),
                right_dropped.get()
            )
        },
    )?;
    ensure(destructors == 3, || format!("{destructors} destructor calls"))?;
    let live = runtime::live_handles();
    ensure(live == baseline, || format!("{} registrations left", live - baseline))
}

fn import_release<H: SlotHandle>(name: &str) -> CheckResult {
    let before = runtime::stats();
    let handle = runtime::import_new::<H>(name).map_err(|e| e.to_string())?;
    let owned = HostOwned::<HostResource<H>>::from_handle(handle);
    ensure(owned.get_handle() == handle, || "wrapper changed the handle".to_string())?;
    drop(owned);

    let released = runtime::stats().imports_released - before.imports_released;
    ensure(released == 1, || format!("{released} releases for {handle:?}"))
}

fn import_transfer<H: SlotHandle>(name: &str) -> CheckResult {
    let handle = runtime::import_new::<H>(name).map_err(|e| e.to_string())?;
    let mut source = ImportedResourceHandle::new(handle);
    let mut target = source.take();
    let cleared = !source.is_valid();

    let first = target.into_handle();
    let second = target.into_handle();
    runtime::import_drop(first);

    ensure(cleared, || "moved-from handle is still valid".to_string())?;
    ensure(first == handle, || format!("first transfer yielded {first:?}"))?;
    ensure(second == H::INVALID, || format!("second transfer yielded {second:?}"))
}

fn import_assign_over_live<H: SlotHandle>() -> CheckResult {
    let held = runtime::import_new::<H>("assign-target").map_err(|e| e.to_string())?;
    let incoming = runtime::import_new::<H>("assign-source").map_err(|e| e.to_string())?;

    let outcome = {
        let _guard = PANIC_HOOK.lock().unwrap_or_else(PoisonError::into_inner);
        let hook = panic::take_hook();
        panic::set_hook(Box::new(|_| {}));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut target = ImportedResourceHandle::new(held);
            target.assign(ImportedResourceHandle::new(incoming));
            target.into_handle()
        }));
        panic::set_hook(hook);
        outcome
    };

    runtime::import_drop(held);
    runtime::import_drop(incoming);
    ensure(outcome.is_err(), || "assignment over a live handle was accepted".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wit_guest_common::HostConfig;

    fn imports() -> Vec<ImportEntry> {
        vec![ImportEntry {
            name: "logger".to_string(),
        }]
    }

    #[test]
    fn test_audit_passes_with_defaults() {
        runtime::install(HostConfig::default());
        let report = run(&AuditConfig::default(), &imports());

        assert!(report.passed(), "failures: {:?}", report.failures());
        assert_eq!(report.mode, HandleMode::Integer);
        assert_eq!(report.iterations, 4);
        assert!(report.checks.iter().any(|c| c.name == "import.logger.release"));
        assert_eq!(report.host.faults, 4, "one expected double-drop fault per iteration");
    }

    #[test]
    fn test_audit_passes_pointer_deferred() {
        runtime::install(HostConfig {
            handle_mode: HandleMode::Pointer,
            destructor_timing: DestructorTiming::Deferred,
            ..Default::default()
        });
        let config = AuditConfig {
            iterations: 2,
            payload: String::new(),
        };
        let report = run(&config, &imports());

        assert!(report.passed(), "failures: {:?}", report.failures());
        assert_eq!(report.mode, HandleMode::Pointer);
        assert_eq!(report.timing, DestructorTiming::Deferred);
    }

    #[test]
    fn test_zero_iterations_still_runs_once() {
        runtime::install(HostConfig::default());
        let config = AuditConfig {
            iterations: 0,
            ..Default::default()
        };
        let report = run(&config, &[]);
        assert_eq!(report.iterations, 1);
        assert!(report.passed());
    }

    #[test]
    fn test_earlier_faults_are_not_blamed_on_checks() {
        runtime::install(HostConfig::default());
        runtime::resource_drop(42_i32);

        let report = run(&AuditConfig::default(), &[]);
        assert!(report.passed(), "failures: {:?}", report.failures());
    }

    #[test]
    fn test_import_name_checks_are_aggregated() {
        runtime::install(HostConfig::default());
        let config = AuditConfig {
            iterations: 3,
            ..Default::default()
        };
        let report = run(&config, &imports());

        let names: Vec<&str> = report.checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names.iter().filter(|n| **n == "import.logger.transfer").count(), 1);
        assert_eq!(names.last(), Some(&"host.no_leaks"));
        assert_eq!(report.host.imports_created, report.host.imports_released);
    }

    #[test]
    fn test_recorder_keeps_first_failure() {
        let mut recorder = Recorder::default();
        recorder.record("check", 0, Ok(()));
        recorder.record("check", 1, Err("first".to_string()));
        recorder.record("check", 2, Err("second".to_string()));

        assert_eq!(
            recorder.checks,
            vec![CheckOutcome {
                name: "check".to_string(),
                passed: false,
                detail: Some("iteration 1: first".to_string()),
            }]
        );
    }

    #[test]
    fn test_report_serialization() {
        runtime::install(HostConfig::default());
        let report = run(&AuditConfig::default(), &[]);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["mode"], "integer");
        assert_eq!(json["timing"], "immediate");
        assert!(json["checks"][0].get("detail").is_none());
        assert!(json["host"]["registered"].as_u64().unwrap() > 0);
    }
}
