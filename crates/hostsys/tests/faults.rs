//! Fault interception: resume, escalation with snapshots, abort

mod common;

use hostsys::{FaultAction, FaultContext, SysError, System, SystemConfig, Thread};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Address every test fault touches
const BAD_ADDR: usize = 16;

static RESUME_AT: AtomicUsize = AtomicUsize::new(0);
static HITS: AtomicUsize = AtomicUsize::new(0);
static FAULT_STACK: AtomicUsize = AtomicUsize::new(0);

/// Registration is process-wide; in-process tests take turns
static SERIAL: Mutex<()> = Mutex::new(());

/// Load from BAD_ADDR after publishing the address just past the load
#[inline(never)]
fn faulting_load() {
    unsafe {
        #[cfg(target_arch = "x86_64")]
        core::arch::asm!(
            "lea {tmp}, [rip + 2f]",
            "mov qword ptr [{slot}], {tmp}",
            "mov {tmp}, qword ptr [{bad}]",
            "2:",
            tmp = out(reg) _,
            slot = in(reg) RESUME_AT.as_ptr(),
            bad = in(reg) BAD_ADDR,
            options(nostack),
        );
        #[cfg(target_arch = "aarch64")]
        core::arch::asm!(
            "adr {tmp}, 2f",
            "str {tmp}, [{slot}]",
            "ldr {tmp}, [{bad}]",
            "2:",
            tmp = out(reg) _,
            slot = in(reg) RESUME_AT.as_ptr(),
            bad = in(reg) BAD_ADDR,
            options(nostack),
        );
    }
}

fn skip_faulting_load(ctx: &mut FaultContext) -> FaultAction {
    let resume_at = RESUME_AT.load(Ordering::SeqCst);
    if ctx.address() != BAD_ADDR || resume_at == 0 {
        return FaultAction::NotHandled;
    }
    HITS.fetch_add(1, Ordering::SeqCst);
    FAULT_STACK.store(ctx.stack, Ordering::SeqCst);
    ctx.ip = resume_at;
    FaultAction::Resume
}

fn declined(_: &mut FaultContext) -> FaultAction {
    FaultAction::NotHandled
}

#[test]
fn resume_redirects_execution() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let system = System::new(SystemConfig::new()).unwrap();
    HITS.store(0, Ordering::SeqCst);

    system.handle_faults(skip_faulting_load).unwrap();

    faulting_load();
    assert_eq!(HITS.load(Ordering::SeqCst), 1);
    assert_ne!(FAULT_STACK.load(Ordering::SeqCst), 0);

    // And from a runtime thread
    let worker = system
        .start(Arc::new(|_: &Arc<Thread>| {
            for _ in 0..3 {
                faulting_load();
            }
        }))
        .unwrap();
    worker.join().unwrap();
    assert_eq!(HITS.load(Ordering::SeqCst), 4);

    system.stop_handling_faults().unwrap();
}

#[test]
fn single_registration() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let system = System::new(SystemConfig::new()).unwrap();
    let other = System::new(SystemConfig::new()).unwrap();

    assert_eq!(system.stop_handling_faults(), Err(SysError::NotInstalled));
    system.handle_faults(declined).unwrap();

    // Process-wide: a second System cannot register either
    assert_eq!(other.handle_faults(declined), Err(SysError::AlreadyInstalled));
    assert_eq!(SysError::AlreadyInstalled.status(), hostsys::status_of(&other.handle_faults(declined)));

    // Nor remove one it did not install
    assert_eq!(other.stop_handling_faults(), Err(SysError::NotInstalled));

    system.stop_handling_faults().unwrap();
    assert_eq!(system.stop_handling_faults(), Err(SysError::NotInstalled));
}

#[test]
fn dropping_installer_removes_handler() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let system = System::new(SystemConfig::new()).unwrap();
    system.handle_faults(declined).unwrap();
    drop(system);

    let next = System::new(SystemConfig::new()).unwrap();
    next.handle_faults(declined).unwrap();
    next.stop_handling_faults().unwrap();
}

#[test]
fn child_escalated_fault() {
    if !common::is_child("child_escalated_fault") {
        return;
    }
    let system = System::from_env().unwrap();
    system.handle_faults(declined).unwrap();
    faulting_load();
    unreachable!();
}

#[test]
fn escalated_fault_writes_snapshot_and_dies() {
    let dir = common::scratch_dir("escalate");
    let signal = common::run_child("child_escalated_fault", &[("HOSTSYS_CRASH_DUMP_DIR", &dir)]);
    assert_eq!(signal, Some(libc::SIGSEGV));

    let files = common::dump_files(&dir);
    assert_eq!(files.len(), 1);
    let text = std::fs::read_to_string(&files[0]).unwrap();
    assert!(text.contains("signal: 11\n"));
    assert!(text.contains("address: 0x0000000000000010\n"));
    assert!(text.contains("frames:\n  #0 0x"));
    // faulting_load's frame links back to the test that called it
    assert!(!text.contains("frame: 0x0000000000000000\n"));
    assert!(text.contains("\n  #1 0x"), "single-frame snapshot:\n{}", text);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn child_escalated_fault_no_dump_dir() {
    if !common::is_child("child_escalated_fault_no_dump_dir") {
        return;
    }
    let system = System::new(SystemConfig::new()).unwrap();
    system.handle_faults(declined).unwrap();
    faulting_load();
    unreachable!();
}

#[test]
fn escalated_fault_without_dump_dir_dies() {
    let signal = common::run_child("child_escalated_fault_no_dump_dir", &[]);
    assert_eq!(signal, Some(libc::SIGSEGV));
}

#[test]
fn child_fault_after_uninstall() {
    if !common::is_child("child_fault_after_uninstall") {
        return;
    }
    let system = System::from_env().unwrap();
    system.handle_faults(skip_faulting_load).unwrap();
    system.stop_handling_faults().unwrap();
    faulting_load();
    unreachable!();
}

#[test]
fn uninstall_restores_previous_handler() {
    let dir = common::scratch_dir("uninstall");
    let signal = common::run_child("child_fault_after_uninstall", &[("HOSTSYS_CRASH_DUMP_DIR", &dir)]);
    assert_eq!(signal, Some(libc::SIGSEGV));
    assert!(common::dump_files(&dir).is_empty());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn child_system_abort() {
    if !common::is_child("child_system_abort") {
        return;
    }
    let system = System::from_env().unwrap();
    system.abort();
}

#[test]
fn abort_writes_snapshot() {
    let dir = common::scratch_dir("abort");
    let signal = common::run_child("child_system_abort", &[("HOSTSYS_CRASH_DUMP_DIR", &dir)]);
    assert_eq!(signal, Some(libc::SIGABRT));

    let files = common::dump_files(&dir);
    assert_eq!(files.len(), 1);
    let text = std::fs::read_to_string(&files[0]).unwrap();
    assert!(text.contains("signal: 6\n"));
    let _ = std::fs::remove_dir_all(&dir);
}
