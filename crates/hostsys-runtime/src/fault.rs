//! Process-wide fault interception
//!
//! One [`FaultHandler`] at a time may be registered for SIGSEGV and SIGBUS.
//! On a fault the handler sees the faulting thread's registers and either
//! resumes (with whatever registers it rewrote) or declines, in which case
//! an optional snapshot is written and the fault is chained to the handler
//! that was installed before ours.
//!
//! The registration lives behind a single `AtomicPtr` so the signal handler
//! can reach it without locking. `IN_FLIGHT` counts handlers currently
//! using it; `uninstall` waits for that count to drain before freeing.
//!
//! The registration belongs to the [`FaultInterceptor`] that installed it.
//! Only that handle can remove it, and dropping the handle removes it.
//!
//! Handlers run on the faulting thread's alternate signal stack when it has
//! one (Rust-spawned threads do; attached foreign threads may not), so a
//! stack-overflow fault on a thread without one never reaches the handler.

use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

use hostsys_core::context::{FaultAction, FaultContext, Registers};
use hostsys_core::error::{SysError, SysResult};
use hostsys_core::traits::FaultHandler;
use hostsys_core::{kdebug, kinfo, kwarn};
use nix::sys::signal::{SaFlags, SigAction, Signal};

use crate::arch::MachineContext;
use crate::lock::system_lock;
use crate::signal::{chain, install_handler, restore_handler, ErrnoGuard};
use crate::snapshot::{self, SnapshotTarget};

const FAULT_SIGNALS: [Signal; 2] = [Signal::SIGSEGV, Signal::SIGBUS];

struct Registration {
    owner: u64,
    handler: Box<dyn FaultHandler>,
    snapshot: Option<SnapshotTarget>,
    /// Actions we replaced, indexed like `FAULT_SIGNALS`; empty until the
    /// matching `sigaction` returns
    previous: [OnceLock<SigAction>; 2],
}

impl Registration {
    fn previous_for(&self, signo: libc::c_int) -> Option<SigAction> {
        FAULT_SIGNALS
            .iter()
            .position(|s| *s as libc::c_int == signo)
            .and_then(|i| self.previous[i].get().cloned())
    }
}

static ACTIVE: AtomicPtr<Registration> = AtomicPtr::new(ptr::null_mut());
static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);
static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Handle for registering the process-wide fault handler
#[derive(Debug)]
pub struct FaultInterceptor {
    id: u64,
    max_frames: usize,
}

impl FaultInterceptor {
    /// `max_frames` bounds the frame walk in escalation snapshots
    pub fn new(max_frames: usize) -> Self {
        Self {
            id: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            max_frames,
        }
    }

    /// Whether any handle currently has a handler registered
    pub fn is_installed() -> bool {
        !ACTIVE.load(Ordering::Acquire).is_null()
    }

    /// Whether the registered handler was installed through this handle
    pub fn owns_registration(&self) -> bool {
        let _guard = match system_lock() {
            Ok(lock) => lock.guard(),
            Err(_) => return false,
        };
        self.owned_registration().is_some()
    }

    /// The published registration if it is ours; caller holds the system lock
    fn owned_registration(&self) -> Option<*mut Registration> {
        let registration = ACTIVE.load(Ordering::SeqCst);
        if registration.is_null() {
            return None;
        }
        // Safety: only freed under the system lock, which the caller holds
        (unsafe { (*registration).owner } == self.id).then_some(registration)
    }

    /// Register `handler` for SIGSEGV and SIGBUS
    ///
    /// With `snapshot_dir` set, faults the handler declines leave a
    /// `crash-<ms>.dump` file there before being chained on.
    pub fn install(&self, handler: Box<dyn FaultHandler>, snapshot_dir: Option<&Path>) -> SysResult<()> {
        let _guard = system_lock()?.guard();

        if Self::is_installed() {
            return Err(SysError::AlreadyInstalled);
        }

        let snapshot = snapshot_dir
            .map(|dir| SnapshotTarget::new(dir, self.max_frames))
            .transpose()?;

        let registration = Box::into_raw(Box::new(Registration {
            owner: self.id,
            handler,
            snapshot,
            previous: [OnceLock::new(), OnceLock::new()],
        }));
        ACTIVE.store(registration, Ordering::SeqCst);

        for (i, signal) in FAULT_SIGNALS.iter().enumerate() {
            match install_handler(*signal, on_fault, SaFlags::SA_ONSTACK) {
                Ok(previous) => {
                    // Safety: published above and only freed under the system lock
                    let _ = unsafe { &*registration }.previous[i].set(previous);
                }
                Err(e) => {
                    kwarn!("failed to install {:?} handler: {}", signal, e);
                    unsafe { retire(registration) };
                    return Err(e);
                }
            }
        }

        kinfo!(
            "fault handler installed (snapshots: {})",
            snapshot_dir.map_or("off".into(), |d| d.display().to_string())
        );
        Ok(())
    }

    /// Remove the handler and put back the actions it replaced
    ///
    /// `NotInstalled` unless this handle installed the current handler.
    pub fn uninstall(&self) -> SysResult<()> {
        let _guard = system_lock()?.guard();

        let registration = self.owned_registration().ok_or(SysError::NotInstalled)?;
        unsafe { retire(registration) };
        kinfo!("fault handler removed");
        Ok(())
    }
}

impl Drop for FaultInterceptor {
    fn drop(&mut self) {
        let Ok(lock) = system_lock() else {
            return;
        };
        let _guard = lock.guard();
        if let Some(registration) = self.owned_registration() {
            unsafe { retire(registration) };
            kdebug!("fault handler removed with its interceptor");
        }
    }
}

/// Unpublish, restore previous actions, wait out running handlers, free
///
/// # Safety
///
/// `registration` is the published pointer; caller holds the system lock.
unsafe fn retire(registration: *mut Registration) {
    ACTIVE.store(ptr::null_mut(), Ordering::SeqCst);

    let reg = &*registration;
    for (i, signal) in FAULT_SIGNALS.iter().enumerate() {
        if let Some(previous) = reg.previous[i].get() {
            if let Err(e) = restore_handler(*signal, previous) {
                kwarn!("failed to restore {:?} handler: {}", signal, e);
            }
        }
    }

    while IN_FLIGHT.load(Ordering::SeqCst) != 0 {
        std::thread::yield_now();
    }
    drop(Box::from_raw(registration));
}

extern "C" fn on_fault(signo: libc::c_int, info: *mut libc::siginfo_t, uctx: *mut libc::c_void) {
    let errno = ErrnoGuard::save();

    IN_FLIGHT.fetch_add(1, Ordering::SeqCst);
    let registration = ACTIVE.load(Ordering::SeqCst);
    if registration.is_null() {
        // Unregistered concurrently; the restored action takes the re-fault
        IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
        return;
    }
    // Safety: IN_FLIGHT keeps `retire` from freeing it
    let reg = unsafe { &*registration };

    let mut machine = unsafe { MachineContext::from_ucontext(uctx) };
    let regs = machine.registers();
    let address = if info.is_null() {
        0
    } else {
        unsafe { (*info).si_addr() as usize }
    };
    let mut ctx = FaultContext::new(
        regs.ip,
        regs.frame,
        regs.stack,
        machine.thread_register(),
        signo,
        address,
    );

    if reg.handler.handle_fault(&mut ctx) == FaultAction::Resume {
        machine.set_registers(&Registers::new(ctx.ip, ctx.frame, ctx.stack));
        machine.set_thread_register(ctx.thread);
        IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    if let Some(target) = &reg.snapshot {
        snapshot::write(target, &ctx);
    }
    let previous = reg.previous_for(signo);
    IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);

    drop(errno);
    unsafe { chain(signo, previous.as_ref(), info, uctx) };
}
