//! Stopping another thread to read (and optionally rewrite) its registers
//!
//! Suspension is a handshake through a single process-wide slot:
//!
//! 1. The inspector takes the system lock, arms the slot (`REQUESTED`,
//!    target pthread id) and sends the inspection signal to the target.
//! 2. The target's handler copies ip/frame/stack from its machine context
//!    into the slot, flips it to `PAUSED` and futex-waits.
//! 3. The inspector reads the registers, may overwrite them, then sets
//!    `RESUME`. The handler writes back any overwritten registers, sets
//!    `IDLE` and returns; the inspector waits for `IDLE` before releasing
//!    the system lock.
//!
//! While paused the target may hold arbitrary locks (allocator, stderr).
//! Code running between suspend and resume must not take any of them.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use hostsys_core::context::Registers;
use hostsys_core::error::{SysError, SysResult};
use hostsys_core::fatal::{contract_violation, Violation};
use hostsys_core::kdebug;
use hostsys_core::traits::ThreadVisitor;
use nix::sys::pthread::pthread_kill;
use nix::sys::signal::{SaFlags, Signal};

use crate::arch::MachineContext;
use crate::lock::{system_lock, LockGuard};
use crate::parking::futex_linux::{futex_wait, futex_wake_all};
use crate::signal::{install_handler, parse_signal, ErrnoGuard};
use crate::thread::Thread;

const IDLE: u32 = 0;
const REQUESTED: u32 = 1;
const PAUSED: u32 = 2;
const RESUME: u32 = 3;

/// How often a pending request re-checks whether its target died
const POLL_SLICE: Duration = Duration::from_millis(10);

struct InspectionSlot {
    phase: AtomicU32,
    target: AtomicUsize,
    ip: AtomicUsize,
    frame: AtomicUsize,
    stack: AtomicUsize,
    rewritten: AtomicBool,
}

impl InspectionSlot {
    fn load(&self) -> Registers {
        Registers::new(
            self.ip.load(Ordering::Acquire),
            self.frame.load(Ordering::Acquire),
            self.stack.load(Ordering::Acquire),
        )
    }

    fn store(&self, regs: &Registers) {
        self.ip.store(regs.ip, Ordering::Release);
        self.frame.store(regs.frame, Ordering::Release);
        self.stack.store(regs.stack, Ordering::Release);
    }
}

static SLOT: InspectionSlot = InspectionSlot {
    phase: AtomicU32::new(IDLE),
    target: AtomicUsize::new(0),
    ip: AtomicUsize::new(0),
    frame: AtomicUsize::new(0),
    stack: AtomicUsize::new(0),
    rewritten: AtomicBool::new(false),
};

/// Bit n set = handler installed for signal n
static INSTALLED: AtomicU64 = AtomicU64::new(0);

extern "C" fn on_inspect(_signo: libc::c_int, _info: *mut libc::siginfo_t, uctx: *mut libc::c_void) {
    let _errno = ErrnoGuard::save();

    let me = unsafe { libc::pthread_self() } as usize;
    if SLOT.phase.load(Ordering::Acquire) != REQUESTED || SLOT.target.load(Ordering::Acquire) != me {
        // Stray or abandoned request
        return;
    }

    let mut machine = unsafe { MachineContext::from_ucontext(uctx) };
    SLOT.store(&machine.registers());
    SLOT.rewritten.store(false, Ordering::Release);

    if SLOT
        .phase
        .compare_exchange(REQUESTED, PAUSED, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    futex_wake_all(&SLOT.phase);

    while SLOT.phase.load(Ordering::Acquire) == PAUSED {
        futex_wait(&SLOT.phase, PAUSED, None);
    }

    if SLOT.rewritten.load(Ordering::Acquire) {
        machine.set_registers(&SLOT.load());
    }

    SLOT.phase.store(IDLE, Ordering::Release);
    futex_wake_all(&SLOT.phase);
}

/// Suspends other threads and reports their registers
#[derive(Debug, Clone)]
pub struct ThreadInspector {
    signal: Signal,
    timeout: Duration,
}

impl ThreadInspector {
    /// Install the inspection handler for `signo` (once per signal)
    ///
    /// `timeout` bounds how long a suspend waits for the target to answer,
    /// e.g. when the target has the signal blocked.
    pub fn new(signo: i32, timeout: Duration) -> SysResult<Self> {
        let signal = parse_signal(signo)?;
        if matches!(signal, Signal::SIGSEGV | Signal::SIGBUS | Signal::SIGKILL | Signal::SIGSTOP) {
            return Err(SysError::InvalidArgument("signal cannot be used for inspection"));
        }

        let bit = 1u64 << (signo as u32 % 64);
        if INSTALLED.load(Ordering::Acquire) & bit == 0 {
            let _guard = system_lock()?.guard();
            if INSTALLED.load(Ordering::Acquire) & bit == 0 {
                install_handler(signal, on_inspect, SaFlags::SA_RESTART | SaFlags::SA_ONSTACK)?;
                INSTALLED.fetch_or(bit, Ordering::AcqRel);
                kdebug!("inspection handler installed on {:?}", signal);
            }
        }

        Ok(Self { signal, timeout })
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Stop `target` until the returned handle is resumed or dropped
    ///
    /// Inspecting yourself is a contract violation. A target that has
    /// finished yields `ThreadFinished`; one that never answers within the
    /// timeout yields `SuspendFailed(ETIMEDOUT)`.
    pub fn suspend(&self, caller: &Thread, target: &Thread) -> SysResult<PausedThread> {
        if caller.id() == target.id() || target.is_current() {
            contract_violation(Violation::SelfInspection);
        }

        let guard = system_lock()?.guard();

        if !target.state().is_live() {
            return Err(SysError::ThreadFinished);
        }
        let native = target.native().ok_or(SysError::ThreadFinished)?;

        SLOT.target.store(native as usize, Ordering::Release);
        SLOT.rewritten.store(false, Ordering::Release);
        SLOT.phase.store(REQUESTED, Ordering::SeqCst);

        if let Err(e) = pthread_kill(native, self.signal) {
            SLOT.phase.store(IDLE, Ordering::SeqCst);
            return Err(match e {
                nix::errno::Errno::ESRCH => SysError::ThreadFinished,
                e => SysError::SuspendFailed(e as i32),
            });
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            match SLOT.phase.load(Ordering::Acquire) {
                PAUSED => break,
                REQUESTED => {
                    let now = Instant::now();
                    let gone = !target.state().is_live();
                    if now >= deadline || gone {
                        if SLOT
                            .phase
                            .compare_exchange(REQUESTED, IDLE, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            return Err(if gone {
                                SysError::ThreadFinished
                            } else {
                                SysError::SuspendFailed(libc::ETIMEDOUT)
                            });
                        }
                        // Handler answered while we were giving up
                        continue;
                    }
                    futex_wait(&SLOT.phase, REQUESTED, Some(POLL_SLICE.min(deadline - now)));
                }
                _ => {
                    SLOT.phase.store(IDLE, Ordering::SeqCst);
                    return Err(SysError::SuspendFailed(libc::EPROTO));
                }
            }
        }

        Ok(PausedThread {
            registers: SLOT.load(),
            resumed: false,
            _guard: guard,
            _not_send: PhantomData,
        })
    }

    /// Suspend `target`, hand its registers to `visitor`, resume it
    pub fn visit(&self, caller: &Thread, target: &Thread, visitor: &mut dyn ThreadVisitor) -> SysResult<()> {
        let paused = self.suspend(caller, target)?;
        let regs = paused.registers();
        visitor.visit(regs.ip, regs.frame, regs.stack);
        paused.resume();
        Ok(())
    }
}

/// A thread held stopped inside its inspection handler
///
/// Resumes the thread when dropped. Holds the system lock, so it must be
/// resumed on the thread that suspended it.
pub struct PausedThread {
    registers: Registers,
    resumed: bool,
    _guard: LockGuard<'static>,
    _not_send: PhantomData<*const ()>,
}

impl PausedThread {
    /// Registers captured at the moment the thread stopped
    #[inline]
    pub fn registers(&self) -> Registers {
        self.registers
    }

    /// Replace the registers the thread continues with
    pub fn set_registers(&mut self, registers: Registers) {
        self.registers = registers;
        SLOT.store(&registers);
        SLOT.rewritten.store(true, Ordering::Release);
    }

    /// Let the thread continue
    pub fn resume(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.resumed {
            return;
        }
        self.resumed = true;

        SLOT.phase.store(RESUME, Ordering::SeqCst);
        futex_wake_all(&SLOT.phase);
        while SLOT.phase.load(Ordering::Acquire) == RESUME {
            futex_wait(&SLOT.phase, RESUME, None);
        }
    }
}

impl Drop for PausedThread {
    fn drop(&mut self) {
        self.finish();
    }
}

impl core::fmt::Debug for PausedThread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PausedThread")
            .field("registers", &self.registers)
            .field("resumed", &self.resumed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{Detached, ThreadOptions};
    use std::hint::black_box;
    use std::sync::Arc;

    fn inspector() -> ThreadInspector {
        ThreadInspector::new(libc::SIGUSR2, Duration::from_secs(5)).unwrap()
    }

    fn spinner(stop: Arc<AtomicBool>, counter: Arc<AtomicU64>) -> Arc<Thread> {
        Thread::start(
            Arc::new(move |_: &Arc<Thread>| {
                while !stop.load(Ordering::Relaxed) {
                    counter.fetch_add(1, Ordering::Relaxed);
                    black_box(());
                }
            }),
            &ThreadOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_fault_signals() {
        assert!(ThreadInspector::new(libc::SIGSEGV, Duration::from_secs(1)).is_err());
        assert!(ThreadInspector::new(0, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_visit_running_thread() {
        let inspector = inspector();
        let me = Thread::attach(Arc::new(Detached)).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(AtomicU64::new(0));
        let target = spinner(Arc::clone(&stop), Arc::clone(&counter));

        while counter.load(Ordering::Relaxed) == 0 {
            std::thread::yield_now();
        }

        let mut seen = None;
        inspector
            .visit(&me, &target, &mut |ip: usize, frame: usize, stack: usize| {
                seen = Some((ip, frame, stack));
            })
            .unwrap();

        let (ip, _frame, stack) = seen.unwrap();
        assert_ne!(ip, 0);
        assert_ne!(stack, 0);

        stop.store(true, Ordering::Relaxed);
        target.join().unwrap();
    }

    #[test]
    fn test_paused_thread_makes_no_progress() {
        let inspector = inspector();
        let me = Thread::attach(Arc::new(Detached)).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(AtomicU64::new(0));
        let target = spinner(Arc::clone(&stop), Arc::clone(&counter));

        while counter.load(Ordering::Relaxed) == 0 {
            std::thread::yield_now();
        }

        let paused = inspector.suspend(&me, &target).unwrap();
        let before = counter.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::Relaxed), before);
        let regs = paused.registers();
        paused.resume();

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::Relaxed) == before {
            assert!(Instant::now() < deadline);
            std::thread::yield_now();
        }
        assert_ne!(regs.ip, 0);

        stop.store(true, Ordering::Relaxed);
        target.join().unwrap();
    }

    #[test]
    fn test_finished_target() {
        let inspector = inspector();
        let me = Thread::attach(Arc::new(Detached)).unwrap();
        let target = Thread::start(Arc::new(|_: &Arc<Thread>| {}), &ThreadOptions::default()).unwrap();
        target.join().unwrap();

        let mut calls = 0;
        let result = inspector.visit(&me, &target, &mut |_: usize, _: usize, _: usize| calls += 1);
        assert_eq!(result, Err(SysError::ThreadFinished));
        assert_eq!(calls, 0);
    }
}
