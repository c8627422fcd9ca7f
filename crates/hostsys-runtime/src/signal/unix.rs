//! Unix signal helpers
//!
//! Everything reachable from a signal handler in here sticks to
//! async-signal-safe calls: `sigaction`, `abort`, raw errno access.

use hostsys_core::error::{Resource, SysError, SysResult};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// Three-argument (SA_SIGINFO) handler
pub type SigInfoHandler = extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void);

/// Map a raw signal number to a nix `Signal`
pub fn parse_signal(signo: i32) -> SysResult<Signal> {
    Signal::try_from(signo).map_err(|_| SysError::InvalidArgument("unknown signal number"))
}

/// Install `handler` for `signal`, returning the action it replaced
pub fn install_handler(signal: Signal, handler: SigInfoHandler, flags: SaFlags) -> SysResult<SigAction> {
    let action = SigAction::new(
        SigHandler::SigAction(handler),
        flags | SaFlags::SA_SIGINFO,
        SigSet::empty(),
    );
    unsafe { signal::sigaction(signal, &action) }
        .map_err(|e| SysError::exhausted(Resource::SignalHandler, e as i32))
}

/// Put back an action previously returned by [`install_handler`]
pub fn restore_handler(signal: Signal, previous: &SigAction) -> SysResult<()> {
    unsafe { signal::sigaction(signal, previous) }
        .map(drop)
        .map_err(|e| SysError::exhausted(Resource::SignalHandler, e as i32))
}

/// Hand a fault we did not handle to whoever was registered before us
///
/// - a real handler is called directly with the original arguments
/// - `SIG_DFL` (or no record) is reinstated and we return, so the faulting
///   instruction re-executes and the default action terminates the process
/// - `SIG_IGN` cannot be honored for a synchronous fault; abort instead
///
/// # Safety
///
/// Must be called from a signal handler with the arguments it received.
pub unsafe fn chain(
    signo: libc::c_int,
    previous: Option<&SigAction>,
    info: *mut libc::siginfo_t,
    uctx: *mut libc::c_void,
) {
    let handler = previous.map(SigAction::handler).unwrap_or(SigHandler::SigDfl);
    match handler {
        SigHandler::SigAction(f) => f(signo, info, uctx),
        SigHandler::Handler(f) => f(signo),
        SigHandler::SigIgn => libc::abort(),
        SigHandler::SigDfl => {
            libc::signal(signo, libc::SIG_DFL);
        }
    }
}

/// Saves errno on creation and restores it on drop
///
/// Handlers interrupt arbitrary code; the syscalls they make must not leak
/// an errno change into it.
pub struct ErrnoGuard(libc::c_int);

impl ErrnoGuard {
    #[inline]
    pub fn save() -> Self {
        ErrnoGuard(unsafe { *libc::__errno_location() })
    }
}

impl Drop for ErrnoGuard {
    #[inline]
    fn drop(&mut self) {
        unsafe { *libc::__errno_location() = self.0 };
    }
}
