//! The single abort primitive for caller bugs
//!
//! A contract violation (releasing a monitor you don't own, inspecting
//! yourself, disposing an owned monitor) means the embedding runtime is
//! broken. It is reported and the process is aborted; it is never turned
//! into a `SysError`.

use crate::kerror;

/// What the caller got wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// Monitor operation by a thread that does not own it
    NotOwner(&'static str),

    /// Lock released by a thread that does not hold it
    LockNotHeld,

    /// A thread asked to suspend itself
    SelfInspection,

    /// Primitive dropped while still in use
    DisposedInUse(&'static str),

    /// OS primitive returned a result its contract rules out
    Os(&'static str, i32),
}

impl core::fmt::Display for Violation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Violation::NotOwner(op) => write!(f, "{} called by a thread that does not own the monitor", op),
            Violation::LockNotHeld => write!(f, "lock released by a thread that does not hold it"),
            Violation::SelfInspection => write!(f, "thread attempted to inspect itself"),
            Violation::DisposedInUse(what) => write!(f, "{} disposed while in use", what),
            Violation::Os(call, code) => write!(f, "{} failed unexpectedly (code {})", call, code),
        }
    }
}

/// Report a contract violation and abort the process (SIGABRT)
#[cold]
#[inline(never)]
pub fn contract_violation(violation: Violation) -> ! {
    kerror!("contract violation: {}", violation);
    std::process::abort()
}
