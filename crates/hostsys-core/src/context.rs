//! Register snapshots exchanged with fault callbacks and thread visitors

/// Register view handed to a fault callback
///
/// The four register fields are read from the faulting thread's machine
/// context before the callback runs and written back if it resumes, so a
/// callback can redirect execution (e.g. to a null-pointer trampoline) by
/// overwriting them. `thread` is the register the runtime reserves for its
/// current-thread pointer (see [`THREAD_REGISTER`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultContext {
    pub ip: usize,
    pub frame: usize,
    pub stack: usize,
    pub thread: usize,
    signal: i32,
    address: usize,
}

impl FaultContext {
    pub const fn new(ip: usize, frame: usize, stack: usize, thread: usize, signal: i32, address: usize) -> Self {
        Self { ip, frame, stack, thread, signal, address }
    }

    /// Signal number that raised the fault (SIGSEGV, SIGBUS)
    #[inline]
    pub const fn signal(&self) -> i32 {
        self.signal
    }

    /// Faulting data address reported by the kernel
    #[inline]
    pub const fn address(&self) -> usize {
        self.address
    }
}

/// Verdict a fault callback returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Continue at the (possibly rewritten) context
    Resume,

    /// Not ours: snapshot, then hand the fault to the previous handler
    NotHandled,
}

/// Instruction, frame and stack pointer of a paused thread
///
/// Valid only while the thread it was read from stays paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    pub ip: usize,
    pub frame: usize,
    pub stack: usize,
}

impl Registers {
    pub const fn new(ip: usize, frame: usize, stack: usize) -> Self {
        Self { ip, frame, stack }
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// Register the runtime repurposes to carry its thread pointer
        pub const THREAD_REGISTER: &str = "rbx";
    } else if #[cfg(target_arch = "aarch64")] {
        /// Register the runtime repurposes to carry its thread pointer
        pub const THREAD_REGISTER: &str = "x19";
    } else {
        /// Register the runtime repurposes to carry its thread pointer
        pub const THREAD_REGISTER: &str = "none";
    }
}
