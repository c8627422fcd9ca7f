//! # hostsys - platform layer for a virtual machine
//!
//! The OS-facing substrate a language VM is built on: native threads and
//! locks, Java-style monitors (reentrant lock + FIFO wait/notify +
//! interruption), process-wide fault interception for implicit null checks,
//! suspending a thread to sample its registers, and dynamic native calls.
//!
//! ## Quick Start
//!
//! ```ignore
//! use hostsys::{System, SystemConfig, Detached};
//! use std::sync::Arc;
//!
//! let system = System::new(SystemConfig::from_env())?;
//! let main = system.attach(Arc::new(Detached))?;
//! let monitor = system.make_monitor()?;
//!
//! let worker = system.start(Arc::new(move |me: &Arc<hostsys::Thread>| {
//!     // runs on a fresh OS thread
//! }))?;
//!
//! monitor.acquire(&main);
//! monitor.notify_all(&main);
//! monitor.release(&main);
//! worker.join()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Embedding VM runtime                      │
//! │        monitors, GC safepoints, JIT null-check traps        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         System                              │
//! │     factory: threads, locks, monitors, faults, visits       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌────────────┐      ┌────────────┐
//!    │  Monitor  │      │   Fault    │      │  Thread    │
//!    │  + Park   │      │ Intercept  │      │ Inspector  │
//!    └───────────┘      └────────────┘      └────────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │       pthread mutex · futex · sigaction · ucontext      │
//!    └─────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

// Re-export core types
pub use hostsys_core::{
    status_of,
    ArgType,
    FaultAction,
    FaultContext,
    FaultHandler,
    Registers,
    Resource,
    ResourceError,
    SysError,
    SysResult,
    ThreadFlags,
    ThreadId,
    ThreadState,
    ThreadVisitor,
    Violation,
    STATUS_OK,
    THREAD_REGISTER,
};

// Re-export kprint macros for debug logging
pub use hostsys_core::{kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use hostsys_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use hostsys_core::{env_get, env_get_bool, env_get_opt, env_get_path, env_is_set};

// Re-export runtime types
pub use hostsys_runtime::{
    page_size,
    Detached,
    ExecutableRegion,
    FaultInterceptor,
    Lock,
    LockGuard,
    Monitor,
    PausedThread,
    Runnable,
    SystemConfig,
    Thread,
    ThreadInspector,
    ThreadOptions,
};

use hostsys_runtime::{arch, dispatch, snapshot};

/// Factory and entry point for every platform service
///
/// Holds the validated configuration plus the fault-interception and
/// inspection handles built from it. Several `System`s may coexist, but
/// fault registration stays process-wide: only one handler is active, and
/// only the `System` that installed it can remove it.
pub struct System {
    config: SystemConfig,
    interceptor: FaultInterceptor,
    inspector: ThreadInspector,
}

impl System {
    /// Validate `config`, initialize logging, install the inspection signal
    pub fn new(config: SystemConfig) -> SysResult<Self> {
        config.validate()?;

        init_logging();
        if config.verbose {
            set_log_level(LogLevel::Debug);
        }

        let inspector = ThreadInspector::new(config.inspect_signal, config.inspect_timeout)?;
        let interceptor = FaultInterceptor::new(config.snapshot_max_frames);

        kdebug!("system ready (inspect signal {})", config.inspect_signal);
        Ok(Self { config, interceptor, inspector })
    }

    /// [`System::new`] with [`SystemConfig::from_env`]
    pub fn from_env() -> SysResult<Self> {
        Self::new(SystemConfig::from_env())
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Adopt the calling OS thread
    pub fn attach(&self, runnable: Arc<dyn Runnable>) -> SysResult<Arc<Thread>> {
        Thread::attach(runnable)
    }

    /// Run `runnable` on a new OS thread
    pub fn start(&self, runnable: Arc<dyn Runnable>) -> SysResult<Arc<Thread>> {
        Thread::start(runnable, &self.config.thread_options())
    }

    pub fn make_lock(&self) -> SysResult<Lock> {
        Lock::new()
    }

    pub fn make_monitor(&self) -> SysResult<Monitor> {
        Monitor::new()
    }

    /// Register the process-wide SIGSEGV/SIGBUS handler
    ///
    /// Declined faults leave a snapshot in `crash_dump_dir` (when set)
    /// before being passed to the previously installed handler.
    pub fn handle_faults<H>(&self, handler: H) -> SysResult<()>
    where
        H: FaultHandler + 'static,
    {
        self.interceptor
            .install(Box::new(handler), self.config.crash_dump_dir.as_deref())
    }

    /// Unregister the fault handler this `System` installed
    ///
    /// Dropping the `System` does the same.
    pub fn stop_handling_faults(&self) -> SysResult<()> {
        self.interceptor.uninstall()
    }

    /// Suspend `target`, report its registers to `visitor`, resume it
    ///
    /// `caller` must be the calling thread and must differ from `target`.
    pub fn visit(&self, caller: &Thread, target: &Thread, visitor: &mut dyn ThreadVisitor) -> SysResult<()> {
        self.inspector.visit(caller, target, visitor)
    }

    /// Suspend `target` until the returned handle is resumed or dropped
    pub fn suspend(&self, caller: &Thread, target: &Thread) -> SysResult<PausedThread> {
        self.inspector.suspend(caller, target)
    }

    /// Call a native function whose signature is known only at run time
    ///
    /// # Safety
    ///
    /// See [`hostsys_runtime::dispatch::call`].
    pub unsafe fn call(
        &self,
        function: *const libc::c_void,
        arguments: &[u64],
        types: &[ArgType],
        buffer_size: usize,
        return_type: ArgType,
    ) -> SysResult<u64> {
        dispatch::call(function, arguments, types, buffer_size, return_type)
    }

    /// Map `size` bytes of read/write/execute memory
    pub fn allocate_executable(&self, size: usize) -> SysResult<ExecutableRegion> {
        ExecutableRegion::allocate(size)
    }

    /// Write a snapshot of the calling thread (if enabled), then abort
    #[cold]
    pub fn abort(&self) -> ! {
        let regs = arch::current_registers();
        kerror!("aborting");
        if let Some(dir) = &self.config.crash_dump_dir {
            match snapshot::SnapshotTarget::new(dir, self.config.snapshot_max_frames) {
                Ok(target) => {
                    let ctx = FaultContext::new(regs.ip, regs.frame, regs.stack, 0, libc::SIGABRT, 0);
                    snapshot::write(&target, &ctx);
                }
                Err(e) => kwarn!("no snapshot: {}", e),
            }
        }
        std::process::abort()
    }

    /// Terminate the process with `code`
    pub fn exit(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}

impl core::fmt::Debug for System {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("System").field("config", &self.config).finish_non_exhaustive()
    }
}
