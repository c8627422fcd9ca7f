//! Platform configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use hostsys_runtime::config::SystemConfig;
//!
//! // Defaults with env overrides
//! let config = SystemConfig::from_env();
//!
//! // Or customize programmatically
//! let config = SystemConfig::new()
//!     .crash_dump_dir("/var/crash/vm")
//!     .thread_stack_size(1 << 20);
//! ```

pub mod defaults;

use std::path::PathBuf;
use std::time::Duration;

use hostsys_core::env::{env_get, env_get_bool, env_get_path};
use hostsys_core::error::SysError;

use crate::thread::ThreadOptions;

/// Platform configuration with builder pattern
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Directory for crash snapshots; `None` disables them
    pub crash_dump_dir: Option<PathBuf>,
    /// Stack size for started threads (0 = platform default)
    pub thread_stack_size: usize,
    /// Signal that stops a thread for inspection
    pub inspect_signal: i32,
    /// How long a suspend waits for the target
    pub inspect_timeout: Duration,
    /// Frames walked in a crash snapshot
    pub snapshot_max_frames: usize,
    /// Debug-level logging
    pub verbose: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SystemConfig {
    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `HOSTSYS_CRASH_DUMP_DIR` - Snapshot directory (empty = off)
    /// - `HOSTSYS_THREAD_STACK_SIZE` - Stack bytes for started threads
    /// - `HOSTSYS_INSPECT_SIGNAL` - Signal number used for inspection
    /// - `HOSTSYS_INSPECT_TIMEOUT_MS` - Suspend timeout in milliseconds
    /// - `HOSTSYS_SNAPSHOT_MAX_FRAMES` - Frames per snapshot
    /// - `HOSTSYS_VERBOSE` - Debug logging (0/1)
    pub fn from_env() -> Self {
        Self {
            crash_dump_dir: env_get_path("HOSTSYS_CRASH_DUMP_DIR"),
            thread_stack_size: env_get("HOSTSYS_THREAD_STACK_SIZE", defaults::THREAD_STACK_SIZE),
            inspect_signal: env_get("HOSTSYS_INSPECT_SIGNAL", defaults::INSPECT_SIGNAL),
            inspect_timeout: Duration::from_millis(env_get(
                "HOSTSYS_INSPECT_TIMEOUT_MS",
                defaults::INSPECT_TIMEOUT_MS,
            )),
            snapshot_max_frames: env_get("HOSTSYS_SNAPSHOT_MAX_FRAMES", defaults::SNAPSHOT_MAX_FRAMES),
            verbose: env_get_bool("HOSTSYS_VERBOSE", defaults::VERBOSE),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            crash_dump_dir: None,
            thread_stack_size: defaults::THREAD_STACK_SIZE,
            inspect_signal: defaults::INSPECT_SIGNAL,
            inspect_timeout: Duration::from_millis(defaults::INSPECT_TIMEOUT_MS),
            snapshot_max_frames: defaults::SNAPSHOT_MAX_FRAMES,
            verbose: defaults::VERBOSE,
        }
    }

    // Builder methods

    pub fn crash_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.crash_dump_dir = Some(dir.into());
        self
    }

    pub fn no_crash_dumps(mut self) -> Self {
        self.crash_dump_dir = None;
        self
    }

    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    pub fn inspect_signal(mut self, signo: i32) -> Self {
        self.inspect_signal = signo;
        self
    }

    pub fn inspect_timeout(mut self, d: Duration) -> Self {
        self.inspect_timeout = d;
        self
    }

    pub fn snapshot_max_frames(mut self, n: usize) -> Self {
        self.snapshot_max_frames = n;
        self
    }

    pub fn verbose(mut self, enable: bool) -> Self {
        self.verbose = enable;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), SysError> {
        if self.thread_stack_size != 0 && self.thread_stack_size < defaults::MIN_THREAD_STACK_SIZE {
            return Err(SysError::Config("thread_stack_size must be 0 or >= 64KB"));
        }
        if self.inspect_signal <= 0 {
            return Err(SysError::Config("inspect_signal must be a positive signal number"));
        }
        if matches!(
            self.inspect_signal,
            libc::SIGSEGV | libc::SIGBUS | libc::SIGKILL | libc::SIGSTOP
        ) {
            return Err(SysError::Config("inspect_signal cannot be SIGSEGV, SIGBUS, SIGKILL or SIGSTOP"));
        }
        if self.inspect_timeout.is_zero() {
            return Err(SysError::Config("inspect_timeout must be > 0"));
        }
        if self.snapshot_max_frames == 0 || self.snapshot_max_frames > defaults::SNAPSHOT_FRAME_LIMIT {
            return Err(SysError::Config("snapshot_max_frames must be in 1..=1024"));
        }
        if let Some(dir) = &self.crash_dump_dir {
            if dir.as_os_str().is_empty() || dir.to_str().is_none() {
                return Err(SysError::Config("crash_dump_dir must be a non-empty UTF-8 path"));
            }
        }
        Ok(())
    }

    /// Thread options for `Thread::start`
    pub fn thread_options(&self) -> ThreadOptions {
        ThreadOptions {
            stack_size: self.thread_stack_size,
            name: None,
        }
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("hostsys configuration:");
        eprintln!("  crash_dump_dir:       {:?}", self.crash_dump_dir);
        eprintln!("  thread_stack_size:    {}", self.thread_stack_size);
        eprintln!("  inspect_signal:       {}", self.inspect_signal);
        eprintln!("  inspect_timeout:      {:?}", self.inspect_timeout);
        eprintln!("  snapshot_max_frames:  {}", self.snapshot_max_frames);
        eprintln!("  verbose:              {}", self.verbose);
    }
}
