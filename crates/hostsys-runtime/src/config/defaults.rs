//! Library defaults for [`SystemConfig`](super::SystemConfig)

/// Stack size for started threads; 0 keeps the platform default
pub const THREAD_STACK_SIZE: usize = 0;

/// Smallest explicit stack size accepted
pub const MIN_THREAD_STACK_SIZE: usize = 64 * 1024;

/// Signal used to stop threads for inspection
pub const INSPECT_SIGNAL: i32 = libc::SIGUSR2;

/// How long a suspend waits for its target to answer
pub const INSPECT_TIMEOUT_MS: u64 = 5000;

/// Frames walked in a crash snapshot
pub const SNAPSHOT_MAX_FRAMES: usize = 64;

/// Upper bound for `snapshot_max_frames`
pub const SNAPSHOT_FRAME_LIMIT: usize = 1024;

/// Verbose (debug-level) logging
pub const VERBOSE: bool = false;
