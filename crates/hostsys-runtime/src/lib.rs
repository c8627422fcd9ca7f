//! # hostsys-runtime
//!
//! Linux implementation of the hostsys platform layer.
//!
//! This crate provides:
//! - Native locks and per-thread park signals (pthread mutex + futex)
//! - Reentrant monitors with FIFO wait queues and interruption
//! - Thread start/attach/join
//! - Process-wide SIGSEGV/SIGBUS interception with crash snapshots
//! - Suspending another thread to read or rewrite its registers
//! - Foreign-call dispatch and executable memory

pub mod config;
pub mod lock;
pub mod parking;
pub mod thread;
pub mod monitor;
pub mod signal;
pub mod arch;
pub mod snapshot;
pub mod fault;
pub mod inspect;
pub mod dispatch;
pub mod memory;

// Re-exports
pub use config::SystemConfig;
pub use lock::{system_lock, Lock, LockGuard};
pub use parking::{ParkSignal, WakeEvent};
pub use thread::{Detached, Runnable, Thread, ThreadOptions};
pub use monitor::Monitor;
pub use fault::FaultInterceptor;
pub use inspect::{PausedThread, ThreadInspector};
pub use memory::{page_size, ExecutableRegion};
pub use snapshot::SnapshotTarget;
