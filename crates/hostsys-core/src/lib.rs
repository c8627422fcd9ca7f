//! # hostsys-core
//!
//! Core types and traits for the hostsys platform layer: the OS-facing
//! substrate (threads, monitors, fault interception, thread inspection)
//! a virtual machine is built on.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! All platform-specific implementations are in `hostsys-runtime`.
//!
//! ## Modules
//!
//! - `id` - Thread identity used for monitor ownership
//! - `state` - Wait flags and thread lifecycle
//! - `context` - Register views for fault callbacks and visitors
//! - `traits` - `FaultHandler` and `ThreadVisitor` callbacks
//! - `ffi` - Argument type tags for native calls
//! - `error` - Error types and status codes
//! - `fatal` - Abort primitive for contract violations
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod context;
pub mod traits;
pub mod ffi;
pub mod error;
pub mod fatal;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::ThreadId;
pub use state::{ThreadFlags, ThreadState};
pub use context::{FaultAction, FaultContext, Registers, THREAD_REGISTER};
pub use traits::{FaultHandler, ThreadVisitor};
pub use ffi::ArgType;
pub use error::{status_of, Resource, ResourceError, SysError, SysResult, STATUS_OK};
pub use fatal::{contract_violation, Violation};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_path, env_is_set};
