//! Architecture-specific register access and native-call shims
//!
//! Each architecture module provides:
//! - `MachineContext`: view over a signal handler's `ucontext_t` that
//!   reads and rewrites ip/frame/stack and the thread register
//! - `current_registers()`: ip/frame/stack of the caller
//! - `INT_ARG_REGS` / `FLOAT_ARG_REGS` and `call_int` / `call_float` for
//!   the foreign-call dispatcher

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", target_os = "linux"))] {
        mod x86_64;
        pub use self::x86_64::*;
    } else if #[cfg(all(target_arch = "aarch64", target_os = "linux"))] {
        mod aarch64;
        pub use self::aarch64::*;
    } else {
        compile_error!("hostsys-runtime supports x86_64 and aarch64 Linux");
    }
}

/// Word size of a stack slot
pub const WORD: usize = core::mem::size_of::<usize>();
