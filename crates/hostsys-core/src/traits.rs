//! Callback traits the embedding runtime implements
//!
//! Both callbacks run in a restricted context: a fault handler runs inside
//! a signal handler on the faulting thread, a visitor runs while another
//! thread is frozen. Neither may block or take locks another thread might
//! hold.

use crate::context::{FaultAction, FaultContext};

/// Synchronous hardware-fault callback
///
/// Called on the faulting thread. Must be async-signal-safe: no
/// allocation, no locking, no logging through `kprint`.
pub trait FaultHandler: Send + Sync {
    fn handle_fault(&self, context: &mut FaultContext) -> FaultAction;
}

impl<F> FaultHandler for F
where
    F: Fn(&mut FaultContext) -> FaultAction + Send + Sync,
{
    #[inline]
    fn handle_fault(&self, context: &mut FaultContext) -> FaultAction {
        self(context)
    }
}

/// Receives the registers of a suspended thread
///
/// The target cannot make progress until `visit` returns, so the visitor
/// must not block or try to suspend anything.
pub trait ThreadVisitor {
    fn visit(&mut self, ip: usize, frame: usize, stack: usize);
}

impl<F> ThreadVisitor for F
where
    F: FnMut(usize, usize, usize),
{
    #[inline]
    fn visit(&mut self, ip: usize, frame: usize, stack: usize) {
        self(ip, frame, stack)
    }
}
