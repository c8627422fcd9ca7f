//! Per-thread wake signal
//!
//! Every runtime thread owns one [`ParkSignal`]: a private lock guarding the
//! thread's wait flags and interruption bit, plus a manual-reset binary
//! event the thread sleeps on while waiting on a monitor.
//!
//! The event is level-triggered. A `set` that lands before the sleeper
//! reaches `wait` is not lost; the sleeper returns immediately.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use std::time::Duration;

use hostsys_core::error::SysResult;
use hostsys_core::state::ThreadFlags;

use crate::lock::{Lock, LockGuard};

/// Manual-reset binary event
pub trait WakeEvent: Send + Sync {
    /// Signal the event and wake every sleeper
    fn set(&self);

    /// Clear the event
    fn reset(&self);

    /// Whether the event is currently signaled
    fn is_set(&self) -> bool;

    /// Sleep until the event is signaled or the timeout elapses
    ///
    /// `None` waits forever. Signal interruptions are absorbed and the
    /// remaining time recomputed. Returns `true` if the event was observed
    /// signaled.
    fn wait(&self, timeout: Option<Duration>) -> bool;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub(crate) mod futex_linux;
        pub use futex_linux::FutexEvent as PlatformEvent;
    } else {
        compile_error!("hostsys-runtime requires Linux");
    }
}

/// State guarded by the park lock
#[derive(Debug, Default)]
pub struct ParkState {
    pub flags: ThreadFlags,
    pub interrupted: bool,
}

/// Private lock + binary event owned by one thread
pub struct ParkSignal {
    lock: Lock,
    event: PlatformEvent,
    state: UnsafeCell<ParkState>,
}

// Safety: `state` is only reachable through a `ParkGuard`, which holds `lock`
unsafe impl Send for ParkSignal {}
unsafe impl Sync for ParkSignal {}

impl ParkSignal {
    pub fn new() -> SysResult<Self> {
        Ok(Self {
            lock: Lock::new()?,
            event: PlatformEvent::new(),
            state: UnsafeCell::new(ParkState::default()),
        })
    }

    /// Take the private lock
    #[inline]
    pub fn lock(&self) -> ParkGuard<'_> {
        let guard = self.lock.guard();
        ParkGuard { signal: self, _guard: guard }
    }

    /// Sleep on the event; call without holding the private lock
    #[inline]
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.event.wait(timeout)
    }
}

impl core::fmt::Debug for ParkSignal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ParkSignal")
            .field("signaled", &self.event.is_set())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a thread's wait state
pub struct ParkGuard<'a> {
    signal: &'a ParkSignal,
    _guard: LockGuard<'a>,
}

impl ParkGuard<'_> {
    /// Wake the owning thread
    #[inline]
    pub fn signal(&self) {
        self.signal.event.set();
    }

    /// Clear a stale wakeup before sleeping
    #[inline]
    pub fn reset(&self) {
        self.signal.event.reset();
    }
}

impl Deref for ParkGuard<'_> {
    type Target = ParkState;

    fn deref(&self) -> &ParkState {
        // Safety: the private lock is held for the guard's lifetime
        unsafe { &*self.signal.state.get() }
    }
}

impl DerefMut for ParkGuard<'_> {
    fn deref_mut(&mut self) -> &mut ParkState {
        // Safety: as above
        unsafe { &mut *self.signal.state.get() }
    }
}
