//! Thread wait flags and lifecycle state

use bitflags::bitflags;

bitflags! {
    /// Wait-protocol flags kept on every thread
    ///
    /// Only touched while the thread's private park lock is held.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadFlags: u8 {
        /// Thread is parked inside `Monitor::wait`
        const WAITING = 1 << 0;
        /// A notify reached the thread while it was queued
        const NOTIFIED = 1 << 1;
    }
}

impl Default for ThreadFlags {
    fn default() -> Self {
        ThreadFlags::empty()
    }
}

/// Lifecycle of the OS thread behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Handle exists, OS thread not yet running its runnable
    Created = 0,

    /// OS thread is live (attached, or started and running)
    Running = 1,

    /// Runnable returned; the OS thread is exiting or exited
    Finished = 2,

    /// OS thread joined; nothing left to wait for
    Joined = 3,
}

impl ThreadState {
    /// Whether signals may still be delivered to the OS thread
    #[inline]
    pub const fn is_live(&self) -> bool {
        matches!(self, ThreadState::Running)
    }
}

impl From<u8> for ThreadState {
    fn from(v: u8) -> Self {
        match v {
            0 => ThreadState::Created,
            1 => ThreadState::Running,
            2 => ThreadState::Finished,
            _ => ThreadState::Joined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut f = ThreadFlags::default();
        assert!(f.is_empty());
        f |= ThreadFlags::WAITING;
        assert!(f.contains(ThreadFlags::WAITING));
        assert!(!f.contains(ThreadFlags::NOTIFIED));
        let both = f | ThreadFlags::NOTIFIED;
        assert_eq!(both.bits(), 0b11);
        assert_eq!(both, ThreadFlags::all());
        assert_eq!(format!("{:?}", both), "ThreadFlags(WAITING | NOTIFIED)");
    }

    #[test]
    fn test_state_roundtrip() {
        for s in [ThreadState::Created, ThreadState::Running, ThreadState::Finished, ThreadState::Joined] {
            assert_eq!(ThreadState::from(s as u8), s);
        }
        assert!(ThreadState::Running.is_live());
        assert!(!ThreadState::Finished.is_live());
    }
}
