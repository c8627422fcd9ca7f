//! Linux futex-backed event
//!
//! Futex word semantics:
//! - 0 = not signaled
//! - 1 = signaled
//!
//! `set` stores 1 and wakes every sleeper; `reset` stores 0. A sleeper
//! FUTEX_WAITs while the word is 0, so a `set` racing with the wait makes
//! the kernel return EAGAIN instead of sleeping.

use super::WakeEvent;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Manual-reset event on a single futex word
pub struct FutexEvent {
    word: AtomicU32,
}

impl FutexEvent {
    pub const fn new() -> Self {
        Self { word: AtomicU32::new(0) }
    }
}

impl Default for FutexEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// FUTEX_WAIT while `*word == expected`; any wakeup (real, spurious, EINTR,
/// timeout) just returns and the caller re-checks
#[inline]
pub(crate) fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) {
    let timespec = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let timespec_ptr = match &timespec {
        Some(ts) => ts as *const libc::timespec,
        None => std::ptr::null(),
    };

    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            timespec_ptr,
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

/// Wake every FUTEX_WAIT sleeper on `word`
#[inline]
pub(crate) fn futex_wake_all(word: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            i32::MAX,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

impl WakeEvent for FutexEvent {
    fn set(&self) {
        if self.word.swap(1, Ordering::Release) == 0 {
            futex_wake_all(&self.word);
        }
    }

    fn reset(&self) {
        self.word.store(0, Ordering::Release);
    }

    fn is_set(&self) -> bool {
        self.word.load(Ordering::Acquire) != 0
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if self.is_set() {
                return true;
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            futex_wait(&self.word, 0, remaining);
        }
    }
}
