//! Non-reentrant native lock
//!
//! A thin owner of an error-checking `pthread_mutex_t`. Error checking is
//! what lets a release by a non-holder be caught and escalated as a
//! contract violation instead of corrupting the mutex.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use std::sync::OnceLock;

use hostsys_core::error::{Resource, SysError, SysResult};
use hostsys_core::fatal::{contract_violation, Violation};

/// Mutual exclusion over a native OS mutex
///
/// The mutex lives in its own heap allocation so the `Lock` value can move
/// freely after `pthread_mutex_init`.
pub struct Lock {
    raw: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

// Safety: pthread mutexes are designed to be shared between threads
unsafe impl Send for Lock {}
unsafe impl Sync for Lock {}

impl Lock {
    /// Create a new, unlocked lock
    pub fn new() -> SysResult<Self> {
        let raw = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));

        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            let rc = libc::pthread_mutexattr_init(attr.as_mut_ptr());
            if rc != 0 {
                return Err(SysError::exhausted(Resource::Lock, rc));
            }
            libc::pthread_mutexattr_settype(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ERRORCHECK);

            let rc = libc::pthread_mutex_init(raw.get(), attr.as_ptr());
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            if rc != 0 {
                return Err(SysError::exhausted(Resource::Lock, rc));
            }
        }

        Ok(Self { raw })
    }

    /// Block until the calling OS thread owns the lock
    #[inline]
    pub fn acquire(&self) {
        let rc = unsafe { libc::pthread_mutex_lock(self.raw.get()) };
        if rc != 0 {
            // EDEADLK: the caller already holds it
            contract_violation(Violation::Os("pthread_mutex_lock", rc));
        }
    }

    /// Take the lock if nobody holds it; never blocks
    #[inline]
    pub fn try_acquire(&self) -> bool {
        match unsafe { libc::pthread_mutex_trylock(self.raw.get()) } {
            0 => true,
            libc::EBUSY => false,
            rc => contract_violation(Violation::Os("pthread_mutex_trylock", rc)),
        }
    }

    /// Release the lock; aborts if the caller does not hold it
    #[inline]
    pub fn release(&self) {
        match unsafe { libc::pthread_mutex_unlock(self.raw.get()) } {
            0 => {}
            libc::EPERM => contract_violation(Violation::LockNotHeld),
            rc => contract_violation(Violation::Os("pthread_mutex_unlock", rc)),
        }
    }

    /// Acquire and release automatically at end of scope
    #[inline]
    pub fn guard(&self) -> LockGuard<'_> {
        self.acquire();
        LockGuard { lock: self }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let rc = unsafe { libc::pthread_mutex_destroy(self.raw.get()) };
        if rc == libc::EBUSY {
            contract_violation(Violation::DisposedInUse("lock"));
        }
    }
}

impl core::fmt::Debug for Lock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Lock").field("raw", &self.raw.get()).finish()
    }
}

/// Releases the lock when dropped
pub struct LockGuard<'a> {
    lock: &'a Lock,
}

impl Drop for LockGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.release();
    }
}

static SYSTEM_LOCK: OnceLock<Lock> = OnceLock::new();

/// The process-wide lock serializing fault-handler registration and
/// thread inspection
pub fn system_lock() -> SysResult<&'static Lock> {
    if let Some(lock) = SYSTEM_LOCK.get() {
        return Ok(lock);
    }
    let lock = Lock::new()?;
    // A racing initializer may win; its lock is as good as ours
    let _ = SYSTEM_LOCK.set(lock);
    SYSTEM_LOCK
        .get()
        .ok_or(SysError::exhausted(Resource::Lock, libc::EAGAIN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_release() {
        let lock = Lock::new().unwrap();
        lock.acquire();
        lock.release();
        lock.acquire();
        lock.release();
    }

    #[test]
    fn test_try_acquire() {
        let lock = Arc::new(Lock::new().unwrap());
        assert!(lock.try_acquire());

        let other = Arc::clone(&lock);
        let got = thread::spawn(move || other.try_acquire()).join().unwrap();
        assert!(!got);

        lock.release();

        let other = Arc::clone(&lock);
        let got = thread::spawn(move || {
            let ok = other.try_acquire();
            if ok {
                other.release();
            }
            ok
        })
        .join()
        .unwrap();
        assert!(got);
    }

    #[test]
    fn test_mutual_exclusion() {
        let lock = Arc::new(Lock::new().unwrap());
        let inside = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let total = Arc::clone(&total);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let _g = lock.guard();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    total.fetch_add(1, Ordering::Relaxed);
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(total.load(Ordering::Relaxed), 4000);
    }

    #[test]
    fn test_system_lock_is_shared() {
        let a = system_lock().unwrap() as *const Lock;
        let b = system_lock().unwrap() as *const Lock;
        assert_eq!(a, b);
    }
}
