//! Reentrant monitor with a FIFO wait queue
//!
//! Ownership is tracked by [`ThreadId`] on top of a non-reentrant [`Lock`]:
//! the first acquisition takes the lock, nested ones only bump `depth`.
//! `wait` gives the monitor up completely (whatever the depth), sleeps on
//! the caller's [`ParkSignal`], and restores the saved depth afterwards.
//!
//! Lock order is park lock, then monitor lock. `wait` releases the monitor
//! lock while holding its own park lock, but re-acquires the monitor only
//! after dropping the park lock; `notify` takes a waiter's park lock while
//! holding the monitor lock. Neither path can deadlock against the other.

use core::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hostsys_core::error::SysResult;
use hostsys_core::fatal::{contract_violation, Violation};
use hostsys_core::id::ThreadId;
use hostsys_core::state::ThreadFlags;

use crate::lock::Lock;
use crate::thread::Thread;

const NO_OWNER: u64 = 0;

/// Reentrant lock + FIFO condition queue
pub struct Monitor {
    lock: Lock,
    /// Owner's `ThreadId`, or 0. Only the owner writes it, so a thread
    /// comparing it against its own id always gets an exact answer.
    owner: AtomicU64,
    /// Nesting depth; guarded by `lock`
    depth: UnsafeCell<u32>,
    /// Waiting threads in arrival order; guarded by `lock`
    waiters: UnsafeCell<VecDeque<Arc<Thread>>>,
}

// Safety: `depth` and `waiters` are only touched by the lock holder
unsafe impl Send for Monitor {}
unsafe impl Sync for Monitor {}

impl Monitor {
    pub fn new() -> SysResult<Self> {
        Ok(Self {
            lock: Lock::new()?,
            owner: AtomicU64::new(NO_OWNER),
            depth: UnsafeCell::new(0),
            waiters: UnsafeCell::new(VecDeque::new()),
        })
    }

    /// Current owner, if any (racy unless asked by the owner)
    #[inline]
    pub fn owner(&self) -> Option<ThreadId> {
        ThreadId::from_raw(self.owner.load(Ordering::Acquire))
    }

    #[inline]
    fn is_owned_by(&self, thread: &Thread) -> bool {
        self.owner.load(Ordering::Acquire) == thread.id().as_u64()
    }

    #[inline]
    fn check_owner(&self, thread: &Thread, op: &'static str) {
        if !self.is_owned_by(thread) {
            contract_violation(Violation::NotOwner(op));
        }
    }

    // Safety: caller holds `lock`
    #[allow(clippy::mut_from_ref)]
    #[inline]
    unsafe fn depth_mut(&self) -> &mut u32 {
        &mut *self.depth.get()
    }

    // Safety: caller holds `lock`
    #[allow(clippy::mut_from_ref)]
    #[inline]
    unsafe fn waiters_mut(&self) -> &mut VecDeque<Arc<Thread>> {
        &mut *self.waiters.get()
    }

    /// Take ownership after the lock itself has been acquired
    #[inline]
    fn take_ownership(&self, thread: &Thread, depth: u32) {
        // Safety: lock just acquired by this thread
        unsafe { *self.depth_mut() = depth };
        self.owner.store(thread.id().as_u64(), Ordering::Release);
    }

    /// Enter without blocking; `false` if another thread owns the monitor
    pub fn try_acquire(&self, thread: &Thread) -> bool {
        if self.is_owned_by(thread) {
            // Safety: we own the monitor, hence the lock
            unsafe { *self.depth_mut() += 1 };
            return true;
        }
        if !self.lock.try_acquire() {
            return false;
        }
        self.take_ownership(thread, 1);
        true
    }

    /// Enter, blocking until the monitor is free
    pub fn acquire(&self, thread: &Thread) {
        if self.is_owned_by(thread) {
            // Safety: we own the monitor, hence the lock
            unsafe { *self.depth_mut() += 1 };
            return;
        }
        self.lock.acquire();
        self.take_ownership(thread, 1);
    }

    /// Leave one nesting level; the outermost release frees the monitor
    pub fn release(&self, thread: &Thread) {
        self.check_owner(thread, "release");

        // Safety: we own the monitor
        let depth = unsafe { self.depth_mut() };
        *depth -= 1;
        if *depth == 0 {
            self.owner.store(NO_OWNER, Ordering::Release);
            self.lock.release();
        }
    }

    /// Give up the monitor and sleep until notified, interrupted, or
    /// `timeout_ms` elapses (0 = no timeout)
    ///
    /// On return the caller owns the monitor again at its original depth.
    /// Returns `true` if the wait ended because of an interruption (the
    /// interruption is consumed), `false` otherwise.
    pub fn wait(&self, thread: &Arc<Thread>, timeout_ms: u64) -> bool {
        self.check_owner(thread, "wait");

        let saved_depth;
        {
            let mut park = thread.park().lock();

            if park.interrupted {
                park.interrupted = false;
                return true;
            }

            // Anything left from an earlier wait is stale
            park.flags = ThreadFlags::WAITING;

            // Safety: we own the monitor
            unsafe {
                self.waiters_mut().push_back(Arc::clone(thread));
                saved_depth = core::mem::replace(self.depth_mut(), 0);
            }
            self.owner.store(NO_OWNER, Ordering::Release);
            self.lock.release();

            park.reset();
        }

        let timeout = (timeout_ms != 0).then(|| Duration::from_millis(timeout_ms));
        thread.park().wait(timeout);

        let (notified, interrupted) = {
            let mut park = thread.park().lock();
            let notified = park.flags.contains(ThreadFlags::NOTIFIED);
            park.flags = ThreadFlags::empty();
            (notified, core::mem::take(&mut park.interrupted))
        };

        self.lock.acquire();

        if !notified {
            // Timed out or interrupted: still queued
            self.remove_waiter(thread);
        }

        self.take_ownership(thread, saved_depth);
        interrupted
    }

    /// Wake the longest-waiting thread, if any
    pub fn notify(&self, thread: &Thread) {
        self.check_owner(thread, "notify");

        // Safety: we own the monitor
        if let Some(waiter) = unsafe { self.waiters_mut().pop_front() } {
            deliver(&waiter);
        }
    }

    /// Wake every waiting thread
    pub fn notify_all(&self, thread: &Thread) {
        self.check_owner(thread, "notify_all");

        // Safety: we own the monitor
        for waiter in unsafe { self.waiters_mut().drain(..) } {
            deliver(&waiter);
        }
    }

    /// Number of queued waiters (diagnostic; caller must own the monitor)
    pub fn waiter_count(&self, thread: &Thread) -> usize {
        self.check_owner(thread, "waiter_count");
        // Safety: we own the monitor
        unsafe { self.waiters_mut().len() }
    }

    /// Nesting depth held by the owner (diagnostic; caller must own)
    pub fn depth(&self, thread: &Thread) -> u32 {
        self.check_owner(thread, "depth");
        // Safety: we own the monitor
        unsafe { *self.depth_mut() }
    }

    fn remove_waiter(&self, thread: &Arc<Thread>) {
        // Safety: lock held by the caller
        let waiters = unsafe { self.waiters_mut() };
        if let Some(pos) = waiters.iter().position(|w| Arc::ptr_eq(w, thread)) {
            waiters.remove(pos);
        }
    }
}

/// Mark a dequeued waiter notified and wake it
fn deliver(waiter: &Thread) {
    let mut park = waiter.park().lock();
    park.flags |= ThreadFlags::NOTIFIED;
    park.signal();
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if self.owner.load(Ordering::Acquire) != NO_OWNER {
            contract_violation(Violation::DisposedInUse("monitor"));
        }
    }
}

impl core::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Monitor").field("owner", &self.owner()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{Detached, ThreadOptions};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex;
    use std::time::Instant;

    fn attach() -> Arc<Thread> {
        Thread::attach(Arc::new(Detached)).unwrap()
    }

    fn start<F>(f: F) -> Arc<Thread>
    where
        F: Fn(&Arc<Thread>) + Send + Sync + 'static,
    {
        Thread::start(Arc::new(f), &ThreadOptions::default()).unwrap()
    }

    /// Poll (as owner) until `n` threads are queued on `m`
    fn wait_for_waiters(m: &Monitor, me: &Thread, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            m.acquire(me);
            let count = m.waiter_count(me);
            m.release(me);
            if count >= n {
                return;
            }
            assert!(Instant::now() < deadline, "waiters never queued");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_reentrant_acquire() {
        let m = Monitor::new().unwrap();
        let t = attach();

        m.acquire(&t);
        m.acquire(&t);
        assert!(m.try_acquire(&t));
        assert_eq!(m.depth(&t), 3);
        assert_eq!(m.owner(), Some(t.id()));

        m.release(&t);
        m.release(&t);
        assert_eq!(m.owner(), Some(t.id()));
        m.release(&t);
        assert_eq!(m.owner(), None);
    }

    #[test]
    fn test_try_acquire_contended() {
        let m = Arc::new(Monitor::new().unwrap());
        let main = attach();
        m.acquire(&main);

        let m2 = Arc::clone(&m);
        let got = Arc::new(AtomicBool::new(true));
        let got2 = Arc::clone(&got);
        let t = start(move |me| got2.store(m2.try_acquire(me), Ordering::SeqCst));
        t.join().unwrap();
        assert!(!got.load(Ordering::SeqCst));

        m.release(&main);
    }

    #[test]
    fn test_mutual_exclusion() {
        let m = Arc::new(Monitor::new().unwrap());
        let inside = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&m);
                let inside = Arc::clone(&inside);
                let total = Arc::clone(&total);
                start(move |me| {
                    for _ in 0..500 {
                        m.acquire(me);
                        m.acquire(me);
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        total.fetch_add(1, Ordering::Relaxed);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        m.release(me);
                        m.release(me);
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(total.load(Ordering::Relaxed), 2000);
    }

    #[test]
    fn test_wait_timeout_restores_depth() {
        let m = Monitor::new().unwrap();
        let t = attach();

        m.acquire(&t);
        m.acquire(&t);
        let start = Instant::now();
        let interrupted = m.wait(&t, 30);
        assert!(!interrupted);
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert_eq!(m.owner(), Some(t.id()));
        assert_eq!(m.depth(&t), 2);
        assert_eq!(m.waiter_count(&t), 0);
        assert!(t.flags().is_empty());
        m.release(&t);
        m.release(&t);
    }

    #[test]
    fn test_pending_interrupt_returns_immediately() {
        let m = Monitor::new().unwrap();
        let t = attach();
        t.interrupt();

        m.acquire(&t);
        assert!(m.wait(&t, 0));
        assert!(!t.is_interrupted());
        assert_eq!(m.owner(), Some(t.id()));
        assert_eq!(m.waiter_count(&t), 0);
        m.release(&t);
    }

    #[test]
    fn test_notify_is_fifo() {
        let m = Arc::new(Monitor::new().unwrap());
        let main = attach();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut threads = Vec::new();

        for i in 1..=3 {
            let m2 = Arc::clone(&m);
            let order2 = Arc::clone(&order);
            threads.push(start(move |me| {
                m2.acquire(me);
                m2.wait(me, 0);
                order2.lock().unwrap().push(i);
                m2.release(me);
            }));
            // Queue strictly in order 1, 2, 3
            wait_for_waiters(&m, &main, i);
        }

        for k in 1..=3 {
            m.acquire(&main);
            m.notify(&main);
            m.release(&main);
            let deadline = Instant::now() + Duration::from_secs(10);
            while order.lock().unwrap().len() < k {
                assert!(Instant::now() < deadline);
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_notify_all_wakes_everyone() {
        let m = Arc::new(Monitor::new().unwrap());
        let main = attach();
        let woke = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&m);
                let woke = Arc::clone(&woke);
                start(move |me| {
                    m.acquire(me);
                    let interrupted = m.wait(me, 0);
                    assert!(!interrupted);
                    woke.fetch_add(1, Ordering::SeqCst);
                    m.release(me);
                })
            })
            .collect();

        wait_for_waiters(&m, &main, 4);
        m.acquire(&main);
        m.notify_all(&main);
        assert_eq!(m.waiter_count(&main), 0);
        m.release(&main);

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(woke.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_notify_without_waiters_is_noop() {
        let m = Monitor::new().unwrap();
        let t = attach();
        m.acquire(&t);
        m.notify(&t);
        m.notify_all(&t);
        m.release(&t);
    }

    #[test]
    fn test_interrupt_wakes_waiter() {
        let m = Arc::new(Monitor::new().unwrap());
        let main = attach();
        let result = Arc::new(AtomicUsize::new(0));

        let m2 = Arc::clone(&m);
        let result2 = Arc::clone(&result);
        let t = start(move |me| {
            m2.acquire(me);
            let interrupted = m2.wait(me, 0);
            // Owns the monitor again, and the waiter left the queue
            assert_eq!(m2.owner(), Some(me.id()));
            assert_eq!(m2.waiter_count(me), 0);
            result2.store(if interrupted { 1 } else { 2 }, Ordering::SeqCst);
            m2.release(me);
        });

        wait_for_waiters(&m, &main, 1);
        t.interrupt();
        t.join().unwrap();

        assert_eq!(result.load(Ordering::SeqCst), 1);
        assert!(!t.is_interrupted());
    }

    #[test]
    fn test_notify_then_wait_again_is_not_stale() {
        // A thread notified once must sleep normally on its next wait
        let m = Arc::new(Monitor::new().unwrap());
        let main = attach();
        let second_wait_timed_out = Arc::new(AtomicBool::new(false));

        let m2 = Arc::clone(&m);
        let flag = Arc::clone(&second_wait_timed_out);
        let t = start(move |me| {
            m2.acquire(me);
            m2.wait(me, 0);
            let start = Instant::now();
            m2.wait(me, 40);
            flag.store(start.elapsed() >= Duration::from_millis(35), Ordering::SeqCst);
            m2.release(me);
        });

        wait_for_waiters(&m, &main, 1);
        m.acquire(&main);
        m.notify(&main);
        m.release(&main);
        t.join().unwrap();

        assert!(second_wait_timed_out.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_releases_monitor_to_others() {
        // A waits; B gets in, notifies, leaves; A resumes as owner at depth 1
        let m = Arc::new(Monitor::new().unwrap());
        let main = attach();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (ma, la) = (Arc::clone(&m), Arc::clone(&log));
        let a = start(move |me| {
            ma.acquire(me);
            la.lock().unwrap().push("a-wait");
            ma.wait(me, 0);
            la.lock().unwrap().push("a-resumed");
            assert_eq!(ma.depth(me), 1);
            ma.release(me);
        });

        wait_for_waiters(&m, &main, 1);

        let (mb, lb) = (Arc::clone(&m), Arc::clone(&log));
        let b = start(move |me| {
            mb.acquire(me);
            lb.lock().unwrap().push("b-notify");
            mb.notify(me);
            mb.release(me);
        });

        b.join().unwrap();
        a.join().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a-wait", "b-notify", "a-resumed"]);
    }
}
