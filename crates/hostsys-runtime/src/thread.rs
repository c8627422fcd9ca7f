//! Runtime threads
//!
//! A [`Thread`] is the handle the embedding runtime uses for one OS thread:
//! it carries the identity monitors record as owner, the [`ParkSignal`] the
//! thread sleeps on in `Monitor::wait`, and the native `pthread_t` the
//! inspector signals. Threads are either *attached* (the calling OS thread,
//! adopted as-is) or *started* (a fresh OS thread running a [`Runnable`]).

use std::os::unix::thread::JoinHandleExt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::JoinHandle;

use hostsys_core::error::{Resource, SysError, SysResult};
use hostsys_core::id::ThreadId;
use hostsys_core::state::{ThreadFlags, ThreadState};
use hostsys_core::{kdebug, kwarn};

use crate::parking::ParkSignal;

/// Work executed on a started thread
pub trait Runnable: Send + Sync + 'static {
    fn run(&self, thread: &Arc<Thread>);
}

impl<F> Runnable for F
where
    F: Fn(&Arc<Thread>) + Send + Sync + 'static,
{
    #[inline]
    fn run(&self, thread: &Arc<Thread>) {
        self(thread)
    }
}

/// Runnable for attached threads, which never run one
pub struct Detached;

impl Runnable for Detached {
    fn run(&self, _thread: &Arc<Thread>) {}
}

/// Options for starting an OS thread
#[derive(Debug, Clone, Default)]
pub struct ThreadOptions {
    /// Stack size in bytes; 0 keeps the platform default
    pub stack_size: usize,
    /// OS thread name; defaults to `hostsys-<id>`
    pub name: Option<String>,
}

#[derive(Clone, Copy)]
struct NativeThread(libc::pthread_t);

// Safety: a pthread_t is an opaque id valid from any thread
unsafe impl Send for NativeThread {}
unsafe impl Sync for NativeThread {}

/// Handle for one runtime-visible OS thread
pub struct Thread {
    id: ThreadId,
    attached: bool,
    state: AtomicU8,
    native: OnceLock<NativeThread>,
    park: ParkSignal,
    runnable: Arc<dyn Runnable>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Thread {
    fn new(runnable: Arc<dyn Runnable>, attached: bool) -> SysResult<Self> {
        Ok(Self {
            id: ThreadId::next(),
            attached,
            state: AtomicU8::new(ThreadState::Created as u8),
            native: OnceLock::new(),
            park: ParkSignal::new()?,
            runnable,
            join: Mutex::new(None),
        })
    }

    /// Adopt the calling OS thread
    pub fn attach(runnable: Arc<dyn Runnable>) -> SysResult<Arc<Thread>> {
        let thread = Thread::new(runnable, true)?;
        let _ = thread.native.set(NativeThread(unsafe { libc::pthread_self() }));
        thread.set_state(ThreadState::Running);
        kdebug!("attached thread {}", thread.id);
        Ok(Arc::new(thread))
    }

    /// Spawn an OS thread that runs `runnable` once
    ///
    /// Failure to create the OS thread is reported as resource exhaustion.
    pub fn start(runnable: Arc<dyn Runnable>, options: &ThreadOptions) -> SysResult<Arc<Thread>> {
        let thread = Arc::new(Thread::new(runnable, false)?);
        // Live before the OS thread exists so an early inspection never
        // sees `Created` for a thread that is already running
        thread.set_state(ThreadState::Running);

        let name = options
            .name
            .clone()
            .unwrap_or_else(|| format!("hostsys-{}", thread.id));
        let mut builder = std::thread::Builder::new().name(name);
        if options.stack_size != 0 {
            builder = builder.stack_size(options.stack_size);
        }

        let child = Arc::clone(&thread);
        let handle = builder
            .spawn(move || {
                // Published before the runnable so `me` is inspectable at once
                let _ = child.native.set(NativeThread(unsafe { libc::pthread_self() }));
                let _finish = FinishOnExit(&child);
                let runnable = Arc::clone(&child.runnable);
                runnable.run(&child);
            })
            .map_err(|e| {
                thread.set_state(ThreadState::Finished);
                let errno = e.raw_os_error().unwrap_or(libc::EAGAIN);
                kwarn!("failed to start thread {}: {}", thread.id, e);
                SysError::exhausted(Resource::Thread, errno)
            })?;

        let _ = thread.native.set(NativeThread(handle.as_pthread_t()));
        *thread.join.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        kdebug!("started thread {}", thread.id);
        Ok(thread)
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    #[inline]
    pub fn state(&self) -> ThreadState {
        ThreadState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// The wake signal this thread sleeps on
    #[inline]
    pub fn park(&self) -> &ParkSignal {
        &self.park
    }

    /// Native pthread handle, once the OS thread exists
    #[inline]
    pub fn native(&self) -> Option<libc::pthread_t> {
        self.native.get().map(|n| n.0)
    }

    /// Whether this handle belongs to the calling OS thread
    pub fn is_current(&self) -> bool {
        match self.native() {
            Some(native) => unsafe { libc::pthread_equal(native, libc::pthread_self()) != 0 },
            None => false,
        }
    }

    /// Current wait flags (diagnostic)
    pub fn flags(&self) -> ThreadFlags {
        self.park.lock().flags
    }

    /// Post an interruption
    ///
    /// A thread parked in `Monitor::wait` is woken and its wait returns
    /// `true`; otherwise the interruption stays pending until the next wait
    /// (or [`take_interrupted`](Self::take_interrupted)) consumes it.
    pub fn interrupt(&self) {
        let mut park = self.park.lock();
        park.interrupted = true;
        if park.flags.contains(ThreadFlags::WAITING) {
            park.signal();
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.park.lock().interrupted
    }

    /// Read and clear the pending interruption
    pub fn take_interrupted(&self) -> bool {
        std::mem::take(&mut self.park.lock().interrupted)
    }

    /// Wait for a started thread's runnable to return
    ///
    /// Joining twice is a no-op; attached threads cannot be joined.
    pub fn join(&self) -> SysResult<()> {
        if self.attached {
            return Err(SysError::InvalidArgument("attached thread cannot be joined"));
        }
        if self.is_current() {
            return Err(SysError::InvalidArgument("thread cannot join itself"));
        }

        let handle = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                kwarn!("thread {} panicked", self.id);
            }
            self.set_state(ThreadState::Joined);
        }
        Ok(())
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("attached", &self.attached)
            .field("state", &self.state())
            .finish()
    }
}

/// Marks a started thread finished even if its runnable panics
struct FinishOnExit<'a>(&'a Thread);

impl Drop for FinishOnExit<'_> {
    fn drop(&mut self) {
        self.0.set_state(ThreadState::Finished);
    }
}
