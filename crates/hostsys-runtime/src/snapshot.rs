//! Crash snapshots
//!
//! When a fault is escalated (or the runtime aborts deliberately) a short
//! text file is written to the configured directory:
//!
//! ```text
//! hostsys crash snapshot
//! signal: 11
//! address: 0x0000000000000010
//! tid: 41237
//! ip: 0x000055d0c0a1b2c3
//! frame: 0x00007ffd4e3a1f20
//! stack: 0x00007ffd4e3a1f00
//! thread-register (rbx): 0x0000000000000000
//! frames:
//!   #0 0x000055d0c0a1b2c3
//!   #1 0x000055d0c0a1a010
//! ```
//!
//! The file is named `crash-<unix-ms>.dump` (`crash-<unix-ms>-<n>.dump` on a
//! collision). Writing runs inside a signal handler, so it never allocates
//! or locks: formatting goes into fixed stack buffers, output is raw
//! `open`/`write`, and return addresses are read with `process_vm_readv`
//! so a corrupt frame chain ends the walk instead of faulting again.

use core::fmt::{self, Write as _};
use std::path::Path;

use hostsys_core::context::{FaultContext, THREAD_REGISTER};
use hostsys_core::error::{SysError, SysResult};

use crate::arch::WORD;

/// Longest directory path accepted (leaves room for the file name)
pub const MAX_DIR_LEN: usize = 3800;

const PATH_BUF: usize = 4096;
const LINE_BUF: usize = 256;
const MAX_COLLISIONS: u32 = 16;

/// Where and how much to write; built outside the signal handler
#[derive(Debug, Clone)]
pub struct SnapshotTarget {
    dir: String,
    max_frames: usize,
}

impl SnapshotTarget {
    pub fn new(dir: &Path, max_frames: usize) -> SysResult<Self> {
        let dir = dir
            .to_str()
            .ok_or(SysError::InvalidArgument("snapshot directory is not valid UTF-8"))?;
        if dir.is_empty() {
            return Err(SysError::InvalidArgument("snapshot directory is empty"));
        }
        if dir.len() > MAX_DIR_LEN || dir.contains('\0') {
            return Err(SysError::InvalidArgument("snapshot directory path unusable"));
        }
        Ok(Self {
            dir: dir.trim_end_matches('/').to_owned(),
            max_frames: max_frames.max(1),
        })
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }
}

/// Fixed-capacity formatting buffer; output past capacity is dropped
struct StackBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> StackBuf<N> {
    const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    fn clear(&mut self) {
        self.len = 0;
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl<const N: usize> fmt::Write for StackBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        if n < s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}

fn now_millis() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    ts.tv_sec as u64 * 1000 + ts.tv_nsec as u64 / 1_000_000
}

fn write_all(fd: libc::c_int, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if n < 0 {
            if unsafe { *libc::__errno_location() } == libc::EINTR {
                continue;
            }
            return;
        }
        bytes = &bytes[n as usize..];
    }
}

/// Read one word of our own memory without risking a fault
pub(crate) fn read_word(addr: usize) -> Option<usize> {
    let mut value: usize = 0;
    let local = libc::iovec {
        iov_base: (&mut value as *mut usize).cast(),
        iov_len: WORD,
    };
    let remote = libc::iovec {
        iov_base: addr as *mut libc::c_void,
        iov_len: WORD,
    };
    let n = unsafe { libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0) };
    (n == WORD as isize).then_some(value)
}

/// Open a fresh snapshot file; returns the fd
fn create_file(target: &SnapshotTarget, path: &mut StackBuf<PATH_BUF>) -> Option<libc::c_int> {
    let ms = now_millis();
    for attempt in 0..MAX_COLLISIONS {
        path.clear();
        let formatted = if attempt == 0 {
            write!(path, "{}/crash-{}.dump\0", target.dir, ms)
        } else {
            write!(path, "{}/crash-{}-{}.dump\0", target.dir, ms, attempt)
        };
        if formatted.is_err() {
            return None;
        }

        let fd = unsafe {
            libc::open(
                path.as_bytes().as_ptr().cast(),
                libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL | libc::O_CLOEXEC,
                0o644 as libc::c_uint,
            )
        };
        if fd >= 0 {
            return Some(fd);
        }
        if unsafe { *libc::__errno_location() } != libc::EEXIST {
            return None;
        }
    }
    None
}

/// Write a snapshot of `ctx`; `false` if no file could be produced
///
/// Async-signal-safe.
pub fn write(target: &SnapshotTarget, ctx: &FaultContext) -> bool {
    let mut path = StackBuf::<PATH_BUF>::new();
    let Some(fd) = create_file(target, &mut path) else {
        return false;
    };

    let mut line = StackBuf::<LINE_BUF>::new();
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };

    let _ = write!(
        line,
        "hostsys crash snapshot\nsignal: {}\naddress: {:#018x}\ntid: {}\n",
        ctx.signal(),
        ctx.address(),
        tid
    );
    write_all(fd, line.as_bytes());

    line.clear();
    let _ = write!(
        line,
        "ip: {:#018x}\nframe: {:#018x}\nstack: {:#018x}\nthread-register ({}): {:#018x}\nframes:\n",
        ctx.ip, ctx.frame, ctx.stack, THREAD_REGISTER, ctx.thread
    );
    write_all(fd, line.as_bytes());

    line.clear();
    let _ = writeln!(line, "  #0 {:#018x}", ctx.ip);
    write_all(fd, line.as_bytes());

    // [fp] = caller's fp, [fp + WORD] = return address on both targets
    let mut fp = ctx.frame;
    for depth in 1..target.max_frames {
        if fp == 0 || fp % WORD != 0 || fp < ctx.stack {
            break;
        }
        let (Some(next), Some(ret)) = (read_word(fp), read_word(fp + WORD)) else {
            break;
        };
        if ret == 0 {
            break;
        }

        line.clear();
        let _ = writeln!(line, "  #{} {:#018x}", depth, ret);
        write_all(fd, line.as_bytes());

        if next <= fp {
            break;
        }
        fp = next;
    }

    unsafe { libc::close(fd) };
    true
}
