//! Unix executable memory using mmap

use super::ExecutableRegion;
use core::ptr::NonNull;
use hostsys_core::error::{Resource, SysError, SysResult};
use hostsys_core::kdebug;

/// System page size
pub fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}

impl ExecutableRegion {
    /// Map `size` bytes readable, writable and executable
    ///
    /// `size` must be a positive multiple of [`page_size`].
    pub fn allocate(size: usize) -> SysResult<Self> {
        if size == 0 || size % page_size() != 0 {
            return Err(SysError::InvalidArgument("size must be a positive multiple of the page size"));
        }

        let base = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if base == libc::MAP_FAILED {
            let errno = nix::errno::Errno::last_raw();
            return Err(SysError::exhausted(Resource::Memory, errno));
        }

        let base = NonNull::new(base.cast::<u8>())
            .ok_or(SysError::exhausted(Resource::Memory, libc::ENOMEM))?;
        kdebug!("mapped {} executable bytes at {:p}", size, base);
        Ok(Self { base, len: size })
    }
}

impl Drop for ExecutableRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len);
        }
    }
}
