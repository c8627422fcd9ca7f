//! Executable memory for generated code
//!
//! A JIT needs pages it can write machine code into and then jump to.
//! [`ExecutableRegion`] owns one such mapping and unmaps it on drop.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::page_size;
    }
}

use core::ptr::NonNull;

/// Read/write/execute anonymous mapping
pub struct ExecutableRegion {
    base: NonNull<u8>,
    len: usize,
}

// Safety: the region is plain memory; callers coordinate access to contents
unsafe impl Send for ExecutableRegion {}
unsafe impl Sync for ExecutableRegion {}

impl ExecutableRegion {
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `addr` falls inside the mapping
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        let start = self.base.as_ptr() as usize;
        addr >= start && addr < start + self.len
    }

    /// Mutable view for emitting code
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: mapping is `len` bytes, exclusively borrowed
        unsafe { core::slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

impl core::fmt::Debug for ExecutableRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExecutableRegion")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}
