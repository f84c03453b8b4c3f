//! Page-aligned heap buffers for window memory and per-thread staging.
use crate::params::defaults::PAGE_SIZE;
use crate::{BenchError, Result};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Zero-initialized byte buffer aligned to a page boundary.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The buffer owns its allocation exclusively.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes aligned to [`PAGE_SIZE`].
    pub fn new(len: usize) -> Result<Self> {
        Self::with_align(len, PAGE_SIZE)
    }

    pub fn with_align(len: usize, align: usize) -> Result<Self> {
        if len == 0 {
            return Err(BenchError::InvalidParams(
                "cannot allocate an empty buffer".to_string(),
            ));
        }
        let layout = Layout::from_size_align(len, align)
            .map_err(|_| BenchError::Alloc { size: len, align })?;
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(BenchError::Alloc { size: len, align })?;
        Ok(AlignedBuffer { ptr, layout })
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len())
            .field("align", &self.layout.align())
            .finish()
    }
}
