//! Native memory owned by the host side
//!
//! Out-parameter cells, caller-allocated composites, fresh arrays and string
//! copies are all `NativeBuffer`s. A buffer is zero-initialized, never moves,
//! and is released when dropped.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};

use crate::interop::{FfiType, FfiValue};
use crate::logging::trace;

/// Minimum alignment for every buffer; matches malloc on 64-bit targets
const MIN_ALIGN: usize = 16;

pub struct NativeBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
}

// The buffer exclusively owns its allocation.
unsafe impl Send for NativeBuffer {}
unsafe impl Sync for NativeBuffer {}

impl NativeBuffer {
    /// Allocate `len` zeroed bytes
    pub fn zeroed(len: usize) -> Self {
        // Zero-sized layouts cannot be allocated; keep one byte so the
        // pointer is unique and non-null.
        let layout = Layout::from_size_align(len.max(1), MIN_ALIGN)
            .unwrap_or_else(|_| handle_alloc_error(Layout::new::<u8>()));

        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| handle_alloc_error(layout));

        trace!(event = "native_alloc", size_bytes = len, address = ?raw);

        Self { ptr, layout, len }
    }

    /// Allocate and fill from a byte slice
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let buffer = Self::zeroed(bytes.len());
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.ptr.as_ptr(), bytes.len());
        }
        buffer
    }

    /// Copy a string into a null-terminated buffer
    pub fn from_str_nul(s: &str) -> Self {
        // zeroed() already leaves the terminator in place
        let buffer = Self::zeroed(s.len() + 1);
        unsafe {
            core::ptr::copy_nonoverlapping(s.as_ptr(), buffer.ptr.as_ptr(), s.len());
        }
        buffer
    }

    /// Single pointer-sized cell holding null, as used for out-pointers
    pub fn pointer_cell() -> Self {
        Self::zeroed(FfiType::Pointer.size())
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_void_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr() as *mut c_void
    }

    #[inline]
    pub fn as_non_null(&self) -> NonNull<c_void> {
        self.ptr.cast()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Read a slot of type `ty` at `offset`
    pub fn read(&self, ty: FfiType, offset: usize) -> FfiValue {
        assert!(offset + ty.size() <= self.len.max(1), "read past end of native buffer");
        unsafe { FfiValue::read(ty, self.ptr.as_ptr().add(offset)) }
    }

    /// Write a slot of type `ty` at `offset`
    ///
    /// # Safety
    /// The field of `value` selected by `ty` must be initialized.
    pub unsafe fn write(&self, ty: FfiType, offset: usize, value: FfiValue) {
        assert!(offset + ty.size() <= self.len.max(1), "write past end of native buffer");
        value.write(ty, self.ptr.as_ptr().add(offset));
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        trace!(event = "native_free", address = ?self.ptr.as_ptr());
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl core::fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NativeBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
