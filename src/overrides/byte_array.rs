//! `GByteArray`, GLib's automatically growing byte buffer

use core::ffi::c_void;
use core::ptr::NonNull;
use std::fmt;
use std::sync::Arc;

use crate::error::{MarshalError, Result};
use crate::logging::warn;
use crate::marshal::Runtime;

/// Public header of a `GByteArray`
#[repr(C)]
struct RawByteArray {
    data: *mut u8,
    len: u32,
}

/// One native array; unref'd on drop when this side created it
struct Handle {
    ptr: NonNull<c_void>,
    owned: bool,
    runtime: Arc<Runtime>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = self.runtime.native().byte_array_unref(self.ptr.as_ptr()) {
                warn!(error = %e, "failed to release byte array");
            }
        }
    }
}

#[derive(Clone)]
pub struct ByteArray {
    handle: Arc<Handle>,
}

impl ByteArray {
    /// Fresh empty array from the native allocator, released with the last clone
    pub fn new(rt: &Arc<Runtime>) -> Result<Self> {
        let ptr = rt.native().byte_array_new()?;
        let ptr = NonNull::new(ptr).ok_or_else(|| MarshalError::invalid_argument("byte array allocation returned null"))?;
        Ok(Self::from_handle(rt, ptr, true))
    }

    /// Borrowed view of an array owned elsewhere
    pub fn wrap(rt: &Arc<Runtime>, ptr: *mut c_void) -> Option<Self> {
        Some(Self::from_handle(rt, NonNull::new(ptr)?, false))
    }

    fn from_handle(rt: &Arc<Runtime>, ptr: NonNull<c_void>, owned: bool) -> Self {
        Self {
            handle: Arc::new(Handle {
                ptr,
                owned,
                runtime: rt.clone(),
            }),
        }
    }

    /// Append `data`, returning the array the native side hands back
    pub fn append(&self, data: impl AsRef<[u8]>) -> Result<Self> {
        let runtime = &self.handle.runtime;
        let ptr = runtime.native().byte_array_append(self.as_ptr(), data.as_ref())?;
        if ptr == self.as_ptr() || ptr.is_null() {
            return Ok(self.clone());
        }
        Ok(Self::from_handle(runtime, NonNull::new(ptr).unwrap_or(self.handle.ptr), false))
    }

    fn header(&self) -> &RawByteArray {
        unsafe { &*(self.handle.ptr.as_ptr() as *const RawByteArray) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.header().len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents
    ///
    /// Any clone may append and move the native data, so no borrow of it is
    /// handed out.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = self.header();
        if header.data.is_null() || header.len == 0 {
            return Vec::new();
        }
        unsafe { core::slice::from_raw_parts(header.data, header.len as usize) }.to_vec()
    }

    /// Whether dropping the last clone releases the native array
    pub fn is_owned(&self) -> bool {
        self.handle.owned
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.handle.ptr.as_ptr()
    }
}

/// Contents decoded as UTF-8, replacing invalid sequences
impl fmt::Display for ByteArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

impl PartialEq for ByteArray {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl fmt::Debug for ByteArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteArray")
            .field("ptr", &self.handle.ptr)
            .field("len", &self.len())
            .finish()
    }
}
