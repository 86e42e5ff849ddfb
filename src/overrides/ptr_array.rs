//! `GPtrArray` viewed as a sized array of its elements

use core::ffi::c_void;
use std::sync::Arc;

use crate::introspection::TypeDescriptor;
use crate::marshal::{Runtime, SizedArray};

/// Public header of a `GPtrArray`
#[repr(C)]
struct RawPtrArray {
    pdata: *mut *mut c_void,
    len: u32,
}

pub struct PtrArray;

impl PtrArray {
    /// View the elements of the array at `ptr`; null yields `None`
    ///
    /// An array with no storage yet reads as empty.
    pub fn wrap(rt: &Arc<Runtime>, element: Arc<TypeDescriptor>, ptr: *mut c_void) -> Option<SizedArray> {
        if ptr.is_null() {
            return None;
        }
        let header = unsafe { &*(ptr as *const RawPtrArray) };
        if header.pdata.is_null() {
            return Some(SizedArray::allocate(rt, element, 0));
        }
        SizedArray::wrap(rt, element, header.len as usize, header.pdata as *mut c_void)
    }
}
