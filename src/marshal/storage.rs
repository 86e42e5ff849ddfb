//! Host-owned native allocations backing marshaled values

use core::ffi::c_void;
use core::ptr::NonNull;
use std::sync::Arc;

use crate::logging::warn;
use crate::memory::NativeBuffer;
use crate::object::NativeRuntime;

/// Buffers, nested storages and native hash tables kept alive together
///
/// Arrays built from host sequences own one of these; a call frame owns one
/// for the duration of a call.
pub struct Storage {
    native: Arc<dyn NativeRuntime>,
    buffers: Vec<NativeBuffer>,
    retained: Vec<Arc<Storage>>,
    hash_tables: Vec<usize>,
}

impl Storage {
    pub(crate) fn new(native: Arc<dyn NativeRuntime>) -> Self {
        Self {
            native,
            buffers: Vec::new(),
            retained: Vec::new(),
            hash_tables: Vec::new(),
        }
    }

    /// Zeroed allocation that lives as long as this storage
    pub(crate) fn alloc(&mut self, len: usize) -> NonNull<u8> {
        let buffer = NativeBuffer::zeroed(len);
        let ptr = buffer.as_non_null().cast();
        self.buffers.push(buffer);
        ptr
    }

    /// Null-terminated copy of `s`
    pub(crate) fn string(&mut self, s: &str) -> *mut c_void {
        let buffer = NativeBuffer::from_str_nul(s);
        let ptr = buffer.as_void_ptr();
        self.buffers.push(buffer);
        ptr
    }

    pub(crate) fn retain(&mut self, other: &Arc<Storage>) {
        self.retained.push(other.clone());
    }

    /// Release `table` when this storage drops
    pub(crate) fn adopt_hash_table(&mut self, table: *mut c_void) {
        self.hash_tables.push(table as usize);
    }

    /// Whether `ptr` points into memory this storage keeps alive
    pub(crate) fn contains(&self, ptr: *const c_void) -> bool {
        let addr = ptr as usize;
        self.buffers.iter().any(|buffer| {
            let start = buffer.as_ptr() as usize;
            addr >= start && addr < start + buffer.len().max(1)
        }) || self.retained.iter().any(|other| other.contains(ptr))
    }

    pub(crate) fn native(&self) -> &Arc<dyn NativeRuntime> {
        &self.native
    }

    pub fn allocation_count(&self) -> usize {
        self.buffers.len()
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        for &table in &self.hash_tables {
            if let Err(e) = self.native.hash_table_unref(table as *mut c_void) {
                warn!(table, error = %e, "failed to release hash table");
            }
        }
    }
}
