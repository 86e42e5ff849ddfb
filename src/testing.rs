//! Shared fixtures for unit tests

use core::ffi::c_void;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::MarshalConfig;
use crate::error::{MarshalError, Result};
use crate::interop::{FfiType, FfiValue};
use crate::marshal::Runtime;
use crate::memory::NativeBuffer;
use crate::object::{ClassRegistry, NativeRuntime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NativeCall {
    RefSink(usize),
    Unref(usize),
    Free(usize),
    FreeError(usize),
    HashUnref(usize),
    ByteArrayUnref(usize),
}

/// In-process stand-in for GLib that records what the engine asks of it
#[derive(Default)]
pub(crate) struct FakeRuntime {
    calls: Mutex<Vec<NativeCall>>,
    handles: Mutex<Vec<NativeBuffer>>,
    tables: Mutex<HashMap<usize, Vec<(usize, usize)>>>,
    byte_arrays: Mutex<HashMap<usize, Vec<u8>>>,
    quarks: Mutex<HashMap<u32, String>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<NativeCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: NativeCall) -> usize {
        self.calls.lock().iter().filter(|&&c| c == call).count()
    }

    pub fn register_quark(&self, quark: u32, name: &str) {
        self.quarks.lock().insert(quark, name.to_string());
    }

    fn record(&self, call: NativeCall) {
        self.calls.lock().push(call);
    }

    fn handle(&self, size: usize) -> *mut c_void {
        let buffer = NativeBuffer::zeroed(size);
        let ptr = buffer.as_void_ptr();
        self.handles.lock().push(buffer);
        ptr
    }
}

impl NativeRuntime for FakeRuntime {
    fn ref_sink(&self, object: *mut c_void) -> Result<*mut c_void> {
        self.record(NativeCall::RefSink(object as usize));
        Ok(object)
    }

    fn unref(&self, object: *mut c_void) -> Result<()> {
        self.record(NativeCall::Unref(object as usize));
        Ok(())
    }

    fn free(&self, ptr: *mut c_void) -> Result<()> {
        self.record(NativeCall::Free(ptr as usize));
        Ok(())
    }

    fn free_error(&self, error: *mut c_void) -> Result<()> {
        self.record(NativeCall::FreeError(error as usize));
        Ok(())
    }

    fn quark_to_string(&self, quark: u32) -> Option<String> {
        self.quarks.lock().get(&quark).cloned()
    }

    fn hash_table_new(&self, _string_keys: bool) -> Result<*mut c_void> {
        let table = self.handle(8);
        self.tables.lock().insert(table as usize, Vec::new());
        Ok(table)
    }

    fn hash_table_insert(&self, table: *mut c_void, key: *mut c_void, value: *mut c_void) -> Result<()> {
        let mut tables = self.tables.lock();
        let entries = tables
            .get_mut(&(table as usize))
            .ok_or_else(|| MarshalError::invalid_argument("unknown hash table"))?;
        entries.push((key as usize, value as usize));
        Ok(())
    }

    fn hash_table_entries(&self, table: *mut c_void) -> Result<Vec<(*mut c_void, *mut c_void)>> {
        let tables = self.tables.lock();
        let entries = tables
            .get(&(table as usize))
            .ok_or_else(|| MarshalError::invalid_argument("unknown hash table"))?;
        Ok(entries
            .iter()
            .map(|&(k, v)| (k as *mut c_void, v as *mut c_void))
            .collect())
    }

    fn hash_table_unref(&self, table: *mut c_void) -> Result<()> {
        self.record(NativeCall::HashUnref(table as usize));
        Ok(())
    }

    fn byte_array_new(&self) -> Result<*mut c_void> {
        // { guint8 *data; guint len; }
        let array = self.handle(16);
        self.byte_arrays.lock().insert(array as usize, Vec::new());
        Ok(array)
    }

    fn byte_array_append(&self, array: *mut c_void, data: &[u8]) -> Result<*mut c_void> {
        let mut arrays = self.byte_arrays.lock();
        let bytes = arrays
            .get_mut(&(array as usize))
            .ok_or_else(|| MarshalError::invalid_argument("unknown byte array"))?;
        bytes.extend_from_slice(data);
        unsafe {
            let header = array as *mut u8;
            FfiValue::from_ptr(bytes.as_mut_ptr() as *mut c_void).write(FfiType::Pointer, header);
            FfiValue { u32: bytes.len() as u32 }.write(FfiType::U32, header.add(FfiType::Pointer.size()));
        }
        Ok(array)
    }

    fn byte_array_unref(&self, array: *mut c_void) -> Result<()> {
        self.byte_arrays.lock().remove(&(array as usize));
        self.record(NativeCall::ByteArrayUnref(array as usize));
        Ok(())
    }
}

/// Native memory laid out like a `GTypeInstance` of a given GType
pub(crate) struct FakeObject {
    _class: NativeBuffer,
    instance: NativeBuffer,
}

impl FakeObject {
    pub fn new(gtype: usize) -> Self {
        let class = NativeBuffer::zeroed(16);
        let instance = NativeBuffer::zeroed(32);
        unsafe {
            class.write(FfiType::GType, 0, FfiValue { u64: gtype as u64 });
            instance.write(FfiType::Pointer, 0, FfiValue::from_ptr(class.as_void_ptr()));
        }
        Self {
            _class: class,
            instance,
        }
    }

    pub fn ptr(&self) -> *mut c_void {
        self.instance.as_void_ptr()
    }
}

pub(crate) fn runtime(native: Arc<FakeRuntime>, registry: Arc<ClassRegistry>) -> Arc<Runtime> {
    Runtime::new(registry, native)
}

pub(crate) fn runtime_with_config(
    native: Arc<FakeRuntime>,
    registry: Arc<ClassRegistry>,
    config: MarshalConfig,
) -> Arc<Runtime> {
    Runtime::with_config(registry, native, config)
}

/// Runtime with no registered classes
pub(crate) fn plain_runtime() -> (Arc<FakeRuntime>, Arc<Runtime>) {
    let native = FakeRuntime::new();
    let rt = runtime(native.clone(), Arc::new(ClassRegistry::new()));
    (native, rt)
}
