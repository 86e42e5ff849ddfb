//! Native object runtime
//!
//! The handful of GLib/GObject primitives the engine calls on its own behalf:
//! reference claiming and release, freeing returned buffers and error
//! records, quark names, hash-table and byte-array plumbing.

use core::ffi::c_void;
use std::ffi::CStr;

use crate::error::Result;
use crate::interop::{CallingConvention, FfiType, FfiValue, FunctionCall, Library};
use crate::logging::debug;
use crate::memory::NativeBuffer;

pub trait NativeRuntime: Send + Sync {
    /// Convert a floating reference into an owned one
    fn ref_sink(&self, object: *mut c_void) -> Result<*mut c_void>;

    fn unref(&self, object: *mut c_void) -> Result<()>;

    /// Release a buffer allocated by the native allocator
    fn free(&self, ptr: *mut c_void) -> Result<()>;

    /// Release an error record read from an error slot
    fn free_error(&self, error: *mut c_void) -> Result<()>;

    /// Name of an error domain, if registered
    fn quark_to_string(&self, quark: u32) -> Option<String>;

    /// New table hashing keys as strings or as raw pointers
    fn hash_table_new(&self, string_keys: bool) -> Result<*mut c_void>;

    fn hash_table_insert(&self, table: *mut c_void, key: *mut c_void, value: *mut c_void) -> Result<()>;

    fn hash_table_entries(&self, table: *mut c_void) -> Result<Vec<(*mut c_void, *mut c_void)>>;

    fn hash_table_unref(&self, table: *mut c_void) -> Result<()>;

    fn byte_array_new(&self) -> Result<*mut c_void>;

    /// Append bytes; returns the (possibly moved) array
    fn byte_array_append(&self, array: *mut c_void, data: &[u8]) -> Result<*mut c_void>;

    fn byte_array_unref(&self, array: *mut c_void) -> Result<()>;
}

#[cfg(target_os = "macos")]
mod names {
    pub const GLIB: &str = "libglib-2.0.0.dylib";
    pub const GOBJECT: &str = "libgobject-2.0.0.dylib";
}

#[cfg(windows)]
mod names {
    pub const GLIB: &str = "libglib-2.0-0.dll";
    pub const GOBJECT: &str = "libgobject-2.0-0.dll";
}

#[cfg(not(any(target_os = "macos", windows)))]
mod names {
    pub const GLIB: &str = "libglib-2.0.so.0";
    pub const GOBJECT: &str = "libgobject-2.0.so.0";
}

/// Opaque `GHashTableIter`; six pointer-sized words on every platform
const HASH_ITER_SIZE: usize = 64;

/// [`NativeRuntime`] backed by the system GLib and GObject libraries
pub struct GLibRuntime {
    _glib: Library,
    _gobject: Library,
    ref_sink: FunctionCall,
    unref: FunctionCall,
    free: FunctionCall,
    error_free: FunctionCall,
    quark_to_string: FunctionCall,
    hash_table_new: FunctionCall,
    hash_table_insert: FunctionCall,
    hash_table_unref: FunctionCall,
    hash_iter_init: FunctionCall,
    hash_iter_next: FunctionCall,
    byte_array_new: FunctionCall,
    byte_array_append: FunctionCall,
    byte_array_unref: FunctionCall,
    str_hash: usize,
    str_equal: usize,
    direct_hash: usize,
    direct_equal: usize,
}

fn bind(lib: &Library, symbol: &str, ret: FfiType, args: &[FfiType]) -> Result<FunctionCall> {
    let ptr = lib.symbol(symbol)?;
    Ok(FunctionCall::new(
        ptr,
        CallingConvention::platform(),
        ret,
        args.to_vec(),
    ))
}

impl GLibRuntime {
    /// Load from the platform's default library names
    pub fn load() -> Result<Self> {
        Self::load_from(names::GLIB, names::GOBJECT)
    }

    pub fn load_from(glib_path: &str, gobject_path: &str) -> Result<Self> {
        use FfiType::{Boolean, Pointer, Void, U32};

        let glib = Library::load(glib_path)?;
        let gobject = Library::load(gobject_path)?;

        let runtime = Self {
            ref_sink: bind(&gobject, "g_object_ref_sink", Pointer, &[Pointer])?,
            unref: bind(&gobject, "g_object_unref", Void, &[Pointer])?,
            free: bind(&glib, "g_free", Void, &[Pointer])?,
            error_free: bind(&glib, "g_error_free", Void, &[Pointer])?,
            quark_to_string: bind(&glib, "g_quark_to_string", Pointer, &[U32])?,
            hash_table_new: bind(&glib, "g_hash_table_new", Pointer, &[Pointer, Pointer])?,
            hash_table_insert: bind(&glib, "g_hash_table_insert", Boolean, &[Pointer, Pointer, Pointer])?,
            hash_table_unref: bind(&glib, "g_hash_table_unref", Void, &[Pointer])?,
            hash_iter_init: bind(&glib, "g_hash_table_iter_init", Void, &[Pointer, Pointer])?,
            hash_iter_next: bind(&glib, "g_hash_table_iter_next", Boolean, &[Pointer, Pointer, Pointer])?,
            byte_array_new: bind(&glib, "g_byte_array_new", Pointer, &[])?,
            byte_array_append: bind(&glib, "g_byte_array_append", Pointer, &[Pointer, Pointer, U32])?,
            byte_array_unref: bind(&glib, "g_byte_array_unref", Void, &[Pointer])?,
            str_hash: glib.symbol("g_str_hash")? as usize,
            str_equal: glib.symbol("g_str_equal")? as usize,
            direct_hash: glib.symbol("g_direct_hash")? as usize,
            direct_equal: glib.symbol("g_direct_equal")? as usize,
            _glib: glib,
            _gobject: gobject,
        };

        debug!(glib = glib_path, gobject = gobject_path, "GLib runtime bound");
        Ok(runtime)
    }

    fn call_ptr(call: &FunctionCall, args: &[FfiValue]) -> Result<*mut c_void> {
        let ret = unsafe { call.call(args)? };
        Ok(unsafe { ret.ptr })
    }

    fn call_void(call: &FunctionCall, args: &[FfiValue]) -> Result<()> {
        unsafe { call.call(args)? };
        Ok(())
    }
}

impl NativeRuntime for GLibRuntime {
    fn ref_sink(&self, object: *mut c_void) -> Result<*mut c_void> {
        Self::call_ptr(&self.ref_sink, &[FfiValue::from_ptr(object)])
    }

    fn unref(&self, object: *mut c_void) -> Result<()> {
        Self::call_void(&self.unref, &[FfiValue::from_ptr(object)])
    }

    fn free(&self, ptr: *mut c_void) -> Result<()> {
        Self::call_void(&self.free, &[FfiValue::from_ptr(ptr)])
    }

    fn free_error(&self, error: *mut c_void) -> Result<()> {
        Self::call_void(&self.error_free, &[FfiValue::from_ptr(error)])
    }

    fn quark_to_string(&self, quark: u32) -> Option<String> {
        let name = Self::call_ptr(&self.quark_to_string, &[FfiValue { u32: quark }]).ok()?;
        if name.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr(name as *const _) };
        Some(name.to_string_lossy().into_owned())
    }

    fn hash_table_new(&self, string_keys: bool) -> Result<*mut c_void> {
        let (hash, equal) = if string_keys {
            (self.str_hash, self.str_equal)
        } else {
            (self.direct_hash, self.direct_equal)
        };
        Self::call_ptr(
            &self.hash_table_new,
            &[
                FfiValue::from_ptr(hash as *mut c_void),
                FfiValue::from_ptr(equal as *mut c_void),
            ],
        )
    }

    fn hash_table_insert(&self, table: *mut c_void, key: *mut c_void, value: *mut c_void) -> Result<()> {
        Self::call_void(
            &self.hash_table_insert,
            &[
                FfiValue::from_ptr(table),
                FfiValue::from_ptr(key),
                FfiValue::from_ptr(value),
            ],
        )
    }

    fn hash_table_entries(&self, table: *mut c_void) -> Result<Vec<(*mut c_void, *mut c_void)>> {
        let iter = NativeBuffer::zeroed(HASH_ITER_SIZE);
        let key = NativeBuffer::pointer_cell();
        let value = NativeBuffer::pointer_cell();

        Self::call_void(
            &self.hash_iter_init,
            &[FfiValue::from_ptr(iter.as_void_ptr()), FfiValue::from_ptr(table)],
        )?;

        let mut entries = Vec::new();
        loop {
            let more = unsafe {
                self.hash_iter_next.call(&[
                    FfiValue::from_ptr(iter.as_void_ptr()),
                    FfiValue::from_ptr(key.as_void_ptr()),
                    FfiValue::from_ptr(value.as_void_ptr()),
                ])?
            };
            if unsafe { more.i32 } == 0 {
                break;
            }
            let k = unsafe { key.read(FfiType::Pointer, 0).ptr };
            let v = unsafe { value.read(FfiType::Pointer, 0).ptr };
            entries.push((k, v));
        }
        Ok(entries)
    }

    fn hash_table_unref(&self, table: *mut c_void) -> Result<()> {
        Self::call_void(&self.hash_table_unref, &[FfiValue::from_ptr(table)])
    }

    fn byte_array_new(&self) -> Result<*mut c_void> {
        Self::call_ptr(&self.byte_array_new, &[])
    }

    fn byte_array_append(&self, array: *mut c_void, data: &[u8]) -> Result<*mut c_void> {
        let len = u32::try_from(data.len()).map_err(|_| {
            crate::error::MarshalError::invalid_argument("byte array append exceeds 4 GiB")
        })?;
        Self::call_ptr(
            &self.byte_array_append,
            &[
                FfiValue::from_ptr(array),
                FfiValue::from_ptr(data.as_ptr() as *mut c_void),
                FfiValue { u32: len },
            ],
        )
    }

    fn byte_array_unref(&self, array: *mut c_void) -> Result<()> {
        Self::call_void(&self.byte_array_unref, &[FfiValue::from_ptr(array)])
    }
}
