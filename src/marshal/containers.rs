//! GList, GSList and GHashTable marshaling
//!
//! Container elements are stored as pointer-sized data: pointers as-is,
//! integers packed the way `GINT_TO_POINTER` does. Lists are converted
//! eagerly in both directions.

use core::ffi::c_void;
use std::sync::Arc;

use super::convert::{ingoing, outgoing, pointer_value};
use super::storage::Storage;
use super::Runtime;
use crate::error::{MarshalError, Result};
use crate::interop::{FfiType, FfiValue};
use crate::introspection::{TypeDescriptor, TypeTag};
use crate::value::Value;

const WORD: usize = core::mem::size_of::<usize>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListKind {
    /// `GList { data, next, prev }`
    Doubly,
    /// `GSList { data, next }`
    Singly,
}

impl ListKind {
    #[inline]
    fn node_size(self) -> usize {
        match self {
            Self::Doubly => 3 * WORD,
            Self::Singly => 2 * WORD,
        }
    }
}

/// Pack a host value into a container data word
fn to_pointer_data(
    rt: &Arc<Runtime>,
    element: &TypeDescriptor,
    value: &Value,
    storage: &mut Storage,
) -> Result<*mut c_void> {
    match element.slot_type() {
        FfiType::Void => Ok(core::ptr::null_mut()),
        FfiType::F32 | FfiType::F64 => Err(MarshalError::invalid_argument(
            "floating point values cannot be stored in pointer containers",
        )),
        FfiType::Pointer => Ok(unsafe { ingoing(rt, element, value, storage)?.ptr }),
        kind => {
            let raw = ingoing(rt, element, value, storage)?;
            Ok(unsafe { raw.as_i64(kind) } as isize as *mut c_void)
        }
    }
}

/// Unpack a container data word
fn from_pointer_data(rt: &Arc<Runtime>, element: &TypeDescriptor, data: *mut c_void) -> Result<Value> {
    match element.slot_type() {
        FfiType::Void => Ok(pointer_value(data)),
        FfiType::F32 | FfiType::F64 => Err(MarshalError::invalid_argument(
            "floating point values cannot be read from pointer containers",
        )),
        FfiType::Pointer => outgoing(rt, element, FfiValue::from_ptr(data), None),
        kind => outgoing(rt, element, FfiValue::from_int(kind, data as isize as i64), None),
    }
}

unsafe fn write_word(addr: *mut u8, offset: usize, ptr: *mut c_void) {
    FfiValue::from_ptr(ptr).write(FfiType::Pointer, addr.add(offset));
}

unsafe fn read_word(addr: *const u8, offset: usize) -> *mut c_void {
    FfiValue::read(FfiType::Pointer, addr.add(offset)).ptr
}

fn sequence_items(value: &Value) -> Result<Option<Vec<Value>>> {
    match value {
        Value::List(items) | Value::Tuple(items) => Ok(Some(items.clone())),
        Value::Array(array) => array.to_vec().map(Some),
        Value::ZeroTerminated(array) => array.to_vec().map(Some),
        _ => Ok(None),
    }
}

/// Build a native list from a host sequence; an empty list is null
pub(crate) fn list_ingoing(
    rt: &Arc<Runtime>,
    element: &TypeDescriptor,
    kind: ListKind,
    value: &Value,
    storage: &mut Storage,
) -> Result<*mut c_void> {
    let items = match value {
        Value::Nil => return Ok(core::ptr::null_mut()),
        Value::Pointer(ptr) => return Ok(*ptr),
        other => sequence_items(other)?.ok_or_else(|| {
            MarshalError::invalid_argument(format!("cannot convert {} to list", other.type_name()))
        })?,
    };

    let nodes: Vec<*mut u8> = items
        .iter()
        .map(|_| storage.alloc(kind.node_size()).as_ptr())
        .collect();

    for (i, item) in items.iter().enumerate() {
        let data = to_pointer_data(rt, element, item, storage)?;
        let next = nodes.get(i + 1).copied().unwrap_or(core::ptr::null_mut());
        unsafe {
            write_word(nodes[i], 0, data);
            write_word(nodes[i], WORD, next as *mut c_void);
            if kind == ListKind::Doubly && i > 0 {
                write_word(nodes[i], 2 * WORD, nodes[i - 1] as *mut c_void);
            }
        }
    }

    Ok(nodes.first().map_or(core::ptr::null_mut(), |&n| n as *mut c_void))
}

/// Read a native list into a host list
pub(crate) fn list_outgoing(
    rt: &Arc<Runtime>,
    element: &TypeDescriptor,
    head: *mut c_void,
) -> Result<Value> {
    let limit = rt.config().max_zero_terminated;
    let mut items = Vec::new();
    let mut node = head as *const u8;

    // `next` sits at the same offset in both node layouts
    while !node.is_null() {
        if items.len() == limit {
            return Err(MarshalError::invalid_argument(format!(
                "list longer than {} elements",
                limit
            )));
        }
        let data = unsafe { read_word(node, 0) };
        items.push(from_pointer_data(rt, element, data)?);
        node = unsafe { read_word(node, WORD) } as *const u8;
    }

    Ok(Value::List(items))
}

fn is_string_key(key: &TypeDescriptor) -> bool {
    matches!(key.tag(), TypeTag::Utf8 | TypeTag::Filename)
}

/// Build a native hash table from host key/value pairs
pub(crate) fn hash_ingoing(
    rt: &Arc<Runtime>,
    key: &TypeDescriptor,
    val: &TypeDescriptor,
    value: &Value,
    storage: &mut Storage,
) -> Result<*mut c_void> {
    let entries = match value {
        Value::Nil => return Ok(core::ptr::null_mut()),
        Value::Pointer(ptr) => return Ok(*ptr),
        Value::Map(entries) => entries,
        other => {
            return Err(MarshalError::invalid_argument(format!(
                "cannot convert {} to hash table",
                other.type_name()
            )))
        }
    };

    let native = storage.native().clone();
    let table = native.hash_table_new(is_string_key(key))?;
    storage.adopt_hash_table(table);

    for (k, v) in entries {
        let k = to_pointer_data(rt, key, k, storage)?;
        let v = to_pointer_data(rt, val, v, storage)?;
        native.hash_table_insert(table, k, v)?;
    }
    Ok(table)
}

/// Read a native hash table into host key/value pairs
pub(crate) fn hash_outgoing(
    rt: &Arc<Runtime>,
    key: &TypeDescriptor,
    val: &TypeDescriptor,
    table: *mut c_void,
) -> Result<Value> {
    if table.is_null() {
        return Ok(Value::Nil);
    }
    let entries = rt
        .native()
        .hash_table_entries(table)?
        .into_iter()
        .map(|(k, v)| Ok((from_pointer_data(rt, key, k)?, from_pointer_data(rt, val, v)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Map(entries))
}
