//! Conversion tables
//!
//! `ingoing` turns a host value into the native slot for a type, `outgoing`
//! turns a native slot back into a host value. Both dispatch on the
//! specialized tag; there is no fallback arm.

use core::ffi::c_void;
use std::ffi::CStr;
use std::sync::Arc;

use super::containers::{self, ListKind};
use super::sized_array::SizedArray;
use super::storage::Storage;
use super::zero_terminated::ZeroTerminated;
use super::Runtime;
use crate::error::{MarshalError, Result};
use crate::interop::{FfiType, FfiValue};
use crate::introspection::{
    cast_uint32_to_int32, flatten_tag, RegisteredType, SpecializedTag, TypeDescriptor, TypeKind,
};
use crate::logging::log_type_conversion;
use crate::overrides::{ByteArray, PtrArray};
use crate::value::{EnumValue, Value};

/// Host value to native slot
pub(crate) fn ingoing(
    rt: &Arc<Runtime>,
    ty: &TypeDescriptor,
    value: &Value,
    storage: &mut Storage,
) -> Result<FfiValue> {
    let tag = flatten_tag(ty);
    log_type_conversion(value.type_name(), tag.name());

    match tag {
        SpecializedTag::Void => {
            if ty.is_pointer() {
                pointer_of(value, tag).map(FfiValue::from_ptr)
            } else if value.is_nil() {
                Ok(FfiValue::void())
            } else {
                Err(mismatch(value, tag))
            }
        }
        SpecializedTag::GPointer | SpecializedTag::Callback => pointer_of(value, tag).map(FfiValue::from_ptr),
        SpecializedTag::Scalar(kind) => {
            if ty.is_pointer() && kind != FfiType::Pointer {
                pointer_of(value, tag).map(FfiValue::from_ptr)
            } else {
                scalar_ingoing(kind, value)
            }
        }
        SpecializedTag::Utf8 | SpecializedTag::Filename => string_ingoing(value, storage),
        SpecializedTag::Enum | SpecializedTag::Flags => {
            let info = interface_of(ty)?;
            enum_ingoing(info, value).map(|v| FfiValue::from_int(info.storage(), v as i64))
        }
        SpecializedTag::Struct
        | SpecializedTag::Union
        | SpecializedTag::Object
        | SpecializedTag::Interface => instance_ingoing(interface_of(ty)?, value).map(FfiValue::from_ptr),
        SpecializedTag::CArray => {
            let array = SizedArray::from(rt, element_of(ty)?.clone(), ty.array_fixed_size(), value)?;
            Ok(FfiValue::from_ptr(keep_array(array, storage)))
        }
        SpecializedTag::Array => {
            let array = SizedArray::from(rt, element_of(ty)?.clone(), None, value)?;
            Ok(FfiValue::from_ptr(keep_array(array, storage)))
        }
        SpecializedTag::ZeroTerminated | SpecializedTag::Strv => {
            let array = ZeroTerminated::from(rt, element_of(ty)?.clone(), value)?;
            let ptr = match array {
                Some(array) => {
                    if let Some(owned) = array.storage() {
                        storage.retain(owned);
                    }
                    array.as_ptr()
                }
                None => core::ptr::null_mut(),
            };
            Ok(FfiValue::from_ptr(ptr))
        }
        SpecializedTag::GList => {
            containers::list_ingoing(rt, element_of(ty)?, ListKind::Doubly, value, storage).map(FfiValue::from_ptr)
        }
        SpecializedTag::GSList => {
            containers::list_ingoing(rt, element_of(ty)?, ListKind::Singly, value, storage).map(FfiValue::from_ptr)
        }
        SpecializedTag::GHash => {
            let (key, val) = key_value_of(ty)?;
            containers::hash_ingoing(rt, key, val, value, storage).map(FfiValue::from_ptr)
        }
        SpecializedTag::ByteArray => match value {
            Value::ByteArray(_) | Value::Nil | Value::Pointer(_) => {
                pointer_of(value, tag).map(FfiValue::from_ptr)
            }
            other => Err(mismatch(other, tag)),
        },
        SpecializedTag::PtrArray => match value {
            Value::Nil | Value::Pointer(_) => pointer_of(value, tag).map(FfiValue::from_ptr),
            other => Err(mismatch(other, tag)),
        },
    }
}

/// Native slot to host value
///
/// `length` is the element count of a length-paired array, when known.
pub(crate) fn outgoing(
    rt: &Arc<Runtime>,
    ty: &TypeDescriptor,
    raw: FfiValue,
    length: Option<usize>,
) -> Result<Value> {
    let tag = flatten_tag(ty);
    log_type_conversion(tag.name(), "host");

    let value = match tag {
        SpecializedTag::Void => {
            if ty.is_pointer() {
                pointer_value(unsafe { raw.ptr })
            } else {
                Value::Nil
            }
        }
        SpecializedTag::GPointer | SpecializedTag::Callback => pointer_value(unsafe { raw.ptr }),
        SpecializedTag::Scalar(kind) => {
            if ty.is_pointer() && kind != FfiType::Pointer {
                pointer_value(unsafe { raw.ptr })
            } else {
                scalar_outgoing(kind, raw)
            }
        }
        SpecializedTag::Utf8 | SpecializedTag::Filename => utf8_from_ptr(unsafe { raw.ptr }),
        SpecializedTag::Enum | SpecializedTag::Flags => {
            let info = interface_of(ty)?;
            let v = unsafe { raw.as_i64(info.storage()) };
            Value::Enum(EnumValue::new(info.clone(), cast_uint32_to_int32(v)))
        }
        SpecializedTag::Struct | SpecializedTag::Union => {
            let info = interface_of(ty)?;
            rt.identity().direct_wrap(info, unsafe { raw.ptr }).into()
        }
        SpecializedTag::Object | SpecializedTag::Interface => {
            let info = interface_of(ty)?;
            rt.identity().wrap(info, unsafe { raw.ptr }).into()
        }
        SpecializedTag::CArray => {
            let size = ty.array_fixed_size().unwrap_or(0);
            SizedArray::wrap(rt, element_of(ty)?.clone(), size, unsafe { raw.ptr }).into()
        }
        SpecializedTag::Array => match length {
            Some(len) => SizedArray::wrap(rt, element_of(ty)?.clone(), len, unsafe { raw.ptr }).into(),
            None => pointer_value(unsafe { raw.ptr }),
        },
        SpecializedTag::ZeroTerminated | SpecializedTag::Strv => {
            match ZeroTerminated::wrap(rt, element_of(ty)?.clone(), unsafe { raw.ptr })? {
                Some(array) => Value::ZeroTerminated(array),
                None => Value::Nil,
            }
        }
        SpecializedTag::GList | SpecializedTag::GSList => {
            containers::list_outgoing(rt, element_of(ty)?, unsafe { raw.ptr })?
        }
        SpecializedTag::GHash => {
            let (key, val) = key_value_of(ty)?;
            containers::hash_outgoing(rt, key, val, unsafe { raw.ptr })?
        }
        SpecializedTag::ByteArray => match ByteArray::wrap(rt, unsafe { raw.ptr }) {
            Some(bytes) => Value::ByteArray(bytes),
            None => Value::Nil,
        },
        SpecializedTag::PtrArray => {
            PtrArray::wrap(rt, element_of(ty)?.clone(), unsafe { raw.ptr }).into()
        }
    };
    Ok(value)
}

/// Encode one array element at `addr`
///
/// # Safety
/// `addr` must be valid for writes of `element.element_size()` bytes.
pub(crate) unsafe fn write_element(
    rt: &Arc<Runtime>,
    element: &TypeDescriptor,
    value: &Value,
    addr: *mut u8,
    storage: &mut Storage,
) -> Result<()> {
    if element.is_inline_composite() {
        let src = instance_ingoing(interface_of(element)?, value)?;
        if !src.is_null() {
            core::ptr::copy_nonoverlapping(src as *const u8, addr, element.element_size());
        }
        return Ok(());
    }
    let raw = ingoing(rt, element, value, storage)?;
    raw.write(element.slot_type(), addr);
    Ok(())
}

/// Decode one array element at `addr`
///
/// # Safety
/// `addr` must be valid for reads of `element.element_size()` bytes.
pub(crate) unsafe fn read_element(rt: &Arc<Runtime>, element: &TypeDescriptor, addr: *const u8) -> Result<Value> {
    if element.is_inline_composite() {
        // Inline structs are viewed in place
        let info = interface_of(element)?;
        return Ok(rt.identity().direct_wrap(info, addr as *mut c_void).into());
    }
    let raw = FfiValue::read(element.slot_type(), addr);
    outgoing(rt, element, raw, None)
}

fn keep_array(array: Option<SizedArray>, storage: &mut Storage) -> *mut c_void {
    match array {
        Some(array) => {
            if let Some(owned) = array.storage() {
                storage.retain(owned);
            }
            array.as_ptr()
        }
        None => core::ptr::null_mut(),
    }
}

pub(crate) fn element_of(ty: &TypeDescriptor) -> Result<&Arc<TypeDescriptor>> {
    ty.param_type(0)
        .ok_or_else(|| MarshalError::invalid_argument(format!("{} type has no element type", ty.tag().name())))
}

fn key_value_of(ty: &TypeDescriptor) -> Result<(&Arc<TypeDescriptor>, &Arc<TypeDescriptor>)> {
    match (ty.param_type(0), ty.param_type(1)) {
        (Some(key), Some(value)) => Ok((key, value)),
        _ => Err(MarshalError::invalid_argument("hash type needs key and value types")),
    }
}

pub(crate) fn interface_of(ty: &TypeDescriptor) -> Result<&Arc<RegisteredType>> {
    ty.interface_info()
        .ok_or_else(|| MarshalError::invalid_argument(format!("{} type has no registered type", ty.tag().name())))
}

fn mismatch(value: &Value, tag: SpecializedTag) -> MarshalError {
    MarshalError::invalid_argument(format!("cannot convert {} to {}", value.type_name(), tag.name()))
}

/// Raw address carried by a pointer-like host value
pub(crate) fn pointer_of(value: &Value, tag: SpecializedTag) -> Result<*mut c_void> {
    match value {
        Value::Nil => Ok(core::ptr::null_mut()),
        Value::Pointer(p) => Ok(*p),
        Value::Instance(instance) => Ok(instance.as_ptr()),
        Value::Array(array) => Ok(array.as_ptr()),
        Value::ZeroTerminated(array) => Ok(array.as_ptr()),
        Value::ByteArray(bytes) => Ok(bytes.as_ptr()),
        other => Err(mismatch(other, tag)),
    }
}

#[inline]
pub(crate) fn pointer_value(ptr: *mut c_void) -> Value {
    if ptr.is_null() {
        Value::Nil
    } else {
        Value::Pointer(ptr)
    }
}

fn integer_bounds(kind: FfiType) -> (i128, i128) {
    match kind {
        FfiType::I8 => (i8::MIN as i128, i8::MAX as i128),
        FfiType::U8 => (0, u8::MAX as i128),
        FfiType::I16 => (i16::MIN as i128, i16::MAX as i128),
        FfiType::U16 => (0, u16::MAX as i128),
        FfiType::Boolean | FfiType::I32 => (i32::MIN as i128, i32::MAX as i128),
        FfiType::U32 | FfiType::Unichar => (0, u32::MAX as i128),
        FfiType::I64 => (i64::MIN as i128, i64::MAX as i128),
        FfiType::U64 | FfiType::GType => (0, u64::MAX as i128),
        FfiType::F32 | FfiType::F64 | FfiType::Pointer | FfiType::Void => (0, 0),
    }
}

fn integer_of(value: &Value, kind: FfiType) -> Result<i128> {
    match value {
        Value::Int(v) => Ok(*v as i128),
        Value::UInt(v) => Ok(*v as i128),
        Value::Bool(b) => Ok(*b as i128),
        Value::Enum(e) => Ok(e.value() as i128),
        // A one-character string is a code point
        Value::Str(s) if kind == FfiType::Unichar && s.chars().count() == 1 => {
            Ok(s.chars().next().map_or(0, |c| c as i128))
        }
        other => Err(mismatch(other, SpecializedTag::Scalar(kind))),
    }
}

/// Numeric pass-through with range checking for the declared width
pub(crate) fn scalar_ingoing(kind: FfiType, value: &Value) -> Result<FfiValue> {
    match kind {
        FfiType::Void => Ok(FfiValue::void()),
        FfiType::Pointer => pointer_of(value, SpecializedTag::Scalar(kind)).map(FfiValue::from_ptr),
        FfiType::F32 => value
            .as_f64()
            .map(|v| FfiValue { f32: v as f32 })
            .ok_or_else(|| mismatch(value, SpecializedTag::Scalar(kind))),
        FfiType::F64 => value
            .as_f64()
            .map(|v| FfiValue { f64: v })
            .ok_or_else(|| mismatch(value, SpecializedTag::Scalar(kind))),
        FfiType::Boolean => match value {
            Value::Nil => Ok(FfiValue { i32: 0 }),
            Value::Bool(b) => Ok(FfiValue { i32: *b as i32 }),
            Value::Int(v) => Ok(FfiValue { i32: (*v != 0) as i32 }),
            other => Err(mismatch(other, SpecializedTag::Scalar(kind))),
        },
        FfiType::I8
        | FfiType::U8
        | FfiType::I16
        | FfiType::U16
        | FfiType::I32
        | FfiType::U32
        | FfiType::I64
        | FfiType::U64
        | FfiType::GType
        | FfiType::Unichar => {
            let v = integer_of(value, kind)?;
            let (min, max) = integer_bounds(kind);
            if v < min || v > max {
                return Err(MarshalError::invalid_argument(format!(
                    "{} out of range for {}",
                    v,
                    kind.name()
                )));
            }
            Ok(FfiValue::from_int(kind, v as i64))
        }
    }
}

pub(crate) fn scalar_outgoing(kind: FfiType, raw: FfiValue) -> Value {
    unsafe {
        match kind {
            FfiType::Void => Value::Nil,
            FfiType::Boolean => Value::Bool(raw.i32 != 0),
            FfiType::I8
            | FfiType::U8
            | FfiType::I16
            | FfiType::U16
            | FfiType::I32
            | FfiType::U32
            | FfiType::I64
            | FfiType::Unichar => Value::Int(raw.as_i64(kind)),
            FfiType::U64 | FfiType::GType => Value::UInt(raw.u64),
            FfiType::F32 => Value::Float(raw.f32 as f64),
            FfiType::F64 => Value::Float(raw.f64),
            FfiType::Pointer => pointer_value(raw.ptr),
        }
    }
}

fn string_ingoing(value: &Value, storage: &mut Storage) -> Result<FfiValue> {
    match value {
        Value::Nil => Ok(FfiValue::null()),
        Value::Pointer(p) => Ok(FfiValue::from_ptr(*p)),
        Value::Str(s) | Value::Symbol(s) => {
            if s.contains('\0') {
                return Err(MarshalError::invalid_argument("string contains an interior nul byte"));
            }
            Ok(FfiValue::from_ptr(storage.string(s)))
        }
        other => Err(mismatch(other, SpecializedTag::Utf8)),
    }
}

/// Read a null-terminated string; null reads as nil
pub(crate) fn utf8_from_ptr(ptr: *mut c_void) -> Value {
    if ptr.is_null() {
        return Value::Nil;
    }
    let s = unsafe { CStr::from_ptr(ptr as *const _) };
    Value::Str(s.to_string_lossy().into_owned())
}

/// Integer for a symbolic enum/flags value
pub(crate) fn enum_ingoing(info: &Arc<RegisteredType>, value: &Value) -> Result<i32> {
    match value {
        Value::Symbol(name) | Value::Str(name) => info.value_of(name).ok_or_else(|| {
            MarshalError::invalid_argument(format!("{} has no member {}", info.full_name(), name))
        }),
        Value::Int(_) | Value::UInt(_) => {
            let v = integer_of(value, FfiType::U32)?;
            if v < i32::MIN as i128 || v > u32::MAX as i128 {
                return Err(MarshalError::invalid_argument(format!(
                    "{} out of range for {}",
                    v,
                    info.full_name()
                )));
            }
            Ok(cast_uint32_to_int32(v as i64))
        }
        Value::Enum(e) if e.type_info() == info => Ok(e.value()),
        // Flags combine a list of member names
        Value::List(items) if info.kind() == TypeKind::Flags => items
            .iter()
            .try_fold(0i32, |acc, item| Ok(acc | enum_ingoing(info, item)?)),
        other => Err(mismatch(
            other,
            match info.kind() {
                TypeKind::Flags => SpecializedTag::Flags,
                _ => SpecializedTag::Enum,
            },
        )),
    }
}

/// Pointer for an instance-like host value, checking its class
pub(crate) fn instance_ingoing(info: &Arc<RegisteredType>, value: &Value) -> Result<*mut c_void> {
    match value {
        Value::Nil => Ok(core::ptr::null_mut()),
        Value::Pointer(p) => Ok(*p),
        Value::Instance(instance) => {
            if instance.class().is_a(info) {
                Ok(instance.as_ptr())
            } else {
                Err(MarshalError::invalid_argument(format!(
                    "expected {}, got {}",
                    info.full_name(),
                    instance.class().full_name()
                )))
            }
        }
        other => Err(MarshalError::invalid_argument(format!(
            "expected {}, got {}",
            info.full_name(),
            other.type_name()
        ))),
    }
}
