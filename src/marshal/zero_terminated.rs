//! Sentinel-terminated arrays
//!
//! The element count is found by scanning for an all-zero element. Element
//! types without a reliable zero sentinel (floats, inline composites) are
//! rejected unless validation is switched off in the configuration.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::fmt;
use std::sync::Arc;

use super::convert::{read_element, write_element};
use super::storage::Storage;
use super::Runtime;
use crate::error::{MarshalError, Result};
use crate::introspection::TypeDescriptor;
use crate::value::Value;

#[derive(Clone)]
pub struct ZeroTerminated {
    element: Arc<TypeDescriptor>,
    ptr: NonNull<u8>,
    storage: Option<Arc<Storage>>,
    runtime: Arc<Runtime>,
}

impl ZeroTerminated {
    fn validate(rt: &Runtime, element: &TypeDescriptor) -> Result<()> {
        if !rt.config().validate_zero_terminated {
            return Ok(());
        }
        if element.slot_type().is_float() || element.is_inline_composite() || element.element_size() == 0 {
            return Err(MarshalError::invalid_argument(format!(
                "zero-terminated array of {} has no reliable terminator",
                element.tag().name()
            )));
        }
        Ok(())
    }

    /// View over native memory; null yields `None`
    pub fn wrap(rt: &Arc<Runtime>, element: Arc<TypeDescriptor>, ptr: *mut c_void) -> Result<Option<Self>> {
        let Some(ptr) = NonNull::new(ptr as *mut u8) else {
            return Ok(None);
        };
        Self::validate(rt, &element)?;
        Ok(Some(Self {
            element,
            ptr,
            storage: None,
            runtime: rt.clone(),
        }))
    }

    /// Encode a host sequence followed by a zero element
    pub fn from_values(rt: &Arc<Runtime>, element: Arc<TypeDescriptor>, values: &[Value]) -> Result<Self> {
        Self::validate(rt, &element)?;
        if values.iter().any(Value::is_nil) {
            return Err(MarshalError::invalid_argument(
                "zero-terminated array cannot hold nil elements",
            ));
        }

        let size = element.element_size();
        let mut storage = rt.storage();
        let base = storage.alloc(size * (values.len() + 1));

        for (i, value) in values.iter().enumerate() {
            unsafe { write_element(rt, &element, value, base.as_ptr().add(i * size), &mut storage)? };
        }

        Ok(Self {
            element,
            ptr: base,
            storage: Some(Arc::new(storage)),
            runtime: rt.clone(),
        })
    }

    pub fn from(rt: &Arc<Runtime>, element: Arc<TypeDescriptor>, value: &Value) -> Result<Option<Self>> {
        match value {
            Value::Nil => Ok(None),
            Value::Pointer(ptr) => Self::wrap(rt, element, *ptr),
            Value::ZeroTerminated(existing) => Ok(Some(existing.clone())),
            Value::List(items) | Value::Tuple(items) => Self::from_values(rt, element, items).map(Some),
            Value::Array(array) => Self::from_values(rt, element, &array.to_vec()?).map(Some),
            other => Err(MarshalError::invalid_argument(format!(
                "cannot convert {} to zero-terminated array",
                other.type_name()
            ))),
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr() as *mut c_void
    }

    pub fn element_type(&self) -> &Arc<TypeDescriptor> {
        &self.element
    }

    pub(crate) fn storage(&self) -> Option<&Arc<Storage>> {
        self.storage.as_ref()
    }

    /// Keep `storage` alive with this view when the view points into it
    pub(crate) fn keep_alive(&mut self, storage: &Arc<Storage>) {
        if self.storage.is_none() && storage.contains(self.as_ptr()) {
            self.storage = Some(storage.clone());
        }
    }

    fn slot(&self, index: usize) -> *const u8 {
        unsafe { self.ptr.as_ptr().add(index * self.element.element_size()) }
    }

    fn is_terminator(&self, index: usize) -> bool {
        let bytes = unsafe { core::slice::from_raw_parts(self.slot(index), self.element.element_size()) };
        bytes.iter().all(|&b| b == 0)
    }

    /// Elements before the terminator
    ///
    /// A scan that passes the configured limit without finding the
    /// terminator is an error.
    pub fn len(&self) -> Result<usize> {
        if self.element.element_size() == 0 {
            return Ok(0);
        }
        let limit = self.runtime.config().max_zero_terminated;
        (0..=limit).find(|&i| self.is_terminator(i)).ok_or_else(|| {
            MarshalError::invalid_argument(format!(
                "no terminator within {} elements of zero-terminated array",
                limit
            ))
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> Result<Value> {
        let len = self.len()?;
        if index >= len {
            return Err(MarshalError::invalid_argument(format!(
                "index {} out of bounds for array of {}",
                index, len
            )));
        }
        unsafe { read_element(&self.runtime, &self.element, self.slot(index)) }
    }

    pub fn iter(&self) -> Result<impl Iterator<Item = Result<Value>> + '_> {
        let len = self.len()?;
        Ok((0..len).map(move |i| unsafe { read_element(&self.runtime, &self.element, self.slot(i)) }))
    }

    pub fn to_vec(&self) -> Result<Vec<Value>> {
        self.iter()?.collect()
    }
}

impl PartialEq for ZeroTerminated {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_vec(), other.to_vec()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for ZeroTerminated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZeroTerminated")
            .field("element", &self.element.tag().name())
            .field("ptr", &self.ptr)
            .field("owned", &self.storage.is_some())
            .finish()
    }
}
