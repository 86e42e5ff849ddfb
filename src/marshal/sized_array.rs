//! Arrays with a known element count
//!
//! A `SizedArray` is `(element type, count, pointer)`. Views over native
//! memory borrow it; arrays built from host sequences own their storage.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::fmt;
use std::sync::Arc;

use super::convert::{read_element, write_element};
use super::storage::Storage;
use super::Runtime;
use crate::error::{MarshalError, Result};
use crate::interop::FfiType;
use crate::introspection::{TypeDescriptor, TypeTag};
use crate::value::Value;

#[derive(Clone)]
pub struct SizedArray {
    element: Arc<TypeDescriptor>,
    len: usize,
    ptr: NonNull<u8>,
    storage: Option<Arc<Storage>>,
    runtime: Arc<Runtime>,
}

impl SizedArray {
    /// View over native memory; null yields `None`, never an empty view
    pub fn wrap(rt: &Arc<Runtime>, element: Arc<TypeDescriptor>, len: usize, ptr: *mut c_void) -> Option<Self> {
        let ptr = NonNull::new(ptr as *mut u8)?;
        Some(Self {
            element,
            len,
            ptr,
            storage: None,
            runtime: rt.clone(),
        })
    }

    /// Fresh zeroed storage for `len` elements
    pub fn allocate(rt: &Arc<Runtime>, element: Arc<TypeDescriptor>, len: usize) -> Self {
        let mut storage = rt.storage();
        let ptr = storage.alloc(len * element.element_size());
        Self {
            element,
            len,
            ptr,
            storage: Some(Arc::new(storage)),
            runtime: rt.clone(),
        }
    }

    /// Encode a host sequence contiguously into fresh storage
    pub fn from_values(rt: &Arc<Runtime>, element: Arc<TypeDescriptor>, values: &[Value]) -> Result<Self> {
        let size = element.element_size();
        let mut storage = rt.storage();
        let base = storage.alloc(size * values.len());

        for (i, value) in values.iter().enumerate() {
            unsafe { write_element(rt, &element, value, base.as_ptr().add(i * size), &mut storage)? };
        }

        Ok(Self {
            element,
            len: values.len(),
            ptr: base,
            storage: Some(Arc::new(storage)),
            runtime: rt.clone(),
        })
    }

    fn from_bytes(rt: &Arc<Runtime>, element: Arc<TypeDescriptor>, bytes: &[u8]) -> Self {
        let array = Self::allocate(rt, element, bytes.len());
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), array.ptr.as_ptr(), bytes.len()) };
        array
    }

    /// Convert a host value, enforcing a declared nonzero size
    ///
    /// An existing array is reused without copying.
    pub fn from(
        rt: &Arc<Runtime>,
        element: Arc<TypeDescriptor>,
        expected: Option<usize>,
        value: &Value,
    ) -> Result<Option<Self>> {
        match value {
            Value::Nil => Ok(None),
            Value::Pointer(ptr) => Ok(Self::wrap(rt, element, expected.unwrap_or(0), *ptr)),
            Value::Array(existing) => {
                check_size(expected, existing.len())?;
                Ok(Some(existing.clone()))
            }
            Value::List(items) | Value::Tuple(items) => {
                check_size(expected, items.len())?;
                Self::from_values(rt, element, items).map(Some)
            }
            Value::Str(s) if is_byte_element(&element) => {
                check_size(expected, s.len())?;
                Ok(Some(Self::from_bytes(rt, element, s.as_bytes())))
            }
            other => Err(MarshalError::invalid_argument(format!(
                "cannot convert {} to array of {}",
                other.type_name(),
                element.tag().name()
            ))),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn element_type(&self) -> &Arc<TypeDescriptor> {
        &self.element
    }

    #[inline]
    pub fn element_size(&self) -> usize {
        self.element.element_size()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.len * self.element_size()
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr() as *mut c_void
    }

    /// Whether the array owns its backing memory
    pub fn is_owned(&self) -> bool {
        self.storage.is_some()
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

    /// Decode the element at `index`
    pub fn get(&self, index: usize) -> Result<Value> {
        if index >= self.len {
            return Err(MarshalError::invalid_argument(format!(
                "index {} out of bounds for array of {}",
                index, self.len
            )));
        }
        let addr = unsafe { self.ptr.as_ptr().add(index * self.element_size()) };
        unsafe { read_element(&self.runtime, &self.element, addr) }
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Value>> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }

    pub fn to_vec(&self) -> Result<Vec<Value>> {
        self.iter().collect()
    }
}

fn is_byte_element(element: &TypeDescriptor) -> bool {
    matches!(element.tag(), TypeTag::Scalar(FfiType::U8 | FfiType::I8)) && !element.is_pointer()
}

fn check_size(expected: Option<usize>, got: usize) -> Result<()> {
    match expected {
        Some(expected) if expected > 0 && expected != got => Err(MarshalError::size_mismatch(expected, got)),
        _ => Ok(()),
    }
}

impl PartialEq for SizedArray {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len {
            return false;
        }
        match (self.to_vec(), other.to_vec()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for SizedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizedArray")
            .field("element", &self.element.tag().name())
            .field("len", &self.len)
            .field("ptr", &self.ptr)
            .field("owned", &self.is_owned())
            .finish()
    }
}
