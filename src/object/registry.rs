//! Runtime type lookup for polymorphic wrapping

use core::ffi::c_void;
use core::ptr::NonNull;
use std::sync::Arc;

use dashmap::DashMap;

use crate::introspection::RegisteredType;

/// Maps a live native instance to the class of its runtime type
pub trait TypeRegistry: Send + Sync {
    /// Concrete class for `ptr`, or `None` to keep the requested class
    fn resolve(&self, ptr: NonNull<c_void>, requested: &Arc<RegisteredType>) -> Option<Arc<RegisteredType>>;
}

/// GType-keyed class table
///
/// Reads the runtime GType from the instance header: an instance starts
/// with a pointer to its class struct, which starts with the GType.
#[derive(Default)]
pub struct ClassRegistry {
    classes: DashMap<usize, Arc<RegisteredType>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, class: Arc<RegisteredType>) {
        self.classes.insert(class.gtype(), class);
    }

    pub fn lookup(&self, gtype: usize) -> Option<Arc<RegisteredType>> {
        self.classes.get(&gtype).map(|c| c.value().clone())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// GType stored in a `GTypeInstance` header
    ///
    /// # Safety
    /// `ptr` must point to a live `GTypeInstance`.
    pub unsafe fn instance_gtype(ptr: NonNull<c_void>) -> Option<usize> {
        let class = (ptr.as_ptr() as *const *const usize).read_unaligned();
        if class.is_null() {
            return None;
        }
        Some(class.read_unaligned())
    }
}

impl TypeRegistry for ClassRegistry {
    fn resolve(&self, ptr: NonNull<c_void>, requested: &Arc<RegisteredType>) -> Option<Arc<RegisteredType>> {
        let gtype = unsafe { Self::instance_gtype(ptr)? };
        if gtype == requested.gtype() {
            return None;
        }
        // Unknown or unrelated runtime types keep the static class
        self.lookup(gtype).filter(|class| class.is_a(requested))
    }
}
