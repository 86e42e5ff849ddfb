//! Object identity and wrapping
//!
//! Design:
//! - A null pointer never becomes an instance
//! - Plain wraps are borrowed views; only `allocate` and adopting
//!   construction produce owned instances
//! - Adopting construction is the single Borrowed -> Owned transition and
//!   runs at most once per live native instance (tracked by address)

mod instance;
mod native;
mod registry;

pub use instance::{Instance, Ownership};
pub use native::{GLibRuntime, NativeRuntime};
pub use registry::{ClassRegistry, TypeRegistry};

use core::ffi::c_void;
use core::ptr::NonNull;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{MarshalError, Result};
use crate::introspection::{RegisteredType, TypeKind};
use crate::logging::{log_claim, warn};
use crate::memory::NativeBuffer;
use instance::Claim;

/// Pointer-to-instance policies shared by every call
pub struct ObjectIdentity {
    registry: Arc<dyn TypeRegistry>,
    native: Arc<dyn NativeRuntime>,
    claims: Arc<DashMap<usize, ()>>,
}

impl ObjectIdentity {
    pub fn new(registry: Arc<dyn TypeRegistry>, native: Arc<dyn NativeRuntime>) -> Self {
        Self {
            registry,
            native,
            claims: Arc::new(DashMap::new()),
        }
    }

    /// Wrap as exactly `class`
    pub fn direct_wrap(&self, class: &Arc<RegisteredType>, ptr: *mut c_void) -> Option<Instance> {
        let ptr = NonNull::new(ptr)?;
        Some(Instance::borrowed(class.clone(), ptr))
    }

    /// Wrap as the runtime subtype of `class` for object-like kinds
    pub fn wrap(&self, class: &Arc<RegisteredType>, ptr: *mut c_void) -> Option<Instance> {
        let ptr = NonNull::new(ptr)?;
        let class = match class.kind() {
            TypeKind::Object | TypeKind::Interface => self
                .registry
                .resolve(ptr, class)
                .unwrap_or_else(|| class.clone()),
            _ => class.clone(),
        };
        Some(Instance::borrowed(class, ptr))
    }

    /// Fresh zero-initialized storage owned by the returned instance
    pub fn allocate(&self, class: &Arc<RegisteredType>) -> Instance {
        Instance::allocated(class.clone(), NativeBuffer::zeroed(class.size()))
    }

    /// Wrap a constructor result, claiming a floating reference
    pub fn constructor_wrap(&self, class: &Arc<RegisteredType>, ptr: *mut c_void) -> Result<Option<Instance>> {
        let Some(instance) = self.wrap(class, ptr) else {
            return Ok(None);
        };
        if !instance.class().is_floating() {
            return Ok(Some(instance));
        }

        let address = ptr as usize;
        match self.claims.entry(address) {
            Entry::Occupied(_) => {
                warn!(address, class = %instance.class(), "floating reference claimed twice");
                return Err(MarshalError::DoubleClaim { address });
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        if let Err(e) = self.native.ref_sink(ptr) {
            self.claims.remove(&address);
            return Err(e);
        }
        log_claim(address, true);

        let claim = Claim::new(address, self.native.clone(), self.claims.clone());
        Ok(Some(instance.into_claimed(claim)))
    }

    /// Whether a live wrapper holds the claim on `ptr`
    pub fn is_claimed(&self, ptr: *mut c_void) -> bool {
        self.claims.contains_key(&(ptr as usize))
    }

    pub fn native(&self) -> &Arc<dyn NativeRuntime> {
        &self.native
    }
}
