//! Wrapper instances
//!
//! An [`Instance`] pairs a native pointer with the class it is viewed as.
//! Backing decides what, if anything, the wrapper releases on drop.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use super::NativeRuntime;
use crate::introspection::RegisteredType;
use crate::logging::{log_claim, warn};
use crate::memory::NativeBuffer;

/// Ownership state of the wrapped reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Non-owning view over externally owned memory
    Borrowed,
    /// The wrapper holds a reference or allocation it releases
    Owned,
}

/// Claimed native reference, released when the last wrapper drops
pub(crate) struct Claim {
    address: usize,
    native: Arc<dyn NativeRuntime>,
    claims: Arc<DashMap<usize, ()>>,
}

impl Claim {
    pub(crate) fn new(
        address: usize,
        native: Arc<dyn NativeRuntime>,
        claims: Arc<DashMap<usize, ()>>,
    ) -> Self {
        Self {
            address,
            native,
            claims,
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.claims.remove(&self.address);
        if let Err(e) = self.native.unref(self.address as *mut c_void) {
            warn!(address = self.address, error = %e, "failed to release claimed reference");
        }
        log_claim(self.address, false);
    }
}

#[derive(Clone)]
enum Backing {
    Borrowed,
    Allocated(Arc<NativeBuffer>),
    Claimed(Arc<Claim>),
}

#[derive(Clone)]
pub struct Instance {
    class: Arc<RegisteredType>,
    ptr: NonNull<c_void>,
    backing: Backing,
}

impl Instance {
    pub(crate) fn borrowed(class: Arc<RegisteredType>, ptr: NonNull<c_void>) -> Self {
        Self {
            class,
            ptr,
            backing: Backing::Borrowed,
        }
    }

    pub(crate) fn allocated(class: Arc<RegisteredType>, buffer: NativeBuffer) -> Self {
        Self {
            class,
            ptr: buffer.as_non_null(),
            backing: Backing::Allocated(Arc::new(buffer)),
        }
    }

    pub(crate) fn into_claimed(self, claim: Claim) -> Self {
        Self {
            backing: Backing::Claimed(Arc::new(claim)),
            ..self
        }
    }

    #[inline]
    pub fn class(&self) -> &Arc<RegisteredType> {
        &self.class
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    pub fn ownership(&self) -> Ownership {
        match self.backing {
            Backing::Borrowed => Ownership::Borrowed,
            Backing::Allocated(_) | Backing::Claimed(_) => Ownership::Owned,
        }
    }

    /// View the same pointer as another class
    pub fn cast(&self, class: Arc<RegisteredType>) -> Self {
        Self {
            class,
            ptr: self.ptr,
            backing: self.backing.clone(),
        }
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.class == other.class
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.full_name())
            .field("ptr", &self.ptr)
            .field("ownership", &self.ownership())
            .finish()
    }
}
