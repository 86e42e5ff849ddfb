//! Marshaling engine
//!
//! Design:
//! - Every conversion matches exhaustively on `SpecializedTag`
//! - Argument builders describe their work as `PreStep`/`PostStep` plans,
//!   computed once per callable and interpreted per call
//! - Length-paired arrays refer to their length argument by index
//! - Per-call allocations live in a `Storage` dropped when the call returns;
//!   values built from host sequences own their storage
//!
//! Architecture:
//! - `convert.rs` - ingoing/outgoing conversion tables
//! - `sized_array.rs` - length-known array views
//! - `zero_terminated.rs` - sentinel-terminated array views
//! - `containers.rs` - GList, GSList and GHashTable marshaling
//! - `argument.rs` - argument builders
//! - `frame.rs` - call frames and execution

mod argument;
mod containers;
mod convert;
mod frame;
mod sized_array;
mod storage;
mod zero_terminated;

pub use argument::{
    ErrorArgument, InstanceArgument, PostAction, PostStep, PreStep, RegularArgument, ReturnValue, Slot,
};
pub use frame::CallFrame;
pub use sized_array::SizedArray;
pub use storage::Storage;
pub use zero_terminated::ZeroTerminated;

pub(crate) use convert::{ingoing, outgoing};

use std::sync::Arc;

use crate::config::MarshalConfig;
use crate::object::{NativeRuntime, ObjectIdentity, TypeRegistry};

/// Shared marshaling context
pub struct Runtime {
    identity: ObjectIdentity,
    config: MarshalConfig,
}

impl Runtime {
    pub fn new(registry: Arc<dyn TypeRegistry>, native: Arc<dyn NativeRuntime>) -> Arc<Self> {
        Self::with_config(registry, native, MarshalConfig::default())
    }

    pub fn with_config(
        registry: Arc<dyn TypeRegistry>,
        native: Arc<dyn NativeRuntime>,
        config: MarshalConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity: ObjectIdentity::new(registry, native),
            config,
        })
    }

    #[inline]
    pub fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }

    #[inline]
    pub fn native(&self) -> &Arc<dyn NativeRuntime> {
        self.identity.native()
    }

    #[inline]
    pub fn config(&self) -> &MarshalConfig {
        &self.config
    }

    /// Empty storage bound to this runtime's native primitives
    pub fn storage(&self) -> Storage {
        Storage::new(self.native().clone())
    }
}

#[cfg(test)]
mod tests;
