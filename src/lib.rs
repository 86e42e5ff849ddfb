//! gir-marshal - Type-directed marshaling for introspected native libraries
//!
//! Converts host values into the native argument slots a callable expects,
//! invokes it, and converts its results back. Type metadata comes from an
//! introspection repository; the engine itself never guesses a layout.

pub mod config;
pub mod error;
pub mod interop;
pub mod introspection;
pub mod logging;
pub mod marshal;
pub mod memory;
pub mod namespace;
pub mod object;
pub mod overrides;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

// Re-export core types
pub use config::{Config, MarshalConfig};
pub use error::{MarshalError, NativeError, Result};
pub use introspection::{
    ArgInfo, CallableInfo, Direction, RegisteredType, Repository, SpecializedTag, Transfer, TypeDescriptor,
};
pub use marshal::{CallFrame, Runtime, SizedArray, ZeroTerminated};
pub use namespace::{Function, Namespace};
pub use object::{Instance, Ownership};
pub use overrides::{ByteArray, PtrArray};
pub use value::{EnumValue, Value};

/// Initialize logging from the environment
pub fn init() {
    logging::init();
}

/// Initialize logging from a loaded configuration
pub fn init_with_config(config: &Config) {
    logging::init_with_config(config.logging.to_log_config());
}
