//! Collection overrides
//!
//! First-class host values for native collections with their own ABI shape.

mod byte_array;
mod ptr_array;

pub use byte_array::ByteArray;
pub use ptr_array::PtrArray;
