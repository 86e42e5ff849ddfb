//! Introspection metadata
//!
//! Design:
//! - Descriptors are immutable and shared through `Arc`
//! - The database itself sits behind the [`Repository`] trait
//! - [`flatten_tag`] is the single entry point for classification; every
//!   conversion matches exhaustively on its result

mod callable;
mod classify;
mod registered;
mod repository;
mod type_info;

pub use callable::{ArgInfo, CallableInfo, Direction, Transfer};
pub use classify::{element_tag, element_type, flatten_tag, subtype_label, ElementType, SpecializedTag};
pub use registered::{cast_uint32_to_int32, EnumMember, RegisteredType, TypeKind};
pub use repository::{InMemoryRepository, Repository};
pub use type_info::{ArrayKind, TypeDescriptor, TypeTag};
