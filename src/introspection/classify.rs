//! Type classifier
//!
//! Reduces a [`TypeDescriptor`] to the single [`SpecializedTag`] every
//! conversion switches on. Array descriptors split into fixed, zero-terminated,
//! string-vector and length-paired shapes; everything else keeps its base tag.

use super::registered::TypeKind;
use super::type_info::{ArrayKind, TypeDescriptor, TypeTag};
use crate::interop::FfiType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecializedTag {
    Void,
    Scalar(FfiType),
    Utf8,
    Filename,
    Enum,
    Flags,
    Struct,
    Union,
    Object,
    Interface,
    Callback,
    /// Fixed-length inline array
    CArray,
    /// Length-paired array
    Array,
    ZeroTerminated,
    Strv,
    GList,
    GSList,
    GHash,
    ByteArray,
    PtrArray,
    /// Untyped pointer element
    GPointer,
}

impl SpecializedTag {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Scalar(ty) => ty.name(),
            Self::Utf8 => "utf8",
            Self::Filename => "filename",
            Self::Enum => "enum",
            Self::Flags => "flags",
            Self::Struct => "struct",
            Self::Union => "union",
            Self::Object => "object",
            Self::Interface => "interface",
            Self::Callback => "callback",
            Self::CArray => "c",
            Self::Array => "array",
            Self::ZeroTerminated => "zero_terminated",
            Self::Strv => "strv",
            Self::GList => "glist",
            Self::GSList => "gslist",
            Self::GHash => "ghash",
            Self::ByteArray => "byte_array",
            Self::PtrArray => "ptr_array",
            Self::GPointer => "gpointer",
        }
    }

    /// Whether outgoing values go through a wrapping conversion
    pub const fn needs_wrapping(self) -> bool {
        match self {
            Self::Enum
            | Self::Flags
            | Self::Struct
            | Self::Union
            | Self::Object
            | Self::Interface
            | Self::Array
            | Self::ZeroTerminated
            | Self::Strv
            | Self::GList
            | Self::GSList
            | Self::GHash
            | Self::ByteArray
            | Self::PtrArray => true,
            Self::Void
            | Self::Scalar(_)
            | Self::Utf8
            | Self::Filename
            | Self::Callback
            | Self::CArray
            | Self::GPointer => false,
        }
    }

    /// Object-like kinds resolved through the type registry
    #[inline]
    pub const fn is_polymorphic(self) -> bool {
        matches!(self, Self::Object | Self::Interface)
    }
}

/// Element (or key/value) tags of a container type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Single(SpecializedTag),
    Pair(SpecializedTag, SpecializedTag),
}

/// Compute the specialized tag of a descriptor
pub fn flatten_tag(ty: &TypeDescriptor) -> SpecializedTag {
    match ty.tag() {
        TypeTag::Void => SpecializedTag::Void,
        TypeTag::Scalar(kind) => SpecializedTag::Scalar(*kind),
        TypeTag::Utf8 => SpecializedTag::Utf8,
        TypeTag::Filename => SpecializedTag::Filename,
        TypeTag::Interface(info) => match info.kind() {
            TypeKind::Enum => SpecializedTag::Enum,
            TypeKind::Flags => SpecializedTag::Flags,
            TypeKind::Struct => SpecializedTag::Struct,
            TypeKind::Union => SpecializedTag::Union,
            TypeKind::Object => SpecializedTag::Object,
            TypeKind::Interface => SpecializedTag::Interface,
            TypeKind::Callback => SpecializedTag::Callback,
        },
        TypeTag::Array => flatten_array(ty),
        TypeTag::GList => SpecializedTag::GList,
        TypeTag::GSList => SpecializedTag::GSList,
        TypeTag::GHash => SpecializedTag::GHash,
    }
}

fn flatten_array(ty: &TypeDescriptor) -> SpecializedTag {
    match ty.array_kind() {
        ArrayKind::ByteArray => SpecializedTag::ByteArray,
        ArrayKind::PtrArray => SpecializedTag::PtrArray,
        ArrayKind::C => {
            if ty.array_fixed_size().is_some() {
                SpecializedTag::CArray
            } else if ty.is_zero_terminated() {
                let stringy = ty
                    .param_type(0)
                    .map_or(false, |e| matches!(e.tag(), TypeTag::Utf8 | TypeTag::Filename));
                if stringy {
                    SpecializedTag::Strv
                } else {
                    SpecializedTag::ZeroTerminated
                }
            } else {
                SpecializedTag::Array
            }
        }
    }
}

/// Tag of a container element; pointer-flavored void reads as `GPointer`
pub fn element_tag(ty: &TypeDescriptor) -> SpecializedTag {
    match ty.tag() {
        TypeTag::Void if ty.is_pointer() => SpecializedTag::GPointer,
        _ => flatten_tag(ty),
    }
}

/// Element tags of arrays and lists, key/value tags of hashes
pub fn element_type(ty: &TypeDescriptor) -> Option<ElementType> {
    match ty.tag() {
        TypeTag::Array | TypeTag::GList | TypeTag::GSList => ty
            .param_type(0)
            .map(|e| ElementType::Single(element_tag(e))),
        TypeTag::GHash => {
            let key = ty.param_type(0)?;
            let value = ty.param_type(1)?;
            Some(ElementType::Pair(element_tag(key), element_tag(value)))
        }
        _ => None,
    }
}

/// Label naming a container's element type
pub fn subtype_label(ty: &TypeDescriptor) -> String {
    match ty.param_type(0) {
        Some(element) => label_of(element),
        None => "void".to_string(),
    }
}

fn label_of(ty: &TypeDescriptor) -> String {
    match ty.tag() {
        TypeTag::Interface(info) => info.full_name(),
        TypeTag::Utf8 | TypeTag::Filename => ty.tag().name().to_string(),
        TypeTag::Scalar(kind) if ty.is_pointer() && *kind != FfiType::Pointer => {
            format!("pointer<{}>", kind.name())
        }
        tag => tag.name().to_string(),
    }
}
