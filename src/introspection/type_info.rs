//! Type descriptors
//!
//! Immutable views over introspected type metadata. A descriptor is built
//! once per distinct native type and shared through `Arc`.

use std::sync::Arc;

use super::registered::{RegisteredType, TypeKind};
use crate::interop::FfiType;

/// Base tag of a descriptor, before specialization
#[derive(Debug, Clone, PartialEq)]
pub enum TypeTag {
    Void,
    Scalar(FfiType),
    Utf8,
    Filename,
    /// Enum, flags, struct, union, object, interface or callback
    Interface(Arc<RegisteredType>),
    Array,
    GList,
    GSList,
    GHash,
}

impl TypeTag {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Scalar(ty) => ty.name(),
            Self::Utf8 => "utf8",
            Self::Filename => "filename",
            Self::Interface(info) => info.kind().name(),
            Self::Array => "array",
            Self::GList => "glist",
            Self::GSList => "gslist",
            Self::GHash => "ghash",
        }
    }
}

/// Native representation of an array type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayKind {
    /// Plain C array: fixed, zero-terminated or length-paired
    #[default]
    C,
    /// `GByteArray`
    ByteArray,
    /// `GPtrArray`
    PtrArray,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    tag: TypeTag,
    pointer: bool,
    fixed_size: Option<usize>,
    zero_terminated: bool,
    array_kind: ArrayKind,
    params: Vec<Arc<TypeDescriptor>>,
}

impl TypeDescriptor {
    fn with_tag(tag: TypeTag, pointer: bool) -> Self {
        Self {
            tag,
            pointer,
            fixed_size: None,
            zero_terminated: false,
            array_kind: ArrayKind::C,
            params: Vec::new(),
        }
    }

    pub fn void() -> Self {
        Self::with_tag(TypeTag::Void, false)
    }

    /// `gpointer`: void with pointer flavor
    pub fn gpointer() -> Self {
        Self::with_tag(TypeTag::Void, true)
    }

    pub fn scalar(ty: FfiType) -> Self {
        Self::with_tag(TypeTag::Scalar(ty), ty == FfiType::Pointer)
    }

    pub fn utf8() -> Self {
        Self::with_tag(TypeTag::Utf8, true)
    }

    pub fn filename() -> Self {
        Self::with_tag(TypeTag::Filename, true)
    }

    /// Registered type; composites are passed by pointer, enums by value
    pub fn interface(info: Arc<RegisteredType>) -> Self {
        let pointer = !matches!(info.kind(), TypeKind::Enum | TypeKind::Flags);
        Self::with_tag(TypeTag::Interface(info), pointer)
    }

    fn array(element: TypeDescriptor) -> Self {
        let mut ty = Self::with_tag(TypeTag::Array, true);
        ty.params.push(Arc::new(element));
        ty
    }

    /// C array whose element count travels in a separate argument
    pub fn length_array(element: TypeDescriptor) -> Self {
        Self::array(element)
    }

    /// C array with a declared fixed length
    pub fn fixed_array(element: TypeDescriptor, size: usize) -> Self {
        let mut ty = Self::array(element);
        ty.fixed_size = Some(size);
        ty
    }

    /// C array terminated by a null/zero element
    pub fn zero_terminated_array(element: TypeDescriptor) -> Self {
        let mut ty = Self::array(element);
        ty.zero_terminated = true;
        ty
    }

    /// Null-terminated array of strings
    pub fn strv() -> Self {
        Self::zero_terminated_array(Self::utf8())
    }

    pub fn byte_array() -> Self {
        let mut ty = Self::array(Self::scalar(FfiType::U8));
        ty.array_kind = ArrayKind::ByteArray;
        ty
    }

    pub fn ptr_array(element: TypeDescriptor) -> Self {
        let mut ty = Self::array(element);
        ty.array_kind = ArrayKind::PtrArray;
        ty
    }

    pub fn glist(element: TypeDescriptor) -> Self {
        let mut ty = Self::with_tag(TypeTag::GList, true);
        ty.params.push(Arc::new(element));
        ty
    }

    pub fn gslist(element: TypeDescriptor) -> Self {
        let mut ty = Self::with_tag(TypeTag::GSList, true);
        ty.params.push(Arc::new(element));
        ty
    }

    pub fn ghash(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        let mut ty = Self::with_tag(TypeTag::GHash, true);
        ty.params.push(Arc::new(key));
        ty.params.push(Arc::new(value));
        ty
    }

    /// Override pointer flavor, e.g. for a struct embedded by value
    pub fn with_pointer(mut self, pointer: bool) -> Self {
        self.pointer = pointer;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    #[inline]
    pub fn tag(&self) -> &TypeTag {
        &self.tag
    }

    #[inline]
    pub fn is_pointer(&self) -> bool {
        self.pointer
    }

    /// Declared fixed length; only arrays carry one
    #[inline]
    pub fn array_fixed_size(&self) -> Option<usize> {
        self.fixed_size
    }

    #[inline]
    pub fn is_zero_terminated(&self) -> bool {
        self.zero_terminated
    }

    #[inline]
    pub fn array_kind(&self) -> ArrayKind {
        self.array_kind
    }

    /// Element, key or value subtype
    #[inline]
    pub fn param_type(&self, index: usize) -> Option<&Arc<TypeDescriptor>> {
        self.params.get(index)
    }

    pub fn interface_info(&self) -> Option<&Arc<RegisteredType>> {
        match &self.tag {
            TypeTag::Interface(info) => Some(info),
            _ => None,
        }
    }

    /// Native slot used when a value of this type is passed or returned
    pub fn slot_type(&self) -> FfiType {
        match &self.tag {
            TypeTag::Void if !self.pointer => FfiType::Void,
            TypeTag::Scalar(ty) if !self.pointer => *ty,
            TypeTag::Interface(info) if !self.pointer => match info.kind() {
                TypeKind::Enum | TypeKind::Flags => info.storage(),
                _ => FfiType::Pointer,
            },
            _ => FfiType::Pointer,
        }
    }

    /// Bytes one element of this type occupies inside an array
    pub fn element_size(&self) -> usize {
        match &self.tag {
            TypeTag::Interface(info)
                if !self.pointer && matches!(info.kind(), TypeKind::Struct | TypeKind::Union) =>
            {
                info.size()
            }
            _ => self.slot_type().size(),
        }
    }

    /// Whether elements are stored inline rather than as pointers
    pub fn is_inline_composite(&self) -> bool {
        matches!(&self.tag, TypeTag::Interface(info)
            if !self.pointer && matches!(info.kind(), TypeKind::Struct | TypeKind::Union))
    }
}
