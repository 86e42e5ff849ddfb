//! Registered native types
//!
//! Descriptors for enums, flags, structs, unions, objects, interfaces and
//! callbacks, with the facts the engine needs: GType, instance size, the
//! parent chain, implemented interfaces, floating-reference behavior and enum
//! value tables.

use std::fmt;
use std::sync::Arc;

use crate::interop::FfiType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Enum,
    Flags,
    Struct,
    Union,
    Object,
    Interface,
    Callback,
}

impl TypeKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Enum => "enum",
            Self::Flags => "flags",
            Self::Struct => "struct",
            Self::Union => "union",
            Self::Object => "object",
            Self::Interface => "interface",
            Self::Callback => "callback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    pub value: i32,
}

/// Reduce a declared enum value to the native 32-bit representation
///
/// Values in `0x8000_0000..=0xFFFF_FFFF` wrap to negative `i32`s.
#[inline]
pub fn cast_uint32_to_int32(value: i64) -> i32 {
    value as u32 as i32
}

#[derive(Debug, Clone)]
pub struct RegisteredType {
    namespace: String,
    name: String,
    kind: TypeKind,
    gtype: usize,
    size: usize,
    parent: Option<Arc<RegisteredType>>,
    interfaces: Vec<Arc<RegisteredType>>,
    floating: bool,
    members: Vec<EnumMember>,
}

impl RegisteredType {
    pub fn new(kind: TypeKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
            gtype: 0,
            size: 0,
            parent: None,
            interfaces: Vec::new(),
            floating: false,
            members: Vec::new(),
        }
    }

    pub fn object(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(TypeKind::Object, namespace, name)
    }

    pub fn interface(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(TypeKind::Interface, namespace, name)
    }

    pub fn structure(namespace: impl Into<String>, name: impl Into<String>, size: usize) -> Self {
        Self::new(TypeKind::Struct, namespace, name).with_size(size)
    }

    pub fn union(namespace: impl Into<String>, name: impl Into<String>, size: usize) -> Self {
        Self::new(TypeKind::Union, namespace, name).with_size(size)
    }

    pub fn callback(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(TypeKind::Callback, namespace, name)
    }

    /// Enum with declared member values; see [`cast_uint32_to_int32`]
    pub fn enumeration(
        namespace: impl Into<String>,
        name: impl Into<String>,
        members: &[(&str, i64)],
    ) -> Self {
        Self::new(TypeKind::Enum, namespace, name).with_members(members)
    }

    pub fn flags(namespace: impl Into<String>, name: impl Into<String>, members: &[(&str, i64)]) -> Self {
        Self::new(TypeKind::Flags, namespace, name).with_members(members)
    }

    fn with_members(mut self, members: &[(&str, i64)]) -> Self {
        self.members = members
            .iter()
            .map(|&(name, value)| EnumMember {
                name: name.to_string(),
                value: cast_uint32_to_int32(value),
            })
            .collect();
        self
    }

    pub fn with_gtype(mut self, gtype: usize) -> Self {
        self.gtype = gtype;
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_parent(mut self, parent: Arc<RegisteredType>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_interface(mut self, iface: Arc<RegisteredType>) -> Self {
        self.interfaces.push(iface);
        self
    }

    /// Mark instances as starting with a floating reference
    pub fn with_floating(mut self, floating: bool) -> Self {
        self.floating = floating;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified name, e.g. `Regress::TestObj`
    pub fn full_name(&self) -> String {
        format!("{}::{}", self.namespace, self.name)
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn gtype(&self) -> usize {
        self.gtype
    }

    /// Instance size in bytes, for allocation and inline array elements
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn parent(&self) -> Option<&Arc<RegisteredType>> {
        self.parent.as_ref()
    }

    pub fn interfaces(&self) -> &[Arc<RegisteredType>] {
        &self.interfaces
    }

    /// Whether fresh instances carry a floating reference; inherited
    pub fn is_floating(&self) -> bool {
        self.floating || self.parent.as_ref().map_or(false, |p| p.is_floating())
    }

    /// Native storage of enum and flags values
    pub fn storage(&self) -> FfiType {
        FfiType::I32
    }

    pub fn members(&self) -> &[EnumMember] {
        &self.members
    }

    /// Integer bound to a member name
    pub fn value_of(&self, name: &str) -> Option<i32> {
        self.members.iter().find(|m| m.name == name).map(|m| m.value)
    }

    /// Member name bound to an integer
    pub fn name_of(&self, value: i32) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.value == value)
            .map(|m| m.name.as_str())
    }

    /// Subtype test over the parent chain and implemented interfaces
    pub fn is_a(&self, other: &RegisteredType) -> bool {
        if self == other {
            return true;
        }
        if self.interfaces.iter().any(|i| i.is_a(other)) {
            return true;
        }
        self.parent.as_ref().map_or(false, |p| p.is_a(other))
    }
}

impl PartialEq for RegisteredType {
    fn eq(&self, other: &Self) -> bool {
        self.gtype == other.gtype && self.namespace == other.namespace && self.name == other.name
    }
}

impl Eq for RegisteredType {}

impl fmt::Display for RegisteredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.namespace, self.name)
    }
}
