//! Host-side values
//!
//! The dynamic value model callers hand to the engine and receive back.
//! Native-backed values (instances, array views, byte arrays) keep their
//! backing storage alive for as long as any clone exists.

use core::ffi::c_void;
use std::sync::Arc;

use crate::introspection::RegisteredType;
use crate::marshal::{SizedArray, ZeroTerminated};
use crate::object::Instance;
use crate::overrides::ByteArray;

/// Symbolic enum or flags value
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    ty: Arc<RegisteredType>,
    value: i32,
}

impl EnumValue {
    pub fn new(ty: Arc<RegisteredType>, value: i32) -> Self {
        Self { ty, value }
    }

    #[inline]
    pub fn value(&self) -> i32 {
        self.value
    }

    /// Member name, if the value is a declared member
    pub fn name(&self) -> Option<&str> {
        self.ty.name_of(self.value)
    }

    pub fn type_info(&self) -> &Arc<RegisteredType> {
        &self.ty
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    /// Symbolic name, e.g. an enum member
    Symbol(String),
    Pointer(*mut c_void),
    Enum(EnumValue),
    Instance(Instance),
    Array(SizedArray),
    ZeroTerminated(ZeroTerminated),
    ByteArray(ByteArray),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    /// Multiple results of one call
    Tuple(Vec<Value>),
}

impl Value {
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    /// Short kind name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Pointer(_) => "pointer",
            Self::Enum(_) => "enum",
            Self::Instance(_) => "instance",
            Self::Array(_) => "sized array",
            Self::ZeroTerminated(_) => "zero-terminated array",
            Self::ByteArray(_) => "byte array",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Tuple(_) => "tuple",
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            Self::Bool(b) => Some(*b as i64),
            Self::Enum(e) => Some(e.value() as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String or symbol contents
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Instance(i) => Some(i),
            _ => None,
        }
    }

    /// Element count of a sequence-like value
    pub fn sequence_len(&self) -> Option<usize> {
        match self {
            Self::List(items) | Self::Tuple(items) => Some(items.len()),
            Self::Array(array) => Some(array.len()),
            Self::ZeroTerminated(array) => array.len().ok(),
            Self::ByteArray(bytes) => Some(bytes.len()),
            Self::Str(s) => Some(s.len()),
            _ => None,
        }
    }

    /// Items of a multi-result call; a single result is a one-item slice
    pub fn into_results(self) -> Vec<Value> {
        match self {
            Self::Tuple(items) => items,
            Self::Nil => Vec::new(),
            other => vec![other],
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Nil
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Instance> for Value {
    fn from(v: Instance) -> Self {
        Self::Instance(v)
    }
}

impl From<SizedArray> for Value {
    fn from(v: SizedArray) -> Self {
        Self::Array(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Nil, Into::into)
    }
}
