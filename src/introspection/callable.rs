//! Callable signatures
//!
//! Parameter lists with direction, type and length back-references, as read
//! from the introspection database.

use std::sync::Arc;

use super::registered::RegisteredType;
use super::type_info::TypeDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
}

/// Ownership handed to the receiver of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transfer {
    #[default]
    Nothing,
    Container,
    Everything,
}

#[derive(Debug, Clone)]
pub struct ArgInfo {
    pub name: String,
    pub direction: Direction,
    pub ty: Arc<TypeDescriptor>,
    /// Caller provides storage for an out composite
    pub caller_allocates: bool,
    /// Index of the argument carrying this array's length
    pub array_length: Option<usize>,
    pub transfer: Transfer,
}

impl ArgInfo {
    pub fn new(name: impl Into<String>, direction: Direction, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            direction,
            ty: Arc::new(ty),
            caller_allocates: false,
            array_length: None,
            transfer: Transfer::Nothing,
        }
    }

    pub fn input(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self::new(name, Direction::In, ty)
    }

    pub fn output(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self::new(name, Direction::Out, ty)
    }

    pub fn inout(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self::new(name, Direction::InOut, ty)
    }

    pub fn caller_allocates(mut self) -> Self {
        self.caller_allocates = true;
        self
    }

    pub fn with_length(mut self, index: usize) -> Self {
        self.array_length = Some(index);
        self
    }

    pub fn with_transfer(mut self, transfer: Transfer) -> Self {
        self.transfer = transfer;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CallableInfo {
    pub namespace: String,
    pub name: String,
    /// Exported native symbol
    pub symbol: String,
    pub args: Vec<ArgInfo>,
    pub return_type: Arc<TypeDescriptor>,
    pub return_transfer: Transfer,
    /// Index of the argument carrying a returned array's length
    pub return_array_length: Option<usize>,
    /// Reports failures through a trailing error out-parameter
    pub throws: bool,
    pub constructor: bool,
    /// Receiver type for instance methods
    pub receiver: Option<Arc<RegisteredType>>,
}

impl CallableInfo {
    pub fn function(
        namespace: impl Into<String>,
        name: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            symbol: symbol.into(),
            args: Vec::new(),
            return_type: Arc::new(TypeDescriptor::void()),
            return_transfer: Transfer::Nothing,
            return_array_length: None,
            throws: false,
            constructor: false,
            receiver: None,
        }
    }

    /// Instance method on `receiver`
    pub fn method(
        receiver: Arc<RegisteredType>,
        name: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Self {
        let mut info = Self::function(receiver.namespace().to_string(), name, symbol);
        info.receiver = Some(receiver);
        info
    }

    pub fn arg(mut self, arg: ArgInfo) -> Self {
        self.args.push(arg);
        self
    }

    pub fn returns(mut self, ty: TypeDescriptor) -> Self {
        self.return_type = Arc::new(ty);
        self
    }

    pub fn return_transfer(mut self, transfer: Transfer) -> Self {
        self.return_transfer = transfer;
        self
    }

    pub fn return_length(mut self, index: usize) -> Self {
        self.return_array_length = Some(index);
        self
    }

    pub fn throws(mut self) -> Self {
        self.throws = true;
        self
    }

    pub fn constructor(mut self) -> Self {
        self.constructor = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Qualified name for diagnostics
    pub fn full_name(&self) -> String {
        match &self.receiver {
            Some(class) => format!("{}::{}#{}", self.namespace, class.name(), self.name),
            None => format!("{}::{}", self.namespace, self.name),
        }
    }
}
