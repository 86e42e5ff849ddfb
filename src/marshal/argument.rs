//! Argument builders
//!
//! Each builder turns one parameter (or the return slot, receiver or error
//! slot) into the steps run before and after the native call. Steps refer
//! to arguments by their index in the callable's declared parameter list.

use std::sync::Arc;

use crate::introspection::{
    flatten_tag, ArgInfo, Direction, RegisteredType, SpecializedTag, Transfer, TypeDescriptor,
};

/// Source of a raw native value read after the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Arg(usize),
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreStep {
    /// Bind the receiver instance's pointer
    Receiver,
    /// Reject an input sequence whose length differs from a nonzero size
    CheckFixedSize { arg: usize, size: usize },
    /// Bind the element count of input array `array` to length argument `arg`
    AssignLength { arg: usize, array: usize },
    /// Zero-initialized cell the callee writes through
    AllocateOut { arg: usize },
    /// Storage the callee fills in place
    AllocateCallerComposite { arg: usize },
    /// Convert the host value and bind it
    Ingoing { arg: usize },
    /// Null-initialized error record pointer, passed last
    NullErrorSlot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// The preallocated composite is the result
    CallerAllocated,
    /// Outgoing conversion by specialized tag
    Convert,
    /// Outgoing wrap that adopts a floating reference
    ConstructorWrap,
    /// Read a null-terminated string, releasing the native copy if owned
    String { free: bool },
    /// View of a fixed-length array
    FixedArray { size: usize },
    /// Pass-through of the raw slot
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostStep {
    Output { slot: Slot, action: PostAction },
    /// Raise if the callee filled the error slot
    CheckError,
}

/// `in`, `out` or `inout` parameter
#[derive(Debug, Clone)]
pub struct RegularArgument {
    index: usize,
    info: ArgInfo,
    tag: SpecializedTag,
    length_source_for: Option<usize>,
    is_length: bool,
}

impl RegularArgument {
    /// `length_source_for` names the input array this argument counts;
    /// `is_length` hides the argument from host inputs and results.
    pub fn new(index: usize, info: ArgInfo, length_source_for: Option<usize>, is_length: bool) -> Self {
        let tag = flatten_tag(&info.ty);
        Self {
            index,
            info,
            tag,
            length_source_for,
            is_length,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn info(&self) -> &ArgInfo {
        &self.info
    }

    #[inline]
    pub fn ty(&self) -> &Arc<TypeDescriptor> {
        &self.info.ty
    }

    #[inline]
    pub fn tag(&self) -> SpecializedTag {
        self.tag
    }

    pub fn has_input_value(&self) -> bool {
        matches!(self.info.direction, Direction::In | Direction::InOut)
    }

    pub fn has_output_value(&self) -> bool {
        matches!(self.info.direction, Direction::Out | Direction::InOut)
    }

    /// Takes a value from the caller
    pub fn is_host_input(&self) -> bool {
        self.has_input_value() && self.length_source_for.is_none()
    }

    /// Contributes a value to the results
    pub fn is_host_output(&self) -> bool {
        self.has_output_value() && !self.is_length
    }

    pub fn is_caller_allocated(&self) -> bool {
        self.info.caller_allocates
            && self.info.direction == Direction::Out
            && matches!(
                self.tag,
                SpecializedTag::Struct | SpecializedTag::Union | SpecializedTag::CArray
            )
    }

    pub fn pre(&self) -> Vec<PreStep> {
        let arg = self.index;
        let mut steps = Vec::new();

        if self.has_input_value() {
            if self.tag == SpecializedTag::CArray {
                if let Some(size) = self.info.ty.array_fixed_size() {
                    steps.push(PreStep::CheckFixedSize { arg, size });
                }
            }
            if let Some(array) = self.length_source_for {
                steps.push(PreStep::AssignLength { arg, array });
                return steps;
            }
        }

        match self.info.direction {
            Direction::Out if self.is_caller_allocated() => {
                steps.push(PreStep::AllocateCallerComposite { arg })
            }
            Direction::Out => steps.push(PreStep::AllocateOut { arg }),
            Direction::In | Direction::InOut => steps.push(PreStep::Ingoing { arg }),
        }
        steps
    }

    pub fn post(&self) -> Vec<PostStep> {
        if !self.is_host_output() {
            return Vec::new();
        }

        let action = if self.is_caller_allocated() {
            PostAction::CallerAllocated
        } else if self.tag.needs_wrapping() {
            PostAction::Convert
        } else {
            match self.tag {
                SpecializedTag::CArray => PostAction::FixedArray {
                    size: self.info.ty.array_fixed_size().unwrap_or(0),
                },
                SpecializedTag::Utf8 | SpecializedTag::Filename => PostAction::String {
                    free: self.info.transfer == Transfer::Everything,
                },
                _ => PostAction::Raw,
            }
        };

        vec![PostStep::Output {
            slot: Slot::Arg(self.index),
            action,
        }]
    }
}

/// The callable's return slot
#[derive(Debug, Clone)]
pub struct ReturnValue {
    ty: Arc<TypeDescriptor>,
    tag: SpecializedTag,
    constructor: bool,
    transfer: Transfer,
}

impl ReturnValue {
    pub fn new(ty: Arc<TypeDescriptor>, constructor: bool, transfer: Transfer) -> Self {
        let tag = flatten_tag(&ty);
        Self {
            ty,
            tag,
            constructor,
            transfer,
        }
    }

    #[inline]
    pub fn ty(&self) -> &Arc<TypeDescriptor> {
        &self.ty
    }

    /// Plain `void` produces no value
    pub fn has_value(&self) -> bool {
        !(self.tag == SpecializedTag::Void && !self.ty.is_pointer())
    }

    /// Registered class of a constructed instance
    pub fn class(&self) -> Option<&Arc<RegisteredType>> {
        self.ty.interface_info()
    }

    pub fn post(&self) -> Vec<PostStep> {
        if !self.has_value() {
            return Vec::new();
        }

        let action = if self.tag.needs_wrapping() {
            if self.constructor && self.tag.is_polymorphic() {
                PostAction::ConstructorWrap
            } else {
                PostAction::Convert
            }
        } else {
            match self.tag {
                SpecializedTag::Utf8 | SpecializedTag::Filename => PostAction::String {
                    free: self.transfer == Transfer::Everything,
                },
                SpecializedTag::CArray => PostAction::FixedArray {
                    size: self.ty.array_fixed_size().unwrap_or(0),
                },
                _ => PostAction::Raw,
            }
        };

        vec![PostStep::Output {
            slot: Slot::Return,
            action,
        }]
    }
}

/// Receiver of an instance method, passed first
#[derive(Debug, Clone)]
pub struct InstanceArgument {
    class: Arc<RegisteredType>,
}

impl InstanceArgument {
    pub fn new(class: Arc<RegisteredType>) -> Self {
        Self { class }
    }

    pub fn class(&self) -> &Arc<RegisteredType> {
        &self.class
    }

    pub fn pre(&self) -> Vec<PreStep> {
        vec![PreStep::Receiver]
    }
}

/// Trailing error out-parameter of a throwing callable
#[derive(Debug, Clone, Default)]
pub struct ErrorArgument;

impl ErrorArgument {
    pub fn pre(&self) -> Vec<PreStep> {
        vec![PreStep::NullErrorSlot]
    }

    pub fn post(&self) -> Vec<PostStep> {
        vec![PostStep::CheckError]
    }
}
