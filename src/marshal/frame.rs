//! Call frames
//!
//! A `CallFrame` is built once per callable from its signature. It holds the
//! argument builders and the flattened pre/post plans; `call` interprets the
//! plans against one set of host arguments.
//!
//! Native argument order: receiver, declared parameters, error slot.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::sync::Arc;

use super::argument::{
    ErrorArgument, InstanceArgument, PostAction, PostStep, PreStep, RegularArgument, ReturnValue, Slot,
};
use super::convert::{element_of, instance_ingoing, interface_of, utf8_from_ptr};
use super::sized_array::SizedArray;
use super::storage::Storage;
use super::{ingoing, outgoing, Runtime};
use crate::error::{MarshalError, NativeError, Result};
use crate::interop::{record_call, record_marshaling_error, FfiType, FfiValue, Invoke};
use crate::introspection::{
    ArgInfo, CallableInfo, Direction, SpecializedTag, TypeDescriptor, TypeTag,
};
use crate::logging::{log_ffi_call, log_ffi_error, log_ffi_return, warn};
use crate::value::Value;

/// `GError { GQuark domain; gint code; gchar *message; }`
const ERROR_DOMAIN_OFFSET: usize = 0;
const ERROR_CODE_OFFSET: usize = 4;
const ERROR_MESSAGE_OFFSET: usize = 8;

#[derive(Debug, Clone)]
pub struct CallFrame {
    name: String,
    receiver: Option<InstanceArgument>,
    args: Vec<RegularArgument>,
    ret: ReturnValue,
    return_length: Option<usize>,
    error: Option<ErrorArgument>,
    pre: Vec<PreStep>,
    post: Vec<PostStep>,
}

impl CallFrame {
    /// Plan the marshaling of `info`
    ///
    /// Length back-references must point at a different integer argument;
    /// anything else is a setup error.
    pub fn build(info: &CallableInfo) -> Result<Self> {
        let name = info.full_name();
        let count = info.args.len();

        let mut is_length = vec![false; count];
        let mut length_source_for = vec![None; count];

        for (index, arg) in info.args.iter().enumerate() {
            let Some(length) = arg.array_length else {
                continue;
            };
            check_length_arg(&name, &info.args, Some(index), length)?;
            is_length[length] = true;
            let has_input = matches!(arg.direction, Direction::In | Direction::InOut);
            let length_has_input = matches!(info.args[length].direction, Direction::In | Direction::InOut);
            if has_input && length_has_input {
                if length_source_for[length].is_some() {
                    return Err(MarshalError::setup(
                        &name,
                        format!("argument {} is the length of more than one array", length),
                    ));
                }
                length_source_for[length] = Some(index);
            }
        }
        if let Some(length) = info.return_array_length {
            check_length_arg(&name, &info.args, None, length)?;
            is_length[length] = true;
        }

        let args: Vec<RegularArgument> = info
            .args
            .iter()
            .enumerate()
            .map(|(i, arg)| RegularArgument::new(i, arg.clone(), length_source_for[i], is_length[i]))
            .collect();
        let receiver = info.receiver.clone().map(InstanceArgument::new);
        let ret = ReturnValue::new(info.return_type.clone(), info.constructor, info.return_transfer);
        let error = info.throws.then_some(ErrorArgument);

        let mut pre = Vec::new();
        if let Some(receiver) = &receiver {
            pre.extend(receiver.pre());
        }
        for arg in &args {
            pre.extend(arg.pre());
        }
        if let Some(error) = &error {
            pre.extend(error.pre());
        }

        let mut post: Vec<PostStep> = args.iter().flat_map(RegularArgument::post).collect();
        post.extend(ret.post());
        if let Some(error) = &error {
            post.extend(error.post());
        }

        Ok(Self {
            name,
            receiver,
            args,
            ret,
            return_length: info.return_array_length,
            error,
            pre,
            post,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pre_steps(&self) -> &[PreStep] {
        &self.pre
    }

    pub fn post_steps(&self) -> &[PostStep] {
        &self.post
    }

    /// Native slot types in calling order
    pub fn arg_types(&self) -> Vec<FfiType> {
        let mut types = Vec::with_capacity(self.args.len() + 2);
        if self.receiver.is_some() {
            types.push(FfiType::Pointer);
        }
        for arg in &self.args {
            types.push(match arg.info().direction {
                Direction::In => arg.ty().slot_type(),
                Direction::Out | Direction::InOut => FfiType::Pointer,
            });
        }
        if self.error.is_some() {
            types.push(FfiType::Pointer);
        }
        types
    }

    pub fn return_type(&self) -> FfiType {
        self.ret.ty().slot_type()
    }

    /// Number of host arguments `call` expects, receiver included
    pub fn host_arity(&self) -> usize {
        self.receiver.is_some() as usize + self.args.iter().filter(|a| a.is_host_input()).count()
    }

    /// Marshal `args`, invoke, and marshal the results back
    ///
    /// Zero results yield `Nil`, one yields the value itself and more yield
    /// a `Tuple` of the return value followed by outputs in order.
    pub fn call(&self, rt: &Arc<Runtime>, invoker: &dyn Invoke, args: &[Value]) -> Result<Value> {
        let span = tracing::debug_span!("call", function = %self.name);
        let _enter = span.enter();
        log_ffi_call(&self.name, args.len());

        let result = self.run(rt, invoker, args);
        match &result {
            Ok(_) => log_ffi_return(&self.name),
            Err(MarshalError::Native(_)) => {}
            Err(e) => {
                record_marshaling_error();
                log_ffi_error(&self.name, &e.to_string());
            }
        }
        result
    }

    fn run(&self, rt: &Arc<Runtime>, invoker: &dyn Invoke, args: &[Value]) -> Result<Value> {
        if args.len() != self.host_arity() {
            return Err(MarshalError::invalid_argument(format!(
                "wrong number of arguments for {} ({} for {})",
                self.name,
                args.len(),
                self.host_arity()
            )));
        }

        let mut state = CallState::new(rt, self.args.len());
        let mut host = args.iter();
        if self.receiver.is_some() {
            state.receiver_value = host.next().cloned();
        }
        for arg in &self.args {
            if arg.is_host_input() {
                state.inputs[arg.index()] = host.next().cloned();
            }
        }

        for step in &self.pre {
            self.run_pre(rt, step, &mut state)?;
        }

        let native_args = state.native_args(self);
        let raw = unsafe { invoker.invoke(&native_args)? };
        record_call();

        // Every post step runs so transferred buffers and the error record
        // are released even when a conversion fails
        let mut outputs: Vec<(Slot, Value)> = Vec::new();
        let mut failure = None;
        let mut native_error = Ok(());
        for step in &self.post {
            match step {
                PostStep::Output { slot, action } => match self.run_post(rt, *slot, action, raw, &mut state) {
                    Ok(value) => outputs.push((*slot, value)),
                    Err(e) => {
                        failure.get_or_insert(e);
                    }
                },
                PostStep::CheckError => native_error = state.check_error(rt, &self.name),
            }
        }
        native_error?;
        if let Some(e) = failure {
            return Err(e);
        }

        // Views into per-call memory (an echoed input, an untouched inout
        // array) take ownership of it
        let storage = Arc::new(state.storage);
        for (_, value) in &mut outputs {
            keep_alive(value, &storage);
        }

        Ok(self.assemble(outputs))
    }

    fn run_pre(&self, rt: &Arc<Runtime>, step: &PreStep, state: &mut CallState) -> Result<()> {
        match *step {
            PreStep::Receiver => {
                let Some(receiver) = &self.receiver else {
                    return Ok(());
                };
                let value = state.receiver_value.take().unwrap_or(Value::Nil);
                let ptr = instance_ingoing(receiver.class(), &value)?;
                if ptr.is_null() {
                    return Err(MarshalError::invalid_argument(format!(
                        "{} needs a {} receiver, got nil",
                        self.name,
                        receiver.class().full_name()
                    )));
                }
                state.receiver = FfiValue::from_ptr(ptr);
            }
            PreStep::CheckFixedSize { arg, size } => {
                if size > 0 {
                    if let Some(got) = state.input(arg).sequence_len() {
                        if got != size {
                            return Err(MarshalError::size_mismatch(size, got));
                        }
                    }
                }
            }
            PreStep::AssignLength { arg, array } => {
                let source = state.input(array);
                let len = match source {
                    Value::Nil => 0,
                    other => other.sequence_len().ok_or_else(|| {
                        MarshalError::invalid_argument(format!(
                            "cannot determine the length of {} for {}",
                            other.type_name(),
                            self.args[array].info().name
                        ))
                    })?,
                };
                let kind = self.args[arg].ty().slot_type();
                state.bind(&self.args[arg], FfiValue::from_int(kind, len as i64));
            }
            PreStep::AllocateOut { arg } => {
                let size = self.args[arg].ty().slot_type().size().max(FfiType::Pointer.size());
                let cell = state.storage.alloc(size);
                state.cells[arg] = Some(cell);
                state.slots[arg] = FfiValue::from_ptr(cell.as_ptr() as *mut c_void);
            }
            PreStep::AllocateCallerComposite { arg } => {
                let argument = &self.args[arg];
                let ty = argument.ty();
                let (ptr, value) = match argument.tag() {
                    SpecializedTag::CArray => {
                        let len = self.caller_array_len(argument, state)?;
                        let element = element_of(ty)?.clone();
                        let array = SizedArray::allocate(rt, element, len);
                        (array.as_ptr(), Value::Array(array))
                    }
                    _ => {
                        let instance = rt.identity().allocate(interface_of(ty)?);
                        (instance.as_ptr(), Value::Instance(instance))
                    }
                };
                state.slots[arg] = FfiValue::from_ptr(ptr);
                state.allocated[arg] = Some(value);
            }
            PreStep::Ingoing { arg } => {
                let argument = &self.args[arg];
                let value = state.input(arg).clone();
                let raw = ingoing(rt, argument.ty(), &value, &mut state.storage)?;
                state.bind(argument, raw);
            }
            PreStep::NullErrorSlot => {
                state.error_cell = Some(state.storage.alloc(FfiType::Pointer.size()));
            }
        }
        Ok(())
    }

    /// Element count for a caller-allocated array: fixed size or a caller-given length
    fn caller_array_len(&self, argument: &RegularArgument, state: &CallState) -> Result<usize> {
        if let Some(size) = argument.ty().array_fixed_size() {
            return Ok(size);
        }
        let length = argument.info().array_length.ok_or_else(|| {
            MarshalError::setup(
                &self.name,
                format!("caller-allocated array {} has no size", argument.info().name),
            )
        })?;
        let len = state.input(length).as_i64().ok_or_else(|| {
            MarshalError::invalid_argument(format!(
                "length for {} must be an integer",
                argument.info().name
            ))
        })?;
        usize::try_from(len)
            .map_err(|_| MarshalError::invalid_argument(format!("negative length {}", len)))
    }

    fn run_post(
        &self,
        rt: &Arc<Runtime>,
        slot: Slot,
        action: &PostAction,
        ret: FfiValue,
        state: &mut CallState,
    ) -> Result<Value> {
        let (ty, raw, length) = match slot {
            Slot::Arg(i) => {
                let argument = &self.args[i];
                let length = argument.info().array_length.map(|j| state.length(&self.args[j]));
                (argument.ty(), state.output(argument), length)
            }
            Slot::Return => {
                let length = self.return_length.map(|j| state.length(&self.args[j]));
                (self.ret.ty(), ret, length)
            }
        };

        match action {
            PostAction::CallerAllocated => match slot {
                Slot::Arg(i) => Ok(state.allocated[i].take().unwrap_or(Value::Nil)),
                Slot::Return => Ok(Value::Nil),
            },
            PostAction::Convert | PostAction::Raw => outgoing(rt, ty, raw, length),
            PostAction::ConstructorWrap => {
                let class = self
                    .ret
                    .class()
                    .ok_or_else(|| MarshalError::setup(&self.name, "constructor returns no class"))?;
                Ok(rt.identity().constructor_wrap(class, unsafe { raw.ptr })?.into())
            }
            PostAction::String { free } => {
                let ptr = unsafe { raw.ptr };
                let value = utf8_from_ptr(ptr);
                if *free && !ptr.is_null() {
                    rt.native().free(ptr)?;
                }
                Ok(value)
            }
            PostAction::FixedArray { size } => {
                let element = element_of(ty)?.clone();
                Ok(SizedArray::wrap(rt, element, *size, unsafe { raw.ptr }).into())
            }
        }
    }

    fn assemble(&self, outputs: Vec<(Slot, Value)>) -> Value {
        let mut results = Vec::with_capacity(outputs.len());
        let mut args = Vec::new();
        for (slot, value) in outputs {
            match slot {
                Slot::Return => results.push(value),
                Slot::Arg(i) => args.push((i, value)),
            }
        }
        args.sort_by_key(|(i, _)| *i);
        results.extend(args.into_iter().map(|(_, v)| v));

        match results.len() {
            0 => Value::Nil,
            1 => results.pop().unwrap_or(Value::Nil),
            _ => Value::Tuple(results),
        }
    }
}

fn keep_alive(value: &mut Value, storage: &Arc<Storage>) {
    match value {
        Value::Array(array) => array.keep_alive(storage),
        Value::ZeroTerminated(array) => array.keep_alive(storage),
        Value::List(items) | Value::Tuple(items) => {
            for item in items {
                keep_alive(item, storage);
            }
        }
        Value::Map(entries) => {
            for (key, item) in entries {
                keep_alive(key, storage);
                keep_alive(item, storage);
            }
        }
        _ => {}
    }
}

fn check_length_arg(name: &str, args: &[ArgInfo], owner: Option<usize>, length: usize) -> Result<()> {
    let Some(target) = args.get(length) else {
        return Err(MarshalError::setup(
            name,
            format!("length argument {} out of range", length),
        ));
    };
    if owner == Some(length) {
        return Err(MarshalError::setup(
            name,
            format!("argument {} cannot be its own length", length),
        ));
    }
    if !is_integer(&target.ty) {
        return Err(MarshalError::setup(
            name,
            format!("length argument {} is {}, not an integer", target.name, target.ty.tag().name()),
        ));
    }
    Ok(())
}

fn is_integer(ty: &TypeDescriptor) -> bool {
    matches!(ty.tag(), TypeTag::Scalar(kind) if kind.is_integral() && *kind != FfiType::Boolean)
        && !ty.is_pointer()
}

/// Per-call marshaling state
struct CallState {
    inputs: Vec<Option<Value>>,
    receiver_value: Option<Value>,
    receiver: FfiValue,
    slots: Vec<FfiValue>,
    cells: Vec<Option<NonNull<u8>>>,
    allocated: Vec<Option<Value>>,
    error_cell: Option<NonNull<u8>>,
    storage: Storage,
}

impl CallState {
    fn new(rt: &Runtime, count: usize) -> Self {
        Self {
            inputs: vec![None; count],
            receiver_value: None,
            receiver: FfiValue::null(),
            slots: vec![FfiValue::null(); count],
            cells: vec![None; count],
            allocated: vec![None; count],
            error_cell: None,
            storage: rt.storage(),
        }
    }

    /// Host value for argument `index`; nil when none was given
    fn input(&self, index: usize) -> &Value {
        const NIL: &Value = &Value::Nil;
        self.inputs[index].as_ref().unwrap_or(NIL)
    }

    /// Bind a converted input; inout values go through a cell
    fn bind(&mut self, argument: &RegularArgument, raw: FfiValue) {
        let index = argument.index();
        if argument.info().direction != Direction::InOut {
            self.slots[index] = raw;
            return;
        }
        let kind = argument.ty().slot_type();
        let cell = self.storage.alloc(kind.size().max(FfiType::Pointer.size()));
        unsafe { raw.write(kind, cell.as_ptr()) };
        self.cells[index] = Some(cell);
        self.slots[index] = FfiValue::from_ptr(cell.as_ptr() as *mut c_void);
    }

    /// Raw value of an argument after the call
    fn output(&self, argument: &RegularArgument) -> FfiValue {
        let index = argument.index();
        match self.cells[index] {
            Some(cell) => unsafe { FfiValue::read(argument.ty().slot_type(), cell.as_ptr()) },
            None => self.slots[index],
        }
    }

    fn length(&self, argument: &RegularArgument) -> usize {
        let raw = self.output(argument);
        let len = unsafe { raw.as_i64(argument.ty().slot_type()) };
        usize::try_from(len).unwrap_or(0)
    }

    fn native_args(&self, frame: &CallFrame) -> Vec<FfiValue> {
        let mut values = Vec::with_capacity(self.slots.len() + 2);
        if frame.receiver.is_some() {
            values.push(self.receiver);
        }
        values.extend_from_slice(&self.slots);
        if let Some(cell) = self.error_cell {
            values.push(FfiValue::from_ptr(cell.as_ptr() as *mut c_void));
        }
        values
    }

    /// Raise the error record left in the error slot, releasing it
    fn check_error(&self, rt: &Runtime, name: &str) -> Result<()> {
        let Some(cell) = self.error_cell else {
            return Ok(());
        };
        let record = unsafe { FfiValue::read(FfiType::Pointer, cell.as_ptr()).ptr };
        if record.is_null() {
            return Ok(());
        }

        let base = record as *const u8;
        let (domain, code, message) = unsafe {
            let domain = FfiValue::read(FfiType::U32, base.add(ERROR_DOMAIN_OFFSET)).u32;
            let code = FfiValue::read(FfiType::I32, base.add(ERROR_CODE_OFFSET)).i32;
            let message = FfiValue::read(FfiType::Pointer, base.add(ERROR_MESSAGE_OFFSET)).ptr;
            (domain, code, message)
        };
        let message = match utf8_from_ptr(message) {
            Value::Str(s) => s,
            _ => String::new(),
        };
        let error = NativeError {
            domain,
            domain_name: rt.native().quark_to_string(domain),
            code,
            message,
        };

        if let Err(e) = rt.native().free_error(record) {
            warn!(error = %e, "failed to release error record");
        }
        log_ffi_error(name, &error.to_string());
        Err(MarshalError::Native(error))
    }
}
