//! Tests for call frames and conversions, driven by in-process invokers

use core::cell::Cell;
use core::ffi::{c_char, c_void};
use std::ffi::CStr;
use std::sync::Arc;

use proptest::prelude::*;

use super::*;
use crate::error::MarshalError;
use crate::interop::{FfiType, FfiValue};
use crate::introspection::{ArgInfo, CallableInfo, RegisteredType, Transfer, TypeDescriptor};
use crate::memory::NativeBuffer;
use crate::object::{ClassRegistry, Ownership};
use crate::testing::{plain_runtime, runtime, runtime_with_config, FakeObject, FakeRuntime, NativeCall};
use crate::value::Value;

const WORD: usize = core::mem::size_of::<usize>();

fn int() -> TypeDescriptor {
    TypeDescriptor::scalar(FfiType::I32)
}

fn build(info: CallableInfo) -> CallFrame {
    CallFrame::build(&info).unwrap()
}

/// Write `value` through an out-pointer argument
unsafe fn store(arg: FfiValue, ty: FfiType, value: FfiValue) {
    value.write(ty, arg.ptr as *mut u8);
}

fn ints(values: &[i32]) -> Vec<Value> {
    values.iter().map(|&v| Value::Int(v as i64)).collect()
}

// ============================================================================
// Length-paired arrays
// ============================================================================

fn sum_info() -> CallableInfo {
    CallableInfo::function("Regress", "test_array_int_in", "regress_test_array_int_in")
        .arg(ArgInfo::input("ints", TypeDescriptor::length_array(int())).with_length(1))
        .arg(ArgInfo::input("length", int()))
        .returns(int())
}

fn sum(args: &[FfiValue]) -> FfiValue {
    unsafe {
        let base = args[0].ptr as *const i32;
        let n = args[1].i32 as usize;
        let total: i32 = (0..n).map(|i| *base.add(i)).sum();
        FfiValue { i32: total }
    }
}

#[test]
fn test_length_argument_is_hidden_and_inferred() {
    let (_, rt) = plain_runtime();
    let frame = build(sum_info());

    assert_eq!(frame.host_arity(), 1);
    assert_eq!(frame.arg_types(), vec![FfiType::Pointer, FfiType::I32]);

    let result = frame.call(&rt, &sum, &[Value::from(vec![1, 2, 3, 4])]).unwrap();
    assert_eq!(result, Value::Int(10));
}

#[test]
fn test_length_of_empty_and_nil_arrays() {
    let (_, rt) = plain_runtime();
    let frame = build(sum_info());

    let seen = Cell::new(-1);
    let record = |args: &[FfiValue]| {
        seen.set(unsafe { args[1].i32 });
        FfiValue { i32: 0 }
    };

    frame.call(&rt, &record, &[Value::List(vec![])]).unwrap();
    assert_eq!(seen.get(), 0);

    seen.set(-1);
    frame.call(&rt, &record, &[Value::Nil]).unwrap();
    assert_eq!(seen.get(), 0);
}

#[test]
fn test_length_plan() {
    let frame = build(sum_info());
    assert_eq!(
        frame.pre_steps(),
        &[PreStep::Ingoing { arg: 0 }, PreStep::AssignLength { arg: 1, array: 0 }]
    );
    assert_eq!(
        frame.post_steps(),
        &[PostStep::Output {
            slot: Slot::Return,
            action: PostAction::Raw,
        }]
    );
}

fn echo_info() -> CallableInfo {
    CallableInfo::function("Regress", "test_array_int_echo", "regress_test_array_int_echo")
        .arg(ArgInfo::input("ints", TypeDescriptor::length_array(int())).with_length(1))
        .arg(ArgInfo::input("length", int()))
        .returns(TypeDescriptor::length_array(int()))
        .return_length(1)
}

/// Pass `values` in as a length-paired array and read the callee's copy back
fn echo_round_trip(values: &[i32]) -> Vec<Value> {
    let (_, rt) = plain_runtime();
    let frame = build(echo_info());

    let copy = NativeBuffer::zeroed(values.len() * 4);
    let dst = copy.as_ptr() as usize;
    let echo = move |args: &[FfiValue]| unsafe {
        let n = args[1].i32 as usize;
        core::ptr::copy_nonoverlapping(args[0].ptr as *const u8, dst as *mut u8, n * 4);
        FfiValue::from_ptr(dst as *mut c_void)
    };

    let input: Vec<Value> = ints(values);
    let result = frame.call(&rt, &echo, &[Value::List(input)]).unwrap();
    let Value::Array(array) = result else {
        panic!("expected an array");
    };
    assert_eq!(array.len(), values.len());
    array.to_vec().unwrap()
}

#[test]
fn test_length_array_round_trip_sizes() {
    assert_eq!(echo_round_trip(&[]), ints(&[]));
    assert_eq!(echo_round_trip(&[-7]), ints(&[-7]));

    let large: Vec<i32> = (0..10_000).map(|i| i * 3 - 5_000).collect();
    assert_eq!(echo_round_trip(&large), ints(&large));
}

#[test]
fn test_length_array_out() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_array_int_out", "regress_test_array_int_out")
            .arg(ArgInfo::output("ints", TypeDescriptor::length_array(int())).with_length(1))
            .arg(ArgInfo::output("length", int())),
    );
    assert_eq!(frame.host_arity(), 0);

    let data = NativeBuffer::zeroed(12);
    for (i, v) in [5, 6, 7].iter().enumerate() {
        unsafe { data.write(FfiType::I32, i * 4, FfiValue { i32: *v }) };
    }
    let ptr = data.as_void_ptr() as usize;
    let fill = move |args: &[FfiValue]| unsafe {
        store(args[0], FfiType::Pointer, FfiValue::from_ptr(ptr as *mut c_void));
        store(args[1], FfiType::I32, FfiValue { i32: 3 });
        FfiValue::void()
    };

    let Value::Array(array) = frame.call(&rt, &fill, &[]).unwrap() else {
        panic!("expected an array");
    };
    assert!(!array.is_owned());
    assert_eq!(array.to_vec().unwrap(), ints(&[5, 6, 7]));
}

#[test]
fn test_null_length_array_out_is_nil() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_array_int_null_out", "regress_test_array_int_null_out")
            .arg(ArgInfo::output("ints", TypeDescriptor::length_array(int())).with_length(1))
            .arg(ArgInfo::output("length", int())),
    );
    let nothing = |_: &[FfiValue]| FfiValue::void();
    assert_eq!(frame.call(&rt, &nothing, &[]).unwrap(), Value::Nil);
}

/// Allocate and scribble over fresh heap memory
fn churn_heap() -> Vec<Vec<u8>> {
    (0..64).map(|_| vec![0xAB; 256]).collect()
}

#[test]
fn test_returned_input_array_owns_call_storage() {
    let (_, rt) = plain_runtime();
    let frame = build(echo_info());
    let same = |args: &[FfiValue]| FfiValue::from_ptr(unsafe { args[0].ptr });

    let values: Vec<i32> = (1..=64).collect();
    let Value::Array(array) = frame.call(&rt, &same, &[Value::List(ints(&values))]).unwrap() else {
        panic!("expected an array");
    };
    let _noise = churn_heap();
    assert!(array.is_owned());
    assert_eq!(array.to_vec().unwrap(), ints(&values));
}

#[test]
fn test_untouched_inout_array_owns_call_storage() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_array_fixed_inout", "regress_test_array_fixed_inout")
            .arg(ArgInfo::inout("ints", TypeDescriptor::fixed_array(int(), 3))),
    );
    let untouched = |_: &[FfiValue]| FfiValue::void();

    let Value::Array(array) = frame.call(&rt, &untouched, &[Value::from(vec![7, 8, 9])]).unwrap() else {
        panic!("expected an array");
    };
    let _noise = churn_heap();
    assert!(array.is_owned());
    assert_eq!(array.to_vec().unwrap(), ints(&[7, 8, 9]));
}

#[test]
fn test_returned_input_strv_owns_call_storage() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_strv_echo", "regress_test_strv_echo")
            .arg(ArgInfo::input("strv", TypeDescriptor::strv()))
            .returns(TypeDescriptor::strv()),
    );
    let same = |args: &[FfiValue]| FfiValue::from_ptr(unsafe { args[0].ptr });

    let input = Value::from(vec!["so", "long"]);
    let Value::ZeroTerminated(strv) = frame.call(&rt, &same, &[input]).unwrap() else {
        panic!("expected a zero-terminated array");
    };
    let _noise = churn_heap();
    assert_eq!(strv.to_vec().unwrap(), vec![Value::from("so"), Value::from("long")]);
}

proptest! {
    #[test]
    fn test_length_array_round_trip_prop(values in proptest::collection::vec(any::<i32>(), 0..64)) {
        prop_assert_eq!(echo_round_trip(&values), ints(&values));
    }

    #[test]
    fn test_sized_array_from_values_prop(values in proptest::collection::vec(any::<i16>(), 0..64)) {
        let (_, rt) = plain_runtime();
        let input: Vec<Value> = values.iter().map(|&v| Value::Int(v as i64)).collect();
        let array = SizedArray::from_values(&rt, TypeDescriptor::scalar(FfiType::I16).shared(), &input).unwrap();
        prop_assert_eq!(array.size_in_bytes(), values.len() * 2);
        prop_assert_eq!(array.to_vec().unwrap(), input);
    }
}

// ============================================================================
// Fixed-size arrays
// ============================================================================

fn fixed_info(size: usize) -> CallableInfo {
    CallableInfo::function("Regress", "test_array_fixed_size_int_in", "regress_test_array_fixed_size_int_in")
        .arg(ArgInfo::input("ints", TypeDescriptor::fixed_array(int(), size)))
        .returns(int())
}

#[test]
fn test_fixed_size_mismatch_rejected_before_call() {
    let (_, rt) = plain_runtime();
    let frame = build(fixed_info(3));
    assert_eq!(frame.pre_steps()[0], PreStep::CheckFixedSize { arg: 0, size: 3 });

    let called = Cell::new(false);
    let callee = |_: &[FfiValue]| {
        called.set(true);
        FfiValue { i32: 0 }
    };

    let err = frame.call(&rt, &callee, &[Value::from(vec![1, 2])]).unwrap_err();
    assert!(matches!(err, MarshalError::InvalidArgument { .. }));
    assert_eq!(err.to_string(), "invalid argument: Expected size 3, got 2");
    assert!(!called.get());
}

#[test]
fn test_fixed_size_match_accepted() {
    let (_, rt) = plain_runtime();
    let frame = build(fixed_info(3));
    let first = |args: &[FfiValue]| unsafe { FfiValue { i32: *(args[0].ptr as *const i32) } };
    assert_eq!(frame.call(&rt, &first, &[Value::from(vec![9, 8, 7])]).unwrap(), Value::Int(9));
}

#[test]
fn test_zero_fixed_size_is_unconstrained() {
    let (_, rt) = plain_runtime();
    let frame = build(fixed_info(0));
    let zero = |_: &[FfiValue]| FfiValue { i32: 0 };
    for len in [0usize, 1, 5] {
        let values: Vec<i32> = (0..len as i32).collect();
        assert!(frame.call(&rt, &zero, &[Value::from(values)]).is_ok());
    }
}

#[test]
fn test_sized_array_from_checks_declared_size() {
    let (_, rt) = plain_runtime();
    let element = int().shared();

    let err = SizedArray::from(&rt, element.clone(), Some(2), &Value::from(vec![1, 2, 3])).unwrap_err();
    assert_eq!(err.to_string(), "invalid argument: Expected size 2, got 3");

    assert!(SizedArray::from(&rt, element.clone(), Some(0), &Value::from(vec![1, 2, 3])).is_ok());
    assert!(SizedArray::from(&rt, element.clone(), None, &Value::from(vec![1])).is_ok());
    assert!(SizedArray::from(&rt, element, Some(4), &Value::Nil).unwrap().is_none());
}

#[test]
fn test_fixed_array_return_view() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_array_fixed_size_int_return", "regress_test_array_fixed_size_int_return")
            .returns(TypeDescriptor::fixed_array(int(), 4)),
    );
    let data = NativeBuffer::zeroed(16);
    for i in 0..4 {
        unsafe { data.write(FfiType::I32, i * 4, FfiValue { i32: i as i32 * 10 }) };
    }
    let ptr = data.as_void_ptr() as usize;
    let give = move |_: &[FfiValue]| FfiValue::from_ptr(ptr as *mut c_void);

    let Value::Array(array) = frame.call(&rt, &give, &[]).unwrap() else {
        panic!("expected an array");
    };
    assert_eq!(array.to_vec().unwrap(), ints(&[0, 10, 20, 30]));
}

#[test]
fn test_sized_array_get_out_of_bounds() {
    let (_, rt) = plain_runtime();
    let array = SizedArray::from_values(&rt, int().shared(), &ints(&[1])).unwrap();
    assert_eq!(array.get(0).unwrap(), Value::Int(1));
    assert!(matches!(array.get(1), Err(MarshalError::InvalidArgument { .. })));
}

// ============================================================================
// Objects and structs
// ============================================================================

struct Classes {
    native: Arc<FakeRuntime>,
    rt: Arc<Runtime>,
    base: Arc<RegisteredType>,
    floating: Arc<RegisteredType>,
}

fn classes() -> Classes {
    let native = FakeRuntime::new();
    let registry = Arc::new(ClassRegistry::new());

    let base = RegisteredType::object("GObject", "Object").with_gtype(80).shared();
    let derived = RegisteredType::object("Regress", "TestSubObj")
        .with_gtype(81)
        .with_parent(base.clone())
        .shared();
    let unowned = RegisteredType::object("GObject", "InitiallyUnowned")
        .with_gtype(82)
        .with_parent(base.clone())
        .with_floating(true)
        .shared();
    let floating = RegisteredType::object("Regress", "TestFloating")
        .with_gtype(83)
        .with_parent(unowned)
        .shared();
    registry.register(base.clone());
    registry.register(derived);
    registry.register(floating.clone());

    let rt = runtime(native.clone(), registry);
    Classes {
        native,
        rt,
        base,
        floating,
    }
}

#[test]
fn test_null_object_return_is_nil() {
    let c = classes();
    let frame = build(
        CallableInfo::function("Regress", "test_obj_null_out", "regress_test_obj_null_out")
            .returns(TypeDescriptor::interface(c.base.clone())),
    );
    let null = |_: &[FfiValue]| FfiValue::null();
    assert_eq!(frame.call(&c.rt, &null, &[]).unwrap(), Value::Nil);
}

#[test]
fn test_object_return_resolves_runtime_subtype() {
    let c = classes();
    let obj = FakeObject::new(81);
    let ptr = obj.ptr() as usize;
    let frame = build(
        CallableInfo::function("Regress", "test_obj_get", "regress_test_obj_get")
            .returns(TypeDescriptor::interface(c.base.clone())),
    );
    let give = move |_: &[FfiValue]| FfiValue::from_ptr(ptr as *mut c_void);

    let Value::Instance(instance) = frame.call(&c.rt, &give, &[]).unwrap() else {
        panic!("expected an instance");
    };
    assert_eq!(instance.class().name(), "TestSubObj");
    assert_eq!(instance.ownership(), Ownership::Borrowed);
    assert!(c.native.calls().is_empty());
}

fn floating_new(class: &Arc<RegisteredType>) -> CallFrame {
    build(
        CallableInfo::function("Regress", "test_floating_new", "regress_test_floating_new")
            .returns(TypeDescriptor::interface(class.clone()))
            .constructor(),
    )
}

#[test]
fn test_constructor_claims_floating_reference() {
    let c = classes();
    let obj = FakeObject::new(83);
    let ptr = obj.ptr() as usize;
    let frame = floating_new(&c.floating);
    assert_eq!(
        frame.post_steps(),
        &[PostStep::Output {
            slot: Slot::Return,
            action: PostAction::ConstructorWrap,
        }]
    );
    let give = move |_: &[FfiValue]| FfiValue::from_ptr(ptr as *mut c_void);

    let result = frame.call(&c.rt, &give, &[]).unwrap();
    let instance = result.as_instance().unwrap();
    assert_eq!(instance.ownership(), Ownership::Owned);
    assert_eq!(c.native.calls(), vec![NativeCall::RefSink(ptr)]);

    drop(result);
    assert_eq!(c.native.count(NativeCall::Unref(ptr)), 1);
}

#[test]
fn test_constructor_double_claim_rejected() {
    let c = classes();
    let obj = FakeObject::new(83);
    let ptr = obj.ptr() as usize;
    let frame = floating_new(&c.floating);
    let give = move |_: &[FfiValue]| FfiValue::from_ptr(ptr as *mut c_void);

    let first = frame.call(&c.rt, &give, &[]).unwrap();
    let err = frame.call(&c.rt, &give, &[]).unwrap_err();
    assert!(matches!(err, MarshalError::DoubleClaim { address } if address == ptr));
    assert_eq!(c.native.count(NativeCall::RefSink(ptr)), 1);

    // Released claims may be taken again
    drop(first);
    assert!(frame.call(&c.rt, &give, &[]).is_ok());
    assert_eq!(c.native.count(NativeCall::RefSink(ptr)), 2);
}

#[test]
fn test_constructor_of_non_floating_class_borrows() {
    let c = classes();
    let obj = FakeObject::new(80);
    let ptr = obj.ptr() as usize;
    let frame = floating_new(&c.base);
    let give = move |_: &[FfiValue]| FfiValue::from_ptr(ptr as *mut c_void);

    let result = frame.call(&c.rt, &give, &[]).unwrap();
    assert_eq!(result.as_instance().unwrap().ownership(), Ownership::Borrowed);
    assert!(c.native.calls().is_empty());
}

#[test]
fn test_method_receives_receiver_first() {
    let c = classes();
    let obj = FakeObject::new(80);
    let expected = obj.ptr() as usize;
    let frame = build(
        CallableInfo::method(c.base.clone(), "get_flag", "g_object_get_flag")
            .arg(ArgInfo::input("flag", int()))
            .returns(int()),
    );
    assert_eq!(frame.pre_steps()[0], PreStep::Receiver);
    assert_eq!(frame.arg_types(), vec![FfiType::Pointer, FfiType::I32]);
    assert_eq!(frame.host_arity(), 2);

    let check = move |args: &[FfiValue]| unsafe {
        FfiValue {
            i32: (args[0].ptr as usize == expected) as i32 + args[1].i32,
        }
    };
    let receiver = Value::Instance(c.rt.identity().wrap(&c.base, obj.ptr()).unwrap());

    assert_eq!(frame.call(&c.rt, &check, &[receiver, Value::Int(10)]).unwrap(), Value::Int(11));

    let err = frame.call(&c.rt, &check, &[Value::Nil, Value::Int(10)]).unwrap_err();
    assert!(matches!(err, MarshalError::InvalidArgument { .. }));
}

#[test]
fn test_caller_allocated_struct_out() {
    let (_, rt) = plain_runtime();
    let boxed = RegisteredType::structure("Regress", "TestStructA", 8).shared();
    let frame = build(
        CallableInfo::function("Regress", "test_struct_a_clone", "regress_test_struct_a_clone")
            .arg(ArgInfo::output("a_out", TypeDescriptor::interface(boxed.clone())).caller_allocates()),
    );
    assert_eq!(frame.pre_steps(), &[PreStep::AllocateCallerComposite { arg: 0 }]);

    let fill = |args: &[FfiValue]| unsafe {
        store(args[0], FfiType::I32, FfiValue { i32: 77 });
        FfiValue::void()
    };

    let result = frame.call(&rt, &fill, &[]).unwrap();
    let instance = result.as_instance().unwrap();
    assert_eq!(instance.class(), &boxed);
    assert_eq!(instance.ownership(), Ownership::Owned);
    assert_eq!(unsafe { *(instance.as_ptr() as *const i32) }, 77);
}

#[test]
fn test_instance_of_wrong_class_rejected() {
    let c = classes();
    let other = RegisteredType::structure("Regress", "TestStructB", 8).shared();
    let frame = build(
        CallableInfo::function("Regress", "test_obj_take", "regress_test_obj_take")
            .arg(ArgInfo::input("obj", TypeDescriptor::interface(c.base.clone()))),
    );
    let buffer = NativeBuffer::zeroed(8);
    let wrong = Value::Instance(c.rt.identity().direct_wrap(&other, buffer.as_void_ptr()).unwrap());
    let nothing = |_: &[FfiValue]| FfiValue::void();

    let err = frame.call(&c.rt, &nothing, &[wrong]).unwrap_err();
    assert!(err.to_string().contains("expected GObject::Object"));
}

// ============================================================================
// Scalars, out and inout
// ============================================================================

#[test]
fn test_scalar_out_and_inout() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_int_inout", "regress_test_int_inout")
            .arg(ArgInfo::inout("value", int()))
            .arg(ArgInfo::output("doubled", int())),
    );
    assert_eq!(frame.arg_types(), vec![FfiType::Pointer, FfiType::Pointer]);

    let inc = |args: &[FfiValue]| unsafe {
        let value = *(args[0].ptr as *const i32);
        store(args[0], FfiType::I32, FfiValue { i32: value + 1 });
        store(args[1], FfiType::I32, FfiValue { i32: value * 2 });
        FfiValue::void()
    };

    let result = frame.call(&rt, &inc, &[Value::Int(5)]).unwrap();
    assert_eq!(result, Value::Tuple(vec![Value::Int(6), Value::Int(10)]));
}

#[test]
fn test_return_precedes_outputs() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_int_out_utf8", "regress_test_int_out_utf8")
            .arg(ArgInfo::output("length", int()))
            .returns(TypeDescriptor::scalar(FfiType::Boolean)),
    );
    let give = |args: &[FfiValue]| unsafe {
        store(args[0], FfiType::I32, FfiValue { i32: 3 });
        FfiValue { i32: 1 }
    };
    assert_eq!(
        frame.call(&rt, &give, &[]).unwrap(),
        Value::Tuple(vec![Value::Bool(true), Value::Int(3)])
    );
}

#[test]
fn test_integer_out_of_range_rejected() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_int8", "regress_test_int8")
            .arg(ArgInfo::input("in", TypeDescriptor::scalar(FfiType::I8)))
            .returns(TypeDescriptor::scalar(FfiType::I8)),
    );
    let echo = |args: &[FfiValue]| args[0];

    assert_eq!(frame.call(&rt, &echo, &[Value::Int(-128)]).unwrap(), Value::Int(-128));
    let err = frame.call(&rt, &echo, &[Value::Int(300)]).unwrap_err();
    assert!(matches!(err, MarshalError::InvalidArgument { .. }));
}

#[test]
fn test_wrong_arity_rejected() {
    let (_, rt) = plain_runtime();
    let frame = build(sum_info());
    let err = frame.call(&rt, &sum, &[]).unwrap_err();
    assert!(err.to_string().contains("wrong number of arguments"));
}

// ============================================================================
// Enums and flags
// ============================================================================

fn enum_echo(ty: &Arc<RegisteredType>) -> CallFrame {
    build(
        CallableInfo::function("Regress", "test_enum_echo", "regress_test_enum_echo")
            .arg(ArgInfo::input("value", TypeDescriptor::interface(ty.clone())))
            .returns(TypeDescriptor::interface(ty.clone())),
    )
}

#[test]
fn test_enum_round_trip_every_member() {
    let (_, rt) = plain_runtime();
    let ty = RegisteredType::enumeration(
        "Regress",
        "TestEnumUnsigned",
        &[("value1", 1), ("value2", 0x8000_0000), ("value3", 0xffff_ffff)],
    )
    .shared();
    let frame = enum_echo(&ty);
    assert_eq!(frame.arg_types(), vec![FfiType::I32]);
    let echo = |args: &[FfiValue]| args[0];

    for name in ["value1", "value2", "value3"] {
        let result = frame.call(&rt, &echo, &[Value::symbol(name)]).unwrap();
        let Value::Enum(value) = result else {
            panic!("expected an enum value");
        };
        assert_eq!(value.name(), Some(name));
    }
}

#[test]
fn test_enum_wraparound_value() {
    let (_, rt) = plain_runtime();
    let ty = RegisteredType::enumeration("Regress", "TestEnumUnsigned", &[("value2", 0x8000_0000)]).shared();
    let frame = enum_echo(&ty);
    let echo = |args: &[FfiValue]| args[0];

    let Value::Enum(value) = frame.call(&rt, &echo, &[Value::UInt(0x8000_0000)]).unwrap() else {
        panic!("expected an enum value");
    };
    assert_eq!(value.value(), i32::MIN);
    assert_eq!(value.name(), Some("value2"));
}

#[test]
fn test_unknown_enum_member_rejected() {
    let (_, rt) = plain_runtime();
    let ty = RegisteredType::enumeration("Regress", "TestEnum", &[("value1", 0)]).shared();
    let frame = enum_echo(&ty);
    let echo = |args: &[FfiValue]| args[0];

    let err = frame.call(&rt, &echo, &[Value::symbol("value9")]).unwrap_err();
    assert!(matches!(err, MarshalError::InvalidArgument { .. }));
}

#[test]
fn test_flags_combine_list() {
    let (_, rt) = plain_runtime();
    let ty = RegisteredType::flags("Regress", "TestFlags", &[("flag1", 1), ("flag2", 2), ("flag3", 4)]).shared();
    let frame = enum_echo(&ty);
    let echo = |args: &[FfiValue]| args[0];

    let input = Value::List(vec![Value::symbol("flag1"), Value::symbol("flag3")]);
    let Value::Enum(value) = frame.call(&rt, &echo, &[input]).unwrap() else {
        panic!("expected a flags value");
    };
    assert_eq!(value.value(), 5);
}

// ============================================================================
// Error slot
// ============================================================================

fn error_record(domain: u32, code: i32, message: &NativeBuffer) -> NativeBuffer {
    let record = NativeBuffer::zeroed(8 + WORD);
    unsafe {
        record.write(FfiType::U32, 0, FfiValue { u32: domain });
        record.write(FfiType::I32, 4, FfiValue { i32: code });
        record.write(FfiType::Pointer, 8, FfiValue::from_ptr(message.as_void_ptr()));
    }
    record
}

fn throwing_info() -> CallableInfo {
    CallableInfo::function("Regress", "test_utf8_throws", "regress_test_utf8_throws")
        .arg(ArgInfo::input("flag", int()))
        .returns(TypeDescriptor::utf8())
        .return_transfer(Transfer::Everything)
        .throws()
}

#[test]
fn test_error_slot_plan() {
    let frame = build(throwing_info());
    assert_eq!(frame.arg_types(), vec![FfiType::I32, FfiType::Pointer]);
    assert_eq!(frame.pre_steps().last(), Some(&PreStep::NullErrorSlot));
    assert_eq!(frame.post_steps().last(), Some(&PostStep::CheckError));
}

#[test]
fn test_null_error_slot_returns_results() {
    let (native, rt) = plain_runtime();
    let frame = build(throwing_info());
    let text = NativeBuffer::from_str_nul("fine");
    let ptr = text.as_void_ptr() as usize;

    let ok = move |args: &[FfiValue]| unsafe {
        assert!((*(args[1].ptr as *const *mut c_void)).is_null());
        FfiValue::from_ptr(ptr as *mut c_void)
    };

    assert_eq!(frame.call(&rt, &ok, &[Value::Int(0)]).unwrap(), Value::from("fine"));
    assert_eq!(native.calls(), vec![NativeCall::Free(ptr)]);
}

#[test]
fn test_error_slot_raises_exact_record() {
    let (native, rt) = plain_runtime();
    native.register_quark(42, "regress-test-error");
    let frame = build(throwing_info());

    let message = NativeBuffer::from_str_nul("something went wrong");
    let record = error_record(42, 7, &message);
    let record_ptr = record.as_void_ptr() as usize;
    let text = NativeBuffer::from_str_nul("partial");
    let text_ptr = text.as_void_ptr() as usize;

    let fail = move |args: &[FfiValue]| unsafe {
        store(args[1], FfiType::Pointer, FfiValue::from_ptr(record_ptr as *mut c_void));
        FfiValue::from_ptr(text_ptr as *mut c_void)
    };

    let err = frame.call(&rt, &fail, &[Value::Int(1)]).unwrap_err();
    let MarshalError::Native(error) = err else {
        panic!("expected a native error");
    };
    assert_eq!(error.domain, 42);
    assert_eq!(error.domain_name.as_deref(), Some("regress-test-error"));
    assert_eq!(error.code, 7);
    assert_eq!(error.message, "something went wrong");

    // The owned return string was still converted and released first
    assert_eq!(
        native.calls(),
        vec![NativeCall::Free(text_ptr), NativeCall::FreeError(record_ptr)]
    );
}

#[test]
fn test_error_with_unknown_domain() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_gerror", "regress_test_gerror").throws(),
    );
    let message = NativeBuffer::from_str_nul("boom");
    let record = error_record(9, -1, &message);
    let record_ptr = record.as_void_ptr() as usize;
    let fail = move |args: &[FfiValue]| unsafe {
        store(args[0], FfiType::Pointer, FfiValue::from_ptr(record_ptr as *mut c_void));
        FfiValue::void()
    };

    let err = frame.call(&rt, &fail, &[]).unwrap_err();
    assert_eq!(err.to_string(), "domain 9 (-1): boom");
}

#[test]
fn test_error_slot_wins_over_failed_conversion() {
    let (native, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_doubles_throws", "regress_test_doubles_throws")
            .returns(TypeDescriptor::zero_terminated_array(TypeDescriptor::scalar(FfiType::F64)))
            .throws(),
    );
    let doubles = NativeBuffer::zeroed(16);
    let doubles_ptr = doubles.as_void_ptr() as usize;
    let message = NativeBuffer::from_str_nul("no doubles today");
    let record = error_record(3, 2, &message);
    let record_ptr = record.as_void_ptr() as usize;

    let fail = move |args: &[FfiValue]| unsafe {
        store(args[0], FfiType::Pointer, FfiValue::from_ptr(record_ptr as *mut c_void));
        FfiValue::from_ptr(doubles_ptr as *mut c_void)
    };

    let err = frame.call(&rt, &fail, &[]).unwrap_err();
    let MarshalError::Native(error) = err else {
        panic!("expected the native error");
    };
    assert_eq!(error.code, 2);
    assert_eq!(error.message, "no doubles today");
    assert_eq!(native.calls(), vec![NativeCall::FreeError(record_ptr)]);

    // Without an error record the conversion failure surfaces
    let succeed = move |_: &[FfiValue]| FfiValue::from_ptr(doubles_ptr as *mut c_void);
    let err = frame.call(&rt, &succeed, &[]).unwrap_err();
    assert!(matches!(err, MarshalError::InvalidArgument { .. }));
}

// ============================================================================
// Strings
// ============================================================================

fn utf8_return(transfer: Transfer) -> CallFrame {
    build(
        CallableInfo::function("Regress", "test_utf8_out", "regress_test_utf8_out")
            .returns(TypeDescriptor::utf8())
            .return_transfer(transfer),
    )
}

#[test]
fn test_utf8_return_transfer() {
    let (native, rt) = plain_runtime();
    let text = NativeBuffer::from_str_nul("héllo");
    let ptr = text.as_void_ptr() as usize;
    let give = move |_: &[FfiValue]| FfiValue::from_ptr(ptr as *mut c_void);

    assert_eq!(utf8_return(Transfer::Nothing).call(&rt, &give, &[]).unwrap(), Value::from("héllo"));
    assert!(native.calls().is_empty());

    assert_eq!(utf8_return(Transfer::Everything).call(&rt, &give, &[]).unwrap(), Value::from("héllo"));
    assert_eq!(native.calls(), vec![NativeCall::Free(ptr)]);
}

#[test]
fn test_null_string_return_is_nil_and_not_freed() {
    let (native, rt) = plain_runtime();
    let null = |_: &[FfiValue]| FfiValue::null();
    assert_eq!(utf8_return(Transfer::Everything).call(&rt, &null, &[]).unwrap(), Value::Nil);
    assert!(native.calls().is_empty());
}

#[test]
fn test_utf8_out_argument_transfer() {
    let (native, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_utf8_out_arg", "regress_test_utf8_out_arg")
            .arg(ArgInfo::output("out", TypeDescriptor::utf8()).with_transfer(Transfer::Everything)),
    );
    let text = NativeBuffer::from_str_nul("second");
    let ptr = text.as_void_ptr() as usize;
    let give = move |args: &[FfiValue]| {
        unsafe { store(args[0], FfiType::Pointer, FfiValue::from_ptr(ptr as *mut c_void)) };
        FfiValue::void()
    };

    assert_eq!(frame.host_arity(), 0);
    assert_eq!(frame.call(&rt, &give, &[]).unwrap(), Value::from("second"));
    assert_eq!(native.calls(), vec![NativeCall::Free(ptr)]);
}

#[test]
fn test_utf8_in_is_nul_terminated() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_utf8_len", "regress_test_utf8_len")
            .arg(ArgInfo::input("s", TypeDescriptor::utf8()))
            .returns(int()),
    );
    let len = |args: &[FfiValue]| unsafe {
        FfiValue {
            i32: CStr::from_ptr(args[0].ptr as *const c_char).to_bytes().len() as i32,
        }
    };
    assert_eq!(frame.call(&rt, &len, &[Value::from("const ♥ utf8")]).unwrap(), Value::Int(14));

    let err = frame.call(&rt, &len, &[Value::from("a\0b")]).unwrap_err();
    assert!(matches!(err, MarshalError::InvalidArgument { .. }));
}

// ============================================================================
// Zero-terminated arrays
// ============================================================================

#[test]
fn test_strv_in() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_strv_in", "regress_test_strv_in")
            .arg(ArgInfo::input("arr", TypeDescriptor::strv()))
            .returns(int()),
    );
    let count = |args: &[FfiValue]| unsafe {
        let base = args[0].ptr as *const *const c_char;
        let mut n = 0;
        while !(*base.add(n)).is_null() {
            n += 1;
        }
        let first = CStr::from_ptr(*base).to_bytes().len();
        FfiValue {
            i32: (n * 10 + first) as i32,
        }
    };
    let input = Value::from(vec!["1", "22", "333"]);
    assert_eq!(frame.call(&rt, &count, &[input]).unwrap(), Value::Int(31));
}

#[test]
fn test_strv_return() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_strv_out", "regress_test_strv_out")
            .returns(TypeDescriptor::strv()),
    );
    let a = NativeBuffer::from_str_nul("thanks");
    let b = NativeBuffer::from_str_nul("for all the fish");
    let array = NativeBuffer::zeroed(3 * WORD);
    unsafe {
        array.write(FfiType::Pointer, 0, FfiValue::from_ptr(a.as_void_ptr()));
        array.write(FfiType::Pointer, WORD, FfiValue::from_ptr(b.as_void_ptr()));
    }
    let ptr = array.as_void_ptr() as usize;
    let give = move |_: &[FfiValue]| FfiValue::from_ptr(ptr as *mut c_void);

    let Value::ZeroTerminated(strv) = frame.call(&rt, &give, &[]).unwrap() else {
        panic!("expected a zero-terminated array");
    };
    assert_eq!(strv.len().unwrap(), 2);
    assert_eq!(strv.to_vec().unwrap(), vec![Value::from("thanks"), Value::from("for all the fish")]);
}

#[test]
fn test_zero_terminated_int_round_trip() {
    let (_, rt) = plain_runtime();
    let element = int().shared();
    let array = ZeroTerminated::from_values(&rt, element, &ints(&[4, 5, 6])).unwrap();
    assert_eq!(array.len().unwrap(), 3);
    assert_eq!(array.get(2).unwrap(), Value::Int(6));
    assert!(array.get(3).is_err());
}

#[test]
fn test_zero_terminated_rejects_nil_and_floats() {
    let (_, rt) = plain_runtime();
    let err = ZeroTerminated::from_values(&rt, TypeDescriptor::utf8().shared(), &[Value::from("a"), Value::Nil]);
    assert!(err.is_err());

    let doubles = TypeDescriptor::scalar(FfiType::F64).shared();
    assert!(ZeroTerminated::from_values(&rt, doubles.clone(), &[Value::Float(1.5)]).is_err());

    let relaxed = MarshalConfig {
        validate_zero_terminated: false,
        ..MarshalConfig::default()
    };
    let rt = runtime_with_config(FakeRuntime::new(), Arc::new(ClassRegistry::new()), relaxed);
    let array = ZeroTerminated::from_values(&rt, doubles, &[Value::Float(1.5)]).unwrap();
    assert_eq!(array.to_vec().unwrap(), vec![Value::Float(1.5)]);
}

#[test]
fn test_zero_terminated_scan_limit_is_an_error() {
    let config = MarshalConfig {
        max_zero_terminated: 4,
        ..MarshalConfig::default()
    };
    let rt = runtime_with_config(FakeRuntime::new(), Arc::new(ClassRegistry::new()), config);
    let data = NativeBuffer::zeroed(9 * 4);
    for i in 0..8 {
        unsafe { data.write(FfiType::I32, i * 4, FfiValue { i32: 1 }) };
    }
    let array = ZeroTerminated::wrap(&rt, int().shared(), data.as_void_ptr()).unwrap().unwrap();
    assert!(matches!(array.len(), Err(MarshalError::InvalidArgument { .. })));
    assert!(array.to_vec().is_err());
    assert!(array.get(0).is_err());

    // Exactly at the limit still finds the terminator
    unsafe { data.write(FfiType::I32, 4 * 4, FfiValue { i32: 0 }) };
    assert_eq!(array.to_vec().unwrap(), ints(&[1, 1, 1, 1]));
}

#[test]
fn test_list_longer_than_limit_is_an_error() {
    let config = MarshalConfig {
        max_zero_terminated: 2,
        ..MarshalConfig::default()
    };
    let rt = runtime_with_config(FakeRuntime::new(), Arc::new(ClassRegistry::new()), config);
    let frame = build(
        CallableInfo::function("Regress", "test_gslist_echo", "regress_test_gslist_echo")
            .arg(ArgInfo::input("list", TypeDescriptor::gslist(int())))
            .returns(TypeDescriptor::gslist(int())),
    );
    let echo = |args: &[FfiValue]| FfiValue::from_ptr(unsafe { args[0].ptr });

    assert_eq!(frame.call(&rt, &echo, &[Value::from(vec![1, 2])]).unwrap(), Value::from(vec![1, 2]));
    let err = frame.call(&rt, &echo, &[Value::from(vec![1, 2, 3])]).unwrap_err();
    assert!(matches!(err, MarshalError::InvalidArgument { .. }));
}

// ============================================================================
// Lists and hash tables
// ============================================================================

#[test]
fn test_glist_round_trip() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_glist_echo", "regress_test_glist_echo")
            .arg(ArgInfo::input("list", TypeDescriptor::glist(int())))
            .returns(TypeDescriptor::glist(int())),
    );

    let walk = |args: &[FfiValue]| unsafe {
        // Second node links back to the head
        let head = args[0].ptr as *const u8;
        let second = *(head.add(WORD) as *const *const u8);
        assert_eq!(*(second.add(2 * WORD) as *const *const u8), head);
        args[0]
    };

    let input = Value::from(vec![1, -2, 3]);
    assert_eq!(frame.call(&rt, &walk, &[input.clone()]).unwrap(), input);
}

#[test]
fn test_gslist_of_strings_round_trip() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_gslist_echo", "regress_test_gslist_echo")
            .arg(ArgInfo::input("list", TypeDescriptor::gslist(TypeDescriptor::utf8())))
            .returns(TypeDescriptor::gslist(TypeDescriptor::utf8())),
    );
    let echo = |args: &[FfiValue]| args[0];
    let input = Value::from(vec!["1", "2", "3"]);
    assert_eq!(frame.call(&rt, &echo, &[input.clone()]).unwrap(), input);

    // An empty list is a null head
    let null_head = |args: &[FfiValue]| {
        assert!(unsafe { args[0].ptr }.is_null());
        args[0]
    };
    assert_eq!(
        frame.call(&rt, &null_head, &[Value::List(vec![])]).unwrap(),
        Value::List(vec![])
    );
}

#[test]
fn test_ghash_round_trip_releases_table() {
    let (native, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_ghash_echo", "regress_test_ghash_echo")
            .arg(ArgInfo::input("hash", TypeDescriptor::ghash(TypeDescriptor::utf8(), int())))
            .returns(TypeDescriptor::ghash(TypeDescriptor::utf8(), int())),
    );
    let echo = |args: &[FfiValue]| args[0];
    let input = Value::Map(vec![
        (Value::from("integer"), Value::Int(12)),
        (Value::from("negative"), Value::Int(-33)),
    ]);

    assert_eq!(frame.call(&rt, &echo, &[input.clone()]).unwrap(), input);
    let released = native
        .calls()
        .into_iter()
        .filter(|c| matches!(c, NativeCall::HashUnref(_)))
        .count();
    assert_eq!(released, 1);
}

#[test]
fn test_null_ghash_return_is_nil() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_ghash_null_return", "regress_test_ghash_null_return")
            .returns(TypeDescriptor::ghash(TypeDescriptor::utf8(), TypeDescriptor::utf8())),
    );
    let null = |_: &[FfiValue]| FfiValue::null();
    assert_eq!(frame.call(&rt, &null, &[]).unwrap(), Value::Nil);
}

#[test]
fn test_float_list_elements_rejected() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_glist_double", "regress_test_glist_double")
            .arg(ArgInfo::input("list", TypeDescriptor::glist(TypeDescriptor::scalar(FfiType::F64)))),
    );
    let nothing = |_: &[FfiValue]| FfiValue::void();
    assert!(frame.call(&rt, &nothing, &[Value::List(vec![Value::Float(1.0)])]).is_err());
}

// ============================================================================
// Byte arrays
// ============================================================================

#[test]
fn test_byte_array_in_and_out() {
    let (_, rt) = plain_runtime();
    let frame = build(
        CallableInfo::function("Regress", "test_byte_array_echo", "regress_test_byte_array_echo")
            .arg(ArgInfo::input("bytes", TypeDescriptor::byte_array()))
            .returns(TypeDescriptor::byte_array()),
    );
    let echo = |args: &[FfiValue]| args[0];
    let bytes = crate::overrides::ByteArray::new(&rt).unwrap().append("some data").unwrap();

    let result = frame.call(&rt, &echo, &[Value::ByteArray(bytes.clone())]).unwrap();
    let Value::ByteArray(out) = result else {
        panic!("expected a byte array");
    };
    assert_eq!(out.to_string(), "some data");
    assert_eq!(out, bytes);

    assert!(frame.call(&rt, &echo, &[Value::from("text")]).is_err());
}

// ============================================================================
// Frame validation
// ============================================================================

#[test]
fn test_bad_length_references_rejected() {
    let array = || TypeDescriptor::length_array(int());

    let out_of_range = CallableInfo::function("Regress", "f", "f").arg(ArgInfo::input("a", array()).with_length(3));
    let own_length = CallableInfo::function("Regress", "f", "f").arg(ArgInfo::input("a", array()).with_length(0));
    let not_integer = CallableInfo::function("Regress", "f", "f")
        .arg(ArgInfo::input("a", array()).with_length(1))
        .arg(ArgInfo::input("n", TypeDescriptor::utf8()));
    let bad_return = CallableInfo::function("Regress", "f", "f")
        .returns(array())
        .return_length(0);

    for info in [out_of_range, own_length, not_integer, bad_return] {
        let err = CallFrame::build(&info).unwrap_err();
        assert!(matches!(err, MarshalError::Setup { .. }), "{:?}", err);
    }
}

#[test]
fn test_storage_counts_allocations() {
    let (_, rt) = plain_runtime();
    let mut storage = rt.storage();
    assert_eq!(storage.allocation_count(), 0);
    let _ = storage.alloc(16);
    let _ = storage.string("abc");
    assert_eq!(storage.allocation_count(), 2);
}
