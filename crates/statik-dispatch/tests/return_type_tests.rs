//! Return Type Tests
//!
//! Declared return types enforced on replaced members: primitive ranges,
//! optional and exact types, and results of coroutines.
//!
//! Run with: cargo test -p statik-dispatch --test return_type_tests

use futures::executor::block_on;
use statik_dispatch::{
    Awaitable, Builtins, ClassBuilder, ClassRef, Function, Instance, PrimitiveKind, Runtime,
    RuntimeOptions, Signature, TypeSpec, Value,
};

fn compiled_returning(spec: TypeSpec, result: Value) -> Value {
    Function::compiled("f", Signature::new().receiver().returns(spec), move |_, _| {
        Ok(result.clone())
    })
    .into_value()
}

fn dynamic(result: Value) -> Value {
    Function::new("f", move |_, _| Ok(result.clone())).into_value()
}

fn class_with(rt: &Runtime, spec: TypeSpec, result: Value) -> ClassRef {
    rt.define_class(
        "m",
        ClassBuilder::new("C")
            .static_class()
            .member("f", compiled_returning(spec, result)),
    )
    .unwrap()
}

fn call_patched(rt: &Runtime, class: &ClassRef, result: Value) -> statik_dispatch::DispatchResult<Value> {
    rt.set_member(class, "f", dynamic(result)).unwrap();
    rt.call_method(&Value::Instance(Instance::new(class)), "f", vec![])
}

// =============================================================================
// PRIMITIVES
// =============================================================================

#[test]
fn test_int8_range() {
    let rt = Runtime::new();
    let int8 = TypeSpec::new(Builtins::get().primitive(PrimitiveKind::Int8));
    let class = class_with(&rt, int8, Value::Int(0));
    assert!(matches!(call_patched(&rt, &class, Value::Int(-128)), Ok(Value::Int(-128))));
    let err = call_patched(&rt, &class, Value::Int(300)).unwrap_err();
    assert!(err.is_overflow_error());
    assert_eq!(
        err.to_string(),
        "OverflowError: unexpected return type from C.f, expected int8, got out-of-range int (300)"
    );
}

#[test]
fn test_every_integral_kind_bounds() {
    for kind in PrimitiveKind::INTEGRAL {
        let Some((min, max)) = kind.bounds() else {
            panic!("{} has no bounds", kind.name());
        };
        let rt = Runtime::new();
        let class = class_with(&rt, TypeSpec::new(Builtins::get().primitive(kind)), Value::Int(0));
        for value in [min, max] {
            let result = call_patched(&rt, &class, Value::Int(value));
            assert!(result.is_ok(), "{} rejected {}", kind.name(), value);
        }
        for value in [min - 1, max + 1] {
            let result = call_patched(&rt, &class, Value::Int(value));
            assert!(
                matches!(&result, Err(err) if err.is_overflow_error()),
                "{} accepted {}",
                kind.name(),
                value
            );
        }
    }
}

#[test]
fn test_unsigned_rejects_negative() {
    let rt = Runtime::new();
    let uint16 = TypeSpec::new(Builtins::get().primitive(PrimitiveKind::UInt16));
    let class = class_with(&rt, uint16, Value::Int(0));
    assert!(call_patched(&rt, &class, Value::Int(65535)).is_ok());
    assert!(call_patched(&rt, &class, Value::Int(-1)).unwrap_err().is_overflow_error());
    assert!(call_patched(&rt, &class, Value::str("1")).unwrap_err().is_type_error());
}

#[test]
fn test_int64_accepts_bool() {
    let rt = Runtime::new();
    let int64 = TypeSpec::new(Builtins::get().primitive(PrimitiveKind::Int64));
    let class = class_with(&rt, int64, Value::Int(0));
    assert!(call_patched(&rt, &class, Value::Bool(true)).is_ok());
    assert!(call_patched(&rt, &class, Value::Int(i128::from(i64::MAX) + 1))
        .unwrap_err()
        .is_overflow_error());
}

#[test]
fn test_void_returns_none() {
    let rt = Runtime::new();
    let void = TypeSpec::new(Builtins::get().primitive(PrimitiveKind::Void));
    let class = class_with(&rt, void, Value::None);
    let result = call_patched(&rt, &class, Value::Int(42)).unwrap();
    assert!(result.is_none());
}

// =============================================================================
// OBJECT TYPES
// =============================================================================

#[test]
fn test_optional_accepts_none() {
    let rt = Runtime::new();
    let class = class_with(&rt, TypeSpec::optional(&Builtins::get().str_), Value::None);
    assert!(call_patched(&rt, &class, Value::None).unwrap().is_none());
    assert!(call_patched(&rt, &class, Value::str("s")).is_ok());
    let err = call_patched(&rt, &class, Value::Int(1)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "TypeError: unexpected return type from C.f, expected Optional[str], got int"
    );
}

#[test]
fn test_subclass_instances_accepted_unless_exact() {
    let rt = Runtime::new();
    let animal = rt.define_class("zoo", ClassBuilder::new("Animal")).unwrap();
    let dog = rt.define_class("zoo", ClassBuilder::new("Dog").base(&animal)).unwrap();
    let a_dog = Value::Instance(Instance::new(&dog));

    let loose = class_with(&rt, TypeSpec::new(&animal), Value::None);
    assert!(call_patched(&rt, &loose, a_dog.clone()).is_ok());

    let exact = rt
        .define_class(
            "m",
            ClassBuilder::new("Strict")
                .static_class()
                .member("f", compiled_returning(TypeSpec::new(&animal).exact(), Value::None)),
        )
        .unwrap();
    let err = call_patched(&rt, &exact, a_dog).unwrap_err();
    assert!(err.is_type_error());
}

#[test]
fn test_unpatched_member_is_not_checked() {
    let rt = Runtime::new();
    let class = class_with(&rt, TypeSpec::new(&Builtins::get().int), Value::str("lies"));
    let result = rt
        .call_method(&Value::Instance(Instance::new(&class)), "f", vec![])
        .unwrap();
    assert!(result.is(&Value::str("lies")));
}

// =============================================================================
// COROUTINES
// =============================================================================

fn async_class(rt: &Runtime) -> ClassRef {
    let original = Function::compiled(
        "fetch",
        Signature::new().receiver().returns(TypeSpec::new(&Builtins::get().int)),
        |_, _| Ok(Awaitable::ready(Value::Int(1)).into_value()),
    )
    .coroutine()
    .into_value();
    rt.define_class("m", ClassBuilder::new("Client").static_class().member("fetch", original))
        .unwrap()
}

fn await_value(value: Value) -> statik_dispatch::DispatchResult<Value> {
    match value {
        Value::Awaitable(awaitable) => block_on(awaitable.wait()),
        other => panic!("expected an awaitable, got {:?}", other),
    }
}

#[test]
fn test_coroutine_result_checked_when_awaited() {
    let rt = Runtime::new();
    let class = async_class(&rt);
    let patched = Function::new("fetch", |_, _| {
        Ok(Awaitable::pending(async { Ok(Value::str("nope")) }).into_value())
    })
    .into_value();
    rt.set_member(&class, "fetch", patched).unwrap();
    let receiver = Value::Instance(Instance::new(&class));
    let awaitable = rt.call_method(&receiver, "fetch", vec![]).unwrap();
    let err = await_value(awaitable).unwrap_err();
    assert!(err.is_type_error());
}

#[test]
fn test_coroutine_good_result_passes() {
    let rt = Runtime::new();
    let class = async_class(&rt);
    let patched = Function::new("fetch", |_, _| {
        Ok(Awaitable::pending(async { Ok(Value::Int(5)) }).into_value())
    })
    .into_value();
    rt.set_member(&class, "fetch", patched).unwrap();
    let receiver = Value::Instance(Instance::new(&class));
    let awaitable = rt.call_method(&receiver, "fetch", vec![]).unwrap();
    assert!(matches!(await_value(awaitable), Ok(Value::Int(5))));
}

#[test]
fn test_eager_shortcut_checks_ready_result() {
    let rt = Runtime::new();
    let class = async_class(&rt);
    let patched = Function::new("fetch", |_, _| {
        Ok(Awaitable::ready(Value::str("nope")).into_value())
    })
    .into_value();
    rt.set_member(&class, "fetch", patched).unwrap();
    let receiver = Value::Instance(Instance::new(&class));
    let value = rt.call_method(&receiver, "fetch", vec![]).unwrap();
    match &value {
        Value::Awaitable(awaitable) => assert!(awaitable.is_ready()),
        other => panic!("expected an awaitable, got {:?}", other),
    }
    assert!(await_value(value).unwrap_err().is_type_error());
}

#[test]
fn test_plain_result_from_patched_coroutine_is_wrapped() {
    let rt = Runtime::with_options(RuntimeOptions::default().with_eager_await_shortcut(false));
    let class = async_class(&rt);
    rt.set_member(&class, "fetch", dynamic(Value::Int(3))).unwrap();
    let receiver = Value::Instance(Instance::new(&class));
    let value = rt.call_method(&receiver, "fetch", vec![]).unwrap();
    assert!(matches!(await_value(value), Ok(Value::Int(3))));
}
