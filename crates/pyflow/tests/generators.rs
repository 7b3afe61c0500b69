//! Generator functions: suspension, resumption, `send` and `close`.

use std::rc::Rc;

use pretty_assertions::assert_eq;
use pyflow::{
    Constant, ExcType, FunctionDescriptor, PythonVersion, TranslateConfig, translate_function,
    runtime::{Generator, GeneratorState, Globals, Runtime, Value},
    types::{Builtin, NoHints},
};

fn call_generator(descriptor: &FunctionDescriptor, args: Vec<Value>) -> Rc<Generator> {
    let code = translate_function(descriptor, &TranslateConfig::default(), &NoHints).unwrap();
    assert!(code.is_generator());
    let globals = Globals::new();
    let function = Value::Function(globals.define_function(code));
    match Runtime::default().call(&function, args, Vec::new()).unwrap() {
        Value::Generator(generator) => generator,
        other => panic!("expected a generator, got {other:?}"),
    }
}

/// `def squares(n): for i in range(n): yield i * i` as compiled by 3.10.
fn squares() -> FunctionDescriptor {
    FunctionDescriptor::builder("squares", PythonVersion::V3_10)
        .params(&["n"])
        .locals(&["i"])
        .names(&["range"])
        .constants(vec![Constant::None])
        .generator()
        .op("GEN_START", 0)
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_FAST", 0)
        .op("CALL_FUNCTION", 1)
        .op("GET_ITER", 0)
        .op("FOR_ITER", 7)
        .op("STORE_FAST", 1)
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 1)
        .op("BINARY_MULTIPLY", 0)
        .op("YIELD_VALUE", 0)
        .op("POP_TOP", 0)
        .op("JUMP_ABSOLUTE", 5)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build()
}

/// ```python
/// def running_total():
///     total = 0
///     while True:
///         x = yield total
///         total += x
/// ```
/// as compiled by 3.11.
fn running_total() -> FunctionDescriptor {
    FunctionDescriptor::builder("running_total", PythonVersion::V3_11)
        .locals(&["total", "x"])
        .constants(vec![Constant::None, Constant::Int(0)])
        .generator()
        .op("RETURN_GENERATOR", 0)
        .op("POP_TOP", 0)
        .op("RESUME", 0)
        .op("LOAD_CONST", 1)
        .op("STORE_FAST", 0)
        .op("NOP", 0)
        .op("LOAD_FAST", 0)
        .op("YIELD_VALUE", 0)
        .op("RESUME", 1)
        .op("STORE_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("LOAD_FAST", 1)
        .op("BINARY_OP", 13)
        .caches(1)
        .op("STORE_FAST", 0)
        .op("JUMP_BACKWARD", 10)
        .build()
}

/// Each `next` runs the body to the following yield; the end raises `StopIteration`.
#[test]
fn legacy_generator_yields_in_order() {
    let generator = call_generator(&squares(), vec![Value::Int(4)]);
    assert_eq!(generator.state(), GeneratorState::Created);

    let mut runtime = Runtime::default();
    let mut seen = Vec::new();
    loop {
        match runtime.next(&generator) {
            Ok(value) => seen.push(value),
            Err(err) => {
                assert!(err.is(ExcType::StopIteration), "{err}");
                break;
            }
        }
    }
    assert_eq!(seen, vec![Value::Int(0), Value::Int(1), Value::Int(4), Value::Int(9)]);
    assert_eq!(generator.state(), GeneratorState::Exhausted);

    // Exhausted generators keep raising.
    assert!(runtime.next(&generator).unwrap_err().is(ExcType::StopIteration));
}

/// Builtins consume generators through the iterator protocol.
#[test]
fn builtins_drain_generators() {
    let generator = call_generator(&squares(), vec![Value::Int(5)]);
    let mut runtime = Runtime::default();
    let total = runtime
        .call(&Value::Builtin(Builtin::Sum), vec![Value::Generator(generator)], Vec::new())
        .unwrap();
    assert_eq!(total, Value::Int(30));
}

/// Sent values become the result of the pending `yield`.
#[test]
fn send_feeds_the_suspended_yield() {
    let generator = call_generator(&running_total(), Vec::new());

    let err = generator.send(Value::Int(1)).unwrap_err();
    assert!(err.is(ExcType::TypeError));
    assert_eq!(err.message(), "can't send non-None value to a just-started generator");

    assert_eq!(generator.next().unwrap(), Value::Int(0));
    assert_eq!(generator.state(), GeneratorState::Suspended);
    assert_eq!(generator.send(Value::Int(5)).unwrap(), Value::Int(5));
    assert_eq!(generator.send(Value::Int(10)).unwrap(), Value::Int(15));

    generator.close().unwrap();
    assert_eq!(generator.state(), GeneratorState::Exhausted);
}

/// An exception thrown in at the yield propagates out of an unprotected body.
#[test]
fn throw_raises_at_the_yield() {
    let generator = call_generator(&running_total(), Vec::new());
    assert_eq!(generator.next().unwrap(), Value::Int(0));
    let err = generator.throw(ExcType::KeyError.error("boom")).unwrap_err();
    assert!(err.is(ExcType::KeyError));
    assert_eq!(generator.state(), GeneratorState::Exhausted);
}

/// Closing a suspended generator finishes it quietly.
#[test]
fn close_before_exhaustion() {
    let generator = call_generator(&squares(), vec![Value::Int(3)]);
    let mut runtime = Runtime::default();
    assert_eq!(runtime.next(&generator).unwrap(), Value::Int(0));
    assert_eq!(runtime.next(&generator).unwrap(), Value::Int(1));

    generator.close().unwrap();
    assert_eq!(generator.state(), GeneratorState::Exhausted);
    assert!(runtime.next(&generator).unwrap_err().is(ExcType::StopIteration));
}

/// `def reentrant(): yield next(gen)` with `gen` bound to the generator itself.
#[test]
fn resuming_a_running_generator_is_a_value_error() {
    let reentrant = FunctionDescriptor::builder("reentrant", PythonVersion::V3_10)
        .names(&["next", "gen"])
        .constants(vec![Constant::None])
        .generator()
        .op("GEN_START", 0)
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_GLOBAL", 1)
        .op("CALL_FUNCTION", 1)
        .op("YIELD_VALUE", 0)
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let code = translate_function(&reentrant, &TranslateConfig::default(), &NoHints).unwrap();
    let globals = Globals::new();
    let function = Value::Function(globals.define_function(code));
    let mut runtime = Runtime::default();
    let Value::Generator(generator) = runtime.call(&function, Vec::new(), Vec::new()).unwrap() else {
        panic!("expected a generator");
    };
    globals.set("gen", Value::Generator(generator.clone()));

    let err = runtime.next(&generator).unwrap_err();
    assert!(err.is(ExcType::ValueError), "{err}");
    assert_eq!(err.message(), "generator already executing");
    assert_eq!(generator.state(), GeneratorState::Exhausted);
}
