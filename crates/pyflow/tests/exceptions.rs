//! Exception regions across the block-stack and zero-cost layouts.

use std::rc::Rc;

use pretty_assertions::assert_eq;
use pyflow::{
    ClassDescriptor, Constant, ExcType, FunctionDescriptor, PythonVersion, TranslateConfig,
    runtime::{Globals, Runtime, Value},
    translate_class, translate_function,
    types::NoHints,
};

fn define(globals: &Rc<Globals>, descriptor: &FunctionDescriptor) -> Value {
    let code = translate_function(descriptor, &TranslateConfig::default(), &NoHints).unwrap();
    Value::Function(globals.define_function(code))
}

/// ```python
/// def parse(x):
///     try:
///         return int(x)
///     except ValueError:
///         return -1
/// ```
/// as compiled by 3.10.
fn legacy_parse() -> FunctionDescriptor {
    FunctionDescriptor::builder("parse", PythonVersion::V3_10)
        .params(&["x"])
        .names(&["int", "ValueError"])
        .constants(vec![Constant::None, Constant::Int(-1)])
        .op("SETUP_FINALLY", 5)
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_FAST", 0)
        .op("CALL_FUNCTION", 1)
        .op("POP_BLOCK", 0)
        .op("RETURN_VALUE", 0)
        .op("DUP_TOP", 0)
        .op("LOAD_GLOBAL", 1)
        .op("JUMP_IF_NOT_EXC_MATCH", 15)
        .op("POP_TOP", 0)
        .op("POP_TOP", 0)
        .op("POP_TOP", 0)
        .op("POP_EXCEPT", 0)
        .op("LOAD_CONST", 1)
        .op("RETURN_VALUE", 0)
        .op("RERAISE", 0)
        .build()
}

/// The same function as compiled by 3.11, with the exception table
/// expressed as region pseudo-instructions.
fn modern_parse() -> FunctionDescriptor {
    FunctionDescriptor::builder("parse", PythonVersion::V3_11)
        .params(&["x"])
        .names(&["int", "ValueError"])
        .constants(vec![Constant::None, Constant::Int(-1)])
        .op("RESUME", 0)
        .op("NOP", 0)
        .op("SETUP_FINALLY", 19)
        .op("LOAD_GLOBAL", 1)
        .caches(5)
        .op("LOAD_FAST", 0)
        .op("PRECALL", 1)
        .caches(1)
        .op("CALL", 1)
        .caches(4)
        .op("POP_BLOCK", 0)
        .op("RETURN_VALUE", 0)
        .op("SETUP_CLEANUP", 36)
        .op("PUSH_EXC_INFO", 0)
        .op("LOAD_GLOBAL", 2)
        .caches(5)
        .op("CHECK_EXC_MATCH", 0)
        .op("POP_JUMP_FORWARD_IF_FALSE", 6)
        .op("POP_TOP", 0)
        .op("POP_BLOCK", 0)
        .op("LOAD_CONST", 1)
        .op("SWAP", 2)
        .op("POP_EXCEPT", 0)
        .op("RETURN_VALUE", 0)
        .op("RERAISE", 0)
        .op("COPY", 3)
        .op("POP_EXCEPT", 0)
        .op("RERAISE", 1)
        .build()
}

fn check_parse(descriptor: &FunctionDescriptor) {
    let globals = Globals::new();
    let parse = define(&globals, descriptor);
    let mut runtime = Runtime::default();

    let ok = runtime.call(&parse, vec![Value::from("12")], Vec::new()).unwrap();
    assert_eq!(ok, Value::Int(12));

    let caught = runtime.call(&parse, vec![Value::from("twelve")], Vec::new()).unwrap();
    assert_eq!(caught, Value::Int(-1));

    let err = runtime.call(&parse, vec![Value::list(Vec::new())], Vec::new()).unwrap_err();
    assert!(err.is(ExcType::TypeError), "{err}");
    assert_eq!(
        err.message(),
        "int() argument must be a string, a bytes-like object or a real number, not 'list'"
    );
}

/// A matching `except` clause handles the error under the six-value layout.
#[test]
fn legacy_try_except() {
    check_parse(&legacy_parse());
}

/// A matching `except` clause handles the error under the exception-table
/// layout; a mismatch reraises through the cleanup region.
#[test]
fn modern_try_except() {
    check_parse(&modern_parse());
}

/// `raise ValueError("bad")` surfaces as a Python exception with its message.
#[test]
fn raise_propagates_to_the_caller() {
    let fail = FunctionDescriptor::builder("fail", PythonVersion::V3_12)
        .names(&["ValueError"])
        .constants(vec![Constant::None, Constant::from("bad")])
        .op("RESUME", 0)
        .op("LOAD_GLOBAL", 1)
        .caches(4)
        .op("LOAD_CONST", 1)
        .op("CALL", 1)
        .caches(3)
        .op("RAISE_VARARGS", 1)
        .build();
    let globals = Globals::new();
    let function = define(&globals, &fail);
    let err = Runtime::default().call(&function, Vec::new(), Vec::new()).unwrap_err();
    assert!(err.is(ExcType::ValueError));
    assert!(err.is(ExcType::Exception));
    assert!(!err.is(ExcType::TypeError));
    assert_eq!(err.to_string(), "ValueError: bad");
}

/// Runtime errors from builtin operations carry CPython's messages.
#[test]
fn division_by_zero_is_a_python_exception() {
    let divide = FunctionDescriptor::builder("divide", PythonVersion::V3_10)
        .params(&["a", "b"])
        .op("LOAD_FAST", 0)
        .op("LOAD_FAST", 1)
        .op("BINARY_FLOOR_DIVIDE", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let globals = Globals::new();
    let function = define(&globals, &divide);
    let mut runtime = Runtime::default();
    assert_eq!(
        runtime.call(&function, vec![Value::Int(-7), Value::Int(2)], Vec::new()).unwrap(),
        Value::Int(-4)
    );
    let err = runtime
        .call(&function, vec![Value::Int(1), Value::Int(0)], Vec::new())
        .unwrap_err();
    assert!(err.is(ExcType::ZeroDivisionError));
    assert!(err.is(ExcType::ArithmeticError));
}

/// ```python
/// class Guard:
///     def __init__(self, suppress): self.suppress = suppress; self.exited = None
///     def __enter__(self): return self
///     def __exit__(self, t, v, tb): self.exited = t; return self.suppress
/// ```
fn guard() -> ClassDescriptor {
    let method = |name: &str| FunctionDescriptor::builder(name, PythonVersion::V3_10).qualname(&format!("Guard.{name}"));
    let init = method("__init__")
        .params(&["self", "suppress"])
        .names(&["suppress", "exited"])
        .constants(vec![Constant::None])
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("STORE_ATTR", 0)
        .op("LOAD_CONST", 0)
        .op("LOAD_FAST", 0)
        .op("STORE_ATTR", 1)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let enter = method("__enter__")
        .params(&["self"])
        .op("LOAD_FAST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let exit = method("__exit__")
        .params(&["self", "t", "v", "tb"])
        .names(&["exited", "suppress"])
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("STORE_ATTR", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_ATTR", 1)
        .op("RETURN_VALUE", 0)
        .build();
    let mut class = ClassDescriptor::new("Guard");
    class.instance_methods = vec![init, enter, exit];
    class
}

/// ```python
/// def guarded(cm, fail):
///     with cm:
///         if fail:
///             raise ValueError("inner")
///     return "done"
/// ```
/// as compiled by 3.10.
fn guarded() -> FunctionDescriptor {
    FunctionDescriptor::builder("guarded", PythonVersion::V3_10)
        .params(&["cm", "fail"])
        .names(&["ValueError"])
        .constants(vec![Constant::None, Constant::from("inner"), Constant::from("done")])
        .op("LOAD_FAST", 0)
        .op("SETUP_WITH", 15)
        .op("POP_TOP", 0)
        .op("LOAD_FAST", 1)
        .op("POP_JUMP_IF_FALSE", 9)
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_CONST", 1)
        .op("CALL_FUNCTION", 1)
        .op("RAISE_VARARGS", 1)
        .op("POP_BLOCK", 0)
        .op("LOAD_CONST", 0)
        .op("DUP_TOP", 0)
        .op("DUP_TOP", 0)
        .op("CALL_FUNCTION", 3)
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 2)
        .op("RETURN_VALUE", 0)
        .op("WITH_EXCEPT_START", 0)
        .op("POP_JUMP_IF_TRUE", 20)
        .op("RERAISE", 1)
        .op("POP_TOP", 0)
        .op("POP_TOP", 0)
        .op("POP_TOP", 0)
        .op("POP_EXCEPT", 0)
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 2)
        .op("RETURN_VALUE", 0)
        .build()
}

/// `__exit__` runs on normal exit and on error; a truthy result swallows the error.
#[test]
fn with_calls_exit_on_both_paths() {
    let globals = Globals::new();
    let compiled = translate_class(&guard(), &TranslateConfig::default(), &NoHints).unwrap();
    let class = Value::Class(globals.define_class(&compiled).unwrap());
    let function = define(&globals, &guarded());
    let mut runtime = Runtime::default();

    let mut run = |suppress: bool, fail: bool| {
        let manager = runtime.call(&class, vec![Value::Bool(suppress)], Vec::new()).unwrap();
        let result = runtime.call(&function, vec![manager.clone(), Value::Bool(fail)], Vec::new());
        let Value::Instance(instance) = manager else {
            panic!("expected an instance, got {manager:?}");
        };
        (result, instance.attr("exited"))
    };

    let (result, exited) = run(false, false);
    assert_eq!(result.unwrap(), Value::from("done"));
    assert_eq!(exited, Some(Value::None));

    let (result, exited) = run(true, true);
    assert_eq!(result.unwrap(), Value::from("done"));
    assert_eq!(exited, Some(Value::ExcClass(ExcType::ValueError)));

    let (result, exited) = run(false, true);
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "ValueError: inner");
    assert_eq!(exited, Some(Value::ExcClass(ExcType::ValueError)));
}
