//! End-to-end translation and execution of small functions.

use std::{rc::Rc, sync::Arc};

use num_bigint::BigInt;
use pretty_assertions::assert_eq;
use pyflow::{
    CompiledCode, Constant, ExcType, FunctionDescriptor, PythonVersion, RuntimeLimits, TranslateConfig,
    runtime::{Globals, Runtime, Value},
    translate_function,
    types::NoHints,
};

/// Routes translation logs to the test harness; set `RUST_LOG=pyflow=debug` to see them.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn compile(descriptor: &FunctionDescriptor) -> Arc<CompiledCode> {
    init_logging();
    translate_function(descriptor, &TranslateConfig::default(), &NoHints).unwrap()
}

fn define(globals: &Rc<Globals>, descriptor: &FunctionDescriptor) -> Value {
    Value::Function(globals.define_function(compile(descriptor)))
}

/// `def sum_to(n: int): total = 0; for i in range(n): total += i; return total`
fn sum_to() -> FunctionDescriptor {
    FunctionDescriptor::builder("sum_to", PythonVersion::V3_10)
        .params(&["n"])
        .locals(&["total", "i"])
        .names(&["range"])
        .constants(vec![Constant::None, Constant::Int(0)])
        .annotation("n", "int")
        .op("LOAD_CONST", 1)
        .op("STORE_FAST", 1)
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_FAST", 0)
        .op("CALL_FUNCTION", 1)
        .op("GET_ITER", 0)
        .op("FOR_ITER", 6)
        .op("STORE_FAST", 2)
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 2)
        .op("INPLACE_ADD", 0)
        .op("STORE_FAST", 1)
        .op("JUMP_ABSOLUTE", 6)
        .op("LOAD_FAST", 1)
        .op("RETURN_VALUE", 0)
        .build()
}

/// `def fact(n): return 1 if n <= 1 else n * fact(n - 1)`
fn fact() -> FunctionDescriptor {
    FunctionDescriptor::builder("fact", PythonVersion::V3_10)
        .params(&["n"])
        .names(&["fact"])
        .constants(vec![Constant::None, Constant::Int(1)])
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 1)
        .op("COMPARE_OP", 1)
        .op("POP_JUMP_IF_FALSE", 6)
        .op("LOAD_CONST", 1)
        .op("RETURN_VALUE", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 1)
        .op("BINARY_SUBTRACT", 0)
        .op("CALL_FUNCTION", 1)
        .op("BINARY_MULTIPLY", 0)
        .op("RETURN_VALUE", 0)
        .build()
}

/// A `for` loop over `range` sums to the triangular number.
#[test]
fn loop_over_range() {
    let globals = Globals::new();
    let function = define(&globals, &sum_to());
    let mut runtime = Runtime::default();
    let result = runtime.call(&function, vec![Value::Int(10)], Vec::new()).unwrap();
    assert_eq!(result, Value::Int(45));
}

/// Recursive calls resolve the function through globals and promote to big
/// integers once the product leaves the machine range.
#[test]
fn recursion_promotes_to_big_integers() {
    let globals = Globals::new();
    let function = define(&globals, &fact());
    let mut runtime = Runtime::default();

    let small = runtime.call(&function, vec![Value::Int(20)], Vec::new()).unwrap();
    assert_eq!(small, Value::Int(2_432_902_008_176_640_000));

    let big = runtime.call(&function, vec![Value::Int(25)], Vec::new()).unwrap();
    let expected: BigInt = "15511210043330985984000000".parse().unwrap();
    assert_eq!(big, Value::from_bigint(expected));
}

/// Exceeding the recursion limit raises a catchable `RecursionError`.
#[test]
fn recursion_limit_is_enforced() {
    let globals = Globals::new();
    let function = define(&globals, &fact());
    let limits = RuntimeLimits {
        max_recursion_depth: 10,
        ..RuntimeLimits::default()
    };
    let mut runtime = Runtime::new(limits);
    let err = runtime.call(&function, vec![Value::Int(50)], Vec::new()).unwrap_err();
    assert!(err.is(ExcType::RecursionError), "{err}");

    // The depth counter unwinds with the error.
    let ok = runtime.call(&function, vec![Value::Int(5)], Vec::new()).unwrap();
    assert_eq!(ok, Value::Int(120));
}

/// `def sign(a): return 10 if a < 5 else -10`
#[test]
fn straight_line_branch() {
    let sign = FunctionDescriptor::builder("sign", PythonVersion::V3_10)
        .params(&["a"])
        .constants(vec![Constant::None, Constant::Int(5), Constant::Int(10), Constant::Int(-10)])
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 1)
        .op("COMPARE_OP", 0)
        .op("POP_JUMP_IF_FALSE", 6)
        .op("LOAD_CONST", 2)
        .op("RETURN_VALUE", 0)
        .op("LOAD_CONST", 3)
        .op("RETURN_VALUE", 0)
        .build();
    let globals = Globals::new();
    let function = define(&globals, &sign);
    let mut runtime = Runtime::default();
    assert_eq!(runtime.call(&function, vec![Value::Int(1)], Vec::new()).unwrap(), Value::Int(10));
    assert_eq!(runtime.call(&function, vec![Value::Int(10)], Vec::new()).unwrap(), Value::Int(-10));
}

/// `def split(seq): a, b, *rest = seq; return a, b, rest` as compiled by 3.12.
#[test]
fn unpack_with_tail() {
    let split = FunctionDescriptor::builder("split", PythonVersion::V3_12)
        .params(&["seq"])
        .locals(&["a", "b", "rest"])
        .constants(vec![Constant::None])
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("UNPACK_EX", 2)
        .op("STORE_FAST", 1)
        .op("STORE_FAST", 2)
        .op("STORE_FAST", 3)
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 2)
        .op("LOAD_FAST", 3)
        .op("BUILD_TUPLE", 3)
        .op("RETURN_VALUE", 0)
        .build();
    let globals = Globals::new();
    let function = define(&globals, &split);
    let seq = Value::tuple((1..=5).map(Value::Int).collect());
    let result = Runtime::default().call(&function, vec![seq], Vec::new()).unwrap();
    assert_eq!(
        result,
        Value::tuple(vec![
            Value::Int(1),
            Value::Int(2),
            Value::list(vec![Value::Int(3), Value::Int(4), Value::Int(5)]),
        ])
    );

    let err = Runtime::default()
        .call(&function, vec![Value::tuple(vec![Value::Int(1)])], Vec::new())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "ValueError: not enough values to unpack (expected at least 2, got 1)"
    );
}

/// Arity errors name the function and every missing parameter.
#[test]
fn missing_arguments_are_named() {
    let clamp = FunctionDescriptor::builder("clamp", PythonVersion::V3_11)
        .params(&["x", "lo", "hi"])
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let globals = Globals::new();
    let function = define(&globals, &clamp);
    let mut runtime = Runtime::default();

    let err = runtime.call(&function, vec![Value::Int(1)], Vec::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "TypeError: clamp() missing 2 required positional arguments: 'lo' and 'hi'"
    );

    let err = runtime
        .call(&function, vec![Value::Int(1); 4], Vec::new())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "TypeError: clamp() takes 3 positional arguments but 4 were given"
    );
}

/// The operation budget stops long-running loops.
#[test]
fn operation_limit_is_enforced() {
    let globals = Globals::new();
    let function = define(&globals, &sum_to());
    let limits = RuntimeLimits {
        max_operations: Some(200),
        ..RuntimeLimits::default()
    };
    let mut runtime = Runtime::new(limits);
    let err = runtime.call(&function, vec![Value::Int(1_000_000)], Vec::new()).unwrap_err();
    assert!(err.is(ExcType::TimeoutError), "{err}");
    assert_eq!(err.to_string(), "TimeoutError: operation limit exceeded: 201 > 200");
}

/// Keyword arguments bind by parameter name.
#[test]
fn keyword_arguments_bind_by_name() {
    let sub = FunctionDescriptor::builder("sub", PythonVersion::V3_10)
        .params(&["a", "b"])
        .op("LOAD_FAST", 0)
        .op("LOAD_FAST", 1)
        .op("BINARY_SUBTRACT", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let globals = Globals::new();
    let function = define(&globals, &sub);
    let mut runtime = Runtime::default();

    let result = runtime
        .call(&function, vec![Value::Int(10)], vec![("b".to_owned(), Value::Int(3))])
        .unwrap();
    assert_eq!(result, Value::Int(7));

    let err = runtime.call(&function, vec![Value::Int(10)], Vec::new()).unwrap_err();
    assert!(err.is(ExcType::TypeError), "{err}");
}

/// An inner function captures its enclosing parameter through a cell.
#[test]
fn closures_capture_cells() {
    let inner = FunctionDescriptor::builder("inner", PythonVersion::V3_10)
        .qualname("make_adder.<locals>.inner")
        .params(&["y"])
        .freevars(&["x"])
        .op("LOAD_DEREF", 0)
        .op("LOAD_FAST", 0)
        .op("BINARY_ADD", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let outer = FunctionDescriptor::builder("make_adder", PythonVersion::V3_10)
        .params(&["x"])
        .locals(&["inner"])
        .cellvars(&["x"])
        .constants(vec![
            Constant::None,
            Constant::Code(Box::new(inner)),
            Constant::from("make_adder.<locals>.inner"),
        ])
        .op("LOAD_CLOSURE", 0)
        .op("BUILD_TUPLE", 1)
        .op("LOAD_CONST", 1)
        .op("LOAD_CONST", 2)
        .op("MAKE_FUNCTION", 8)
        .op("STORE_FAST", 1)
        .op("LOAD_FAST", 1)
        .op("RETURN_VALUE", 0)
        .build();

    let globals = Globals::new();
    let make_adder = define(&globals, &outer);
    let mut runtime = Runtime::default();
    let add_five = runtime.call(&make_adder, vec![Value::Int(5)], Vec::new()).unwrap();
    let result = runtime.call(&add_five, vec![Value::Int(37)], Vec::new()).unwrap();
    assert_eq!(result, Value::Int(42));

    let Value::Function(function) = &add_five else {
        panic!("expected a function, got {add_five:?}");
    };
    assert_eq!(function.qualname(), "make_adder.<locals>.inner");
}

/// `print` output goes to the runtime's capture buffer.
#[test]
fn print_is_captured() {
    let hello = FunctionDescriptor::builder("hello", PythonVersion::V3_10)
        .params(&["name"])
        .names(&["print"])
        .constants(vec![Constant::None, Constant::from("hi")])
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_CONST", 1)
        .op("LOAD_FAST", 0)
        .op("CALL_FUNCTION", 2)
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let globals = Globals::new();
    let function = define(&globals, &hello);
    let mut runtime = Runtime::default().capture_output();
    let result = runtime.call(&function, vec![Value::from("world")], Vec::new()).unwrap();
    assert!(result.is_none());
    assert_eq!(runtime.take_output(), "hi world\n");
    assert_eq!(runtime.output(), Some(""));
}

/// A 3.12 loop with `END_FOR`, `BINARY_OP` and the shifted `COMPARE_OP` operand.
#[test]
fn modern_loop_counts_even_items() {
    let count_evens = FunctionDescriptor::builder("count_evens", PythonVersion::V3_12)
        .params(&["items"])
        .locals(&["n", "x"])
        .constants(vec![Constant::None, Constant::Int(0), Constant::Int(2), Constant::Int(1)])
        .op("RESUME", 0)
        .op("LOAD_CONST", 1)
        .op("STORE_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("GET_ITER", 0)
        .op("FOR_ITER", 15)
        .caches(1)
        .op("STORE_FAST", 2)
        .op("LOAD_FAST", 2)
        .op("LOAD_CONST", 2)
        .op("BINARY_OP", 6)
        .caches(1)
        .op("LOAD_CONST", 1)
        .op("COMPARE_OP", 40)
        .caches(1)
        .op("POP_JUMP_IF_FALSE", 5)
        .op("LOAD_FAST", 1)
        .op("LOAD_CONST", 3)
        .op("BINARY_OP", 13)
        .caches(1)
        .op("STORE_FAST", 1)
        .op("JUMP_BACKWARD", 17)
        .op("END_FOR", 0)
        .op("LOAD_FAST", 1)
        .op("RETURN_VALUE", 0)
        .build();

    let globals = Globals::new();
    let function = define(&globals, &count_evens);
    let mut runtime = Runtime::default();
    let items = Value::list([1, 2, 3, 4, 6].into_iter().map(Value::Int).collect());
    let result = runtime.call(&function, vec![items], Vec::new()).unwrap();
    assert_eq!(result, Value::Int(3));

    let empty = runtime.call(&function, vec![Value::list(Vec::new())], Vec::new()).unwrap();
    assert_eq!(empty, Value::Int(0));
}

/// Compiled code is `Send`: translate on a worker thread, run on this one.
#[test]
fn compiled_code_crosses_threads() {
    let code = std::thread::spawn(|| compile(&sum_to())).join().unwrap();
    let globals = Globals::new();
    let function = Value::Function(globals.define_function(code));
    let mut runtime = Runtime::default();
    assert_eq!(
        runtime.call(&function, vec![Value::Int(4)], Vec::new()).unwrap(),
        Value::Int(6)
    );
}
