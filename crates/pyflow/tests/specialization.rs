//! Type-specialized ops and their guarded fallbacks.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use pyflow::{
    CompiledCode, Constant, ExcType, FunctionDescriptor, PythonVersion, TranslateConfig,
    codegen::Op,
    runtime::{Globals, Runtime, Value},
    translate_function,
    types::{Builtin, NoHints},
};

/// `def add(a: int, b: int): return a + b` as compiled by 3.11.
fn typed_add() -> FunctionDescriptor {
    FunctionDescriptor::builder("add", PythonVersion::V3_11)
        .params(&["a", "b"])
        .annotation("a", "int")
        .annotation("b", "int")
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_FAST", 1)
        .op("BINARY_OP", 0)
        .caches(1)
        .op("RETURN_VALUE", 0)
        .build()
}

/// `def size(xs): return len(xs)` as compiled by 3.12.
fn size() -> FunctionDescriptor {
    FunctionDescriptor::builder("size", PythonVersion::V3_12)
        .params(&["xs"])
        .names(&["len"])
        .constants(vec![Constant::None])
        .op("RESUME", 0)
        .op("LOAD_GLOBAL", 1)
        .caches(4)
        .op("LOAD_FAST", 0)
        .op("CALL", 1)
        .caches(3)
        .op("RETURN_VALUE", 0)
        .build()
}

fn compile(descriptor: &FunctionDescriptor, config: &TranslateConfig) -> Arc<CompiledCode> {
    translate_function(descriptor, config, &NoHints).unwrap()
}

fn call(code: Arc<CompiledCode>, args: Vec<Value>) -> Result<Value, pyflow::RunError> {
    let globals = Globals::new();
    let function = Value::Function(globals.define_function(code));
    Runtime::default().call(&function, args, Vec::new())
}

/// Annotated integer operands select the direct integer path.
#[test]
fn annotated_ints_use_the_direct_path() {
    let code = compile(&typed_add(), &TranslateConfig::default());
    let ops = code.ops_for_offset(3);
    assert!(matches!(ops.as_slice(), [Op::BinaryDirect { inplace: false, .. }]), "{ops:?}");
    assert_eq!(call(code, vec![Value::Int(40), Value::Int(2)]).unwrap(), Value::Int(42));
}

/// Annotations are hints: other operand types take the generic path.
#[test]
fn guard_miss_falls_back_to_generic_dispatch() {
    let code = compile(&typed_add(), &TranslateConfig::default());
    assert_eq!(
        call(code.clone(), vec![Value::from("py"), Value::from("flow")]).unwrap(),
        Value::from("pyflow")
    );
    assert_eq!(
        call(code.clone(), vec![Value::Int(i64::MAX), Value::Int(1)]).unwrap(),
        Value::from_bigint(num_bigint::BigInt::from(i64::MAX) + 1)
    );

    let err = call(code, vec![Value::Int(1), Value::from("x")]).unwrap_err();
    assert!(err.is(ExcType::TypeError));
    assert_eq!(err.message(), "unsupported operand type(s) for +: 'int' and 'str'");
}

/// With specialization off, the same body emits only generic ops.
#[test]
fn dynamic_only_emits_generic_ops() {
    let code = compile(&typed_add(), &TranslateConfig::dynamic_only());
    assert_eq!(code.specialized_count(), 0);
    assert!(
        code.ops
            .iter()
            .any(|op| matches!(op, Op::Binary { inplace: false, .. }))
    );
    assert_eq!(call(code, vec![Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
}

/// Calls to builtins with a known signature go straight to the builtin,
/// unless the name has been rebound by the time the call runs.
#[test]
fn builtin_calls_are_direct_but_guarded() {
    let code = compile(&size(), &TranslateConfig::default());
    assert!(
        code.ops
            .iter()
            .any(|op| matches!(op, Op::CallBuiltin { builtin: Builtin::Len, argc: 1, .. }))
    );

    let globals = Globals::new();
    let function = Value::Function(globals.define_function(code));
    let mut runtime = Runtime::default();
    let items = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert_eq!(runtime.call(&function, vec![items], Vec::new()).unwrap(), Value::Int(3));

    // `len` now resolves to `abs`, and the guard routes the call there.
    globals.set("len", Value::Builtin(Builtin::Abs));
    assert_eq!(
        runtime.call(&function, vec![Value::Int(-8)], Vec::new()).unwrap(),
        Value::Int(8)
    );
}

/// Parameters proven bound load without the unbound-local check.
#[test]
fn bound_parameters_load_unchecked() {
    let code = compile(&typed_add(), &TranslateConfig::default());
    let loads: Vec<&Op> = code
        .ops
        .iter()
        .filter(|op| matches!(op, Op::LoadLocal { .. }))
        .collect();
    assert_eq!(
        loads,
        vec![
            &Op::LoadLocal { slot: 0, checked: false },
            &Op::LoadLocal { slot: 1, checked: false },
        ]
    );
}
