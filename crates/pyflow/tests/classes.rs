//! User-defined classes: construction, operators, method kinds and MRO.

use pretty_assertions::assert_eq;
use pyflow::{
    BaseRef, ClassDescriptor, Constant, ExcType, FunctionDescriptor, MethodKind, PythonVersion, TranslateConfig,
    TranslateError,
    codegen::Op,
    runtime::{Globals, Runtime, Value},
    translate_class, translate_function,
    types::NoHints,
};

fn method(name: &str) -> pyflow::bytecode::DescriptorBuilder {
    FunctionDescriptor::builder(name, PythonVersion::V3_10).qualname(&format!("Vec2.{name}"))
}

/// ```python
/// class Vec2:
///     x: int
///     y: int
///     def __init__(self, x, y): ...
///     def __add__(self, other: "Vec2") -> "Vec2": ...
///     def norm1(self): return abs(self.x) + abs(self.y)
///     @staticmethod
///     def origin(): return Vec2(0, 0)
///     @classmethod
///     def unit(cls): return cls(1, 1)
/// ```
fn vec2() -> ClassDescriptor {
    let init = method("__init__")
        .params(&["self", "x", "y"])
        .names(&["x", "y"])
        .constants(vec![Constant::None])
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("STORE_ATTR", 0)
        .op("LOAD_FAST", 2)
        .op("LOAD_FAST", 0)
        .op("STORE_ATTR", 1)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let add = method("__add__")
        .params(&["self", "other"])
        .names(&["Vec2", "x", "y"])
        .annotation("other", "Vec2")
        .annotation("return", "Vec2")
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_ATTR", 1)
        .op("LOAD_FAST", 1)
        .op("LOAD_ATTR", 1)
        .op("BINARY_ADD", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_ATTR", 2)
        .op("LOAD_FAST", 1)
        .op("LOAD_ATTR", 2)
        .op("BINARY_ADD", 0)
        .op("CALL_FUNCTION", 2)
        .op("RETURN_VALUE", 0)
        .build();
    let norm1 = method("norm1")
        .params(&["self"])
        .names(&["abs", "x", "y"])
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_ATTR", 1)
        .op("CALL_FUNCTION", 1)
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_ATTR", 2)
        .op("CALL_FUNCTION", 1)
        .op("BINARY_ADD", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let origin = method("origin")
        .names(&["Vec2"])
        .constants(vec![Constant::None, Constant::Int(0)])
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_CONST", 1)
        .op("LOAD_CONST", 1)
        .op("CALL_FUNCTION", 2)
        .op("RETURN_VALUE", 0)
        .build();
    let unit = method("unit")
        .params(&["cls"])
        .constants(vec![Constant::None, Constant::Int(1)])
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 1)
        .op("LOAD_CONST", 1)
        .op("CALL_FUNCTION", 2)
        .op("RETURN_VALUE", 0)
        .build();

    let mut class = ClassDescriptor::new("Vec2");
    class.instance_methods = vec![init, add, norm1];
    class.static_methods = vec![origin];
    class.class_methods = vec![unit];
    class.static_attributes = vec![("dims".to_owned(), Constant::Int(2))];
    class.annotations.insert("x".to_owned(), "int".to_owned());
    class.annotations.insert("y".to_owned(), "int".to_owned());
    class
}

/// ```python
/// def demo():
///     a = Vec2(2, 3)
///     b = Vec2(1, 1)
///     c = a + b + Vec2.unit() + Vec2.origin()
///     return c.norm1()
/// ```
fn demo() -> FunctionDescriptor {
    FunctionDescriptor::builder("demo", PythonVersion::V3_10)
        .locals(&["a", "b", "c"])
        .names(&["Vec2", "unit", "origin", "norm1"])
        .constants(vec![Constant::None, Constant::Int(2), Constant::Int(3), Constant::Int(1)])
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_CONST", 1)
        .op("LOAD_CONST", 2)
        .op("CALL_FUNCTION", 2)
        .op("STORE_FAST", 0)
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_CONST", 3)
        .op("LOAD_CONST", 3)
        .op("CALL_FUNCTION", 2)
        .op("STORE_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("LOAD_FAST", 1)
        .op("BINARY_ADD", 0)
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_METHOD", 1)
        .op("CALL_METHOD", 0)
        .op("BINARY_ADD", 0)
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_METHOD", 2)
        .op("CALL_METHOD", 0)
        .op("BINARY_ADD", 0)
        .op("STORE_FAST", 2)
        .op("LOAD_FAST", 2)
        .op("LOAD_METHOD", 3)
        .op("CALL_METHOD", 0)
        .op("RETURN_VALUE", 0)
        .build()
}

/// Constructors, class and static methods, and `__add__` dispatch all run.
#[test]
fn class_methods_and_operators() {
    let compiled = translate_class(&vec2(), &TranslateConfig::default(), &NoHints).unwrap();
    assert_eq!(compiled.name(), "Vec2");
    assert_eq!(compiled.method("unit").map(|m| m.kind), Some(MethodKind::Class));
    assert_eq!(compiled.method("origin").map(|m| m.kind), Some(MethodKind::Static));

    let globals = Globals::new();
    let class = globals.define_class(&compiled).unwrap();
    assert_eq!(class.lookup("dims"), Some(Value::Int(2)));

    let code = translate_function(&demo(), &TranslateConfig::default(), &*globals).unwrap();
    // Both operands are known instances, so `a + b` calls `__add__` directly.
    assert!(code.ops_for_offset(12).iter().any(|op| matches!(op, Op::BinaryMethod { .. })));

    let function = Value::Function(globals.define_function(code));
    let result = Runtime::default().call(&function, Vec::new(), Vec::new()).unwrap();
    assert_eq!(result, Value::Int(9));
}

/// Annotated attributes let operator bodies use the integer fast path.
#[test]
fn annotated_attributes_specialize_method_bodies() {
    let compiled = translate_class(&vec2(), &TranslateConfig::default(), &NoHints).unwrap();
    let add = compiled.method("__add__").unwrap();
    let direct = add
        .code
        .ops
        .iter()
        .filter(|op| matches!(op, Op::BinaryDirect { .. }))
        .count();
    assert_eq!(direct, 2);

    let dynamic = translate_class(&vec2(), &TranslateConfig::dynamic_only(), &NoHints).unwrap();
    assert_eq!(dynamic.method("__add__").unwrap().code.specialized_count(), 0);
}

/// A class deriving from a builtin exception is caught by the base's handler.
#[test]
fn user_exceptions_match_their_builtin_base() {
    let mut app_error = ClassDescriptor::new("AppError");
    app_error.bases = vec![BaseRef::Builtin("ValueError".to_owned())];
    let compiled = translate_class(&app_error, &TranslateConfig::default(), &NoHints).unwrap();
    assert_eq!(compiled.class_type.exception_base(), Some(ExcType::ValueError));

    let globals = Globals::new();
    globals.define_class(&compiled).unwrap();
    let risky = FunctionDescriptor::builder("risky", PythonVersion::V3_10)
        .names(&["AppError"])
        .constants(vec![Constant::None, Constant::from("nope")])
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_CONST", 1)
        .op("CALL_FUNCTION", 1)
        .op("RAISE_VARARGS", 1)
        .build();
    let code = translate_function(&risky, &TranslateConfig::default(), &*globals).unwrap();
    let function = Value::Function(globals.define_function(code));
    let err = Runtime::default().call(&function, Vec::new(), Vec::new()).unwrap_err();
    assert!(err.is(ExcType::ValueError));
    assert_eq!(err.to_string(), "AppError: nope");
}

/// Bases with no consistent linearization are rejected at translation time.
#[test]
fn inconsistent_mro_is_rejected() {
    let config = TranslateConfig::default();
    let a = translate_class(&ClassDescriptor::new("A"), &config, &NoHints).unwrap();
    let mut b = ClassDescriptor::new("B");
    b.bases = vec![BaseRef::Class(a.clone().into())];
    let b = translate_class(&b, &config, &NoHints).unwrap();

    let mut c = ClassDescriptor::new("C");
    c.bases = vec![BaseRef::Class(a.into()), BaseRef::Class(b.into())];
    let err = translate_class(&c, &config, &NoHints).unwrap_err();
    assert!(matches!(err, TranslateError::InvalidClass { ref class, .. } if class == "C"), "{err}");
}
