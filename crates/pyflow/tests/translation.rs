//! Translation-time failures, JSON descriptors and batch translation.

use pretty_assertions::assert_eq;
use pyflow::{
    FunctionDescriptor, PythonVersion, TranslateConfig, TranslateError, translate_batch, translate_function,
    runtime::{Globals, Runtime, Value},
    types::NoHints,
};

fn translate(descriptor: &FunctionDescriptor) -> Result<std::sync::Arc<pyflow::CompiledCode>, TranslateError> {
    translate_function(descriptor, &TranslateConfig::default(), &NoHints)
}

/// Opcodes from another version's instruction set are rejected by name.
#[test]
fn opcodes_outside_the_version_are_unsupported() {
    let desc = FunctionDescriptor::builder("f", PythonVersion::V3_11)
        .params(&["a"])
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_FAST", 0)
        .op("BINARY_ADD", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let err = translate(&desc).unwrap_err();
    assert_eq!(
        err.root(),
        &TranslateError::UnsupportedOpcode {
            opname: "BINARY_ADD".to_owned(),
            version: PythonVersion::V3_11,
            offset: 3,
        }
    );
    assert_eq!(
        err.to_string(),
        "in function f: unsupported opcode BINARY_ADD for Python 3.11 at offset 3"
    );
}

/// Recognised but unimplemented opcodes fail with `NotSupported`.
#[test]
fn async_opcodes_are_not_supported() {
    let desc = FunctionDescriptor::builder("waiter", PythonVersion::V3_10)
        .params(&["task"])
        .op("LOAD_FAST", 0)
        .op("GET_AWAITABLE", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let err = translate(&desc).unwrap_err();
    assert_eq!(
        err.root(),
        &TranslateError::NotSupported {
            opcode: "GET_AWAITABLE",
            offset: 1,
        }
    );
}

/// A jump past the end of the body is malformed.
#[test]
fn jumps_must_land_on_instructions() {
    let desc = FunctionDescriptor::builder("f", PythonVersion::V3_10)
        .op("JUMP_FORWARD", 40)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let err = translate(&desc).unwrap_err();
    assert!(
        matches!(err.root(), TranslateError::MalformedJumpTarget { offset: 0, target: 41 }),
        "{err}"
    );
}

/// Popping from an empty stack is caught before any code runs.
#[test]
fn stack_underflow_is_reported() {
    let desc = FunctionDescriptor::builder("f", PythonVersion::V3_10)
        .constants(vec![pyflow::Constant::None])
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let err = translate(&desc).unwrap_err();
    assert_eq!(
        err.root(),
        &TranslateError::StackUnderflow {
            offset: 0,
            opcode: "POP_TOP",
            depth: 0,
            needed: 1,
        }
    );
}

/// Paths that reach one instruction with different stack depths conflict.
#[test]
fn merge_of_unequal_depths_is_rejected() {
    let desc = FunctionDescriptor::builder("f", PythonVersion::V3_10)
        .params(&["flag"])
        .constants(vec![pyflow::Constant::None])
        .op("LOAD_FAST", 0)
        .op("POP_JUMP_IF_FALSE", 4)
        .op("LOAD_CONST", 0)
        .op("JUMP_FORWARD", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let err = translate(&desc).unwrap_err();
    assert!(matches!(err.root(), TranslateError::MergeConflict { offset: 4, .. }), "{err}");
}

/// Operand indices are checked against the descriptor's tables.
#[test]
fn operands_index_their_tables() {
    let desc = FunctionDescriptor::builder("f", PythonVersion::V3_10)
        .op("LOAD_CONST", 3)
        .op("RETURN_VALUE", 0)
        .build();
    let err = translate(&desc).unwrap_err();
    assert!(
        matches!(err.root(), TranslateError::InvalidOperand { offset: 0, opcode: "LOAD_CONST", .. }),
        "{err}"
    );
}

/// Descriptors deserialize from the JSON a disassembler front end emits.
#[test]
fn descriptors_load_from_json() {
    let json = r#"{
        "name": "inc",
        "version": "3.12",
        "argcount": 1,
        "varnames": ["x"],
        "constants": ["None", {"Int": 1}],
        "instructions": [
            {"opname": "RESUME"},
            {"opname": "LOAD_FAST", "arg": 0},
            {"opname": "LOAD_CONST", "arg": 1},
            {"opname": "BINARY_OP", "arg": 0},
            {"opname": "CACHE"},
            {"opname": "RETURN_VALUE"}
        ]
    }"#;
    let desc = FunctionDescriptor::from_json(json).unwrap();
    assert_eq!(desc.display_name(), "inc");

    let code = translate(&desc).unwrap();
    let globals = Globals::new();
    let function = Value::Function(globals.define_function(code));
    let result = Runtime::default().call(&function, vec![Value::Int(41)], Vec::new()).unwrap();
    assert_eq!(result, Value::Int(42));
}

/// Batch results keep input order; one bad function does not sink the rest.
#[test]
fn batch_translation_isolates_failures() {
    let good = |name: &str| {
        FunctionDescriptor::builder(name, PythonVersion::V3_10)
            .params(&["x"])
            .op("LOAD_FAST", 0)
            .op("RETURN_VALUE", 0)
            .build()
    };
    let bad = FunctionDescriptor::builder("bad", PythonVersion::V3_10)
        .op("RETURN_VALUE", 0)
        .build();
    let descriptors = vec![good("first"), bad, good("third")];

    let config = TranslateConfig {
        parallelism: Some(2),
        ..TranslateConfig::default()
    };
    let results = translate_batch(&descriptors, &config, &NoHints);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().map(|code| code.name.as_str()), Ok("first"));
    assert!(matches!(
        results[1].as_ref().map_err(TranslateError::root),
        Err(TranslateError::StackUnderflow { .. })
    ));
    assert_eq!(results[2].as_ref().map(|code| code.name.as_str()), Ok("third"));
}

/// Settings parse from JSON with defaults for missing fields.
#[test]
fn config_from_json() {
    let config = TranslateConfig::from_json(r#"{"max_passes": 5, "parallelism": 4}"#).unwrap();
    assert_eq!(
        config,
        TranslateConfig {
            max_passes: 5,
            parallelism: Some(4),
            ..TranslateConfig::default()
        }
    );
    assert!(TranslateConfig::from_json(r#"{"specialize": "yes"}"#).is_err());
}
