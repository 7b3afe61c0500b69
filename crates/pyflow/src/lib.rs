//! Translates CPython 3.10-3.12 bytecode into verified, type-specialized
//! operations and executes them.
//!
//! Translation runs per function: the [decoder](bytecode::decode) turns raw
//! code units into instructions, the [opcode catalog](opcodes) gives each one
//! a handler, the [flow graph](analysis::FlowGraph) splits them into blocks
//! and the [analyzer](analysis::analyze) infers the stack and local types at
//! every reachable instruction. [`assembly`] then emits [`codegen::Op`]s,
//! choosing guarded fast paths where the types allow.
//!
//! ```
//! use pyflow::{
//!     FunctionDescriptor, PythonVersion, TranslateConfig, assembly,
//!     runtime::{Globals, Runtime, Value},
//!     types::NoHints,
//! };
//!
//! let double = FunctionDescriptor::builder("double", PythonVersion::V3_10)
//!     .params(&["x"])
//!     .op("LOAD_FAST", 0)
//!     .op("LOAD_FAST", 0)
//!     .op("BINARY_ADD", 0)
//!     .op("RETURN_VALUE", 0)
//!     .build();
//! let code = assembly::translate_function(&double, &TranslateConfig::default(), &NoHints).unwrap();
//!
//! let globals = Globals::new();
//! let function = globals.define_function(code);
//! let mut runtime = Runtime::default();
//! let result = runtime.call(&Value::Function(function), vec![Value::Int(21)], Vec::new()).unwrap();
//! assert_eq!(result.as_int(), Some(42));
//! ```
#![expect(clippy::cast_possible_truncation, reason = "hashes and identities fold into machine words")]
#![expect(clippy::cast_sign_loss, reason = "hash values reinterpret signed integers")]
#![expect(clippy::cast_possible_wrap, reason = "offsets and lengths are far below i64::MAX")]

pub mod analysis;
pub mod assembly;
pub mod bytecode;
pub mod codegen;
pub mod config;
pub mod error;
pub mod exception;
pub mod opcodes;
pub mod runtime;
pub mod tracer;
pub mod types;
pub mod version;

pub use crate::{
    assembly::{CompiledClass, CompiledMethod, MethodKind, translate_batch, translate_class, translate_function},
    bytecode::{BaseRef, ClassDescriptor, Constant, FunctionDescriptor, RawInstruction},
    codegen::CompiledCode,
    config::{ResourceError, RuntimeLimits, TranslateConfig},
    error::{TranslateError, TranslateResult},
    exception::{ExcType, PyException, RunError, RunResult},
    runtime::{Globals, Runtime, Value},
    version::PythonVersion,
};
