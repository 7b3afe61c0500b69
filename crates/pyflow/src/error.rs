//! Translation errors.
//!
//! Everything that can go wrong between receiving a function descriptor and
//! producing its [`CompiledCode`](crate::codegen::CompiledCode). Runtime errors
//! raised by the generated code live in [`crate::exception`] instead.

use thiserror::Error;

use crate::version::PythonVersion;

/// Result alias for the translation pipeline.
pub type TranslateResult<T> = Result<T, TranslateError>;

/// A failure that aborts translation of one function.
///
/// No partially translated function is ever produced: any of these errors
/// propagates out of [`translate_function`](crate::assembly::translate_function).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// The opcode name is not part of the given version's instruction set.
    #[error("unsupported opcode {opname} for Python {version} at offset {offset}")]
    UnsupportedOpcode {
        opname: String,
        version: PythonVersion,
        offset: usize,
    },

    /// A recognised opcode whose semantics are not implemented.
    #[error("opcode {opcode} at offset {offset} is not supported")]
    NotSupported { opcode: &'static str, offset: usize },

    /// A branch lands outside the instruction list or between instructions.
    #[error("instruction at offset {offset} jumps to invalid target {target}")]
    MalformedJumpTarget { offset: usize, target: i64 },

    /// An operand indexes past the constant, name or variable tables.
    #[error("invalid operand for {opcode} at offset {offset}: {detail}")]
    InvalidOperand {
        offset: usize,
        opcode: &'static str,
        detail: String,
    },

    /// A handler produced a different number of outgoing states than successors.
    #[error("{opcode} at offset {offset} produced {actual} outgoing states for {expected} successors")]
    PairingViolation {
        offset: usize,
        opcode: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Two states reaching the same offset disagree on stack depth.
    #[error("incompatible stack states merge at offset {offset}: {left} vs {right}")]
    MergeConflict { offset: usize, left: String, right: String },

    /// A handler popped more values than the symbolic stack holds.
    #[error("{opcode} at offset {offset} needs {needed} stack values but only {depth} are available")]
    StackUnderflow {
        offset: usize,
        opcode: &'static str,
        depth: usize,
        needed: usize,
    },

    /// The fixed-point loop did not settle within the configured pass limit.
    #[error("type flow analysis did not converge after {passes} passes")]
    NoFixedPoint { passes: usize },

    /// A class whose bases admit no consistent method resolution order.
    #[error("cannot create class {class}: {detail}")]
    InvalidClass { class: String, detail: String },

    /// Wraps any of the above with the name of the function being translated.
    #[error("in function {function}: {source}")]
    InFunction {
        function: String,
        #[source]
        source: Box<TranslateError>,
    },
}

impl TranslateError {
    /// Attaches the function name, unless the error already carries one.
    #[must_use]
    pub fn in_function(self, function: &str) -> Self {
        match self {
            Self::InFunction { .. } => self,
            other => Self::InFunction {
                function: function.to_owned(),
                source: Box::new(other),
            },
        }
    }

    /// Strips any [`TranslateError::InFunction`] wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::InFunction { source, .. } => source.root(),
            other => other,
        }
    }
}
