//! The executable form produced by translation.

mod emitter;
mod op;

use std::sync::Arc;

pub use self::{
    emitter::{EmittedOps, Emitter},
    op::{CallLayout, HandlerShape, JumpCondition, KeywordNames, Op},
};
use crate::{
    bytecode::{CodeFlags, Constant},
    version::PythonVersion,
};

/// A constant pool entry of compiled code.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledConstant {
    Value(Constant),
    /// A nested function body, translated along with its parent.
    Code(Arc<CompiledCode>),
}

/// A translated function body, ready to be wrapped in a runtime function.
///
/// Compiled code is immutable and `Send + Sync`, so it can be produced on a
/// worker thread and executed elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCode {
    pub name: String,
    pub qualname: String,
    pub version: PythonVersion,
    pub argcount: usize,
    pub posonlyargcount: usize,
    pub kwonlyargcount: usize,
    pub flags: CodeFlags,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    pub names: Vec<String>,
    pub constants: Vec<CompiledConstant>,
    pub ops: Vec<Op>,
    /// Source offset each op was emitted for.
    pub op_offsets: Vec<usize>,
    /// Op indices a suspended generator may continue from.
    pub resume_points: Vec<usize>,
    pub max_stack_depth: usize,
}

impl CompiledCode {
    /// `qualname`, falling back to `name`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.qualname.is_empty() { &self.name } else { &self.qualname }
    }

    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.flags.generator
    }

    /// Number of guarded fast-path ops chosen from inferred types.
    #[must_use]
    pub fn specialized_count(&self) -> usize {
        self.ops.iter().filter(|op| op.is_specialized()).count()
    }

    /// Ops emitted for source instruction `offset`.
    #[must_use]
    pub fn ops_for_offset(&self, offset: usize) -> Vec<&Op> {
        self.ops
            .iter()
            .zip(&self.op_offsets)
            .filter(|(_, o)| **o == offset)
            .map(|(op, _)| op)
            .collect()
    }

    /// Local slot of each parameter that is also a cell variable, with its cell slot.
    #[must_use]
    pub fn cell_parameters(&self) -> Vec<(usize, usize)> {
        let params = self.argcount
            + self.kwonlyargcount
            + usize::from(self.flags.varargs)
            + usize::from(self.flags.varkeywords);
        self.cellvars
            .iter()
            .enumerate()
            .filter_map(|(cell, name)| {
                let local = self.varnames.iter().position(|v| v == name)?;
                (local < params).then_some((local, cell))
            })
            .collect()
    }
}
