//! The opcode catalog.
//!
//! Every decoded instruction gets one handler. A handler answers three
//! questions about its instruction: where control can go next
//! ([`OpcodeHandler::next_offsets`]), what the stack and locals look like on
//! each of those edges ([`OpcodeHandler::transfer`]), and which ops implement
//! it given the state it is entered with ([`OpcodeHandler::emit`]).
//!
//! `transfer` must return exactly one state per entry of `next_offsets`, in
//! the same order. The analyzer zips the two and reports a
//! [`TranslateError::PairingViolation`] otherwise.

mod collections;
mod control;
mod dunder;
mod exceptions;
mod function;
mod generator;
mod module;
mod stack;
mod string;
mod variables;

use std::fmt;

use smallvec::{SmallVec, smallvec};

use crate::{
    analysis::{StackMetadata, SymbolicValue},
    bytecode::{Category, FunctionDescriptor, Instruction},
    codegen::Emitter,
    config::TranslateConfig,
    error::{TranslateError, TranslateResult},
    types::{PyType, TypeHints, TypeRegistry},
};

/// Successor offsets of one instruction.
pub type Successors = SmallVec<[usize; 2]>;

/// Outgoing states of one instruction, paired with [`Successors`].
pub type Outgoing = SmallVec<[StackMetadata; 2]>;

/// Read-only inputs shared by every handler of one function.
#[derive(Clone, Copy)]
pub struct FlowContext<'a> {
    pub descriptor: &'a FunctionDescriptor,
    pub registry: &'a TypeRegistry,
    pub hints: &'a dyn TypeHints,
    pub config: &'a TranslateConfig,
}

impl fmt::Debug for FlowContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContext")
            .field("function", &self.descriptor.display_name())
            .field("config", self.config)
            .finish_non_exhaustive()
    }
}

impl FlowContext<'_> {
    /// Static type of the global `name`: the embedder's hint, then the
    /// builtin of that name, then `Object`.
    #[must_use]
    pub fn global_type(&self, name: &str) -> PyType {
        if let Some(ty) = self.hints.global_type(name) {
            return ty;
        }
        if let Some(builtin) = crate::types::Builtin::from_name(name) {
            return PyType::Builtin(builtin);
        }
        match name.parse() {
            Ok(kind) => PyType::ExceptionClass(kind),
            Err(_) => PyType::Object,
        }
    }
}

/// Mutable state for code generation.
#[derive(Debug)]
pub struct EmitContext<'a, 'c> {
    pub flow: &'a FlowContext<'c>,
    pub emitter: &'a mut Emitter,
}

impl EmitContext<'_, '_> {
    #[must_use]
    pub fn specialize(&self) -> bool {
        self.flow.config.specialize
    }
}

/// Behaviour of one decoded instruction.
pub trait OpcodeHandler: fmt::Debug + Send + Sync {
    fn instruction(&self) -> &Instruction;

    fn offset(&self) -> usize {
        self.instruction().offset
    }

    /// Some other instruction branches here.
    fn is_jump_target(&self) -> bool {
        self.instruction().is_jump_target
    }

    /// Control never falls through to the next instruction.
    fn is_forced_jump(&self) -> bool {
        false
    }

    /// Possible successors; the default is the next instruction.
    fn next_offsets(&self) -> Successors {
        smallvec![self.offset() + 1]
    }

    /// Outgoing state per successor. Must not depend on anything but the
    /// context and `incoming`.
    fn transfer(&self, ctx: &FlowContext<'_>, incoming: &StackMetadata) -> TranslateResult<Outgoing>;

    /// Emits ops for this instruction.
    fn emit(&self, ctx: &mut EmitContext<'_, '_>, incoming: &StackMetadata) -> TranslateResult<()>;
}

/// Builds the handler for `instruction`.
///
/// Operands are validated here, so handlers can index the descriptor's tables
/// without further checks.
pub fn handler_for(instruction: Instruction, descriptor: &FunctionDescriptor) -> TranslateResult<Box<dyn OpcodeHandler>> {
    match instruction.opcode.category() {
        Category::Stack => stack::handler(instruction, descriptor),
        Category::Variables => variables::handler(instruction, descriptor),
        Category::Control => control::handler(instruction, descriptor),
        Category::Operators => dunder::handler(instruction, descriptor),
        Category::Collections => collections::handler(instruction, descriptor),
        Category::Functions => function::handler(instruction, descriptor),
        Category::Generators => generator::handler(instruction, descriptor),
        Category::Exceptions => exceptions::handler(instruction, descriptor),
        Category::Modules => module::handler(instruction, descriptor),
        Category::Strings => string::handler(instruction),
        Category::Unsupported => Err(not_supported(&instruction)),
    }
}

/// Builds handlers for a decoded body, in offset order.
pub fn handlers_for(
    instructions: Vec<Instruction>,
    descriptor: &FunctionDescriptor,
) -> TranslateResult<Vec<Box<dyn OpcodeHandler>>> {
    instructions
        .into_iter()
        .map(|instruction| handler_for(instruction, descriptor))
        .collect()
}

fn not_supported(instruction: &Instruction) -> TranslateError {
    TranslateError::NotSupported {
        opcode: instruction.name(),
        offset: instruction.offset,
    }
}

fn invalid_operand(instruction: &Instruction, detail: impl Into<String>) -> TranslateError {
    TranslateError::InvalidOperand {
        offset: instruction.offset,
        opcode: instruction.name(),
        detail: detail.into(),
    }
}

/// An instruction routed to a category module that has no case for it.
fn misrouted(instruction: &Instruction) -> TranslateError {
    invalid_operand(instruction, format!("no handler for {}", instruction.opcode))
}

/// Validates an index into a table of `len` entries.
fn checked_index(instruction: &Instruction, index: usize, len: usize, table: &str) -> TranslateResult<usize> {
    if index < len {
        Ok(index)
    } else {
        Err(invalid_operand(
            instruction,
            format!("{table} index {index} out of range ({len} entries)"),
        ))
    }
}

fn pop(instruction: &Instruction, state: &StackMetadata, count: usize) -> TranslateResult<(StackMetadata, Vec<SymbolicValue>)> {
    state.pop(count).map_err(|underflow| underflow.at(instruction))
}

fn pop_one(instruction: &Instruction, state: &StackMetadata) -> TranslateResult<(StackMetadata, SymbolicValue)> {
    let (rest, mut values) = pop(instruction, state, 1)?;
    let value = values.pop().unwrap_or_else(SymbolicValue::object);
    Ok((rest, value))
}

/// A value produced by `instruction`.
fn produced(instruction: &Instruction, ty: PyType) -> SymbolicValue {
    SymbolicValue::produced_by(ty, instruction.offset)
}

/// Pops `count` values and pushes one of type `ty`.
fn replace(instruction: &Instruction, state: &StackMetadata, count: usize, ty: PyType) -> TranslateResult<StackMetadata> {
    let (rest, _) = pop(instruction, state, count)?;
    Ok(rest.push(produced(instruction, ty)))
}

fn single(state: StackMetadata) -> TranslateResult<Outgoing> {
    Ok(smallvec![state])
}

/// Successors of a two-way branch: fall through, then the jump target.
fn branch_successors(instruction: &Instruction) -> Successors {
    match instruction.jump_target {
        Some(target) => smallvec![instruction.offset + 1, target],
        None => smallvec![instruction.offset + 1],
    }
}

/// The resolved target of a jumping instruction.
fn jump_target(instruction: &Instruction) -> TranslateResult<usize> {
    instruction
        .jump_target
        .ok_or_else(|| invalid_operand(instruction, "jump without a resolved target"))
}

/// Runs single handlers against hand-built stacks.
#[cfg(test)]
pub(crate) mod harness {
    use super::*;
    use crate::{
        codegen::Op,
        types::{NoHints, TypeRegistry},
    };

    /// Outgoing stack types per successor, bottom first.
    pub(crate) fn transfer(descriptor: &FunctionDescriptor, instruction: Instruction, stack: &[PyType]) -> Vec<Vec<PyType>> {
        let config = TranslateConfig::default();
        let ctx = FlowContext {
            descriptor,
            registry: TypeRegistry::global(),
            hints: &NoHints,
            config: &config,
        };
        let state = entry_state(descriptor, stack);
        let handler = handler_for(instruction, descriptor).unwrap();
        let out = handler.transfer(&ctx, &state).unwrap();
        assert_eq!(out.len(), handler.next_offsets().len(), "pairing");
        out.iter()
            .map(|state| state.stack().iter().map(|v| v.ty().clone()).collect())
            .collect()
    }

    /// Ops emitted for `instruction` entered with `stack`.
    pub(crate) fn emit(
        descriptor: &FunctionDescriptor,
        config: &TranslateConfig,
        instruction: Instruction,
        stack: &[PyType],
    ) -> Vec<Op> {
        let flow = FlowContext {
            descriptor,
            registry: TypeRegistry::global(),
            hints: &NoHints,
            config,
        };
        let state = entry_state(descriptor, stack);
        let handler = handler_for(instruction, descriptor).unwrap();
        let mut emitter = Emitter::new(0);
        emitter.begin_instruction(handler.offset(), state.depth());
        let mut ctx = EmitContext {
            flow: &flow,
            emitter: &mut emitter,
        };
        handler.emit(&mut ctx, &state).unwrap();
        emitter.ops().to_vec()
    }

    fn entry_state(descriptor: &FunctionDescriptor, stack: &[PyType]) -> StackMetadata {
        StackMetadata::unbound(descriptor.varnames.len(), descriptor.cell_count())
            .push_all(stack.iter().cloned().map(SymbolicValue::new))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        bytecode::{FunctionDescriptor, Opcode},
        version::PythonVersion,
    };

    fn descriptor() -> FunctionDescriptor {
        FunctionDescriptor::builder("f", PythonVersion::V3_11)
            .params(&["a"])
            .op("RESUME", 0)
            .build()
    }

    #[test]
    fn unsupported_category_is_reported_as_capability_gap() {
        let instruction = Instruction::new(Opcode::GetAwaitable, 0, 3);
        let err = handler_for(instruction, &descriptor()).unwrap_err();
        assert_eq!(
            err,
            TranslateError::NotSupported {
                opcode: "GET_AWAITABLE",
                offset: 3
            }
        );
    }

    #[test]
    fn out_of_range_local_is_invalid_operand() {
        let instruction = Instruction::new(Opcode::LoadFast, 7, 0);
        let err = handler_for(instruction, &descriptor()).unwrap_err();
        assert!(matches!(err, TranslateError::InvalidOperand { opcode: "LOAD_FAST", .. }));
    }
}
