//! Jumps, conditional branches, iteration and return.

use smallvec::{SmallVec, smallvec};

use crate::{
    analysis::StackMetadata,
    bytecode::{FunctionDescriptor, Instruction, Opcode},
    codegen::{JumpCondition, Op},
    error::TranslateResult,
    opcodes::{
        EmitContext, FlowContext, OpcodeHandler, Outgoing, Successors, branch_successors, jump_target, misrouted,
        pop, pop_one, produced, replace, single,
    },
    types::PyType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Jump(usize),
    PopJumpIf { target: usize, condition: JumpCondition },
    JumpIfOrPop { target: usize, when: bool },
    GetIter,
    ForIter(usize),
    Return,
}

#[derive(Debug)]
struct ControlHandler {
    instruction: Instruction,
    flow: Flow,
}

fn condition_of(opcode: Opcode) -> Option<JumpCondition> {
    let name = opcode.name();
    let condition = if name.ends_with("IF_NOT_NONE") {
        JumpCondition::NotNone
    } else if name.ends_with("IF_NONE") {
        JumpCondition::None
    } else if name.ends_with("IF_TRUE") {
        JumpCondition::True
    } else if name.ends_with("IF_FALSE") {
        JumpCondition::False
    } else {
        return None;
    };
    Some(condition)
}

pub(super) fn handler(instruction: Instruction, _descriptor: &FunctionDescriptor) -> TranslateResult<Box<dyn OpcodeHandler>> {
    let flow = match instruction.opcode {
        Opcode::JumpForward | Opcode::JumpAbsolute | Opcode::JumpBackward | Opcode::JumpBackwardNoInterrupt => {
            Flow::Jump(jump_target(&instruction)?)
        }
        Opcode::JumpIfFalseOrPop => Flow::JumpIfOrPop {
            target: jump_target(&instruction)?,
            when: false,
        },
        Opcode::JumpIfTrueOrPop => Flow::JumpIfOrPop {
            target: jump_target(&instruction)?,
            when: true,
        },
        Opcode::GetIter => Flow::GetIter,
        Opcode::ForIter => Flow::ForIter(jump_target(&instruction)?),
        Opcode::ReturnValue => Flow::Return,
        opcode => match condition_of(opcode) {
            Some(condition) => Flow::PopJumpIf {
                target: jump_target(&instruction)?,
                condition,
            },
            None => return Err(misrouted(&instruction)),
        },
    };
    Ok(Box::new(ControlHandler { instruction, flow }))
}

/// Static type of `iter(value)`.
fn iterator_type(iterable: &PyType) -> PyType {
    match iterable {
        PyType::Range | PyType::RangeIterator => PyType::RangeIterator,
        PyType::Generator => PyType::Generator,
        _ => PyType::Iterator,
    }
}

/// Static type of the items an iterator produces.
fn item_type(iterator: &PyType) -> PyType {
    match iterator {
        PyType::RangeIterator => PyType::Int,
        _ => PyType::Object,
    }
}

impl OpcodeHandler for ControlHandler {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn is_forced_jump(&self) -> bool {
        matches!(self.flow, Flow::Jump(_) | Flow::Return)
    }

    fn next_offsets(&self) -> Successors {
        match self.flow {
            Flow::Jump(target) => smallvec![target],
            Flow::Return => SmallVec::new(),
            Flow::GetIter => smallvec![self.offset() + 1],
            Flow::PopJumpIf { .. } | Flow::JumpIfOrPop { .. } | Flow::ForIter(_) => {
                branch_successors(&self.instruction)
            }
        }
    }

    fn transfer(&self, _ctx: &FlowContext<'_>, incoming: &StackMetadata) -> TranslateResult<Outgoing> {
        let instruction = &self.instruction;
        match self.flow {
            Flow::Jump(_) => single(incoming.clone()),
            Flow::Return => {
                pop(instruction, incoming, 1)?;
                Ok(SmallVec::new())
            }
            Flow::PopJumpIf { .. } => {
                let (rest, _) = pop(instruction, incoming, 1)?;
                Ok(smallvec![rest.clone(), rest])
            }
            Flow::JumpIfOrPop { .. } => {
                let (rest, _) = pop(instruction, incoming, 1)?;
                Ok(smallvec![rest, incoming.clone()])
            }
            Flow::GetIter => {
                let iterable = incoming.peek(0).map(|v| v.ty().clone()).unwrap_or(PyType::Object);
                single(replace(instruction, incoming, 1, iterator_type(&iterable))?)
            }
            Flow::ForIter(_) => {
                let (exhausted, iterator) = pop_one(instruction, incoming)?;
                let item = produced(instruction, item_type(iterator.ty()));
                Ok(smallvec![incoming.push(item), exhausted])
            }
        }
    }

    fn emit(&self, ctx: &mut EmitContext<'_, '_>, _incoming: &StackMetadata) -> TranslateResult<()> {
        let op = match self.flow {
            Flow::Jump(target) => Op::Jump(target),
            Flow::PopJumpIf { target, condition } => Op::PopJumpIf { target, condition },
            Flow::JumpIfOrPop { target, when } => Op::JumpIfOrPop { target, when },
            Flow::GetIter => Op::GetIter,
            Flow::ForIter(target) => Op::ForIter(target),
            Flow::Return => Op::Return,
        };
        ctx.emitter.emit(op);
        Ok(())
    }
}
