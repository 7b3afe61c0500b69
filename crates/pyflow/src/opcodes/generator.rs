//! Generator suspension and delegation.

use smallvec::smallvec;

use crate::{
    analysis::StackMetadata,
    bytecode::{FunctionDescriptor, Instruction, Opcode},
    codegen::Op,
    error::TranslateResult,
    opcodes::{
        EmitContext, FlowContext, OpcodeHandler, Outgoing, Successors, branch_successors, jump_target, misrouted, pop,
        produced, replace, single,
    },
    types::PyType,
    version::PythonVersion,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// 3.10 prologue: discards the value sent by the first `send`.
    GenStart,
    ReturnGenerator,
    Yield,
    GetYieldFromIter,
    /// 3.10 `yield from`: re-executes until the delegate is exhausted.
    YieldFrom,
    /// 3.11+ delegation step; jumps to `target` once the delegate returns.
    Send { target: usize, keeps_receiver: bool },
    CleanupThrow,
}

#[derive(Debug)]
struct GeneratorHandler {
    instruction: Instruction,
    step: Step,
}

pub(super) fn handler(instruction: Instruction, descriptor: &FunctionDescriptor) -> TranslateResult<Box<dyn OpcodeHandler>> {
    let step = match instruction.opcode {
        Opcode::GenStart => Step::GenStart,
        Opcode::ReturnGenerator => Step::ReturnGenerator,
        Opcode::YieldValue => Step::Yield,
        Opcode::GetYieldFromIter => Step::GetYieldFromIter,
        Opcode::YieldFrom => Step::YieldFrom,
        Opcode::Send => Step::Send {
            target: jump_target(&instruction)?,
            // 3.12 leaves the receiver for END_SEND to drop.
            keeps_receiver: descriptor.version >= PythonVersion::V3_12,
        },
        Opcode::CleanupThrow => Step::CleanupThrow,
        _ => return Err(misrouted(&instruction)),
    };
    Ok(Box::new(GeneratorHandler { instruction, step }))
}

impl OpcodeHandler for GeneratorHandler {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn next_offsets(&self) -> Successors {
        match self.step {
            Step::Send { .. } => branch_successors(&self.instruction),
            _ => smallvec![self.offset() + 1],
        }
    }

    fn transfer(&self, _ctx: &FlowContext<'_>, incoming: &StackMetadata) -> TranslateResult<Outgoing> {
        let instruction = &self.instruction;
        match self.step {
            Step::GenStart => single(pop(instruction, incoming, 1)?.0),
            Step::ReturnGenerator => single(incoming.push(produced(instruction, PyType::NoneType))),
            // Whatever the caller sends back.
            Step::Yield => single(replace(instruction, incoming, 1, PyType::Object)?),
            Step::GetYieldFromIter => {
                let iterable = incoming.peek(0).map(|v| v.ty().clone()).unwrap_or(PyType::Object);
                let iterator = match iterable {
                    PyType::Generator => PyType::Generator,
                    _ => PyType::Iterator,
                };
                single(replace(instruction, incoming, 1, iterator)?)
            }
            // [delegate, sent] -> [result]
            Step::YieldFrom => single(replace(instruction, incoming, 2, PyType::Object)?),
            Step::Send { keeps_receiver, .. } => {
                let yielded = replace(instruction, incoming, 1, PyType::Object)?;
                let returned = if keeps_receiver {
                    yielded.clone()
                } else {
                    replace(instruction, incoming, 2, PyType::Object)?
                };
                Ok(smallvec![yielded, returned])
            }
            // [sub_iter, last_sent, exc] -> [None, value]
            Step::CleanupThrow => {
                let (rest, _) = pop(instruction, incoming, 3)?;
                single(
                    rest.push(produced(instruction, PyType::NoneType))
                        .push(produced(instruction, PyType::Object)),
                )
            }
        }
    }

    fn emit(&self, ctx: &mut EmitContext<'_, '_>, _incoming: &StackMetadata) -> TranslateResult<()> {
        match self.step {
            Step::GenStart => ctx.emitter.emit(Op::Pop),
            Step::ReturnGenerator => ctx.emitter.emit(Op::ReturnGenerator),
            Step::Yield => ctx.emitter.emit_yield(),
            Step::GetYieldFromIter => ctx.emitter.emit(Op::GetYieldFromIter),
            Step::YieldFrom => ctx.emitter.emit_reentrant(Op::YieldFrom),
            Step::Send { target, .. } => ctx.emitter.emit(Op::Send(target)),
            Step::CleanupThrow => ctx.emitter.emit(Op::CleanupThrow),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::TranslateConfig,
        opcodes::harness::{emit, transfer},
    };

    fn send(version: PythonVersion) -> Vec<Vec<PyType>> {
        let desc = FunctionDescriptor::builder("g", version).generator().build();
        let mut instruction = Instruction::new(Opcode::Send, 2, 0);
        instruction.jump_target = Some(4);
        transfer(&desc, instruction, &[PyType::Generator, PyType::NoneType])
    }

    #[test]
    fn send_drops_receiver_on_return_before_312() {
        assert_eq!(
            send(PythonVersion::V3_11),
            vec![vec![PyType::Generator, PyType::Object], vec![PyType::Object]]
        );
        assert_eq!(
            send(PythonVersion::V3_12),
            vec![
                vec![PyType::Generator, PyType::Object],
                vec![PyType::Generator, PyType::Object]
            ]
        );
    }

    #[test]
    fn yield_registers_resume_point() {
        let desc = FunctionDescriptor::builder("g", PythonVersion::V3_11).generator().build();
        let ops = emit(
            &desc,
            &TranslateConfig::default(),
            Instruction::new(Opcode::YieldValue, 0, 0),
            &[PyType::Int],
        );
        assert_eq!(ops, vec![Op::Yield { resume: 1 }]);
    }

    #[test]
    fn cleanup_throw_leaves_none_and_value() {
        let desc = FunctionDescriptor::builder("g", PythonVersion::V3_12).generator().build();
        let out = transfer(
            &desc,
            Instruction::new(Opcode::CleanupThrow, 0, 0),
            &[PyType::Int, PyType::Generator, PyType::Object, PyType::Exception(crate::exception::ExcType::StopIteration)],
        );
        assert_eq!(out, vec![vec![PyType::Int, PyType::NoneType, PyType::Object]]);
    }
}
