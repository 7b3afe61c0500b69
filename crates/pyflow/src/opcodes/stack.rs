//! Pure stack-shape opcodes.

use crate::{
    analysis::StackMetadata,
    bytecode::{FunctionDescriptor, Instruction, Opcode},
    codegen::Op,
    error::TranslateResult,
    opcodes::{EmitContext, FlowContext, OpcodeHandler, Outgoing, invalid_operand, misrouted, pop, produced, single},
    types::PyType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shuffle {
    /// No stack or locals effect at all.
    Nothing,
    Pop,
    /// Pops `n` values at once.
    PopMany(usize),
    /// Drops the value below TOS.
    PopSecond,
    Rotate(usize),
    Dup,
    DupTwo,
    Copy(usize),
    Swap(usize),
    PushNull,
}

#[derive(Debug)]
struct StackHandler {
    instruction: Instruction,
    shuffle: Shuffle,
}

pub(super) fn handler(instruction: Instruction, _descriptor: &FunctionDescriptor) -> TranslateResult<Box<dyn OpcodeHandler>> {
    let arg = instruction.index();
    let shuffle = match instruction.opcode {
        Opcode::Nop
        | Opcode::Resume
        | Opcode::Precall
        | Opcode::KwNames
        | Opcode::MakeCell
        | Opcode::CopyFreeVars
        | Opcode::ExtendedArg
        | Opcode::Cache => Shuffle::Nothing,
        Opcode::PopTop => Shuffle::Pop,
        Opcode::EndFor => Shuffle::PopMany(2),
        Opcode::EndSend => Shuffle::PopSecond,
        Opcode::RotTwo => Shuffle::Rotate(2),
        Opcode::RotThree => Shuffle::Rotate(3),
        Opcode::RotFour => Shuffle::Rotate(4),
        Opcode::RotN if arg >= 1 => Shuffle::Rotate(arg),
        Opcode::DupTop => Shuffle::Dup,
        Opcode::DupTopTwo => Shuffle::DupTwo,
        Opcode::Copy if arg >= 1 => Shuffle::Copy(arg),
        Opcode::Swap if arg >= 1 => Shuffle::Swap(arg),
        Opcode::PushNull => Shuffle::PushNull,
        Opcode::RotN | Opcode::Copy | Opcode::Swap => {
            return Err(invalid_operand(&instruction, "stack position must be at least 1"));
        }
        _ => return Err(misrouted(&instruction)),
    };
    Ok(Box::new(StackHandler { instruction, shuffle }))
}

impl OpcodeHandler for StackHandler {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn transfer(&self, _ctx: &FlowContext<'_>, incoming: &StackMetadata) -> TranslateResult<Outgoing> {
        let instruction = &self.instruction;
        let out = match self.shuffle {
            Shuffle::Nothing => incoming.clone(),
            Shuffle::Pop => pop(instruction, incoming, 1)?.0,
            Shuffle::PopMany(n) => pop(instruction, incoming, n)?.0,
            Shuffle::PopSecond => {
                let (rest, values) = pop(instruction, incoming, 2)?;
                rest.push(values[1].clone())
            }
            Shuffle::Rotate(n) => {
                // [.., x1, .., xn-1, top] becomes [.., top, x1, .., xn-1]
                let (rest, mut values) = pop(instruction, incoming, n)?;
                values.rotate_right(1);
                rest.push_all(values)
            }
            Shuffle::Dup => {
                let (_, values) = pop(instruction, incoming, 1)?;
                incoming.push(values[0].clone())
            }
            Shuffle::DupTwo => {
                let (_, values) = pop(instruction, incoming, 2)?;
                incoming.push_all(values)
            }
            Shuffle::Copy(n) => {
                let (_, values) = pop(instruction, incoming, n)?;
                incoming.push(values[0].clone())
            }
            Shuffle::Swap(n) => {
                let (rest, mut values) = pop(instruction, incoming, n)?;
                let last = values.len() - 1;
                values.swap(0, last);
                rest.push_all(values)
            }
            Shuffle::PushNull => incoming.push(produced(instruction, PyType::Null)),
        };
        single(out)
    }

    fn emit(&self, ctx: &mut EmitContext<'_, '_>, _incoming: &StackMetadata) -> TranslateResult<()> {
        let op = match self.shuffle {
            Shuffle::Nothing => return Ok(()),
            Shuffle::Pop => Op::Pop,
            Shuffle::PopMany(n) => {
                for _ in 0..n {
                    ctx.emitter.emit(Op::Pop);
                }
                return Ok(());
            }
            Shuffle::PopSecond => Op::PopSecond,
            Shuffle::Rotate(n) => Op::Rotate(n),
            Shuffle::Dup => Op::Dup,
            Shuffle::DupTwo => Op::DupTwo,
            Shuffle::Copy(n) => Op::Copy(n),
            Shuffle::Swap(n) => Op::Swap(n),
            Shuffle::PushNull => Op::PushNull,
        };
        ctx.emitter.emit(op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{opcodes::harness::transfer, version::PythonVersion};

    fn run(opcode: Opcode, arg: u32, stack: &[PyType]) -> Vec<PyType> {
        let descriptor = FunctionDescriptor::builder("f", PythonVersion::V3_11).build();
        transfer(&descriptor, Instruction::new(opcode, arg, 0), stack).remove(0)
    }

    #[test]
    fn rotate_three_moves_top_below_two() {
        // [C, B, A] with A on top becomes [A, C, B].
        let (a, b, c) = (PyType::Int, PyType::Str, PyType::Float);
        assert_eq!(
            run(Opcode::RotThree, 0, &[c.clone(), b.clone(), a.clone()]),
            vec![a, c, b]
        );
    }

    #[test]
    fn rot_n_keeps_descriptor_multiset() {
        let stack = [PyType::Bool, PyType::Int, PyType::Str, PyType::Float];
        let mut out = run(Opcode::RotN, 4, &stack);
        assert_eq!(out[0], PyType::Float);
        let mut expected = stack.to_vec();
        let key = |t: &PyType| t.to_string();
        out.sort_by_key(key);
        expected.sort_by_key(key);
        assert_eq!(out, expected);
    }

    #[test]
    fn copy_and_swap_reindex_by_depth() {
        let stack = [PyType::Int, PyType::Str, PyType::Float];
        assert_eq!(
            run(Opcode::Copy, 3, &stack),
            vec![PyType::Int, PyType::Str, PyType::Float, PyType::Int]
        );
        assert_eq!(run(Opcode::Swap, 3, &stack), vec![PyType::Float, PyType::Str, PyType::Int]);
        assert_eq!(run(Opcode::Swap, 2, &stack), vec![PyType::Int, PyType::Float, PyType::Str]);
    }

    #[test]
    fn dup_top_two_repeats_pair() {
        assert_eq!(
            run(Opcode::DupTopTwo, 0, &[PyType::Int, PyType::Str]),
            vec![PyType::Int, PyType::Str, PyType::Int, PyType::Str]
        );
    }
}
