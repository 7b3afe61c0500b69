//! f-string formatting.

use crate::{
    analysis::StackMetadata,
    bytecode::{Instruction, Opcode},
    codegen::Op,
    error::TranslateResult,
    opcodes::{EmitContext, FlowContext, OpcodeHandler, Outgoing, misrouted, replace, single},
    types::PyType,
};

/// `FORMAT_VALUE` flag: a format spec sits above the value.
const FVS_HAVE_SPEC: u32 = 0x04;
/// `FORMAT_VALUE` conversion bits: none, `!s`, `!r`, `!a`.
const FVC_MASK: u32 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Value { conversion: u32, has_spec: bool },
    Build(usize),
}

#[derive(Debug)]
struct StringHandler {
    instruction: Instruction,
    format: Format,
}

pub(super) fn handler(instruction: Instruction) -> TranslateResult<Box<dyn OpcodeHandler>> {
    let format = match instruction.opcode {
        Opcode::FormatValue => Format::Value {
            conversion: instruction.arg & FVC_MASK,
            has_spec: instruction.arg & FVS_HAVE_SPEC != 0,
        },
        Opcode::BuildString => Format::Build(instruction.index()),
        _ => return Err(misrouted(&instruction)),
    };
    Ok(Box::new(StringHandler { instruction, format }))
}

impl OpcodeHandler for StringHandler {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn transfer(&self, _ctx: &FlowContext<'_>, incoming: &StackMetadata) -> TranslateResult<Outgoing> {
        let popped = match self.format {
            Format::Value { has_spec, .. } => 1 + usize::from(has_spec),
            Format::Build(count) => count,
        };
        single(replace(&self.instruction, incoming, popped, PyType::Str)?)
    }

    fn emit(&self, ctx: &mut EmitContext<'_, '_>, _incoming: &StackMetadata) -> TranslateResult<()> {
        let op = match self.format {
            Format::Value { conversion, has_spec } => Op::FormatValue { conversion, has_spec },
            Format::Build(count) => Op::BuildString(count),
        };
        ctx.emitter.emit(op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{bytecode::FunctionDescriptor, opcodes::harness::transfer, version::PythonVersion};

    #[test]
    fn formatted_pieces_join_to_str() {
        let desc = FunctionDescriptor::builder("f", PythonVersion::V3_10).build();
        let spec = transfer(&desc, Instruction::new(Opcode::FormatValue, 0x06, 0), &[PyType::Float, PyType::Str]);
        assert_eq!(spec, vec![vec![PyType::Str]]);
        let joined = transfer(
            &desc,
            Instruction::new(Opcode::BuildString, 3, 1),
            &[PyType::Int, PyType::Str, PyType::Str, PyType::Str],
        );
        assert_eq!(joined, vec![vec![PyType::Int, PyType::Str]]);
    }
}
