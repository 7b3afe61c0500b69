//! Imports.

use crate::{
    analysis::StackMetadata,
    bytecode::{FunctionDescriptor, Instruction, Opcode},
    codegen::Op,
    error::TranslateResult,
    opcodes::{
        EmitContext, FlowContext, OpcodeHandler, Outgoing, checked_index, misrouted, pop, produced, replace, single,
    },
    types::PyType,
};

#[derive(Debug)]
struct ImportHandler {
    instruction: Instruction,
    /// Index into the name table.
    name: usize,
}

pub(super) fn handler(instruction: Instruction, descriptor: &FunctionDescriptor) -> TranslateResult<Box<dyn OpcodeHandler>> {
    if !matches!(instruction.opcode, Opcode::ImportName | Opcode::ImportFrom) {
        return Err(misrouted(&instruction));
    }
    let name = checked_index(&instruction, instruction.index(), descriptor.names.len(), "name")?;
    Ok(Box::new(ImportHandler { instruction, name }))
}

impl OpcodeHandler for ImportHandler {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn transfer(&self, _ctx: &FlowContext<'_>, incoming: &StackMetadata) -> TranslateResult<Outgoing> {
        let instruction = &self.instruction;
        match instruction.opcode {
            // [level, fromlist] -> [module]
            Opcode::ImportName => single(replace(instruction, incoming, 2, PyType::Module)?),
            // The module stays below the imported attribute.
            _ => {
                pop(instruction, incoming, 1)?;
                single(incoming.push(produced(instruction, PyType::Object)))
            }
        }
    }

    fn emit(&self, ctx: &mut EmitContext<'_, '_>, _incoming: &StackMetadata) -> TranslateResult<()> {
        let op = match self.instruction.opcode {
            Opcode::ImportName => Op::ImportName(self.name),
            _ => Op::ImportFrom(self.name),
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

    #[test]
    fn from_import_keeps_module_on_stack() {
        let desc = FunctionDescriptor::builder("f", PythonVersion::V3_11).names(&["math", "sqrt"]).build();
        let imported = transfer(&desc, Instruction::new(Opcode::ImportName, 0, 0), &[PyType::Int, PyType::Tuple]);
        assert_eq!(imported, vec![vec![PyType::Module]]);
        let attr = transfer(&desc, Instruction::new(Opcode::ImportFrom, 1, 1), &[PyType::Module]);
        assert_eq!(attr, vec![vec![PyType::Module, PyType::Object]]);
    }
}
