//! Collection construction, comprehension appends and unpacking.

use crate::{
    analysis::StackMetadata,
    bytecode::{FunctionDescriptor, Instruction, Opcode},
    codegen::Op,
    error::TranslateResult,
    opcodes::{
        EmitContext, FlowContext, OpcodeHandler, Outgoing, invalid_operand, misrouted, pop, pop_one, produced,
        replace, single,
    },
    types::PyType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Build { ty: Build, count: usize },
    /// Adds TOS (two values for `MapAdd`) to the collection `depth` below.
    Accumulate { kind: Accumulate, depth: usize },
    ListToTuple,
    UnpackSequence(usize),
    UnpackEx { before: usize, after: usize },
    GetLen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Build {
    Tuple,
    List,
    Set,
    Map,
    ConstKeyMap,
    Slice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accumulate {
    ListAppend,
    SetAdd,
    MapAdd,
    ListExtend,
    SetUpdate,
    DictUpdate,
    DictMerge,
}

#[derive(Debug)]
struct CollectionHandler {
    instruction: Instruction,
    shape: Shape,
}

pub(super) fn handler(instruction: Instruction, _descriptor: &FunctionDescriptor) -> TranslateResult<Box<dyn OpcodeHandler>> {
    let count = instruction.index();
    let build = |ty| Shape::Build { ty, count };
    let accumulate = |kind| Shape::Accumulate { kind, depth: count };
    let shape = match instruction.opcode {
        Opcode::BuildTuple => build(Build::Tuple),
        Opcode::BuildList => build(Build::List),
        Opcode::BuildSet => build(Build::Set),
        Opcode::BuildMap => build(Build::Map),
        Opcode::BuildConstKeyMap => build(Build::ConstKeyMap),
        Opcode::BuildSlice if count == 2 || count == 3 => build(Build::Slice),
        Opcode::BuildSlice => return Err(invalid_operand(&instruction, format!("slice of {count} parts"))),
        Opcode::ListAppend => accumulate(Accumulate::ListAppend),
        Opcode::SetAdd => accumulate(Accumulate::SetAdd),
        Opcode::MapAdd => accumulate(Accumulate::MapAdd),
        Opcode::ListExtend => accumulate(Accumulate::ListExtend),
        Opcode::SetUpdate => accumulate(Accumulate::SetUpdate),
        Opcode::DictUpdate => accumulate(Accumulate::DictUpdate),
        Opcode::DictMerge => accumulate(Accumulate::DictMerge),
        Opcode::ListToTuple => Shape::ListToTuple,
        Opcode::UnpackSequence => Shape::UnpackSequence(count),
        Opcode::UnpackEx => Shape::UnpackEx {
            before: count & 0xFF,
            after: count >> 8,
        },
        Opcode::GetLen => Shape::GetLen,
        _ => return Err(misrouted(&instruction)),
    };
    Ok(Box::new(CollectionHandler { instruction, shape }))
}

impl Build {
    fn result(self) -> PyType {
        match self {
            Self::Tuple => PyType::Tuple,
            Self::List => PyType::List,
            Self::Set => PyType::Set,
            Self::Map | Self::ConstKeyMap => PyType::Dict,
            Self::Slice => PyType::Slice,
        }
    }

    /// Stack values consumed for `count`.
    fn consumed(self, count: usize) -> usize {
        match self {
            Self::Map => count * 2,
            // Values plus the tuple of keys.
            Self::ConstKeyMap => count + 1,
            _ => count,
        }
    }
}

/// Static type of the items of an unpacked sequence.
fn element_type(sequence: &PyType) -> PyType {
    match sequence {
        PyType::Str => PyType::Str,
        PyType::Range => PyType::Int,
        _ => PyType::Object,
    }
}

impl OpcodeHandler for CollectionHandler {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn transfer(&self, _ctx: &FlowContext<'_>, incoming: &StackMetadata) -> TranslateResult<Outgoing> {
        let instruction = &self.instruction;
        let out = match self.shape {
            Shape::Build { ty, count } => replace(instruction, incoming, ty.consumed(count), ty.result())?,
            Shape::Accumulate {
                kind: Accumulate::MapAdd,
                depth,
            } => {
                let (rest, _) = pop(instruction, incoming, 2)?;
                // The target dict must still be there once key and value are gone.
                pop(instruction, &rest, depth)?;
                rest
            }
            Shape::Accumulate { depth, .. } => {
                let (rest, _) = pop_one(instruction, incoming)?;
                pop(instruction, &rest, depth)?;
                rest
            }
            Shape::ListToTuple => replace(instruction, incoming, 1, PyType::Tuple)?,
            Shape::UnpackSequence(count) => {
                let (rest, sequence) = pop_one(instruction, incoming)?;
                let item = element_type(sequence.ty());
                rest.push_all((0..count).map(|_| produced(instruction, item.clone())))
            }
            Shape::UnpackEx { before, after } => {
                let (rest, sequence) = pop_one(instruction, incoming)?;
                let item = element_type(sequence.ty());
                // Pushed in reverse so the first target ends up on top.
                let trailing = (0..after).map(|_| produced(instruction, item.clone()));
                let starred = std::iter::once(produced(instruction, PyType::List));
                let leading = (0..before).map(|_| produced(instruction, item.clone()));
                rest.push_all(trailing.chain(starred).chain(leading))
            }
            Shape::GetLen => incoming.push(produced(instruction, PyType::Int)),
        };
        single(out)
    }

    fn emit(&self, ctx: &mut EmitContext<'_, '_>, _incoming: &StackMetadata) -> TranslateResult<()> {
        let op = match self.shape {
            Shape::Build { ty, count } => match ty {
                Build::Tuple => Op::BuildTuple(count),
                Build::List => Op::BuildList(count),
                Build::Set => Op::BuildSet(count),
                Build::Map => Op::BuildMap(count),
                Build::ConstKeyMap => Op::BuildConstKeyMap(count),
                Build::Slice => Op::BuildSlice(count),
            },
            Shape::Accumulate { kind, depth } => match kind {
                Accumulate::ListAppend => Op::ListAppend(depth),
                Accumulate::SetAdd => Op::SetAdd(depth),
                Accumulate::MapAdd => Op::MapAdd(depth),
                Accumulate::ListExtend => Op::ListExtend(depth),
                Accumulate::SetUpdate => Op::SetUpdate(depth),
                Accumulate::DictUpdate => Op::DictUpdate(depth),
                Accumulate::DictMerge => Op::DictMerge(depth),
            },
            Shape::ListToTuple => Op::ListToTuple,
            Shape::UnpackSequence(count) => Op::UnpackSequence(count),
            Shape::UnpackEx { before, after } => Op::UnpackEx { before, after },
            Shape::GetLen => Op::GetLen,
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
    fn build_map_consumes_pairs() {
        let stack = [PyType::Int, PyType::Str, PyType::Int, PyType::Str, PyType::Float];
        assert_eq!(run(Opcode::BuildMap, 2, &stack), vec![PyType::Int, PyType::Dict]);
        assert_eq!(
            run(Opcode::BuildConstKeyMap, 2, &[PyType::Int, PyType::Int, PyType::Tuple]),
            vec![PyType::Dict]
        );
    }

    #[test]
    fn unpack_ex_puts_starred_list_between_targets() {
        // a, *rest, b = s  ->  before=1, after=1
        let out = run(Opcode::UnpackEx, 1 | (1 << 8), &[PyType::Tuple]);
        assert_eq!(out, vec![PyType::Object, PyType::List, PyType::Object]);
        let out = run(Opcode::UnpackEx, 2, &[PyType::Str]);
        assert_eq!(out, vec![PyType::List, PyType::Str, PyType::Str]);
    }

    #[test]
    fn list_append_keeps_target_below() {
        let out = run(Opcode::ListAppend, 2, &[PyType::List, PyType::Iterator, PyType::Int]);
        assert_eq!(out, vec![PyType::List, PyType::Iterator]);
    }

    #[test]
    fn bad_slice_arity_is_invalid() {
        let descriptor = FunctionDescriptor::builder("f", PythonVersion::V3_11).build();
        let err = crate::opcodes::handler_for(Instruction::new(Opcode::BuildSlice, 4, 0), &descriptor).unwrap_err();
        assert!(matches!(err, crate::error::TranslateError::InvalidOperand { .. }));
    }
}
