//! Loads, stores and deletes of constants, locals, cells, globals and attributes.

use smallvec::{SmallVec, smallvec};

use crate::{
    analysis::{Binding, StackMetadata, SymbolicValue},
    bytecode::{FunctionDescriptor, Instruction, Opcode},
    codegen::Op,
    error::TranslateResult,
    opcodes::{
        EmitContext, FlowContext, OpcodeHandler, Outgoing, Successors, checked_index, invalid_operand, misrouted,
        pop, pop_one, produced, single,
    },
    types::PyType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    Plain,
    /// `LOAD_FAST_CHECK`: the compiler could not prove the slot bound.
    Check,
    /// `LOAD_FAST_AND_CLEAR`: saves and unbinds a slot around an inlined comprehension.
    AndClear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Const(usize),
    ReturnConst(usize),
    LoadFast { slot: usize, mode: LoadMode },
    StoreFast(usize),
    DeleteFast(usize),
    LoadDeref(usize),
    StoreDeref(usize),
    DeleteDeref(usize),
    LoadClosure(usize),
    LoadGlobal { name: usize, push_null: bool },
    StoreGlobal(usize),
    DeleteGlobal(usize),
    LoadAttr { name: usize, method: bool },
    StoreAttr(usize),
    DeleteAttr(usize),
}

#[derive(Debug)]
struct VariableHandler {
    instruction: Instruction,
    access: Access,
    /// Resolved name for global and attribute accesses.
    name: Option<String>,
}

pub(super) fn handler(instruction: Instruction, descriptor: &FunctionDescriptor) -> TranslateResult<Box<dyn OpcodeHandler>> {
    let arg = instruction.index();
    let modern = !descriptor.version.has_block_stack();
    let constant = |index| checked_index(&instruction, index, descriptor.constants.len(), "constant");
    let local = |index| checked_index(&instruction, index, descriptor.varnames.len(), "local");
    let name = |index| checked_index(&instruction, index, descriptor.names.len(), "name");
    let cell = |arg: u32| {
        descriptor
            .deref_cell_index(arg)
            .ok_or_else(|| invalid_operand(&instruction, format!("no cell for operand {arg}")))
    };

    let access = match instruction.opcode {
        Opcode::LoadConst => Access::Const(constant(arg)?),
        Opcode::ReturnConst => Access::ReturnConst(constant(arg)?),
        Opcode::LoadFast => Access::LoadFast {
            slot: local(arg)?,
            mode: LoadMode::Plain,
        },
        Opcode::LoadFastCheck => Access::LoadFast {
            slot: local(arg)?,
            mode: LoadMode::Check,
        },
        Opcode::LoadFastAndClear => Access::LoadFast {
            slot: local(arg)?,
            mode: LoadMode::AndClear,
        },
        Opcode::StoreFast => Access::StoreFast(local(arg)?),
        Opcode::DeleteFast => Access::DeleteFast(local(arg)?),
        Opcode::LoadDeref => Access::LoadDeref(cell(instruction.arg)?),
        Opcode::StoreDeref => Access::StoreDeref(cell(instruction.arg)?),
        Opcode::DeleteDeref => Access::DeleteDeref(cell(instruction.arg)?),
        Opcode::LoadClosure => Access::LoadClosure(cell(instruction.arg)?),
        Opcode::LoadGlobal if modern => Access::LoadGlobal {
            name: name(arg >> 1)?,
            push_null: arg & 1 == 1,
        },
        Opcode::LoadGlobal | Opcode::LoadName => Access::LoadGlobal {
            name: name(arg)?,
            push_null: false,
        },
        Opcode::StoreGlobal | Opcode::StoreName => Access::StoreGlobal(name(arg)?),
        Opcode::DeleteGlobal | Opcode::DeleteName => Access::DeleteGlobal(name(arg)?),
        Opcode::LoadAttr if descriptor.version.attr_carries_method_flag() => Access::LoadAttr {
            name: name(arg >> 1)?,
            method: arg & 1 == 1,
        },
        Opcode::LoadAttr => Access::LoadAttr {
            name: name(arg)?,
            method: false,
        },
        Opcode::LoadMethod => Access::LoadAttr {
            name: name(arg)?,
            method: true,
        },
        Opcode::StoreAttr => Access::StoreAttr(name(arg)?),
        Opcode::DeleteAttr => Access::DeleteAttr(name(arg)?),
        _ => return Err(misrouted(&instruction)),
    };
    let name = match access {
        Access::LoadGlobal { name, .. }
        | Access::StoreGlobal(name)
        | Access::DeleteGlobal(name)
        | Access::LoadAttr { name, .. }
        | Access::StoreAttr(name)
        | Access::DeleteAttr(name) => Some(descriptor.names[name].clone()),
        _ => None,
    };
    Ok(Box::new(VariableHandler {
        instruction,
        access,
        name,
    }))
}

impl VariableHandler {
    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    fn attribute_type(&self, owner: &SymbolicValue) -> PyType {
        match owner.ty() {
            PyType::Instance(class) => class.attribute_type(self.name()).cloned().unwrap_or(PyType::Object),
            _ => PyType::Object,
        }
    }
}

impl OpcodeHandler for VariableHandler {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn is_forced_jump(&self) -> bool {
        matches!(self.access, Access::ReturnConst(_))
    }

    fn next_offsets(&self) -> Successors {
        match self.access {
            Access::ReturnConst(_) => SmallVec::new(),
            _ => smallvec![self.offset() + 1],
        }
    }

    fn transfer(&self, ctx: &FlowContext<'_>, incoming: &StackMetadata) -> TranslateResult<Outgoing> {
        let instruction = &self.instruction;
        let out = match self.access {
            Access::Const(index) => {
                let ty = PyType::of_constant(&ctx.descriptor.constants[index]);
                incoming.push(produced(instruction, ty))
            }
            Access::ReturnConst(_) => return Ok(SmallVec::new()),
            Access::LoadFast { slot, mode } => {
                let binding = incoming.local(slot).cloned().unwrap_or(Binding::Unbound);
                let value = binding.value().cloned().unwrap_or_else(SymbolicValue::object);
                let pushed = incoming.push(value.clone());
                match mode {
                    LoadMode::AndClear => pushed.set_local(slot, Binding::Unbound),
                    // Execution only continues past the load if the slot was bound.
                    LoadMode::Plain | LoadMode::Check if !binding.is_bound() => {
                        pushed.set_local(slot, Binding::Bound(value))
                    }
                    LoadMode::Plain | LoadMode::Check => pushed,
                }
            }
            Access::StoreFast(slot) => {
                let (rest, value) = pop_one(instruction, incoming)?;
                rest.set_local(slot, Binding::Bound(value))
            }
            Access::DeleteFast(slot) => incoming.set_local(slot, Binding::Unbound),
            // Nested scopes may rebind a cell at any time.
            Access::LoadDeref(_) => incoming.push(produced(instruction, PyType::Object)),
            Access::StoreDeref(cell) => {
                let (rest, value) = pop_one(instruction, incoming)?;
                rest.set_cell(cell, Binding::Bound(value))
            }
            Access::DeleteDeref(cell) => incoming.set_cell(cell, Binding::Unbound),
            Access::LoadClosure(_) => incoming.push(produced(instruction, PyType::Cell)),
            Access::LoadGlobal { push_null, .. } => {
                let value = produced(instruction, ctx.global_type(self.name()));
                if push_null {
                    incoming.push(produced(instruction, PyType::Null)).push(value)
                } else {
                    incoming.push(value)
                }
            }
            Access::StoreGlobal(_) => pop(instruction, incoming, 1)?.0,
            Access::DeleteGlobal(_) => incoming.clone(),
            Access::DeleteAttr(_) => pop(instruction, incoming, 1)?.0,
            Access::LoadAttr { method, .. } => {
                let (rest, owner) = pop_one(instruction, incoming)?;
                let attribute = produced(instruction, self.attribute_type(&owner));
                if method {
                    rest.push(produced(instruction, PyType::Null)).push(attribute)
                } else {
                    rest.push(attribute)
                }
            }
            Access::StoreAttr(_) => pop(instruction, incoming, 2)?.0,
        };
        single(out)
    }

    fn emit(&self, ctx: &mut EmitContext<'_, '_>, incoming: &StackMetadata) -> TranslateResult<()> {
        let op = match self.access {
            Access::Const(index) => Op::LoadConst(index),
            Access::ReturnConst(index) => {
                ctx.emitter.emit(Op::LoadConst(index));
                Op::Return
            }
            Access::LoadFast {
                slot,
                mode: LoadMode::AndClear,
            } => Op::LoadLocalAndClear(slot),
            Access::LoadFast { slot, .. } => {
                let proven = incoming.local(slot).is_some_and(Binding::is_bound);
                Op::LoadLocal {
                    slot,
                    checked: !(proven && ctx.specialize()),
                }
            }
            Access::StoreFast(slot) => Op::StoreLocal(slot),
            Access::DeleteFast(slot) => Op::DeleteLocal(slot),
            Access::LoadDeref(cell) => Op::LoadDeref(cell),
            Access::StoreDeref(cell) => Op::StoreDeref(cell),
            Access::DeleteDeref(cell) => Op::DeleteDeref(cell),
            Access::LoadClosure(cell) => Op::LoadClosure(cell),
            Access::LoadGlobal { name, push_null } => {
                if push_null {
                    ctx.emitter.emit(Op::PushNull);
                }
                Op::LoadGlobal(name)
            }
            Access::StoreGlobal(name) => Op::StoreGlobal(name),
            Access::DeleteGlobal(name) => Op::DeleteGlobal(name),
            Access::LoadAttr { name, method: false } => Op::LoadAttr(name),
            Access::LoadAttr { name, method: true } => Op::LoadMethod(name),
            Access::StoreAttr(name) => Op::StoreAttr(name),
            Access::DeleteAttr(name) => Op::DeleteAttr(name),
        };
        ctx.emitter.emit(op);
        Ok(())
    }
}
