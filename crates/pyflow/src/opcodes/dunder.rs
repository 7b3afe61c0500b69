//! Operators: arithmetic, comparisons, identity, membership and subscripts.
//!
//! Binary, unary and comparison sites ask the [`TypeRegistry`](crate::types::TypeRegistry)
//! for a dispatch. The inferred result type flows on regardless of the
//! `specialize` setting; only the emitted op depends on it.

use crate::{
    analysis::StackMetadata,
    bytecode::{FunctionDescriptor, Instruction, Opcode},
    codegen::Op,
    error::TranslateResult,
    opcodes::{
        EmitContext, FlowContext, OpcodeHandler, Outgoing, invalid_operand, misrouted, pop, replace, single,
    },
    types::{BinaryOp, CompareOp, Dispatch, PyType, UnaryOp},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Binary { op: BinaryOp, inplace: bool },
    Unary(UnaryOp),
    Compare(CompareOp),
    Is { negate: bool },
    Contains { negate: bool },
    Subscr,
    StoreSubscr,
    DeleteSubscr,
    Slice,
    StoreSlice,
}

#[derive(Debug)]
struct OperatorHandler {
    instruction: Instruction,
    operator: Operator,
}

pub(super) fn handler(instruction: Instruction, descriptor: &FunctionDescriptor) -> TranslateResult<Box<dyn OpcodeHandler>> {
    let operator = match instruction.opcode {
        Opcode::BinaryOp => {
            let (op, inplace) = BinaryOp::from_nb_arg(instruction.arg)
                .ok_or_else(|| invalid_operand(&instruction, format!("unknown operator {}", instruction.arg)))?;
            Operator::Binary { op, inplace }
        }
        Opcode::UnaryPositive => Operator::Unary(UnaryOp::Pos),
        Opcode::UnaryNegative => Operator::Unary(UnaryOp::Neg),
        Opcode::UnaryInvert => Operator::Unary(UnaryOp::Invert),
        Opcode::UnaryNot => Operator::Unary(UnaryOp::Not),
        Opcode::CompareOp => {
            let op = CompareOp::from_arg(instruction.arg, descriptor.version)
                .ok_or_else(|| invalid_operand(&instruction, format!("unknown comparison {}", instruction.arg)))?;
            Operator::Compare(op)
        }
        Opcode::IsOp => Operator::Is {
            negate: instruction.arg != 0,
        },
        Opcode::ContainsOp => Operator::Contains {
            negate: instruction.arg != 0,
        },
        Opcode::BinarySubscr => Operator::Subscr,
        Opcode::StoreSubscr => Operator::StoreSubscr,
        Opcode::DeleteSubscr => Operator::DeleteSubscr,
        Opcode::BinarySlice => Operator::Slice,
        Opcode::StoreSlice => Operator::StoreSlice,
        opcode => match opcode.legacy_binary() {
            Some((op, inplace)) => Operator::Binary { op, inplace },
            None => return Err(misrouted(&instruction)),
        },
    };
    Ok(Box::new(OperatorHandler { instruction, operator }))
}

impl OperatorHandler {
    /// Resolves the dispatch for the operand types on top of `state`.
    fn dispatch(&self, ctx: &FlowContext<'_>, state: &StackMetadata) -> TranslateResult<Dispatch> {
        let instruction = &self.instruction;
        let reflected = ctx.config.reflected_operator_inference;
        let dispatch = match self.operator {
            Operator::Binary { op, inplace } => {
                let (_, operands) = pop(instruction, state, 2)?;
                ctx.registry
                    .resolve_binary(op, inplace, operands[0].ty(), operands[1].ty(), reflected)
            }
            Operator::Compare(op) => {
                let (_, operands) = pop(instruction, state, 2)?;
                ctx.registry.resolve_compare(op, operands[0].ty(), operands[1].ty(), reflected)
            }
            Operator::Unary(op) => {
                let (_, operands) = pop(instruction, state, 1)?;
                ctx.registry.resolve_unary(op, operands[0].ty())
            }
            Operator::Subscr => {
                let (_, operands) = pop(instruction, state, 2)?;
                ctx.registry
                    .resolve_method(operands[0].ty(), "__getitem__", Some(operands[1].ty()))
            }
            Operator::Slice => {
                let (_, operands) = pop(instruction, state, 3)?;
                ctx.registry
                    .resolve_method(operands[0].ty(), "__getitem__", Some(&PyType::Slice))
            }
            _ => Dispatch::Dynamic,
        };
        Ok(dispatch)
    }
}

impl OpcodeHandler for OperatorHandler {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn transfer(&self, ctx: &FlowContext<'_>, incoming: &StackMetadata) -> TranslateResult<Outgoing> {
        let instruction = &self.instruction;
        let out = match self.operator {
            Operator::Binary { .. } | Operator::Compare(_) | Operator::Subscr => {
                let result = self.dispatch(ctx, incoming)?.result_type();
                replace(instruction, incoming, 2, result)?
            }
            Operator::Unary(UnaryOp::Not) => replace(instruction, incoming, 1, PyType::Bool)?,
            Operator::Unary(_) => {
                let result = self.dispatch(ctx, incoming)?.result_type();
                replace(instruction, incoming, 1, result)?
            }
            Operator::Is { .. } | Operator::Contains { .. } => replace(instruction, incoming, 2, PyType::Bool)?,
            Operator::Slice => {
                let result = self.dispatch(ctx, incoming)?.result_type();
                replace(instruction, incoming, 3, result)?
            }
            Operator::StoreSubscr => pop(instruction, incoming, 3)?.0,
            Operator::DeleteSubscr => pop(instruction, incoming, 2)?.0,
            Operator::StoreSlice => pop(instruction, incoming, 4)?.0,
        };
        single(out)
    }

    fn emit(&self, ctx: &mut EmitContext<'_, '_>, incoming: &StackMetadata) -> TranslateResult<()> {
        let specialize = ctx.specialize();
        let op = match self.operator {
            Operator::Binary { op, inplace } => match self.dispatch(ctx.flow, incoming)? {
                Dispatch::Direct { kinds, .. } if specialize => Op::BinaryDirect { op, kinds, inplace },
                Dispatch::Method { reflected, .. } if specialize => Op::BinaryMethod {
                    op,
                    inplace,
                    reflected,
                },
                _ => Op::Binary { op, inplace },
            },
            Operator::Unary(UnaryOp::Not) => Op::Not,
            Operator::Unary(op) => match self.dispatch(ctx.flow, incoming)? {
                Dispatch::Direct { kinds, .. } if specialize => Op::UnaryDirect { op, kinds },
                _ => Op::Unary(op),
            },
            Operator::Compare(op) => match self.dispatch(ctx.flow, incoming)? {
                Dispatch::Direct { kinds, .. } if specialize => Op::CompareDirect { op, kinds },
                _ => Op::Compare(op),
            },
            Operator::Is { negate } => Op::Is { negate },
            Operator::Contains { negate } => Op::Contains { negate },
            Operator::Subscr => Op::Subscr,
            Operator::StoreSubscr => Op::StoreSubscr,
            Operator::DeleteSubscr => Op::DeleteSubscr,
            Operator::Slice => Op::Slice,
            Operator::StoreSlice => Op::StoreSlice,
        };
        ctx.emitter.emit(op);
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
        types::OperandKinds,
        version::PythonVersion,
    };

    fn descriptor(version: PythonVersion) -> FunctionDescriptor {
        FunctionDescriptor::builder("f", version).build()
    }

    #[test]
    fn int_addition_stays_int_and_specializes() {
        let desc = descriptor(PythonVersion::V3_11);
        let add = Instruction::new(Opcode::BinaryOp, 0, 0);
        assert_eq!(
            transfer(&desc, add.clone(), &[PyType::Int, PyType::Bool]),
            vec![vec![PyType::Int]]
        );
        assert_eq!(
            emit(&desc, &TranslateConfig::default(), add.clone(), &[PyType::Int, PyType::Int]),
            vec![Op::BinaryDirect {
                op: BinaryOp::Add,
                kinds: OperandKinds::IntInt,
                inplace: false
            }]
        );
        assert_eq!(
            emit(&desc, &TranslateConfig::dynamic_only(), add, &[PyType::Int, PyType::Int]),
            vec![Op::Binary {
                op: BinaryOp::Add,
                inplace: false
            }]
        );
    }

    #[test]
    fn legacy_inplace_opcode_decodes_operator() {
        let desc = descriptor(PythonVersion::V3_10);
        let ops = emit(
            &desc,
            &TranslateConfig::default(),
            Instruction::new(Opcode::InplaceSubtract, 0, 0),
            &[PyType::Float, PyType::Int],
        );
        assert_eq!(
            ops,
            vec![Op::BinaryDirect {
                op: BinaryOp::Sub,
                kinds: OperandKinds::FloatInt,
                inplace: true
            }]
        );
    }

    #[test]
    fn comparison_yields_bool_only_when_resolved() {
        let desc = descriptor(PythonVersion::V3_12);
        let lt = Instruction::new(Opcode::CompareOp, 0, 0);
        assert_eq!(transfer(&desc, lt.clone(), &[PyType::Int, PyType::Float]), vec![vec![PyType::Bool]]);
        assert_eq!(transfer(&desc, lt, &[PyType::Object, PyType::Int]), vec![vec![PyType::Object]]);
    }

    #[test]
    fn unknown_binary_operand_is_rejected() {
        let desc = descriptor(PythonVersion::V3_11);
        let err = crate::opcodes::handler_for(Instruction::new(Opcode::BinaryOp, 40, 2), &desc).unwrap_err();
        assert!(matches!(err, crate::error::TranslateError::InvalidOperand { offset: 2, .. }));
    }

    #[test]
    fn not_and_membership_are_bool() {
        let desc = descriptor(PythonVersion::V3_11);
        assert_eq!(
            transfer(&desc, Instruction::new(Opcode::UnaryNot, 0, 0), &[PyType::Str]),
            vec![vec![PyType::Bool]]
        );
        assert_eq!(
            transfer(&desc, Instruction::new(Opcode::ContainsOp, 1, 0), &[PyType::Int, PyType::List]),
            vec![vec![PyType::Bool]]
        );
    }

    #[test]
    fn slicing_a_list_keeps_list() {
        let desc = descriptor(PythonVersion::V3_12);
        assert_eq!(
            transfer(
                &desc,
                Instruction::new(Opcode::BinarySlice, 0, 0),
                &[PyType::List, PyType::Int, PyType::NoneType]
            ),
            vec![vec![PyType::List]]
        );
        assert_eq!(
            transfer(&desc, Instruction::new(Opcode::BinarySubscr, 0, 0), &[PyType::List, PyType::Int]),
            vec![vec![PyType::Object]]
        );
    }
}
