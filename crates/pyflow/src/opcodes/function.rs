//! Calls and function creation.

use crate::{
    analysis::{StackMetadata, SymbolicValue},
    bytecode::{FunctionDescriptor, Instruction, Opcode},
    codegen::{CallLayout, KeywordNames, Op},
    error::TranslateResult,
    opcodes::{
        EmitContext, FlowContext, OpcodeHandler, Outgoing, checked_index, misrouted, pop, replace, single,
    },
    types::{Builtin, PyType},
};

/// `MAKE_FUNCTION` flag bits, one popped value each.
const MAKE_DEFAULTS: u32 = 0x01;
const MAKE_KWDEFAULTS: u32 = 0x02;
const MAKE_ANNOTATIONS: u32 = 0x04;
const MAKE_CLOSURE: u32 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Site {
    Call {
        argc: usize,
        layout: CallLayout,
        keywords: KeywordNames,
    },
    CallEx {
        has_kwargs: bool,
        null_below: bool,
    },
    MakeFunction {
        flags: u32,
        with_qualname: bool,
    },
}

#[derive(Debug)]
struct CallHandler {
    instruction: Instruction,
    site: Site,
}

pub(super) fn handler(instruction: Instruction, descriptor: &FunctionDescriptor) -> TranslateResult<Box<dyn OpcodeHandler>> {
    let argc = instruction.index();
    let modern = descriptor.version.uses_null_call_convention();
    let site = match instruction.opcode {
        Opcode::CallFunction => Site::Call {
            argc,
            layout: CallLayout::Plain,
            keywords: KeywordNames::None,
        },
        Opcode::CallFunctionKw => Site::Call {
            argc,
            layout: CallLayout::Plain,
            keywords: KeywordNames::Stack,
        },
        Opcode::CallMethod => Site::Call {
            argc,
            layout: CallLayout::MethodPair,
            keywords: KeywordNames::None,
        },
        Opcode::Call => {
            let keywords = match instruction.kw_names {
                Some(index) => KeywordNames::Const(checked_index(
                    &instruction,
                    index as usize,
                    descriptor.constants.len(),
                    "constant",
                )?),
                None => KeywordNames::None,
            };
            Site::Call {
                argc,
                layout: CallLayout::MethodPair,
                keywords,
            }
        }
        Opcode::CallFunctionEx => Site::CallEx {
            has_kwargs: instruction.arg & 1 == 1,
            null_below: modern,
        },
        Opcode::MakeFunction => Site::MakeFunction {
            flags: instruction.arg,
            with_qualname: descriptor.version.has_block_stack(),
        },
        _ => return Err(misrouted(&instruction)),
    };
    Ok(Box::new(CallHandler { instruction, site }))
}

/// Splits popped call values into the callee and its positional arguments.
///
/// Returns `None` for a bound-method pair, whose callee is not statically known.
fn callee_and_args(values: &[SymbolicValue], layout: CallLayout, keywords: KeywordNames) -> Option<(&PyType, Vec<PyType>)> {
    let (callee, args) = match layout {
        CallLayout::Plain => values.split_first()?,
        CallLayout::MethodPair => {
            let (receiver, rest) = values.split_first()?;
            if *receiver.ty() != PyType::Null {
                return None;
            }
            rest.split_first()?
        }
    };
    let args = match keywords {
        KeywordNames::Stack => &args[..args.len().saturating_sub(1)],
        _ => args,
    };
    Some((callee.ty(), args.iter().map(|v| v.ty().clone()).collect()))
}

impl CallHandler {
    fn popped(&self) -> usize {
        match self.site {
            Site::Call { argc, layout, keywords } => {
                let callee = match layout {
                    CallLayout::Plain => 1,
                    CallLayout::MethodPair => 2,
                };
                argc + callee + usize::from(keywords == KeywordNames::Stack)
            }
            Site::CallEx { has_kwargs, null_below } => 2 + usize::from(has_kwargs) + usize::from(null_below),
            Site::MakeFunction { flags, with_qualname } => {
                let extras = [MAKE_DEFAULTS, MAKE_KWDEFAULTS, MAKE_ANNOTATIONS, MAKE_CLOSURE]
                    .into_iter()
                    .filter(|bit| flags & bit != 0)
                    .count();
                1 + usize::from(with_qualname) + extras
            }
        }
    }

    /// Result type of the call, and the builtin to call natively if one
    /// signature is proven.
    fn resolve(&self, ctx: &FlowContext<'_>, incoming: &StackMetadata) -> TranslateResult<(PyType, Option<Builtin>)> {
        let Site::Call { layout, keywords, .. } = self.site else {
            return Ok((PyType::Object, None));
        };
        let (_, values) = pop(&self.instruction, incoming, self.popped())?;
        let Some((callee, args)) = callee_and_args(&values, layout, keywords) else {
            return Ok((PyType::Object, None));
        };
        let resolved = match callee {
            PyType::Builtin(builtin) if keywords == KeywordNames::None => {
                match ctx.registry.resolve_call(*builtin, &args) {
                    Some(result) => (result, Some(*builtin)),
                    None => (PyType::Object, None),
                }
            }
            PyType::ExceptionClass(kind) => (PyType::Exception(*kind), None),
            PyType::Class(class) => (PyType::Instance(class.clone()), None),
            _ => (PyType::Object, None),
        };
        Ok(resolved)
    }
}

impl OpcodeHandler for CallHandler {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn transfer(&self, ctx: &FlowContext<'_>, incoming: &StackMetadata) -> TranslateResult<Outgoing> {
        let result = match self.site {
            Site::Call { .. } => self.resolve(ctx, incoming)?.0,
            Site::CallEx { .. } => PyType::Object,
            Site::MakeFunction { .. } => PyType::Function,
        };
        single(replace(&self.instruction, incoming, self.popped(), result)?)
    }

    fn emit(&self, ctx: &mut EmitContext<'_, '_>, incoming: &StackMetadata) -> TranslateResult<()> {
        let op = match self.site {
            Site::Call { argc, layout, keywords } => match self.resolve(ctx.flow, incoming)? {
                (_, Some(builtin)) if ctx.specialize() => Op::CallBuiltin { builtin, argc, layout },
                _ => Op::Call { argc, layout, keywords },
            },
            Site::CallEx { has_kwargs, null_below } => Op::CallEx { has_kwargs, null_below },
            Site::MakeFunction { flags, with_qualname } => Op::MakeFunction { flags, with_qualname },
        };
        ctx.emitter.emit(op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ahash::AHashMap;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::TranslateConfig,
        exception::ExcType,
        opcodes::harness::{emit, transfer},
        types::ClassType,
        version::PythonVersion,
    };

    fn descriptor(version: PythonVersion) -> FunctionDescriptor {
        FunctionDescriptor::builder("f", version).build()
    }

    #[test]
    fn len_of_list_is_a_native_int_call() {
        let desc = descriptor(PythonVersion::V3_11);
        let call = Instruction::new(Opcode::Call, 1, 0);
        let stack = [PyType::Null, PyType::Builtin(Builtin::Len), PyType::List];
        assert_eq!(transfer(&desc, call.clone(), &stack), vec![vec![PyType::Int]]);
        assert_eq!(
            emit(&desc, &TranslateConfig::default(), call, &stack),
            vec![Op::CallBuiltin {
                builtin: Builtin::Len,
                argc: 1,
                layout: CallLayout::MethodPair
            }]
        );
    }

    #[test]
    fn bound_method_call_is_unknown() {
        let desc = descriptor(PythonVersion::V3_11);
        let stack = [PyType::Function, PyType::Str, PyType::Int];
        assert_eq!(
            transfer(&desc, Instruction::new(Opcode::Call, 1, 0), &stack),
            vec![vec![PyType::Object]]
        );
    }

    #[test]
    fn constructing_classes_types_the_instance() {
        let desc = descriptor(PythonVersion::V3_10);
        let class = Arc::new(ClassType::new("Point", vec![], AHashMap::new(), IndexMap::new()).unwrap());
        let stack = [PyType::Class(class.clone()), PyType::Int, PyType::Int];
        assert_eq!(
            transfer(&desc, Instruction::new(Opcode::CallFunction, 2, 0), &stack),
            vec![vec![PyType::Instance(class)]]
        );
        let stack = [PyType::ExceptionClass(ExcType::KeyError), PyType::Str];
        assert_eq!(
            transfer(&desc, Instruction::new(Opcode::CallFunction, 1, 0), &stack),
            vec![vec![PyType::Exception(ExcType::KeyError)]]
        );
    }

    #[test]
    fn keyword_call_pops_names_tuple() {
        let desc = descriptor(PythonVersion::V3_10);
        let stack = [PyType::Int, PyType::Builtin(Builtin::Print), PyType::Str, PyType::Str, PyType::Tuple];
        assert_eq!(
            transfer(&desc, Instruction::new(Opcode::CallFunctionKw, 2, 0), &stack),
            vec![vec![PyType::Int, PyType::Object]]
        );
    }

    #[test]
    fn make_function_pops_one_value_per_flag() {
        let legacy = descriptor(PythonVersion::V3_10);
        let stack = [PyType::Tuple, PyType::Tuple, PyType::Code, PyType::Str];
        assert_eq!(
            transfer(&legacy, Instruction::new(Opcode::MakeFunction, 0x09, 0), &stack),
            vec![vec![PyType::Function]]
        );
        let modern = descriptor(PythonVersion::V3_12);
        assert_eq!(
            transfer(&modern, Instruction::new(Opcode::MakeFunction, 0x01, 0), &stack),
            vec![vec![PyType::Tuple, PyType::Tuple, PyType::Function]]
        );
    }
}
