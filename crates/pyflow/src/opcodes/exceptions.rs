//! Exception regions, raising, and `with` statements.
//!
//! A region setup has two successors: the protected body and the handler.
//! The handler edge does not continue from the incoming stack the way other
//! edges do. It carries the stack depth recorded at setup plus the fixed
//! values the unwinder pushes, and every local is widened, since the
//! exception may come from anywhere inside the body.

use smallvec::{SmallVec, smallvec};

use crate::{
    analysis::{StackMetadata, SymbolicValue},
    bytecode::{FunctionDescriptor, Instruction, Opcode},
    codegen::{HandlerShape, Op},
    error::TranslateResult,
    exception::ExcType,
    opcodes::{
        EmitContext, FlowContext, OpcodeHandler, Outgoing, Successors, branch_successors, invalid_operand, jump_target,
        misrouted, pop, pop_one, produced, replace, single,
    },
    types::PyType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    /// `SETUP_FINALLY` and 3.11+ `SETUP_CLEANUP`.
    Plain,
    /// 3.10 `SETUP_WITH`: enters the manager, then protects the body.
    EnterManager,
    /// 3.11+ `SETUP_WITH`: the handler runs without the `__enter__` result.
    DropEnterResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Setup {
        target: usize,
        region: Region,
        shape: HandlerShape,
    },
    PopBlock,
    PopExcept { legacy: bool },
    PushExcInfo,
    Reraise { legacy: bool, with_lasti: bool },
    Raise(usize),
    BeforeWith,
    WithExceptStart { legacy: bool },
    JumpIfNotExcMatch(usize),
    CheckExcMatch,
    LoadAssertionError,
}

#[derive(Debug)]
struct ExceptionHandler {
    instruction: Instruction,
    action: Action,
}

pub(super) fn handler(instruction: Instruction, descriptor: &FunctionDescriptor) -> TranslateResult<Box<dyn OpcodeHandler>> {
    let legacy = descriptor.version.has_block_stack();
    let setup = |region, shape| -> TranslateResult<Action> {
        Ok(Action::Setup {
            target: jump_target(&instruction)?,
            region,
            shape,
        })
    };
    let action = match instruction.opcode {
        Opcode::SetupFinally if legacy => setup(Region::Plain, HandlerShape::Legacy)?,
        Opcode::SetupFinally => setup(Region::Plain, HandlerShape::Exc)?,
        Opcode::SetupCleanup => setup(Region::Plain, HandlerShape::LastiExc)?,
        Opcode::SetupWith if legacy => setup(Region::EnterManager, HandlerShape::Legacy)?,
        Opcode::SetupWith => setup(Region::DropEnterResult, HandlerShape::LastiExc)?,
        Opcode::PopBlock => Action::PopBlock,
        Opcode::PopExcept => Action::PopExcept { legacy },
        Opcode::PushExcInfo => Action::PushExcInfo,
        Opcode::Reraise => Action::Reraise {
            legacy,
            with_lasti: instruction.arg != 0,
        },
        Opcode::RaiseVarargs if instruction.arg <= 2 => Action::Raise(instruction.index()),
        Opcode::RaiseVarargs => {
            return Err(invalid_operand(&instruction, format!("raise with {} operands", instruction.arg)));
        }
        Opcode::BeforeWith => Action::BeforeWith,
        Opcode::WithExceptStart => Action::WithExceptStart { legacy },
        Opcode::JumpIfNotExcMatch => Action::JumpIfNotExcMatch(jump_target(&instruction)?),
        Opcode::CheckExcMatch => Action::CheckExcMatch,
        Opcode::LoadAssertionError => Action::LoadAssertionError,
        _ => return Err(misrouted(&instruction)),
    };
    Ok(Box::new(ExceptionHandler { instruction, action }))
}

/// Values the unwinder pushes on entry to a handler, bottom first.
fn handler_values(instruction: &Instruction, shape: HandlerShape) -> Vec<SymbolicValue> {
    let exception = || produced(instruction, PyType::Exception(ExcType::BaseException));
    match shape {
        // Saved (traceback, value, type), then the raised (traceback, value, type).
        HandlerShape::Legacy => vec![
            produced(instruction, PyType::Object),
            produced(instruction, PyType::Object),
            produced(instruction, PyType::Object),
            produced(instruction, PyType::Object),
            exception(),
            produced(instruction, PyType::Type),
        ],
        HandlerShape::Exc => vec![exception()],
        HandlerShape::LastiExc => vec![produced(instruction, PyType::Int), exception()],
    }
}

impl ExceptionHandler {
    /// Stack depth the unwinder truncates to before pushing the handler shape.
    fn handler_depth(&self, incoming: &StackMetadata) -> usize {
        match self.action {
            Action::Setup {
                region: Region::DropEnterResult,
                ..
            } => incoming.depth().saturating_sub(1),
            _ => incoming.depth(),
        }
    }
}

impl OpcodeHandler for ExceptionHandler {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn is_forced_jump(&self) -> bool {
        matches!(self.action, Action::Reraise { .. } | Action::Raise(_))
    }

    fn next_offsets(&self) -> Successors {
        match self.action {
            Action::Setup { .. } | Action::JumpIfNotExcMatch(_) => branch_successors(&self.instruction),
            Action::Reraise { .. } | Action::Raise(_) => SmallVec::new(),
            _ => smallvec![self.offset() + 1],
        }
    }

    fn transfer(&self, _ctx: &FlowContext<'_>, incoming: &StackMetadata) -> TranslateResult<Outgoing> {
        let instruction = &self.instruction;
        match self.action {
            Action::Setup { region, shape, .. } => {
                let (body, protected) = match region {
                    Region::Plain => (incoming.clone(), incoming.clone()),
                    Region::EnterManager => {
                        let (rest, _manager) = pop_one(instruction, incoming)?;
                        let with_exit = rest.push(produced(instruction, PyType::Object));
                        (with_exit.push(produced(instruction, PyType::Object)), with_exit)
                    }
                    Region::DropEnterResult => (incoming.clone(), pop(instruction, incoming, 1)?.0),
                };
                let entry = protected
                    .push_all(handler_values(instruction, shape))
                    .with_bindings_widened();
                Ok(smallvec![body, entry])
            }
            Action::PopBlock => single(incoming.clone()),
            Action::PopExcept { legacy } => single(pop(instruction, incoming, if legacy { 3 } else { 1 })?.0),
            Action::PushExcInfo => {
                let (rest, exception) = pop_one(instruction, incoming)?;
                single(rest.push(produced(instruction, PyType::Object)).push(exception))
            }
            Action::Reraise { legacy, with_lasti } => {
                let needed = if legacy { 3 } else { 1 + usize::from(with_lasti) };
                pop(instruction, incoming, needed)?;
                Ok(SmallVec::new())
            }
            Action::Raise(argc) => {
                pop(instruction, incoming, argc)?;
                Ok(SmallVec::new())
            }
            Action::BeforeWith => {
                let (rest, _manager) = pop_one(instruction, incoming)?;
                single(
                    rest.push(produced(instruction, PyType::Object))
                        .push(produced(instruction, PyType::Object)),
                )
            }
            Action::WithExceptStart { legacy } => {
                // The exit callable sits below the handler values.
                pop(instruction, incoming, if legacy { 7 } else { 4 })?;
                single(incoming.push(produced(instruction, PyType::Object)))
            }
            Action::JumpIfNotExcMatch(_) => {
                let (rest, _) = pop(instruction, incoming, 2)?;
                Ok(smallvec![rest.clone(), rest])
            }
            Action::CheckExcMatch => single(replace(instruction, incoming, 1, PyType::Bool)?),
            Action::LoadAssertionError => single(incoming.push(produced(
                instruction,
                PyType::ExceptionClass(ExcType::AssertionError),
            ))),
        }
    }

    fn emit(&self, ctx: &mut EmitContext<'_, '_>, incoming: &StackMetadata) -> TranslateResult<()> {
        let op = match self.action {
            Action::Setup { target, region, shape } => {
                if region == Region::EnterManager {
                    ctx.emitter.emit(Op::BeforeWith);
                }
                Op::PushHandler {
                    target,
                    depth: self.handler_depth(incoming),
                    shape,
                }
            }
            Action::PopBlock => Op::PopHandler,
            Action::PopExcept { legacy } => Op::PopExcept { legacy },
            Action::PushExcInfo => Op::PushExcInfo,
            Action::Reraise { legacy, with_lasti } => Op::Reraise {
                legacy,
                pops_lasti: with_lasti,
            },
            Action::Raise(argc) => Op::Raise(argc),
            Action::BeforeWith => Op::BeforeWith,
            Action::WithExceptStart { legacy } => Op::WithExceptStart { legacy },
            Action::JumpIfNotExcMatch(target) => Op::JumpIfNotExcMatch(target),
            Action::CheckExcMatch => Op::CheckExcMatch,
            Action::LoadAssertionError => Op::LoadAssertionError,
        };
        ctx.emitter.emit(op);
        Ok(())
    }
}
