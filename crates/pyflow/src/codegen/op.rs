//! The target instruction set.
//!
//! Ops are produced by opcode handlers from analyzed bytecode and executed by
//! [`crate::runtime`]. Jump targets hold source offsets while the emitter is
//! running and op indices once [`Emitter::finish`](super::Emitter::finish) has
//! rewritten them.

use strum::IntoStaticStr;

use crate::types::{BinaryOp, Builtin, CompareOp, OperandKinds, UnaryOp};

/// Condition tested by [`Op::PopJumpIf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpCondition {
    True,
    False,
    None,
    NotNone,
}

/// Stack layout of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLayout {
    /// `[callable, args...]`
    Plain,
    /// `[NULL, callable, args...]` or `[method, self, args...]`
    MethodPair,
}

/// Where a call site's keyword names come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordNames {
    None,
    /// A constant tuple, attached by `KW_NAMES`.
    Const(usize),
    /// A tuple on top of the stack, above the arguments.
    Stack,
}

/// Values pushed when an exception unwinds into a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerShape {
    /// Block-stack era: previous and current `(traceback, value, type)`.
    Legacy,
    /// `[exc]`
    Exc,
    /// `[lasti, exc]`
    LastiExc,
}

impl HandlerShape {
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::Legacy => 6,
            Self::Exc => 1,
            Self::LastiExc => 2,
        }
    }
}

/// One executable operation.
#[derive(Debug, Clone, PartialEq, IntoStaticStr)]
pub enum Op {
    Pop,
    /// Moves TOS down to position `n`, lifting the values above it.
    Rotate(usize),
    Dup,
    DupTwo,
    /// Pushes a copy of the value `n` positions down (1 is TOS).
    Copy(usize),
    /// Swaps TOS with the value `n` positions down.
    Swap(usize),
    PushNull,
    /// `[receiver, value]` to `[value]`.
    PopSecond,

    LoadConst(usize),
    /// Unchecked loads are emitted only where the slot is proven bound.
    LoadLocal { slot: usize, checked: bool },
    /// Pushes the slot value, or NULL if unbound, and clears the slot.
    LoadLocalAndClear(usize),
    StoreLocal(usize),
    DeleteLocal(usize),
    LoadDeref(usize),
    StoreDeref(usize),
    DeleteDeref(usize),
    LoadClosure(usize),
    LoadGlobal(usize),
    StoreGlobal(usize),
    DeleteGlobal(usize),
    LoadAttr(usize),
    /// Pushes `[NULL, attribute]`, ready for a method-pair call.
    LoadMethod(usize),
    StoreAttr(usize),
    DeleteAttr(usize),

    /// Guarded builtin fast path; falls back to `Binary` on a guard miss.
    BinaryDirect { op: BinaryOp, kinds: OperandKinds, inplace: bool },
    /// Calls the statically resolved dunder of a user class; falls back to
    /// `Binary` when the operand is not an instance defining it.
    BinaryMethod { op: BinaryOp, inplace: bool, reflected: bool },
    Binary { op: BinaryOp, inplace: bool },
    UnaryDirect { op: UnaryOp, kinds: OperandKinds },
    Unary(UnaryOp),
    Not,
    CompareDirect { op: CompareOp, kinds: OperandKinds },
    Compare(CompareOp),
    Is { negate: bool },
    Contains { negate: bool },
    Subscr,
    StoreSubscr,
    DeleteSubscr,
    Slice,
    StoreSlice,

    BuildTuple(usize),
    BuildList(usize),
    BuildSet(usize),
    BuildMap(usize),
    BuildConstKeyMap(usize),
    BuildSlice(usize),
    /// Appends TOS to the list `depth` positions down after popping.
    ListAppend(usize),
    SetAdd(usize),
    MapAdd(usize),
    ListExtend(usize),
    SetUpdate(usize),
    DictUpdate(usize),
    DictMerge(usize),
    ListToTuple,
    UnpackSequence(usize),
    UnpackEx { before: usize, after: usize },
    GetLen,

    Jump(usize),
    PopJumpIf { target: usize, condition: JumpCondition },
    /// Jumps keeping TOS if its truth equals `when`, else pops it.
    JumpIfOrPop { target: usize, when: bool },
    GetIter,
    /// Pushes the next item, or pops the iterator and jumps when exhausted.
    ForIter(usize),
    Return,

    Call { argc: usize, layout: CallLayout, keywords: KeywordNames },
    /// Guarded native call of a known builtin.
    CallBuiltin { builtin: Builtin, argc: usize, layout: CallLayout },
    CallEx { has_kwargs: bool, null_below: bool },
    MakeFunction { flags: u32, with_qualname: bool },

    /// Pushes the initial `None` a fresh 3.11+ generator receives.
    ReturnGenerator,
    /// Suspends with TOS; execution continues at `resume` with the sent value pushed.
    Yield { resume: usize },
    GetYieldFromIter,
    /// Delegates to the iterator below TOS; resumes at itself until exhausted.
    YieldFrom,
    Send(usize),
    CleanupThrow,

    PushHandler { target: usize, depth: usize, shape: HandlerShape },
    PopHandler,
    PushExcInfo,
    PopExcept { legacy: bool },
    Reraise { legacy: bool, pops_lasti: bool },
    Raise(usize),
    BeforeWith,
    WithExceptStart { legacy: bool },
    JumpIfNotExcMatch(usize),
    CheckExcMatch,
    LoadAssertionError,

    ImportName(usize),
    ImportFrom(usize),
    FormatValue { conversion: u32, has_spec: bool },
    BuildString(usize),
}

impl Op {
    /// Human-readable op name, as reported to tracers.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// The jump target slot, if this op branches.
    pub(crate) fn target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Self::Jump(target)
            | Self::PopJumpIf { target, .. }
            | Self::JumpIfOrPop { target, .. }
            | Self::ForIter(target)
            | Self::Send(target)
            | Self::PushHandler { target, .. }
            | Self::JumpIfNotExcMatch(target) => Some(target),
            _ => None,
        }
    }

    /// True for guarded fast-path ops chosen from inferred types.
    #[must_use]
    pub fn is_specialized(&self) -> bool {
        matches!(
            self,
            Self::BinaryDirect { .. }
                | Self::BinaryMethod { .. }
                | Self::UnaryDirect { .. }
                | Self::CompareDirect { .. }
                | Self::CallBuiltin { .. }
                | Self::LoadLocal { checked: false, .. }
        )
    }
}
