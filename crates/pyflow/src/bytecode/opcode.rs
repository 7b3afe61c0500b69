//! Opcode identifiers and their per-version properties.

use strum::{Display, EnumString, IntoStaticStr};

use crate::version::PythonVersion;

const V10: u8 = 1;
const V11: u8 = 2;
const V12: u8 = 4;
const ALL: u8 = V10 | V11 | V12;

/// Every opcode name the decoder recognises, across 3.10-3.12.
///
/// For 3.11 and 3.12 this also includes the compiler pseudo-instructions
/// `SETUP_FINALLY`, `SETUP_CLEANUP`, `SETUP_WITH` and `POP_BLOCK`, which
/// descriptors use to mark exception regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    // stack
    Nop,
    PopTop,
    RotTwo,
    RotThree,
    RotFour,
    RotN,
    DupTop,
    DupTopTwo,
    Copy,
    Swap,
    PushNull,
    EndFor,
    EndSend,
    Resume,
    Precall,
    KwNames,
    MakeCell,
    CopyFreeVars,
    ExtendedArg,
    Cache,

    // variables
    LoadConst,
    ReturnConst,
    LoadFast,
    LoadFastCheck,
    LoadFastAndClear,
    StoreFast,
    DeleteFast,
    LoadDeref,
    StoreDeref,
    DeleteDeref,
    LoadClosure,
    LoadGlobal,
    StoreGlobal,
    DeleteGlobal,
    LoadName,
    StoreName,
    DeleteName,
    LoadAttr,
    LoadMethod,
    StoreAttr,
    DeleteAttr,

    // control flow
    JumpForward,
    JumpAbsolute,
    JumpBackward,
    JumpBackwardNoInterrupt,
    PopJumpIfFalse,
    PopJumpIfTrue,
    PopJumpIfNone,
    PopJumpIfNotNone,
    PopJumpForwardIfFalse,
    PopJumpForwardIfTrue,
    PopJumpForwardIfNone,
    PopJumpForwardIfNotNone,
    PopJumpBackwardIfFalse,
    PopJumpBackwardIfTrue,
    PopJumpBackwardIfNone,
    PopJumpBackwardIfNotNone,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    GetIter,
    ForIter,
    ReturnValue,

    // operators
    BinaryOp,
    BinaryAdd,
    BinaryAnd,
    BinaryFloorDivide,
    BinaryLshift,
    BinaryMatrixMultiply,
    BinaryMultiply,
    BinaryModulo,
    BinaryOr,
    BinaryPower,
    BinaryRshift,
    BinarySubtract,
    BinaryTrueDivide,
    BinaryXor,
    InplaceAdd,
    InplaceAnd,
    InplaceFloorDivide,
    InplaceLshift,
    InplaceMatrixMultiply,
    InplaceMultiply,
    InplaceModulo,
    InplaceOr,
    InplacePower,
    InplaceRshift,
    InplaceSubtract,
    InplaceTrueDivide,
    InplaceXor,
    UnaryPositive,
    UnaryNegative,
    UnaryNot,
    UnaryInvert,
    CompareOp,
    IsOp,
    ContainsOp,
    BinarySubscr,
    StoreSubscr,
    DeleteSubscr,
    BinarySlice,
    StoreSlice,

    // collections
    BuildTuple,
    BuildList,
    BuildSet,
    BuildMap,
    BuildConstKeyMap,
    BuildSlice,
    ListAppend,
    SetAdd,
    MapAdd,
    ListExtend,
    SetUpdate,
    DictUpdate,
    DictMerge,
    ListToTuple,
    UnpackSequence,
    UnpackEx,
    GetLen,

    // functions
    CallFunction,
    CallFunctionKw,
    CallFunctionEx,
    CallMethod,
    Call,
    MakeFunction,

    // generators
    GenStart,
    ReturnGenerator,
    YieldValue,
    GetYieldFromIter,
    YieldFrom,
    Send,
    CleanupThrow,

    // exceptions and with-statements
    SetupFinally,
    SetupCleanup,
    SetupWith,
    BeforeWith,
    PopBlock,
    PopExcept,
    PushExcInfo,
    Reraise,
    RaiseVarargs,
    WithExceptStart,
    JumpIfNotExcMatch,
    CheckExcMatch,
    LoadAssertionError,

    // modules and strings
    ImportName,
    ImportFrom,
    FormatValue,
    BuildString,

    // recognised, not supported
    GetAwaitable,
    GetAiter,
    GetAnext,
    BeforeAsyncWith,
    SetupAsyncWith,
    EndAsyncFor,
    AsyncGenWrap,
    MatchClass,
    MatchMapping,
    MatchSequence,
    MatchKeys,
    CopyDictWithoutKeys,
    LoadBuildClass,
    SetupAnnotations,
    ImportStar,
    PrintExpr,
    LoadClassderef,
    LoadLocals,
    CheckEgMatch,
    PrepReraiseStar,
    #[strum(serialize = "CALL_INTRINSIC_1")]
    CallIntrinsic1,
    #[strum(serialize = "CALL_INTRINSIC_2")]
    CallIntrinsic2,
    LoadSuperAttr,
    LoadFromDictOrGlobals,
    LoadFromDictOrDeref,
}

/// How a jump operand becomes a target position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// `target = arg`
    Absolute,
    /// `target = base + arg`
    Forward,
    /// `target = base - arg`
    Backward,
}

/// Handler family an opcode belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum Category {
    Stack,
    Variables,
    Control,
    Operators,
    Collections,
    Functions,
    Generators,
    Exceptions,
    Modules,
    Strings,
    /// Known to the decoder but without an implementation.
    Unsupported,
}

impl Opcode {
    /// Parses an opcode name as printed by `dis`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    fn versions(self) -> u8 {
        use Opcode::*;
        match self {
            RotTwo | RotThree | RotFour | RotN | DupTop | DupTopTwo => V10,
            Copy | Swap | PushNull | Resume | KwNames | MakeCell | CopyFreeVars | Cache => V11 | V12,
            EndFor | EndSend => V12,
            Precall => V11,

            ReturnConst | LoadFastCheck | LoadFastAndClear => V12,
            LoadMethod => V10 | V11,

            JumpAbsolute => V10,
            JumpBackward | JumpBackwardNoInterrupt => V11 | V12,
            PopJumpIfFalse | PopJumpIfTrue => V10 | V12,
            PopJumpIfNone | PopJumpIfNotNone => V12,
            PopJumpForwardIfFalse
            | PopJumpForwardIfTrue
            | PopJumpForwardIfNone
            | PopJumpForwardIfNotNone
            | PopJumpBackwardIfFalse
            | PopJumpBackwardIfTrue
            | PopJumpBackwardIfNone
            | PopJumpBackwardIfNotNone => V11,
            JumpIfFalseOrPop | JumpIfTrueOrPop => V10 | V11,

            BinaryOp => V11 | V12,
            BinaryAdd | BinaryAnd | BinaryFloorDivide | BinaryLshift | BinaryMatrixMultiply | BinaryMultiply
            | BinaryModulo | BinaryOr | BinaryPower | BinaryRshift | BinarySubtract | BinaryTrueDivide | BinaryXor
            | InplaceAdd | InplaceAnd | InplaceFloorDivide | InplaceLshift | InplaceMatrixMultiply
            | InplaceMultiply | InplaceModulo | InplaceOr | InplacePower | InplaceRshift | InplaceSubtract
            | InplaceTrueDivide | InplaceXor => V10,
            UnaryPositive => V10 | V11,
            BinarySlice | StoreSlice => V12,

            ListToTuple => V10 | V11,

            CallFunction | CallFunctionKw | CallMethod => V10,
            Call => V11 | V12,

            GenStart | YieldFrom => V10,
            ReturnGenerator | Send => V11 | V12,
            CleanupThrow => V12,

            SetupCleanup | BeforeWith | PushExcInfo | CheckExcMatch => V11 | V12,
            JumpIfNotExcMatch => V10,

            SetupAsyncWith | CopyDictWithoutKeys => V10,
            AsyncGenWrap | PrepReraiseStar => V11,
            ImportStar | PrintExpr | LoadClassderef => V10 | V11,
            CheckEgMatch => V11 | V12,
            LoadLocals | CallIntrinsic1 | CallIntrinsic2 | LoadSuperAttr | LoadFromDictOrGlobals
            | LoadFromDictOrDeref => V12,

            _ => ALL,
        }
    }

    /// True if the opcode exists in `version`'s instruction set.
    #[must_use]
    pub fn available_in(self, version: PythonVersion) -> bool {
        let bit = match version {
            PythonVersion::V3_10 => V10,
            PythonVersion::V3_11 => V11,
            PythonVersion::V3_12 => V12,
        };
        self.versions() & bit != 0
    }

    /// How the operand of a jumping opcode is turned into a target, or `None`
    /// if the opcode does not jump.
    #[must_use]
    pub fn addressing(self, version: PythonVersion) -> Option<Addressing> {
        use Opcode::*;
        let legacy = version == PythonVersion::V3_10;
        Some(match self {
            JumpAbsolute | PopJumpIfFalse | PopJumpIfTrue | JumpIfFalseOrPop | JumpIfTrueOrPop | JumpIfNotExcMatch
                if legacy =>
            {
                Addressing::Absolute
            }
            JumpForward | ForIter | SetupFinally | SetupWith | SetupAsyncWith if legacy => Addressing::Forward,
            SetupFinally | SetupCleanup | SetupWith => Addressing::Absolute,
            JumpForward | ForIter | Send | JumpIfFalseOrPop | JumpIfTrueOrPop | PopJumpIfFalse | PopJumpIfTrue
            | PopJumpIfNone | PopJumpIfNotNone | PopJumpForwardIfFalse | PopJumpForwardIfTrue
            | PopJumpForwardIfNone | PopJumpForwardIfNotNone => Addressing::Forward,
            JumpBackward | JumpBackwardNoInterrupt | PopJumpBackwardIfFalse | PopJumpBackwardIfTrue
            | PopJumpBackwardIfNone | PopJumpBackwardIfNotNone => Addressing::Backward,
            _ => return None,
        })
    }

    /// For 3.10 `BINARY_*`/`INPLACE_*` opcodes, the operator and in-place flag.
    #[must_use]
    pub fn legacy_binary(self) -> Option<(crate::types::BinaryOp, bool)> {
        let name = self.name();
        if let Some(suffix) = name.strip_prefix("BINARY_") {
            crate::types::BinaryOp::from_legacy_suffix(suffix).map(|op| (op, false))
        } else {
            name.strip_prefix("INPLACE_")
                .and_then(crate::types::BinaryOp::from_legacy_suffix)
                .map(|op| (op, true))
        }
    }

    /// Handler family; `Unsupported` for recognised-but-unimplemented opcodes.
    #[must_use]
    pub fn category(self) -> Category {
        use Opcode::*;
        match self {
            Nop | PopTop | RotTwo | RotThree | RotFour | RotN | DupTop | DupTopTwo | Copy | Swap | PushNull
            | EndFor | EndSend | Resume | Precall | KwNames | MakeCell | CopyFreeVars | ExtendedArg | Cache => {
                Category::Stack
            }
            LoadConst | ReturnConst | LoadFast | LoadFastCheck | LoadFastAndClear | StoreFast | DeleteFast
            | LoadDeref | StoreDeref | DeleteDeref | LoadClosure | LoadGlobal | StoreGlobal | DeleteGlobal
            | LoadName | StoreName | DeleteName | LoadAttr | LoadMethod | StoreAttr | DeleteAttr => {
                Category::Variables
            }
            JumpForward | JumpAbsolute | JumpBackward | JumpBackwardNoInterrupt | PopJumpIfFalse | PopJumpIfTrue
            | PopJumpIfNone | PopJumpIfNotNone | PopJumpForwardIfFalse | PopJumpForwardIfTrue
            | PopJumpForwardIfNone | PopJumpForwardIfNotNone | PopJumpBackwardIfFalse | PopJumpBackwardIfTrue
            | PopJumpBackwardIfNone | PopJumpBackwardIfNotNone | JumpIfFalseOrPop | JumpIfTrueOrPop | GetIter
            | ForIter | ReturnValue => Category::Control,
            BuildTuple | BuildList | BuildSet | BuildMap | BuildConstKeyMap | BuildSlice | ListAppend | SetAdd
            | MapAdd | ListExtend | SetUpdate | DictUpdate | DictMerge | ListToTuple | UnpackSequence | UnpackEx
            | GetLen => Category::Collections,
            CallFunction | CallFunctionKw | CallFunctionEx | CallMethod | Call | MakeFunction => Category::Functions,
            GenStart | ReturnGenerator | YieldValue | GetYieldFromIter | YieldFrom | Send | CleanupThrow => {
                Category::Generators
            }
            SetupFinally | SetupCleanup | SetupWith | BeforeWith | PopBlock | PopExcept | PushExcInfo | Reraise
            | RaiseVarargs | WithExceptStart | JumpIfNotExcMatch | CheckExcMatch | LoadAssertionError => {
                Category::Exceptions
            }
            ImportName | ImportFrom => Category::Modules,
            FormatValue | BuildString => Category::Strings,
            GetAwaitable | GetAiter | GetAnext | BeforeAsyncWith | SetupAsyncWith | EndAsyncFor | AsyncGenWrap
            | MatchClass | MatchMapping | MatchSequence | MatchKeys | CopyDictWithoutKeys | LoadBuildClass
            | SetupAnnotations | ImportStar | PrintExpr | LoadClassderef | LoadLocals | CheckEgMatch
            | PrepReraiseStar | CallIntrinsic1 | CallIntrinsic2 | LoadSuperAttr | LoadFromDictOrGlobals
            | LoadFromDictOrDeref => Category::Unsupported,
            _ => Category::Operators,
        }
    }

    /// True for units that the decoder folds away.
    #[must_use]
    pub fn is_decode_only(self) -> bool {
        matches!(self, Self::Cache | Self::ExtendedArg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BinaryOp;

    #[test]
    fn names_round_trip_through_dis_spelling() {
        assert_eq!(Opcode::from_name("POP_JUMP_FORWARD_IF_NOT_NONE"), Some(Opcode::PopJumpForwardIfNotNone));
        assert_eq!(Opcode::from_name("CALL_INTRINSIC_1"), Some(Opcode::CallIntrinsic1));
        assert_eq!(Opcode::from_name("BINARY_LSHIFT"), Some(Opcode::BinaryLshift));
        assert_eq!(Opcode::DupTopTwo.name(), "DUP_TOP_TWO");
        assert_eq!(Opcode::from_name("NOT_AN_OPCODE"), None);
    }

    #[test]
    fn availability_differs_by_version() {
        assert!(Opcode::JumpAbsolute.available_in(PythonVersion::V3_10));
        assert!(!Opcode::JumpAbsolute.available_in(PythonVersion::V3_11));
        assert!(Opcode::PopJumpIfFalse.available_in(PythonVersion::V3_12));
        assert!(!Opcode::PopJumpIfFalse.available_in(PythonVersion::V3_11));
        assert!(Opcode::SetupFinally.available_in(PythonVersion::V3_12));
    }

    #[test]
    fn jump_addressing_follows_version() {
        assert_eq!(Opcode::PopJumpIfFalse.addressing(PythonVersion::V3_10), Some(Addressing::Absolute));
        assert_eq!(Opcode::PopJumpIfFalse.addressing(PythonVersion::V3_12), Some(Addressing::Forward));
        assert_eq!(Opcode::JumpBackward.addressing(PythonVersion::V3_11), Some(Addressing::Backward));
        assert_eq!(Opcode::SetupFinally.addressing(PythonVersion::V3_10), Some(Addressing::Forward));
        assert_eq!(Opcode::SetupFinally.addressing(PythonVersion::V3_11), Some(Addressing::Absolute));
        assert_eq!(Opcode::LoadFast.addressing(PythonVersion::V3_11), None);
    }

    #[test]
    fn legacy_binary_names() {
        assert_eq!(Opcode::InplaceAdd.legacy_binary(), Some((BinaryOp::Add, true)));
        assert_eq!(Opcode::BinaryTrueDivide.legacy_binary(), Some((BinaryOp::TrueDiv, false)));
        assert_eq!(Opcode::BinarySubscr.legacy_binary(), None);
        assert_eq!(Opcode::BinaryOp.legacy_binary(), None);
    }

    #[test]
    fn async_opcodes_are_unsupported() {
        assert_eq!(Opcode::GetAwaitable.category(), Category::Unsupported);
        assert_eq!(Opcode::ForIter.category(), Category::Control);
        assert_eq!(Opcode::BinaryOp.category(), Category::Operators);
    }
}
