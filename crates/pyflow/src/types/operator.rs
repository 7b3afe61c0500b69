//! Operator families and their dunder names.

use strum::IntoStaticStr;

use crate::version::PythonVersion;

/// Binary arithmetic and bitwise operators.
///
/// Variant order matches CPython's `NB_*` numbering used by 3.11+ `BINARY_OP`
/// (`NB_ADD` = 0 through `NB_XOR` = 12; in-place forms add 13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum BinaryOp {
    Add,
    And,
    FloorDiv,
    LShift,
    MatMul,
    Mul,
    Mod,
    Or,
    Pow,
    RShift,
    Sub,
    TrueDiv,
    Xor,
}

impl BinaryOp {
    const BY_NB_INDEX: [Self; 13] = [
        Self::Add,
        Self::And,
        Self::FloorDiv,
        Self::LShift,
        Self::MatMul,
        Self::Mul,
        Self::Mod,
        Self::Or,
        Self::Pow,
        Self::RShift,
        Self::Sub,
        Self::TrueDiv,
        Self::Xor,
    ];

    /// Decodes a `BINARY_OP` operand into the operator and its in-place flag.
    #[must_use]
    pub fn from_nb_arg(arg: u32) -> Option<(Self, bool)> {
        let index = usize::try_from(arg).ok()?;
        if let Some(op) = Self::BY_NB_INDEX.get(index) {
            Some((*op, false))
        } else {
            Self::BY_NB_INDEX.get(index.checked_sub(13)?).map(|op| (*op, true))
        }
    }

    /// Maps the operator suffix of a 3.10 `BINARY_*`/`INPLACE_*` opcode name.
    #[must_use]
    pub fn from_legacy_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "ADD" => Self::Add,
            "AND" => Self::And,
            "FLOOR_DIVIDE" => Self::FloorDiv,
            "LSHIFT" => Self::LShift,
            "MATRIX_MULTIPLY" => Self::MatMul,
            "MULTIPLY" => Self::Mul,
            "MODULO" => Self::Mod,
            "OR" => Self::Or,
            "POWER" => Self::Pow,
            "RSHIFT" => Self::RShift,
            "SUBTRACT" => Self::Sub,
            "TRUE_DIVIDE" => Self::TrueDiv,
            "XOR" => Self::Xor,
            _ => return None,
        })
    }

    #[must_use]
    pub fn dunder(self) -> &'static str {
        match self {
            Self::Add => "__add__",
            Self::And => "__and__",
            Self::FloorDiv => "__floordiv__",
            Self::LShift => "__lshift__",
            Self::MatMul => "__matmul__",
            Self::Mul => "__mul__",
            Self::Mod => "__mod__",
            Self::Or => "__or__",
            Self::Pow => "__pow__",
            Self::RShift => "__rshift__",
            Self::Sub => "__sub__",
            Self::TrueDiv => "__truediv__",
            Self::Xor => "__xor__",
        }
    }

    #[must_use]
    pub fn reflected_dunder(self) -> &'static str {
        match self {
            Self::Add => "__radd__",
            Self::And => "__rand__",
            Self::FloorDiv => "__rfloordiv__",
            Self::LShift => "__rlshift__",
            Self::MatMul => "__rmatmul__",
            Self::Mul => "__rmul__",
            Self::Mod => "__rmod__",
            Self::Or => "__ror__",
            Self::Pow => "__rpow__",
            Self::RShift => "__rrshift__",
            Self::Sub => "__rsub__",
            Self::TrueDiv => "__rtruediv__",
            Self::Xor => "__rxor__",
        }
    }

    #[must_use]
    pub fn inplace_dunder(self) -> &'static str {
        match self {
            Self::Add => "__iadd__",
            Self::And => "__iand__",
            Self::FloorDiv => "__ifloordiv__",
            Self::LShift => "__ilshift__",
            Self::MatMul => "__imatmul__",
            Self::Mul => "__imul__",
            Self::Mod => "__imod__",
            Self::Or => "__ior__",
            Self::Pow => "__ipow__",
            Self::RShift => "__irshift__",
            Self::Sub => "__isub__",
            Self::TrueDiv => "__itruediv__",
            Self::Xor => "__ixor__",
        }
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::And => "&",
            Self::FloorDiv => "//",
            Self::LShift => "<<",
            Self::MatMul => "@",
            Self::Mul => "*",
            Self::Mod => "%",
            Self::Or => "|",
            Self::Pow => "** or pow()",
            Self::RShift => ">>",
            Self::Sub => "-",
            Self::TrueDiv => "/",
            Self::Xor => "^",
        }
    }

    /// Symbol used in error messages for the augmented-assignment form.
    #[must_use]
    pub fn inplace_symbol(self) -> &'static str {
        match self {
            Self::Add => "+=",
            Self::And => "&=",
            Self::FloorDiv => "//=",
            Self::LShift => "<<=",
            Self::MatMul => "@=",
            Self::Mul => "*=",
            Self::Mod => "%=",
            Self::Or => "|=",
            Self::Pow => "**=",
            Self::RShift => ">>=",
            Self::Sub => "-=",
            Self::TrueDiv => "/=",
            Self::Xor => "^=",
        }
    }
}

/// Rich comparison operators, in `COMPARE_OP` operand order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl CompareOp {
    /// Decodes a `COMPARE_OP` operand; 3.12 keeps cache flags in the low nibble.
    #[must_use]
    pub fn from_arg(arg: u32, version: PythonVersion) -> Option<Self> {
        let index = if version >= PythonVersion::V3_12 { arg >> 4 } else { arg };
        Some(match index {
            0 => Self::Lt,
            1 => Self::Le,
            2 => Self::Eq,
            3 => Self::Ne,
            4 => Self::Gt,
            5 => Self::Ge,
            _ => return None,
        })
    }

    #[must_use]
    pub fn dunder(self) -> &'static str {
        match self {
            Self::Lt => "__lt__",
            Self::Le => "__le__",
            Self::Eq => "__eq__",
            Self::Ne => "__ne__",
            Self::Gt => "__gt__",
            Self::Ge => "__ge__",
        }
    }

    /// The operator tried on the right operand when the left one declines.
    #[must_use]
    pub fn reflected(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Applies the operator to an `Ordering`.
    #[must_use]
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Self::Lt => ordering == Less,
            Self::Le => ordering != Greater,
            Self::Eq => ordering == Equal,
            Self::Ne => ordering != Equal,
            Self::Gt => ordering == Greater,
            Self::Ge => ordering != Less,
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum UnaryOp {
    Pos,
    Neg,
    Invert,
    Not,
}

impl UnaryOp {
    /// `None` for `not`, which goes through truthiness instead of a dunder.
    #[must_use]
    pub fn dunder(self) -> Option<&'static str> {
        match self {
            Self::Pos => Some("__pos__"),
            Self::Neg => Some("__neg__"),
            Self::Invert => Some("__invert__"),
            Self::Not => None,
        }
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Pos => "+",
            Self::Neg => "-",
            Self::Invert => "~",
            Self::Not => "not",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nb_arg_decoding() {
        assert_eq!(BinaryOp::from_nb_arg(0), Some((BinaryOp::Add, false)));
        assert_eq!(BinaryOp::from_nb_arg(10), Some((BinaryOp::Sub, false)));
        assert_eq!(BinaryOp::from_nb_arg(13), Some((BinaryOp::Add, true)));
        assert_eq!(BinaryOp::from_nb_arg(25), Some((BinaryOp::Xor, true)));
        assert_eq!(BinaryOp::from_nb_arg(26), None);
    }

    #[test]
    fn compare_arg_shift_on_312() {
        assert_eq!(CompareOp::from_arg(0, PythonVersion::V3_10), Some(CompareOp::Lt));
        assert_eq!(CompareOp::from_arg(2 << 4, PythonVersion::V3_12), Some(CompareOp::Eq));
        assert_eq!(CompareOp::from_arg(0x5a, PythonVersion::V3_12), Some(CompareOp::Ge));
    }
}
