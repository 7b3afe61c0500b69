//! Builtin callables visible from generated code.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// A builtin function or builtin type used as a constructor.
///
/// The string form is the Python name (`Builtin::Isinstance` is `"isinstance"`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum Builtin {
    Abs,
    Bool,
    Dict,
    Enumerate,
    Float,
    Int,
    Isinstance,
    Iter,
    Len,
    List,
    Max,
    Min,
    Next,
    Print,
    Range,
    Repr,
    Reversed,
    Set,
    Sorted,
    Str,
    Sum,
    Tuple,
    Type,
    Zip,
}

impl Builtin {
    /// Looks up a builtin by its Python name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// True for builtins that are also types (usable with `isinstance`).
    #[must_use]
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::Dict
                | Self::Float
                | Self::Int
                | Self::List
                | Self::Range
                | Self::Set
                | Self::Str
                | Self::Tuple
                | Self::Type
        )
    }
}
