//! Source-language version tags.
//!
//! Opcode availability, jump addressing and several stack conventions differ
//! between CPython releases, so almost every stage of the pipeline consults the
//! version of the code object it is working on.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// CPython bytecode version that a function descriptor was compiled for.
///
/// Ordered, so `version >= PythonVersion::V3_11` reads naturally at the many
/// places where 3.11 changed a convention and 3.12 kept it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
pub enum PythonVersion {
    #[strum(serialize = "3.10")]
    #[serde(rename = "3.10")]
    V3_10,
    #[strum(serialize = "3.11")]
    #[serde(rename = "3.11")]
    V3_11,
    #[strum(serialize = "3.12")]
    #[serde(rename = "3.12")]
    V3_12,
}

impl PythonVersion {
    /// All supported versions, oldest first.
    pub const ALL: [Self; 3] = [Self::V3_10, Self::V3_11, Self::V3_12];

    /// True for 3.10, where exception regions are real block-stack opcodes and
    /// handlers receive the six-value `(tb, value, type)` pair layout.
    #[must_use]
    pub fn has_block_stack(self) -> bool {
        self == Self::V3_10
    }

    /// True when calls are prefixed by a NULL (or method) slot below the callable.
    #[must_use]
    pub fn uses_null_call_convention(self) -> bool {
        self >= Self::V3_11
    }

    /// True when `LOAD_FAST`/`LOAD_DEREF` index the unified "localsplus" array.
    #[must_use]
    pub fn uses_localsplus(self) -> bool {
        self >= Self::V3_11
    }

    /// True when `LOAD_ATTR` carries the method-call flag in its low bit.
    #[must_use]
    pub fn attr_carries_method_flag(self) -> bool {
        self >= Self::V3_12
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn parses_dotted_names() {
        assert_eq!(PythonVersion::from_str("3.11").unwrap(), PythonVersion::V3_11);
        assert_eq!(PythonVersion::V3_12.to_string(), "3.12");
        assert!(PythonVersion::from_str("3.9").is_err());
    }

    #[test]
    fn versions_are_ordered() {
        assert!(PythonVersion::V3_10 < PythonVersion::V3_11);
        assert!(PythonVersion::V3_12.uses_null_call_convention());
        assert!(!PythonVersion::V3_10.uses_localsplus());
    }
}
