//! Translation and execution settings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::exception::{ExcType, RunError};

/// Default cap on fixed-point passes. Real functions settle in a handful.
pub const DEFAULT_MAX_PASSES: usize = 10_000;

/// Default Python call depth before `RecursionError` is raised.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Knobs for the translation pipeline.
///
/// Deserializable so embedders can keep it next to their own settings:
///
/// ```
/// let config = pyflow::TranslateConfig::from_json(r#"{"specialize": false}"#).unwrap();
/// assert!(!config.specialize);
/// assert_eq!(config.max_passes, 10_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    /// Emit monomorphic operations where operand types are proven.
    pub specialize: bool,
    /// Consult the right operand's reflected dunder (`__radd__` and friends)
    /// during static inference when the left operand has no candidate.
    pub reflected_operator_inference: bool,
    /// Upper bound on fixed-point passes before giving up with `NoFixedPoint`.
    pub max_passes: usize,
    /// Worker threads used by [`translate_batch`](crate::assembly::translate_batch).
    /// `None` uses the global rayon pool.
    pub parallelism: Option<usize>,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            specialize: true,
            reflected_operator_inference: true,
            max_passes: DEFAULT_MAX_PASSES,
            parallelism: None,
        }
    }
}

impl TranslateConfig {
    /// Parses a JSON object; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Same as the default, with specialization disabled.
    #[must_use]
    pub fn dynamic_only() -> Self {
        Self {
            specialize: false,
            ..Self::default()
        }
    }
}

/// Limits enforced by the executor while generated code runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeLimits {
    /// Maximum nesting of Python-level calls.
    pub max_recursion_depth: usize,
    /// Maximum number of executed operations per top-level call, if any.
    pub max_operations: Option<usize>,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_operations: None,
        }
    }
}

/// A runtime limit that was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// Call nesting went past `max_recursion_depth`.
    Recursion { limit: usize, depth: usize },
    /// More than `max_operations` operations were executed.
    Operation { limit: usize, count: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recursion { .. } => write!(f, "maximum recursion depth exceeded"),
            Self::Operation { limit, count } => write!(f, "operation limit exceeded: {count} > {limit}"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        let exc_type = match err {
            ResourceError::Recursion { .. } => ExcType::RecursionError,
            ResourceError::Operation { .. } => ExcType::TimeoutError,
        };
        exc_type.error(err.to_string())
    }
}
