//! Runtime exceptions raised by generated code.
//!
//! Builtin exception kinds are a flat enum with an explicit parent table;
//! `except` matching walks that table instead of a class chain. User-defined
//! exception classes wrap the builtin kind they ultimately derive from.

use std::{
    borrow::Cow,
    cell::RefCell,
    fmt::{self, Display},
    rc::Rc,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::runtime::{ClassObject, Value, py_str};

/// Result type alias for operations that can raise a Python exception.
pub type RunResult<T> = Result<T, RunError>;

/// Python exception types known to the runtime.
///
/// Uses strum derives for `Display`, `FromStr` and `Into<&'static str>`; the
/// string form is the Python class name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ExcType {
    BaseException,
    /// Raised into a generator by `close()`. Derives from BaseException directly.
    GeneratorExit,
    KeyboardInterrupt,
    SystemExit,

    Exception,
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,
    LookupError,
    IndexError,
    KeyError,
    RuntimeError,
    NotImplementedError,
    RecursionError,
    AttributeError,
    NameError,
    /// Subclass of NameError - for accessing local variable before assignment.
    UnboundLocalError,
    ValueError,
    ImportError,
    ModuleNotFoundError,
    AssertionError,
    StopIteration,
    TypeError,
    TimeoutError,
}

impl ExcType {
    /// The direct base class, `None` only for `BaseException`.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        let parent = match self {
            Self::BaseException => return None,
            Self::GeneratorExit | Self::KeyboardInterrupt | Self::SystemExit | Self::Exception => {
                Self::BaseException
            }
            Self::OverflowError | Self::ZeroDivisionError => Self::ArithmeticError,
            Self::IndexError | Self::KeyError => Self::LookupError,
            Self::NotImplementedError | Self::RecursionError => Self::RuntimeError,
            Self::UnboundLocalError => Self::NameError,
            Self::ModuleNotFoundError => Self::ImportError,
            Self::ArithmeticError
            | Self::LookupError
            | Self::RuntimeError
            | Self::AttributeError
            | Self::NameError
            | Self::ValueError
            | Self::ImportError
            | Self::AssertionError
            | Self::StopIteration
            | Self::TypeError
            | Self::TimeoutError => Self::Exception,
        };
        Some(parent)
    }

    /// `self` followed by every ancestor up to `BaseException`.
    pub fn ancestors(self) -> impl Iterator<Item = Self> {
        std::iter::successors(Some(self), |t| t.parent())
    }

    /// Returns true if `self` would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        self.ancestors().any(|t| t == handler_type)
    }

    /// An exception of this type with a single message argument.
    #[must_use]
    pub fn error(self, message: impl Into<String>) -> RunError {
        RunError::from_exception(PyException::new(self, vec![Value::from(message.into())]))
    }

    /// An exception of this type without arguments.
    #[must_use]
    pub fn bare(self) -> RunError {
        RunError::from_exception(PyException::new(self, Vec::new()))
    }

    /// An exception carrying an arbitrary value, e.g. `StopIteration(value)`.
    #[must_use]
    pub fn with_value(self, value: Value) -> RunError {
        RunError::from_exception(PyException::new(self, vec![value]))
    }

    #[must_use]
    pub(crate) fn type_error(message: impl Into<String>) -> RunError {
        Self::TypeError.error(message)
    }

    /// `{name}() missing 2 required positional arguments: 'b' and 'c'`
    #[must_use]
    pub(crate) fn type_error_missing_positional(name: &str, missing: &[&str]) -> RunError {
        let names = format_param_names(missing);
        match missing.len() {
            1 => Self::type_error(format!("{name}() missing 1 required positional argument: {names}")),
            count => Self::type_error(format!(
                "{name}() missing {count} required positional arguments: {names}"
            )),
        }
    }

    /// `{name}() missing 1 required keyword-only argument: 'x'`
    #[must_use]
    pub(crate) fn type_error_missing_kwonly(name: &str, missing: &[&str]) -> RunError {
        let names = format_param_names(missing);
        match missing.len() {
            1 => Self::type_error(format!("{name}() missing 1 required keyword-only argument: {names}")),
            count => Self::type_error(format!(
                "{name}() missing {count} required keyword-only arguments: {names}"
            )),
        }
    }

    /// Matches CPython's phrasing, including the "from N to M" form when
    /// some positional parameters have defaults.
    #[must_use]
    pub(crate) fn type_error_too_many_positional(name: &str, min: usize, max: usize, given: usize) -> RunError {
        let expected = if min == max {
            let plural = if max == 1 { "" } else { "s" };
            format!("{max} positional argument{plural}")
        } else {
            format!("from {min} to {max} positional arguments")
        };
        let verb = if given == 1 { "was" } else { "were" };
        Self::type_error(format!("{name}() takes {expected} but {given} {verb} given"))
    }

    #[must_use]
    pub(crate) fn type_error_unexpected_keyword(name: &str, keyword: &str) -> RunError {
        Self::type_error(format!("{name}() got an unexpected keyword argument '{keyword}'"))
    }

    #[must_use]
    pub(crate) fn type_error_multiple_values(name: &str, param: &str) -> RunError {
        Self::type_error(format!("{name}() got multiple values for argument '{param}'"))
    }

    #[must_use]
    pub(crate) fn type_error_positional_only_as_keyword(name: &str, params: &[&str]) -> RunError {
        Self::type_error(format!(
            "{name}() got some positional-only arguments passed as keyword arguments: '{}'",
            params.join(", ")
        ))
    }

    /// `unsupported operand type(s) for +: 'int' and 'str'`, or the
    /// concatenation wording CPython uses for `str`/`list` on the left.
    #[must_use]
    pub(crate) fn binary_type_error(op: &str, lhs_type: &str, rhs_type: &str) -> RunError {
        let message = if (op == "+" || op == "+=") && (lhs_type == "str" || lhs_type == "list") {
            format!("can only concatenate {lhs_type} (not \"{rhs_type}\") to {lhs_type}")
        } else {
            format!("unsupported operand type(s) for {op}: '{lhs_type}' and '{rhs_type}'")
        };
        Self::type_error(message)
    }

    #[must_use]
    pub(crate) fn compare_type_error(op: &str, lhs_type: &str, rhs_type: &str) -> RunError {
        Self::type_error(format!(
            "'{op}' not supported between instances of '{lhs_type}' and '{rhs_type}'"
        ))
    }

    #[must_use]
    pub(crate) fn unary_type_error(op: &str, value_type: &str) -> RunError {
        Self::type_error(format!("bad operand type for unary {op}: '{value_type}'"))
    }

    #[must_use]
    pub(crate) fn not_callable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    #[must_use]
    pub(crate) fn not_iterable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not iterable"))
    }

    #[must_use]
    pub(crate) fn not_subscriptable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not subscriptable"))
    }

    #[must_use]
    pub(crate) fn unhashable(type_name: &str) -> RunError {
        Self::type_error(format!("unhashable type: '{type_name}'"))
    }

    #[must_use]
    pub(crate) fn attribute_error(type_name: &str, attr: &str) -> RunError {
        Self::AttributeError.error(format!("'{type_name}' object has no attribute '{attr}'"))
    }

    #[must_use]
    pub(crate) fn name_error(name: &str) -> RunError {
        Self::NameError.error(format!("name '{name}' is not defined"))
    }

    #[must_use]
    pub(crate) fn unbound_local(name: &str) -> RunError {
        Self::UnboundLocalError.error(format!("local variable '{name}' referenced before assignment"))
    }

    #[must_use]
    pub(crate) fn unbound_free(name: &str) -> RunError {
        Self::NameError.error(format!(
            "free variable '{name}' referenced before assignment in enclosing scope"
        ))
    }

    #[must_use]
    pub(crate) fn unpack_too_few(expected: usize, got: usize, at_least: bool) -> RunError {
        let at_least = if at_least { "at least " } else { "" };
        Self::ValueError.error(format!(
            "not enough values to unpack (expected {at_least}{expected}, got {got})"
        ))
    }

    #[must_use]
    pub(crate) fn unpack_too_many(expected: usize) -> RunError {
        Self::ValueError.error(format!("too many values to unpack (expected {expected})"))
    }

    #[must_use]
    pub(crate) fn zero_division(message: &str) -> RunError {
        Self::ZeroDivisionError.error(message)
    }

    #[must_use]
    pub(crate) fn index_out_of_range(type_name: &str) -> RunError {
        Self::IndexError.error(format!("{type_name} index out of range"))
    }

    #[must_use]
    pub(crate) fn key_error(key: Value) -> RunError {
        Self::KeyError.with_value(key)
    }

    /// `len() takes exactly one argument (2 given)` or
    /// `insert expected 2 arguments, got 1`.
    #[must_use]
    pub(crate) fn type_error_arg_count(name: &str, expected: usize, actual: usize) -> RunError {
        if expected == 1 {
            Self::type_error(format!("{name}() takes exactly one argument ({actual} given)"))
        } else {
            Self::type_error(format!("{name} expected {expected} arguments, got {actual}"))
        }
    }

    #[must_use]
    pub(crate) fn type_error_no_args(name: &str, actual: usize) -> RunError {
        Self::type_error(format!("{name}() takes no arguments ({actual} given)"))
    }

    #[must_use]
    pub(crate) fn type_error_at_least(name: &str, min: usize, actual: usize) -> RunError {
        let plural = if min == 1 { "" } else { "s" };
        Self::type_error(format!("{name} expected at least {min} argument{plural}, got {actual}"))
    }

    #[must_use]
    pub(crate) fn type_error_at_most(name: &str, max: usize, actual: usize) -> RunError {
        let plural = if max == 1 { "" } else { "s" };
        Self::type_error(format!("{name} expected at most {max} argument{plural}, got {actual}"))
    }

    #[must_use]
    pub(crate) fn type_error_no_kwargs(name: &str) -> RunError {
        Self::type_error(format!("{name}() takes no keyword arguments"))
    }
}

/// Formats parameter names the way CPython lists them in arity errors:
/// `'a'`, `'a' and 'b'`, `'a', 'b', and 'c'`.
fn format_param_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [one] => format!("'{one}'"),
        [first, second] => format!("'{first}' and '{second}'"),
        [rest @ .., last] => {
            let rest: Vec<_> = rest.iter().map(|n| format!("'{n}'")).collect();
            format!("{}, and '{last}'", rest.join(", "))
        }
    }
}

/// An exception instance.
///
/// `class` is set for instances of user-defined exception classes; `exc_type`
/// is then the nearest builtin ancestor and drives `except` matching for
/// builtin handler types.
#[derive(Debug)]
pub struct PyException {
    exc_type: ExcType,
    class: Option<Rc<ClassObject>>,
    args: RefCell<Vec<Value>>,
    attrs: RefCell<IndexMap<String, Value, ahash::RandomState>>,
}

impl PyException {
    #[must_use]
    pub fn new(exc_type: ExcType, args: Vec<Value>) -> Self {
        Self {
            exc_type,
            class: None,
            args: RefCell::new(args),
            attrs: RefCell::default(),
        }
    }

    /// An instance of a user-defined subclass of a builtin exception.
    #[must_use]
    pub fn of_class(class: Rc<ClassObject>, exc_type: ExcType, args: Vec<Value>) -> Self {
        Self {
            exc_type,
            class: Some(class),
            args: RefCell::new(args),
            attrs: RefCell::default(),
        }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn class(&self) -> Option<&Rc<ClassObject>> {
        self.class.as_ref()
    }

    /// The Python-visible class name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match &self.class {
            Some(class) => class.name(),
            None => self.exc_type.into(),
        }
    }

    #[must_use]
    pub fn args(&self) -> Vec<Value> {
        self.args.borrow().clone()
    }

    pub(crate) fn set_args(&self, args: Vec<Value>) {
        *self.args.borrow_mut() = args;
    }

    pub(crate) fn attr(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }

    pub(crate) fn set_attr(&self, name: &str, value: Value) {
        self.attrs.borrow_mut().insert(name.to_owned(), value);
    }

    pub(crate) fn del_attr(&self, name: &str) -> bool {
        self.attrs.borrow_mut().shift_remove(name).is_some()
    }

    /// True if `except handler:` catches this exception, where the handler is
    /// a builtin exception kind.
    #[must_use]
    pub fn matches_builtin(&self, handler: ExcType) -> bool {
        self.exc_type.is_subclass_of(handler)
    }

    /// True if `except handler:` catches this exception, where the handler is
    /// a user-defined class.
    #[must_use]
    pub fn matches_class(&self, handler: &ClassObject) -> bool {
        self.class.as_ref().is_some_and(|class| class.is_subclass_of(handler))
    }

    /// `str(exc)`: empty for no args, the lone arg's `str`, or the args tuple.
    #[must_use]
    pub fn message(&self) -> String {
        let args = self.args.borrow();
        match args.as_slice() {
            [] => String::new(),
            [single] => match (self.exc_type, single) {
                (ExcType::KeyError, key) if self.class.is_none() => crate::runtime::py_repr(key),
                (_, value) => py_str(value),
            },
            many => crate::runtime::py_repr(&Value::tuple(many.to_vec())),
        }
    }
}

/// An error propagating out of generated code.
#[derive(Debug, Clone)]
pub enum RunError {
    /// A Python exception, catchable by `try`/`except` in generated code.
    Exception(Rc<PyException>),
    /// A broken executor invariant. Never catchable from Python code.
    Internal(Cow<'static, str>),
}

impl RunError {
    #[must_use]
    pub fn from_exception(exc: PyException) -> Self {
        Self::Exception(Rc::new(exc))
    }

    pub(crate) fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(message.into())
    }

    /// The builtin kind of the exception, `None` for internal errors.
    #[must_use]
    pub fn exc_type(&self) -> Option<ExcType> {
        match self {
            Self::Exception(exc) => Some(exc.exc_type()),
            Self::Internal(_) => None,
        }
    }

    /// True if this is a Python exception caught by `except handler:`.
    #[must_use]
    pub fn is(&self, handler: ExcType) -> bool {
        self.exc_type().is_some_and(|t| t.is_subclass_of(handler))
    }

    /// `str(exc)` for Python exceptions, the raw message for internal errors.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Exception(exc) => exc.message(),
            Self::Internal(msg) => msg.to_string(),
        }
    }

    /// The exception instance as a Python value.
    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::Exception(exc) => Some(Value::Exception(exc.clone())),
            Self::Internal(_) => None,
        }
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(exc) => {
                let message = exc.message();
                if message.is_empty() {
                    write!(f, "{}", exc.type_name())
                } else {
                    write!(f, "{}: {message}", exc.type_name())
                }
            }
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for RunError {}
