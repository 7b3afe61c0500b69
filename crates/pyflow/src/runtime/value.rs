//! Runtime values.
//!
//! `Value` is a cheap-to-clone handle: scalars are stored inline and every
//! container or object sits behind an `Rc`. Mutable containers use `RefCell`,
//! so aliasing behaves as in Python: two names bound to one list see each
//! other's appends.

use std::{
    borrow::Cow,
    cell::RefCell,
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
    sync::Arc,
};

use ahash::RandomState;
use indexmap::{IndexMap, IndexSet};
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use super::{
    class::{ClassObject, Instance},
    dispatch,
    function::{BoundMethod, Function},
    generator::Generator,
    globals::Module,
    iter::PyIterator,
    methods::BuiltinMethod,
    repr::{py_repr, py_str},
};
use crate::{
    bytecode::Constant,
    codegen::CompiledCode,
    exception::{ExcType, PyException, RunResult},
    types::{Builtin, CompareOp},
};

/// Insertion-ordered `dict` storage.
pub type Dict = IndexMap<HashKey, Value, RandomState>;

/// Insertion-ordered `set` storage.
pub type Set = IndexSet<HashKey, RandomState>;

/// A Python value.
#[derive(Clone)]
pub enum Value {
    /// The NULL slot of the call convention. Never visible to Python code.
    Null,
    None,
    Ellipsis,
    NotImplemented,
    Bool(bool),
    Int(i64),
    /// An integer outside the `i64` range. Results that fit are always
    /// normalized back to `Int`.
    Long(Rc<BigInt>),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Set>>),
    FrozenSet(Rc<Set>),
    Slice(Rc<SliceValue>),
    Range(RangeValue),
    Iterator(Rc<PyIterator>),
    Function(Rc<Function>),
    BoundMethod(Rc<BoundMethod>),
    StaticMethod(Rc<Function>),
    ClassMethod(Rc<Function>),
    Builtin(Builtin),
    BuiltinMethod(Rc<BuiltinMethod>),
    /// A builtin exception class such as `ValueError`.
    ExcClass(ExcType),
    Class(Rc<ClassObject>),
    Instance(Rc<Instance>),
    Generator(Rc<Generator>),
    /// An exception instance, builtin or of a user-defined exception class.
    Exception(Rc<PyException>),
    Module(Rc<Module>),
    Cell(Rc<Cell>),
    Code(Arc<CompiledCode>),
}

impl Value {
    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(items.into())
    }

    #[must_use]
    pub fn dict(dict: Dict) -> Self {
        Self::Dict(Rc::new(RefCell::new(dict)))
    }

    #[must_use]
    pub fn set(set: Set) -> Self {
        Self::Set(Rc::new(RefCell::new(set)))
    }

    /// An integer, stored inline when it fits in `i64`.
    #[must_use]
    pub fn from_bigint(value: BigInt) -> Self {
        match value.to_i64() {
            Some(small) => Self::Int(small),
            None => Self::Long(Rc::new(value)),
        }
    }

    /// Converts a constant pool entry.
    #[must_use]
    pub fn from_constant(constant: &Constant) -> Self {
        match constant {
            Constant::None => Self::None,
            Constant::Bool(b) => Self::Bool(*b),
            Constant::Int(i) => Self::Int(*i),
            Constant::BigInt(b) => Self::from_bigint(b.clone()),
            Constant::Float(f) => Self::Float(*f),
            Constant::Str(s) => Self::from(s.as_str()),
            Constant::Bytes(b) => Self::Bytes(b.as_slice().into()),
            Constant::Tuple(items) => Self::tuple(items.iter().map(Self::from_constant).collect()),
            Constant::FrozenSet(items) => {
                let set = items
                    .iter()
                    .filter_map(|item| HashKey::new(Self::from_constant(item)).ok())
                    .collect();
                Self::FrozenSet(Rc::new(set))
            }
            Constant::Ellipsis => Self::Ellipsis,
            // Code objects only appear at the top level of a pool, where
            // assembly has already compiled them.
            Constant::Code(_) => Self::None,
        }
    }

    /// The Python type name, as used in error messages.
    #[must_use]
    pub fn type_name(&self) -> Cow<'_, str> {
        let name = match self {
            Self::Null => "NULL",
            Self::None => "NoneType",
            Self::Ellipsis => "ellipsis",
            Self::NotImplemented => "NotImplementedType",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::Long(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::FrozenSet(_) => "frozenset",
            Self::Slice(_) => "slice",
            Self::Range(_) => "range",
            Self::Iterator(it) => it.kind_name(),
            Self::Function(_) => "function",
            Self::BoundMethod(_) => "method",
            Self::StaticMethod(_) => "staticmethod",
            Self::ClassMethod(_) => "classmethod",
            Self::Builtin(b) if b.is_type() => "type",
            Self::Builtin(_) | Self::BuiltinMethod(_) => "builtin_function_or_method",
            Self::ExcClass(_) | Self::Class(_) => "type",
            Self::Instance(instance) => return Cow::Borrowed(instance.class().name()),
            Self::Generator(_) => "generator",
            Self::Exception(exc) => return Cow::Borrowed(exc.type_name()),
            Self::Module(_) => "module",
            Self::Cell(_) => "cell",
            Self::Code(_) => "code",
        };
        Cow::Borrowed(name)
    }

    /// Python's `is`.
    #[must_use]
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null)
            | (Self::None, Self::None)
            | (Self::Ellipsis, Self::Ellipsis)
            | (Self::NotImplemented, Self::NotImplemented) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => Rc::ptr_eq(a, b),
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Bytes(a), Self::Bytes(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b) || (a.is_empty() && b.is_empty()),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b),
            (Self::Set(a), Self::Set(b)) => Rc::ptr_eq(a, b),
            (Self::FrozenSet(a), Self::FrozenSet(b)) => Rc::ptr_eq(a, b),
            (Self::Slice(a), Self::Slice(b)) => Rc::ptr_eq(a, b),
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Iterator(a), Self::Iterator(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b))
            | (Self::StaticMethod(a), Self::StaticMethod(b))
            | (Self::ClassMethod(a), Self::ClassMethod(b)) => Rc::ptr_eq(a, b),
            (Self::BoundMethod(a), Self::BoundMethod(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::BuiltinMethod(a), Self::BuiltinMethod(b)) => Rc::ptr_eq(a, b),
            (Self::ExcClass(a), Self::ExcClass(b)) => a == b,
            (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(a, b),
            (Self::Instance(a), Self::Instance(b)) => Rc::ptr_eq(a, b),
            (Self::Generator(a), Self::Generator(b)) => Rc::ptr_eq(a, b),
            (Self::Exception(a), Self::Exception(b)) => Rc::ptr_eq(a, b),
            (Self::Module(a), Self::Module(b)) => Rc::ptr_eq(a, b),
            (Self::Cell(a), Self::Cell(b)) => Rc::ptr_eq(a, b),
            (Self::Code(a), Self::Code(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Address-like identity used by `id()` and default hashing.
    #[must_use]
    pub fn identity(&self) -> usize {
        fn addr<T: ?Sized>(rc: &Rc<T>) -> usize {
            Rc::as_ptr(rc).cast::<()>() as usize
        }
        match self {
            Self::Long(v) => addr(v),
            Self::Str(v) => addr(v),
            Self::Bytes(v) => addr(v),
            Self::List(v) => addr(v),
            Self::Tuple(v) => addr(v),
            Self::Dict(v) => addr(v),
            Self::Set(v) => addr(v),
            Self::FrozenSet(v) => addr(v),
            Self::Slice(v) => addr(v),
            Self::Iterator(v) => addr(v),
            Self::Function(v) | Self::StaticMethod(v) | Self::ClassMethod(v) => addr(v),
            Self::BoundMethod(v) => addr(v),
            Self::BuiltinMethod(v) => addr(v),
            Self::Class(v) => addr(v),
            Self::Instance(v) => addr(v),
            Self::Generator(v) => addr(v),
            Self::Exception(v) => addr(v),
            Self::Module(v) => addr(v),
            Self::Cell(v) => addr(v),
            Self::Code(v) => Arc::as_ptr(v) as usize,
            Self::Builtin(b) => *b as usize + 1,
            Self::ExcClass(e) => *e as usize + 0x100,
            Self::Null | Self::None | Self::Ellipsis | Self::NotImplemented => 0,
            Self::Bool(b) => usize::from(*b),
            Self::Int(i) => *i as usize,
            Self::Float(f) => f.to_bits() as usize,
            Self::Range(r) => r.start as usize ^ r.stop as usize,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The value as a machine integer, for `int` and `bool` only.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        match i64::try_from(value) {
            Ok(small) => Self::Int(small),
            Err(_) => Self::from_bigint(BigInt::from(value)),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

impl From<BigInt> for Value {
    fn from(value: BigInt) -> Self {
        Self::from_bigint(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::list(items)
    }
}

impl From<Rc<Function>> for Value {
    fn from(function: Rc<Function>) -> Self {
        Self::Function(function)
    }
}

impl From<Rc<ClassObject>> for Value {
    fn from(class: Rc<ClassObject>) -> Self {
        Self::Class(class)
    }
}

impl From<Rc<Module>> for Value {
    fn from(module: Rc<Module>) -> Self {
        Self::Module(module)
    }
}

impl From<Builtin> for Value {
    fn from(builtin: Builtin) -> Self {
        Self::Builtin(builtin)
    }
}

/// Python `==`. A comparison that raises counts as unequal.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        dispatch::eq(self, other).unwrap_or(false)
    }
}

/// Python ordering through `<` and `>`, including user `__lt__`/`__gt__`.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let holds = |op| dispatch::compare_bool(op, self, other).ok();
        if holds(CompareOp::Eq)? {
            Some(Ordering::Equal)
        } else if holds(CompareOp::Lt)? {
            Some(Ordering::Less)
        } else if holds(CompareOp::Gt)? {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&py_repr(self))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&py_str(self))
    }
}

/// A `dict` key or `set` member: a value with its hash computed once.
#[derive(Clone)]
pub struct HashKey {
    hash: u64,
    value: Value,
}

impl HashKey {
    /// Hashes `value`, raising `TypeError` for unhashable types.
    pub fn new(value: Value) -> RunResult<Self> {
        let hash = dispatch::hash(&value)?;
        Ok(Self { hash, value })
    }

    /// Key for a string, which is always hashable.
    #[must_use]
    pub fn str(key: &str) -> Self {
        Self {
            hash: dispatch::hash_str(key),
            value: Value::from(key),
        }
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }
}

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialEq for HashKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && (self.value.is(&other.value) || self.value == other.value)
    }
}

impl Eq for HashKey {}

impl fmt::Debug for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.value, f)
    }
}

/// A closure cell.
#[derive(Debug, Default)]
pub struct Cell(RefCell<Option<Value>>);

impl Cell {
    #[must_use]
    pub fn new(value: Option<Value>) -> Self {
        Self(RefCell::new(value))
    }

    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = Some(value);
    }

    /// Unbinds the cell, returning whether it was bound.
    pub fn clear(&self) -> bool {
        self.0.borrow_mut().take().is_some()
    }
}

/// A `range` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    /// Never zero.
    pub step: i64,
}

impl RangeValue {
    #[must_use]
    pub fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (i128::from(self.start), i128::from(self.stop), i128::from(self.step))
        } else {
            (i128::from(self.stop), i128::from(self.start), -i128::from(self.step))
        };
        if lo >= hi {
            0
        } else {
            usize::try_from((hi - lo - 1) / step + 1).unwrap_or(usize::MAX)
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Item at a non-negative index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let index = i64::try_from(index).ok()?;
        Some(self.start + index * self.step)
    }

    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (value - self.start) % self.step == 0
    }
}

/// A `slice` object. Bounds are arbitrary values until applied.
#[derive(Debug, Clone)]
pub struct SliceValue {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

impl SliceValue {
    /// Clamps the slice against a sequence of `len` items, returning
    /// `(start, stop, step)` the way `slice.indices` does.
    pub fn indices(&self, len: usize) -> RunResult<(i64, i64, i64)> {
        let bound = |value: &Value| -> RunResult<Option<i64>> {
            match value {
                Value::None => Ok(None),
                other => other.as_int().map(Some).ok_or_else(|| {
                    ExcType::type_error(
                        "slice indices must be integers or None or have an __index__ method",
                    )
                }),
            }
        };
        let step = bound(&self.step)?.unwrap_or(1);
        if step == 0 {
            return Err(ExcType::ValueError.error("slice step cannot be zero"));
        }
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
        let clamp = |index: Option<i64>, default: i64| match index {
            None => default,
            Some(i) if i < 0 => (i + len).max(lower),
            Some(i) => i.min(upper),
        };
        let start = clamp(bound(&self.start)?, if step < 0 { upper } else { lower });
        let stop = clamp(bound(&self.stop)?, if step < 0 { lower } else { upper });
        Ok((start, stop, step))
    }

    /// Positions selected from a sequence of `len` items, in order.
    pub fn positions(&self, len: usize) -> RunResult<Vec<usize>> {
        let (start, stop, step) = self.indices(len)?;
        let mut positions = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            if let Ok(index) = usize::try_from(i) {
                positions.push(index);
            }
            i += step;
        }
        Ok(positions)
    }
}
