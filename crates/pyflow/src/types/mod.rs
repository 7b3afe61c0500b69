//! The static type lattice used by flow analysis.
//!
//! `PyType` is what the analyzer believes about a value. `Object` is the
//! universal top; every other type has a chain of ancestors ending there, and
//! `lub` merges two beliefs into the nearest common ancestor. User classes
//! participate through [`ClassType`], whose C3 linearization supplies the
//! ancestor chain for its instances.

mod builtin;
mod operator;
mod registry;

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use ahash::AHashMap;
use indexmap::IndexMap;

pub use self::{
    builtin::Builtin,
    operator::{BinaryOp, CompareOp, UnaryOp},
    registry::{CallSignature, Dispatch, OperandKinds, OperatorSignature, RegistryBuilder, TypeRegistry},
};
use crate::exception::ExcType;

/// Static type of a value on the symbolic stack or in a local slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PyType {
    /// Universal top: any value at all.
    Object,
    /// The NULL placeholder pushed below callables in 3.11+ call sequences.
    Null,
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    List,
    Tuple,
    Dict,
    Set,
    FrozenSet,
    Slice,
    Range,
    Iterator,
    /// Iterator over a `range`, known to produce `int`s.
    RangeIterator,
    Generator,
    Function,
    Module,
    Cell,
    Code,
    /// Some class object whose identity is not known statically.
    Type,
    /// A specific builtin callable such as `len`.
    Builtin(Builtin),
    /// An instance of a builtin exception kind.
    Exception(ExcType),
    /// A builtin exception class, e.g. the global `ValueError`.
    ExceptionClass(ExcType),
    /// An instance of a user-defined class.
    Instance(Arc<ClassType>),
    /// A user-defined class object itself.
    Class(Arc<ClassType>),
}

impl PyType {
    /// The immediate ancestor, `None` only for `Object`.
    ///
    /// Instances of user classes use their linearization instead; see [`PyType::mro`].
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        match self {
            Self::Object => None,
            Self::Bool => Some(Self::Int),
            Self::RangeIterator | Self::Generator => Some(Self::Iterator),
            Self::Exception(kind) => Some(kind.parent().map_or(Self::Object, Self::Exception)),
            Self::Instance(class) => class.mro.first().cloned(),
            _ => Some(Self::Object),
        }
    }

    /// `self` followed by its ancestors, ending with `Object`.
    #[must_use]
    pub fn mro(&self) -> Vec<Self> {
        match self {
            Self::Instance(class) => {
                let mut mro = Vec::with_capacity(class.mro.len() + 1);
                mro.push(self.clone());
                mro.extend(class.mro.iter().cloned());
                mro
            }
            _ => std::iter::successors(Some(self.clone()), Self::parent).collect(),
        }
    }

    /// True if every value of `self` is also a value of `other`.
    #[must_use]
    pub fn is_subtype_of(&self, other: &Self) -> bool {
        if other == &Self::Object || self == other {
            return true;
        }
        match self {
            Self::Instance(class) => class.mro.contains(other),
            Self::Object => false,
            _ => self.parent().is_some_and(|parent| parent.is_subtype_of(other)),
        }
    }

    /// Least upper bound: the closest type both `self` and `other` belong to.
    ///
    /// When multiple inheritance leaves two incomparable candidates the result
    /// is `Object`, which keeps the operation commutative.
    #[must_use]
    pub fn lub(&self, other: &Self) -> Self {
        if self.is_subtype_of(other) {
            return other.clone();
        }
        if other.is_subtype_of(self) {
            return self.clone();
        }
        let from_left = self.mro().into_iter().find(|t| other.is_subtype_of(t));
        let from_right = other.mro().into_iter().find(|t| self.is_subtype_of(t));
        match (from_left, from_right) {
            (Some(left), Some(right)) if left == right => left,
            _ => Self::Object,
        }
    }

    /// Static type of a constant pool entry.
    #[must_use]
    pub fn of_constant(constant: &crate::bytecode::Constant) -> Self {
        use crate::bytecode::Constant;
        match constant {
            Constant::None => Self::NoneType,
            Constant::Bool(_) => Self::Bool,
            Constant::Int(_) | Constant::BigInt(_) => Self::Int,
            Constant::Float(_) => Self::Float,
            Constant::Str(_) => Self::Str,
            Constant::Bytes(_) => Self::Bytes,
            Constant::Tuple(_) => Self::Tuple,
            Constant::FrozenSet(_) => Self::FrozenSet,
            Constant::Ellipsis => Self::Object,
            Constant::Code(_) => Self::Code,
        }
    }

    /// Resolves an annotation string such as `"int"` or `"Vector"`.
    ///
    /// `own` names the class being defined, `known` lists other classes in
    /// scope. Anything unrecognised is `Object`: annotations are hints only.
    #[must_use]
    pub fn from_annotation(annotation: &str, known: &[Arc<ClassType>]) -> Self {
        match annotation.trim_matches(|c| c == '\'' || c == '"') {
            "int" => Self::Int,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "str" => Self::Str,
            "bytes" => Self::Bytes,
            "list" => Self::List,
            "tuple" => Self::Tuple,
            "dict" => Self::Dict,
            "set" => Self::Set,
            "None" => Self::NoneType,
            name => {
                if let Some(class) = known.iter().find(|c| c.name() == name) {
                    Self::Instance(class.clone())
                } else if let Ok(kind) = name.parse::<ExcType>() {
                    Self::Exception(kind)
                } else {
                    Self::Object
                }
            }
        }
    }
}

impl fmt::Display for PyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Object => "object",
            Self::Null => "NULL",
            Self::NoneType => "None",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bytes => "bytes",
            Self::List => "list",
            Self::Tuple => "tuple",
            Self::Dict => "dict",
            Self::Set => "set",
            Self::FrozenSet => "frozenset",
            Self::Slice => "slice",
            Self::Range => "range",
            Self::Iterator => "iterator",
            Self::RangeIterator => "range_iterator",
            Self::Generator => "generator",
            Self::Function => "function",
            Self::Module => "module",
            Self::Cell => "cell",
            Self::Code => "code",
            Self::Type => "type",
            Self::Builtin(builtin) => return write!(f, "builtin[{builtin}]"),
            Self::Exception(kind) => return write!(f, "{kind}"),
            Self::ExceptionClass(kind) => return write!(f, "type[{kind}]"),
            Self::Instance(class) => return write!(f, "{}", class.name()),
            Self::Class(class) => return write!(f, "type[{}]", class.name()),
        };
        f.write_str(name)
    }
}

/// Globals collaborator used for optional static hints.
///
/// A missing name is never an error; the analyzer simply assumes `Object`.
pub trait TypeHints {
    /// Static type of the global `name`, if the embedder knows it.
    fn global_type(&self, name: &str) -> Option<PyType>;
}

/// Hints provider that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHints;

impl TypeHints for NoHints {
    fn global_type(&self, _name: &str) -> Option<PyType> {
        None
    }
}

impl TypeHints for AHashMap<String, PyType> {
    fn global_type(&self, name: &str) -> Option<PyType> {
        self.get(name).cloned()
    }
}

/// Type of an operator-method parameter or result, as declared on a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureType {
    /// Unannotated: accepts anything, produces `Object`.
    Any,
    /// The class declaring the method (resolved lazily, since the class is
    /// still being built when its methods are described).
    OwnClass,
    Known(PyType),
}

impl SignatureType {
    fn resolve(&self, owner: &Arc<ClassType>) -> PyType {
        match self {
            Self::Any => PyType::Object,
            Self::OwnClass => PyType::Instance(owner.clone()),
            Self::Known(ty) => ty.clone(),
        }
    }
}

/// Declared signature of one dunder method, excluding `self`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub params: Vec<SignatureType>,
    pub result: SignatureType,
}

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

/// Static description of a user-defined class.
///
/// Identity is by a process-unique id, so two classes with the same name are
/// different types.
pub struct ClassType {
    id: u64,
    name: String,
    bases: Vec<PyType>,
    /// C3 linearization excluding the class itself, ending with `Object`.
    mro: Vec<PyType>,
    operators: AHashMap<String, MethodSignature>,
    attributes: IndexMap<String, PyType>,
}

impl ClassType {
    /// Builds the class and computes its linearization.
    ///
    /// `bases` holds `Instance` types for user classes and `Exception` types
    /// for builtin exception bases. An empty list means `(object,)`.
    pub fn new(
        name: impl Into<String>,
        bases: Vec<PyType>,
        operators: AHashMap<String, MethodSignature>,
        attributes: IndexMap<String, PyType>,
    ) -> Result<Self, String> {
        let name = name.into();
        let mro = c3_linearize(&name, &bases)?;
        Ok(Self {
            id: NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed),
            name,
            bases,
            mro,
            operators,
            attributes,
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn bases(&self) -> &[PyType] {
        &self.bases
    }

    /// Ancestors in method resolution order, excluding the class itself.
    #[must_use]
    pub fn mro(&self) -> &[PyType] {
        &self.mro
    }

    /// The builtin exception kind this class derives from, if any.
    #[must_use]
    pub fn exception_base(&self) -> Option<ExcType> {
        self.mro.iter().find_map(|t| match t {
            PyType::Exception(kind) => Some(*kind),
            _ => None,
        })
    }

    /// Annotated type of an instance attribute.
    #[must_use]
    pub fn attribute_type(&self, name: &str) -> Option<&PyType> {
        self.attributes.get(name).or_else(|| {
            self.mro.iter().find_map(|t| match t {
                PyType::Instance(base) => base.attributes.get(name),
                _ => None,
            })
        })
    }

    /// Finds the class that provides `dunder` for instances of `this`,
    /// following the linearization, and returns it with the signature.
    #[must_use]
    pub fn find_operator(this: &Arc<Self>, dunder: &str) -> Option<(Arc<Self>, MethodSignature)> {
        if let Some(sig) = this.operators.get(dunder) {
            return Some((this.clone(), sig.clone()));
        }
        this.mro.iter().find_map(|t| match t {
            PyType::Instance(base) => base.operators.get(dunder).map(|sig| (base.clone(), sig.clone())),
            _ => None,
        })
    }

    /// Parameter and result types of `dunder` with `OwnClass` resolved.
    #[must_use]
    pub fn operator_types(this: &Arc<Self>, dunder: &str) -> Option<(Vec<PyType>, PyType)> {
        let (owner, sig) = Self::find_operator(this, dunder)?;
        let params = sig.params.iter().map(|p| p.resolve(&owner)).collect();
        Some((params, sig.result.resolve(&owner)))
    }
}

impl PartialEq for ClassType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClassType {}

impl Hash for ClassType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassType({}#{})", self.name, self.id)
    }
}

/// C3 linearization of `bases`, excluding the class being defined.
fn c3_linearize(name: &str, bases: &[PyType]) -> Result<Vec<PyType>, String> {
    if bases.is_empty() {
        return Ok(vec![PyType::Object]);
    }
    let mut sequences: Vec<Vec<PyType>> = bases.iter().map(PyType::mro).collect();
    sequences.push(bases.to_vec());

    let mut result = Vec::new();
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Ok(result);
        }
        let head = sequences
            .iter()
            .map(|s| &s[0])
            .find(|candidate| !sequences.iter().any(|s| s[1..].contains(*candidate)))
            .cloned();
        let Some(next) = head else {
            let names: Vec<String> = bases.iter().map(ToString::to_string).collect();
            return Err(format!(
                "Cannot create a consistent method resolution order (MRO) for bases {} of class {name}",
                names.join(", ")
            ));
        };
        for sequence in &mut sequences {
            if sequence.first() == Some(&next) {
                sequence.remove(0);
            }
        }
        result.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str, bases: Vec<PyType>) -> Arc<ClassType> {
        Arc::new(ClassType::new(name, bases, AHashMap::new(), IndexMap::new()).unwrap())
    }

    #[test]
    fn bool_widens_to_int() {
        assert_eq!(PyType::Bool.lub(&PyType::Int), PyType::Int);
        assert_eq!(PyType::Int.lub(&PyType::Bool), PyType::Int);
        assert_eq!(PyType::Int.lub(&PyType::Str), PyType::Object);
        assert_eq!(PyType::Str.lub(&PyType::Str), PyType::Str);
    }

    #[test]
    fn exception_kinds_meet_at_common_ancestor() {
        let zero = PyType::Exception(ExcType::ZeroDivisionError);
        let overflow = PyType::Exception(ExcType::OverflowError);
        let key = PyType::Exception(ExcType::KeyError);
        assert_eq!(zero.lub(&overflow), PyType::Exception(ExcType::ArithmeticError));
        assert_eq!(zero.lub(&key), PyType::Exception(ExcType::Exception));
    }

    #[test]
    fn diamond_linearization() {
        let a = class("A", vec![]);
        let b = class("B", vec![PyType::Instance(a.clone())]);
        let c = class("C", vec![PyType::Instance(a.clone())]);
        let d = class("D", vec![PyType::Instance(b.clone()), PyType::Instance(c.clone())]);
        assert_eq!(
            d.mro(),
            &[
                PyType::Instance(b.clone()),
                PyType::Instance(c.clone()),
                PyType::Instance(a.clone()),
                PyType::Object
            ]
        );
        let bi = PyType::Instance(b);
        let ci = PyType::Instance(c);
        assert_eq!(bi.lub(&ci), PyType::Instance(a.clone()));
        assert_eq!(ci.lub(&bi), PyType::Instance(a));
    }

    #[test]
    fn user_exception_is_builtin_subtype() {
        let err = class("AppError", vec![PyType::Exception(ExcType::ValueError)]);
        let instance = PyType::Instance(err.clone());
        assert!(instance.is_subtype_of(&PyType::Exception(ExcType::Exception)));
        assert_eq!(err.exception_base(), Some(ExcType::ValueError));
    }

    #[test]
    fn inconsistent_bases_are_rejected() {
        let a = class("A", vec![]);
        let b = class("B", vec![PyType::Instance(a.clone())]);
        let result = ClassType::new(
            "C",
            vec![PyType::Instance(a), PyType::Instance(b)],
            AHashMap::new(),
            IndexMap::new(),
        );
        assert!(result.is_err());
    }
}
