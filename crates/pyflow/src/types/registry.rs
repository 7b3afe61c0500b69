//! Operator and call signature tables for builtin types.
//!
//! The registry is built in two phases. During registration a
//! [`RegistryBuilder`] is handed to each bootstrap callback in turn; `freeze`
//! then produces an immutable [`TypeRegistry`] that translation workers share
//! without locking. The process-wide instance is created on first use.

use std::sync::OnceLock;

use ahash::AHashMap;
use strum::IntoStaticStr;

use super::{BinaryOp, Builtin, ClassType, CompareOp, PyType, UnaryOp};

/// Runtime operand representations a direct operation is specialized for.
///
/// The executor checks the operands against these before taking the fast
/// path; any mismatch falls back to dynamic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum OperandKinds {
    IntInt,
    IntFloat,
    FloatInt,
    FloatFloat,
    BoolBool,
    StrStr,
    StrInt,
    IntStr,
    ListList,
    ListInt,
    IntList,
    TupleTuple,
    TupleInt,
    IntTuple,
    StrSlice,
    ListSlice,
    TupleSlice,
    /// Single `int` operand of a unary operator.
    Int,
    /// Single `float` operand of a unary operator.
    Float,
}

impl OperandKinds {
    /// True for kinds whose direct form would build a new list where the
    /// in-place operator must mutate the existing one.
    #[must_use]
    pub fn aliases_list(self) -> bool {
        matches!(self, Self::ListList | Self::ListInt)
    }
}

/// One builtin operator method: `receiver.dunder(operand) -> result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSignature {
    /// `None` for unary operators.
    pub operand: Option<PyType>,
    pub result: PyType,
    pub kinds: OperandKinds,
}

/// A fixed-arity (or variadic) signature of a builtin callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSignature {
    pub params: Vec<PyType>,
    /// Accepts any number of arguments of any type.
    pub variadic: bool,
    pub result: PyType,
}

impl CallSignature {
    fn accepts(&self, args: &[PyType]) -> bool {
        self.variadic
            || (self.params.len() == args.len() && args.iter().zip(&self.params).all(|(a, p)| a.is_subtype_of(p)))
    }
}

/// How an operator site should be emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Exactly one builtin signature matched: emit a guarded monomorphic op.
    Direct { result: PyType, kinds: OperandKinds },
    /// A user class provides the operator: call its dunder directly.
    Method { result: PyType, reflected: bool },
    /// Nothing provable: full double dispatch at run time.
    Dynamic,
}

impl Dispatch {
    /// Static type of the operator's result.
    #[must_use]
    pub fn result_type(&self) -> PyType {
        match self {
            Self::Direct { result, .. } | Self::Method { result, .. } => result.clone(),
            Self::Dynamic => PyType::Object,
        }
    }
}

enum Lookup {
    /// The receiver type does not define the method at all.
    Undefined,
    /// Defined, but no unique signature accepts the operand.
    Declined,
    Found(Dispatch),
}

type OperatorTable = AHashMap<PyType, AHashMap<&'static str, Vec<OperatorSignature>>>;

/// Mutable registration phase of the registry.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    operators: OperatorTable,
    calls: AHashMap<Builtin, Vec<CallSignature>>,
}

impl RegistryBuilder {
    /// Registers `receiver.dunder(operand) -> result`.
    pub fn binary(
        &mut self,
        receiver: PyType,
        dunder: &'static str,
        operand: PyType,
        result: PyType,
        kinds: OperandKinds,
    ) -> &mut Self {
        self.operators
            .entry(receiver)
            .or_default()
            .entry(dunder)
            .or_default()
            .push(OperatorSignature {
                operand: Some(operand),
                result,
                kinds,
            });
        self
    }

    /// Registers `receiver.dunder() -> result`.
    pub fn unary(&mut self, receiver: PyType, dunder: &'static str, result: PyType, kinds: OperandKinds) -> &mut Self {
        self.operators
            .entry(receiver)
            .or_default()
            .entry(dunder)
            .or_default()
            .push(OperatorSignature {
                operand: None,
                result,
                kinds,
            });
        self
    }

    /// Registers a fixed-arity call signature for a builtin.
    pub fn call(&mut self, builtin: Builtin, params: Vec<PyType>, result: PyType) -> &mut Self {
        self.calls.entry(builtin).or_default().push(CallSignature {
            params,
            variadic: false,
            result,
        });
        self
    }

    /// Registers a builtin that accepts any arguments and returns `result`.
    pub fn variadic_call(&mut self, builtin: Builtin, result: PyType) -> &mut Self {
        self.calls.entry(builtin).or_default().push(CallSignature {
            params: Vec::new(),
            variadic: true,
            result,
        });
        self
    }

    /// Ends registration.
    #[must_use]
    pub fn freeze(self) -> TypeRegistry {
        TypeRegistry {
            operators: self.operators,
            calls: self.calls,
        }
    }
}

/// Frozen operator and call tables, safe for concurrent reads.
#[derive(Debug)]
pub struct TypeRegistry {
    operators: OperatorTable,
    calls: AHashMap<Builtin, Vec<CallSignature>>,
}

/// Registration callbacks run once, in order, when the global registry is first used.
const BOOTSTRAP: &[fn(&mut RegistryBuilder)] = &[
    register_int,
    register_float,
    register_bool,
    register_str,
    register_sequences,
    register_builtin_calls,
];

static GLOBAL: OnceLock<TypeRegistry> = OnceLock::new();

impl TypeRegistry {
    /// The process-wide registry of builtin types.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| {
            let mut builder = Self::builder();
            for register in BOOTSTRAP {
                register(&mut builder);
            }
            let registry = builder.freeze();
            tracing::debug!(types = registry.operators.len(), "builtin type registry frozen");
            registry
        })
    }

    /// An empty builder, for embedders that want their own tables.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Resolves `lhs <op> rhs`.
    ///
    /// The left operand's own method is tried first; if the left type does not
    /// accept the right operand and `reflected` inference is enabled, the right
    /// operand's reflected method is consulted with the same rule. Only a
    /// unique candidate counts.
    #[must_use]
    pub fn resolve_binary(&self, op: BinaryOp, inplace: bool, lhs: &PyType, rhs: &PyType, reflected: bool) -> Dispatch {
        if inplace
            && let PyType::Instance(class) = lhs
            && ClassType::find_operator(class, op.inplace_dunder()).is_some()
        {
            return match self.lookup(lhs, op.inplace_dunder(), Some(rhs)) {
                Lookup::Found(dispatch) => dispatch,
                _ => Dispatch::Dynamic,
            };
        }
        let dispatch = self.resolve_pair(lhs, op.dunder(), rhs, op.reflected_dunder(), reflected);
        match dispatch {
            Dispatch::Direct { kinds, .. } if inplace && kinds.aliases_list() => Dispatch::Dynamic,
            other => other,
        }
    }

    /// Resolves `lhs <cmp> rhs` with the swapped comparison as the reflection.
    #[must_use]
    pub fn resolve_compare(&self, op: CompareOp, lhs: &PyType, rhs: &PyType, reflected: bool) -> Dispatch {
        self.resolve_pair(lhs, op.dunder(), rhs, op.reflected().dunder(), reflected)
    }

    /// Resolves a unary operator on `operand`. `not` never has a dunder and is
    /// always dynamic here; its result is `bool` regardless.
    #[must_use]
    pub fn resolve_unary(&self, op: UnaryOp, operand: &PyType) -> Dispatch {
        let Some(dunder) = op.dunder() else {
            return Dispatch::Dynamic;
        };
        match self.lookup(operand, dunder, None) {
            Lookup::Found(dispatch) => dispatch,
            Lookup::Undefined | Lookup::Declined => Dispatch::Dynamic,
        }
    }

    /// Resolves a non-operator dunder such as `__getitem__` on `receiver`.
    ///
    /// Unlike operators there is no reflection: the receiver alone decides.
    #[must_use]
    pub fn resolve_method(&self, receiver: &PyType, dunder: &str, operand: Option<&PyType>) -> Dispatch {
        match self.lookup(receiver, dunder, operand) {
            Lookup::Found(dispatch) => dispatch,
            Lookup::Undefined | Lookup::Declined => Dispatch::Dynamic,
        }
    }

    /// Result type of calling `builtin` with arguments of the given types,
    /// if exactly one registered signature accepts them.
    #[must_use]
    pub fn resolve_call(&self, builtin: Builtin, args: &[PyType]) -> Option<PyType> {
        let signatures = self.calls.get(&builtin)?;
        let mut matching = signatures.iter().filter(|sig| sig.accepts(args));
        match (matching.next(), matching.next()) {
            (Some(sig), None) => Some(sig.result.clone()),
            _ => None,
        }
    }

    fn resolve_pair(&self, lhs: &PyType, dunder: &str, rhs: &PyType, reflected_dunder: &str, reflected: bool) -> Dispatch {
        match self.lookup(lhs, dunder, Some(rhs)) {
            Lookup::Found(dispatch) => return dispatch,
            Lookup::Undefined | Lookup::Declined => {}
        }
        // An unknown left operand may define the forward method itself.
        if !reflected || *lhs == PyType::Object || *rhs == PyType::Object {
            return Dispatch::Dynamic;
        }
        match self.lookup(rhs, reflected_dunder, Some(lhs)) {
            Lookup::Found(Dispatch::Method { result, .. }) => Dispatch::Method { result, reflected: true },
            Lookup::Found(dispatch) => dispatch,
            Lookup::Undefined | Lookup::Declined => Dispatch::Dynamic,
        }
    }

    fn lookup(&self, receiver: &PyType, dunder: &str, operand: Option<&PyType>) -> Lookup {
        if let PyType::Instance(class) = receiver {
            return match ClassType::operator_types(class, dunder) {
                None => Lookup::Undefined,
                Some((params, result)) => {
                    let accepts = match (operand, params.first()) {
                        (Some(operand), Some(param)) => operand.is_subtype_of(param),
                        (Some(_), None) => false,
                        (None, _) => true,
                    };
                    if accepts {
                        Lookup::Found(Dispatch::Method {
                            result,
                            reflected: false,
                        })
                    } else {
                        Lookup::Declined
                    }
                }
            };
        }
        for ty in receiver.mro() {
            let Some(signatures) = self.operators.get(&ty).and_then(|table| table.get(dunder)) else {
                continue;
            };
            let mut matching = signatures.iter().filter(|sig| match (&sig.operand, operand) {
                (Some(param), Some(operand)) => operand.is_subtype_of(param),
                (None, None) => true,
                _ => false,
            });
            return match (matching.next(), matching.next()) {
                (Some(sig), None) => Lookup::Found(Dispatch::Direct {
                    result: sig.result.clone(),
                    kinds: sig.kinds,
                }),
                _ => Lookup::Declined,
            };
        }
        Lookup::Undefined
    }
}

const INT_CLOSED: [BinaryOp; 10] = [
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::FloorDiv,
    BinaryOp::Mod,
    BinaryOp::LShift,
    BinaryOp::RShift,
    BinaryOp::And,
    BinaryOp::Or,
    BinaryOp::Xor,
];

const FLOAT_CLOSED: [BinaryOp; 6] = [
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::TrueDiv,
    BinaryOp::FloorDiv,
    BinaryOp::Mod,
];

const COMPARISONS: [CompareOp; 6] = [
    CompareOp::Lt,
    CompareOp::Le,
    CompareOp::Eq,
    CompareOp::Ne,
    CompareOp::Gt,
    CompareOp::Ge,
];

fn register_int(b: &mut RegistryBuilder) {
    use OperandKinds::{Int, IntFloat, IntInt};
    for op in INT_CLOSED {
        b.binary(PyType::Int, op.dunder(), PyType::Int, PyType::Int, IntInt);
        b.binary(PyType::Int, op.reflected_dunder(), PyType::Int, PyType::Int, IntInt);
    }
    b.binary(PyType::Int, "__truediv__", PyType::Int, PyType::Float, IntInt);
    b.binary(PyType::Int, "__rtruediv__", PyType::Int, PyType::Float, IntInt);
    for cmp in COMPARISONS {
        b.binary(PyType::Int, cmp.dunder(), PyType::Int, PyType::Bool, IntInt);
        b.binary(PyType::Int, cmp.dunder(), PyType::Float, PyType::Bool, IntFloat);
    }
    for op in [UnaryOp::Neg, UnaryOp::Pos, UnaryOp::Invert] {
        if let Some(dunder) = op.dunder() {
            b.unary(PyType::Int, dunder, PyType::Int, Int);
        }
    }
}

fn register_float(b: &mut RegistryBuilder) {
    use OperandKinds::{Float, FloatFloat, FloatInt, IntFloat};
    for op in FLOAT_CLOSED {
        b.binary(PyType::Float, op.dunder(), PyType::Float, PyType::Float, FloatFloat);
        b.binary(PyType::Float, op.dunder(), PyType::Int, PyType::Float, FloatInt);
        b.binary(PyType::Float, op.reflected_dunder(), PyType::Int, PyType::Float, IntFloat);
    }
    for cmp in COMPARISONS {
        b.binary(PyType::Float, cmp.dunder(), PyType::Float, PyType::Bool, FloatFloat);
        b.binary(PyType::Float, cmp.dunder(), PyType::Int, PyType::Bool, FloatInt);
    }
    b.unary(PyType::Float, "__neg__", PyType::Float, Float);
    b.unary(PyType::Float, "__pos__", PyType::Float, Float);
}

fn register_bool(b: &mut RegistryBuilder) {
    for op in [BinaryOp::And, BinaryOp::Or, BinaryOp::Xor] {
        b.binary(PyType::Bool, op.dunder(), PyType::Bool, PyType::Bool, OperandKinds::BoolBool);
    }
}

fn register_str(b: &mut RegistryBuilder) {
    b.binary(PyType::Str, "__add__", PyType::Str, PyType::Str, OperandKinds::StrStr);
    b.binary(PyType::Str, "__mul__", PyType::Int, PyType::Str, OperandKinds::StrInt);
    b.binary(PyType::Str, "__rmul__", PyType::Int, PyType::Str, OperandKinds::IntStr);
    b.binary(PyType::Str, "__getitem__", PyType::Int, PyType::Str, OperandKinds::StrInt);
    b.binary(PyType::Str, "__getitem__", PyType::Slice, PyType::Str, OperandKinds::StrSlice);
    for cmp in COMPARISONS {
        b.binary(PyType::Str, cmp.dunder(), PyType::Str, PyType::Bool, OperandKinds::StrStr);
    }
}

fn register_sequences(b: &mut RegistryBuilder) {
    use OperandKinds::{IntList, IntTuple, ListInt, ListList, ListSlice, TupleInt, TupleSlice, TupleTuple};
    b.binary(PyType::List, "__add__", PyType::List, PyType::List, ListList);
    b.binary(PyType::List, "__mul__", PyType::Int, PyType::List, ListInt);
    b.binary(PyType::List, "__rmul__", PyType::Int, PyType::List, IntList);
    b.binary(PyType::Tuple, "__add__", PyType::Tuple, PyType::Tuple, TupleTuple);
    b.binary(PyType::Tuple, "__mul__", PyType::Int, PyType::Tuple, TupleInt);
    b.binary(PyType::Tuple, "__rmul__", PyType::Int, PyType::Tuple, IntTuple);
    b.binary(PyType::List, "__getitem__", PyType::Slice, PyType::List, ListSlice);
    b.binary(PyType::Tuple, "__getitem__", PyType::Slice, PyType::Tuple, TupleSlice);
    b.binary(PyType::Range, "__getitem__", PyType::Int, PyType::Int, OperandKinds::IntInt);
}

fn register_builtin_calls(b: &mut RegistryBuilder) {
    use PyType::{Bool, Dict, Float, Int, Iterator, List, Object, Range, Str, Tuple};
    b.call(Builtin::Len, vec![Object], Int)
        .call(Builtin::Abs, vec![Int], Int)
        .call(Builtin::Abs, vec![Float], Float)
        .call(Builtin::Int, vec![], Int)
        .call(Builtin::Int, vec![Object], Int)
        .call(Builtin::Float, vec![], Float)
        .call(Builtin::Float, vec![Object], Float)
        .call(Builtin::Str, vec![], Str)
        .call(Builtin::Str, vec![Object], Str)
        .call(Builtin::Repr, vec![Object], Str)
        .call(Builtin::Bool, vec![], Bool)
        .call(Builtin::Bool, vec![Object], Bool)
        .call(Builtin::List, vec![], List)
        .call(Builtin::List, vec![Object], List)
        .call(Builtin::Tuple, vec![], Tuple)
        .call(Builtin::Tuple, vec![Object], Tuple)
        .call(Builtin::Dict, vec![], Dict)
        .call(Builtin::Set, vec![], PyType::Set)
        .call(Builtin::Set, vec![Object], PyType::Set)
        .call(Builtin::Range, vec![Int], Range)
        .call(Builtin::Range, vec![Int, Int], Range)
        .call(Builtin::Range, vec![Int, Int, Int], Range)
        .call(Builtin::Iter, vec![Object], Iterator)
        .call(Builtin::Isinstance, vec![Object, Object], Bool)
        .call(Builtin::Sorted, vec![Object], List)
        .call(Builtin::Enumerate, vec![Object], Iterator)
        .call(Builtin::Reversed, vec![Object], Iterator)
        .call(Builtin::Type, vec![Object], PyType::Type)
        .variadic_call(Builtin::Zip, Iterator)
        .variadic_call(Builtin::Print, PyType::NoneType);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_add_is_direct() {
        let registry = TypeRegistry::global();
        let dispatch = registry.resolve_binary(BinaryOp::Add, false, &PyType::Int, &PyType::Int, true);
        assert_eq!(
            dispatch,
            Dispatch::Direct {
                result: PyType::Int,
                kinds: OperandKinds::IntInt
            }
        );
    }

    #[test]
    fn bool_operand_matches_int_signature() {
        let registry = TypeRegistry::global();
        let dispatch = registry.resolve_binary(BinaryOp::Add, false, &PyType::Bool, &PyType::Int, true);
        assert_eq!(dispatch.result_type(), PyType::Int);
    }

    #[test]
    fn int_plus_float_uses_reflected_signature() {
        let registry = TypeRegistry::global();
        let dispatch = registry.resolve_binary(BinaryOp::Add, false, &PyType::Int, &PyType::Float, true);
        assert_eq!(
            dispatch,
            Dispatch::Direct {
                result: PyType::Float,
                kinds: OperandKinds::IntFloat
            }
        );
        let conservative = registry.resolve_binary(BinaryOp::Add, false, &PyType::Int, &PyType::Float, false);
        assert_eq!(conservative, Dispatch::Dynamic);
    }

    #[test]
    fn mismatched_operands_stay_dynamic() {
        let registry = TypeRegistry::global();
        let dispatch = registry.resolve_binary(BinaryOp::Add, false, &PyType::Int, &PyType::Str, true);
        assert_eq!(dispatch, Dispatch::Dynamic);
        assert_eq!(dispatch.result_type(), PyType::Object);
    }

    #[test]
    fn list_inplace_add_is_not_direct() {
        let registry = TypeRegistry::global();
        let dispatch = registry.resolve_binary(BinaryOp::Add, true, &PyType::List, &PyType::List, true);
        assert_eq!(dispatch, Dispatch::Dynamic);
    }

    #[test]
    fn slicing_keeps_sequence_type() {
        let registry = TypeRegistry::global();
        let list = registry.resolve_method(&PyType::List, "__getitem__", Some(&PyType::Slice));
        assert_eq!(list.result_type(), PyType::List);
        let item = registry.resolve_method(&PyType::List, "__getitem__", Some(&PyType::Int));
        assert_eq!(item, Dispatch::Dynamic);
        let ch = registry.resolve_method(&PyType::Str, "__getitem__", Some(&PyType::Bool));
        assert_eq!(ch.result_type(), PyType::Str);
    }

    #[test]
    fn builtin_call_needs_unique_signature() {
        let registry = TypeRegistry::global();
        assert_eq!(registry.resolve_call(Builtin::Len, &[PyType::List]), Some(PyType::Int));
        assert_eq!(registry.resolve_call(Builtin::Abs, &[PyType::Float]), Some(PyType::Float));
        assert_eq!(registry.resolve_call(Builtin::Abs, &[PyType::Object]), None);
        assert_eq!(registry.resolve_call(Builtin::Len, &[]), None);
    }
}
