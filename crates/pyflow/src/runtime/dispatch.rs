//! Operator, attribute and container protocols.
//!
//! Every dynamic op of generated code bottoms out here. Specialized ops
//! (`BinaryDirect` and friends) check their guard and then run exactly the
//! native routine the dynamic path would have picked, so a guard hit and a
//! guard miss cannot disagree.

use std::{cmp::Ordering, rc::Rc};

use ahash::RandomState;

use super::{
    call, class, iter,
    methods::{self, BuiltinMethod},
    numeric,
    repr,
    value::{Dict, HashKey, RangeValue, Set, SliceValue, Value},
};
use crate::{
    exception::{ExcType, RunError, RunResult},
    types::{BinaryOp, CompareOp, OperandKinds, UnaryOp},
};

const NONE_HASH: u64 = 0xFC_A86F;
const TUPLE_SEED: u64 = 0x345_678;

// ---------------------------------------------------------------------------
// Truth, length, hashing
// ---------------------------------------------------------------------------

/// `bool(value)`.
pub(crate) fn truthy(value: &Value) -> RunResult<bool> {
    Ok(match value {
        Value::None | Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Long(_) => true,
        Value::Float(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::Bytes(b) => !b.is_empty(),
        Value::List(items) => !items.borrow().is_empty(),
        Value::Tuple(items) => !items.is_empty(),
        Value::Dict(dict) => !dict.borrow().is_empty(),
        Value::Set(set) => !set.borrow().is_empty(),
        Value::FrozenSet(set) => !set.is_empty(),
        Value::Range(range) => !range.is_empty(),
        Value::Instance(_) => {
            if let Some(result) = class::call_dunder(value, "__bool__", Vec::new())? {
                return match result {
                    Value::Bool(b) => Ok(b),
                    other => Err(ExcType::type_error(format!(
                        "__bool__ should return bool, returned {}",
                        other.type_name()
                    ))),
                };
            }
            if class::has_dunder(value, "__len__") {
                return Ok(len(value)? != 0);
            }
            true
        }
        _ => true,
    })
}

/// `len(value)`.
pub(crate) fn len(value: &Value) -> RunResult<usize> {
    Ok(match value {
        Value::Str(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(dict) => dict.borrow().len(),
        Value::Set(set) => set.borrow().len(),
        Value::FrozenSet(set) => set.len(),
        Value::Range(range) => range.len(),
        Value::Instance(_) => match class::call_dunder(value, "__len__", Vec::new())? {
            Some(result) => {
                let n = result.as_int().ok_or_else(|| {
                    ExcType::type_error(format!("'{}' object cannot be interpreted as an integer", result.type_name()))
                })?;
                return usize::try_from(n).map_err(|_| ExcType::ValueError.error("__len__() should return >= 0"));
            }
            None => return Err(no_len(value)),
        },
        other => return Err(no_len(other)),
    })
}

fn no_len(value: &Value) -> RunError {
    ExcType::type_error(format!("object of type '{}' has no len()", value.type_name()))
}

/// Hash of a `str`, stable for the life of the process.
pub(crate) fn hash_str(s: &str) -> u64 {
    RandomState::with_seeds(0x243F, 0x6A88, 0x85A3, 0x08D3).hash_one(s)
}

fn combine(seed: u64, hash: u64) -> u64 {
    (seed ^ hash).wrapping_mul(1_000_003).rotate_left(5)
}

/// `hash(value)`.
pub(crate) fn hash(value: &Value) -> RunResult<u64> {
    if let Some(h) = numeric::hash(value) {
        return Ok(h);
    }
    Ok(match value {
        Value::None => NONE_HASH,
        Value::Str(s) => hash_str(s),
        Value::Bytes(b) => RandomState::with_seeds(0x243F, 0x6A88, 0x85A3, 0x08D3).hash_one(&**b),
        Value::Tuple(items) => {
            let mut h = TUPLE_SEED;
            for item in items.iter() {
                h = combine(h, hash(item)?);
            }
            h
        }
        Value::FrozenSet(set) => set.iter().fold(TUPLE_SEED, |acc, key| acc ^ key_hash(key)),
        Value::Range(range) => combine(combine(hash_int(range.start), hash_int(range.stop)), hash_int(range.step)),
        Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Slice(_) => {
            return Err(ExcType::unhashable(&value.type_name()));
        }
        Value::Instance(_) => {
            if let Some(class) = class::user_class(value) {
                match class.lookup("__hash__") {
                    Some(Value::None) => return Err(ExcType::unhashable(&value.type_name())),
                    Some(_) => {
                        let result = class::call_dunder(value, "__hash__", Vec::new())?.unwrap_or(Value::None);
                        return match result {
                            Value::Int(_) | Value::Bool(_) | Value::Long(_) => numeric::hash(&result)
                                .ok_or_else(|| RunError::internal("integer without a numeric hash")),
                            _ => Err(ExcType::type_error("__hash__ method should return an integer")),
                        };
                    }
                    None if class.lookup("__eq__").is_some() => {
                        return Err(ExcType::unhashable(&value.type_name()));
                    }
                    None => {}
                }
            }
            value.identity() as u64
        }
        other => other.identity() as u64,
    })
}

fn hash_int(i: i64) -> u64 {
    numeric::hash_int(i)
}

fn key_hash(key: &HashKey) -> u64 {
    // HashKey hashes as its precomputed u64.
    RandomState::with_seeds(1, 2, 3, 4).hash_one(key)
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// `a == b` as a Rust bool.
pub(crate) fn eq(a: &Value, b: &Value) -> RunResult<bool> {
    if a.is(b) && !matches!(a, Value::Float(_)) {
        return Ok(true);
    }
    compare_bool(CompareOp::Eq, a, b)
}

/// The truth of `a <op> b`.
pub(crate) fn compare_bool(op: CompareOp, a: &Value, b: &Value) -> RunResult<bool> {
    match compare(op, a, b)? {
        Value::Bool(result) => Ok(result),
        other => truthy(&other),
    }
}

/// Rich comparison with reflection and the identity fallback for `==`/`!=`.
pub(crate) fn compare(op: CompareOp, a: &Value, b: &Value) -> RunResult<Value> {
    if let Some(result) = native_compare(op, a, b)? {
        return Ok(Value::Bool(result));
    }
    let reflected_first = is_strict_subclass_instance(b, a);
    if reflected_first && let Some(result) = try_compare_dunder(b, op.reflected(), a)? {
        return Ok(result);
    }
    if let Some(result) = try_compare_dunder(a, op, b)? {
        return Ok(result);
    }
    if !reflected_first && let Some(result) = try_compare_dunder(b, op.reflected(), a)? {
        return Ok(result);
    }
    if op == CompareOp::Ne {
        if let Some(result) = try_compare_dunder(a, CompareOp::Eq, b)? {
            return Ok(Value::Bool(!truthy(&result)?));
        }
    }
    match op {
        CompareOp::Eq => Ok(Value::Bool(a.is(b))),
        CompareOp::Ne => Ok(Value::Bool(!a.is(b))),
        _ => Err(ExcType::compare_type_error(op.symbol(), &a.type_name(), &b.type_name())),
    }
}

fn try_compare_dunder(receiver: &Value, op: CompareOp, other: &Value) -> RunResult<Option<Value>> {
    match class::call_dunder(receiver, op.dunder(), vec![other.clone()])? {
        Some(Value::NotImplemented) | None => Ok(None),
        Some(result) => Ok(Some(result)),
    }
}

/// Guarded comparison of builtin operands.
pub(crate) fn compare_direct(op: CompareOp, kinds: OperandKinds, a: &Value, b: &Value) -> RunResult<Value> {
    if kinds_match(kinds, a, b) {
        if let Some(result) = native_compare(op, a, b)? {
            return Ok(Value::Bool(result));
        }
    }
    compare(op, a, b)
}

fn ordering_holds(op: CompareOp, ordering: Option<Ordering>) -> bool {
    match ordering {
        Some(ordering) => op.holds(ordering),
        None => op == CompareOp::Ne,
    }
}

/// Comparison between builtin values; `None` when neither side is builtin
/// comparable with the other.
fn native_compare(op: CompareOp, a: &Value, b: &Value) -> RunResult<Option<bool>> {
    if let Some(ordering) = numeric::compare(a, b) {
        return Ok(Some(ordering_holds(op, ordering)));
    }
    let equality = matches!(op, CompareOp::Eq | CompareOp::Ne);
    let result = match (a, b) {
        (Value::Str(x), Value::Str(y)) => op.holds(x.cmp(y)),
        (Value::Bytes(x), Value::Bytes(y)) => op.holds(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            sequence_compare(op, &x, &y)?
        }
        (Value::Tuple(x), Value::Tuple(y)) => sequence_compare(op, x, y)?,
        (Value::Dict(x), Value::Dict(y)) if equality => {
            let same = dict_eq(&x.borrow(), &y.borrow())?;
            same == (op == CompareOp::Eq)
        }
        (Value::Set(_) | Value::FrozenSet(_), Value::Set(_) | Value::FrozenSet(_)) => {
            let (x, y) = (set_snapshot(a), set_snapshot(b));
            match op {
                CompareOp::Eq => x.len() == y.len() && x.is_subset(&y),
                CompareOp::Ne => !(x.len() == y.len() && x.is_subset(&y)),
                CompareOp::Le => x.is_subset(&y),
                CompareOp::Lt => x.len() < y.len() && x.is_subset(&y),
                CompareOp::Ge => y.is_subset(&x),
                CompareOp::Gt => y.len() < x.len() && y.is_subset(&x),
            }
        }
        (Value::Range(x), Value::Range(y)) if equality => range_eq(*x, *y) == (op == CompareOp::Eq),
        (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) if equality => op == CompareOp::Eq,
        (Value::ExcClass(x), Value::ExcClass(y)) if equality => (x == y) == (op == CompareOp::Eq),
        (Value::Builtin(x), Value::Builtin(y)) if equality => (x == y) == (op == CompareOp::Eq),
        (Value::BoundMethod(x), Value::BoundMethod(y)) if equality => {
            let same = Rc::ptr_eq(x.function(), y.function()) && x.receiver().is(y.receiver());
            same == (op == CompareOp::Eq)
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

fn sequence_compare(op: CompareOp, x: &[Value], y: &[Value]) -> RunResult<bool> {
    for (left, right) in x.iter().zip(y) {
        if !eq(left, right)? {
            return match op {
                CompareOp::Eq => Ok(false),
                CompareOp::Ne => Ok(true),
                _ => compare_bool(op, left, right),
            };
        }
    }
    Ok(op.holds(x.len().cmp(&y.len())))
}

fn dict_eq(x: &Dict, y: &Dict) -> RunResult<bool> {
    if x.len() != y.len() {
        return Ok(false);
    }
    for (key, value) in x {
        match y.get(key) {
            Some(other) if eq(value, other)? => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn range_eq(x: RangeValue, y: RangeValue) -> bool {
    let len = x.len();
    len == y.len() && (len == 0 || (x.start == y.start && (len == 1 || x.step == y.step)))
}

fn set_snapshot(value: &Value) -> Set {
    match value {
        Value::Set(set) => set.borrow().clone(),
        Value::FrozenSet(set) => (**set).clone(),
        _ => Set::default(),
    }
}

fn is_strict_subclass_instance(candidate: &Value, of: &Value) -> bool {
    match (class::user_class(candidate), class::user_class(of)) {
        (Some(sub), Some(base)) => !Rc::ptr_eq(sub, base) && sub.is_subclass_of(base),
        _ => false,
    }
}

fn same_type(a: &Value, b: &Value) -> bool {
    match (class::user_class(a), class::user_class(b)) {
        (Some(x), Some(y)) => Rc::ptr_eq(x, y),
        (None, None) => std::mem::discriminant(a) == std::mem::discriminant(b),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Binary and unary operators
// ---------------------------------------------------------------------------

/// True if the operands satisfy a direct op's guard. `bool` passes for
/// `int` operands since it is a subclass.
fn kinds_match(kinds: OperandKinds, a: &Value, b: &Value) -> bool {
    let int = |v: &Value| matches!(v, Value::Int(_) | Value::Long(_) | Value::Bool(_));
    let float = |v: &Value| matches!(v, Value::Float(_));
    let str = |v: &Value| matches!(v, Value::Str(_));
    let list = |v: &Value| matches!(v, Value::List(_));
    let tuple = |v: &Value| matches!(v, Value::Tuple(_));
    let slice = |v: &Value| matches!(v, Value::Slice(_));
    match kinds {
        OperandKinds::IntInt => int(a) && int(b),
        OperandKinds::IntFloat => int(a) && float(b),
        OperandKinds::FloatInt => float(a) && int(b),
        OperandKinds::FloatFloat => float(a) && float(b),
        OperandKinds::BoolBool => matches!((a, b), (Value::Bool(_), Value::Bool(_))),
        OperandKinds::StrStr => str(a) && str(b),
        OperandKinds::StrInt => str(a) && int(b),
        OperandKinds::IntStr => int(a) && str(b),
        OperandKinds::ListList => list(a) && list(b),
        OperandKinds::ListInt => list(a) && int(b),
        OperandKinds::IntList => int(a) && list(b),
        OperandKinds::TupleTuple => tuple(a) && tuple(b),
        OperandKinds::TupleInt => tuple(a) && int(b),
        OperandKinds::IntTuple => int(a) && tuple(b),
        OperandKinds::StrSlice => str(a) && slice(b),
        OperandKinds::ListSlice => list(a) && slice(b),
        OperandKinds::TupleSlice => tuple(a) && slice(b),
        OperandKinds::Int => int(a),
        OperandKinds::Float => float(a),
    }
}

/// `lhs <op> rhs`, or its in-place form.
pub(crate) fn binary(op: BinaryOp, inplace: bool, lhs: &Value, rhs: &Value) -> RunResult<Value> {
    if inplace {
        if let Some(result) = native_inplace(op, lhs, rhs)? {
            return Ok(result);
        }
        match class::call_dunder(lhs, op.inplace_dunder(), vec![rhs.clone()])? {
            Some(Value::NotImplemented) | None => {}
            Some(result) => return Ok(result),
        }
    }
    if let Some(result) = native_binary(op, lhs, rhs) {
        return result;
    }
    user_binary(op, inplace, lhs, rhs, true)
}

/// Forward and reflected dunders of user operands.
fn user_binary(op: BinaryOp, inplace: bool, lhs: &Value, rhs: &Value, try_forward: bool) -> RunResult<Value> {
    let try_reflected = !same_type(lhs, rhs);
    let reflected_first = try_reflected && is_strict_subclass_instance(rhs, lhs);
    if reflected_first && let Some(result) = try_binary_dunder(rhs, op.reflected_dunder(), lhs)? {
        return Ok(result);
    }
    if try_forward && let Some(result) = try_binary_dunder(lhs, op.dunder(), rhs)? {
        return Ok(result);
    }
    if try_reflected && !reflected_first && let Some(result) = try_binary_dunder(rhs, op.reflected_dunder(), lhs)? {
        return Ok(result);
    }
    let symbol = if inplace { op.inplace_symbol() } else { op.symbol() };
    Err(ExcType::binary_type_error(symbol, &lhs.type_name(), &rhs.type_name()))
}

fn try_binary_dunder(receiver: &Value, dunder: &str, other: &Value) -> RunResult<Option<Value>> {
    match class::call_dunder(receiver, dunder, vec![other.clone()])? {
        Some(Value::NotImplemented) | None => Ok(None),
        Some(result) => Ok(Some(result)),
    }
}

/// Guarded builtin arithmetic; a guard miss takes the dynamic path.
pub(crate) fn binary_direct(
    op: BinaryOp,
    kinds: OperandKinds,
    inplace: bool,
    lhs: &Value,
    rhs: &Value,
) -> RunResult<Value> {
    if kinds_match(kinds, lhs, rhs) && !(inplace && kinds.aliases_list()) {
        if let Some(result) = native_binary(op, lhs, rhs) {
            return result;
        }
    }
    binary(op, inplace, lhs, rhs)
}

/// Calls the dunder resolved at translation time. When the operand no
/// longer defines it the site behaves like a dynamic one.
pub(crate) fn binary_method(
    op: BinaryOp,
    inplace: bool,
    reflected: bool,
    lhs: &Value,
    rhs: &Value,
) -> RunResult<Value> {
    if reflected {
        if !class::has_dunder(lhs, op.dunder()) && class::has_dunder(rhs, op.reflected_dunder()) {
            if let Some(result) = try_binary_dunder(rhs, op.reflected_dunder(), lhs)? {
                return Ok(result);
            }
            let symbol = if inplace { op.inplace_symbol() } else { op.symbol() };
            return Err(ExcType::binary_type_error(symbol, &lhs.type_name(), &rhs.type_name()));
        }
        return binary(op, inplace, lhs, rhs);
    }
    if inplace && class::has_dunder(lhs, op.inplace_dunder()) {
        return binary(op, inplace, lhs, rhs);
    }
    if class::has_dunder(lhs, op.dunder()) && !is_strict_subclass_instance(rhs, lhs) {
        if let Some(result) = try_binary_dunder(lhs, op.dunder(), rhs)? {
            return Ok(result);
        }
        return user_binary(op, inplace, lhs, rhs, false);
    }
    binary(op, inplace, lhs, rhs)
}

fn repeat_count(value: &Value) -> Option<RunResult<usize>> {
    match value {
        Value::Int(_) | Value::Bool(_) => value.as_int().map(|n| Ok(usize::try_from(n).unwrap_or(0))),
        Value::Long(_) => Some(Err(ExcType::OverflowError.error("cannot fit 'int' into an index-sized integer"))),
        _ => None,
    }
}

fn repeat<T: Clone>(items: &[T], count: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len().saturating_mul(count));
    for _ in 0..count {
        out.extend_from_slice(items);
    }
    out
}

/// Builtin binary semantics, `None` when no builtin rule applies.
fn native_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<RunResult<Value>> {
    if let Some(result) = numeric::binary(op, lhs, rhs) {
        return Some(result);
    }
    let result = match (op, lhs, rhs) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::from(format!("{a}{b}"))),
        (BinaryOp::Add, Value::Bytes(a), Value::Bytes(b)) => Ok(Value::Bytes([&**a, &**b].concat().into())),
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinaryOp::Add, Value::Tuple(a), Value::Tuple(b)) => Ok(Value::tuple([&**a, &**b].concat())),
        (BinaryOp::Mul, Value::Str(s), n) | (BinaryOp::Mul, n, Value::Str(s)) => {
            let count = repeat_count(n)?;
            count.map(|count| Value::from(s.repeat(count)))
        }
        (BinaryOp::Mul, Value::List(items), n) | (BinaryOp::Mul, n, Value::List(items)) => {
            let count = repeat_count(n)?;
            count.map(|count| Value::list(repeat(&items.borrow(), count)))
        }
        (BinaryOp::Mul, Value::Tuple(items), n) | (BinaryOp::Mul, n, Value::Tuple(items)) => {
            let count = repeat_count(n)?;
            count.map(|count| Value::tuple(repeat(items, count)))
        }
        (BinaryOp::Mod, Value::Str(template), args) => repr::percent_format(template, args).map(Value::from),
        (BinaryOp::Or | BinaryOp::And | BinaryOp::Sub | BinaryOp::Xor, Value::Set(_) | Value::FrozenSet(_), _)
            if matches!(rhs, Value::Set(_) | Value::FrozenSet(_)) =>
        {
            let result = set_op(op, &set_snapshot(lhs), &set_snapshot(rhs));
            Ok(match lhs {
                Value::FrozenSet(_) => Value::FrozenSet(Rc::new(result)),
                _ => Value::set(result),
            })
        }
        (BinaryOp::Or, Value::Dict(a), Value::Dict(b)) => {
            let mut merged = a.borrow().clone();
            for (key, value) in b.borrow().iter() {
                merged.insert(key.clone(), value.clone());
            }
            Ok(Value::dict(merged))
        }
        _ => return None,
    };
    Some(result)
}

fn set_op(op: BinaryOp, a: &Set, b: &Set) -> Set {
    match op {
        BinaryOp::Or => a.union(b).cloned().collect(),
        BinaryOp::And => a.intersection(b).cloned().collect(),
        BinaryOp::Sub => a.difference(b).cloned().collect(),
        _ => a.symmetric_difference(b).cloned().collect(),
    }
}

/// In-place mutation of builtin containers.
fn native_inplace(op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    match (op, lhs) {
        (BinaryOp::Add, Value::List(items)) => {
            let extra = iter::collect(rhs)?;
            items.borrow_mut().extend(extra);
        }
        (BinaryOp::Mul, Value::List(items)) => {
            let Some(count) = repeat_count(rhs) else {
                return Ok(None);
            };
            let count = count?;
            let repeated = repeat(&items.borrow(), count);
            *items.borrow_mut() = repeated;
        }
        (BinaryOp::Or | BinaryOp::And | BinaryOp::Sub | BinaryOp::Xor, Value::Set(set))
            if matches!(rhs, Value::Set(_) | Value::FrozenSet(_)) =>
        {
            let result = set_op(op, &set.borrow(), &set_snapshot(rhs));
            *set.borrow_mut() = result;
        }
        (BinaryOp::Or, Value::Dict(dict)) => {
            update_dict(dict, rhs)?;
        }
        _ => return Ok(None),
    }
    Ok(Some(lhs.clone()))
}

/// `dict.update(other)` for a mapping or an iterable of pairs.
pub(crate) fn update_dict(dict: &std::cell::RefCell<Dict>, other: &Value) -> RunResult<()> {
    if let Value::Dict(source) = other {
        let entries: Vec<_> = source.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        dict.borrow_mut().extend(entries);
        return Ok(());
    }
    for (index, item) in iter::collect(other)?.into_iter().enumerate() {
        let pair = iter::collect(&item).map_err(|_| {
            ExcType::type_error(format!(
                "cannot convert dictionary update sequence element #{index} to a sequence"
            ))
        })?;
        let [key, value] = <[Value; 2]>::try_from(pair).map_err(|pair| {
            ExcType::ValueError.error(format!(
                "dictionary update sequence element #{index} has length {}; 2 is required",
                pair.len()
            ))
        })?;
        dict.borrow_mut().insert(HashKey::new(key)?, value);
    }
    Ok(())
}

/// `<op> value`.
pub(crate) fn unary(op: UnaryOp, value: &Value) -> RunResult<Value> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!truthy(value)?));
    }
    if let Some(result) = numeric::unary(op, value) {
        return result;
    }
    if let Some(dunder) = op.dunder()
        && let Some(result) = class::call_dunder(value, dunder, Vec::new())?
    {
        return Ok(result);
    }
    Err(ExcType::unary_type_error(op.symbol(), &value.type_name()))
}

pub(crate) fn unary_direct(op: UnaryOp, kinds: OperandKinds, value: &Value) -> RunResult<Value> {
    if kinds_match(kinds, value, &Value::Null) {
        if let Some(result) = numeric::unary(op, value) {
            return result;
        }
    }
    unary(op, value)
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

/// `item in container`.
pub(crate) fn contains(container: &Value, item: &Value) -> RunResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(&**needle)),
            other => Err(ExcType::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Bytes(b) => match item.as_int() {
            Some(byte) => Ok(b.iter().any(|&x| i64::from(x) == byte)),
            None => Err(ExcType::type_error("a bytes-like object is required")),
        },
        Value::List(items) => {
            let items = items.borrow().clone();
            any_eq(&items, item)
        }
        Value::Tuple(items) => any_eq(items, item),
        Value::Dict(dict) => {
            let key = HashKey::new(item.clone())?;
            Ok(dict.borrow().contains_key(&key))
        }
        Value::Set(set) => {
            let key = HashKey::new(item.clone())?;
            Ok(set.borrow().contains(&key))
        }
        Value::FrozenSet(set) => Ok(set.contains(&HashKey::new(item.clone())?)),
        Value::Range(range) => match item {
            Value::Int(_) | Value::Bool(_) => Ok(item.as_int().is_some_and(|i| range.contains(i))),
            other => {
                let items: Vec<Value> = (0..range.len()).filter_map(|i| range.get(i)).map(Value::Int).collect();
                any_eq(&items, other)
            }
        },
        Value::Instance(_) if class::has_dunder(container, "__contains__") => {
            let result = class::call_dunder(container, "__contains__", vec![item.clone()])?.unwrap_or(Value::None);
            truthy(&result)
        }
        Value::Instance(_) | Value::Iterator(_) | Value::Generator(_) => {
            let iterator = iter::get_iter(container)?;
            while let Some(candidate) = iter::next(&iterator)? {
                if candidate.is(item) || eq(&candidate, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(ExcType::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn any_eq(items: &[Value], item: &Value) -> RunResult<bool> {
    for candidate in items {
        if candidate.is(item) || eq(candidate, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

enum Index {
    At(usize),
    OutOfRange,
    Slice(Rc<SliceValue>),
}

/// Resolves a subscript against a sequence of `len` items.
fn sequence_index(container: &str, key: &Value, len: usize) -> RunResult<Index> {
    match key {
        Value::Int(_) | Value::Bool(_) => {
            let i = key.as_int().unwrap_or_default();
            let len = i64::try_from(len).unwrap_or(i64::MAX);
            let i = if i < 0 { i + len } else { i };
            Ok(if (0..len).contains(&i) {
                Index::At(usize::try_from(i).unwrap_or_default())
            } else {
                Index::OutOfRange
            })
        }
        Value::Long(_) => Err(ExcType::IndexError.error("cannot fit 'int' into an index-sized integer")),
        Value::Slice(slice) => Ok(Index::Slice(slice.clone())),
        Value::Instance(_) if class::has_dunder(key, "__index__") => {
            let index = class::call_dunder(key, "__index__", Vec::new())?.unwrap_or(Value::None);
            sequence_index(container, &index, len)
        }
        other => Err(ExcType::type_error(match container {
            "str" => format!("string indices must be integers, not '{}'", other.type_name()),
            _ => format!("{container} indices must be integers or slices, not {}", other.type_name()),
        })),
    }
}

/// `container[key]`.
pub(crate) fn get_item(container: &Value, key: &Value) -> RunResult<Value> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            match sequence_index("list", key, items.len())? {
                Index::At(i) => Ok(items[i].clone()),
                Index::OutOfRange => Err(ExcType::index_out_of_range("list")),
                Index::Slice(slice) => Ok(Value::list(select(&items, &slice)?)),
            }
        }
        Value::Tuple(items) => match sequence_index("tuple", key, items.len())? {
            Index::At(i) => Ok(items[i].clone()),
            Index::OutOfRange => Err(ExcType::index_out_of_range("tuple")),
            Index::Slice(slice) => Ok(Value::tuple(select(items, &slice)?)),
        },
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            match sequence_index("str", key, chars.len())? {
                Index::At(i) => Ok(Value::from(chars[i].to_string())),
                Index::OutOfRange => Err(ExcType::IndexError.error("string index out of range")),
                Index::Slice(slice) => Ok(Value::from(select(&chars, &slice)?.into_iter().collect::<String>())),
            }
        }
        Value::Bytes(b) => match sequence_index("byte", key, b.len())? {
            Index::At(i) => Ok(Value::Int(i64::from(b[i]))),
            Index::OutOfRange => Err(ExcType::IndexError.error("index out of range")),
            Index::Slice(slice) => Ok(Value::Bytes(select(b, &slice)?.into())),
        },
        Value::Range(range) => match sequence_index("range", key, range.len())? {
            Index::At(i) => range.get(i).map(Value::Int).ok_or_else(|| ExcType::index_out_of_range("range")),
            Index::OutOfRange => Err(ExcType::IndexError.error("range object index out of range")),
            Index::Slice(slice) => {
                let (start, stop, step) = slice.indices(range.len())?;
                Ok(Value::Range(RangeValue {
                    start: range.start + start * range.step,
                    stop: range.start + stop * range.step,
                    step: range.step * step,
                }))
            }
        },
        Value::Dict(dict) => {
            let hash_key = HashKey::new(key.clone())?;
            let found = dict.borrow().get(&hash_key).cloned();
            found.ok_or_else(|| ExcType::key_error(key.clone()))
        }
        Value::Instance(_) => match class::call_dunder(container, "__getitem__", vec![key.clone()])? {
            Some(result) => Ok(result),
            None => Err(ExcType::not_subscriptable(&container.type_name())),
        },
        other => Err(ExcType::not_subscriptable(&other.type_name())),
    }
}

fn select<T: Clone>(items: &[T], slice: &SliceValue) -> RunResult<Vec<T>> {
    Ok(slice.positions(items.len())?.into_iter().map(|i| items[i].clone()).collect())
}

/// `container[key] = value`.
pub(crate) fn set_item(container: &Value, key: &Value, value: Value) -> RunResult<()> {
    match container {
        Value::List(items) => {
            let len = items.borrow().len();
            match sequence_index("list", key, len)? {
                Index::At(i) => items.borrow_mut()[i] = value,
                Index::OutOfRange => {
                    return Err(ExcType::IndexError.error("list assignment index out of range"));
                }
                Index::Slice(slice) => {
                    let replacement = iter::collect(&value)?;
                    assign_slice(&mut items.borrow_mut(), &slice, replacement)?;
                }
            }
            Ok(())
        }
        Value::Dict(dict) => {
            let key = HashKey::new(key.clone())?;
            dict.borrow_mut().insert(key, value);
            Ok(())
        }
        Value::Instance(_) if class::has_dunder(container, "__setitem__") => {
            class::call_dunder(container, "__setitem__", vec![key.clone(), value])?;
            Ok(())
        }
        other => Err(ExcType::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn assign_slice(items: &mut Vec<Value>, slice: &SliceValue, replacement: Vec<Value>) -> RunResult<()> {
    let (start, stop, step) = slice.indices(items.len())?;
    if step == 1 {
        let start = usize::try_from(start).unwrap_or_default();
        let stop = usize::try_from(stop).unwrap_or_default().max(start);
        items.splice(start..stop, replacement);
        return Ok(());
    }
    let positions = slice.positions(items.len())?;
    if positions.len() != replacement.len() {
        return Err(ExcType::ValueError.error(format!(
            "attempt to assign sequence of size {} to extended slice of size {}",
            replacement.len(),
            positions.len()
        )));
    }
    for (position, value) in positions.into_iter().zip(replacement) {
        items[position] = value;
    }
    Ok(())
}

/// `del container[key]`.
pub(crate) fn del_item(container: &Value, key: &Value) -> RunResult<()> {
    match container {
        Value::List(items) => {
            let len = items.borrow().len();
            match sequence_index("list", key, len)? {
                Index::At(i) => {
                    items.borrow_mut().remove(i);
                }
                Index::OutOfRange => {
                    return Err(ExcType::IndexError.error("list assignment index out of range"));
                }
                Index::Slice(slice) => {
                    let mut positions = slice.positions(len)?;
                    positions.sort_unstable();
                    let mut items = items.borrow_mut();
                    for position in positions.into_iter().rev() {
                        items.remove(position);
                    }
                }
            }
            Ok(())
        }
        Value::Dict(dict) => {
            let hash_key = HashKey::new(key.clone())?;
            match dict.borrow_mut().shift_remove(&hash_key) {
                Some(_) => Ok(()),
                None => Err(ExcType::key_error(key.clone())),
            }
        }
        Value::Instance(_) if class::has_dunder(container, "__delitem__") => {
            class::call_dunder(container, "__delitem__", vec![key.clone()])?;
            Ok(())
        }
        other => Err(ExcType::type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// `object.name`.
pub(crate) fn getattr(object: &Value, name: &str) -> RunResult<Value> {
    if let Some(attr) = class::instance_getattr(object, name)? {
        return Ok(attr);
    }
    let found = match object {
        Value::Exception(exc) => match name {
            "args" => Some(Value::tuple(exc.args())),
            "__class__" => Some(match exc.class() {
                Some(class) => Value::Class(class.clone()),
                None => Value::ExcClass(exc.exc_type()),
            }),
            "__cause__" | "__context__" => Some(exc.attr(name).unwrap_or(Value::None)),
            _ => exc.attr(name),
        },
        Value::Class(class) => {
            return class::class_getattr(class, name).ok_or_else(|| {
                ExcType::AttributeError.error(format!("type object '{}' has no attribute '{name}'", class.name()))
            });
        }
        Value::Module(module) => {
            return module.attr(name).ok_or_else(|| {
                ExcType::AttributeError.error(format!("module '{}' has no attribute '{name}'", module.name()))
            });
        }
        Value::Function(function) => match name {
            "__name__" => Some(Value::from(function.name())),
            "__qualname__" => Some(Value::from(function.qualname())),
            _ => None,
        },
        Value::ExcClass(kind) if name == "__name__" => Some(Value::from(<&'static str>::from(*kind))),
        Value::Builtin(builtin) if name == "__name__" => Some(Value::from(builtin.name())),
        Value::Slice(slice) => match name {
            "start" => Some(slice.start.clone()),
            "stop" => Some(slice.stop.clone()),
            "step" => Some(slice.step.clone()),
            _ => None,
        },
        Value::Range(range) => match name {
            "start" => Some(Value::Int(range.start)),
            "stop" => Some(Value::Int(range.stop)),
            "step" => Some(Value::Int(range.step)),
            _ => None,
        },
        _ => None,
    };
    if let Some(found) = found {
        return Ok(found);
    }
    if let Some(method) = methods::lookup(object, name) {
        return Ok(Value::BuiltinMethod(Rc::new(BuiltinMethod::new(object.clone(), method))));
    }
    Err(ExcType::attribute_error(&object.type_name(), name))
}

/// `object.name = value`.
pub(crate) fn setattr(object: &Value, name: &str, value: Value) -> RunResult<()> {
    if class::instance_setattr(object, name, value.clone()) {
        return Ok(());
    }
    match object {
        Value::Class(class) => {
            class.set_attr(name, value);
            Ok(())
        }
        Value::Module(module) => {
            module.set_attr(name, value);
            Ok(())
        }
        Value::Exception(exc) => {
            if name == "args" {
                exc.set_args(iter::collect(&value)?);
            } else {
                exc.set_attr(name, value);
            }
            Ok(())
        }
        other => Err(ExcType::attribute_error(&other.type_name(), name)),
    }
}

/// `del object.name`.
pub(crate) fn delattr(object: &Value, name: &str) -> RunResult<()> {
    match object {
        Value::Instance(_) | Value::Exception(_) => class::instance_delattr(object, name),
        Value::Class(class) => class::class_delattr(class, name),
        other => Err(ExcType::attribute_error(&other.type_name(), name)),
    }
}

/// Looks up and calls a method: `receiver.name(*args)`.
pub(crate) fn call_method(receiver: &Value, name: &str, args: Vec<Value>) -> RunResult<Value> {
    let method = getattr(receiver, name)?;
    call::call(&method, args, Vec::new())
}

// ---------------------------------------------------------------------------
// Exceptions
// ---------------------------------------------------------------------------

/// True if `exc` (an exception instance, or a class in the legacy layout)
/// is caught by an `except handler:` clause.
pub(crate) fn exception_matches(exc: &Value, handler: &Value) -> RunResult<bool> {
    match handler {
        Value::Tuple(handlers) => {
            for handler in handlers.iter() {
                if exception_matches(exc, handler)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::ExcClass(kind) => Ok(match exc {
            Value::Exception(e) => e.matches_builtin(*kind),
            Value::ExcClass(t) => t.is_subclass_of(*kind),
            Value::Class(c) => c.exc_base().is_some_and(|base| base.is_subclass_of(*kind)),
            _ => false,
        }),
        Value::Class(handler_class) if handler_class.exc_base().is_some() => Ok(match exc {
            Value::Exception(e) => e.matches_class(handler_class),
            Value::Class(c) => c.is_subclass_of(handler_class),
            _ => false,
        }),
        _ => Err(ExcType::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

/// The class of an exception value, as pushed by the legacy handler layout.
pub(crate) fn exception_class(exc: &Value) -> Value {
    match exc {
        Value::Exception(e) => match e.class() {
            Some(class) => Value::Class(class.clone()),
            None => Value::ExcClass(e.exc_type()),
        },
        _ => Value::None,
    }
}

/// Turns a raised value into an error: classes are instantiated, instances
/// are raised as is.
pub(crate) fn make_exception(value: &Value) -> RunResult<RunError> {
    let instance = match value {
        Value::ExcClass(_) | Value::Class(_) => call::call(value, Vec::new(), Vec::new())?,
        other => other.clone(),
    };
    match instance {
        Value::Exception(exc) => Ok(RunError::Exception(exc)),
        _ => Err(ExcType::type_error("exceptions must derive from BaseException")),
    }
}

/// Collects an iterable into a `Set`.
pub(crate) fn collect_set(iterable: &Value) -> RunResult<Set> {
    let mut set = Set::default();
    for item in iter::collect(iterable)? {
        set.insert(HashKey::new(item)?);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().copied().map(Value::Int).collect())
    }

    #[test]
    fn bool_operands_stay_bool_under_bitwise_ops() {
        let result = binary_direct(BinaryOp::And, OperandKinds::IntInt, false, &Value::Bool(true), &Value::Bool(true))
            .unwrap();
        assert!(matches!(result, Value::Bool(true)));
    }

    #[test]
    fn guard_miss_falls_back_to_dynamic_error() {
        let err = binary_direct(BinaryOp::Add, OperandKinds::IntInt, false, &Value::Int(1), &Value::from("a"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: unsupported operand type(s) for +: 'int' and 'str'"
        );
    }

    #[test]
    fn sequences_compare_lexicographically() {
        assert!(compare_bool(CompareOp::Lt, &ints(&[1, 2]), &ints(&[1, 3])).unwrap());
        assert!(compare_bool(CompareOp::Lt, &ints(&[1, 2]), &ints(&[1, 2, 0])).unwrap());
        assert!(eq(&ints(&[1, 2]), &ints(&[1, 2])).unwrap());
        let err = compare_bool(CompareOp::Lt, &Value::Int(1), &Value::from("x")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: '<' not supported between instances of 'int' and 'str'"
        );
    }

    #[test]
    fn equal_numbers_hash_equal() {
        assert_eq!(hash(&Value::Int(1)).unwrap(), hash(&Value::Float(1.0)).unwrap());
        assert_eq!(hash(&Value::Bool(true)).unwrap(), hash(&Value::Int(1)).unwrap());
        assert!(hash(&Value::list(vec![])).is_err());
    }

    #[test]
    fn negative_indices_and_slices() {
        let list = ints(&[1, 2, 3, 4]);
        assert_eq!(get_item(&list, &Value::Int(-1)).unwrap().as_int(), Some(4));
        let slice = Value::Slice(Rc::new(SliceValue {
            start: Value::Int(1),
            stop: Value::None,
            step: Value::Int(2),
        }));
        assert_eq!(py_ints(&get_item(&list, &slice).unwrap()), vec![2, 4]);
        let err = get_item(&list, &Value::Int(9)).unwrap_err();
        assert_eq!(err.to_string(), "IndexError: list index out of range");
    }

    fn py_ints(value: &Value) -> Vec<i64> {
        iter::collect(value).unwrap().iter().filter_map(Value::as_int).collect()
    }

    #[test]
    fn slice_assignment_resizes_lists() {
        let list = ints(&[1, 2, 3]);
        let slice = Value::Slice(Rc::new(SliceValue {
            start: Value::Int(1),
            stop: Value::Int(2),
            step: Value::None,
        }));
        set_item(&list, &slice, ints(&[7, 8, 9])).unwrap();
        assert_eq!(py_ints(&list), vec![1, 7, 8, 9, 3]);
    }

    #[test]
    fn list_inplace_add_mutates_the_original() {
        let list = ints(&[1]);
        let result = binary(BinaryOp::Add, true, &list, &Value::tuple(vec![Value::Int(2)])).unwrap();
        assert!(result.is(&list));
        assert_eq!(py_ints(&list), vec![1, 2]);
    }

    #[test]
    fn string_membership_requires_a_string() {
        assert!(contains(&Value::from("hello"), &Value::from("ell")).unwrap());
        let err = contains(&Value::from("hello"), &Value::Int(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: 'in <string>' requires string as left operand, not int"
        );
    }
}
