//! Builtin functions.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Num as _};

use super::{
    Kwargs,
    args::ArgValues,
    class, dispatch, iter, numeric, repr, write_output,
    iter::PyIterator,
    value::{Dict, RangeValue, Value},
};
use crate::{
    exception::{ExcType, RunError, RunResult},
    types::{BinaryOp, Builtin, CompareOp},
};

/// Calls `builtin` with already evaluated arguments.
pub(crate) fn call_builtin(builtin: Builtin, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
    let name = builtin.name();
    let args = ArgValues::new(args, kwargs);
    match builtin {
        Builtin::Abs => abs(&args.get_one_arg("abs")?),
        Builtin::Bool => Ok(Value::Bool(match args.get_zero_one_arg(name)? {
            Some(value) => dispatch::truthy(&value)?,
            None => false,
        })),
        Builtin::Dict => {
            let (positional, kwargs) = args.into_parts();
            if positional.len() > 1 {
                return Err(ExcType::type_error_at_most("dict", 1, positional.len()));
            }
            let dict = Value::dict(Dict::default());
            if let Value::Dict(inner) = &dict {
                if let Some(source) = positional.first() {
                    dispatch::update_dict(inner, source)?;
                }
                let mut inner = inner.borrow_mut();
                for (key, value) in kwargs {
                    inner.insert(super::HashKey::str(&key), value);
                }
            }
            Ok(dict)
        }
        Builtin::Enumerate => {
            let (positional, options) = args.with_kwargs_only("enumerate", &["start"])?;
            let mut positional = positional.into_iter();
            let Some(iterable) = positional.next() else {
                return Err(ExcType::type_error("enumerate() missing required argument 'iterable'"));
            };
            let start = match positional.next().or_else(|| options.into_iter().next().flatten()) {
                Some(start) => as_index(&start)?,
                None => 0,
            };
            Ok(PyIterator::enumerate(iter::get_iter(&iterable)?, start))
        }
        Builtin::Float => match args.get_zero_one_arg(name)? {
            Some(value) => to_float(&value),
            None => Ok(Value::Float(0.0)),
        },
        Builtin::Int => {
            let (value, base) = args.get_zero_one_two_args(name)?;
            match (value, base) {
                (None, _) => Ok(Value::Int(0)),
                (Some(value), None) => to_int(&value),
                (Some(value), Some(base)) => {
                    let Some(text) = value.as_str() else {
                        return Err(ExcType::type_error("int() can't convert non-string with explicit base"));
                    };
                    parse_int(text, u32::try_from(as_index(&base)?).unwrap_or(0))
                }
            }
        }
        Builtin::Isinstance => {
            let (object, classinfo) = args.get_two_args("isinstance")?;
            Ok(Value::Bool(isinstance(&object, &classinfo)?))
        }
        Builtin::Iter => iter::get_iter(&args.get_one_arg("iter")?),
        Builtin::Len => Ok(Value::from(dispatch::len(&args.get_one_arg("len")?)?)),
        Builtin::List => Ok(Value::list(match args.get_zero_one_arg(name)? {
            Some(iterable) => iter::collect(&iterable)?,
            None => Vec::new(),
        })),
        Builtin::Max => extreme(args, "max", Ordering::Greater),
        Builtin::Min => extreme(args, "min", Ordering::Less),
        Builtin::Next => {
            let (iterator, default) = args.get_one_two_args("next")?;
            if let Value::Generator(generator) = &iterator {
                return match (generator.next(), default) {
                    (Err(err), Some(default)) if err.is(ExcType::StopIteration) => Ok(default),
                    (result, _) => result,
                };
            }
            match (iter::next(&iterator)?, default) {
                (Some(item), _) => Ok(item),
                (None, Some(default)) => Ok(default),
                (None, None) => Err(ExcType::StopIteration.bare()),
            }
        }
        Builtin::Print => print(args),
        Builtin::Range => {
            let (a, b, c) = args.get_range("range", 1, 3)?;
            let range = match (a, b, c) {
                (Some(stop), None, None) => RangeValue { start: 0, stop: as_index(&stop)?, step: 1 },
                (Some(start), Some(stop), step) => {
                    let step = match step {
                        Some(step) => as_index(&step)?,
                        None => 1,
                    };
                    if step == 0 {
                        return Err(ExcType::ValueError.error("range() arg 3 must not be zero"));
                    }
                    RangeValue { start: as_index(&start)?, stop: as_index(&stop)?, step }
                }
                _ => return Err(ExcType::type_error_at_least("range", 1, 0)),
            };
            Ok(Value::Range(range))
        }
        Builtin::Repr => Ok(Value::from(repr::repr(&args.get_one_arg("repr")?)?)),
        Builtin::Reversed => reversed(&args.get_one_arg("reversed")?),
        Builtin::Set => Ok(Value::set(match args.get_zero_one_arg(name)? {
            Some(iterable) => dispatch::collect_set(&iterable)?,
            None => super::Set::default(),
        })),
        Builtin::Sorted => {
            let (positional, options) = args.with_kwargs_only("sorted", &["key", "reverse"])?;
            let [iterable] = <[Value; 1]>::try_from(positional)
                .map_err(|rest| ExcType::type_error_arg_count("sorted", 1, rest.len()))?;
            let mut options = options.into_iter();
            let key = options.next().flatten().filter(|key| !key.is_none());
            let reverse = match options.next().flatten() {
                Some(flag) => dispatch::truthy(&flag)?,
                None => false,
            };
            let mut items = iter::collect(&iterable)?;
            sort_values(&mut items, key.as_ref(), reverse)?;
            Ok(Value::list(items))
        }
        Builtin::Str => Ok(Value::from(match args.get_zero_one_arg(name)? {
            Some(value) => repr::to_str(&value)?,
            None => String::new(),
        })),
        Builtin::Sum => {
            let (positional, options) = args.with_kwargs_only("sum", &["start"])?;
            let mut positional = positional.into_iter();
            let Some(iterable) = positional.next() else {
                return Err(ExcType::type_error_at_least("sum", 1, 0));
            };
            let mut total = positional
                .next()
                .or_else(|| options.into_iter().next().flatten())
                .unwrap_or(Value::Int(0));
            if total.as_str().is_some() {
                return Err(ExcType::type_error("sum() can't sum strings [use ''.join(seq) instead]"));
            }
            let iterator = iter::get_iter(&iterable)?;
            while let Some(item) = iter::next(&iterator)? {
                total = dispatch::binary(BinaryOp::Add, false, &total, &item)?;
            }
            Ok(total)
        }
        Builtin::Tuple => Ok(Value::tuple(match args.get_zero_one_arg(name)? {
            Some(iterable) => iter::collect(&iterable)?,
            None => Vec::new(),
        })),
        Builtin::Type => type_of(&args.get_one_arg("type")?),
        Builtin::Zip => {
            let (positional, _) = args.with_kwargs_only("zip", &[])?;
            let iterators = positional.iter().map(iter::get_iter).collect::<RunResult<Vec<_>>>()?;
            Ok(PyIterator::zip(iterators))
        }
    }
}

fn as_index(value: &Value) -> RunResult<i64> {
    match value {
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Int(i) => Ok(*i),
        Value::Long(_) => Err(ExcType::OverflowError.error("Python int too large to convert to C ssize_t")),
        other => Err(ExcType::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            other.type_name()
        ))),
    }
}

fn abs(value: &Value) -> RunResult<Value> {
    if let Some(result) = numeric::abs(value) {
        return Ok(result);
    }
    match class::call_dunder(value, "__abs__", Vec::new())? {
        Some(result) => Ok(result),
        None => Err(ExcType::type_error(format!(
            "bad operand type for abs(): '{}'",
            value.type_name()
        ))),
    }
}

fn to_float(value: &Value) -> RunResult<Value> {
    if let Some(f) = numeric::to_f64(value)? {
        return Ok(Value::Float(f));
    }
    match value {
        Value::Str(s) => {
            let text = s.trim();
            let parsed = match text.to_ascii_lowercase().as_str() {
                "inf" | "+inf" | "infinity" | "+infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                "nan" | "+nan" | "-nan" => Some(f64::NAN),
                _ => text.replace('_', "").parse::<f64>().ok(),
            };
            parsed
                .map(Value::Float)
                .ok_or_else(|| ExcType::ValueError.error(format!("could not convert string to float: {}", repr::str_repr(s))))
        }
        other => match class::call_dunder(other, "__float__", Vec::new())? {
            Some(result) => Ok(result),
            None => Err(ExcType::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))),
        },
    }
}

fn to_int(value: &Value) -> RunResult<Value> {
    match value {
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Int(_) | Value::Long(_) => Ok(value.clone()),
        Value::Float(f) if f.is_nan() => Err(ExcType::ValueError.error("cannot convert float NaN to integer")),
        Value::Float(f) if f.is_infinite() => {
            Err(ExcType::OverflowError.error("cannot convert float infinity to integer"))
        }
        Value::Float(f) => BigInt::from_f64(f.trunc())
            .map(Value::from_bigint)
            .ok_or_else(|| RunError::internal("finite float did not convert")),
        Value::Str(s) => parse_int(s, 10),
        other => match class::call_dunder(other, "__int__", Vec::new())? {
            Some(result) => Ok(result),
            None => Err(ExcType::type_error(format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                other.type_name()
            ))),
        },
    }
}

/// `int(text, base)`; base 0 infers the base from a `0x`/`0o`/`0b` prefix.
fn parse_int(text: &str, base: u32) -> RunResult<Value> {
    let invalid = || ExcType::ValueError.error(format!("invalid literal for int() with base {base}: {}", repr::str_repr(text)));
    if base == 1 || base > 36 {
        return Err(ExcType::ValueError.error("int() base must be >= 2 and <= 36, or 0"));
    }
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = digits.to_ascii_lowercase();
    let (radix, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lower[2..]),
        (0 | 8, Some("0o")) => (8, &lower[2..]),
        (0 | 2, Some("0b")) => (2, &lower[2..]),
        (0, _) => (10, lower.as_str()),
        (base, _) => (base, lower.as_str()),
    };
    let digits = digits.strip_prefix('_').unwrap_or(digits);
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let parsed = BigInt::from_str_radix(&digits.replace('_', ""), radix).map_err(|_| invalid())?;
    Ok(Value::from_bigint(if negative { -parsed } else { parsed }))
}

/// `isinstance(object, classinfo)`, with tuples of classes.
fn isinstance(object: &Value, classinfo: &Value) -> RunResult<bool> {
    let result = match classinfo {
        Value::Tuple(options) => {
            for option in options.iter() {
                if isinstance(object, option)? {
                    return Ok(true);
                }
            }
            false
        }
        Value::Builtin(builtin) if builtin.is_type() => match builtin {
            Builtin::Bool => matches!(object, Value::Bool(_)),
            Builtin::Int => matches!(object, Value::Bool(_) | Value::Int(_) | Value::Long(_)),
            Builtin::Float => matches!(object, Value::Float(_)),
            Builtin::Str => matches!(object, Value::Str(_)),
            Builtin::List => matches!(object, Value::List(_)),
            Builtin::Tuple => matches!(object, Value::Tuple(_)),
            Builtin::Dict => matches!(object, Value::Dict(_)),
            Builtin::Set => matches!(object, Value::Set(_)),
            Builtin::Range => matches!(object, Value::Range(_)),
            Builtin::Type => matches!(object, Value::Class(_) | Value::ExcClass(_))
                || matches!(object, Value::Builtin(b) if b.is_type()),
            _ => false,
        },
        Value::ExcClass(kind) => matches!(object, Value::Exception(exc) if exc.matches_builtin(*kind)),
        Value::Class(class) => match object {
            Value::Instance(instance) => instance.class().is_subclass_of(class),
            Value::Exception(exc) => exc.matches_class(class),
            _ => false,
        },
        _ => {
            return Err(ExcType::type_error(
                "isinstance() arg 2 must be a type, a tuple of types, or a union",
            ));
        }
    };
    Ok(result)
}

fn type_of(value: &Value) -> RunResult<Value> {
    let builtin = match value {
        Value::Bool(_) => Builtin::Bool,
        Value::Int(_) | Value::Long(_) => Builtin::Int,
        Value::Float(_) => Builtin::Float,
        Value::Str(_) => Builtin::Str,
        Value::List(_) => Builtin::List,
        Value::Tuple(_) => Builtin::Tuple,
        Value::Dict(_) => Builtin::Dict,
        Value::Set(_) => Builtin::Set,
        Value::Range(_) => Builtin::Range,
        Value::Class(_) | Value::ExcClass(_) => Builtin::Type,
        Value::Builtin(b) if b.is_type() => Builtin::Type,
        Value::Instance(instance) => return Ok(Value::Class(instance.class().clone())),
        Value::Exception(_) => return Ok(dispatch::exception_class(value)),
        other => {
            return Err(ExcType::NotImplementedError.error(format!(
                "type() of '{}' objects is not supported",
                other.type_name()
            )));
        }
    };
    Ok(Value::Builtin(builtin))
}

fn reversed(value: &Value) -> RunResult<Value> {
    let items = match value {
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Range(_) | Value::Str(_) | Value::Dict(_) => iter::collect(value)?,
        Value::Instance(_) => {
            if let Some(result) = class::call_dunder(value, "__reversed__", Vec::new())? {
                return Ok(result);
            }
            return Err(not_reversible(value));
        }
        other => return Err(not_reversible(other)),
    };
    let kind = match value {
        Value::List(_) => "list_reverseiterator",
        Value::Range(_) => "range_iterator",
        Value::Dict(_) => "dict_reversekeyiterator",
        _ => "reversed",
    };
    Ok(PyIterator::snapshot(kind, items.into_iter().rev().collect()))
}

fn not_reversible(value: &Value) -> RunError {
    ExcType::type_error(format!("'{}' object is not reversible", value.type_name()))
}

/// `max()`/`min()`: either one iterable or several arguments, with
/// optional `key` and `default`.
fn extreme(args: ArgValues, name: &str, wanted: Ordering) -> RunResult<Value> {
    let (positional, options) = args.with_kwargs_only(name, &["key", "default"])?;
    let mut options = options.into_iter();
    let key = options.next().flatten().filter(|key| !key.is_none());
    let default = options.next().flatten();
    let items = match positional.len() {
        0 => return Err(ExcType::type_error_at_least(name, 1, 0)),
        1 => {
            let mut positional = positional;
            iter::collect(&positional.remove(0))?
        }
        _ if default.is_some() => {
            return Err(ExcType::type_error(format!(
                "Cannot specify a default for {name}() with multiple positional arguments"
            )));
        }
        _ => positional,
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let rank = match &key {
            Some(key) => super::call::call(key, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => {
                let op = if wanted == Ordering::Greater { CompareOp::Gt } else { CompareOp::Lt };
                dispatch::compare_bool(op, &rank, best_rank)?
            }
        };
        if replace {
            best = Some((rank, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ExcType::ValueError.error(format!("{name}() iterable argument is empty"))),
    }
}

fn print(args: ArgValues) -> RunResult<Value> {
    let (positional, options) = args.with_kwargs_only("print", &["sep", "end"])?;
    let mut options = options.into_iter();
    let separator = |value: Option<Value>, default: &str, what: &str| -> RunResult<String> {
        match value {
            None | Some(Value::None) => Ok(default.to_owned()),
            Some(Value::Str(s)) => Ok(s.to_string()),
            Some(other) => Err(ExcType::type_error(format!(
                "{what} must be None or a string, not {}",
                other.type_name()
            ))),
        }
    };
    let sep = separator(options.next().flatten(), " ", "sep")?;
    let end = separator(options.next().flatten(), "\n", "end")?;
    let mut line = String::new();
    for (index, value) in positional.iter().enumerate() {
        if index > 0 {
            line.push_str(&sep);
        }
        line.push_str(&repr::to_str(value)?);
    }
    line.push_str(&end);
    write_output(&line);
    Ok(Value::None)
}

/// Stable sort by `<`, as `sorted()` and `list.sort()` do. The first
/// comparison error aborts the sort.
pub(crate) fn sort_values(items: &mut Vec<Value>, key: Option<&Value>, reverse: bool) -> RunResult<()> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        let rank = match key {
            Some(key) => super::call::call(key, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        keyed.push((rank, item));
    }
    let mut failure: Option<RunError> = None;
    let mut less = |a: &Value, b: &Value| -> bool {
        if failure.is_some() {
            return false;
        }
        match dispatch::compare_bool(CompareOp::Lt, a, b) {
            Ok(result) => result,
            Err(err) => {
                failure = Some(err);
                false
            }
        }
    };
    // Reversing keeps equal elements in their original order.
    keyed.sort_by(|(a, _), (b, _)| {
        let (a, b) = if reverse { (b, a) } else { (a, b) };
        if less(a, b) {
            Ordering::Less
        } else if less(b, a) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    });
    items.extend(keyed.into_iter().map(|(_, item)| item));
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
