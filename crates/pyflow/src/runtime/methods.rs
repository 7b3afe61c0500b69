//! Methods of builtin types: `list.append`, `dict.get`, `str.join` and so on.

use std::{cell::RefCell, fmt, rc::Rc};

use super::{
    Kwargs,
    args::ArgValues,
    builtins, dispatch, iter, repr,
    value::{Dict, HashKey, Set, Value},
};
use crate::exception::{ExcType, RunError, RunResult};

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "clear", "copy", "reverse", "sort",
];
const TUPLE_METHODS: &[&str] = &["index", "count"];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "popitem", "setdefault", "update", "clear", "copy",
];
const SET_METHODS: &[&str] = &[
    "add", "remove", "discard", "pop", "clear", "copy", "update", "union", "intersection", "difference",
    "issubset", "issuperset",
];
const FROZENSET_METHODS: &[&str] = &["copy", "union", "intersection", "difference", "issubset", "issuperset"];
const STR_METHODS: &[&str] = &[
    "join", "split", "strip", "lstrip", "rstrip", "upper", "lower", "startswith", "endswith", "replace", "find",
    "index", "count", "format", "isdigit", "isalpha", "isspace",
];
const GENERATOR_METHODS: &[&str] = &["send", "throw", "close", "__next__"];
const ITERATOR_METHODS: &[&str] = &["__next__"];

/// A builtin method bound to its receiver, e.g. `[].append`.
pub struct BuiltinMethod {
    receiver: Value,
    name: &'static str,
}

impl BuiltinMethod {
    pub(crate) fn new(receiver: Value, name: &'static str) -> Self {
        Self { receiver, name }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }
}

impl fmt::Debug for BuiltinMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in method {} of {} object>", self.name, self.receiver.type_name())
    }
}

/// The static name of method `name` of `receiver`'s builtin type.
pub(crate) fn lookup(receiver: &Value, name: &str) -> Option<&'static str> {
    let table = match receiver {
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::FrozenSet(_) => FROZENSET_METHODS,
        Value::Str(_) => STR_METHODS,
        Value::Generator(_) => GENERATOR_METHODS,
        Value::Iterator(_) => ITERATOR_METHODS,
        _ => return None,
    };
    table.iter().copied().find(|method| *method == name)
}

pub(crate) fn call_method(method: &BuiltinMethod, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
    let qualname = format!("{}.{}", method.receiver.type_name(), method.name);
    let args = ArgValues::new(args, kwargs);
    match &method.receiver {
        Value::List(items) => list_method(items, method.name, &qualname, args),
        Value::Tuple(items) => sequence_method(items, method.name, &qualname, "tuple", args),
        Value::Dict(dict) => dict_method(dict, method.name, &qualname, args),
        Value::Set(set) => set_method(set, method.name, &qualname, args),
        Value::FrozenSet(set) => frozenset_method(set, method.name, &qualname, args),
        Value::Str(s) => str_method(s, method.name, &qualname, args),
        Value::Generator(generator) => match method.name {
            "__next__" => {
                args.check_zero_args(&qualname)?;
                generator.next()
            }
            "send" => generator.send(args.get_one_arg(&qualname)?),
            "throw" => {
                let (kind, value) = args.get_one_two_args(&qualname)?;
                let raised = match value {
                    Some(value) if !matches!(value, Value::Exception(_)) => {
                        super::call::call(&kind, vec![value], Vec::new())?
                    }
                    Some(value) => value,
                    None => kind,
                };
                generator.throw(dispatch::make_exception(&raised)?)
            }
            "close" => {
                args.check_zero_args(&qualname)?;
                generator.close()?;
                Ok(Value::None)
            }
            other => Err(unknown(method, other)),
        },
        Value::Iterator(_) => {
            args.check_zero_args(&qualname)?;
            iter::next(&method.receiver)?.ok_or_else(|| ExcType::StopIteration.bare())
        }
        _ => Err(unknown(method, method.name)),
    }
}

fn unknown(method: &BuiltinMethod, name: &str) -> RunError {
    ExcType::attribute_error(&method.receiver.type_name(), name)
}

/// Normalizes a possibly negative index against `len`, without clamping.
fn normalize_index(index: &Value, len: usize) -> RunResult<Option<usize>> {
    let Some(index) = index.as_int() else {
        return Err(ExcType::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            index.type_name()
        )));
    };
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let index = if index < 0 { index + len } else { index };
    Ok(usize::try_from(index).ok().filter(|i| i64::try_from(*i).is_ok_and(|i| i < len)))
}

fn position(items: &[Value], needle: &Value) -> RunResult<Option<usize>> {
    for (index, item) in items.iter().enumerate() {
        if dispatch::eq(item, needle)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn count(items: &[Value], needle: &Value) -> RunResult<Value> {
    let mut total = 0usize;
    for item in items {
        if dispatch::eq(item, needle)? {
            total += 1;
        }
    }
    Ok(Value::from(total))
}

fn sequence_method(items: &[Value], name: &str, qualname: &str, type_name: &str, args: ArgValues) -> RunResult<Value> {
    match name {
        "index" => {
            let needle = args.get_one_arg(qualname)?;
            position(items, &needle)?
                .map(Value::from)
                .ok_or_else(|| ExcType::ValueError.error(format!("{type_name}.index(x): x not in {type_name}")))
        }
        "count" => count(items, &args.get_one_arg(qualname)?),
        _ => Err(ExcType::attribute_error(type_name, name)),
    }
}

fn list_method(items: &Rc<RefCell<Vec<Value>>>, name: &str, qualname: &str, args: ArgValues) -> RunResult<Value> {
    match name {
        "append" => items.borrow_mut().push(args.get_one_arg(qualname)?),
        "extend" => {
            let extra = iter::collect(&args.get_one_arg(qualname)?)?;
            items.borrow_mut().extend(extra);
        }
        "insert" => {
            let (index, value) = args.get_two_args("insert")?;
            let len = items.borrow().len();
            let index = index.as_int().ok_or_else(|| ExcType::type_error("'index' must be an integer"))?;
            let signed_len = i64::try_from(len).unwrap_or(i64::MAX);
            let clamped = if index < 0 { (index + signed_len).max(0) } else { index.min(signed_len) };
            items.borrow_mut().insert(usize::try_from(clamped).unwrap_or(len), value);
        }
        "pop" => {
            let index = args.get_zero_one_arg("pop")?;
            let len = items.borrow().len();
            if len == 0 {
                return Err(ExcType::IndexError.error("pop from empty list"));
            }
            let position = match index {
                Some(index) => normalize_index(&index, len)?
                    .ok_or_else(|| ExcType::IndexError.error("pop index out of range"))?,
                None => len - 1,
            };
            return Ok(items.borrow_mut().remove(position));
        }
        "remove" => {
            let needle = args.get_one_arg(qualname)?;
            let snapshot = items.borrow().clone();
            let Some(index) = position(&snapshot, &needle)? else {
                return Err(ExcType::ValueError.error("list.remove(x): x not in list"));
            };
            items.borrow_mut().remove(index);
        }
        "index" | "count" => {
            let snapshot = items.borrow().clone();
            return sequence_method(&snapshot, name, qualname, "list", args);
        }
        "clear" => {
            args.check_zero_args(qualname)?;
            items.borrow_mut().clear();
        }
        "copy" => {
            args.check_zero_args(qualname)?;
            return Ok(Value::list(items.borrow().clone()));
        }
        "reverse" => {
            args.check_zero_args(qualname)?;
            items.borrow_mut().reverse();
        }
        "sort" => {
            let (positional, options) = args.with_kwargs_only("sort", &["key", "reverse"])?;
            if !positional.is_empty() {
                return Err(ExcType::type_error_no_args("sort", positional.len()));
            }
            let mut options = options.into_iter();
            let key = options.next().flatten().filter(|key| !key.is_none());
            let reverse = match options.next().flatten() {
                Some(flag) => dispatch::truthy(&flag)?,
                None => false,
            };
            let mut sorted = items.borrow().clone();
            builtins::sort_values(&mut sorted, key.as_ref(), reverse)?;
            *items.borrow_mut() = sorted;
        }
        _ => return Err(ExcType::attribute_error("list", name)),
    }
    Ok(Value::None)
}

fn dict_method(dict: &Rc<RefCell<Dict>>, name: &str, qualname: &str, args: ArgValues) -> RunResult<Value> {
    match name {
        "get" => {
            let (key, default) = args.get_one_two_args("get")?;
            let key = HashKey::new(key)?;
            Ok(dict.borrow().get(&key).cloned().or(default).unwrap_or(Value::None))
        }
        "keys" => {
            args.check_zero_args(qualname)?;
            Ok(Value::list(dict.borrow().keys().map(|k| k.value().clone()).collect()))
        }
        "values" => {
            args.check_zero_args(qualname)?;
            Ok(Value::list(dict.borrow().values().cloned().collect()))
        }
        "items" => {
            args.check_zero_args(qualname)?;
            Ok(Value::list(
                dict.borrow()
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.value().clone(), v.clone()]))
                    .collect(),
            ))
        }
        "pop" => {
            let (key, default) = args.get_one_two_args("pop")?;
            let hashed = HashKey::new(key.clone())?;
            let removed = dict.borrow_mut().shift_remove(&hashed);
            removed.or(default).ok_or_else(|| ExcType::key_error(key))
        }
        "popitem" => {
            args.check_zero_args(qualname)?;
            let (key, value) = dict
                .borrow_mut()
                .pop()
                .ok_or_else(|| ExcType::KeyError.error("popitem(): dictionary is empty"))?;
            Ok(Value::tuple(vec![key.into_value(), value]))
        }
        "setdefault" => {
            let (key, default) = args.get_one_two_args("setdefault")?;
            let key = HashKey::new(key)?;
            let mut dict = dict.borrow_mut();
            Ok(dict.entry(key).or_insert_with(|| default.unwrap_or(Value::None)).clone())
        }
        "update" => {
            let (positional, kwargs) = args.into_parts();
            if positional.len() > 1 {
                return Err(ExcType::type_error_at_most("update", 1, positional.len()));
            }
            if let Some(other) = positional.first() {
                dispatch::update_dict(dict, other)?;
            }
            let mut dict = dict.borrow_mut();
            for (key, value) in kwargs {
                dict.insert(HashKey::str(&key), value);
            }
            Ok(Value::None)
        }
        "clear" => {
            args.check_zero_args(qualname)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            args.check_zero_args(qualname)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        _ => Err(ExcType::attribute_error("dict", name)),
    }
}

/// `set.union(*others)` and friends, over a snapshot of the receiver.
fn set_algebra(set: &Set, name: &str, others: Vec<Value>) -> RunResult<Set> {
    let mut result = set.clone();
    for other in others {
        let other = dispatch::collect_set(&other)?;
        result = match name {
            "union" => result.union(&other).cloned().collect(),
            "intersection" => result.intersection(&other).cloned().collect(),
            _ => result.difference(&other).cloned().collect(),
        };
    }
    Ok(result)
}

fn frozenset_method(set: &Rc<Set>, name: &str, qualname: &str, args: ArgValues) -> RunResult<Value> {
    match name {
        "copy" => {
            args.check_zero_args(qualname)?;
            Ok(Value::FrozenSet(set.clone()))
        }
        "union" | "intersection" | "difference" => {
            let (others, _) = args.into_parts();
            Ok(Value::FrozenSet(Rc::new(set_algebra(set, name, others)?)))
        }
        "issubset" | "issuperset" => subset_check(set, name, args.get_one_arg(qualname)?),
        _ => Err(ExcType::attribute_error("frozenset", name)),
    }
}

fn subset_check(set: &Set, name: &str, other: Value) -> RunResult<Value> {
    let other = dispatch::collect_set(&other)?;
    Ok(Value::Bool(if name == "issubset" {
        set.is_subset(&other)
    } else {
        set.is_superset(&other)
    }))
}

fn set_method(set: &Rc<RefCell<Set>>, name: &str, qualname: &str, args: ArgValues) -> RunResult<Value> {
    match name {
        "add" => {
            let item = HashKey::new(args.get_one_arg(qualname)?)?;
            set.borrow_mut().insert(item);
        }
        "remove" => {
            let item = args.get_one_arg(qualname)?;
            let key = HashKey::new(item.clone())?;
            if !set.borrow_mut().shift_remove(&key) {
                return Err(ExcType::key_error(item));
            }
        }
        "discard" => {
            let key = HashKey::new(args.get_one_arg(qualname)?)?;
            set.borrow_mut().shift_remove(&key);
        }
        "pop" => {
            args.check_zero_args(qualname)?;
            let popped = set.borrow_mut().shift_remove_index(0);
            return popped
                .map(HashKey::into_value)
                .ok_or_else(|| ExcType::KeyError.error("pop from an empty set"));
        }
        "clear" => {
            args.check_zero_args(qualname)?;
            set.borrow_mut().clear();
        }
        "copy" => {
            args.check_zero_args(qualname)?;
            return Ok(Value::set(set.borrow().clone()));
        }
        "update" => {
            let (others, _) = args.into_parts();
            for other in others {
                let extra = dispatch::collect_set(&other)?;
                set.borrow_mut().extend(extra);
            }
        }
        "union" | "intersection" | "difference" => {
            let (others, _) = args.into_parts();
            let snapshot = set.borrow().clone();
            return Ok(Value::set(set_algebra(&snapshot, name, others)?));
        }
        "issubset" | "issuperset" => {
            let snapshot = set.borrow().clone();
            return subset_check(&snapshot, name, args.get_one_arg(qualname)?);
        }
        _ => return Err(ExcType::attribute_error("set", name)),
    }
    Ok(Value::None)
}

fn expect_str<'a>(value: &'a Value, what: &str) -> RunResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| ExcType::type_error(format!("{what} must be str, not {}", value.type_name())))
}

/// Affixes for `startswith`/`endswith`: a str or a tuple of str.
fn affixes(value: &Value, method: &str) -> RunResult<Vec<String>> {
    match value {
        Value::Str(s) => Ok(vec![s.to_string()]),
        Value::Tuple(items) => items
            .iter()
            .map(|item| expect_str(item, "tuple for startswith must only contain str, not").map(str::to_owned))
            .collect(),
        other => Err(ExcType::type_error(format!(
            "{method} first arg must be str or a tuple of str, not {}",
            other.type_name()
        ))),
    }
}

fn str_method(s: &str, name: &str, qualname: &str, args: ArgValues) -> RunResult<Value> {
    let value = match name {
        "join" => {
            let mut out = String::new();
            for (index, item) in iter::collect(&args.get_one_arg(qualname)?)?.iter().enumerate() {
                let Some(piece) = item.as_str() else {
                    return Err(ExcType::type_error(format!(
                        "sequence item {index}: expected str instance, {} found",
                        item.type_name()
                    )));
                };
                if index > 0 {
                    out.push_str(s);
                }
                out.push_str(piece);
            }
            Value::from(out)
        }
        "split" => {
            let (positional, options) = args.with_kwargs_only("split", &["sep", "maxsplit"])?;
            let mut positional = positional.into_iter();
            let mut options = options.into_iter();
            let sep = positional.next().or(options.next().flatten()).filter(|sep| !sep.is_none());
            let maxsplit = positional.next().or(options.next().flatten()).and_then(|m| m.as_int()).unwrap_or(-1);
            let limit = usize::try_from(maxsplit).ok().map(|m| m + 1);
            let parts: Vec<Value> = match &sep {
                Some(sep) => {
                    let sep = expect_str(sep, "sep")?;
                    if sep.is_empty() {
                        return Err(ExcType::ValueError.error("empty separator"));
                    }
                    match limit {
                        Some(limit) => s.splitn(limit, sep).map(Value::from).collect(),
                        None => s.split(sep).map(Value::from).collect(),
                    }
                }
                None => split_whitespace(s, limit).into_iter().map(Value::from).collect(),
            };
            Value::list(parts)
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars = args.get_zero_one_arg(qualname)?.filter(|c| !c.is_none());
            let chars: Option<Vec<char>> = match &chars {
                Some(chars) => Some(expect_str(chars, "strip arg")?.chars().collect()),
                None => None,
            };
            let matches = |c: char| chars.as_ref().map_or(c.is_whitespace(), |set| set.contains(&c));
            Value::from(match name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            })
        }
        "upper" => {
            args.check_zero_args(qualname)?;
            Value::from(s.to_uppercase())
        }
        "lower" => {
            args.check_zero_args(qualname)?;
            Value::from(s.to_lowercase())
        }
        "isdigit" | "isalpha" | "isspace" => {
            args.check_zero_args(qualname)?;
            let test: fn(char) -> bool = match name {
                "isdigit" => |c| c.is_ascii_digit(),
                "isalpha" => char::is_alphabetic,
                _ => char::is_whitespace,
            };
            Value::Bool(!s.is_empty() && s.chars().all(test))
        }
        "startswith" | "endswith" => {
            let affix = args.get_one_arg(qualname)?;
            let affixes = affixes(&affix, name)?;
            Value::Bool(affixes.iter().any(|affix| {
                if name == "startswith" {
                    s.starts_with(affix.as_str())
                } else {
                    s.ends_with(affix.as_str())
                }
            }))
        }
        "replace" => {
            let (old, new, count) = args.get_range("replace", 2, 3)?;
            let (Some(old), Some(new)) = (old, new) else {
                return Err(RunError::internal("replace arity"));
            };
            let (old, new) = (expect_str(&old, "replace arg")?, expect_str(&new, "replace arg")?);
            match count.and_then(|c| c.as_int()).and_then(|c| usize::try_from(c).ok()) {
                Some(count) => Value::from(s.replacen(old, new, count)),
                None => Value::from(s.replace(old, new)),
            }
        }
        "find" | "index" => {
            let needle = args.get_one_arg(qualname)?;
            let needle = expect_str(&needle, "must be str, not")?;
            match s.find(needle) {
                Some(byte) => Value::from(s[..byte].chars().count()),
                None if name == "find" => Value::Int(-1),
                None => return Err(ExcType::ValueError.error("substring not found")),
            }
        }
        "count" => {
            let needle = args.get_one_arg(qualname)?;
            let needle = expect_str(&needle, "must be str, not")?;
            if needle.is_empty() {
                Value::from(s.chars().count() + 1)
            } else {
                Value::from(s.matches(needle).count())
            }
        }
        "format" => {
            let (positional, kwargs) = args.into_parts();
            Value::from(str_format(s, &positional, &kwargs)?)
        }
        _ => return Err(ExcType::attribute_error("str", name)),
    };
    Ok(value)
}

fn split_whitespace(s: &str, limit: Option<usize>) -> Vec<&str> {
    let Some(limit) = limit else {
        return s.split_whitespace().collect();
    };
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if parts.len() + 1 == limit {
            parts.push(rest);
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }
    parts
}

/// `template.format(*args, **kwargs)` with auto and manual numbering,
/// keyword fields, `!r`/`!s` conversions and format specs.
fn str_format(template: &str, args: &[Value], kwargs: &Kwargs) -> RunResult<String> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto_index = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(ExcType::ValueError.error("Single '}' encountered in format string")),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(ExcType::ValueError.error("expected '}' before end of string")),
                    }
                }
                let (head, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let (key, conversion) = match head.split_once('!') {
                    Some((key, conversion)) => (key, Some(conversion)),
                    None => (head, None),
                };
                let value = if key.is_empty() {
                    let value = args.get(auto_index).cloned();
                    auto_index += 1;
                    value.ok_or_else(|| {
                        ExcType::IndexError.error(format!(
                            "Replacement index {} out of range for positional args tuple",
                            auto_index - 1
                        ))
                    })?
                } else if let Ok(index) = key.parse::<usize>() {
                    args.get(index).cloned().ok_or_else(|| {
                        ExcType::IndexError.error(format!(
                            "Replacement index {index} out of range for positional args tuple"
                        ))
                    })?
                } else {
                    kwargs
                        .iter()
                        .find(|(name, _)| name == key)
                        .map(|(_, value)| value.clone())
                        .ok_or_else(|| ExcType::key_error(Value::from(key)))?
                };
                let value = match conversion {
                    Some("r" | "a") => Value::from(repr::repr(&value)?),
                    Some("s") => Value::from(repr::to_str(&value)?),
                    Some(other) => {
                        return Err(ExcType::ValueError.error(format!(
                            "Unknown conversion specifier {other}"
                        )));
                    }
                    None => value,
                };
                out.push_str(&repr::format_value(&value, spec)?);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}
