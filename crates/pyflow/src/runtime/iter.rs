//! The iterator protocol.

use std::{cell::RefCell, rc::Rc};

use super::{
    class,
    generator::GeneratorStep,
    value::{RangeValue, Value},
};
use crate::exception::{ExcType, RunError, RunResult};

#[derive(Debug)]
enum IterState {
    /// Walks a list or tuple by index, so appends during iteration are seen.
    Seq { seq: Value, index: usize },
    Range { range: RangeValue, index: usize },
    /// Items captured when the iterator was created.
    Snapshot { items: Vec<Value>, index: usize },
    Enumerate { inner: Value, count: i64 },
    Zip { inners: Vec<Value> },
    Exhausted,
}

/// A builtin iterator object.
#[derive(Debug)]
pub struct PyIterator {
    kind: &'static str,
    state: RefCell<IterState>,
}

impl PyIterator {
    fn new(kind: &'static str, state: IterState) -> Value {
        Value::Iterator(Rc::new(Self {
            kind,
            state: RefCell::new(state),
        }))
    }

    pub(crate) fn snapshot(kind: &'static str, items: Vec<Value>) -> Value {
        Self::new(kind, IterState::Snapshot { items, index: 0 })
    }

    pub(crate) fn enumerate(inner: Value, start: i64) -> Value {
        Self::new("enumerate", IterState::Enumerate { inner, count: start })
    }

    pub(crate) fn zip(inners: Vec<Value>) -> Value {
        Self::new("zip", IterState::Zip { inners })
    }

    /// Python type name, e.g. `list_iterator`.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.kind
    }

    fn next(&self) -> RunResult<Option<Value>> {
        // Nested iterators are advanced without holding our own borrow.
        let mut state = self.state.borrow_mut();
        let item = match &mut *state {
            IterState::Seq { seq, index } => {
                let item = match seq {
                    Value::List(items) => items.borrow().get(*index).cloned(),
                    Value::Tuple(items) => items.get(*index).cloned(),
                    _ => None,
                };
                *index += 1;
                item
            }
            IterState::Range { range, index } => {
                let item = range.get(*index).map(Value::Int);
                *index += 1;
                item
            }
            IterState::Snapshot { items, index } => {
                let item = items.get(*index).cloned();
                *index += 1;
                item
            }
            IterState::Enumerate { inner, count } => {
                let inner = inner.clone();
                let position = *count;
                drop(state);
                let item = next(&inner)?;
                let mut state = self.state.borrow_mut();
                if let IterState::Enumerate { count, .. } = &mut *state {
                    *count += 1;
                }
                return match item {
                    Some(item) => Ok(Some(Value::tuple(vec![Value::Int(position), item]))),
                    None => {
                        *state = IterState::Exhausted;
                        Ok(None)
                    }
                };
            }
            IterState::Zip { inners } => {
                let inners = inners.clone();
                drop(state);
                let mut items = Vec::with_capacity(inners.len());
                for inner in &inners {
                    match next(inner)? {
                        Some(item) => items.push(item),
                        None => {
                            *self.state.borrow_mut() = IterState::Exhausted;
                            return Ok(None);
                        }
                    }
                }
                return Ok((!items.is_empty()).then(|| Value::tuple(items)));
            }
            IterState::Exhausted => None,
        };
        if item.is_none() {
            *state = IterState::Exhausted;
        }
        Ok(item)
    }
}

/// `iter(value)`.
pub(crate) fn get_iter(value: &Value) -> RunResult<Value> {
    let iterator = match value {
        Value::List(_) => PyIterator::new("list_iterator", IterState::Seq { seq: value.clone(), index: 0 }),
        Value::Tuple(_) => PyIterator::new("tuple_iterator", IterState::Seq { seq: value.clone(), index: 0 }),
        Value::Str(s) => PyIterator::snapshot("str_iterator", s.chars().map(|c| Value::from(c.to_string())).collect()),
        Value::Bytes(b) => PyIterator::snapshot("bytes_iterator", b.iter().map(|&b| Value::Int(i64::from(b))).collect()),
        Value::Dict(dict) => PyIterator::snapshot(
            "dict_keyiterator",
            dict.borrow().keys().map(|key| key.value().clone()).collect(),
        ),
        Value::Set(set) => PyIterator::snapshot("set_iterator", set.borrow().iter().map(|k| k.value().clone()).collect()),
        Value::FrozenSet(set) => PyIterator::snapshot("set_iterator", set.iter().map(|k| k.value().clone()).collect()),
        Value::Range(range) => PyIterator::new("range_iterator", IterState::Range { range: *range, index: 0 }),
        Value::Iterator(_) | Value::Generator(_) => value.clone(),
        Value::Instance(_) => match class::call_dunder(value, "__iter__", Vec::new())? {
            Some(iterator) => {
                if !is_iterator(&iterator) {
                    return Err(ExcType::type_error(format!(
                        "iter() returned non-iterator of type '{}'",
                        iterator.type_name()
                    )));
                }
                iterator
            }
            None => return Err(ExcType::not_iterable(&value.type_name())),
        },
        other => return Err(ExcType::not_iterable(&other.type_name())),
    };
    Ok(iterator)
}

fn is_iterator(value: &Value) -> bool {
    match value {
        Value::Iterator(_) | Value::Generator(_) => true,
        Value::Instance(instance) => instance.class().lookup("__next__").is_some(),
        _ => false,
    }
}

/// Advances an iterator; `None` once it is exhausted.
pub(crate) fn next(iterator: &Value) -> RunResult<Option<Value>> {
    match iterator {
        Value::Iterator(it) => it.next(),
        Value::Generator(generator) => match generator.step_send(Value::None)? {
            GeneratorStep::Yielded(value) => Ok(Some(value)),
            GeneratorStep::Returned(_) => Ok(None),
        },
        Value::Instance(_) => match class::call_dunder(iterator, "__next__", Vec::new()) {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => Err(not_an_iterator(iterator)),
            Err(err) if err.is(ExcType::StopIteration) => Ok(None),
            Err(err) => Err(err),
        },
        other => Err(not_an_iterator(other)),
    }
}

fn not_an_iterator(value: &Value) -> RunError {
    ExcType::type_error(format!("'{}' object is not an iterator", value.type_name()))
}

/// Drains any iterable into a vector.
pub(crate) fn collect(iterable: &Value) -> RunResult<Vec<Value>> {
    match iterable {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        other => {
            let iterator = get_iter(other)?;
            let mut items = Vec::new();
            while let Some(item) = next(&iterator)? {
                items.push(item);
            }
            Ok(items)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ints(values: &[Value]) -> Vec<i64> {
        values.iter().filter_map(Value::as_int).collect()
    }

    #[test]
    fn list_iteration_sees_appends() {
        let list = Value::list(vec![Value::Int(1)]);
        let iterator = get_iter(&list).unwrap();
        assert_eq!(next(&iterator).unwrap().and_then(|v| v.as_int()), Some(1));
        if let Value::List(items) = &list {
            items.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(next(&iterator).unwrap().and_then(|v| v.as_int()), Some(2));
        assert!(next(&iterator).unwrap().is_none());
    }

    #[test]
    fn zip_stops_at_shortest() {
        let a = get_iter(&Value::Range(RangeValue { start: 0, stop: 5, step: 1 })).unwrap();
        let b = get_iter(&Value::list(vec![Value::Int(9), Value::Int(8)])).unwrap();
        let pairs = collect(&PyIterator::zip(vec![a, b])).unwrap();
        assert_eq!(pairs.len(), 2);
        let Value::Tuple(first) = &pairs[0] else { panic!("expected tuple") };
        assert_eq!(ints(first), vec![0, 9]);
    }

    #[test]
    fn non_iterables_raise() {
        let err = get_iter(&Value::Int(3)).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: 'int' object is not iterable");
        let err = next(&Value::list(vec![])).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: 'list' object is not an iterator");
    }
}
