//! Symbolic stack and locals state.
//!
//! A [`StackMetadata`] is an immutable snapshot: every operation returns a new
//! value. Locals and cells sit behind `Arc`s, so the common stack-only steps
//! share them with their predecessor instead of copying.

use std::{fmt, sync::Arc};

use crate::{bytecode::Instruction, error::TranslateError, types::PyType};

/// What the analyzer knows about one value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolicValue {
    ty: PyType,
    /// Offset of the instruction that produced the value, while that is unambiguous.
    origin: Option<usize>,
}

impl SymbolicValue {
    #[must_use]
    pub fn new(ty: PyType) -> Self {
        Self { ty, origin: None }
    }

    #[must_use]
    pub fn produced_by(ty: PyType, offset: usize) -> Self {
        Self {
            ty,
            origin: Some(offset),
        }
    }

    #[must_use]
    pub fn object() -> Self {
        Self::new(PyType::Object)
    }

    #[must_use]
    pub fn ty(&self) -> &PyType {
        &self.ty
    }

    #[must_use]
    pub fn origin(&self) -> Option<usize> {
        self.origin
    }

    #[must_use]
    pub fn unify(&self, other: &Self) -> Self {
        Self {
            ty: self.ty.lub(&other.ty),
            origin: if self.origin == other.origin { self.origin } else { None },
        }
    }
}

impl fmt::Display for SymbolicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            Some(offset) => write!(f, "{}@{offset}", self.ty),
            None => write!(f, "{}", self.ty),
        }
    }
}

/// State of a local or cell slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Binding {
    Unbound,
    /// Bound on some paths only; loads must check.
    MaybeBound(SymbolicValue),
    Bound(SymbolicValue),
}

impl Binding {
    #[must_use]
    pub fn value(&self) -> Option<&SymbolicValue> {
        match self {
            Self::Unbound => None,
            Self::MaybeBound(value) | Self::Bound(value) => Some(value),
        }
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound(_))
    }

    #[must_use]
    pub fn unify(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Unbound, Self::Unbound) => Self::Unbound,
            (Self::Bound(a), Self::Bound(b)) => Self::Bound(a.unify(b)),
            (Self::Unbound, Self::Bound(v) | Self::MaybeBound(v))
            | (Self::Bound(v) | Self::MaybeBound(v), Self::Unbound) => Self::MaybeBound(v.clone()),
            (Self::MaybeBound(a) | Self::Bound(a), Self::MaybeBound(b) | Self::Bound(b)) => {
                Self::MaybeBound(a.unify(b))
            }
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbound => f.write_str("-"),
            Self::MaybeBound(value) => write!(f, "?{value}"),
            Self::Bound(value) => write!(f, "{value}"),
        }
    }
}

/// Popping more values than the symbolic stack holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackUnderflow {
    pub depth: usize,
    pub needed: usize,
}

impl StackUnderflow {
    /// Attaches the instruction that underflowed.
    #[must_use]
    pub fn at(self, instruction: &Instruction) -> TranslateError {
        TranslateError::StackUnderflow {
            offset: instruction.offset,
            opcode: instruction.name(),
            depth: self.depth,
            needed: self.needed,
        }
    }
}

/// Two states with different stack depths cannot be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthMismatch;

/// The analyzer's belief about the stack, locals and cells at one program point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMetadata {
    stack: Vec<SymbolicValue>,
    locals: Arc<Vec<Binding>>,
    cells: Arc<Vec<Binding>>,
}

impl StackMetadata {
    #[must_use]
    pub fn new(locals: Vec<Binding>, cells: Vec<Binding>) -> Self {
        Self {
            stack: Vec::new(),
            locals: Arc::new(locals),
            cells: Arc::new(cells),
        }
    }

    /// Empty stack, every local and cell unbound.
    #[must_use]
    pub fn unbound(locals: usize, cells: usize) -> Self {
        Self::new(vec![Binding::Unbound; locals], vec![Binding::Unbound; cells])
    }

    /// Stack values, bottom first.
    #[must_use]
    pub fn stack(&self) -> &[SymbolicValue] {
        &self.stack
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn locals(&self) -> &[Binding] {
        &self.locals
    }

    #[must_use]
    pub fn cells(&self) -> &[Binding] {
        &self.cells
    }

    #[must_use]
    pub fn local(&self, slot: usize) -> Option<&Binding> {
        self.locals.get(slot)
    }

    #[must_use]
    pub fn cell(&self, slot: usize) -> Option<&Binding> {
        self.cells.get(slot)
    }

    /// The value `depth` entries below the top; `peek(0)` is TOS.
    #[must_use]
    pub fn peek(&self, depth: usize) -> Option<&SymbolicValue> {
        self.stack.len().checked_sub(depth + 1).map(|i| &self.stack[i])
    }

    #[must_use]
    pub fn push(&self, value: SymbolicValue) -> Self {
        let mut next = self.clone();
        next.stack.push(value);
        next
    }

    #[must_use]
    pub fn push_all(&self, values: impl IntoIterator<Item = SymbolicValue>) -> Self {
        let mut next = self.clone();
        next.stack.extend(values);
        next
    }

    /// Removes the top `count` values, returning them bottom first.
    pub fn pop(&self, count: usize) -> Result<(Self, Vec<SymbolicValue>), StackUnderflow> {
        let Some(split) = self.stack.len().checked_sub(count) else {
            return Err(StackUnderflow {
                depth: self.stack.len(),
                needed: count,
            });
        };
        let mut next = self.clone();
        let popped = next.stack.split_off(split);
        Ok((next, popped))
    }

    /// Keeps only the bottom `depth` values.
    #[must_use]
    pub fn truncate(&self, depth: usize) -> Self {
        let mut next = self.clone();
        next.stack.truncate(depth);
        next
    }

    #[must_use]
    pub fn set_local(&self, slot: usize, binding: Binding) -> Self {
        let mut next = self.clone();
        let locals = Arc::make_mut(&mut next.locals);
        if slot >= locals.len() {
            locals.resize(slot + 1, Binding::Unbound);
        }
        locals[slot] = binding;
        next
    }

    #[must_use]
    pub fn set_cell(&self, slot: usize, binding: Binding) -> Self {
        let mut next = self.clone();
        let cells = Arc::make_mut(&mut next.cells);
        if slot >= cells.len() {
            cells.resize(slot + 1, Binding::Unbound);
        }
        cells[slot] = binding;
        next
    }

    /// Every local and cell may or may not be bound, with unknown type.
    ///
    /// Used for exception handlers, which can be entered from any point of the
    /// protected region.
    #[must_use]
    pub fn with_bindings_widened(&self) -> Self {
        let widen = |bindings: &[Binding]| -> Vec<Binding> {
            bindings
                .iter()
                .map(|_| Binding::MaybeBound(SymbolicValue::object()))
                .collect()
        };
        Self {
            stack: self.stack.clone(),
            locals: Arc::new(widen(&self.locals)),
            cells: Arc::new(widen(&self.cells)),
        }
    }

    /// Least upper bound of two states reaching the same program point.
    ///
    /// Stack positions, locals and cells are merged pairwise; a local table
    /// shorter than the other is treated as unbound past its end. Stacks of
    /// different depth have no common widening.
    pub fn unify_with(&self, other: &Self) -> Result<Self, DepthMismatch> {
        if self.stack.len() != other.stack.len() {
            return Err(DepthMismatch);
        }
        if self == other {
            return Ok(self.clone());
        }
        let stack = self.stack.iter().zip(&other.stack).map(|(a, b)| a.unify(b)).collect();
        Ok(Self {
            stack,
            locals: unify_bindings(&self.locals, &other.locals),
            cells: unify_bindings(&self.cells, &other.cells),
        })
    }
}

fn unify_bindings(left: &Arc<Vec<Binding>>, right: &Arc<Vec<Binding>>) -> Arc<Vec<Binding>> {
    if Arc::ptr_eq(left, right) || left == right {
        return left.clone();
    }
    let len = left.len().max(right.len());
    let unbound = Binding::Unbound;
    let merged = (0..len)
        .map(|i| {
            let a = left.get(i).unwrap_or(&unbound);
            let b = right.get(i).unwrap_or(&unbound);
            a.unify(b)
        })
        .collect();
    Arc::new(merged)
}

impl fmt::Display for StackMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |items: Vec<String>| items.join(", ");
        write!(
            f,
            "stack=[{}] locals=[{}] cells=[{}]",
            join(self.stack.iter().map(ToString::to_string).collect()),
            join(self.locals.iter().map(ToString::to_string).collect()),
            join(self.cells.iter().map(ToString::to_string).collect()),
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn value(ty: PyType) -> SymbolicValue {
        SymbolicValue::new(ty)
    }

    fn sample() -> (StackMetadata, StackMetadata) {
        let a = StackMetadata::unbound(3, 1)
            .push(value(PyType::Int))
            .push(SymbolicValue::produced_by(PyType::Bool, 4))
            .set_local(0, Binding::Bound(value(PyType::Int)))
            .set_local(1, Binding::Bound(value(PyType::Str)));
        let b = StackMetadata::unbound(3, 1)
            .push(value(PyType::Bool))
            .push(SymbolicValue::produced_by(PyType::Bool, 9))
            .set_local(0, Binding::Bound(value(PyType::Bool)))
            .set_local(2, Binding::Bound(value(PyType::Float)));
        (a, b)
    }

    #[test]
    fn unify_is_commutative_and_idempotent() {
        let (a, b) = sample();
        let ab = a.unify_with(&b).unwrap();
        let ba = b.unify_with(&a).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(a.unify_with(&a).unwrap(), a);
        assert_eq!(ab.unify_with(&ab).unwrap(), ab);
    }

    #[test]
    fn unify_widens_types_and_bindings() {
        let (a, b) = sample();
        let merged = a.unify_with(&b).unwrap();
        assert_eq!(merged.stack()[0].ty(), &PyType::Int);
        assert_eq!(merged.stack()[1], value(PyType::Bool));
        assert_eq!(merged.local(0), Some(&Binding::Bound(value(PyType::Int))));
        assert_eq!(merged.local(1), Some(&Binding::MaybeBound(value(PyType::Str))));
        assert_eq!(merged.local(2), Some(&Binding::MaybeBound(value(PyType::Float))));
    }

    #[test]
    fn unify_is_monotonic() {
        let (a, b) = sample();
        let merged = a.unify_with(&b).unwrap();
        // Merging again with either input changes nothing.
        assert_eq!(merged.unify_with(&a).unwrap(), merged);
        assert_eq!(merged.unify_with(&b).unwrap(), merged);
    }

    #[test]
    fn depth_mismatch_is_an_error() {
        let a = StackMetadata::unbound(0, 0).push(value(PyType::Int));
        let b = StackMetadata::unbound(0, 0);
        assert_eq!(a.unify_with(&b), Err(DepthMismatch));
    }

    #[test]
    fn shorter_local_table_is_padded_unbound() {
        let a = StackMetadata::new(vec![Binding::Bound(value(PyType::Int))], vec![]);
        let b = StackMetadata::new(
            vec![Binding::Bound(value(PyType::Int)), Binding::Bound(value(PyType::Str))],
            vec![],
        );
        let merged = a.unify_with(&b).unwrap();
        assert_eq!(merged.locals().len(), 2);
        assert_eq!(merged.local(1), Some(&Binding::MaybeBound(value(PyType::Str))));
    }

    #[test]
    fn pop_returns_values_bottom_first() {
        let m = StackMetadata::unbound(0, 0)
            .push(value(PyType::Int))
            .push(value(PyType::Str))
            .push(value(PyType::Float));
        let (rest, popped) = m.pop(2).unwrap();
        assert_eq!(rest.depth(), 1);
        assert_eq!(popped, vec![value(PyType::Str), value(PyType::Float)]);
        assert_eq!(m.depth(), 3);
        assert_eq!(m.pop(4), Err(StackUnderflow { depth: 3, needed: 4 }));
    }

    #[test]
    fn derived_states_share_locals() {
        let base = StackMetadata::unbound(2, 0).set_local(0, Binding::Bound(value(PyType::Int)));
        let pushed = base.push(value(PyType::Str));
        assert!(Arc::ptr_eq(&base.locals, &pushed.locals));
        let rebound = pushed.set_local(1, Binding::Bound(value(PyType::Str)));
        assert!(!Arc::ptr_eq(&pushed.locals, &rebound.locals));
        assert_eq!(pushed.local(1), Some(&Binding::Unbound));
    }
}
