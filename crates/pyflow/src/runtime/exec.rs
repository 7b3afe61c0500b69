//! The op executor.
//!
//! A [`Frame`] owns the operand stack, locals, cells and handler stack of one
//! activation. [`execute`] runs ops from the frame's program counter until
//! the body returns or yields; generators keep the frame alive between
//! calls and re-enter it with a sent value or a thrown exception.

use std::{rc::Rc, sync::Arc};

use super::{
    builtins, call, count_op, dispatch, enter_frame,
    function::Function,
    generator::{self, GeneratorStep},
    iter, repr, trace_unwind,
    value::{Cell, Dict, HashKey, Set, SliceValue, Value},
};
use crate::{
    codegen::{CallLayout, CompiledCode, HandlerShape, JumpCondition, KeywordNames, Op},
    exception::{ExcType, RunError, RunResult},
    version::PythonVersion,
};

const MAKE_DEFAULTS: u32 = 0x01;
const MAKE_KWDEFAULTS: u32 = 0x02;
const MAKE_ANNOTATIONS: u32 = 0x04;
const MAKE_CLOSURE: u32 = 0x08;

#[derive(Debug, Clone, Copy)]
struct Handler {
    target: usize,
    depth: usize,
    shape: HandlerShape,
}

/// How a suspended or fresh frame is entered.
#[derive(Debug)]
pub(crate) enum Resume {
    Enter,
    /// Pushes the sent value, as the result of the pending yield.
    Send(Value),
    /// Raises at the suspension point.
    Throw(RunError),
}

/// Why [`execute`] stopped.
#[derive(Debug)]
pub(crate) enum Outcome {
    Return(Value),
    Yield(Value),
}

enum Control {
    Next,
    Jump(usize),
    Return(Value),
    Yield { value: Value, resume: usize },
}

/// One activation of a function.
pub(crate) struct Frame {
    function: Rc<Function>,
    code: Arc<CompiledCode>,
    locals: Vec<Option<Value>>,
    /// Cell variables, then the closure's free variables.
    cells: Vec<Rc<Cell>>,
    stack: Vec<Value>,
    handlers: Vec<Handler>,
    /// The exception being handled, as seen by a bare `raise`.
    exc_info: Option<Value>,
    pc: usize,
}

impl Frame {
    pub(crate) fn new(function: Rc<Function>, locals: Vec<Option<Value>>) -> Self {
        let code = function.code().clone();
        let mut cells: Vec<Rc<Cell>> = code.cellvars.iter().map(|_| Rc::new(Cell::new(None))).collect();
        for (local, cell) in code.cell_parameters() {
            if let Some(value) = locals.get(local).cloned().flatten() {
                cells[cell].set(value);
            }
        }
        cells.extend(function.closure().iter().cloned());
        Self {
            function,
            code,
            locals,
            cells,
            stack: Vec::new(),
            handlers: Vec::new(),
            exc_info: None,
            pc: 0,
        }
    }

    pub(crate) fn function(&self) -> &Rc<Function> {
        &self.function
    }

    pub(crate) fn version(&self) -> PythonVersion {
        self.code.version
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RunError::internal(format!("operand stack underflow at op {}", self.pc)))
    }

    fn pop_n(&mut self, n: usize) -> RunResult<Vec<Value>> {
        let len = self.stack.len();
        if n > len {
            return Err(RunError::internal(format!("operand stack underflow at op {}", self.pc)));
        }
        Ok(self.stack.split_off(len - n))
    }

    fn top(&self) -> RunResult<&Value> {
        self.stack
            .last()
            .ok_or_else(|| RunError::internal(format!("empty operand stack at op {}", self.pc)))
    }

    /// The value `depth` positions down from the top, 1 being the top.
    fn peek(&self, depth: usize) -> RunResult<&Value> {
        self.stack
            .len()
            .checked_sub(depth)
            .and_then(|index| self.stack.get(index))
            .ok_or_else(|| RunError::internal(format!("operand stack underflow at op {}", self.pc)))
    }

    fn constant(&self, index: usize) -> RunResult<Value> {
        self.function
            .constant(index)
            .cloned()
            .ok_or_else(|| RunError::internal(format!("constant {index} out of range")))
    }

    fn name(&self, index: usize) -> RunResult<&str> {
        self.code
            .names
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| RunError::internal(format!("name {index} out of range")))
    }

    fn local_name(&self, slot: usize) -> &str {
        self.code.varnames.get(slot).map_or("?", String::as_str)
    }

    fn cell(&self, index: usize) -> RunResult<&Rc<Cell>> {
        self.cells
            .get(index)
            .ok_or_else(|| RunError::internal(format!("cell {index} out of range")))
    }

    fn unbound_cell(&self, index: usize) -> RunError {
        match self.code.cellvars.get(index) {
            Some(name) => ExcType::unbound_local(name),
            None => {
                let free = index - self.code.cellvars.len();
                ExcType::unbound_free(self.code.freevars.get(free).map_or("?", String::as_str))
            }
        }
    }

    /// The iterator a suspended generator is delegating to, if it is parked
    /// inside `yield from`.
    pub(crate) fn delegate(&self) -> Option<Value> {
        let at_yield_from = matches!(self.code.ops.get(self.pc), Some(Op::YieldFrom));
        let in_send_loop = self.pc >= 2
            && matches!(self.code.ops.get(self.pc - 2), Some(Op::Send(_)))
            && matches!(self.code.ops.get(self.pc - 1), Some(Op::Yield { .. }));
        (at_yield_from || in_send_loop).then(|| self.stack.last().cloned()).flatten()
    }

    /// Continues after the delegate of a `yield from` returned `value`
    /// while an exception was being thrown into it.
    pub(crate) fn finish_delegation(&mut self, value: Value) -> RunResult<()> {
        if matches!(self.code.ops.get(self.pc), Some(Op::YieldFrom)) {
            self.pop()?;
            self.push(value);
            self.pc += 1;
            return Ok(());
        }
        let Some(&Op::Send(target)) = self.pc.checked_sub(2).and_then(|i| self.code.ops.get(i)) else {
            return Err(RunError::internal("generator is not delegating"));
        };
        if self.code.version < PythonVersion::V3_12 {
            self.pop()?;
        }
        self.push(value);
        self.pc = target;
        Ok(())
    }

    /// Routes an exception to the innermost handler. Internal errors and
    /// exceptions with no handler left are returned.
    fn unwind(&mut self, err: RunError) -> RunResult<()> {
        let RunError::Exception(exc) = &err else {
            return Err(err);
        };
        let Some(handler) = self.handlers.pop() else {
            trace_unwind(exc.type_name(), false);
            return Err(err);
        };
        trace_unwind(exc.type_name(), true);
        let exc_value = Value::Exception(exc.clone());
        self.stack.truncate(handler.depth);
        match handler.shape {
            HandlerShape::Legacy => {
                let previous = self.exc_info.clone().unwrap_or(Value::None);
                let previous_type = dispatch::exception_class(&previous);
                self.stack.extend([
                    Value::None,
                    previous,
                    previous_type,
                    Value::None,
                    exc_value.clone(),
                    dispatch::exception_class(&exc_value),
                ]);
                self.exc_info = Some(exc_value);
            }
            HandlerShape::Exc => self.stack.push(exc_value),
            HandlerShape::LastiExc => {
                let lasti = i64::try_from(self.pc).unwrap_or_default();
                self.stack.extend([Value::Int(lasti), exc_value]);
            }
        }
        self.pc = handler.target;
        Ok(())
    }
}

/// Calls a non-generator function body to completion.
pub(crate) fn run_function(mut frame: Frame) -> RunResult<Value> {
    let _guard = enter_frame(frame.function.qualname())?;
    match execute(&mut frame, Resume::Enter)? {
        Outcome::Return(value) => Ok(value),
        Outcome::Yield(_) => Err(RunError::internal("yield in a function without the generator flag")),
    }
}

/// Runs `frame` until it returns or yields.
pub(crate) fn execute(frame: &mut Frame, resume: Resume) -> RunResult<Outcome> {
    let code = frame.code.clone();
    let mut pending = match resume {
        Resume::Enter => None,
        Resume::Send(value) => {
            frame.push(value);
            None
        }
        Resume::Throw(err) => Some(err),
    };
    loop {
        if let Some(err) = pending.take() {
            frame.unwind(err)?;
        }
        let pc = frame.pc;
        let op = code
            .ops
            .get(pc)
            .ok_or_else(|| RunError::internal(format!("program counter {pc} past the end of {}", code.display_name())))?;
        count_op(pc, op.name(), frame.stack.len())?;
        match step(frame, op) {
            Ok(Control::Next) => frame.pc = pc + 1,
            Ok(Control::Jump(target)) => frame.pc = target,
            Ok(Control::Return(value)) => return Ok(Outcome::Return(value)),
            Ok(Control::Yield { value, resume }) => {
                frame.pc = resume;
                return Ok(Outcome::Yield(value));
            }
            Err(err) => {
                frame.pc = pc;
                pending = Some(err);
            }
        }
    }
}

fn expect_str(value: &Value, what: &str) -> RunResult<String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| RunError::internal(format!("{what} must be a str, got {}", value.type_name())))
}

fn keyword_names(value: &Value) -> RunResult<Vec<String>> {
    match value {
        Value::Tuple(names) => names.iter().map(|name| expect_str(name, "keyword name")).collect(),
        other => Err(RunError::internal(format!("keyword names must be a tuple, got {}", other.type_name()))),
    }
}

/// Splits trailing keyword values off positional arguments.
fn split_kwargs(args: &mut Vec<Value>, names: Vec<String>) -> RunResult<Vec<(String, Value)>> {
    let Some(start) = args.len().checked_sub(names.len()) else {
        return Err(RunError::internal("more keyword names than arguments"));
    };
    let values = args.split_off(start);
    Ok(names.into_iter().zip(values).collect())
}

fn kwargs_from_dict(value: &Value) -> RunResult<Vec<(String, Value)>> {
    let Value::Dict(dict) = value else {
        return Err(ExcType::type_error(format!(
            "argument after ** must be a mapping, not {}",
            value.type_name()
        )));
    };
    dict.borrow()
        .iter()
        .map(|(key, value)| match key.value() {
            Value::Str(name) => Ok((name.to_string(), value.clone())),
            _ => Err(ExcType::type_error("keywords must be strings")),
        })
        .collect()
}

fn unpack(value: &Value) -> RunResult<Vec<Value>> {
    let iterator = iter::get_iter(value).map_err(|err| {
        if err.is(ExcType::TypeError) {
            ExcType::type_error(format!("cannot unpack non-iterable {} object", value.type_name()))
        } else {
            err
        }
    })?;
    iter::collect(&iterator)
}

fn slice_of(start: Value, stop: Value, step: Value) -> Value {
    Value::Slice(Rc::new(SliceValue { start, stop, step }))
}

/// The accumulator `depth` positions below the top, after the operands
/// were popped.
fn accumulator(frame: &Frame, depth: usize) -> RunResult<Value> {
    frame.peek(depth).cloned()
}

fn step(frame: &mut Frame, op: &Op) -> RunResult<Control> {
    match op {
        Op::Pop => {
            frame.pop()?;
        }
        Op::Rotate(n) => {
            let len = frame.stack.len();
            if *n > len {
                return Err(RunError::internal("rotate past the bottom of the stack"));
            }
            frame.stack[len - n..].rotate_right(1);
        }
        Op::Dup => {
            let top = frame.top()?.clone();
            frame.push(top);
        }
        Op::DupTwo => {
            let second = frame.peek(2)?.clone();
            let top = frame.peek(1)?.clone();
            frame.push(second);
            frame.push(top);
        }
        Op::Copy(n) => {
            let value = frame.peek(*n)?.clone();
            frame.push(value);
        }
        Op::Swap(n) => {
            let len = frame.stack.len();
            if *n > len || *n == 0 {
                return Err(RunError::internal("swap past the bottom of the stack"));
            }
            frame.stack.swap(len - 1, len - n);
        }
        Op::PushNull => frame.push(Value::Null),
        Op::PopSecond => {
            let top = frame.pop()?;
            frame.pop()?;
            frame.push(top);
        }

        Op::LoadConst(index) => {
            let value = frame.constant(*index)?;
            frame.push(value);
        }
        Op::LoadLocal { slot, .. } => {
            let value = frame
                .locals
                .get(*slot)
                .cloned()
                .flatten()
                .ok_or_else(|| ExcType::unbound_local(frame.local_name(*slot)))?;
            frame.push(value);
        }
        Op::LoadLocalAndClear(slot) => {
            let value = frame.locals.get_mut(*slot).and_then(Option::take).unwrap_or(Value::Null);
            frame.push(value);
        }
        Op::StoreLocal(slot) => {
            let value = frame.pop()?;
            let stored = (!matches!(value, Value::Null)).then_some(value);
            *frame
                .locals
                .get_mut(*slot)
                .ok_or_else(|| RunError::internal(format!("local {slot} out of range")))? = stored;
        }
        Op::DeleteLocal(slot) => {
            let name = frame.local_name(*slot).to_owned();
            match frame.locals.get_mut(*slot).and_then(Option::take) {
                Some(_) => {}
                None => return Err(ExcType::unbound_local(&name)),
            }
        }
        Op::LoadDeref(index) => {
            let value = frame.cell(*index)?.get().ok_or_else(|| frame.unbound_cell(*index))?;
            frame.push(value);
        }
        Op::StoreDeref(index) => {
            let value = frame.pop()?;
            frame.cell(*index)?.set(value);
        }
        Op::DeleteDeref(index) => {
            if !frame.cell(*index)?.clear() {
                return Err(frame.unbound_cell(*index));
            }
        }
        Op::LoadClosure(index) => {
            let cell = frame.cell(*index)?.clone();
            frame.push(Value::Cell(cell));
        }
        Op::LoadGlobal(index) => {
            let value = frame.function.globals().load(frame.name(*index)?)?;
            frame.push(value);
        }
        Op::StoreGlobal(index) => {
            let value = frame.pop()?;
            frame.function.globals().set(frame.name(*index)?, value);
        }
        Op::DeleteGlobal(index) => {
            let name = frame.name(*index)?;
            if frame.function.globals().remove(name).is_none() {
                return Err(ExcType::name_error(name));
            }
        }
        Op::LoadAttr(index) => {
            let object = frame.pop()?;
            let value = dispatch::getattr(&object, frame.name(*index)?)?;
            frame.push(value);
        }
        Op::LoadMethod(index) => {
            let object = frame.pop()?;
            let value = dispatch::getattr(&object, frame.name(*index)?)?;
            frame.push(Value::Null);
            frame.push(value);
        }
        Op::StoreAttr(index) => {
            let object = frame.pop()?;
            let value = frame.pop()?;
            dispatch::setattr(&object, frame.name(*index)?, value)?;
        }
        Op::DeleteAttr(index) => {
            let object = frame.pop()?;
            dispatch::delattr(&object, frame.name(*index)?)?;
        }

        Op::BinaryDirect { op, kinds, inplace } => {
            let rhs = frame.pop()?;
            let lhs = frame.pop()?;
            frame.push(dispatch::binary_direct(*op, *kinds, *inplace, &lhs, &rhs)?);
        }
        Op::BinaryMethod { op, inplace, reflected } => {
            let rhs = frame.pop()?;
            let lhs = frame.pop()?;
            frame.push(dispatch::binary_method(*op, *inplace, *reflected, &lhs, &rhs)?);
        }
        Op::Binary { op, inplace } => {
            let rhs = frame.pop()?;
            let lhs = frame.pop()?;
            frame.push(dispatch::binary(*op, *inplace, &lhs, &rhs)?);
        }
        Op::UnaryDirect { op, kinds } => {
            let value = frame.pop()?;
            frame.push(dispatch::unary_direct(*op, *kinds, &value)?);
        }
        Op::Unary(op) => {
            let value = frame.pop()?;
            frame.push(dispatch::unary(*op, &value)?);
        }
        Op::Not => {
            let value = frame.pop()?;
            frame.push(Value::Bool(!dispatch::truthy(&value)?));
        }
        Op::CompareDirect { op, kinds } => {
            let rhs = frame.pop()?;
            let lhs = frame.pop()?;
            frame.push(dispatch::compare_direct(*op, *kinds, &lhs, &rhs)?);
        }
        Op::Compare(op) => {
            let rhs = frame.pop()?;
            let lhs = frame.pop()?;
            frame.push(dispatch::compare(*op, &lhs, &rhs)?);
        }
        Op::Is { negate } => {
            let rhs = frame.pop()?;
            let lhs = frame.pop()?;
            frame.push(Value::Bool(lhs.is(&rhs) != *negate));
        }
        Op::Contains { negate } => {
            let container = frame.pop()?;
            let item = frame.pop()?;
            frame.push(Value::Bool(dispatch::contains(&container, &item)? != *negate));
        }
        Op::Subscr => {
            let key = frame.pop()?;
            let container = frame.pop()?;
            frame.push(dispatch::get_item(&container, &key)?);
        }
        Op::StoreSubscr => {
            let key = frame.pop()?;
            let container = frame.pop()?;
            let value = frame.pop()?;
            dispatch::set_item(&container, &key, value)?;
        }
        Op::DeleteSubscr => {
            let key = frame.pop()?;
            let container = frame.pop()?;
            dispatch::del_item(&container, &key)?;
        }
        Op::Slice => {
            let stop = frame.pop()?;
            let start = frame.pop()?;
            let container = frame.pop()?;
            frame.push(dispatch::get_item(&container, &slice_of(start, stop, Value::None))?);
        }
        Op::StoreSlice => {
            let stop = frame.pop()?;
            let start = frame.pop()?;
            let container = frame.pop()?;
            let value = frame.pop()?;
            dispatch::set_item(&container, &slice_of(start, stop, Value::None), value)?;
        }

        Op::BuildTuple(n) => {
            let items = frame.pop_n(*n)?;
            frame.push(Value::tuple(items));
        }
        Op::BuildList(n) => {
            let items = frame.pop_n(*n)?;
            frame.push(Value::list(items));
        }
        Op::BuildSet(n) => {
            let mut set = Set::default();
            for item in frame.pop_n(*n)? {
                set.insert(HashKey::new(item)?);
            }
            frame.push(Value::set(set));
        }
        Op::BuildMap(n) => {
            let items = frame.pop_n(n * 2)?;
            let mut dict = Dict::default();
            let mut items = items.into_iter();
            while let (Some(key), Some(value)) = (items.next(), items.next()) {
                dict.insert(HashKey::new(key)?, value);
            }
            frame.push(Value::dict(dict));
        }
        Op::BuildConstKeyMap(n) => {
            let keys = frame.pop()?;
            let values = frame.pop_n(*n)?;
            let Value::Tuple(keys) = keys else {
                return Err(RunError::internal("BUILD_CONST_KEY_MAP without a key tuple"));
            };
            let mut dict = Dict::default();
            for (key, value) in keys.iter().cloned().zip(values) {
                dict.insert(HashKey::new(key)?, value);
            }
            frame.push(Value::dict(dict));
        }
        Op::BuildSlice(n) => {
            let step = if *n == 3 { frame.pop()? } else { Value::None };
            let stop = frame.pop()?;
            let start = frame.pop()?;
            frame.push(slice_of(start, stop, step));
        }
        Op::ListAppend(depth) => {
            let value = frame.pop()?;
            if let Value::List(items) = accumulator(frame, *depth)? {
                items.borrow_mut().push(value);
            }
        }
        Op::SetAdd(depth) => {
            let value = frame.pop()?;
            if let Value::Set(set) = accumulator(frame, *depth)? {
                set.borrow_mut().insert(HashKey::new(value)?);
            }
        }
        Op::MapAdd(depth) => {
            let value = frame.pop()?;
            let key = frame.pop()?;
            if let Value::Dict(dict) = accumulator(frame, *depth)? {
                dict.borrow_mut().insert(HashKey::new(key)?, value);
            }
        }
        Op::ListExtend(depth) => {
            let iterable = frame.pop()?;
            if let Value::List(items) = accumulator(frame, *depth)? {
                let extra = iter::collect(&iterable).map_err(|_| {
                    ExcType::type_error(format!(
                        "Value after * must be an iterable, not {}",
                        iterable.type_name()
                    ))
                })?;
                items.borrow_mut().extend(extra);
            }
        }
        Op::SetUpdate(depth) => {
            let iterable = frame.pop()?;
            if let Value::Set(set) = accumulator(frame, *depth)? {
                let extra = dispatch::collect_set(&iterable)?;
                set.borrow_mut().extend(extra);
            }
        }
        Op::DictUpdate(depth) => {
            let mapping = frame.pop()?;
            if let Value::Dict(dict) = accumulator(frame, *depth)? {
                if !matches!(mapping, Value::Dict(_)) {
                    return Err(ExcType::type_error(format!(
                        "'{}' object is not a mapping",
                        mapping.type_name()
                    )));
                }
                dispatch::update_dict(&dict, &mapping)?;
            }
        }
        Op::DictMerge(depth) => {
            let mapping = frame.pop()?;
            if let Value::Dict(dict) = accumulator(frame, *depth)? {
                for (name, value) in kwargs_from_dict(&mapping)? {
                    let key = HashKey::str(&name);
                    if dict.borrow().contains_key(&key) {
                        return Err(ExcType::type_error(format!(
                            "got multiple values for keyword argument '{name}'"
                        )));
                    }
                    dict.borrow_mut().insert(key, value);
                }
            }
        }
        Op::ListToTuple => {
            let list = frame.pop()?;
            frame.push(Value::tuple(iter::collect(&list)?));
        }
        Op::UnpackSequence(n) => {
            let sequence = frame.pop()?;
            let items = unpack(&sequence)?;
            if items.len() < *n {
                return Err(ExcType::unpack_too_few(*n, items.len(), false));
            }
            if items.len() > *n {
                return Err(ExcType::unpack_too_many(*n));
            }
            frame.stack.extend(items.into_iter().rev());
        }
        Op::UnpackEx { before, after } => {
            let sequence = frame.pop()?;
            let mut items = unpack(&sequence)?;
            let needed = before + after;
            if items.len() < needed {
                return Err(ExcType::unpack_too_few(needed, items.len(), true));
            }
            let trailing = items.split_off(items.len() - after);
            let middle = items.split_off(*before);
            frame.stack.extend(trailing.into_iter().rev());
            frame.push(Value::list(middle));
            frame.stack.extend(items.into_iter().rev());
        }
        Op::GetLen => {
            let len = dispatch::len(frame.top()?)?;
            frame.push(Value::from(len));
        }

        Op::Jump(target) => return Ok(Control::Jump(*target)),
        Op::PopJumpIf { target, condition } => {
            let value = frame.pop()?;
            let jump = match condition {
                JumpCondition::True => dispatch::truthy(&value)?,
                JumpCondition::False => !dispatch::truthy(&value)?,
                JumpCondition::None => value.is_none(),
                JumpCondition::NotNone => !value.is_none(),
            };
            if jump {
                return Ok(Control::Jump(*target));
            }
        }
        Op::JumpIfOrPop { target, when } => {
            if dispatch::truthy(frame.top()?)? == *when {
                return Ok(Control::Jump(*target));
            }
            frame.pop()?;
        }
        Op::GetIter => {
            let iterable = frame.pop()?;
            frame.push(iter::get_iter(&iterable)?);
        }
        Op::ForIter(target) => {
            let iterator = frame.top()?.clone();
            match iter::next(&iterator)? {
                Some(item) => frame.push(item),
                None => {
                    frame.pop()?;
                    return Ok(Control::Jump(*target));
                }
            }
        }
        Op::Return => return Ok(Control::Return(frame.pop()?)),

        Op::Call { argc, layout, keywords } => {
            let names = match keywords {
                KeywordNames::None => Vec::new(),
                KeywordNames::Const(index) => keyword_names(&frame.constant(*index)?)?,
                KeywordNames::Stack => {
                    let names = frame.pop()?;
                    keyword_names(&names)?
                }
            };
            let mut args = frame.pop_n(*argc)?;
            let callable = pop_callee(frame, *layout, &mut args)?;
            let kwargs = split_kwargs(&mut args, names)?;
            let result = call::call(&callable, args, kwargs)?;
            frame.push(result);
        }
        Op::CallBuiltin { builtin, argc, layout } => {
            let mut args = frame.pop_n(*argc)?;
            let callable = pop_callee(frame, *layout, &mut args)?;
            let result = match callable {
                Value::Builtin(found) if found == *builtin => builtins::call_builtin(found, args, Vec::new())?,
                other => call::call(&other, args, Vec::new())?,
            };
            frame.push(result);
        }
        Op::CallEx { has_kwargs, null_below } => {
            let kwargs = if *has_kwargs {
                let mapping = frame.pop()?;
                kwargs_from_dict(&mapping)?
            } else {
                Vec::new()
            };
            let args = frame.pop()?;
            let callable = frame.pop()?;
            if *null_below {
                frame.pop()?;
            }
            let args = iter::collect(&args)?;
            let result = call::call(&callable, args, kwargs)?;
            frame.push(result);
        }
        Op::MakeFunction { flags, with_qualname } => {
            let function = make_function(frame, *flags, *with_qualname)?;
            frame.push(Value::Function(Rc::new(function)));
        }

        Op::ReturnGenerator => frame.push(Value::None),
        Op::Yield { resume } => {
            let value = frame.pop()?;
            return Ok(Control::Yield { value, resume: *resume });
        }
        Op::GetYieldFromIter => {
            let iterable = frame.pop()?;
            let iterator = match iterable {
                Value::Generator(_) => iterable,
                other => iter::get_iter(&other)?,
            };
            frame.push(iterator);
        }
        Op::YieldFrom => {
            let sent = frame.pop()?;
            let receiver = frame.top()?.clone();
            match generator::delegate_send(&receiver, sent)? {
                GeneratorStep::Yielded(value) => {
                    return Ok(Control::Yield {
                        value,
                        resume: frame.pc,
                    });
                }
                GeneratorStep::Returned(value) => {
                    frame.pop()?;
                    frame.push(value);
                }
            }
        }
        Op::Send(target) => {
            let sent = frame.pop()?;
            let receiver = frame.top()?.clone();
            match generator::delegate_send(&receiver, sent)? {
                GeneratorStep::Yielded(value) => frame.push(value),
                GeneratorStep::Returned(value) => {
                    if frame.version() < PythonVersion::V3_12 {
                        frame.pop()?;
                    }
                    frame.push(value);
                    return Ok(Control::Jump(*target));
                }
            }
        }
        Op::CleanupThrow => {
            let exc = frame.pop()?;
            frame.pop_n(2)?;
            match &exc {
                Value::Exception(e) if e.matches_builtin(ExcType::StopIteration) => {
                    let value = e.args().into_iter().next().unwrap_or(Value::None);
                    frame.push(Value::None);
                    frame.push(value);
                }
                other => return Err(dispatch::make_exception(other)?),
            }
        }

        Op::PushHandler { target, depth, shape } => frame.handlers.push(Handler {
            target: *target,
            depth: *depth,
            shape: *shape,
        }),
        Op::PopHandler => {
            frame.handlers.pop();
        }
        Op::PushExcInfo => {
            let exc = frame.pop()?;
            let previous = frame.exc_info.replace(exc.clone()).unwrap_or(Value::None);
            frame.push(previous);
            frame.push(exc);
        }
        Op::PopExcept { legacy } => {
            let previous = if *legacy {
                frame.pop_n(3)?.swap_remove(1)
            } else {
                frame.pop()?
            };
            frame.exc_info = (!previous.is_none()).then_some(previous);
        }
        Op::Reraise { legacy, .. } => {
            let exc = if *legacy { frame.pop_n(3)?.swap_remove(1) } else { frame.pop()? };
            return Err(dispatch::make_exception(&exc)?);
        }
        Op::Raise(argc) => return Err(raise(frame, *argc)?),
        Op::BeforeWith => {
            let manager = frame.pop()?;
            let exit = dispatch::getattr(&manager, "__exit__").map_err(|_| {
                ExcType::type_error(format!(
                    "'{}' object does not support the context manager protocol",
                    manager.type_name()
                ))
            })?;
            let entered = dispatch::call_method(&manager, "__enter__", Vec::new())?;
            frame.push(exit);
            frame.push(entered);
        }
        Op::WithExceptStart { legacy } => {
            let exit = frame.peek(if *legacy { 7 } else { 4 })?.clone();
            let exc = frame.peek(if *legacy { 2 } else { 1 })?.clone();
            let exc_type = dispatch::exception_class(&exc);
            let result = call::call(&exit, vec![exc_type, exc, Value::None], Vec::new())?;
            frame.push(result);
        }
        Op::JumpIfNotExcMatch(target) => {
            let handler = frame.pop()?;
            let exc = frame.pop()?;
            if !dispatch::exception_matches(&exc, &handler)? {
                return Ok(Control::Jump(*target));
            }
        }
        Op::CheckExcMatch => {
            let handler = frame.pop()?;
            let matched = dispatch::exception_matches(frame.top()?, &handler)?;
            frame.push(Value::Bool(matched));
        }
        Op::LoadAssertionError => frame.push(Value::ExcClass(ExcType::AssertionError)),

        Op::ImportName(index) => {
            frame.pop_n(2)?;
            let name = frame.name(*index)?;
            let module = frame.function.globals().modules().import(name)?;
            frame.push(Value::Module(module));
        }
        Op::ImportFrom(index) => {
            let name = frame.name(*index)?;
            let Value::Module(module) = frame.top()? else {
                return Err(RunError::internal("IMPORT_FROM without a module"));
            };
            let value = module.import_from(name)?;
            frame.push(value);
        }
        Op::FormatValue { conversion, has_spec } => {
            let spec = if *has_spec {
                let spec = frame.pop()?;
                expect_str(&spec, "format spec")?
            } else {
                String::new()
            };
            let value = frame.pop()?;
            let value = match conversion {
                1 => Value::from(repr::to_str(&value)?),
                2 | 3 => Value::from(repr::repr(&value)?),
                _ => value,
            };
            frame.push(Value::from(repr::format_value(&value, &spec)?));
        }
        Op::BuildString(n) => {
            let mut out = String::new();
            for piece in frame.pop_n(*n)? {
                out.push_str(&repr::to_str(&piece)?);
            }
            frame.push(Value::from(out));
        }
    }
    Ok(Control::Next)
}

/// Pops the callee of a call site, moving a bound receiver into the
/// arguments for method pairs.
fn pop_callee(frame: &mut Frame, layout: CallLayout, args: &mut Vec<Value>) -> RunResult<Value> {
    match layout {
        CallLayout::Plain => frame.pop(),
        CallLayout::MethodPair => {
            let second = frame.pop()?;
            let first = frame.pop()?;
            if matches!(first, Value::Null) {
                Ok(second)
            } else {
                args.insert(0, second);
                Ok(first)
            }
        }
    }
}

fn make_function(frame: &mut Frame, flags: u32, with_qualname: bool) -> RunResult<Function> {
    let qualname = if with_qualname {
        let qualname = frame.pop()?;
        Some(expect_str(&qualname, "function qualname")?)
    } else {
        None
    };
    let Value::Code(code) = frame.pop()? else {
        return Err(RunError::internal("MAKE_FUNCTION without a code object"));
    };
    let closure = if flags & MAKE_CLOSURE != 0 {
        iter::collect(&frame.pop()?)?
            .into_iter()
            .map(|cell| match cell {
                Value::Cell(cell) => Ok(cell),
                other => Err(RunError::internal(format!("closure item is a {}", other.type_name()))),
            })
            .collect::<RunResult<Vec<_>>>()?
    } else {
        Vec::new()
    };
    if flags & MAKE_ANNOTATIONS != 0 {
        frame.pop()?;
    }
    let kwdefaults = if flags & MAKE_KWDEFAULTS != 0 {
        kwargs_from_dict(&frame.pop()?)?
    } else {
        Vec::new()
    };
    let defaults = if flags & MAKE_DEFAULTS != 0 {
        iter::collect(&frame.pop()?)?
    } else {
        Vec::new()
    };
    let qualname = qualname.unwrap_or_else(|| code.display_name().to_owned());
    Ok(Function::new(code, frame.function.globals().clone())
        .with_defaults(defaults)
        .with_kwdefaults(kwdefaults)
        .with_closure(closure)
        .with_qualname(qualname))
}

fn raise(frame: &mut Frame, argc: usize) -> RunResult<RunError> {
    match argc {
        0 => match &frame.exc_info {
            Some(active) => dispatch::make_exception(active),
            None => Ok(ExcType::RuntimeError.error("No active exception to reraise")),
        },
        _ => {
            let cause = if argc == 2 { Some(frame.pop()?) } else { None };
            let raised = frame.pop()?;
            let err = dispatch::make_exception(&raised)?;
            if let RunError::Exception(exc) = &err {
                if let Some(cause) = cause {
                    let cause = match cause {
                        Value::None => Value::None,
                        other => dispatch::make_exception(&other)?.to_value().unwrap_or(Value::None),
                    };
                    exc.set_attr("__cause__", cause);
                }
                if let Some(context) = &frame.exc_info
                    && !context.is(&Value::Exception(exc.clone()))
                {
                    exc.set_attr("__context__", context.clone());
                }
            }
            Ok(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::CompareOp;

    fn compare_ints(op: CompareOp, a: i64, b: i64) -> bool {
        dispatch::compare_bool(op, &Value::Int(a), &Value::Int(b)).unwrap()
    }

    #[test]
    fn keyword_values_come_off_the_end() {
        let mut args = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let kwargs = split_kwargs(&mut args, vec!["c".to_owned()]).unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(kwargs[0].0, "c");
        assert_eq!(kwargs[0].1.as_int(), Some(3));
    }

    #[test]
    fn unpacking_a_number_names_its_type() {
        let err = unpack(&Value::Int(5)).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: cannot unpack non-iterable int object");
    }

    #[test]
    fn comparison_helpers_agree_with_python() {
        assert!(compare_ints(CompareOp::Lt, -10, 10));
        assert!(!compare_ints(CompareOp::Ge, -10, 10));
    }
}
