//! Generator objects.
//!
//! A generator owns a suspended [`Frame`]. Each resume runs the frame until
//! its next `yield` or `return`; `yield from` delegation is resolved here for
//! `throw()` and `close()`, which must reach the innermost delegate first.

use std::{
    cell::{Cell as StdCell, RefCell},
    fmt,
};

use super::{
    dispatch, enter_frame,
    exec::{self, Frame, Outcome, Resume},
    iter, trace_resume, trace_yield,
    value::Value,
};
use crate::{
    exception::{ExcType, RunError, RunResult},
    version::PythonVersion,
};

/// Lifecycle of a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Created,
    Suspended,
    Running,
    Exhausted,
}

/// Result of resuming a generator or a `yield from` delegate.
#[derive(Debug)]
pub(crate) enum GeneratorStep {
    Yielded(Value),
    Returned(Value),
}

pub struct Generator {
    /// Taken while running, dropped once exhausted.
    frame: RefCell<Option<Frame>>,
    state: StdCell<GeneratorState>,
    qualname: String,
}

impl Generator {
    pub(crate) fn new(frame: Frame) -> Self {
        let qualname = frame.function().qualname().to_owned();
        Self {
            frame: RefCell::new(Some(frame)),
            state: StdCell::new(GeneratorState::Created),
            qualname,
        }
    }

    #[must_use]
    pub fn qualname(&self) -> &str {
        &self.qualname
    }

    #[must_use]
    pub fn state(&self) -> GeneratorState {
        self.state.get()
    }

    /// `next(gen)`.
    pub fn next(&self) -> RunResult<Value> {
        self.send(Value::None)
    }

    /// `gen.send(value)`; `StopIteration` carries the return value.
    pub fn send(&self, value: Value) -> RunResult<Value> {
        finish(self.step_send(value)?)
    }

    /// `gen.throw(exc)`.
    pub fn throw(&self, err: RunError) -> RunResult<Value> {
        finish(self.step_throw(err)?)
    }

    /// `gen.close()`: raises `GeneratorExit` at the suspension point and
    /// expects the body to let it escape.
    pub fn close(&self) -> RunResult<()> {
        match self.state.get() {
            GeneratorState::Created => {
                self.exhaust();
                Ok(())
            }
            GeneratorState::Exhausted => Ok(()),
            GeneratorState::Running => Err(ExcType::ValueError.error("generator already executing")),
            GeneratorState::Suspended => match self.step_throw(ExcType::GeneratorExit.bare()) {
                Ok(GeneratorStep::Yielded(_)) => Err(ExcType::RuntimeError.error("generator ignored GeneratorExit")),
                Ok(GeneratorStep::Returned(_)) => Ok(()),
                Err(err) if err.is(ExcType::GeneratorExit) || err.is(ExcType::StopIteration) => Ok(()),
                Err(err) => Err(err),
            },
        }
    }

    pub(crate) fn step_send(&self, value: Value) -> RunResult<GeneratorStep> {
        match self.state.get() {
            GeneratorState::Exhausted => Ok(GeneratorStep::Returned(Value::None)),
            GeneratorState::Running => Err(ExcType::ValueError.error("generator already executing")),
            GeneratorState::Created if !value.is_none() => Err(ExcType::type_error(
                "can't send non-None value to a just-started generator",
            )),
            GeneratorState::Created => {
                let starts_with_send = self.frame.borrow().as_ref().is_some_and(|f| f.version() < PythonVersion::V3_11);
                self.resume(if starts_with_send { Resume::Send(Value::None) } else { Resume::Enter })
            }
            _ => self.resume(Resume::Send(value)),
        }
    }

    pub(crate) fn step_throw(&self, err: RunError) -> RunResult<GeneratorStep> {
        match self.state.get() {
            GeneratorState::Created | GeneratorState::Exhausted => {
                self.exhaust();
                Err(err)
            }
            GeneratorState::Running => Err(ExcType::ValueError.error("generator already executing")),
            GeneratorState::Suspended => {
                let delegate = self.frame.borrow().as_ref().and_then(Frame::delegate);
                let Some(delegate) = delegate else {
                    return self.resume(Resume::Throw(err));
                };
                if err.is(ExcType::GeneratorExit) {
                    if let Err(close_err) = close_delegate(&delegate) {
                        return self.resume(Resume::Throw(close_err));
                    }
                    return self.resume(Resume::Throw(err));
                }
                match throw_into(&delegate, err) {
                    Ok(GeneratorStep::Yielded(value)) => Ok(GeneratorStep::Yielded(value)),
                    Ok(GeneratorStep::Returned(value)) => {
                        if let Some(frame) = self.frame.borrow_mut().as_mut() {
                            frame.finish_delegation(value)?;
                        }
                        self.resume(Resume::Enter)
                    }
                    Err(err) => self.resume(Resume::Throw(err)),
                }
            }
        }
    }

    fn exhaust(&self) {
        self.state.set(GeneratorState::Exhausted);
        self.frame.borrow_mut().take();
    }

    fn resume(&self, resume: Resume) -> RunResult<GeneratorStep> {
        let _guard = enter_frame(&self.qualname)?;
        let Some(mut frame) = self.frame.borrow_mut().take() else {
            return Err(RunError::internal("generator resumed without a frame"));
        };
        self.state.set(GeneratorState::Running);
        trace_resume(&self.qualname);
        let outcome = exec::execute(&mut frame, resume);
        match outcome {
            Ok(Outcome::Yield(value)) => {
                *self.frame.borrow_mut() = Some(frame);
                self.state.set(GeneratorState::Suspended);
                trace_yield(&self.qualname);
                Ok(GeneratorStep::Yielded(value))
            }
            Ok(Outcome::Return(value)) => {
                self.state.set(GeneratorState::Exhausted);
                Ok(GeneratorStep::Returned(value))
            }
            Err(err) => {
                self.state.set(GeneratorState::Exhausted);
                if err.is(ExcType::StopIteration) {
                    return Err(ExcType::RuntimeError.error("generator raised StopIteration"));
                }
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("qualname", &self.qualname)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

fn finish(step: GeneratorStep) -> RunResult<Value> {
    match step {
        GeneratorStep::Yielded(value) => Ok(value),
        GeneratorStep::Returned(Value::None) => Err(ExcType::StopIteration.bare()),
        GeneratorStep::Returned(value) => Err(ExcType::StopIteration.with_value(value)),
    }
}

/// The value a `StopIteration` carries, `None` without arguments.
pub(crate) fn stop_value(err: &RunError) -> Value {
    match err {
        RunError::Exception(exc) => exc.args().into_iter().next().unwrap_or(Value::None),
        RunError::Internal(_) => Value::None,
    }
}

/// Sends `value` into the iterator a `yield from` delegates to.
pub(crate) fn delegate_send(receiver: &Value, value: Value) -> RunResult<GeneratorStep> {
    match receiver {
        Value::Generator(generator) => generator.step_send(value),
        _ if value.is_none() => Ok(match iter::next(receiver)? {
            Some(item) => GeneratorStep::Yielded(item),
            None => GeneratorStep::Returned(Value::None),
        }),
        _ => match dispatch::call_method(receiver, "send", vec![value]) {
            Ok(item) => Ok(GeneratorStep::Yielded(item)),
            Err(err) if err.is(ExcType::StopIteration) => Ok(GeneratorStep::Returned(stop_value(&err))),
            Err(err) => Err(err),
        },
    }
}

fn throw_into(delegate: &Value, err: RunError) -> RunResult<GeneratorStep> {
    match delegate {
        Value::Generator(generator) => generator.step_throw(err),
        other if dispatch::getattr(other, "throw").is_ok() => {
            let Some(exc) = err.to_value() else {
                return Err(err);
            };
            match dispatch::call_method(other, "throw", vec![exc]) {
                Ok(item) => Ok(GeneratorStep::Yielded(item)),
                Err(err) if err.is(ExcType::StopIteration) => Ok(GeneratorStep::Returned(stop_value(&err))),
                Err(err) => Err(err),
            }
        }
        _ => Err(err),
    }
}

fn close_delegate(delegate: &Value) -> RunResult<()> {
    match delegate {
        Value::Generator(generator) => generator.close(),
        other if dispatch::getattr(other, "close").is_ok() => {
            dispatch::call_method(other, "close", Vec::new())?;
            Ok(())
        }
        _ => Ok(()),
    }
}
