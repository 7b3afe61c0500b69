//! Execution of compiled code.
//!
//! Generated code runs on a small frame interpreter: each [`Op`](crate::codegen::Op)
//! is one step over an operand stack, and generic operations dispatch on the
//! dynamic [`Value`] type the way CPython's object protocol does.
//!
//! Resource limits, the active tracer and the `print` sink live in a
//! thread-local [`ExecState`]. [`Runtime::call`] installs its own for the
//! duration of a call, so code running outside a `Runtime` (for example
//! `Value` equality called from Rust) falls back to the defaults.

mod args;
mod builtins;
mod call;
mod class;
mod dispatch;
mod exec;
mod function;
mod generator;
mod globals;
mod iter;
mod methods;
mod numeric;
mod repr;
mod value;

use std::{
    cell::{Cell as StdCell, RefCell},
    mem,
};

pub use class::{ClassObject, Instance};
pub use function::{BoundMethod, Function};
pub use generator::{Generator, GeneratorState};
pub use globals::{Globals, Module, ModuleRegistry};
pub use iter::PyIterator;
pub use methods::BuiltinMethod;
pub use repr::{py_repr, py_str};
pub use value::{Cell, Dict, HashKey, RangeValue, Set, SliceValue, Value};

use crate::{
    config::{ResourceError, RuntimeLimits},
    exception::{RunError, RunResult},
    tracer::{NoopTracer, VmTracer},
};

/// Keyword arguments of a call, in call order.
pub type Kwargs = Vec<(String, Value)>;

/// Per-thread execution state shared by every frame of a call tree.
struct ExecState {
    limits: StdCell<RuntimeLimits>,
    depth: StdCell<usize>,
    ops: StdCell<usize>,
    tracer: RefCell<Box<dyn VmTracer>>,
    /// Captured `print` output; `None` writes to stdout.
    output: RefCell<Option<String>>,
}

impl Default for ExecState {
    fn default() -> Self {
        Self {
            limits: StdCell::new(RuntimeLimits::default()),
            depth: StdCell::new(0),
            ops: StdCell::new(0),
            tracer: RefCell::new(Box::new(NoopTracer)),
            output: RefCell::new(None),
        }
    }
}

thread_local! {
    static STATE: ExecState = ExecState::default();
}

/// Frame bookkeeping released when a Python-level frame finishes.
pub(crate) struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        STATE.with(|state| {
            let depth = state.depth.get().saturating_sub(1);
            state.depth.set(depth);
            state.tracer.borrow_mut().on_return(depth);
        });
    }
}

/// Pushes a frame, enforcing the recursion limit.
pub(crate) fn enter_frame(name: &str) -> RunResult<FrameGuard> {
    STATE.with(|state| {
        let depth = state.depth.get() + 1;
        let limit = state.limits.get().max_recursion_depth;
        if depth > limit {
            return Err(RunError::from(ResourceError::Recursion { limit, depth }));
        }
        state.depth.set(depth);
        state.tracer.borrow_mut().on_call(name, depth);
        Ok(FrameGuard)
    })
}

/// Counts one executed op, enforcing the operation budget.
#[inline]
pub(crate) fn count_op(index: usize, op: &'static str, stack_depth: usize) -> RunResult<()> {
    STATE.with(|state| {
        let count = state.ops.get() + 1;
        state.ops.set(count);
        if let Some(limit) = state.limits.get().max_operations
            && count > limit
        {
            return Err(RunError::from(ResourceError::Operation { limit, count }));
        }
        state.tracer.borrow_mut().on_op(index, op, stack_depth, state.depth.get());
        Ok(())
    })
}

pub(crate) fn trace_yield(function: &str) {
    STATE.with(|state| state.tracer.borrow_mut().on_yield(function));
}

pub(crate) fn trace_resume(function: &str) {
    STATE.with(|state| state.tracer.borrow_mut().on_resume(function));
}

pub(crate) fn trace_unwind(exception: &str, handled: bool) {
    STATE.with(|state| state.tracer.borrow_mut().on_unwind(exception, handled));
}

/// Writes `print` output to the capture buffer, or stdout without one.
pub(crate) fn write_output(text: &str) {
    STATE.with(|state| match state.output.borrow_mut().as_mut() {
        Some(buffer) => buffer.push_str(text),
        None => print!("{text}"),
    });
}

/// Entry point for running compiled functions.
///
/// Owns the resource limits and tracer for the calls made through it.
#[derive(Debug)]
pub struct Runtime {
    limits: RuntimeLimits,
    tracer: Box<dyn VmTracer>,
    output: Option<String>,
}

impl Runtime {
    #[must_use]
    pub fn new(limits: RuntimeLimits) -> Self {
        Self::with_tracer(limits, NoopTracer)
    }

    #[must_use]
    pub fn with_tracer(limits: RuntimeLimits, tracer: impl VmTracer) -> Self {
        Self {
            limits,
            tracer: Box::new(tracer),
            output: None,
        }
    }

    /// Collects `print` output in memory instead of writing it to stdout.
    #[must_use]
    pub fn capture_output(mut self) -> Self {
        self.output = Some(String::new());
        self
    }

    /// Output captured so far, if capturing.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Drains captured output.
    pub fn take_output(&mut self) -> String {
        self.output.as_mut().map(mem::take).unwrap_or_default()
    }

    #[must_use]
    pub fn limits(&self) -> RuntimeLimits {
        self.limits
    }

    /// The tracer, if it has type `T`.
    #[must_use]
    pub fn tracer<T: VmTracer>(&self) -> Option<&T> {
        self.tracer.as_any().downcast_ref::<T>()
    }

    /// Calls any callable value: a compiled function, class, builtin or
    /// bound method.
    pub fn call(&mut self, callable: &Value, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
        let saved = self.install();
        let result = call::call(callable, args, kwargs);
        self.restore(saved);
        if let Err(RunError::Internal(message)) = &result {
            tracing::error!(%message, "executor invariant broken");
        }
        result
    }

    /// Resumes a generator with `next()`, under this runtime's limits.
    pub fn next(&mut self, generator: &Generator) -> RunResult<Value> {
        let saved = self.install();
        let result = generator.next();
        self.restore(saved);
        result
    }

    fn install(&mut self) -> ExecState {
        STATE.with(|state| ExecState {
            limits: StdCell::new(state.limits.replace(self.limits)),
            depth: StdCell::new(state.depth.replace(0)),
            ops: StdCell::new(state.ops.replace(0)),
            tracer: RefCell::new(mem::replace(
                &mut *state.tracer.borrow_mut(),
                mem::replace(&mut self.tracer, Box::new(NoopTracer)),
            )),
            output: RefCell::new(mem::replace(&mut *state.output.borrow_mut(), self.output.take())),
        })
    }

    fn restore(&mut self, saved: ExecState) {
        STATE.with(|state| {
            state.limits.set(saved.limits.get());
            state.depth.set(saved.depth.get());
            state.ops.set(saved.ops.get());
            self.tracer = mem::replace(&mut *state.tracer.borrow_mut(), saved.tracer.into_inner());
            self.output = mem::replace(&mut *state.output.borrow_mut(), saved.output.into_inner());
        });
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeLimits::default())
    }
}
