//! Execution tracing for generated code.
//!
//! The executor reports key events to a [`VmTracer`]: op dispatch, frame
//! push and pop, generator suspension, and exception unwinding. Every hook has
//! a no-op default, so implementations override only what they need.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Does nothing (the default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`ProfilingTracer`] | Op frequency counters and call depth tracking |
//! | [`RecordingTracer`] | Full event recording for post-mortem inspection |
//!
//! ```
//! use pyflow::{Runtime, RuntimeLimits, tracer::RecordingTracer};
//!
//! let runtime = Runtime::with_tracer(RuntimeLimits::default(), RecordingTracer::new());
//! assert_eq!(runtime.tracer::<RecordingTracer>().map(|t| t.event_count()), Some(0));
//! ```

use std::{any::Any, fmt::Debug};

use ahash::AHashMap;

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An op is about to run.
    Op {
        /// Index of the op in its function's op list.
        index: usize,
        op: &'static str,
        /// Operand stack depth of the current frame.
        stack_depth: usize,
    },
    /// A Python-level call pushed a frame.
    Call { function: String, depth: usize },
    /// A frame returned normally.
    Return { depth: usize },
    /// A generator suspended at a yield.
    Yield { function: String },
    /// A suspended generator was re-entered.
    Resume { function: String },
    /// An exception is unwinding through a frame.
    Unwind {
        exception: String,
        /// True if a handler in this frame takes over.
        handled: bool,
    },
}

/// Hook points of the executor.
///
/// Tracers are stored as trait objects by [`Runtime`](crate::Runtime), so
/// `as_any` lets embedders get their concrete tracer back after a run.
pub trait VmTracer: Debug + Any {
    /// Called before each op. This is the hottest hook.
    #[inline(always)]
    fn on_op(&mut self, _index: usize, _op: &'static str, _stack_depth: usize, _frame_depth: usize) {}

    /// Called when a frame is pushed, with the call depth after the push.
    #[inline(always)]
    fn on_call(&mut self, _function: &str, _depth: usize) {}

    /// Called when a frame returns, with the call depth after the pop.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_yield(&mut self, _function: &str) {}

    #[inline(always)]
    fn on_resume(&mut self, _function: &str) {}

    /// Called when an exception reaches a frame's handler table.
    #[inline(always)]
    fn on_unwind(&mut self, _exception: &str, _handled: bool) {}

    fn as_any(&self) -> &dyn Any;
}

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Prints a human-readable execution log to stderr.
///
/// ```text
/// [    0] LoadLocal  stack=0  frames=1
///   >>> CALL square             depth=2
///   <<< RETURN              depth=1
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Stop after this many ops; `None` is unlimited.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracer that goes quiet after `limit` ops, for tracing the start of
    /// long loops.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl VmTracer for StderrTracer {
    fn on_op(&mut self, index: usize, op: &'static str, stack_depth: usize, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{index:>5}] {op}  stack={stack_depth}  frames={frame_depth}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} ops) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, function: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL {function:<20} depth={depth}");
        }
    }

    fn on_return(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN              depth={depth}");
        }
    }

    fn on_yield(&mut self, function: &str) {
        if !self.stopped {
            eprintln!("  ... YIELD {function}");
        }
    }

    fn on_resume(&mut self, function: &str) {
        if !self.stopped {
            eprintln!("  ... RESUME {function}");
        }
    }

    fn on_unwind(&mut self, exception: &str, handled: bool) {
        if !self.stopped {
            let outcome = if handled { "handled" } else { "propagating" };
            eprintln!("  !!! {exception} ({outcome})");
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Collects execution statistics.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    op_counts: AHashMap<&'static str, u64>,
    total_ops: u64,
    max_depth: usize,
    total_calls: u64,
}

/// Summary produced by [`ProfilingTracer::report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingReport {
    /// Per-op counts, most frequent first.
    pub op_counts: Vec<(&'static str, u64)>,
    pub total_ops: u64,
    pub max_depth: usize,
    pub total_calls: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut op_counts: Vec<_> = self.op_counts.iter().map(|(&k, &v)| (k, v)).collect();
        op_counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        ProfilingReport {
            op_counts,
            total_ops: self.total_ops,
            max_depth: self.max_depth,
            total_calls: self.total_calls,
        }
    }
}

impl VmTracer for ProfilingTracer {
    #[inline]
    fn on_op(&mut self, _index: usize, op: &'static str, _stack_depth: usize, _frame_depth: usize) {
        *self.op_counts.entry(op).or_insert(0) += 1;
        self.total_ops += 1;
    }

    fn on_call(&mut self, _function: &str, depth: usize) {
        self.total_calls += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Execution Profile ===")?;
        writeln!(f, "Total ops:      {}", self.total_ops)?;
        writeln!(f, "Total calls:    {}", self.total_calls)?;
        writeln!(f, "Max call depth: {}", self.max_depth)?;
        for (op, count) in &self.op_counts {
            let pct = (*count as f64 / self.total_ops as f64) * 100.0;
            writeln!(f, "  {op:<20} {count:>10}  ({pct:>5.1}%)")?;
        }
        Ok(())
    }
}

/// Records every event in order.
///
/// The most expensive tracer, since it allocates per event; meant for tests
/// and short runs.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Names of the ops executed, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<&'static str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Op { op, .. } => Some(*op),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|limit| self.events.len() < limit) {
            self.events.push(event);
        }
    }
}

impl VmTracer for RecordingTracer {
    #[inline]
    fn on_op(&mut self, index: usize, op: &'static str, stack_depth: usize, _frame_depth: usize) {
        self.record(TraceEvent::Op {
            index,
            op,
            stack_depth,
        });
    }

    fn on_call(&mut self, function: &str, depth: usize) {
        self.record(TraceEvent::Call {
            function: function.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(TraceEvent::Return { depth });
    }

    fn on_yield(&mut self, function: &str) {
        self.record(TraceEvent::Yield {
            function: function.to_owned(),
        });
    }

    fn on_resume(&mut self, function: &str) {
        self.record(TraceEvent::Resume {
            function: function.to_owned(),
        });
    }

    fn on_unwind(&mut self, exception: &str, handled: bool) {
        self.record(TraceEvent::Unwind {
            exception: exception.to_owned(),
            handled,
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn recording_respects_limit() {
        let mut tracer = RecordingTracer::with_limit(2);
        tracer.on_call("f", 1);
        tracer.on_op(0, "LoadConst", 0, 1);
        tracer.on_op(1, "Return", 1, 1);
        assert_eq!(tracer.event_count(), 2);
        assert_eq!(tracer.ops(), vec!["LoadConst"]);
    }

    #[test]
    fn profile_sorts_by_frequency() {
        let mut tracer = ProfilingTracer::new();
        for op in ["Pop", "LoadConst", "LoadConst"] {
            tracer.on_op(0, op, 0, 1);
        }
        tracer.on_call("f", 3);
        let report = tracer.report();
        assert_eq!(report.op_counts, vec![("LoadConst", 2), ("Pop", 1)]);
        assert_eq!(report.max_depth, 3);
    }
}
