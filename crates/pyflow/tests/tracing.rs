//! Tracer hooks observed through a `Runtime`.

use std::rc::Rc;

use pretty_assertions::assert_eq;
use pyflow::{
    Constant, FunctionDescriptor, PythonVersion, RuntimeLimits, TranslateConfig,
    runtime::{Globals, Runtime, Value},
    tracer::{ProfilingTracer, RecordingTracer, TraceEvent},
    translate_function,
    types::NoHints,
};

fn define(globals: &Rc<Globals>, descriptor: &FunctionDescriptor) -> Value {
    let code = translate_function(descriptor, &TranslateConfig::default(), &NoHints).unwrap();
    Value::Function(globals.define_function(code))
}

/// `def twice(x): return inc(inc(x))` with `def inc(x): return x + 1`.
fn nested_calls(globals: &Rc<Globals>) -> Value {
    let inc = FunctionDescriptor::builder("inc", PythonVersion::V3_10)
        .params(&["x"])
        .constants(vec![Constant::None, Constant::Int(1)])
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 1)
        .op("BINARY_ADD", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let twice = FunctionDescriptor::builder("twice", PythonVersion::V3_10)
        .params(&["x"])
        .names(&["inc"])
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_FAST", 0)
        .op("CALL_FUNCTION", 1)
        .op("CALL_FUNCTION", 1)
        .op("RETURN_VALUE", 0)
        .build();
    define(globals, &inc);
    define(globals, &twice)
}

/// Calls and returns are reported with their frame depth.
#[test]
fn recording_tracer_sees_frames() {
    let globals = Globals::new();
    let twice = nested_calls(&globals);
    let mut runtime = Runtime::with_tracer(RuntimeLimits::default(), RecordingTracer::new());
    assert_eq!(runtime.call(&twice, vec![Value::Int(1)], Vec::new()).unwrap(), Value::Int(3));

    let tracer = runtime.tracer::<RecordingTracer>().unwrap();
    let frames: Vec<&TraceEvent> = tracer
        .events()
        .iter()
        .filter(|event| !matches!(event, TraceEvent::Op { .. }))
        .collect();
    let call = |function: &str, depth| TraceEvent::Call {
        function: function.to_owned(),
        depth,
    };
    assert_eq!(
        frames,
        vec![
            &call("twice", 1),
            &call("inc", 2),
            &TraceEvent::Return { depth: 1 },
            &call("inc", 2),
            &TraceEvent::Return { depth: 1 },
            &TraceEvent::Return { depth: 0 },
        ]
    );
    assert_eq!(tracer.ops().iter().filter(|op| op.starts_with("Binary")).count(), 2);
}

/// The profiler counts every executed op and the deepest frame.
#[test]
fn profiling_tracer_summarizes() {
    let globals = Globals::new();
    let twice = nested_calls(&globals);
    let mut runtime = Runtime::with_tracer(RuntimeLimits::default(), ProfilingTracer::new());
    runtime.call(&twice, vec![Value::Int(1)], Vec::new()).unwrap();

    let report = runtime.tracer::<ProfilingTracer>().unwrap().report();
    assert_eq!(report.total_calls, 3);
    assert_eq!(report.max_depth, 2);
    let counted: u64 = report.op_counts.iter().map(|(_, count)| count).sum();
    assert_eq!(counted, report.total_ops);
    assert!(report.to_string().starts_with("=== Execution Profile ==="));
}

/// Handled and unhandled unwinds are distinguished.
#[test]
fn unwinds_are_traced() {
    let fail = FunctionDescriptor::builder("fail", PythonVersion::V3_10)
        .params(&["x"])
        .constants(vec![Constant::None, Constant::Int(0)])
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 1)
        .op("BINARY_TRUE_DIVIDE", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let globals = Globals::new();
    let function = define(&globals, &fail);
    let mut runtime = Runtime::with_tracer(RuntimeLimits::default(), RecordingTracer::new());
    runtime.call(&function, vec![Value::Int(1)], Vec::new()).unwrap_err();

    let tracer = runtime.tracer::<RecordingTracer>().unwrap();
    assert!(tracer.events().contains(&TraceEvent::Unwind {
        exception: "ZeroDivisionError".to_owned(),
        handled: false,
    }));
}
