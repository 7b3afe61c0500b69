//! Function and class assembly: the translation pipeline end to end.
//!
//! A function descriptor goes through [`decode`], [`handlers_for`],
//! [`FlowGraph::build`] and [`analyze`]; each reachable instruction is then
//! emitted with the state the analysis proved for it. Nested code objects in
//! the constant pool are translated along with their parent, so a
//! [`CompiledCode`] is self-contained.
//!
//! ```
//! use pyflow::{FunctionDescriptor, PythonVersion, TranslateConfig, assembly, codegen::Op, types::NoHints};
//!
//! let add = FunctionDescriptor::builder("add", PythonVersion::V3_11)
//!     .params(&["a", "b"])
//!     .annotation("a", "int")
//!     .annotation("b", "int")
//!     .op("RESUME", 0)
//!     .op("LOAD_FAST", 0)
//!     .op("LOAD_FAST", 1)
//!     .op("BINARY_OP", 0)
//!     .caches(1)
//!     .op("RETURN_VALUE", 0)
//!     .build();
//! let code = assembly::translate_function(&add, &TranslateConfig::default(), &NoHints).unwrap();
//! assert!(code.ops.iter().any(|op| matches!(op, Op::BinaryDirect { .. })));
//! ```

use std::sync::Arc;

use ahash::AHashMap;
use indexmap::IndexMap;
use rayon::prelude::*;

use crate::{
    analysis::{Binding, FlowGraph, StackMetadata, SymbolicValue, analyze},
    bytecode::{BaseRef, ClassDescriptor, Constant, FunctionDescriptor, decode},
    codegen::{CompiledCode, CompiledConstant, Emitter},
    config::TranslateConfig,
    error::{TranslateError, TranslateResult},
    opcodes::{EmitContext, FlowContext, handlers_for},
    types::{ClassType, MethodSignature, PyType, SignatureType, TypeHints, TypeRegistry},
};

/// How a class member is bound when looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Instance,
    Static,
    Class,
}

#[derive(Debug, Clone)]
pub struct CompiledMethod {
    pub name: String,
    pub kind: MethodKind,
    pub code: Arc<CompiledCode>,
}

/// A translated class body.
///
/// Turned into a runtime class by [`Globals::define_class`](crate::runtime::Globals::define_class),
/// and usable as a base of later classes through [`BaseRef::Class`].
#[derive(Debug, Clone)]
pub struct CompiledClass {
    pub class_type: Arc<ClassType>,
    pub bases: Vec<BaseRef>,
    pub static_attributes: Vec<(String, Constant)>,
    pub methods: Vec<CompiledMethod>,
}

impl CompiledClass {
    #[must_use]
    pub fn name(&self) -> &str {
        self.class_type.name()
    }

    #[must_use]
    pub fn method(&self, name: &str) -> Option<&CompiledMethod> {
        self.methods.iter().find(|method| method.name == name)
    }
}

/// What the first parameter of a function is bound to.
#[derive(Debug, Clone, Copy)]
enum Receiver<'a> {
    None,
    Instance(&'a Arc<ClassType>),
    Class(&'a Arc<ClassType>),
}

/// Translates one function, and every function nested in its constants.
///
/// Errors name the innermost function that failed.
pub fn translate_function(
    descriptor: &FunctionDescriptor,
    config: &TranslateConfig,
    hints: &dyn TypeHints,
) -> TranslateResult<Arc<CompiledCode>> {
    translate(descriptor, config, hints, Receiver::None, &[])
}

fn translate(
    descriptor: &FunctionDescriptor,
    config: &TranslateConfig,
    hints: &dyn TypeHints,
    receiver: Receiver<'_>,
    known: &[Arc<ClassType>],
) -> TranslateResult<Arc<CompiledCode>> {
    let name = descriptor.display_name();
    compile(descriptor, config, hints, receiver, known)
        .map(Arc::new)
        .map_err(|err| err.in_function(name))
}

fn compile(
    descriptor: &FunctionDescriptor,
    config: &TranslateConfig,
    hints: &dyn TypeHints,
    receiver: Receiver<'_>,
    known: &[Arc<ClassType>],
) -> TranslateResult<CompiledCode> {
    let constants = descriptor
        .constants
        .iter()
        .map(|constant| match constant {
            Constant::Code(inner) => translate(inner, config, hints, Receiver::None, known).map(CompiledConstant::Code),
            other => Ok(CompiledConstant::Value(other.clone())),
        })
        .collect::<TranslateResult<Vec<_>>>()?;

    let instructions = decode(descriptor.version, &descriptor.instructions)?;
    let handlers = handlers_for(instructions, descriptor)?;
    let mut graph = FlowGraph::build(handlers)?;
    tracing::debug!(
        function = descriptor.display_name(),
        blocks = graph.blocks().len(),
        jump_sources = graph.jump_source_count(),
        "built flow graph"
    );

    let ctx = FlowContext {
        descriptor,
        registry: TypeRegistry::global(),
        hints,
        config,
    };
    let flow = analyze(&mut graph, &ctx, entry_state(descriptor, receiver, known))?;
    tracing::debug!(function = descriptor.display_name(), passes = flow.passes, "type flow converged");

    let mut emitter = Emitter::new(graph.instruction_count());
    for block in graph.blocks() {
        for handler in block.handlers() {
            let offset = handler.offset();
            let Some(incoming) = flow.at(offset) else {
                continue;
            };
            emitter.begin_instruction(offset, incoming.depth());
            handler.emit(
                &mut EmitContext {
                    flow: &ctx,
                    emitter: &mut emitter,
                },
                incoming,
            )?;
        }
    }
    let emitted = emitter.finish()?;

    let code = CompiledCode {
        name: descriptor.name.clone(),
        qualname: descriptor.qualname.clone(),
        version: descriptor.version,
        argcount: descriptor.argcount,
        posonlyargcount: descriptor.posonlyargcount,
        kwonlyargcount: descriptor.kwonlyargcount,
        flags: descriptor.flags,
        varnames: descriptor.varnames.clone(),
        cellvars: descriptor.cellvars.clone(),
        freevars: descriptor.freevars.clone(),
        names: descriptor.names.clone(),
        constants,
        ops: emitted.ops,
        op_offsets: emitted.op_offsets,
        resume_points: emitted.resume_points,
        max_stack_depth: emitted.max_stack_depth,
    };
    tracing::debug!(
        function = code.display_name(),
        ops = code.ops.len(),
        specialized = code.specialized_count(),
        "emitted function"
    );
    Ok(code)
}

/// State on entry: parameters bound (typed by annotation, or by the
/// receiver for methods), other locals unbound, free variables bound.
fn entry_state(descriptor: &FunctionDescriptor, receiver: Receiver<'_>, known: &[Arc<ClassType>]) -> StackMetadata {
    let params = descriptor.total_params().min(descriptor.varnames.len());
    let varargs_slot = descriptor
        .flags
        .varargs
        .then_some(descriptor.argcount + descriptor.kwonlyargcount);
    let varkeywords_slot = descriptor
        .flags
        .varkeywords
        .then(|| descriptor.argcount + descriptor.kwonlyargcount + usize::from(descriptor.flags.varargs));

    let param_type = |slot: usize| -> PyType {
        if slot == 0 && descriptor.argcount > 0 {
            match receiver {
                Receiver::Instance(class) => return PyType::Instance(class.clone()),
                Receiver::Class(class) => return PyType::Class(class.clone()),
                Receiver::None => {}
            }
        }
        if Some(slot) == varargs_slot {
            return PyType::Tuple;
        }
        if Some(slot) == varkeywords_slot {
            return PyType::Dict;
        }
        descriptor
            .annotations
            .get(&descriptor.varnames[slot])
            .map_or(PyType::Object, |annotation| PyType::from_annotation(annotation, known))
    };

    let locals = (0..descriptor.varnames.len())
        .map(|slot| {
            if slot < params {
                Binding::Bound(SymbolicValue::new(param_type(slot)))
            } else {
                Binding::Unbound
            }
        })
        .collect();
    let cells = descriptor
        .cellvars
        .iter()
        .map(|cell| match descriptor.varnames[..params].iter().position(|p| p == cell) {
            Some(slot) => Binding::Bound(SymbolicValue::new(param_type(slot))),
            None => Binding::Unbound,
        })
        .chain(descriptor.freevars.iter().map(|_| Binding::Bound(SymbolicValue::object())))
        .collect();
    let state = StackMetadata::new(locals, cells);
    // Block-stack generators start with the first sent value, popped by GEN_START.
    if descriptor.flags.generator && descriptor.version.has_block_stack() {
        state.push(SymbolicValue::new(PyType::NoneType))
    } else {
        state
    }
}

/// Translates a class: builds its static type from the bases and the
/// operator methods it declares, then translates every member with `self`
/// (or `cls`) typed as the new class.
pub fn translate_class(
    descriptor: &ClassDescriptor,
    config: &TranslateConfig,
    hints: &dyn TypeHints,
) -> TranslateResult<CompiledClass> {
    let mut base_types = Vec::new();
    let mut known = Vec::new();
    for base in &descriptor.bases {
        match base {
            BaseRef::Class(compiled) => {
                base_types.push(PyType::Instance(compiled.class_type.clone()));
                collect_known(compiled, &mut known);
            }
            BaseRef::Builtin(name) if name == "object" => {}
            BaseRef::Builtin(name) => match name.parse() {
                Ok(kind) => base_types.push(PyType::Exception(kind)),
                Err(_) => {
                    return Err(TranslateError::InvalidClass {
                        class: descriptor.name.clone(),
                        detail: format!("unsupported base class {name}"),
                    });
                }
            },
        }
    }

    let mut attributes: IndexMap<String, PyType> = IndexMap::new();
    for (name, annotation) in &descriptor.annotations {
        attributes.insert(name.clone(), PyType::from_annotation(annotation, &known));
    }
    for (name, value) in &descriptor.static_attributes {
        attributes.entry(name.clone()).or_insert_with(|| PyType::of_constant(value));
    }

    let operators = descriptor
        .instance_methods
        .iter()
        .filter(|method| method.name.starts_with("__") && method.name.ends_with("__"))
        .map(|method| (method.name.clone(), method_signature(method, &descriptor.name, &known)))
        .collect::<AHashMap<_, _>>();

    let class_type = ClassType::new(descriptor.name.as_str(), base_types, operators, attributes)
        .map(Arc::new)
        .map_err(|detail| TranslateError::InvalidClass {
            class: descriptor.name.clone(),
            detail,
        })?;
    known.push(class_type.clone());

    let members = descriptor
        .instance_methods
        .iter()
        .map(|m| (m, MethodKind::Instance, Receiver::Instance(&class_type)))
        .chain(descriptor.static_methods.iter().map(|m| (m, MethodKind::Static, Receiver::None)))
        .chain(descriptor.class_methods.iter().map(|m| (m, MethodKind::Class, Receiver::Class(&class_type))));
    let mut methods = Vec::new();
    for (method, kind, receiver) in members {
        let code = translate(method, config, hints, receiver, &known)?;
        methods.push(CompiledMethod {
            name: method.name.clone(),
            kind,
            code,
        });
    }
    tracing::debug!(
        class = descriptor.name.as_str(),
        methods = methods.len(),
        mro = ?class_type.mro(),
        "translated class"
    );

    Ok(CompiledClass {
        class_type,
        bases: descriptor.bases.clone(),
        static_attributes: descriptor.static_attributes.clone(),
        methods,
    })
}

fn collect_known(compiled: &CompiledClass, known: &mut Vec<Arc<ClassType>>) {
    if known.iter().any(|class| class.id() == compiled.class_type.id()) {
        return;
    }
    known.push(compiled.class_type.clone());
    for base in &compiled.bases {
        if let BaseRef::Class(base) = base {
            collect_known(base, known);
        }
    }
}

/// Operator signature from a method's annotations, without `self`.
fn method_signature(method: &FunctionDescriptor, class: &str, known: &[Arc<ClassType>]) -> MethodSignature {
    let signature_type = |annotation: Option<&String>| match annotation {
        None => SignatureType::Any,
        Some(annotation) if annotation.trim_matches(|c| c == '\'' || c == '"') == class => SignatureType::OwnClass,
        Some(annotation) => match PyType::from_annotation(annotation, known) {
            PyType::Object => SignatureType::Any,
            ty => SignatureType::Known(ty),
        },
    };
    let params = method
        .varnames
        .iter()
        .take(method.argcount)
        .skip(1)
        .map(|param| signature_type(method.annotations.get(param)))
        .collect();
    MethodSignature {
        params,
        result: signature_type(method.annotations.get("return")),
    }
}

/// Translates independent functions in parallel.
///
/// Results are in input order; a failure only affects its own entry.
pub fn translate_batch(
    descriptors: &[FunctionDescriptor],
    config: &TranslateConfig,
    hints: &(dyn TypeHints + Sync),
) -> Vec<TranslateResult<Arc<CompiledCode>>> {
    // Build the registry before fanning out so workers only read it.
    let _ = TypeRegistry::global();
    let run = || -> Vec<TranslateResult<Arc<CompiledCode>>> {
        descriptors
            .par_iter()
            .map(|descriptor| translate_function(descriptor, config, hints))
            .collect()
    };
    match config.parallelism {
        Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(run),
            Err(err) => {
                tracing::warn!(%err, threads, "could not build translation pool, using the global pool");
                run()
            }
        },
        None => run(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{types::NoHints, version::PythonVersion};

    #[test]
    fn parameters_are_bound_from_annotations() {
        let desc = FunctionDescriptor::builder("f", PythonVersion::V3_11)
            .params(&["a", "b"])
            .varargs("rest")
            .locals(&["tmp"])
            .annotation("a", "int")
            .build();
        let state = entry_state(&desc, Receiver::None, &[]);
        let types: Vec<Option<PyType>> = state
            .locals()
            .iter()
            .map(|binding| binding.value().map(|v| v.ty().clone()))
            .collect();
        assert_eq!(
            types,
            vec![Some(PyType::Int), Some(PyType::Object), Some(PyType::Tuple), None]
        );
    }

    #[test]
    fn errors_name_the_nested_function() {
        let inner = FunctionDescriptor::builder("inner", PythonVersion::V3_11)
            .qualname("outer.<locals>.inner")
            .op("NOT_AN_OPCODE", 0)
            .build();
        let outer = FunctionDescriptor::builder("outer", PythonVersion::V3_11)
            .constants(vec![Constant::Code(Box::new(inner))])
            .op("RESUME", 0)
            .op("LOAD_CONST", 0)
            .op("RETURN_VALUE", 0)
            .build();
        let err = translate_function(&outer, &TranslateConfig::default(), &NoHints).unwrap_err();
        let TranslateError::InFunction { function, .. } = &err else {
            panic!("expected a function name, got {err:?}");
        };
        assert_eq!(function, "outer.<locals>.inner");
        assert!(matches!(err.root(), TranslateError::UnsupportedOpcode { .. }));
    }

    #[test]
    fn unknown_builtin_base_is_rejected() {
        let mut class = ClassDescriptor::new("Weird");
        class.bases.push(BaseRef::Builtin("dict".to_owned()));
        let err = translate_class(&class, &TranslateConfig::default(), &NoHints).unwrap_err();
        assert_eq!(err.to_string(), "cannot create class Weird: unsupported base class dict");
    }
}
