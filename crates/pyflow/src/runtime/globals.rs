//! Module globals, embedder-registered modules and runtime class creation.

use std::{cell::RefCell, fmt, rc::Rc, sync::Arc};

use ahash::{AHashMap, RandomState};
use indexmap::IndexMap;

use super::{class::ClassObject, function::Function, value::Value};
use crate::{
    assembly::{CompiledClass, MethodKind},
    bytecode::BaseRef,
    codegen::CompiledCode,
    exception::{ExcType, RunError, RunResult},
    types::{Builtin, PyType, TypeHints},
};

type Namespace = IndexMap<String, Value, RandomState>;

/// A module made available to `import` by the embedder.
pub struct Module {
    name: String,
    attrs: RefCell<Namespace>,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: RefCell::default(),
        }
    }

    #[must_use]
    pub fn with_attr(self, name: &str, value: impl Into<Value>) -> Self {
        self.set_attr(name, value.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }

    pub fn set_attr(&self, name: &str, value: Value) {
        self.attrs.borrow_mut().insert(name.to_owned(), value);
    }

    /// `from module import name`.
    pub(crate) fn import_from(&self, name: &str) -> RunResult<Value> {
        self.attr(name).ok_or_else(|| {
            ExcType::ImportError.error(format!("cannot import name '{name}' from '{}'", self.name))
        })
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<module '{}'>", self.name)
    }
}

/// Modules importable from generated code, keyed by dotted name.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: RefCell<AHashMap<String, Rc<Module>>>,
}

impl ModuleRegistry {
    /// Makes `module` importable under its own name.
    pub fn register(&self, module: Module) -> Rc<Module> {
        let module = Rc::new(module);
        self.modules.borrow_mut().insert(module.name.clone(), module.clone());
        module
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Rc<Module>> {
        self.modules.borrow().get(name).cloned()
    }

    /// `import name`.
    pub(crate) fn import(&self, name: &str) -> RunResult<Rc<Module>> {
        self.get(name)
            .ok_or_else(|| ExcType::ModuleNotFoundError.error(format!("No module named '{name}'")))
    }
}

/// The global namespace shared by the functions of one module.
///
/// Name lookups that miss fall back to the builtins, as `LOAD_GLOBAL` does.
#[derive(Default)]
pub struct Globals {
    names: RefCell<Namespace>,
    modules: ModuleRegistry,
    /// Runtime classes by static class id, so shared bases are built once.
    classes: RefCell<AHashMap<u64, Rc<ClassObject>>>,
}

impl Globals {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.names.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.names.borrow_mut().insert(name.to_owned(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.names.borrow_mut().shift_remove(name)
    }

    #[must_use]
    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Global, then builtin, lookup of `name`.
    pub(crate) fn load(&self, name: &str) -> RunResult<Value> {
        if let Some(value) = self.get(name) {
            return Ok(value);
        }
        if let Some(builtin) = Builtin::from_name(name) {
            return Ok(Value::Builtin(builtin));
        }
        match name.parse::<ExcType>() {
            Ok(kind) => Ok(Value::ExcClass(kind)),
            Err(_) => Err(ExcType::name_error(name)),
        }
    }

    /// Wraps `code` in a function over these globals and binds it under
    /// the function's name.
    pub fn define_function(self: &Rc<Self>, code: Arc<CompiledCode>) -> Rc<Function> {
        let name = code.name.clone();
        let function = Rc::new(Function::new(code, self.clone()));
        self.set(&name, Value::Function(function.clone()));
        function
    }

    /// Creates the runtime class for `compiled`, along with any user-class
    /// bases not created yet, and binds it under the class name.
    pub fn define_class(self: &Rc<Self>, compiled: &CompiledClass) -> RunResult<Rc<ClassObject>> {
        let class = self.class_object(compiled)?;
        self.set(class.name(), Value::Class(class.clone()));
        Ok(class)
    }

    fn class_object(self: &Rc<Self>, compiled: &CompiledClass) -> RunResult<Rc<ClassObject>> {
        let id = compiled.class_type.id();
        if let Some(existing) = self.classes.borrow().get(&id) {
            return Ok(existing.clone());
        }
        let mut bases = Vec::new();
        for base in &compiled.bases {
            if let BaseRef::Class(base) = base {
                bases.push(self.class_object(base)?);
            }
        }
        let mut attrs = IndexMap::with_hasher(RandomState::new());
        for (name, constant) in &compiled.static_attributes {
            attrs.insert(name.clone(), Value::from_constant(constant));
        }
        for method in &compiled.methods {
            let function = Rc::new(Function::new(method.code.clone(), self.clone()));
            let value = match method.kind {
                MethodKind::Instance => Value::Function(function),
                MethodKind::Static => Value::StaticMethod(function),
                MethodKind::Class => Value::ClassMethod(function),
            };
            attrs.insert(method.name.clone(), value);
        }
        let class = Rc::new(ClassObject::new(compiled.class_type.clone(), bases, attrs)?);
        self.classes.borrow_mut().insert(id, class.clone());
        tracing::debug!(class = class.name(), "created runtime class");
        Ok(class)
    }

    /// A runtime class created earlier by [`Globals::define_class`].
    pub fn class(&self, compiled: &CompiledClass) -> RunResult<Rc<ClassObject>> {
        self.classes
            .borrow()
            .get(&compiled.class_type.id())
            .cloned()
            .ok_or_else(|| RunError::internal(format!("class {} was never defined", compiled.class_type.name())))
    }
}

impl fmt::Debug for Globals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Globals")
            .field("names", &self.names.borrow().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Globals bound before translation give the analyzer their types.
impl TypeHints for Globals {
    fn global_type(&self, name: &str) -> Option<PyType> {
        let ty = match self.get(name)? {
            Value::None => PyType::NoneType,
            Value::Bool(_) => PyType::Bool,
            Value::Int(_) | Value::Long(_) => PyType::Int,
            Value::Float(_) => PyType::Float,
            Value::Str(_) => PyType::Str,
            Value::Function(_) => PyType::Function,
            Value::Builtin(builtin) => PyType::Builtin(builtin),
            Value::ExcClass(kind) => PyType::ExceptionClass(kind),
            Value::Class(class) => PyType::Class(class.class_type().clone()),
            Value::Module(_) => PyType::Module,
            _ => PyType::Object,
        };
        Some(ty)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_names_fall_back_to_builtins() {
        let globals = Globals::new();
        assert!(matches!(globals.load("len").unwrap(), Value::Builtin(Builtin::Len)));
        assert!(matches!(
            globals.load("KeyError").unwrap(),
            Value::ExcClass(ExcType::KeyError)
        ));
        let err = globals.load("nope").unwrap_err();
        assert_eq!(err.to_string(), "NameError: name 'nope' is not defined");
    }

    #[test]
    fn globals_shadow_builtins() {
        let globals = Globals::new();
        globals.set("len", Value::Int(3));
        assert_eq!(globals.load("len").unwrap().as_int(), Some(3));
        assert_eq!(globals.global_type("len"), Some(PyType::Int));
        globals.remove("len");
        assert_eq!(globals.global_type("len"), None);
    }

    #[test]
    fn unknown_modules_are_not_found() {
        let globals = Globals::new();
        globals.modules().register(Module::new("config").with_attr("DEBUG", true));
        let module = globals.modules().import("config").unwrap();
        assert!(matches!(module.import_from("DEBUG").unwrap(), Value::Bool(true)));
        let err = module.import_from("TRACE").unwrap_err();
        assert_eq!(err.to_string(), "ImportError: cannot import name 'TRACE' from 'config'");
        let err = globals.modules().import("missing").unwrap_err();
        assert_eq!(err.to_string(), "ModuleNotFoundError: No module named 'missing'");
    }
}
