//! User-defined classes and their instances.

use std::{cell::RefCell, fmt, rc::Rc, sync::Arc};

use ahash::RandomState;
use indexmap::IndexMap;

use super::{
    Kwargs, call,
    function::BoundMethod,
    value::Value,
};
use crate::{
    exception::{ExcType, PyException, RunError, RunResult},
    types::{ClassType, PyType},
};

type Attrs = IndexMap<String, Value, RandomState>;

/// A class object created from a compiled class.
pub struct ClassObject {
    class_type: Arc<ClassType>,
    bases: Vec<Rc<ClassObject>>,
    /// User-class ancestors in resolution order, excluding the class itself.
    mro: Vec<Rc<ClassObject>>,
    attrs: RefCell<Attrs>,
}

impl ClassObject {
    /// Creates the runtime class for `class_type`. `bases` must be the
    /// runtime classes of the user-class bases of `class_type`, in order.
    pub fn new(class_type: Arc<ClassType>, bases: Vec<Rc<Self>>, attrs: Attrs) -> RunResult<Self> {
        let mut mro = Vec::new();
        for ancestor in class_type.mro() {
            let PyType::Instance(ancestor) = ancestor else {
                continue;
            };
            let found = bases
                .iter()
                .flat_map(|base| std::iter::once(base).chain(base.mro.iter()))
                .find(|candidate| candidate.class_type.id() == ancestor.id())
                .ok_or_else(|| {
                    RunError::internal(format!(
                        "class {} lists ancestor {} without its runtime class",
                        class_type.name(),
                        ancestor.name()
                    ))
                })?;
            mro.push(found.clone());
        }
        Ok(Self {
            class_type,
            bases,
            mro,
            attrs: RefCell::new(attrs),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.class_type.name()
    }

    #[must_use]
    pub fn class_type(&self) -> &Arc<ClassType> {
        &self.class_type
    }

    #[must_use]
    pub fn bases(&self) -> &[Rc<Self>] {
        &self.bases
    }

    /// The builtin exception kind this class derives from, if any.
    #[must_use]
    pub fn exc_base(&self) -> Option<ExcType> {
        self.class_type.exception_base()
    }

    /// True if `self` is `other` or inherits from it.
    #[must_use]
    pub fn is_subclass_of(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.mro.iter().any(|ancestor| std::ptr::eq(&**ancestor, other))
    }

    /// Looks `name` up along the method resolution order.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.attrs.borrow().get(name) {
            return Some(value.clone());
        }
        self.mro.iter().find_map(|ancestor| ancestor.attrs.borrow().get(name).cloned())
    }

    pub fn set_attr(&self, name: &str, value: Value) {
        self.attrs.borrow_mut().insert(name.to_owned(), value);
    }

    fn del_attr(&self, name: &str) -> bool {
        self.attrs.borrow_mut().shift_remove(name).is_some()
    }
}

impl fmt::Debug for ClassObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name())
    }
}

/// An instance of a user-defined class.
pub struct Instance {
    class: Rc<ClassObject>,
    attrs: RefCell<Attrs>,
}

impl Instance {
    #[must_use]
    pub fn new(class: Rc<ClassObject>) -> Self {
        Self {
            class,
            attrs: RefCell::default(),
        }
    }

    #[must_use]
    pub fn class(&self) -> &Rc<ClassObject> {
        &self.class
    }

    /// An instance attribute, ignoring the class.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object>", self.class.name())
    }
}

/// The user class behind a value, for instances and user exceptions.
pub(crate) fn user_class(value: &Value) -> Option<&Rc<ClassObject>> {
    match value {
        Value::Instance(instance) => Some(&instance.class),
        Value::Exception(exc) => exc.class(),
        _ => None,
    }
}

/// Applies descriptor binding to a class attribute read through `receiver`.
fn bind(attr: Value, receiver: &Value, class: &Rc<ClassObject>) -> Value {
    match attr {
        Value::Function(function) => Value::BoundMethod(Rc::new(BoundMethod::new(receiver.clone(), function))),
        Value::StaticMethod(function) => Value::Function(function),
        Value::ClassMethod(function) => {
            Value::BoundMethod(Rc::new(BoundMethod::new(Value::Class(class.clone()), function)))
        }
        other => other,
    }
}

/// Calls the special method `name` of a user object. `Ok(None)` when the
/// value is not a user object or its class does not define the method.
pub(crate) fn call_dunder(value: &Value, name: &str, args: Vec<Value>) -> RunResult<Option<Value>> {
    let Some(class) = user_class(value) else {
        return Ok(None);
    };
    let Some(attr) = class.lookup(name) else {
        return Ok(None);
    };
    let method = bind(attr, value, class);
    call::call(&method, args, Vec::new()).map(Some)
}

/// True if the user object's class defines `name`.
pub(crate) fn has_dunder(value: &Value, name: &str) -> bool {
    user_class(value).is_some_and(|class| class.lookup(name).is_some())
}

/// Attribute read on an instance or user exception.
pub(crate) fn instance_getattr(value: &Value, name: &str) -> RunResult<Option<Value>> {
    let Some(class) = user_class(value) else {
        return Ok(None);
    };
    if name == "__class__" {
        return Ok(Some(Value::Class(class.clone())));
    }
    let own = match value {
        Value::Instance(instance) => instance.attr(name),
        Value::Exception(exc) => exc.attr(name),
        _ => None,
    };
    if let Some(own) = own {
        return Ok(Some(own));
    }
    if let Some(attr) = class.lookup(name) {
        return Ok(Some(bind(attr, value, class)));
    }
    if let Some(fallback) = class.lookup("__getattr__") {
        let method = bind(fallback, value, class);
        return call::call(&method, vec![Value::from(name)], Vec::new()).map(Some);
    }
    Ok(None)
}

pub(crate) fn instance_setattr(value: &Value, name: &str, attr: Value) -> bool {
    match value {
        Value::Instance(instance) => {
            instance.attrs.borrow_mut().insert(name.to_owned(), attr);
            true
        }
        Value::Exception(exc) if exc.class().is_some() => {
            exc.set_attr(name, attr);
            true
        }
        _ => false,
    }
}

pub(crate) fn instance_delattr(value: &Value, name: &str) -> RunResult<()> {
    let removed = match value {
        Value::Instance(instance) => instance.attrs.borrow_mut().shift_remove(name).is_some(),
        Value::Exception(exc) => exc.del_attr(name),
        _ => false,
    };
    if removed {
        Ok(())
    } else {
        Err(ExcType::attribute_error(&value.type_name(), name))
    }
}

/// Attribute read on a class object.
pub(crate) fn class_getattr(class: &Rc<ClassObject>, name: &str) -> Option<Value> {
    match name {
        "__name__" | "__qualname__" => return Some(Value::from(class.name())),
        "__bases__" => return Some(Value::tuple(class.bases.iter().cloned().map(Value::Class).collect())),
        "__mro__" => {
            let mut mro = vec![Value::Class(class.clone())];
            mro.extend(class.mro.iter().cloned().map(Value::Class));
            return Some(Value::tuple(mro));
        }
        _ => {}
    }
    Some(match class.lookup(name)? {
        Value::StaticMethod(function) => Value::Function(function),
        Value::ClassMethod(function) => {
            Value::BoundMethod(Rc::new(BoundMethod::new(Value::Class(class.clone()), function)))
        }
        other => other,
    })
}

pub(crate) fn class_delattr(class: &ClassObject, name: &str) -> RunResult<()> {
    if class.del_attr(name) {
        Ok(())
    } else {
        Err(ExcType::AttributeError.error(format!("type object '{}' has no attribute '{name}'", class.name())))
    }
}

/// `Class(*args, **kwargs)`: allocates the object and runs `__init__`.
pub(crate) fn instantiate(class: &Rc<ClassObject>, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
    let exc_base = class.exc_base();
    let object = match exc_base {
        Some(kind) => Value::Exception(Rc::new(PyException::of_class(class.clone(), kind, args.clone()))),
        None => Value::Instance(Rc::new(Instance::new(class.clone()))),
    };
    match class.lookup("__init__") {
        Some(init) => {
            let result = call::call(&bind(init, &object, class), args, kwargs)?;
            if !result.is_none() {
                return Err(ExcType::type_error(format!(
                    "__init__() should return None, not '{}'",
                    result.type_name()
                )));
            }
        }
        None if !kwargs.is_empty() && exc_base.is_some() => {
            return Err(ExcType::type_error(format!("{}() takes no keyword arguments", class.name())));
        }
        None if exc_base.is_none() && (!args.is_empty() || !kwargs.is_empty()) => {
            return Err(ExcType::type_error(format!("{}() takes no arguments", class.name())));
        }
        None => {}
    }
    Ok(object)
}

#[cfg(test)]
mod tests {
    use ahash::AHashMap;
    use pretty_assertions::assert_eq;

    use super::*;

    fn class(name: &str, bases: Vec<Rc<ClassObject>>) -> Rc<ClassObject> {
        let base_types = bases
            .iter()
            .map(|base| PyType::Instance(base.class_type().clone()))
            .collect();
        let class_type = Arc::new(ClassType::new(name, base_types, AHashMap::new(), IndexMap::new()).unwrap());
        Rc::new(ClassObject::new(class_type, bases, Attrs::default()).unwrap())
    }

    #[test]
    fn lookup_follows_linearization() {
        let a = class("A", vec![]);
        a.set_attr("x", Value::Int(1));
        let b = class("B", vec![a.clone()]);
        let c = class("C", vec![a.clone()]);
        c.set_attr("x", Value::Int(2));
        let d = class("D", vec![b.clone(), c.clone()]);
        assert_eq!(d.lookup("x").and_then(|v| v.as_int()), Some(2));
        assert!(d.is_subclass_of(&a));
        assert!(!a.is_subclass_of(&d));
    }

    #[test]
    fn instances_reject_arguments_without_init() {
        let point = class("Point", vec![]);
        let err = instantiate(&point, vec![Value::Int(1)], Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: Point() takes no arguments");
        let value = instantiate(&point, Vec::new(), Vec::new()).unwrap();
        assert!(instance_setattr(&value, "x", Value::Int(3)));
        assert_eq!(instance_getattr(&value, "x").unwrap().and_then(|v| v.as_int()), Some(3));
    }
}
