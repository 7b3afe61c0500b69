//! The call protocol.

use std::rc::Rc;

use super::{Kwargs, builtins, class, methods, value::Value};
use crate::exception::{ExcType, PyException, RunResult};

/// `callable(*args, **kwargs)` for every callable kind of value.
pub(crate) fn call(callable: &Value, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
    match callable {
        Value::Function(function) | Value::StaticMethod(function) => function.call(args, kwargs),
        Value::BoundMethod(method) => {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(method.receiver().clone());
            full.extend(args);
            method.function().call(full, kwargs)
        }
        Value::Builtin(builtin) => builtins::call_builtin(*builtin, args, kwargs),
        Value::BuiltinMethod(method) => methods::call_method(method, args, kwargs),
        Value::Class(class) => class::instantiate(class, args, kwargs),
        Value::ExcClass(kind) => {
            if !kwargs.is_empty() {
                return Err(ExcType::type_error(format!("{kind}() takes no keyword arguments")));
            }
            Ok(Value::Exception(Rc::new(PyException::new(*kind, args))))
        }
        Value::Instance(_) if class::has_dunder(callable, "__call__") => {
            match class::instance_getattr(callable, "__call__")? {
                Some(method) => call(&method, args, kwargs),
                None => Err(ExcType::not_callable(&callable.type_name())),
            }
        }
        other => Err(ExcType::not_callable(&other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn exception_classes_construct_instances() {
        let exc = call(&Value::ExcClass(ExcType::ValueError), vec![Value::from("bad")], Vec::new()).unwrap();
        let Value::Exception(exc) = exc else { panic!("expected exception") };
        assert_eq!(exc.message(), "bad");
    }

    #[test]
    fn ints_are_not_callable() {
        let err = call(&Value::Int(1), Vec::new(), Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: 'int' object is not callable");
    }
}
