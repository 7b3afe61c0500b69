//! Runtime function objects and argument binding.

use std::{fmt, rc::Rc, sync::Arc};

use super::{
    Kwargs,
    exec::{self, Frame},
    generator::Generator,
    globals::Globals,
    value::{Cell, Dict, HashKey, Value},
};
use crate::{
    codegen::{CompiledCode, CompiledConstant},
    exception::{ExcType, RunResult},
};

/// A compiled function bound to its globals, defaults and closure.
pub struct Function {
    code: Arc<CompiledCode>,
    globals: Rc<Globals>,
    constants: Rc<[Value]>,
    qualname: String,
    defaults: Vec<Value>,
    kwdefaults: Vec<(String, Value)>,
    closure: Vec<Rc<Cell>>,
}

impl Function {
    #[must_use]
    pub fn new(code: Arc<CompiledCode>, globals: Rc<Globals>) -> Self {
        let constants = code
            .constants
            .iter()
            .map(|constant| match constant {
                CompiledConstant::Value(value) => Value::from_constant(value),
                CompiledConstant::Code(code) => Value::Code(code.clone()),
            })
            .collect();
        Self {
            qualname: code.display_name().to_owned(),
            code,
            globals,
            constants,
            defaults: Vec::new(),
            kwdefaults: Vec::new(),
            closure: Vec::new(),
        }
    }

    /// Defaults for the trailing positional parameters.
    #[must_use]
    pub fn with_defaults(mut self, defaults: Vec<Value>) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn with_kwdefaults(mut self, kwdefaults: Vec<(String, Value)>) -> Self {
        self.kwdefaults = kwdefaults;
        self
    }

    pub(crate) fn with_closure(mut self, closure: Vec<Rc<Cell>>) -> Self {
        self.closure = closure;
        self
    }

    pub(crate) fn with_qualname(mut self, qualname: String) -> Self {
        self.qualname = qualname;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.code.name
    }

    #[must_use]
    pub fn qualname(&self) -> &str {
        &self.qualname
    }

    #[must_use]
    pub fn code(&self) -> &Arc<CompiledCode> {
        &self.code
    }

    #[must_use]
    pub fn globals(&self) -> &Rc<Globals> {
        &self.globals
    }

    pub(crate) fn constant(&self, index: usize) -> Option<&Value> {
        self.constants.get(index)
    }

    pub(crate) fn closure(&self) -> &[Rc<Cell>] {
        &self.closure
    }

    /// Binds arguments and runs the body; a generator function returns a
    /// fresh generator instead.
    pub(crate) fn call(self: &Rc<Self>, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
        let locals = self.bind_arguments(args, kwargs)?;
        let frame = Frame::new(self.clone(), locals);
        if self.code.is_generator() {
            return Ok(Value::Generator(Rc::new(Generator::new(frame))));
        }
        exec::run_function(frame)
    }

    /// Lays arguments out in local slot order: positional parameters,
    /// keyword-only parameters, then `*args` and `**kwargs`.
    fn bind_arguments(&self, mut args: Vec<Value>, kwargs: Kwargs) -> RunResult<Vec<Option<Value>>> {
        let code = &*self.code;
        let name = self.qualname.as_str();
        let positional = code.argcount;
        let kwonly_end = positional + code.kwonlyargcount;
        let mut locals: Vec<Option<Value>> = vec![None; code.varnames.len()];
        let given = args.len();

        let extra = if given > positional { args.split_off(positional) } else { Vec::new() };
        if code.flags.varargs {
            locals[kwonly_end] = Some(Value::tuple(extra));
        } else if !extra.is_empty() {
            let min = positional - self.defaults.len().min(positional);
            return Err(ExcType::type_error_too_many_positional(name, min, positional, given));
        }
        for (slot, value) in args.into_iter().enumerate() {
            locals[slot] = Some(value);
        }

        let varkw_slot = kwonly_end + usize::from(code.flags.varargs);
        let mut varkw = code.flags.varkeywords.then(Dict::default);
        let mut posonly_passed = Vec::new();
        for (key, value) in kwargs {
            let slot = code.varnames[..kwonly_end].iter().position(|param| *param == key);
            match slot {
                Some(slot) if slot >= code.posonlyargcount => {
                    if locals[slot].is_some() {
                        return Err(ExcType::type_error_multiple_values(name, &key));
                    }
                    locals[slot] = Some(value);
                }
                _ => match varkw.as_mut() {
                    Some(dict) => {
                        dict.insert(HashKey::str(&key), value);
                    }
                    None if slot.is_some() => posonly_passed.push(key),
                    None => return Err(ExcType::type_error_unexpected_keyword(name, &key)),
                },
            }
        }
        if !posonly_passed.is_empty() {
            let names: Vec<&str> = posonly_passed.iter().map(String::as_str).collect();
            return Err(ExcType::type_error_positional_only_as_keyword(name, &names));
        }

        let first_default = positional - self.defaults.len().min(positional);
        let mut missing = Vec::new();
        for slot in 0..positional {
            if locals[slot].is_none() {
                match slot.checked_sub(first_default).and_then(|i| self.defaults.get(i)) {
                    Some(default) => locals[slot] = Some(default.clone()),
                    None => missing.push(code.varnames[slot].as_str()),
                }
            }
        }
        if !missing.is_empty() {
            return Err(ExcType::type_error_missing_positional(name, &missing));
        }

        let mut missing_kwonly = Vec::new();
        for slot in positional..kwonly_end {
            if locals[slot].is_none() {
                let param = code.varnames[slot].as_str();
                match self.kwdefaults.iter().find(|(key, _)| key == param) {
                    Some((_, default)) => locals[slot] = Some(default.clone()),
                    None => missing_kwonly.push(param),
                }
            }
        }
        if !missing_kwonly.is_empty() {
            return Err(ExcType::type_error_missing_kwonly(name, &missing_kwonly));
        }

        if let Some(dict) = varkw {
            locals[varkw_slot] = Some(Value::dict(dict));
        }
        Ok(locals)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("qualname", &self.qualname)
            .field("defaults", &self.defaults.len())
            .field("closure", &self.closure.len())
            .finish_non_exhaustive()
    }
}

/// A function bound to the object it was looked up on.
#[derive(Debug)]
pub struct BoundMethod {
    receiver: Value,
    function: Rc<Function>,
}

impl BoundMethod {
    #[must_use]
    pub fn new(receiver: Value, function: Rc<Function>) -> Self {
        Self { receiver, function }
    }

    #[must_use]
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    #[must_use]
    pub fn function(&self) -> &Rc<Function> {
        &self.function
    }
}
