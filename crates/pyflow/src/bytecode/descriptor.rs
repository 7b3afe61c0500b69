//! Inputs to translation: function and class descriptors.
//!
//! A [`FunctionDescriptor`] is a disassembled code object. It can be built in
//! Rust with [`FunctionDescriptor::builder`] or deserialized from JSON.

use std::sync::Arc;

use indexmap::IndexMap;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::{assembly::CompiledClass, version::PythonVersion};

/// One code unit as listed by a disassembler, including `CACHE` and
/// `EXTENDED_ARG` entries. Its position in the list is its code-unit index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInstruction {
    pub opname: String,
    #[serde(default)]
    pub arg: u32,
}

impl RawInstruction {
    #[must_use]
    pub fn new(opname: impl Into<String>, arg: u32) -> Self {
        Self {
            opname: opname.into(),
            arg,
        }
    }
}

/// Code object flags relevant to translation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeFlags {
    /// Has a `*args` parameter.
    pub varargs: bool,
    /// Has a `**kwargs` parameter.
    pub varkeywords: bool,
    pub generator: bool,
    pub coroutine: bool,
}

/// A constant pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Constant>),
    FrozenSet(Vec<Constant>),
    Ellipsis,
    /// A nested code object, e.g. a lambda or inner function.
    Code(Box<FunctionDescriptor>),
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<i64> for Constant {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Constant {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Constant {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A disassembled function body plus the tables its operands index into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    #[serde(default)]
    pub qualname: String,
    pub version: PythonVersion,
    #[serde(default)]
    pub argcount: usize,
    #[serde(default)]
    pub posonlyargcount: usize,
    #[serde(default)]
    pub kwonlyargcount: usize,
    #[serde(default)]
    pub flags: CodeFlags,
    #[serde(default)]
    pub varnames: Vec<String>,
    #[serde(default)]
    pub cellvars: Vec<String>,
    #[serde(default)]
    pub freevars: Vec<String>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub constants: Vec<Constant>,
    pub instructions: Vec<RawInstruction>,
    /// Parameter name (or `"return"`) to annotation text. Hints only.
    #[serde(default)]
    pub annotations: IndexMap<String, String>,
}

impl FunctionDescriptor {
    /// Starts a descriptor for a function called `name`.
    #[must_use]
    pub fn builder(name: &str, version: PythonVersion) -> DescriptorBuilder {
        DescriptorBuilder::new(name, version)
    }

    /// Parses a JSON-serialized descriptor.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// `qualname`, falling back to `name`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.qualname.is_empty() { &self.name } else { &self.qualname }
    }

    /// Number of local slots that hold parameters, including `*args`/`**kwargs`.
    #[must_use]
    pub fn total_params(&self) -> usize {
        self.argcount + self.kwonlyargcount + usize::from(self.flags.varargs) + usize::from(self.flags.varkeywords)
    }

    /// Cell slots: `cellvars` followed by `freevars`.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cellvars.len() + self.freevars.len()
    }

    /// Name of a cell slot.
    #[must_use]
    pub fn cell_name(&self, cell: usize) -> Option<&str> {
        self.cellvars
            .get(cell)
            .or_else(|| self.freevars.get(cell.checked_sub(self.cellvars.len())?))
            .map(String::as_str)
    }

    /// Maps a `LOAD_DEREF`-family operand to a cell slot.
    ///
    /// 3.10 indexes `cellvars + freevars` directly. 3.11+ indexes the
    /// "localsplus" array: `varnames`, then cellvars that are not also
    /// parameters or locals, then freevars.
    #[must_use]
    pub fn deref_cell_index(&self, arg: u32) -> Option<usize> {
        let arg = usize::try_from(arg).ok()?;
        if !self.version.uses_localsplus() {
            return (arg < self.cell_count()).then_some(arg);
        }
        if let Some(local) = self.varnames.get(arg) {
            return self.cellvars.iter().position(|c| c == local);
        }
        let mut slot = self.varnames.len();
        for (index, cell) in self.cellvars.iter().enumerate() {
            if self.varnames.contains(cell) {
                continue;
            }
            if slot == arg {
                return Some(index);
            }
            slot += 1;
        }
        let free = arg.checked_sub(slot)?;
        (free < self.freevars.len()).then_some(self.cellvars.len() + free)
    }

    /// Maps a 3.11+ `MAKE_CELL` operand to a cell slot, if it names a cellvar.
    #[must_use]
    pub fn make_cell_index(&self, arg: u32) -> Option<usize> {
        self.deref_cell_index(arg).filter(|cell| *cell < self.cellvars.len())
    }
}

/// Fluent construction of descriptors, mostly for tests and embedders that
/// produce bytecode themselves.
///
/// Slot order follows CPython's `co_varnames`: call `params`, then `kwonly`,
/// `varargs`, `varkeywords`, and finally `locals`.
///
/// ```
/// use pyflow::{FunctionDescriptor, PythonVersion};
///
/// let identity = FunctionDescriptor::builder("identity", PythonVersion::V3_10)
///     .params(&["x"])
///     .op("LOAD_FAST", 0)
///     .op("RETURN_VALUE", 0)
///     .build();
/// assert_eq!(identity.argcount, 1);
/// assert_eq!(identity.instructions.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    descriptor: FunctionDescriptor,
}

impl DescriptorBuilder {
    fn new(name: &str, version: PythonVersion) -> Self {
        Self {
            descriptor: FunctionDescriptor {
                name: name.to_owned(),
                qualname: name.to_owned(),
                version,
                argcount: 0,
                posonlyargcount: 0,
                kwonlyargcount: 0,
                flags: CodeFlags::default(),
                varnames: Vec::new(),
                cellvars: Vec::new(),
                freevars: Vec::new(),
                names: Vec::new(),
                constants: Vec::new(),
                instructions: Vec::new(),
                annotations: IndexMap::new(),
            },
        }
    }

    #[must_use]
    pub fn qualname(mut self, qualname: &str) -> Self {
        qualname.clone_into(&mut self.descriptor.qualname);
        self
    }

    /// Positional parameters; they occupy the first local slots.
    #[must_use]
    pub fn params(mut self, params: &[&str]) -> Self {
        self.descriptor.argcount = params.len();
        self.descriptor
            .varnames
            .splice(0..0, params.iter().map(|p| (*p).to_owned()));
        self
    }

    /// How many of the positional parameters are positional-only.
    #[must_use]
    pub fn posonly(mut self, count: usize) -> Self {
        self.descriptor.posonlyargcount = count;
        self
    }

    /// Keyword-only parameters, placed after the positional ones.
    #[must_use]
    pub fn kwonly(mut self, params: &[&str]) -> Self {
        self.descriptor.kwonlyargcount = params.len();
        self.descriptor.varnames.extend(params.iter().map(|p| (*p).to_owned()));
        self
    }

    /// Adds a `*args` parameter slot.
    #[must_use]
    pub fn varargs(mut self, name: &str) -> Self {
        self.descriptor.flags.varargs = true;
        self.descriptor.varnames.push(name.to_owned());
        self
    }

    /// Adds a `**kwargs` parameter slot.
    #[must_use]
    pub fn varkeywords(mut self, name: &str) -> Self {
        self.descriptor.flags.varkeywords = true;
        self.descriptor.varnames.push(name.to_owned());
        self
    }

    /// Plain locals, after all parameters.
    #[must_use]
    pub fn locals(mut self, locals: &[&str]) -> Self {
        self.descriptor.varnames.extend(locals.iter().map(|l| (*l).to_owned()));
        self
    }

    #[must_use]
    pub fn cellvars(mut self, cells: &[&str]) -> Self {
        self.descriptor.cellvars = cells.iter().map(|c| (*c).to_owned()).collect();
        self
    }

    #[must_use]
    pub fn freevars(mut self, cells: &[&str]) -> Self {
        self.descriptor.freevars = cells.iter().map(|c| (*c).to_owned()).collect();
        self
    }

    #[must_use]
    pub fn names(mut self, names: &[&str]) -> Self {
        self.descriptor.names = names.iter().map(|n| (*n).to_owned()).collect();
        self
    }

    #[must_use]
    pub fn constants(mut self, constants: Vec<Constant>) -> Self {
        self.descriptor.constants = constants;
        self
    }

    #[must_use]
    pub fn generator(mut self) -> Self {
        self.descriptor.flags.generator = true;
        self
    }

    #[must_use]
    pub fn annotation(mut self, name: &str, annotation: &str) -> Self {
        self.descriptor.annotations.insert(name.to_owned(), annotation.to_owned());
        self
    }

    /// Appends one code unit.
    #[must_use]
    pub fn op(mut self, opname: &str, arg: u32) -> Self {
        self.descriptor.instructions.push(RawInstruction::new(opname, arg));
        self
    }

    /// Appends `count` `CACHE` units.
    #[must_use]
    pub fn caches(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.descriptor.instructions.push(RawInstruction::new("CACHE", 0));
        }
        self
    }

    #[must_use]
    pub fn build(self) -> FunctionDescriptor {
        self.descriptor
    }
}

/// A base class named in a class statement.
#[derive(Debug, Clone)]
pub enum BaseRef {
    /// `object` or a builtin exception class, by name.
    Builtin(String),
    /// A previously translated class.
    Class(Arc<CompiledClass>),
}

/// Everything needed to translate a class body.
#[derive(Debug, Clone, Default)]
pub struct ClassDescriptor {
    pub name: String,
    pub bases: Vec<BaseRef>,
    pub instance_methods: Vec<FunctionDescriptor>,
    pub static_methods: Vec<FunctionDescriptor>,
    pub class_methods: Vec<FunctionDescriptor>,
    pub static_attributes: Vec<(String, Constant)>,
    /// Attribute name to annotation text. Hints only.
    pub annotations: IndexMap<String, String>,
}

impl ClassDescriptor {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closure_descriptor(version: PythonVersion) -> FunctionDescriptor {
        FunctionDescriptor::builder("outer", version)
            .params(&["a", "b"])
            .locals(&["tmp"])
            .cellvars(&["b", "counter"])
            .freevars(&["captured"])
            .build()
    }

    #[test]
    fn legacy_deref_indexes_cells_directly() {
        let desc = closure_descriptor(PythonVersion::V3_10);
        assert_eq!(desc.deref_cell_index(0), Some(0));
        assert_eq!(desc.deref_cell_index(2), Some(2));
        assert_eq!(desc.deref_cell_index(3), None);
    }

    #[test]
    fn localsplus_deref_skips_parameter_cells() {
        let desc = closure_descriptor(PythonVersion::V3_11);
        // varnames: a, b, tmp; then counter; then captured.
        assert_eq!(desc.deref_cell_index(1), Some(0));
        assert_eq!(desc.deref_cell_index(0), None);
        assert_eq!(desc.deref_cell_index(3), Some(1));
        assert_eq!(desc.deref_cell_index(4), Some(2));
        assert_eq!(desc.deref_cell_index(5), None);
        assert_eq!(desc.cell_name(2), Some("captured"));
    }

    #[test]
    fn descriptor_from_json() {
        let json = r#"{
            "name": "f",
            "version": "3.11",
            "argcount": 1,
            "varnames": ["x"],
            "constants": [{"Int": 1}],
            "instructions": [
                {"opname": "RESUME"},
                {"opname": "LOAD_FAST", "arg": 0},
                {"opname": "RETURN_VALUE"}
            ]
        }"#;
        let desc = FunctionDescriptor::from_json(json).unwrap();
        assert_eq!(desc.version, PythonVersion::V3_11);
        assert_eq!(desc.constants, vec![Constant::Int(1)]);
        assert_eq!(desc.instructions[1], RawInstruction::new("LOAD_FAST", 0));
        assert_eq!(desc.display_name(), "f");
    }
}
