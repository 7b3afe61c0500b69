//! Bytecode input: descriptors, opcode tables and the decoder.
//!
//! - `descriptor`: function and class descriptors as handed to translation
//! - `opcode`: the opcode enum with per-version availability and jump addressing
//! - `decode`: raw code units to dense [`Instruction`]s with resolved targets

mod decode;
mod descriptor;
mod opcode;

pub use self::{
    decode::{Instruction, decode},
    descriptor::{BaseRef, ClassDescriptor, CodeFlags, Constant, DescriptorBuilder, FunctionDescriptor, RawInstruction},
    opcode::{Addressing, Category, Opcode},
};
