//! Control-flow and type-flow analysis of decoded bytecode.

pub mod cfg;
mod flow;
mod metadata;

pub use self::{
    cfg::{BasicBlock, FlowGraph, JumpSource, JumpSourceId},
    flow::{FlowAnalyzer, FlowResult, analyze},
    metadata::{Binding, DepthMismatch, StackMetadata, StackUnderflow, SymbolicValue},
};
