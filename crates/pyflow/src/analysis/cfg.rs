//! Basic blocks and the jump-edge registry.

use ahash::AHashMap;

use crate::{
    analysis::StackMetadata,
    error::{TranslateError, TranslateResult},
    opcodes::OpcodeHandler,
};

/// A maximal straight-line run of instructions.
///
/// Only the first instruction can be a jump target, and only the last can
/// leave the block other than by falling through.
#[derive(Debug)]
pub struct BasicBlock {
    start: usize,
    handlers: Vec<Box<dyn OpcodeHandler>>,
}

impl BasicBlock {
    /// Offset of the first instruction; also the block's identity.
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the offset of the last instruction.
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.handlers.len()
    }

    #[must_use]
    pub fn handlers(&self) -> &[Box<dyn OpcodeHandler>] {
        &self.handlers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Index of a [`JumpSource`] in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JumpSourceId(usize);

/// The state one branch of one instruction contributes to another block.
///
/// This is the only mutable piece of analysis state: the analyzer rewrites
/// `metadata` each time the branch is re-evaluated, so loop headers can be
/// re-unified with their back edges without rescanning the graph.
#[derive(Debug, Clone)]
pub struct JumpSource {
    offset: usize,
    branch: usize,
    target: usize,
    metadata: Option<StackMetadata>,
}

impl JumpSource {
    /// Offset of the branching instruction.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Position of this edge in the instruction's `next_offsets`.
    #[must_use]
    pub fn branch(&self) -> usize {
        self.branch
    }

    #[must_use]
    pub fn target(&self) -> usize {
        self.target
    }

    /// Latest state sent along this edge, `None` until the source is analyzed.
    #[must_use]
    pub fn metadata(&self) -> Option<&StackMetadata> {
        self.metadata.as_ref()
    }

    pub(crate) fn set_metadata(&mut self, metadata: StackMetadata) {
        self.metadata = Some(metadata);
    }
}

/// Control-flow graph of one function body.
#[derive(Debug)]
pub struct FlowGraph {
    blocks: Vec<BasicBlock>,
    /// Instruction offset to the index of its block.
    block_of: Vec<usize>,
    /// Block index to predecessor block indices, in discovery order.
    predecessors: Vec<Vec<usize>>,
    /// Block index to the jump sources entering it.
    incoming: Vec<Vec<JumpSourceId>>,
    sources: Vec<JumpSource>,
    source_index: AHashMap<(usize, usize), JumpSourceId>,
    reachable: Vec<bool>,
}

impl FlowGraph {
    /// Slices handlers into blocks and registers every edge that leaves a block.
    ///
    /// A block starts at offset 0, at every jump target and after every
    /// forced jump. Every successor must name an existing instruction;
    /// anything else is a decoder defect and fails with
    /// [`TranslateError::MalformedJumpTarget`].
    pub fn build(handlers: Vec<Box<dyn OpcodeHandler>>) -> TranslateResult<Self> {
        let len = handlers.len();
        let mut starts = vec![false; len];
        if let Some(first) = starts.first_mut() {
            *first = true;
        }
        for (offset, handler) in handlers.iter().enumerate() {
            for target in handler.next_offsets() {
                if target >= len {
                    return Err(TranslateError::MalformedJumpTarget {
                        offset,
                        target: i64::try_from(target).unwrap_or(i64::MAX),
                    });
                }
                if target != offset + 1 {
                    starts[target] = true;
                }
            }
            if handler.is_jump_target() {
                starts[offset] = true;
            }
            if handler.is_forced_jump() && offset + 1 < len {
                starts[offset + 1] = true;
            }
        }

        let mut blocks: Vec<BasicBlock> = Vec::new();
        let mut block_of = Vec::with_capacity(len);
        for (offset, handler) in handlers.into_iter().enumerate() {
            if starts[offset] {
                blocks.push(BasicBlock {
                    start: offset,
                    handlers: Vec::new(),
                });
            }
            block_of.push(blocks.len() - 1);
            if let Some(block) = blocks.last_mut() {
                block.handlers.push(handler);
            }
        }

        let mut graph = Self {
            predecessors: vec![Vec::new(); blocks.len()],
            incoming: vec![Vec::new(); blocks.len()],
            blocks,
            block_of,
            sources: Vec::new(),
            source_index: AHashMap::new(),
            reachable: Vec::new(),
        };
        graph.register_edges();
        graph.reachable = graph.compute_reachable();
        tracing::debug!(
            blocks = graph.blocks.len(),
            edges = graph.sources.len(),
            unreachable = graph.reachable.iter().filter(|r| !**r).count(),
            "flow graph built"
        );
        Ok(graph)
    }

    fn register_edges(&mut self) {
        let mut edges = Vec::new();
        for (block_index, block) in self.blocks.iter().enumerate() {
            for handler in &block.handlers {
                let offset = handler.offset();
                for (branch, target) in handler.next_offsets().into_iter().enumerate() {
                    let within_block = target == offset + 1 && target < block.end();
                    if !within_block {
                        edges.push((block_index, offset, branch, target));
                    }
                }
            }
        }
        for (from_block, offset, branch, target) in edges {
            let target_block = self.block_of[target];
            let id = JumpSourceId(self.sources.len());
            self.sources.push(JumpSource {
                offset,
                branch,
                target,
                metadata: None,
            });
            self.source_index.insert((offset, branch), id);
            self.incoming[target_block].push(id);
            if !self.predecessors[target_block].contains(&from_block) {
                self.predecessors[target_block].push(from_block);
            }
        }
    }

    fn compute_reachable(&self) -> Vec<bool> {
        let mut reachable = vec![false; self.blocks.len()];
        let mut pending = if self.blocks.is_empty() { Vec::new() } else { vec![0] };
        while let Some(index) = pending.pop() {
            if std::mem::replace(&mut reachable[index], true) {
                continue;
            }
            for handler in &self.blocks[index].handlers {
                for target in handler.next_offsets() {
                    let block = self.block_of[target];
                    if block != index && !reachable[block] {
                        pending.push(block);
                    }
                }
            }
        }
        reachable
    }

    /// Blocks in offset order.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// The block starting at `start`.
    #[must_use]
    pub fn block_at(&self, start: usize) -> Option<&BasicBlock> {
        let index = *self.block_of.get(start)?;
        let block = &self.blocks[index];
        (block.start == start).then_some(block)
    }

    /// Start offset of the block containing instruction `offset`.
    #[must_use]
    pub fn block_containing(&self, offset: usize) -> Option<usize> {
        self.block_of.get(offset).map(|index| self.blocks[*index].start)
    }

    /// Start offsets of the blocks with an edge into the block at `start`.
    #[must_use]
    pub fn predecessors(&self, start: usize) -> Vec<usize> {
        self.index_of_start(start)
            .map(|index| self.predecessors[index].iter().map(|p| self.blocks[*p].start).collect())
            .unwrap_or_default()
    }

    /// Jump sources entering the block at `start`.
    pub fn incoming(&self, start: usize) -> impl Iterator<Item = &JumpSource> {
        self.index_of_start(start)
            .map(|index| self.incoming[index].as_slice())
            .unwrap_or_default()
            .iter()
            .map(|id| &self.sources[id.0])
    }

    /// The jump source registered for branch `branch` of instruction `offset`.
    #[must_use]
    pub fn jump_source(&self, offset: usize, branch: usize) -> Option<&JumpSource> {
        self.source_index.get(&(offset, branch)).map(|id| &self.sources[id.0])
    }

    /// Number of registered jump sources.
    #[must_use]
    pub fn jump_source_count(&self) -> usize {
        self.sources.len()
    }

    /// Whether the block at `start` can be reached from the entry block.
    #[must_use]
    pub fn is_reachable(&self, start: usize) -> bool {
        self.index_of_start(start).is_some_and(|index| self.reachable[index])
    }

    /// Total number of instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.block_of.len()
    }

    pub(crate) fn source_id(&self, offset: usize, branch: usize) -> Option<JumpSourceId> {
        self.source_index.get(&(offset, branch)).copied()
    }

    pub(crate) fn source(&self, id: JumpSourceId) -> &JumpSource {
        &self.sources[id.0]
    }

    pub(crate) fn source_mut(&mut self, id: JumpSourceId) -> &mut JumpSource {
        &mut self.sources[id.0]
    }

    pub(crate) fn incoming_ids(&self, block_index: usize) -> &[JumpSourceId] {
        &self.incoming[block_index]
    }

    fn index_of_start(&self, start: usize) -> Option<usize> {
        let index = *self.block_of.get(start)?;
        (self.blocks[index].start == start).then_some(index)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        bytecode::{Constant, FunctionDescriptor, Instruction, Opcode, decode},
        opcodes::{handler_for, handlers_for},
        version::PythonVersion,
    };

    /// `if flag: return None` / `return None`, then a dead tail.
    fn graph() -> FlowGraph {
        let desc = FunctionDescriptor::builder("f", PythonVersion::V3_10)
            .params(&["flag"])
            .constants(vec![Constant::None])
            .op("LOAD_FAST", 0)
            .op("POP_JUMP_IF_FALSE", 4)
            .op("LOAD_CONST", 0)
            .op("RETURN_VALUE", 0)
            .op("LOAD_CONST", 0)
            .op("RETURN_VALUE", 0)
            .op("LOAD_CONST", 0)
            .op("RETURN_VALUE", 0)
            .build();
        let handlers = handlers_for(decode(desc.version, &desc.instructions).unwrap(), &desc).unwrap();
        FlowGraph::build(handlers).unwrap()
    }

    #[test]
    fn blocks_split_at_targets_and_after_forced_jumps() {
        let graph = graph();
        let starts: Vec<usize> = graph.blocks().iter().map(BasicBlock::start).collect();
        assert_eq!(starts, vec![0, 4, 6]);
        assert_eq!(graph.blocks()[0].len(), 4);
        assert_eq!(graph.block_containing(3), Some(0));
        assert!(graph.block_at(2).is_none());
    }

    #[test]
    fn only_block_crossing_edges_are_registered() {
        let graph = graph();
        assert_eq!(graph.jump_source_count(), 1);
        let source = graph.jump_source(1, 1).unwrap();
        assert_eq!((source.offset(), source.branch(), source.target()), (1, 1, 4));
        assert!(graph.jump_source(1, 0).is_none());
        assert_eq!(graph.predecessors(4), vec![0]);
        assert_eq!(graph.incoming(4).count(), 1);
    }

    #[test]
    fn dead_tail_is_unreachable() {
        let graph = graph();
        assert!(graph.is_reachable(0));
        assert!(graph.is_reachable(4));
        assert!(!graph.is_reachable(6));
    }

    #[test]
    fn target_outside_the_body_fails() {
        let desc = FunctionDescriptor::builder("f", PythonVersion::V3_10).build();
        let mut jump = Instruction::new(Opcode::JumpAbsolute, 9, 0);
        jump.jump_target = Some(9);
        let handler = handler_for(jump, &desc).unwrap();
        let err = FlowGraph::build(vec![handler]).unwrap_err();
        assert_eq!(err, TranslateError::MalformedJumpTarget { offset: 0, target: 9 });
    }
}
