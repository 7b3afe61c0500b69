//! The type-flow fixed-point analyzer.
//!
//! Every pass walks the blocks in offset order. A block's entry state is the
//! union of what its incoming jump sources last carried (plus the initial
//! state for the entry block); each instruction's output is then written into
//! the states recorded for its successors. Recorded states only ever widen,
//! so once a pass changes nothing the map is the fixed point.

use std::collections::BTreeMap;

use crate::{
    analysis::{FlowGraph, StackMetadata, cfg::JumpSourceId},
    error::{TranslateError, TranslateResult},
    opcodes::FlowContext,
};

/// The fixed point: incoming state of every reachable instruction.
#[derive(Debug, Clone)]
pub struct FlowResult {
    pub metadata: BTreeMap<usize, StackMetadata>,
    /// Passes run, including the final one that changed nothing.
    pub passes: usize,
}

impl FlowResult {
    #[must_use]
    pub fn at(&self, offset: usize) -> Option<&StackMetadata> {
        self.metadata.get(&offset)
    }
}

/// Stepwise driver of the analysis over one graph.
///
/// [`analyze`] runs it to completion; tests can call [`FlowAnalyzer::run_pass`]
/// directly to observe intermediate states.
#[derive(Debug)]
pub struct FlowAnalyzer<'g, 'c> {
    graph: &'g mut FlowGraph,
    ctx: &'g FlowContext<'c>,
    initial: StackMetadata,
    recorded: Vec<Option<StackMetadata>>,
    passes: usize,
}

impl<'g, 'c> FlowAnalyzer<'g, 'c> {
    #[must_use]
    pub fn new(graph: &'g mut FlowGraph, ctx: &'g FlowContext<'c>, initial: StackMetadata) -> Self {
        let recorded = vec![None; graph.instruction_count()];
        Self {
            graph,
            ctx,
            initial,
            recorded,
            passes: 0,
        }
    }

    /// Incoming state currently recorded for `offset`.
    #[must_use]
    pub fn recorded(&self, offset: usize) -> Option<&StackMetadata> {
        self.recorded.get(offset).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Runs one pass over every block. Returns whether any recorded state or
    /// jump source changed.
    pub fn run_pass(&mut self) -> TranslateResult<bool> {
        let mut changed = false;
        for block_index in 0..self.graph.blocks().len() {
            let Some(entry) = self.block_entry(block_index)? else {
                continue;
            };
            let updates = self.walk_block(block_index, entry, &mut changed)?;
            for (id, metadata) in updates {
                changed |= self.send_along(id, metadata)?;
            }
        }
        self.passes += 1;
        tracing::trace!(
            function = self.ctx.descriptor.display_name(),
            pass = self.passes,
            changed,
            "flow pass finished"
        );
        Ok(changed)
    }

    /// Runs passes until nothing changes.
    pub fn run(mut self) -> TranslateResult<FlowResult> {
        loop {
            if self.passes >= self.ctx.config.max_passes {
                return Err(TranslateError::NoFixedPoint { passes: self.passes });
            }
            if !self.run_pass()? {
                break;
            }
        }
        tracing::debug!(
            function = self.ctx.descriptor.display_name(),
            passes = self.passes,
            "type flow reached a fixed point"
        );
        let metadata = self
            .recorded
            .into_iter()
            .enumerate()
            .filter_map(|(offset, state)| state.map(|state| (offset, state)))
            .collect();
        Ok(FlowResult {
            metadata,
            passes: self.passes,
        })
    }

    /// Union of the initial state (entry block only) and every incoming edge
    /// analyzed so far. `None` if nothing has reached the block yet.
    fn block_entry(&self, block_index: usize) -> TranslateResult<Option<StackMetadata>> {
        let start = self.graph.blocks()[block_index].start();
        let mut entry = (block_index == 0).then(|| self.initial.clone());
        for id in self.graph.incoming_ids(block_index) {
            let Some(contributed) = self.graph.source(*id).metadata() else {
                continue;
            };
            entry = Some(match entry {
                None => contributed.clone(),
                Some(current) => merge(start, &current, contributed)?,
            });
        }
        Ok(entry)
    }

    /// Transfers `entry` through the block, recording the incoming state of
    /// each instruction. Returns the states leaving the block.
    fn walk_block(
        &mut self,
        block_index: usize,
        entry: StackMetadata,
        changed: &mut bool,
    ) -> TranslateResult<Vec<(JumpSourceId, StackMetadata)>> {
        let mut updates = Vec::new();
        let mut state = Some(entry);
        let block = &self.graph.blocks()[block_index];
        for handler in block.handlers() {
            let Some(current) = state.take() else {
                break;
            };
            let offset = handler.offset();
            let incoming = match &self.recorded[offset] {
                None => current,
                Some(previous) => merge(offset, previous, &current)?,
            };
            if self.recorded[offset].as_ref() != Some(&incoming) {
                *changed = true;
                self.recorded[offset] = Some(incoming.clone());
            }

            let successors = handler.next_offsets();
            let outgoing = handler.transfer(self.ctx, &incoming)?;
            if outgoing.len() != successors.len() {
                return Err(TranslateError::PairingViolation {
                    offset,
                    opcode: handler.instruction().name(),
                    expected: successors.len(),
                    actual: outgoing.len(),
                });
            }
            for (branch, out) in outgoing.into_iter().enumerate() {
                match self.graph.source_id(offset, branch) {
                    Some(id) => updates.push((id, out)),
                    None => state = Some(out),
                }
            }
        }
        Ok(updates)
    }

    /// Widens the state carried by a jump source. Returns whether it changed.
    fn send_along(&mut self, id: JumpSourceId, metadata: StackMetadata) -> TranslateResult<bool> {
        let source = self.graph.source(id);
        let widened = match source.metadata() {
            None => metadata,
            Some(previous) => merge(source.target(), previous, &metadata)?,
        };
        if source.metadata() == Some(&widened) {
            return Ok(false);
        }
        self.graph.source_mut(id).set_metadata(widened);
        Ok(true)
    }
}

fn merge(offset: usize, left: &StackMetadata, right: &StackMetadata) -> TranslateResult<StackMetadata> {
    left.unify_with(right).map_err(|_| TranslateError::MergeConflict {
        offset,
        left: left.to_string(),
        right: right.to_string(),
    })
}

/// Runs the analysis of `graph` from `initial` to its fixed point.
pub fn analyze(graph: &mut FlowGraph, ctx: &FlowContext<'_>, initial: StackMetadata) -> TranslateResult<FlowResult> {
    FlowAnalyzer::new(graph, ctx, initial).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{Binding, SymbolicValue},
        bytecode::{Constant, FunctionDescriptor, decode},
        config::TranslateConfig,
        opcodes::handlers_for,
        types::{NoHints, PyType, TypeRegistry},
        version::PythonVersion,
    };

    /// `total = 0; for x in xs: total = total + 1.5; return total`
    fn widening_loop() -> FunctionDescriptor {
        FunctionDescriptor::builder("f", PythonVersion::V3_10)
            .params(&["xs"])
            .locals(&["total", "x"])
            .constants(vec![Constant::None, Constant::Int(0), Constant::Float(1.5)])
            .op("LOAD_CONST", 1)
            .op("STORE_FAST", 1)
            .op("LOAD_FAST", 0)
            .op("GET_ITER", 0)
            .op("FOR_ITER", 6)
            .op("STORE_FAST", 2)
            .op("LOAD_FAST", 1)
            .op("LOAD_CONST", 2)
            .op("BINARY_ADD", 0)
            .op("STORE_FAST", 1)
            .op("JUMP_ABSOLUTE", 4)
            .op("LOAD_FAST", 1)
            .op("RETURN_VALUE", 0)
            .build()
    }

    fn total_at(state: Option<&StackMetadata>) -> PyType {
        state
            .and_then(|state| state.local(1))
            .and_then(Binding::value)
            .map(|value| value.ty().clone())
            .unwrap()
    }

    #[test]
    fn back_edge_widens_loop_header_on_a_later_pass() {
        let desc = widening_loop();
        let config = TranslateConfig::default();
        let ctx = FlowContext {
            descriptor: &desc,
            registry: TypeRegistry::global(),
            hints: &NoHints,
            config: &config,
        };
        let handlers = handlers_for(decode(desc.version, &desc.instructions).unwrap(), &desc).unwrap();
        let mut graph = FlowGraph::build(handlers).unwrap();
        let initial = StackMetadata::unbound(3, 0).set_local(0, Binding::Bound(SymbolicValue::object()));
        let mut analyzer = FlowAnalyzer::new(&mut graph, &ctx, initial);

        assert!(analyzer.run_pass().unwrap());
        // Only the entry edge has reached the header so far.
        assert_eq!(total_at(analyzer.recorded(4)), PyType::Int);

        let mut snapshots = vec![analyzer.recorded(4).cloned().unwrap()];
        while analyzer.run_pass().unwrap() {
            snapshots.push(analyzer.recorded(4).cloned().unwrap());
        }
        snapshots.push(analyzer.recorded(4).cloned().unwrap());
        for pair in snapshots.windows(2) {
            // Each pass only widens what it recorded before.
            assert_eq!(pair[0].unify_with(&pair[1]).unwrap(), pair[1]);
        }
        assert!(analyzer.passes() >= 2);
        assert_ne!(total_at(analyzer.recorded(4)), PyType::Int);
        assert_ne!(total_at(analyzer.recorded(11)), PyType::Int);
    }

    #[test]
    fn pass_cap_reports_no_fixed_point() {
        let desc = widening_loop();
        let config = TranslateConfig {
            max_passes: 1,
            ..TranslateConfig::default()
        };
        let ctx = FlowContext {
            descriptor: &desc,
            registry: TypeRegistry::global(),
            hints: &NoHints,
            config: &config,
        };
        let handlers = handlers_for(decode(desc.version, &desc.instructions).unwrap(), &desc).unwrap();
        let mut graph = FlowGraph::build(handlers).unwrap();
        let initial = StackMetadata::unbound(3, 0).set_local(0, Binding::Bound(SymbolicValue::object()));
        let err = analyze(&mut graph, &ctx, initial).unwrap_err();
        assert_eq!(err, TranslateError::NoFixedPoint { passes: 1 });
    }
}
