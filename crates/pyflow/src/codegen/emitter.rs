//! Op emission and jump patching.

use crate::{
    codegen::op::Op,
    error::{TranslateError, TranslateResult},
};

/// Collects ops while opcode handlers run, in source offset order.
///
/// Jump targets are written as source offsets. Because a handler may branch
/// forward to an instruction that has not been emitted yet, targets are only
/// rewritten to op indices in [`Emitter::finish`], once every instruction's
/// first op is known.
///
/// ```
/// use pyflow::codegen::{Emitter, Op};
///
/// let mut emitter = Emitter::new(3);
/// emitter.begin_instruction(0, 0);
/// emitter.emit(Op::Jump(2));
/// emitter.begin_instruction(1, 0);
/// emitter.emit(Op::Pop);
/// emitter.emit(Op::Pop);
/// emitter.begin_instruction(2, 0);
/// emitter.emit(Op::Return);
/// let emitted = emitter.finish().unwrap();
/// assert_eq!(emitted.ops[0], Op::Jump(3));
/// ```
#[derive(Debug, Default)]
pub struct Emitter {
    ops: Vec<Op>,
    /// Source offset that produced each op.
    op_offsets: Vec<usize>,
    /// First op index of each source offset that was emitted.
    starts: Vec<Option<usize>>,
    current_offset: usize,
    resume_points: Vec<usize>,
    max_stack_depth: usize,
}

/// The result of [`Emitter::finish`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedOps {
    pub ops: Vec<Op>,
    pub op_offsets: Vec<usize>,
    pub resume_points: Vec<usize>,
    pub max_stack_depth: usize,
}

impl Emitter {
    /// An emitter for a body of `instructions` decoded instructions.
    #[must_use]
    pub fn new(instructions: usize) -> Self {
        Self {
            starts: vec![None; instructions],
            ..Self::default()
        }
    }

    /// Marks the start of source instruction `offset`, entered with `depth`
    /// values on the stack.
    pub fn begin_instruction(&mut self, offset: usize, depth: usize) {
        if offset >= self.starts.len() {
            self.starts.resize(offset + 1, None);
        }
        self.starts[offset] = Some(self.ops.len());
        self.current_offset = offset;
        self.note_depth(depth);
    }

    pub fn emit(&mut self, op: Op) {
        self.ops.push(op);
        self.op_offsets.push(self.current_offset);
    }

    /// Emits a yield that resumes at the next op.
    pub fn emit_yield(&mut self) {
        let resume = self.ops.len() + 1;
        self.resume_points.push(resume);
        self.emit(Op::Yield { resume });
    }

    /// Emits an op that suspends and later resumes by re-executing itself.
    pub fn emit_reentrant(&mut self, op: Op) {
        self.resume_points.push(self.ops.len());
        self.emit(op);
    }

    /// Records a stack depth reached inside the current instruction.
    pub fn note_depth(&mut self, depth: usize) {
        self.max_stack_depth = self.max_stack_depth.max(depth);
    }

    /// Number of ops emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Ops emitted so far, with jump targets still as source offsets.
    #[must_use]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Rewrites jump targets from source offsets to op indices.
    ///
    /// A target whose instruction was never emitted means a reachable branch
    /// points into unreachable code, which the analyzer rules out; it is
    /// reported as a malformed target rather than patched to garbage.
    pub fn finish(mut self) -> TranslateResult<EmittedOps> {
        for (index, op) in self.ops.iter_mut().enumerate() {
            let Some(target) = op.target_mut() else {
                continue;
            };
            let Some(start) = self.starts.get(*target).copied().flatten() else {
                return Err(TranslateError::MalformedJumpTarget {
                    offset: self.op_offsets[index],
                    target: i64::try_from(*target).unwrap_or(i64::MAX),
                });
            };
            *target = start;
        }
        Ok(EmittedOps {
            ops: self.ops,
            op_offsets: self.op_offsets,
            resume_points: self.resume_points,
            max_stack_depth: self.max_stack_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::codegen::op::JumpCondition;

    #[test]
    fn backward_jump_targets_first_op_of_instruction() {
        let mut emitter = Emitter::new(4);
        emitter.begin_instruction(0, 0);
        emitter.emit(Op::LoadConst(0));
        emitter.begin_instruction(1, 1);
        emitter.emit(Op::LoadConst(1));
        emitter.emit(Op::Pop);
        emitter.begin_instruction(2, 1);
        emitter.emit(Op::PopJumpIf {
            target: 1,
            condition: JumpCondition::True,
        });
        emitter.begin_instruction(3, 0);
        emitter.emit(Op::Return);
        let emitted = emitter.finish().unwrap();
        assert_eq!(
            emitted.ops[3],
            Op::PopJumpIf {
                target: 1,
                condition: JumpCondition::True
            }
        );
        assert_eq!(emitted.op_offsets, vec![0, 1, 1, 2, 3]);
        assert_eq!(emitted.max_stack_depth, 1);
    }

    #[test]
    fn instruction_without_ops_targets_following_op() {
        let mut emitter = Emitter::new(3);
        emitter.begin_instruction(0, 0);
        emitter.emit(Op::Jump(1));
        emitter.begin_instruction(1, 0);
        emitter.begin_instruction(2, 0);
        emitter.emit(Op::Return);
        let emitted = emitter.finish().unwrap();
        assert_eq!(emitted.ops[0], Op::Jump(1));
    }

    #[test]
    fn target_in_unemitted_code_is_rejected() {
        let mut emitter = Emitter::new(3);
        emitter.begin_instruction(0, 0);
        emitter.emit(Op::Jump(2));
        let err = emitter.finish().unwrap_err();
        assert_eq!(err, TranslateError::MalformedJumpTarget { offset: 0, target: 2 });
    }

    #[test]
    fn yields_record_resume_points() {
        let mut emitter = Emitter::new(2);
        emitter.begin_instruction(0, 1);
        emitter.emit_yield();
        emitter.begin_instruction(1, 2);
        emitter.emit_reentrant(Op::YieldFrom);
        let emitted = emitter.finish().unwrap();
        assert_eq!(emitted.ops[0], Op::Yield { resume: 1 });
        assert_eq!(emitted.resume_points, vec![1, 1]);
    }
}
