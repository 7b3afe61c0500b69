//! Instruction decoding.
//!
//! Turns the raw code-unit list of a descriptor into dense [`Instruction`]s:
//! `EXTENDED_ARG` prefixes are folded into their instruction's operand, `CACHE`
//! units disappear, and every jump operand becomes the index of the target
//! instruction in the decoded list.

use crate::{
    bytecode::{
        descriptor::RawInstruction,
        opcode::{Addressing, Opcode},
    },
    error::{TranslateError, TranslateResult},
    version::PythonVersion,
};

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Operand with any `EXTENDED_ARG` prefix folded in.
    pub arg: u32,
    /// Index in the decoded instruction list.
    pub offset: usize,
    /// Some other instruction branches here.
    pub is_jump_target: bool,
    /// Resolved branch target, for jumping opcodes.
    pub jump_target: Option<usize>,
    /// For `CALL`: the constant index of the preceding `KW_NAMES`.
    pub kw_names: Option<u32>,
}

impl Instruction {
    #[must_use]
    pub fn new(opcode: Opcode, arg: u32, offset: usize) -> Self {
        Self {
            opcode,
            arg,
            offset,
            is_jump_target: false,
            jump_target: None,
            kw_names: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.opcode.name()
    }

    /// The operand as an index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.arg as usize
    }

    /// Rewrites `offset` and `jump_target` through an old-to-new position map.
    ///
    /// Returns `None` if either position has no image in the map.
    #[must_use]
    pub fn relabel(&self, map: &[Option<usize>]) -> Option<Self> {
        let offset = map.get(self.offset).copied().flatten()?;
        let jump_target = match self.jump_target {
            Some(target) => Some(map.get(target).copied().flatten()?),
            None => None,
        };
        Some(Self {
            offset,
            jump_target,
            ..self.clone()
        })
    }
}

fn parse_opcode(version: PythonVersion, offset: usize, opname: &str) -> TranslateResult<Opcode> {
    Opcode::from_name(opname)
        .filter(|opcode| opcode.available_in(version))
        .ok_or_else(|| TranslateError::UnsupportedOpcode {
            opname: opname.to_owned(),
            version,
            offset,
        })
}

/// Decodes `raw` code units compiled for `version`.
///
/// Fails with `UnsupportedOpcode` on any name outside the version's
/// instruction set and with `MalformedJumpTarget` on a jump that does not land
/// on an instruction.
pub fn decode(version: PythonVersion, raw: &[RawInstruction]) -> TranslateResult<Vec<Instruction>> {
    let opcodes = raw
        .iter()
        .enumerate()
        .map(|(pos, unit)| parse_opcode(version, pos, &unit.opname))
        .collect::<TranslateResult<Vec<_>>>()?;

    // Pass 1: fold prefixes, resolve jumps in code units.
    let mut by_unit: Vec<Instruction> = Vec::with_capacity(raw.len());
    let mut unit_map: Vec<Option<usize>> = vec![None; raw.len()];
    let mut extended: u32 = 0;
    let mut prefix_start: Option<usize> = None;
    let mut pending_kw_names: Option<u32> = None;

    for (pos, (unit, &opcode)) in raw.iter().zip(&opcodes).enumerate() {
        match opcode {
            Opcode::Cache => continue,
            Opcode::ExtendedArg => {
                extended = fold_extended(extended, unit.arg).ok_or_else(|| TranslateError::InvalidOperand {
                    offset: pos,
                    opcode: opcode.name(),
                    detail: "EXTENDED_ARG chain overflows 32 bits".to_owned(),
                })?;
                prefix_start.get_or_insert(pos);
                continue;
            }
            _ => {}
        }
        let arg = if prefix_start.is_some() {
            fold_extended(extended, unit.arg).ok_or_else(|| TranslateError::InvalidOperand {
                offset: pos,
                opcode: opcode.name(),
                detail: "EXTENDED_ARG chain overflows 32 bits".to_owned(),
            })?
        } else {
            unit.arg
        };
        let index = by_unit.len();
        // A jump to an EXTENDED_ARG prefix lands on the instruction it extends.
        for slot in &mut unit_map[prefix_start.take().unwrap_or(pos)..=pos] {
            *slot = Some(index);
        }
        extended = 0;

        let mut instruction = Instruction::new(opcode, arg, pos);
        if let Some(mode) = opcode.addressing(version) {
            let base = next_non_cache(&opcodes, pos) as i64;
            let target = match mode {
                Addressing::Absolute => i64::from(arg),
                Addressing::Forward => base + i64::from(arg),
                Addressing::Backward => base - i64::from(arg),
            };
            let target = usize::try_from(target)
                .ok()
                .filter(|t| *t < raw.len())
                .ok_or(TranslateError::MalformedJumpTarget { offset: pos, target })?;
            instruction.jump_target = Some(target);
        }
        match opcode {
            Opcode::KwNames => pending_kw_names = Some(arg),
            Opcode::Call | Opcode::CallFunction | Opcode::CallMethod => {
                instruction.kw_names = pending_kw_names.take();
            }
            _ => {}
        }
        by_unit.push(instruction);
    }
    if let Some(pos) = prefix_start {
        return Err(TranslateError::InvalidOperand {
            offset: pos,
            opcode: Opcode::ExtendedArg.name(),
            detail: "EXTENDED_ARG is not followed by an instruction".to_owned(),
        });
    }

    // Pass 2: renumber to dense instruction indices.
    let mut instructions = by_unit
        .iter()
        .map(|instruction| {
            instruction.relabel(&unit_map).ok_or_else(|| TranslateError::MalformedJumpTarget {
                offset: instruction.offset,
                target: instruction.jump_target.map_or(-1, |t| t as i64),
            })
        })
        .collect::<TranslateResult<Vec<_>>>()?;

    // 3.12 leaves an exhausted FOR_ITER after the END_FOR its operand names.
    if version >= PythonVersion::V3_12 {
        for index in 0..instructions.len() {
            if instructions[index].opcode == Opcode::ForIter
                && let Some(target) = instructions[index].jump_target
                && instructions.get(target).is_some_and(|t| t.opcode == Opcode::EndFor)
            {
                instructions[index].jump_target = Some(target + 1);
            }
        }
    }

    let targets: Vec<usize> = instructions.iter().filter_map(|i| i.jump_target).collect();
    for target in targets {
        match instructions.get_mut(target) {
            Some(instruction) => instruction.is_jump_target = true,
            None => {
                return Err(TranslateError::MalformedJumpTarget {
                    offset: target,
                    target: target as i64,
                });
            }
        }
    }

    tracing::trace!(%version, units = raw.len(), instructions = instructions.len(), "decoded bytecode");
    Ok(instructions)
}

fn fold_extended(prefix: u32, arg: u32) -> Option<u32> {
    prefix.checked_mul(256).map(|shifted| shifted | arg)
}

/// Position of the first non-`CACHE` unit after `pos`.
fn next_non_cache(opcodes: &[Opcode], pos: usize) -> usize {
    opcodes[pos + 1..]
        .iter()
        .position(|op| *op != Opcode::Cache)
        .map_or(opcodes.len(), |skip| pos + 1 + skip)
}
