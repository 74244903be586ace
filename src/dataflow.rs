//! Backward data-flow engine (spec.md §4.3): "at instruction I, what does
//! register R contain?"

use std::collections::HashMap;

use crate::error::{AnalysisError, Result};
use crate::instruction::Instruction;
use crate::operand::{canonicalize, is_zero_register, Operand, STACK_POINTER_ID};
use serde::Serialize;

/// What a register holds at a given instruction, as determined by a purely
/// backward, flow-insensitive walk over the instructions preceding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegisterContents {
    /// The register holds the constant value `v` at the queried point.
    Immediate(i64),
    /// The register's value is whatever the caller placed in argument
    /// register `i` -- no store within this function defined it.
    FunctionArg(u32),
}

/// A pending link: register `key` equals the value of register `src` plus
/// signed offset `off`, discovered before `src`'s value was known.
type PendingLink = (String, i64);

/// Backward-walk `instructions[..=target_index]` to resolve `register` at
/// `instructions[target_index]`, per the algorithm in spec.md §4.3.
///
/// `excluded_defining_mnemonics` is the set of mnemonics that are skipped
/// even though their first two operands look like a `dst, src` pair (e.g.
/// `str x1, [sp, #0x38]` writes memory, it does not define `x1`).
pub fn register_contents_at(
    instructions: &[Instruction],
    target_index: usize,
    register: &str,
    excluded_defining_mnemonics: &[String],
) -> Result<RegisterContents> {
    let target = instructions
        .get(target_index)
        .ok_or(AnalysisError::IndexOutOfBounds {
            start: instructions.first().map(|i| i.address).unwrap_or(0),
            index: target_index,
        })?;

    let mut unknown: Vec<String> = vec![canonicalize(register)];
    let mut known: HashMap<String, i64> = HashMap::new();
    let mut pending: HashMap<String, PendingLink> = HashMap::new();

    for instr in instructions[..=target_index].iter().rev() {
        if unknown.is_empty() {
            break;
        }

        if instr.operands.len() < 2 {
            continue;
        }

        let mnemonic = instr.mnemonic().to_ascii_lowercase();
        if excluded_defining_mnemonics.iter().any(|m| m == &mnemonic) {
            continue;
        }

        let dst = &instr.operands[0];
        let mut src = &instr.operands[1];

        let dst_id = match dst.register_id() {
            Some(id) => id.to_string(),
            None => continue,
        };

        if !unknown.contains(&dst_id) {
            continue;
        }

        // Zero-register trick: `orr x1, xzr, #0x2` really defines x1 from
        // operand 2, not from the (always-zero) operand 1.
        if instr.operands.len() > 2 {
            if let Operand::Register { id, .. } = src {
                if is_zero_register(id) {
                    src = &instr.operands[2];
                }
            }
        }

        match src {
            Operand::Immediate(v) => {
                unknown.retain(|r| r != &dst_id);
                known.insert(dst_id, *v);
            }
            Operand::Register { id, .. } => {
                let src_id = canonicalize(id);
                unknown.retain(|r| r != &dst_id);
                if let Some(v) = known.get(&src_id).copied() {
                    known.insert(dst_id, v);
                } else {
                    pending.insert(dst_id, (src_id.clone(), 0));
                    if !unknown.contains(&src_id) {
                        unknown.push(src_id);
                    }
                }
            }
            Operand::Memory { base, disp } => {
                let src_id = base.clone();
                let disp = *disp;
                unknown.retain(|r| r != &dst_id);
                if let Some(v) = known.get(&src_id).copied() {
                    known.insert(dst_id, v + disp);
                } else {
                    pending.insert(dst_id, (src_id.clone(), disp));
                    if !unknown.contains(&src_id) {
                        unknown.push(src_id);
                    }
                }
            }
        }
    }

    if pending.contains_key(STACK_POINTER_ID) {
        return Err(AnalysisError::UnresolvableStackDependency {
            register: register.to_string(),
            address: target.address,
        });
    }

    if unknown.len() > 1 {
        return Err(AnalysisError::AmbiguousDataflow {
            register: register.to_string(),
            address: target.address,
            unresolved: unknown,
        });
    }

    if let Some(only) = unknown.into_iter().next() {
        let arg_index: u32 = only.parse().map_err(|_| AnalysisError::AmbiguousDataflow {
            register: register.to_string(),
            address: target.address,
            unresolved: vec![only.clone()],
        })?;
        return Ok(RegisterContents::FunctionArg(arg_index));
    }

    let value = resolve_pending(&canonicalize(register), &mut known, &pending)
        .ok_or(AnalysisError::AmbiguousDataflow {
            register: register.to_string(),
            address: target.address,
            unresolved: vec![canonicalize(register)],
        })?;

    Ok(RegisterContents::Immediate(value))
}

/// Chase `pending` links to compute the final value of `reg`, memoizing
/// into `known` as it goes.
fn resolve_pending(
    reg: &str,
    known: &mut HashMap<String, i64>,
    pending: &HashMap<String, PendingLink>,
) -> Option<i64> {
    if let Some(v) = known.get(reg) {
        return Some(*v);
    }

    let (src, off) = pending.get(reg)?.clone();
    let src_value = resolve_pending(&src, known, pending)?;
    let value = src_value + off;
    known.insert(reg.to_string(), value);
    Some(value)
}

/// `track_reg` (spec.md §4.3): forward scan collecting every register that
/// still holds the same value as `initial_register` under `mov` alone.
/// Grounded directly in the original `strongarm` analyzer's `track_reg`.
///
/// spec.md §7: a `mov` with an operand count other than 2 is malformed
/// input (decoder bug or corrupted instruction stream), not a case to skip
/// past -- the original's `track_reg` raises `RuntimeError` for exactly
/// this.
pub fn track_reg(instructions: &[Instruction], initial_register: &str) -> Result<Vec<String>> {
    let mut holding = vec![canonicalize(initial_register)];

    for instr in instructions {
        if instr.mnemonic() != "mov" {
            continue;
        }
        if instr.operands.len() != 2 {
            return Err(AnalysisError::MalformedInstruction {
                address: instr.address,
                mnemonic: instr.mnemonic.clone(),
                expected: 2,
                actual: instr.operands.len(),
            });
        }
        let dst = match instr.operands[0].register_id() {
            Some(id) => id.to_string(),
            None => continue,
        };
        let src = match instr.operands[1].register_id() {
            Some(id) => id.to_string(),
            None => continue,
        };

        if holding.contains(&src) && !holding.contains(&dst) {
            holding.push(dst);
        } else if holding.contains(&dst) && !holding.contains(&src) {
            holding.retain(|r| r != &dst);
        }
    }

    Ok(holding)
}
