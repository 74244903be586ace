//! The normalized instruction model (spec.md §3).

use crate::operand::Operand;
use serde::Serialize;
use std::fmt;

/// One decoded, normalized ARM64 instruction.
///
/// Immutable once constructed. `raw` is the 4-byte encoding and doubles as
/// the "back-pointer to the raw decoded form" spec.md §3 asks for -- since
/// ARM64 instructions are fixed-width, any `Disassembler` can re-decode a
/// single instruction from `raw` alone if a caller needs more detail than
/// the normalized operand list exposes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub address: u64,
    pub mnemonic: String,
    pub operands: Vec<Operand>,
    pub raw: u32,
}

impl Instruction {
    pub fn new(address: u64, mnemonic: impl Into<String>, operands: Vec<Operand>, raw: u32) -> Self {
        Self {
            address,
            mnemonic: mnemonic.into(),
            operands,
            raw,
        }
    }

    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }

    pub fn next_address(&self) -> u64 {
        self.address + INSTRUCTION_STRIDE
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ops = self
            .operands
            .iter()
            .map(|o| o.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{:#x}:\t{}\t{}", self.address, self.mnemonic, ops)
    }
}

/// ARM64 instructions are fixed 4 bytes wide; this is asserted throughout
/// the analyzer via the address-stride invariant (spec.md §3, §8).
pub const INSTRUCTION_STRIDE: u64 = 4;

/// Mnemonics recognized by the branch classifier (spec.md §4.2).
pub const DIRECT_CALL_MNEMONICS: [&str; 1] = ["bl"];
pub const DIRECT_JUMP_MNEMONICS: [&str; 1] = ["b"];
pub const INDIRECT_CALL_MNEMONICS: [&str; 1] = ["blr"];
pub const INDIRECT_JUMP_MNEMONICS: [&str; 1] = ["br"];
/// Conditional branch mnemonics. `b.` covers the full condition-code
/// family (`b.eq`, `b.ne`, ...); the rest are the explicit compare-and-
/// branch / test-bit-and-branch forms spec.md §4.2 names.
pub const CONDITIONAL_BRANCH_PREFIXES: [&str; 1] = ["b."];
pub const CONDITIONAL_BRANCH_MNEMONICS: [&str; 4] = ["cbz", "cbnz", "tbz", "tbnz"];

pub fn is_branch_mnemonic(mnemonic: &str) -> bool {
    let m = mnemonic.to_ascii_lowercase();
    DIRECT_CALL_MNEMONICS.contains(&m.as_str())
        || DIRECT_JUMP_MNEMONICS.contains(&m.as_str())
        || INDIRECT_CALL_MNEMONICS.contains(&m.as_str())
        || INDIRECT_JUMP_MNEMONICS.contains(&m.as_str())
        || CONDITIONAL_BRANCH_MNEMONICS.contains(&m.as_str())
        || CONDITIONAL_BRANCH_PREFIXES.iter().any(|p| m.starts_with(p))
}

/// Folds a 3-operand `add`/`sub` of the shape `dst, reg, #imm` into a
/// 2-operand `dst, Memory { base: reg, disp }` pair, as decided in
/// SPEC_FULL.md §1: `Operand::Memory` already means "base register id plus
/// signed displacement" with no requirement that it came from a bracketed
/// load/store operand, and an add/sub-immediate is the same shape. Left
/// untouched otherwise (including the zero-register idiom, which the
/// dataflow engine itself handles per spec.md §4.3 step 5).
pub fn normalize_arithmetic_operands(mnemonic: &str, operands: Vec<Operand>) -> Vec<Operand> {
    let is_add = mnemonic.eq_ignore_ascii_case("add");
    let is_sub = mnemonic.eq_ignore_ascii_case("sub");
    if !is_add && !is_sub {
        return operands;
    }
    if operands.len() != 3 {
        return operands;
    }

    let is_zero_src =
        matches!(&operands[1], Operand::Register { id, .. } if crate::operand::is_zero_register(id));
    if is_zero_src {
        return operands;
    }

    match (&operands[1], &operands[2]) {
        (Operand::Register { id: base, .. }, Operand::Immediate(imm)) => {
            let disp = if is_sub { -imm } else { *imm };
            vec![operands[0].clone(), Operand::Memory { base: base.clone(), disp }]
        }
        _ => operands,
    }
}

/// Mnemonics excluded from the dataflow engine's defining-instruction scan
/// (spec.md §4.3, expanded per the Design Note in spec.md §9: all store
/// variants, not just `str`).
pub fn default_excluded_defining_mnemonics() -> Vec<String> {
    [
        "str", "strb", "strh", "stur", "sturb", "sturh", "stp", "stxr", "stlr", "stlxr",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
