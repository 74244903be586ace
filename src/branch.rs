//! Branch classifier (spec.md §4.2): decides whether an instruction is a
//! branch and, if so, resolves its destination and classifies it.

use crate::binary::{BinaryReader, ObjcMetadata};
use crate::dataflow::{register_contents_at, RegisterContents};
use crate::instruction::{
    Instruction, CONDITIONAL_BRANCH_MNEMONICS, CONDITIONAL_BRANCH_PREFIXES, DIRECT_CALL_MNEMONICS,
    DIRECT_JUMP_MNEMONICS, INDIRECT_CALL_MNEMONICS, INDIRECT_JUMP_MNEMONICS,
};
use crate::operand::Operand;
use serde::Serialize;

const MSGSEND_SYMBOLS: [&str; 4] = [
    "_objc_msgSend",
    "_objc_msgSendSuper",
    "_objc_msgSendSuper2",
    "_objc_msgSend_stret",
];

/// Tagged branch variant (spec.md §9 redesign flag, replacing the legacy
/// boolean-flag bag of spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BranchKind {
    DirectCall,
    DirectJump,
    IndirectCall,
    IndirectJump,
    Conditional,
}

impl BranchKind {
    fn classify_mnemonic(mnemonic: &str) -> Option<Self> {
        let m = mnemonic.to_ascii_lowercase();
        if DIRECT_CALL_MNEMONICS.contains(&m.as_str()) {
            Some(BranchKind::DirectCall)
        } else if DIRECT_JUMP_MNEMONICS.contains(&m.as_str()) {
            Some(BranchKind::DirectJump)
        } else if INDIRECT_CALL_MNEMONICS.contains(&m.as_str()) {
            Some(BranchKind::IndirectCall)
        } else if INDIRECT_JUMP_MNEMONICS.contains(&m.as_str()) {
            Some(BranchKind::IndirectJump)
        } else if CONDITIONAL_BRANCH_MNEMONICS.contains(&m.as_str())
            || CONDITIONAL_BRANCH_PREFIXES.iter().any(|p| m.starts_with(p))
        {
            Some(BranchKind::Conditional)
        } else {
            None
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, BranchKind::DirectCall | BranchKind::IndirectCall)
    }
}

/// A classified branch (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchInstruction {
    pub address: u64,
    pub mnemonic: String,
    pub kind: BranchKind,
    pub destination: Option<u64>,
    pub symbol: Option<String>,
    /// The msgSend call's resolved selref pointer, present only when the
    /// data-flow engine could pin down `x1` at this call (spec.md §4.2).
    pub selref: Option<u64>,
    /// Set once the selref has been resolved against the external
    /// Objective-C metadata collaborator and found to point outside the
    /// binary's own defined text (spec.md §9 Open Question, resolved in
    /// SPEC_FULL.md §2).
    is_msgsend: bool,
    is_external_c_call: bool,
    is_external_objc_call: bool,
}

impl BranchInstruction {
    pub fn is_msgsend_call(&self) -> bool {
        self.is_msgsend
    }

    pub fn is_external_c_call(&self) -> bool {
        self.is_external_c_call
    }

    pub fn is_external_objc_call(&self) -> bool {
        self.is_external_objc_call
    }
}

/// Classify `instr` against the surrounding `instructions` slice (needed so
/// the data-flow engine can resolve `x1` for msgSend calls), returning
/// `None` if it is not a branch. `instr_index` is `instr`'s position within
/// `instructions`.
pub fn classify_branch(
    instructions: &[Instruction],
    instr_index: usize,
    binary: &dyn BinaryReader,
    objc: &dyn ObjcMetadata,
    excluded_defining_mnemonics: &[String],
) -> Option<BranchInstruction> {
    let instr = &instructions[instr_index];
    let kind = BranchKind::classify_mnemonic(instr.mnemonic())?;

    let destination = match kind {
        BranchKind::DirectCall | BranchKind::DirectJump => match instr.operand(0) {
            Some(Operand::Immediate(v)) => Some(*v as u64),
            _ => None,
        },
        // cbz/cbnz/tbz/tbnz/b.cond always target an immediate label, carried
        // as their last operand (preceded by a register, and for tbz/tbnz a
        // bit-position immediate).
        BranchKind::Conditional => match instr.operands.last() {
            Some(Operand::Immediate(v)) => Some(*v as u64),
            _ => None,
        },
        BranchKind::IndirectCall | BranchKind::IndirectJump => {
            resolve_indirect_destination(instructions, instr_index, excluded_defining_mnemonics)
        }
    };

    let symbol = destination.and_then(|d| binary.symbol_name_at(d).map(|s| s.to_string()));

    let mut is_msgsend = false;
    let mut is_external_c_call = false;
    let mut is_external_objc_call = false;
    let mut selref = None;

    if kind == BranchKind::DirectCall {
        let is_msgsend_symbol = symbol.as_deref().map(|s| MSGSEND_SYMBOLS.contains(&s)).unwrap_or(false);
        if is_msgsend_symbol {
            is_msgsend = true;
            if let Ok(RegisterContents::Immediate(p)) =
                register_contents_at(instructions, instr_index, "x1", excluded_defining_mnemonics)
            {
                let ptr = p as u64;
                selref = Some(ptr);
                let resolved = objc.selector_for_selref(ptr);
                let (text_start, text_end) = binary.defined_text_range();
                is_external_objc_call = match resolved.and_then(|s| s.implementation_address) {
                    Some(addr) => !(addr >= text_start && addr < text_end),
                    None => true,
                };
            }
        } else {
            // spec.md §4.2: "else if A resolves to a symbol outside the
            // binary's defined-text range, mark is_external_c_call." A
            // destination with no symbol at all is the same signal --
            // nothing this binary defines claims that address.
            let (text_start, text_end) = binary.defined_text_range();
            is_external_c_call = destination.map(|d| !(d >= text_start && d < text_end)).unwrap_or(false);
        }
    }

    Some(BranchInstruction {
        address: instr.address,
        mnemonic: instr.mnemonic.clone(),
        kind,
        destination,
        symbol,
        selref,
        is_msgsend,
        is_external_c_call,
        is_external_objc_call,
    })
}

fn resolve_indirect_destination(
    instructions: &[Instruction],
    instr_index: usize,
    excluded_defining_mnemonics: &[String],
) -> Option<u64> {
    let instr = &instructions[instr_index];
    let reg = instr.operand(0)?.register_id()?;
    match register_contents_at(instructions, instr_index, reg, excluded_defining_mnemonics) {
        Ok(RegisterContents::Immediate(v)) => Some(v as u64),
        _ => None,
    }
}
