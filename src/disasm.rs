//! The ARM64 decoder collaborator (spec.md §1, §6): produces the normalized
//! instruction model of §3 from a raw byte range. Mach-O parsing and
//! Objective-C metadata recovery are separate collaborators (`binary.rs`);
//! this module only turns bytes into `Instruction`s.

use crate::error::{AnalysisError, Result};
use crate::instruction::{Instruction, INSTRUCTION_STRIDE};
use crate::operand::Operand;

use capstone::arch::arm64::{Arm64Operand, Arm64OperandType};
use capstone::arch::{self, DetailsArchInsn};
use capstone::prelude::*;

/// Given a byte range, produce the sequence of decoded instructions with
/// the normalized operand model of spec.md §3. ARM64 only; a 4-byte fixed
/// instruction size is assumed, matching the address-stride invariant.
pub trait Disassembler {
    fn disassemble(&self, code: &[u8], start_addr: u64) -> Result<Vec<Instruction>>;
}

/// `capstone`-backed ARM64 disassembler. `capstone` is the ARM64 decoder
/// used throughout the reference pack (e.g. `bytecodealliance-wasmtime`'s
/// `winch`/`cranelift` crates, Athena's `athena-disassembler`); this is the
/// one dependency swapped out from mttn's `iced-x86`, which only decodes
/// x86 (see DESIGN.md).
pub struct CapstoneArm64Disassembler {
    cs: Capstone,
}

impl CapstoneArm64Disassembler {
    pub fn new() -> Result<Self> {
        let cs = Capstone::new()
            .arm64()
            .mode(arch::arm64::ArchMode::Arm)
            .detail(true)
            .build()
            .map_err(|e| AnalysisError::DisassemblyFailed {
                address: 0,
                reason: format!("failed to construct capstone engine: {e}"),
            })?;
        Ok(Self { cs })
    }

    fn normalize_operand(&self, op: &Arm64Operand) -> Option<Operand> {
        match &op.op_type {
            Arm64OperandType::Reg(reg_id) => {
                let name = self.cs.reg_name(*reg_id)?;
                Some(Operand::register(&name))
            }
            Arm64OperandType::Imm(v) => Some(Operand::Immediate(*v)),
            Arm64OperandType::Mem(mem) => {
                let base_name = self.cs.reg_name(mem.base())?;
                let (base, _) = crate::operand::canonicalize_register(&base_name);
                Some(Operand::Memory {
                    base,
                    disp: mem.disp() as i64,
                })
            }
            _ => None,
        }
    }
}

impl Disassembler for CapstoneArm64Disassembler {
    fn disassemble(&self, code: &[u8], start_addr: u64) -> Result<Vec<Instruction>> {
        let insns = self
            .cs
            .disasm_all(code, start_addr)
            .map_err(|e| AnalysisError::DisassemblyFailed {
                address: start_addr,
                reason: e.to_string(),
            })?;

        let mut out = Vec::with_capacity(insns.len());
        for (idx, insn) in insns.iter().enumerate() {
            let expected_addr = start_addr + idx as u64 * INSTRUCTION_STRIDE;
            if insn.address() != expected_addr {
                return Err(AnalysisError::DisassemblyFailed {
                    address: insn.address(),
                    reason: format!(
                        "instruction stride violated: expected {expected_addr:#x}, got {:#x}",
                        insn.address()
                    ),
                });
            }

            let mnemonic = insn.mnemonic().unwrap_or("").to_string();
            let detail = self
                .cs
                .insn_detail(insn)
                .map_err(|e| AnalysisError::DisassemblyFailed {
                    address: insn.address(),
                    reason: e.to_string(),
                })?;

            let arch_detail = detail.arch_detail();
            let arm64_detail = arch_detail.arm64().ok_or_else(|| AnalysisError::DisassemblyFailed {
                address: insn.address(),
                reason: "missing arm64 detail".to_string(),
            })?;

            let operands: Vec<Operand> = arm64_detail
                .operands()
                .filter_map(|op| self.normalize_operand(&op))
                .collect();
            let operands = crate::instruction::normalize_arithmetic_operands(&mnemonic, operands);

            let raw = insn.bytes();
            let raw_word = if raw.len() == 4 {
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
            } else {
                0
            };

            out.push(Instruction::new(insn.address(), mnemonic, operands, raw_word));
        }

        Ok(out)
    }
}
