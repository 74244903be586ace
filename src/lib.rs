//! `armscope`: an ARM64 function analyzer.
//!
//! Given ARM64 function bytes and a few small collaborator contracts (a
//! byte-addressable binary reader, a disassembler, and an Objective-C
//! selector resolver), this crate answers "what does register R contain at
//! instruction I?", classifies branches (local call, external C call,
//! Objective-C message send), runs composable predicate searches over a
//! function's instructions, and locates the `invoke` call of an
//! Objective-C block trampoline.
//!
//! Mach-O container parsing and Objective-C runtime metadata recovery are
//! out of scope; see [`binary::BinaryReader`] and [`binary::ObjcMetadata`]
//! for the contracts a real embedder supplies.

pub mod binary;
pub mod block;
pub mod branch;
pub mod dataflow;
pub mod disasm;
pub mod error;
pub mod function;
pub mod instruction;
pub mod operand;
pub mod search;

pub use binary::{BinaryReader, FixtureBinary, ObjcMetadata, SelectorInfo, StaticSelectorTable};
pub use block::BlockAnalyzer;
pub use branch::{BranchInstruction, BranchKind};
pub use dataflow::{register_contents_at, track_reg, RegisterContents};
pub use disasm::{CapstoneArm64Disassembler, Disassembler};
pub use error::{AnalysisError, Result};
pub use function::{AnalysisConfig, AnalysisContext, FunctionAnalyzer};
pub use instruction::Instruction;
pub use operand::{Operand, Width};
pub use search::{CodeSearch, CodeSearchResult, MatchMode, OperandKind, Predicate};
