//! Function analyzer (spec.md §4.4) and the shared analyzer context
//! (spec.md §9): owns one function's instruction slice, caches its branch
//! list, and answers reachability questions.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::binary::{BinaryReader, ObjcMetadata};
use crate::branch::{classify_branch, BranchInstruction};
use crate::dataflow::{register_contents_at, RegisterContents};
use crate::disasm::Disassembler;
use crate::error::{AnalysisError, Result};
use crate::instruction::{default_excluded_defining_mnemonics, Instruction};

/// Knobs an embedding host may legitimately vary (SPEC_FULL.md §6).
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Bounds `can_execute_call`'s recursion over the inter-procedural call
    /// graph (spec.md §5, §9).
    pub max_reachability_depth: usize,
    /// Mnemonics the data-flow engine's backward walk skips even when they
    /// look like `dst, src` pairs (spec.md §4.3 step 3, expanded per the
    /// Design Note in spec.md §9).
    pub excluded_defining_mnemonics: Vec<String>,
    /// Byte window disassembled when `can_execute_call` constructs a callee
    /// analyzer on the fly and no explicit function length is available
    /// from the (out-of-scope) Mach-O symbol table.
    pub default_function_window: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_reachability_depth: 64,
            excluded_defining_mnemonics: default_excluded_defining_mnemonics(),
            default_function_window: 4096,
        }
    }
}

/// The explicitly-passed context object spec.md §9 asks for in place of a
/// process-wide analyzer cache: owns the three collaborator contracts plus
/// a cache of analyzers keyed by function start address.
pub struct AnalysisContext {
    binary: Box<dyn BinaryReader>,
    disassembler: Box<dyn Disassembler>,
    objc: Box<dyn ObjcMetadata>,
    config: AnalysisConfig,
    cache: RefCell<HashMap<u64, Rc<FunctionAnalyzer>>>,
}

impl AnalysisContext {
    pub fn new(
        binary: Box<dyn BinaryReader>,
        disassembler: Box<dyn Disassembler>,
        objc: Box<dyn ObjcMetadata>,
        config: AnalysisConfig,
    ) -> Rc<Self> {
        Rc::new(Self {
            binary,
            disassembler,
            objc,
            config,
            cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn binary(&self) -> &dyn BinaryReader {
        self.binary.as_ref()
    }

    pub fn objc(&self) -> &dyn ObjcMetadata {
        self.objc.as_ref()
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn cached(&self, start_address: u64) -> Option<Rc<FunctionAnalyzer>> {
        self.cache.borrow().get(&start_address).cloned()
    }

    fn insert_cache(&self, start_address: u64, analyzer: Rc<FunctionAnalyzer>) {
        self.cache.borrow_mut().insert(start_address, analyzer);
    }
}

/// Owns one function's decoded instructions (spec.md §3, §4.4).
pub struct FunctionAnalyzer {
    pub start_address: u64,
    pub end_address: u64,
    instructions: Vec<Instruction>,
    branch_cache: RefCell<Option<Vec<BranchInstruction>>>,
}

impl FunctionAnalyzer {
    /// Disassemble `byte_len` bytes at `start_address` and wrap the result,
    /// reusing a cached analyzer for the same start address if one exists
    /// (spec.md §9: "shared by all callers, lifetime = longest holder").
    pub fn for_function(
        context: &Rc<AnalysisContext>,
        start_address: u64,
        byte_len: usize,
    ) -> Result<Rc<FunctionAnalyzer>> {
        if let Some(cached) = context.cached(start_address) {
            return Ok(cached);
        }

        let bytes = context
            .binary
            .read_bytes(start_address, byte_len)
            .ok_or(AnalysisError::IndexOutOfBounds { start: start_address, index: 0 })?;
        let instructions = context.disassembler.disassemble(bytes, start_address)?;

        let (effective_start, end_address) = if instructions.is_empty() {
            // spec.md §3: an empty instruction vector is a permitted stub
            // function and yields start=end=0. The cache is still keyed by
            // the originally requested address so distinct stub functions
            // don't alias onto each other.
            (0, 0)
        } else {
            let end = instructions.last().unwrap().address;
            (start_address, end)
        };

        let analyzer = Rc::new(FunctionAnalyzer {
            start_address: effective_start,
            end_address,
            instructions,
            branch_cache: RefCell::new(None),
        });
        context.insert_cache(start_address, Rc::clone(&analyzer));
        Ok(analyzer)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// `call_targets()` (spec.md §4.4): every branch in program order,
    /// computed once and cached.
    pub fn call_targets(&self, context: &AnalysisContext) -> Vec<BranchInstruction> {
        if let Some(cached) = self.branch_cache.borrow().as_ref() {
            return cached.clone();
        }

        let mut out = Vec::new();
        for idx in 0..self.instructions.len() {
            if let Some(branch) = classify_branch(
                &self.instructions,
                idx,
                context.binary(),
                context.objc(),
                &context.config().excluded_defining_mnemonics,
            ) {
                log::trace!(
                    "fn {:#x}+{idx}: classified branch {:?} -> {:?}",
                    self.start_address,
                    branch.kind,
                    branch.destination
                );
                out.push(branch);
            }
        }

        *self.branch_cache.borrow_mut() = Some(out.clone());
        out
    }

    /// `local_branches()` (spec.md §4.4): the subset of `call_targets()`
    /// whose destination falls inside this function's own range.
    pub fn local_branches(&self, context: &AnalysisContext) -> Vec<BranchInstruction> {
        self.call_targets(context)
            .into_iter()
            .filter(|b| self.is_local_branch(b))
            .collect()
    }

    /// `is_local_branch()` (spec.md §4.4).
    pub fn is_local_branch(&self, branch: &BranchInstruction) -> bool {
        match branch.destination {
            Some(d) => d >= self.start_address && d <= self.end_address,
            None => false,
        }
    }

    /// `can_execute_call()` (spec.md §4.4): bounded depth-first traversal
    /// over the inter-procedural call graph.
    pub fn can_execute_call(self: &Rc<Self>, context: &Rc<AnalysisContext>, target_addr: u64) -> Result<bool> {
        let mut visited = HashSet::new();
        self.can_execute_call_inner(context, target_addr, &mut visited, 0)
    }

    fn can_execute_call_inner(
        self: &Rc<Self>,
        context: &Rc<AnalysisContext>,
        target_addr: u64,
        visited: &mut HashSet<u64>,
        depth: usize,
    ) -> Result<bool> {
        if depth >= context.config().max_reachability_depth {
            log::debug!("fn {:#x}: reachability probe hit max depth, treating as not found", self.start_address);
            return Ok(false);
        }
        if !visited.insert(self.start_address) {
            return Ok(false);
        }

        for branch in self.call_targets(context) {
            if branch.destination == Some(target_addr) {
                return Ok(true);
            }
            if branch.is_external_c_call() {
                continue;
            }
            if self.is_local_branch(&branch) {
                continue;
            }
            if branch.is_external_objc_call() {
                continue;
            }
            let Some(dest) = branch.destination else { continue };

            // spec.md §7: a dataflow failure inside the recursive probe is
            // "path not taken", not an error to propagate.
            let child = match FunctionAnalyzer::for_function(context, dest, context.config().default_function_window) {
                Ok(child) => child,
                Err(_) => continue,
            };
            if child.can_execute_call_inner(context, target_addr, visited, depth + 1)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// `get_selref_ptr()` (spec.md §4.4): requires mnemonic `bl`, resolves
    /// `x1` via the data-flow engine, requires an `Immediate` result.
    pub fn get_selref_ptr(&self, context: &AnalysisContext, msgsend_index: usize) -> Result<u64> {
        let instr = self
            .instructions
            .get(msgsend_index)
            .ok_or(AnalysisError::IndexOutOfBounds { start: self.start_address, index: msgsend_index })?;

        if instr.mnemonic() != "bl" {
            return Err(AnalysisError::InvalidArgument {
                address: instr.address,
                mnemonic: instr.mnemonic.clone(),
                reason: "get_selref_ptr requires a bl instruction".to_string(),
            });
        }

        match register_contents_at(
            &self.instructions,
            msgsend_index,
            "x1",
            &context.config().excluded_defining_mnemonics,
        )? {
            RegisterContents::Immediate(v) => Ok(v as u64),
            RegisterContents::FunctionArg(i) => Err(AnalysisError::InvalidArgument {
                address: instr.address,
                mnemonic: instr.mnemonic.clone(),
                reason: format!("x1 resolved to function argument {i}, not a selref pointer"),
            }),
        }
    }

    /// `next_branch_after()` (spec.md §4.4): the first branch at or after
    /// `index`, or `None` at end of function. Message-send destinations are
    /// already resolved as part of `call_targets()`.
    pub fn next_branch_after(&self, context: &AnalysisContext, index: usize) -> Option<BranchInstruction> {
        let Some(from) = self.instructions.get(index) else { return None };
        self.call_targets(context).into_iter().find(|b| b.address >= from.address)
    }

    /// `get_register_contents_at()` (spec.md §6 public surface).
    pub fn get_register_contents_at(
        &self,
        context: &AnalysisContext,
        register: &str,
        instruction_index: usize,
    ) -> Result<RegisterContents> {
        register_contents_at(
            &self.instructions,
            instruction_index,
            register,
            &context.config().excluded_defining_mnemonics,
        )
    }
}
