//! Block analyzer (spec.md §4.6): locates the `blr` that invokes an
//! Objective-C block's `invoke` pointer by data-dependency tracking.

use std::rc::Rc;

use crate::dataflow::RegisterContents;
use crate::error::{AnalysisError, Result};
use crate::function::{AnalysisContext, FunctionAnalyzer};
use crate::instruction::Instruction;
use crate::operand::canonicalize;
use crate::search::{CodeSearch, MatchMode, OperandKind, Predicate};

/// Specializes `FunctionAnalyzer` for one block trampoline: the function
/// whose entry holds an Objective-C block pointer in `block_register`.
pub struct BlockAnalyzer {
    function: Rc<FunctionAnalyzer>,
    block_register: String,
}

impl BlockAnalyzer {
    pub fn new(function: Rc<FunctionAnalyzer>, block_register: &str) -> Self {
        Self { function, block_register: canonicalize(block_register) }
    }

    /// `find_block_invoke()` (spec.md §4.6): search for `blr` with a
    /// register operand, accept the first match whose operand resolves
    /// (via the data-flow engine) to `FunctionArg` matching the block
    /// register. Uses `get_register_contents_at` per the current contract
    /// named in spec.md §9 Open Questions, not the stale
    /// `determine_register_contents` name the original carries.
    pub fn find_block_invoke(&self, context: &AnalysisContext) -> Result<(Instruction, usize)> {
        let search = CodeSearch::new(
            vec![
                Predicate::InstructionMnemonic(vec!["blr".to_string()]),
                Predicate::InstructionOperand(0, OperandKind::Register),
            ],
            MatchMode::All,
        );
        let results = crate::search::search_code(&self.function, context, &search);

        for result in results {
            let contents = self.function.get_register_contents_at(
                context,
                &self.block_register,
                result.instruction_index,
            );
            if let Ok(RegisterContents::FunctionArg(i)) = contents {
                if i.to_string() == self.block_register {
                    return Ok((result.instruction, result.instruction_index));
                }
            }
        }

        Err(AnalysisError::SearchMiss(format!(
            "no blr invoking block register {} found in function {:#x}",
            self.block_register, self.function.start_address
        )))
    }
}
