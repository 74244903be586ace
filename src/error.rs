use thiserror::Error;

/// Error taxonomy for the analyzer core.
///
/// `UnresolvableStackDependency` and `AmbiguousDataflow` are expected in
/// practice -- callers are meant to match on them and fall back -- while
/// the rest indicate either malformed input or programmer error and need
/// not be recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("function at {start:#x} has no instructions at index {index}")]
    IndexOutOfBounds { start: u64, index: usize },

    #[error("instruction {mnemonic} at {address:#x} has {actual} operands, expected {expected}")]
    MalformedInstruction {
        address: u64,
        mnemonic: String,
        expected: usize,
        actual: usize,
    },

    #[error("register {register} at {address:#x} depends on the stack pointer, cannot be determined statically")]
    UnresolvableStackDependency { register: String, address: u64 },

    #[error("register {register} at {address:#x} has ambiguous dataflow: unresolved registers {unresolved:?}")]
    AmbiguousDataflow {
        register: String,
        address: u64,
        unresolved: Vec<String>,
    },

    #[error("instruction at {address:#x} with mnemonic {mnemonic} is not applicable here: {reason}")]
    InvalidArgument {
        address: u64,
        mnemonic: String,
        reason: String,
    },

    #[error("search did not find a matching instruction: {0}")]
    SearchMiss(String),

    #[error("{0} is reserved and not evaluated inside the per-instruction loop")]
    NotImplemented(String),

    #[error("disassembly failed at {address:#x}: {reason}")]
    DisassemblyFailed { address: u64, reason: String },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
