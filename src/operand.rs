//! Normalized ARM64 operand model (spec.md §3, §4.1).

use std::fmt;

use serde::Serialize;

/// Width of a general-purpose register reference. Purely informational --
/// both widths canonicalize to the same register id, since the ABI stores
/// arguments in `x0..x7` but callees frequently address the low half
/// `w0..w7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Width {
    W32,
    W64,
}

/// A single normalized instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Operand {
    Register { id: String, width: Width },
    Immediate(i64),
    /// Base register id plus signed displacement. Produced both by real
    /// `[base, #disp]` memory operands and by the add/sub-immediate folding
    /// described in SPEC_FULL.md §1.
    Memory { base: String, disp: i64 },
}

impl Operand {
    pub fn register(name: &str) -> Self {
        let (id, width) = canonicalize_register(name);
        Operand::Register { id, width }
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Register { .. })
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Operand::Immediate(_))
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Memory { .. })
    }

    /// The canonicalized register id, if this operand is a register.
    pub fn register_id(&self) -> Option<&str> {
        match self {
            Operand::Register { id, .. } => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register { id, width } => {
                let prefix = match width {
                    Width::W64 => "x",
                    Width::W32 => "w",
                };
                if is_canonical_gp_id(id) {
                    write!(f, "{prefix}{id}")
                } else {
                    write!(f, "{id}")
                }
            }
            Operand::Immediate(v) => write!(f, "#{v:#x}"),
            Operand::Memory { base, disp } => write!(f, "[{base}, #{disp:#x}]"),
        }
    }
}

/// A name is a canonical GP register id if it parses as a plain integer
/// (0..=30), as opposed to `sp`, `zr`, vector register names, etc.
fn is_canonical_gp_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
}

/// Canonicalization rule (spec.md §4.1): any register name beginning with
/// `x` or `w` has that prefix stripped, unconditionally -- including `xzr`/
/// `wzr`, which both collapse to the id `"zr"`; all other names (`sp`,
/// vector registers) are returned verbatim. This collapses `x22`/`w22` to
/// the id `"22"`. Mirrors `_trimmed_reg_name` in
/// `original_source/strongarm/objc/objc_analyzer.py`, which strips on the
/// first character alone with no lookahead.
pub fn canonicalize_register(name: &str) -> (String, Width) {
    let lower = name.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some('x') => (chars.collect(), Width::W64),
        Some('w') => (chars.collect(), Width::W32),
        _ => (lower, Width::W64),
    }
}

/// Canonicalize and return only the id, discarding width. This is the form
/// the dataflow engine and search predicates operate on.
pub fn canonicalize(name: &str) -> String {
    canonicalize_register(name).0
}

/// The canonicalized id both `xzr` and `wzr` collapse to.
pub const ZERO_REGISTER_ID: &str = "zr";

/// True for `xzr`/`wzr` in either raw or already-canonicalized form -- both
/// canonicalize to `"zr"`, so this just re-applies `canonicalize` rather
/// than assuming which form the caller holds.
pub fn is_zero_register(name: &str) -> bool {
    canonicalize(name) == ZERO_REGISTER_ID
}

pub const STACK_POINTER_ID: &str = "sp";
