//! Collaborator contracts the core depends on but does not implement in
//! full (spec.md §1, §6): the Mach-O container, the ARM64 decoder, and the
//! Objective-C runtime metadata reader. Only thin, fixture-grade
//! implementations live here; a production embedder is expected to supply
//! its own `BinaryReader`/`ObjcMetadata` backed by a real Mach-O parser.

use std::collections::HashMap;

/// Byte-addressable access into a loaded binary, plus symbol resolution.
pub trait BinaryReader {
    fn read_bytes(&self, addr: u64, len: usize) -> Option<&[u8]>;
    fn read_string_at(&self, addr: u64) -> Option<String>;
    fn symbol_name_at(&self, addr: u64) -> Option<&str>;
    fn contains_address(&self, addr: u64) -> bool;

    /// The `[start, end)` range of addresses this binary considers its own
    /// defined text -- used by the branch classifier to decide whether a
    /// call destination is external (spec.md §4.2).
    fn defined_text_range(&self) -> (u64, u64);
}

/// Resolved Objective-C selector metadata (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorInfo {
    pub selector_literal: String,
    pub implementation_address: Option<u64>,
}

/// "What selector lives at this selref pointer, and what implements it?"
pub trait ObjcMetadata {
    fn selector_for_selref(&self, selref_ptr: u64) -> Option<SelectorInfo>;
}

/// An in-memory stand-in for a loaded Mach-O image: a flat byte buffer
/// based at `base_address`, a symbol table, and a defined-text range. Used
/// by tests and the demo binary in place of a real Mach-O parser, which is
/// out of scope for this crate (spec.md §1).
#[derive(Debug, Default)]
pub struct FixtureBinary {
    base_address: u64,
    bytes: Vec<u8>,
    symbols: HashMap<u64, String>,
    text_start: u64,
    text_end: u64,
}

impl FixtureBinary {
    pub fn new(base_address: u64, bytes: Vec<u8>) -> Self {
        let text_start = base_address;
        let text_end = base_address + bytes.len() as u64;
        Self {
            base_address,
            bytes,
            symbols: HashMap::new(),
            text_start,
            text_end,
        }
    }

    pub fn with_symbol(mut self, addr: u64, name: impl Into<String>) -> Self {
        self.symbols.insert(addr, name.into());
        self
    }

    pub fn with_text_range(mut self, start: u64, end: u64) -> Self {
        self.text_start = start;
        self.text_end = end;
        self
    }
}

impl BinaryReader for FixtureBinary {
    fn read_bytes(&self, addr: u64, len: usize) -> Option<&[u8]> {
        if addr < self.base_address {
            return None;
        }
        let offset = (addr - self.base_address) as usize;
        self.bytes.get(offset..offset.checked_add(len)?)
    }

    fn read_string_at(&self, addr: u64) -> Option<String> {
        if addr < self.base_address {
            return None;
        }
        let offset = (addr - self.base_address) as usize;
        let slice = self.bytes.get(offset..)?;
        let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
        String::from_utf8(slice[..end].to_vec()).ok()
    }

    fn symbol_name_at(&self, addr: u64) -> Option<&str> {
        self.symbols.get(&addr).map(|s| s.as_str())
    }

    fn contains_address(&self, addr: u64) -> bool {
        addr >= self.base_address && addr < self.base_address + self.bytes.len() as u64
    }

    fn defined_text_range(&self) -> (u64, u64) {
        (self.text_start, self.text_end)
    }
}

/// A `HashMap`-backed `ObjcMetadata` for tests and the demo binary.
#[derive(Debug, Default)]
pub struct StaticSelectorTable {
    selrefs: HashMap<u64, SelectorInfo>,
}

impl StaticSelectorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selref(
        mut self,
        selref_ptr: u64,
        selector_literal: impl Into<String>,
        implementation_address: Option<u64>,
    ) -> Self {
        self.selrefs.insert(
            selref_ptr,
            SelectorInfo {
                selector_literal: selector_literal.into(),
                implementation_address,
            },
        );
        self
    }
}

impl ObjcMetadata for StaticSelectorTable {
    fn selector_for_selref(&self, selref_ptr: u64) -> Option<SelectorInfo> {
        self.selrefs.get(&selref_ptr).cloned()
    }
}
