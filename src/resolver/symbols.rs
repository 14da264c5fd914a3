//! ELF symbol table lookup
//!
//! Used as the address source for variables whose debug entry carries no
//! location (typically `extern` declarations whose defining unit was built
//! without debug info). Only data symbols are indexed.

use cpp_demangle::Symbol as CppSymbol;
use object::{Object, ObjectSymbol, SymbolKind};
use rustc_demangle::demangle as rust_demangle;
use std::collections::HashMap;

/// A data symbol from the ELF symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

/// Data symbols indexed by raw, demangled, and short name
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    by_name: HashMap<String, SymbolEntry>,
    count: usize,
}

impl SymbolTable {
    /// Build the table from a parsed object file
    pub fn from_object(file: &object::File) -> Self {
        let mut table = SymbolTable::default();
        for symbol in file.symbols() {
            if symbol.kind() != SymbolKind::Data || symbol.is_undefined() {
                continue;
            }
            let Ok(name) = symbol.name() else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            table.add(SymbolEntry {
                name: name.to_string(),
                address: symbol.address(),
                size: symbol.size(),
            });
        }
        tracing::debug!("Symbol table: {} data symbols", table.count);
        table
    }

    /// Parse raw ELF bytes; an unparsable file yields an empty table
    pub fn from_bytes(data: &[u8]) -> Self {
        match object::File::parse(data) {
            Ok(file) => Self::from_object(&file),
            Err(e) => {
                tracing::debug!("No symbol table available: {}", e);
                SymbolTable::default()
            }
        }
    }

    /// Insert a symbol under its raw, demangled and short names
    pub fn add(&mut self, entry: SymbolEntry) {
        let demangled = demangle_symbol(&entry.name);
        let short = extract_short_name(&demangled);
        for key in [short, demangled] {
            if key != entry.name {
                self.by_name.entry(key).or_insert_with(|| entry.clone());
            }
        }
        self.by_name.insert(entry.name.clone(), entry);
        self.count += 1;
    }

    /// Find a symbol by any of its names
    pub fn find(&self, name: &str) -> Option<&SymbolEntry> {
        self.by_name.get(name)
    }

    /// Number of distinct symbols
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Demangle a symbol name (supports C++ and Rust mangling)
pub fn demangle_symbol(mangled: &str) -> String {
    if let Ok(symbol) = CppSymbol::new(mangled) {
        if let Ok(demangled) = symbol.demangle(&cpp_demangle::DemangleOptions::default()) {
            return demangled;
        }
    }

    let demangled = rust_demangle(mangled).to_string();
    if demangled != mangled {
        return demangled;
    }

    mangled.to_string()
}

/// Last path component of a demangled name, without template arguments
fn extract_short_name(demangled: &str) -> String {
    let mut cleaned = String::with_capacity(demangled.len());
    let mut depth = 0i32;
    for c in demangled.chars() {
        match c {
            '<' | '(' => depth += 1,
            '>' | ')' => depth = (depth - 1).max(0),
            _ if depth == 0 => cleaned.push(c),
            _ => {}
        }
    }

    match cleaned.rsplit("::").next().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => demangled.to_string(),
    }
}
