//! Text-dump backend for 16-bit toolchains
//!
//! The 16-bit compilers ship a `readelf` that understands their DWARF 2
//! output. This backend runs it with `-w` and parses the `.debug_info` part of
//! the text, which looks like:
//!
//! ```text
//!   Compilation Unit @ offset 0x0:
//!    Length:        187
//!    Version:       2
//!    Abbrev Offset: 0
//!    Pointer Size:  2
//!  <0><b>: Abbrev Number: 1 (DW_TAG_compile_unit)
//!     <c>   DW_AT_name        : main.c
//!  <1><2d>: Abbrev Number: 2 (DW_TAG_base_type)
//!     <2e>   DW_AT_byte_size   : 2
//!     <30>   DW_AT_name        : int
//!  <1><34>: Abbrev Number: 3 (DW_TAG_variable)
//!     <35>   DW_AT_name        : counter
//!     <3d>   DW_AT_type        : <0x2d>
//!     <42>   DW_AT_location    : 3 byte block: 3 0 8 	(DW_OP_addr: 800)
//! ```
//!
//! Entry offsets are absolute. A reference is only followed when some unit's
//! `[offset, offset + length + 4)` range contains it.

use super::graph::{
    Aggregate, DeclKind, DieOffset, EnumType, Location, Member, TypeGraph, TypeId, TypeNode,
    VariableDie,
};
use super::symbols::SymbolTable;
use super::{DebugGraph, DebugInfoSource};
use crate::config::LegacyDumpConfig;
use crate::error::{Result, X2cError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

static UNIT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Compilation Unit @ offset 0x([0-9a-fA-F]+):").expect("valid regex")
});
static UNIT_LENGTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Length:\s*(0x[0-9a-fA-F]+|\d+)(?:\s*\((32|64)-bit\))?").expect("valid regex")
});
static POINTER_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Pointer Size:\s*(\d+)").expect("valid regex"));
static ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*<(\d+)><([0-9a-fA-F]+)>: Abbrev Number: (\d+)(?:\s+\((DW_TAG_\w+)\))?")
        .expect("valid regex")
});
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:<[0-9a-fA-F]+>\s+)?(DW_AT_\w+)\s*:\s?(.*)$").expect("valid regex")
});
static INDIRECT_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\(indirect(?: line)? string, offset: 0x[0-9a-fA-F]+\):\s*").expect("valid regex")
});
static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<0x([0-9a-fA-F]+)>").expect("valid regex"));
static OP_ADDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DW_OP_addr:\s*(?:0x)?([0-9a-fA-F]+)").expect("valid regex"));
static OP_PLUS_UCONST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DW_OP_plus_uconst:\s*(\d+)").expect("valid regex"));
static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+) byte block:((?:\s+[0-9a-fA-F]+)*)").expect("valid regex")
});

/// Backend that runs an external dump tool and parses its text
#[derive(Debug, Clone)]
pub struct TextDumpSource {
    tool: PathBuf,
    args: Vec<String>,
}

impl TextDumpSource {
    pub fn new(tool: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }

    pub fn from_config(config: &LegacyDumpConfig) -> Self {
        Self::new(config.tool.clone(), config.args.clone())
    }

    /// Parse captured dump text; no tool is run and no symbol table is read
    pub fn parse_dump(text: &str) -> Result<DebugGraph> {
        let dump = Dump::parse(text);
        if dump.units.is_empty() {
            return Err(X2cError::ElfLoad(
                "no compilation units in debug dump".to_string(),
            ));
        }
        let graph = dump.lower();
        tracing::debug!(
            "Text dump: {} units ({}-byte pointers), {} types, {} variables",
            dump.units.len(),
            dump.units.iter().find_map(|u| u.pointer_size).unwrap_or(0),
            graph.types.len(),
            graph.variables.len()
        );
        Ok(graph)
    }

    fn run_tool(&self, path: &Path) -> Result<String> {
        let output = Command::new(&self.tool)
            .args(&self.args)
            .arg(path)
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => X2cError::DumpToolMissing {
                    tool: self.tool.display().to_string(),
                },
                _ => X2cError::ElfLoad(format!(
                    "Failed to run {}: {}",
                    self.tool.display(),
                    e
                )),
            })?;
        if !output.status.success() {
            return Err(X2cError::ElfLoad(format!(
                "{} failed on {} ({}): {}",
                self.tool.display(),
                path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DebugInfoSource for TextDumpSource {
    fn name(&self) -> &'static str {
        "text dump"
    }

    fn load(&self, path: &Path) -> Result<DebugGraph> {
        if !path.is_file() {
            return Err(X2cError::ElfLoad(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let text = self.run_tool(path)?;
        let mut graph = Self::parse_dump(&text)?;
        match std::fs::read(path) {
            Ok(data) => graph.symbols = SymbolTable::from_bytes(&data),
            Err(e) => tracing::debug!("No symbol table for {}: {}", path.display(), e),
        }
        Ok(graph)
    }
}

#[derive(Debug)]
struct DumpUnit {
    start: u64,
    end: u64,
    pointer_size: Option<u64>,
}

#[derive(Debug)]
struct DumpEntry {
    offset: u64,
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<usize>,
}

impl DumpEntry {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn name(&self) -> Option<String> {
        self.attr("DW_AT_name").map(strip_indirect)
    }

    fn number(&self, name: &str) -> Option<u64> {
        self.attr(name).and_then(parse_number)
    }

    fn signed(&self, name: &str) -> Option<i64> {
        self.attr(name).and_then(parse_signed)
    }

    fn flag(&self, name: &str) -> bool {
        self.number(name).is_some_and(|v| v != 0)
    }
}

#[derive(Debug, Default)]
struct Dump {
    units: Vec<DumpUnit>,
    entries: Vec<DumpEntry>,
}

impl Dump {
    fn parse(text: &str) -> Self {
        let mut dump = Dump::default();
        // (depth, entry index) of open parents
        let mut stack: Vec<(usize, usize)> = Vec::new();
        let mut current: Option<usize> = None;
        let mut in_header = false;

        for line in text.lines() {
            if let Some(caps) = UNIT_HEADER.captures(line) {
                let start = u64::from_str_radix(&caps[1], 16).unwrap_or(0);
                dump.units.push(DumpUnit {
                    start,
                    end: start,
                    pointer_size: None,
                });
                stack.clear();
                current = None;
                in_header = true;
                continue;
            }

            if in_header {
                if let Some(caps) = UNIT_LENGTH.captures(line) {
                    let length = parse_number(&caps[1]).unwrap_or(0);
                    let initial = if caps.get(2).map(|m| m.as_str()) == Some("64") {
                        12
                    } else {
                        4
                    };
                    if let Some(unit) = dump.units.last_mut() {
                        unit.end = unit.start + length + initial;
                    }
                    continue;
                }
                if let Some(caps) = POINTER_SIZE.captures(line) {
                    if let Some(unit) = dump.units.last_mut() {
                        unit.pointer_size = caps[1].parse().ok();
                    }
                    continue;
                }
            }

            if let Some(caps) = ENTRY.captures(line) {
                in_header = false;
                let depth: usize = caps[1].parse().unwrap_or(0);
                while stack.last().is_some_and(|(d, _)| *d >= depth) {
                    stack.pop();
                }
                let Some(tag) = caps.get(4) else {
                    // Null entry closing a sibling list
                    current = None;
                    continue;
                };
                let index = dump.entries.len();
                dump.entries.push(DumpEntry {
                    offset: u64::from_str_radix(&caps[2], 16).unwrap_or(0),
                    tag: tag.as_str().to_string(),
                    attrs: Vec::new(),
                    children: Vec::new(),
                });
                if let Some((_, parent)) = stack.last() {
                    dump.entries[*parent].children.push(index);
                }
                stack.push((depth, index));
                current = Some(index);
                continue;
            }

            if let (Some(index), Some(caps)) = (current, ATTRIBUTE.captures(line)) {
                dump.entries[index]
                    .attrs
                    .push((caps[1].to_string(), caps[2].trim().to_string()));
            }
        }

        dump
    }

    /// Absolute offset of a `<0x..>` reference, if a unit contains it
    fn reference(&self, entry: &DumpEntry, attr: &str) -> Option<DieOffset> {
        let value = entry.attr(attr)?;
        let caps = REFERENCE.captures(value)?;
        let offset = u64::from_str_radix(&caps[1], 16).ok()?;
        if self
            .units
            .iter()
            .any(|u| (u.start..u.end).contains(&offset))
        {
            Some(DieOffset(offset))
        } else {
            tracing::debug!(
                "Reference <0x{:x}> from <0x{:x}> is outside every unit",
                offset,
                entry.offset
            );
            None
        }
    }

    fn type_ref(&self, types: &mut TypeGraph, entry: &DumpEntry) -> TypeId {
        match self.reference(entry, "DW_AT_type") {
            Some(target) => types.get_or_allocate(target),
            None => TypeId::INVALID,
        }
    }

    fn lower(&self) -> DebugGraph {
        let mut types = TypeGraph::new();
        let mut variables = Vec::new();

        for entry in &self.entries {
            let offset = DieOffset(entry.offset);
            let type_ref = |types: &mut TypeGraph, e: &DumpEntry| self.type_ref(types, e);

            let node = match entry.tag.as_str() {
                "DW_TAG_base_type" => TypeNode::Base {
                    name: entry.name().unwrap_or_default(),
                    byte_size: entry.number("DW_AT_byte_size").unwrap_or(0),
                },
                "DW_TAG_pointer_type" | "DW_TAG_reference_type" => TypeNode::Pointer {
                    target: type_ref(&mut types, entry),
                },
                "DW_TAG_const_type" => TypeNode::Const(type_ref(&mut types, entry)),
                "DW_TAG_volatile_type" => TypeNode::Volatile(type_ref(&mut types, entry)),
                "DW_TAG_restrict_type" => TypeNode::Restrict(type_ref(&mut types, entry)),
                "DW_TAG_typedef" => TypeNode::Typedef {
                    name: entry.name().unwrap_or_default(),
                    target: type_ref(&mut types, entry),
                },
                "DW_TAG_array_type" => {
                    let mut dims: Vec<Option<u64>> = entry
                        .children
                        .iter()
                        .map(|&i| &self.entries[i])
                        .filter(|c| c.tag == "DW_TAG_subrange_type")
                        .map(|c| {
                            c.number("DW_AT_count").or_else(|| {
                                c.signed("DW_AT_upper_bound")
                                    .filter(|v| *v >= 0)
                                    .map(|v| v as u64 + 1)
                            })
                        })
                        .collect();
                    if dims.is_empty() {
                        dims.push(None);
                    }
                    TypeNode::Array {
                        element: type_ref(&mut types, entry),
                        dims,
                    }
                }
                "DW_TAG_structure_type" | "DW_TAG_union_type" | "DW_TAG_class_type" => {
                    let union = entry.tag == "DW_TAG_union_type";
                    let kind = if union {
                        DeclKind::Union
                    } else {
                        DeclKind::Structure
                    };
                    if entry.flag("DW_AT_declaration") {
                        TypeNode::Declaration {
                            name: entry.name().unwrap_or_default(),
                            kind,
                            target: None,
                        }
                    } else {
                        let members = entry
                            .children
                            .iter()
                            .map(|&i| &self.entries[i])
                            .filter(|c| c.tag == "DW_TAG_member" || c.tag == "DW_TAG_inheritance")
                            .map(|c| {
                                let name = if c.tag == "DW_TAG_member" { c.name() } else { None };
                                let mut member = Member::new(
                                    name,
                                    c.attr("DW_AT_data_member_location")
                                        .and_then(parse_member_offset),
                                    type_ref(&mut types, c),
                                );
                                member.bit_size = c.number("DW_AT_bit_size");
                                member.bit_offset = c.number("DW_AT_bit_offset");
                                member.data_bit_offset = c.number("DW_AT_data_bit_offset");
                                member.storage_size = c.number("DW_AT_byte_size");
                                member
                            })
                            .collect();
                        let body = Aggregate {
                            name: entry.name(),
                            byte_size: entry.number("DW_AT_byte_size").unwrap_or(0),
                            members,
                        };
                        if union {
                            TypeNode::Union(body)
                        } else {
                            TypeNode::Structure(body)
                        }
                    }
                }
                "DW_TAG_enumeration_type" => {
                    if entry.flag("DW_AT_declaration") {
                        TypeNode::Declaration {
                            name: entry.name().unwrap_or_default(),
                            kind: DeclKind::Enum,
                            target: None,
                        }
                    } else {
                        TypeNode::Enum(EnumType {
                            name: entry.name(),
                            byte_size: entry.number("DW_AT_byte_size").unwrap_or(0),
                            enumerators: entry
                                .children
                                .iter()
                                .map(|&i| &self.entries[i])
                                .filter(|c| c.tag == "DW_TAG_enumerator")
                                .filter_map(|c| Some((c.name()?, c.signed("DW_AT_const_value")?)))
                                .collect(),
                        })
                    }
                }
                "DW_TAG_subroutine_type" => TypeNode::Unsupported {
                    tag: "subroutine".to_string(),
                },
                "DW_TAG_unspecified_type" => TypeNode::Unsupported {
                    tag: "void".to_string(),
                },
                "DW_TAG_variable" => {
                    if entry.flag("DW_AT_artificial") {
                        continue;
                    }
                    let mut var = VariableDie::new(offset);
                    var.name = entry.name();
                    var.linkage_name = entry
                        .attr("DW_AT_linkage_name")
                        .or_else(|| entry.attr("DW_AT_MIPS_linkage_name"))
                        .map(strip_indirect);
                    var.type_id = type_ref(&mut types, entry);
                    var.specification = self.reference(entry, "DW_AT_specification");
                    var.declaration = entry.flag("DW_AT_declaration");
                    var.external = entry.flag("DW_AT_external");
                    var.location = match entry.attr("DW_AT_location") {
                        Some(value) => parse_location(value),
                        None if entry.attr("DW_AT_const_value").is_some() => Location::Constant,
                        None => Location::Missing,
                    };
                    variables.push(var);
                    continue;
                }
                _ => continue,
            };

            types.insert(offset, node);
        }

        DebugGraph {
            types,
            variables,
            symbols: SymbolTable::default(),
        }
    }
}

fn strip_indirect(value: &str) -> String {
    INDIRECT_STRING.replace(value, "").trim().to_string()
}

/// Leading decimal or `0x` number of an attribute value ("5\t(signed)" is 5)
fn parse_number(value: &str) -> Option<u64> {
    let token = value.split_whitespace().next()?;
    match token.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

fn parse_signed(value: &str) -> Option<i64> {
    let token = value.split_whitespace().next()?;
    match token.strip_prefix('-') {
        Some(rest) => parse_number(rest).and_then(|v| i64::try_from(v).ok()).map(|v| -v),
        None => parse_number(token).and_then(|v| i64::try_from(v).ok()),
    }
}

fn parse_block(value: &str) -> Option<Vec<u8>> {
    let caps = BLOCK.captures(value)?;
    let len: usize = caps[1].parse().ok()?;
    let bytes: Vec<u8> = caps[2]
        .split_whitespace()
        .filter_map(|b| u8::from_str_radix(b, 16).ok())
        .take(len)
        .collect();
    (bytes.len() == len).then_some(bytes)
}

fn parse_location(value: &str) -> Location {
    if let Some(caps) = OP_ADDR.captures(value) {
        if let Ok(address) = u64::from_str_radix(&caps[1], 16) {
            return Location::Static(address);
        }
    }
    match parse_block(value) {
        // DW_OP_addr followed by a little-endian address of 2 to 4 bytes
        Some(bytes) if bytes.first() == Some(&0x03) && (3..=5).contains(&bytes.len()) => {
            let address = bytes[1..]
                .iter()
                .rev()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
            Location::Static(address)
        }
        Some(_) => Location::Runtime("non-static expression".to_string()),
        None if value.contains("location list") => Location::Runtime("location list".to_string()),
        None => Location::Runtime(format!("unrecognised location '{}'", value)),
    }
}

fn parse_member_offset(value: &str) -> Option<u64> {
    if let Some(caps) = OP_PLUS_UCONST.captures(value) {
        return caps[1].parse().ok();
    }
    match parse_block(value) {
        // DW_OP_plus_uconst with a ULEB128 operand
        Some(bytes) if bytes.first() == Some(&0x23) => {
            let mut result = 0u64;
            for (i, b) in bytes[1..].iter().enumerate() {
                result |= u64::from(b & 0x7f) << (7 * i);
                if b & 0x80 == 0 {
                    break;
                }
            }
            Some(result)
        }
        Some(_) => None,
        None => parse_number(value),
    }
}
