//! Native DWARF backend
//!
//! Reads `.debug_info` with gimli and lowers every type and variable entry
//! into a [`TypeGraph`]. The walk is a single depth-first pass per unit:
//! 1. Each type entry is inserted under its absolute `.debug_info` offset
//! 2. References (`UnitRef` or `DebugInfoRef`) allocate placeholders that are
//!    filled in when the target entry is reached
//! 3. Declaration-only aggregates are linked afterwards by the resolver
//!
//! Members, enumerators and subranges are read from the parent's entries
//! tree, not from the depth-first walk.

use super::graph::{
    Aggregate, DeclKind, DieOffset, EnumType, Location, Member, TypeGraph, TypeId, TypeNode,
    VariableDie,
};
use super::symbols::SymbolTable;
use super::{DebugGraph, DebugInfoSource};
use crate::error::{Result, X2cError};
use gimli::{AttributeValue, DebuggingInformationEntry, Dwarf, EndianSlice, RunTimeEndian, Unit};
use object::{Object, ObjectSection};
use std::borrow::Cow;
use std::path::Path;

type Reader<'a> = EndianSlice<'a, RunTimeEndian>;

/// Backend reading DWARF directly from the ELF file
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDwarfSource;

impl NativeDwarfSource {
    /// Lower raw ELF bytes
    pub fn parse_bytes(data: &[u8]) -> Result<DebugGraph> {
        let file = object::File::parse(data)
            .map_err(|e| X2cError::ElfLoad(format!("Failed to parse ELF: {}", e)))?;

        let has_debug_info = file
            .section_by_name(".debug_info")
            .map(|s| s.size() > 0)
            .unwrap_or(false);
        if !has_debug_info {
            return Err(X2cError::ElfLoad(
                "no debug information (.debug_info missing)".to_string(),
            ));
        }

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let load_section = |id: gimli::SectionId| -> std::result::Result<Cow<[u8]>, gimli::Error> {
            Ok(file
                .section_by_name(id.name())
                .and_then(|s| s.data().ok())
                .map(Cow::Borrowed)
                .unwrap_or(Cow::Borrowed(&[])))
        };

        let sections: gimli::DwarfSections<Cow<[u8]>> = gimli::DwarfSections::load(load_section)
            .map_err(|e| X2cError::ElfLoad(format!("Failed to load DWARF: {}", e)))?;
        let dwarf = sections.borrow(|section| EndianSlice::new(section, endian));

        let mut lowering = Lowering {
            dwarf: &dwarf,
            types: TypeGraph::new(),
            variables: Vec::new(),
        };
        lowering.lower_all_units();

        let symbols = SymbolTable::from_object(&file);
        tracing::debug!(
            "Native DWARF: {} types, {} variables",
            lowering.types.len(),
            lowering.variables.len()
        );

        Ok(DebugGraph {
            types: lowering.types,
            variables: lowering.variables,
            symbols,
        })
    }
}

impl DebugInfoSource for NativeDwarfSource {
    fn name(&self) -> &'static str {
        "native DWARF"
    }

    fn load(&self, path: &Path) -> Result<DebugGraph> {
        let data = std::fs::read(path)
            .map_err(|e| X2cError::ElfLoad(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse_bytes(&data)
    }
}

struct Lowering<'d, 'a> {
    dwarf: &'d Dwarf<Reader<'a>>,
    types: TypeGraph,
    variables: Vec<VariableDie>,
}

impl<'d, 'a> Lowering<'d, 'a> {
    fn lower_all_units(&mut self) {
        let mut units = self.dwarf.units();
        loop {
            let header = match units.next() {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Stopping at unreadable unit header: {}", e);
                    break;
                }
            };
            let unit = match self.dwarf.unit(header) {
                Ok(unit) => unit,
                Err(e) => {
                    tracing::warn!("Skipping unit: {}", e);
                    continue;
                }
            };
            self.lower_unit(&unit);
        }
    }

    fn lower_unit(&mut self, unit: &Unit<Reader<'a>>) {
        let mut entries = unit.entries();
        loop {
            match entries.next_dfs() {
                Ok(Some((_, entry))) => self.lower_entry(unit, entry),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Truncated unit: {}", e);
                    break;
                }
            }
        }
    }

    fn lower_entry(&mut self, unit: &Unit<Reader<'a>>, entry: &DebuggingInformationEntry<Reader<'a>>) {
        let Some(offset) = global_offset(unit, entry) else {
            return;
        };

        let node = match entry.tag() {
            gimli::DW_TAG_base_type => TypeNode::Base {
                name: self.get_name(unit, entry).unwrap_or_default(),
                byte_size: get_udata(entry, gimli::DW_AT_byte_size).unwrap_or(0),
            },
            gimli::DW_TAG_pointer_type
            | gimli::DW_TAG_reference_type
            | gimli::DW_TAG_rvalue_reference_type => TypeNode::Pointer {
                target: self.type_ref(unit, entry),
            },
            gimli::DW_TAG_const_type => TypeNode::Const(self.type_ref(unit, entry)),
            gimli::DW_TAG_volatile_type => TypeNode::Volatile(self.type_ref(unit, entry)),
            gimli::DW_TAG_restrict_type => TypeNode::Restrict(self.type_ref(unit, entry)),
            gimli::DW_TAG_typedef => TypeNode::Typedef {
                name: self.get_name(unit, entry).unwrap_or_default(),
                target: self.type_ref(unit, entry),
            },
            gimli::DW_TAG_array_type => TypeNode::Array {
                element: self.type_ref(unit, entry),
                dims: self.array_dims(unit, entry),
            },
            gimli::DW_TAG_structure_type | gimli::DW_TAG_class_type => {
                self.aggregate(unit, entry, DeclKind::Structure)
            }
            gimli::DW_TAG_union_type => self.aggregate(unit, entry, DeclKind::Union),
            gimli::DW_TAG_enumeration_type => self.enumeration(unit, entry),
            gimli::DW_TAG_subroutine_type => TypeNode::Unsupported {
                tag: "subroutine".to_string(),
            },
            gimli::DW_TAG_unspecified_type => TypeNode::Unsupported {
                tag: "void".to_string(),
            },
            gimli::DW_TAG_variable => {
                self.variable(unit, entry, offset);
                return;
            }
            _ => return,
        };

        self.types.insert(offset, node);
    }

    fn aggregate(
        &mut self,
        unit: &Unit<Reader<'a>>,
        entry: &DebuggingInformationEntry<Reader<'a>>,
        kind: DeclKind,
    ) -> TypeNode {
        let name = self.get_name(unit, entry);
        if has_flag(entry, gimli::DW_AT_declaration) {
            return TypeNode::Declaration {
                name: name.unwrap_or_default(),
                kind,
                target: None,
            };
        }

        let mut members = Vec::new();
        if let Ok(mut tree) = unit.entries_tree(Some(entry.offset())) {
            if let Ok(root) = tree.root() {
                let mut children = root.children();
                while let Ok(Some(child)) = children.next() {
                    let child_entry = child.entry();
                    match child_entry.tag() {
                        gimli::DW_TAG_member => members.push(self.member(unit, child_entry)),
                        // Base classes flatten like anonymous members
                        gimli::DW_TAG_inheritance => {
                            let mut base = self.member(unit, child_entry);
                            base.name = None;
                            members.push(base);
                        }
                        _ => {}
                    }
                }
            }
        }

        let body = Aggregate {
            name,
            byte_size: get_udata(entry, gimli::DW_AT_byte_size).unwrap_or(0),
            members,
        };
        match kind {
            DeclKind::Union => TypeNode::Union(body),
            _ => TypeNode::Structure(body),
        }
    }

    fn member(
        &mut self,
        unit: &Unit<Reader<'a>>,
        entry: &DebuggingInformationEntry<Reader<'a>>,
    ) -> Member {
        let mut member = Member::new(
            self.get_name(unit, entry),
            self.member_offset(unit, entry),
            self.type_ref(unit, entry),
        );
        member.bit_size = get_udata(entry, gimli::DW_AT_bit_size);
        member.bit_offset = get_udata(entry, gimli::DW_AT_bit_offset);
        member.data_bit_offset = get_udata(entry, gimli::DW_AT_data_bit_offset);
        member.storage_size = get_udata(entry, gimli::DW_AT_byte_size);
        member
    }

    fn enumeration(
        &mut self,
        unit: &Unit<Reader<'a>>,
        entry: &DebuggingInformationEntry<Reader<'a>>,
    ) -> TypeNode {
        let name = self.get_name(unit, entry);
        if has_flag(entry, gimli::DW_AT_declaration) {
            return TypeNode::Declaration {
                name: name.unwrap_or_default(),
                kind: DeclKind::Enum,
                target: None,
            };
        }

        let mut enumerators = Vec::new();
        if let Ok(mut tree) = unit.entries_tree(Some(entry.offset())) {
            if let Ok(root) = tree.root() {
                let mut children = root.children();
                while let Ok(Some(child)) = children.next() {
                    let child_entry = child.entry();
                    if child_entry.tag() != gimli::DW_TAG_enumerator {
                        continue;
                    }
                    let (Some(label), Some(value)) =
                        (self.get_name(unit, child_entry), get_const_value(child_entry))
                    else {
                        continue;
                    };
                    enumerators.push((label, value));
                }
            }
        }

        TypeNode::Enum(EnumType {
            name,
            byte_size: get_udata(entry, gimli::DW_AT_byte_size).unwrap_or(0),
            enumerators,
        })
    }

    fn variable(
        &mut self,
        unit: &Unit<Reader<'a>>,
        entry: &DebuggingInformationEntry<Reader<'a>>,
        offset: DieOffset,
    ) {
        if has_flag(entry, gimli::DW_AT_artificial) {
            return;
        }

        let mut var = VariableDie::new(offset);
        var.name = self.get_name(unit, entry);
        var.linkage_name = self.get_linkage_name(unit, entry);
        var.type_id = self.type_ref(unit, entry);
        var.specification = self.reference(unit, entry, gimli::DW_AT_specification);
        var.declaration = has_flag(entry, gimli::DW_AT_declaration);
        var.external = has_flag(entry, gimli::DW_AT_external);
        var.location = self.location(unit, entry);
        self.variables.push(var);
    }

    // ==================== References ====================

    fn reference(
        &self,
        unit: &Unit<Reader<'a>>,
        entry: &DebuggingInformationEntry<Reader<'a>>,
        attr: gimli::DwAt,
    ) -> Option<DieOffset> {
        match entry.attr_value(attr).ok()?? {
            AttributeValue::UnitRef(offset) => offset
                .to_debug_info_offset(&unit.header)
                .map(|o| DieOffset(o.0 as u64)),
            AttributeValue::DebugInfoRef(offset) => Some(DieOffset(offset.0 as u64)),
            _ => None,
        }
    }

    fn type_ref(
        &mut self,
        unit: &Unit<Reader<'a>>,
        entry: &DebuggingInformationEntry<Reader<'a>>,
    ) -> TypeId {
        match self.reference(unit, entry, gimli::DW_AT_type) {
            Some(offset) => self.types.get_or_allocate(offset),
            None => TypeId::INVALID,
        }
    }

    // ==================== Attribute Helpers ====================

    fn get_name(
        &self,
        unit: &Unit<Reader<'a>>,
        entry: &DebuggingInformationEntry<Reader<'a>>,
    ) -> Option<String> {
        let attr = entry.attr_value(gimli::DW_AT_name).ok()??;
        self.attr_to_string(unit, attr)
    }

    fn get_linkage_name(
        &self,
        unit: &Unit<Reader<'a>>,
        entry: &DebuggingInformationEntry<Reader<'a>>,
    ) -> Option<String> {
        let attr = entry
            .attr_value(gimli::DW_AT_linkage_name)
            .ok()?
            .or_else(|| entry.attr_value(gimli::DW_AT_MIPS_linkage_name).ok()?);
        attr.and_then(|a| self.attr_to_string(unit, a))
    }

    fn attr_to_string(
        &self,
        unit: &Unit<Reader<'a>>,
        attr: AttributeValue<Reader<'a>>,
    ) -> Option<String> {
        self.dwarf
            .attr_string(unit, attr)
            .ok()
            .map(|s| s.to_string_lossy().to_string())
    }

    fn array_dims(
        &self,
        unit: &Unit<Reader<'a>>,
        entry: &DebuggingInformationEntry<Reader<'a>>,
    ) -> Vec<Option<u64>> {
        let mut dims = Vec::new();
        if let Ok(mut tree) = unit.entries_tree(Some(entry.offset())) {
            if let Ok(root) = tree.root() {
                let mut children = root.children();
                while let Ok(Some(child)) = children.next() {
                    let sub = child.entry();
                    if sub.tag() != gimli::DW_TAG_subrange_type {
                        continue;
                    }
                    let extent = get_udata(sub, gimli::DW_AT_count).or_else(|| {
                        get_sdata(sub, gimli::DW_AT_upper_bound)
                            .filter(|v| *v >= 0)
                            .map(|v| v as u64 + 1)
                    });
                    dims.push(extent);
                }
            }
        }
        if dims.is_empty() {
            dims.push(None);
        }
        dims
    }

    fn member_offset(
        &self,
        unit: &Unit<Reader<'a>>,
        entry: &DebuggingInformationEntry<Reader<'a>>,
    ) -> Option<u64> {
        match entry.attr_value(gimli::DW_AT_data_member_location).ok()?? {
            AttributeValue::Udata(offset) => Some(offset),
            AttributeValue::Data1(offset) => Some(offset as u64),
            AttributeValue::Data2(offset) => Some(offset as u64),
            AttributeValue::Data4(offset) => Some(offset as u64),
            AttributeValue::Data8(offset) => Some(offset),
            AttributeValue::Sdata(offset) => u64::try_from(offset).ok(),
            AttributeValue::Exprloc(expr) => member_offset_expr(unit, &expr),
            AttributeValue::Block(block) => member_offset_expr(unit, &gimli::Expression(block)),
            _ => None,
        }
    }

    // ==================== Locations ====================

    fn location(
        &self,
        unit: &Unit<Reader<'a>>,
        entry: &DebuggingInformationEntry<Reader<'a>>,
    ) -> Location {
        let attr = match entry.attr_value(gimli::DW_AT_location) {
            Ok(Some(attr)) => attr,
            _ => {
                if matches!(entry.attr_value(gimli::DW_AT_const_value), Ok(Some(_))) {
                    return Location::Constant;
                }
                return Location::Missing;
            }
        };

        match attr {
            AttributeValue::Exprloc(expr) => self.evaluate(unit, &expr),
            AttributeValue::Block(block) => self.evaluate(unit, &gimli::Expression(block)),
            AttributeValue::Addr(address) => Location::Static(address),
            AttributeValue::DebugAddrIndex(index) => match self.dwarf.address(unit, index) {
                Ok(address) => Location::Static(address),
                Err(_) => Location::Missing,
            },
            AttributeValue::LocationListsRef(_)
            | AttributeValue::SecOffset(_)
            | AttributeValue::Data4(_)
            | AttributeValue::Data8(_) => Location::Runtime("location list".to_string()),
            _ => Location::Missing,
        }
    }

    fn evaluate(&self, unit: &Unit<Reader<'a>>, expr: &gimli::Expression<Reader<'a>>) -> Location {
        let mut evaluation = expr.clone().evaluation(unit.encoding());
        let mut result = match evaluation.evaluate() {
            Ok(r) => r,
            Err(e) => return Location::Runtime(format!("bad expression: {}", e)),
        };

        loop {
            match result {
                gimli::EvaluationResult::Complete => {
                    let pieces = evaluation.result();
                    if pieces.len() != 1 {
                        return if pieces.is_empty() {
                            Location::Missing
                        } else {
                            Location::Runtime("split across pieces".to_string())
                        };
                    }
                    return match pieces[0].location {
                        gimli::Location::Address { address } => Location::Static(address),
                        gimli::Location::Empty => Location::Missing,
                        gimli::Location::Register { .. } => {
                            Location::Runtime("register".to_string())
                        }
                        _ => Location::Runtime("implicit value".to_string()),
                    };
                }
                gimli::EvaluationResult::RequiresIndexedAddress { index, relocate: _ } => {
                    let Ok(address) = self.dwarf.address(unit, index) else {
                        return Location::Missing;
                    };
                    match evaluation.resume_with_indexed_address(address) {
                        Ok(r) => result = r,
                        Err(_) => return Location::Missing,
                    }
                }
                gimli::EvaluationResult::RequiresRelocatedAddress(address) => {
                    match evaluation.resume_with_relocated_address(address) {
                        Ok(r) => result = r,
                        Err(_) => return Location::Missing,
                    }
                }
                gimli::EvaluationResult::RequiresBaseType(_) => {
                    match evaluation.resume_with_base_type(gimli::ValueType::Generic) {
                        Ok(r) => result = r,
                        Err(_) => return Location::Missing,
                    }
                }
                gimli::EvaluationResult::RequiresFrameBase => {
                    return Location::Runtime("frame base".to_string())
                }
                gimli::EvaluationResult::RequiresRegister { .. } => {
                    return Location::Runtime("register".to_string())
                }
                gimli::EvaluationResult::RequiresTls(_) => {
                    return Location::Runtime("thread-local".to_string())
                }
                _ => return Location::Runtime("runtime context".to_string()),
            }
        }
    }
}

fn global_offset(
    unit: &Unit<Reader<'_>>,
    entry: &DebuggingInformationEntry<Reader<'_>>,
) -> Option<DieOffset> {
    entry
        .offset()
        .to_debug_info_offset(&unit.header)
        .map(|o| DieOffset(o.0 as u64))
}

fn get_udata(entry: &DebuggingInformationEntry<Reader<'_>>, attr: gimli::DwAt) -> Option<u64> {
    match entry.attr_value(attr).ok()?? {
        AttributeValue::Udata(v) => Some(v),
        AttributeValue::Data1(v) => Some(v as u64),
        AttributeValue::Data2(v) => Some(v as u64),
        AttributeValue::Data4(v) => Some(v as u64),
        AttributeValue::Data8(v) => Some(v),
        AttributeValue::Sdata(v) => u64::try_from(v).ok(),
        _ => None,
    }
}

fn get_const_value(entry: &DebuggingInformationEntry<Reader<'_>>) -> Option<i64> {
    get_sdata(entry, gimli::DW_AT_const_value)
}

fn get_sdata(entry: &DebuggingInformationEntry<Reader<'_>>, attr: gimli::DwAt) -> Option<i64> {
    match entry.attr_value(attr).ok()?? {
        AttributeValue::Sdata(v) => Some(v),
        AttributeValue::Udata(v) => Some(v as i64),
        AttributeValue::Data1(v) => Some(v as i64),
        AttributeValue::Data2(v) => Some(v as i64),
        AttributeValue::Data4(v) => Some(v as i64),
        AttributeValue::Data8(v) => Some(v as i64),
        _ => None,
    }
}

fn has_flag(entry: &DebuggingInformationEntry<Reader<'_>>, attr: gimli::DwAt) -> bool {
    matches!(entry.attr_value(attr), Ok(Some(AttributeValue::Flag(true))))
}

/// Offset encoded as a location expression (`DW_OP_plus_uconst N` in DWARF 2/3)
fn member_offset_expr(unit: &Unit<Reader<'_>>, expr: &gimli::Expression<Reader<'_>>) -> Option<u64> {
    let mut ops = expr.clone().operations(unit.encoding());
    while let Ok(Some(op)) = ops.next() {
        match op {
            gimli::Operation::PlusConstant { value } => return Some(value),
            gimli::Operation::UnsignedConstant { value } => return Some(value),
            gimli::Operation::Address { address } => return Some(address),
            _ => continue,
        }
    }
    None
}
