//! Test data builders: in-memory ELF images with DWARF, and captured dumps

use gimli::write::{
    Address, AttributeValue, DwarfUnit, EndianVec, Expression, Sections, UnitEntryId,
};
use object::write::{Object, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};
use std::path::{Path, PathBuf};

/// Builder for an ELF file carrying one DWARF compilation unit
pub struct ElfBuilder {
    dwarf: DwarfUnit,
    symbols: Vec<(String, u64, u64)>,
    with_debug_info: bool,
}

impl ElfBuilder {
    pub fn new() -> Self {
        let encoding = gimli::Encoding {
            format: gimli::Format::Dwarf32,
            version: 4,
            address_size: 4,
        };
        let mut dwarf = DwarfUnit::new(encoding);
        let root = dwarf.unit.root();
        dwarf
            .unit
            .get_mut(root)
            .set(gimli::DW_AT_name, AttributeValue::String(b"motor.c".to_vec()));
        Self {
            dwarf,
            symbols: Vec::new(),
            with_debug_info: true,
        }
    }

    /// Emit no DWARF sections at all
    pub fn without_debug_info(mut self) -> Self {
        self.with_debug_info = false;
        self
    }

    fn add(&mut self, parent: Option<UnitEntryId>, tag: gimli::DwTag) -> UnitEntryId {
        let parent = parent.unwrap_or_else(|| self.dwarf.unit.root());
        self.dwarf.unit.add(parent, tag)
    }

    fn set(&mut self, id: UnitEntryId, attr: gimli::DwAt, value: AttributeValue) {
        self.dwarf.unit.get_mut(id).set(attr, value);
    }

    fn set_name(&mut self, id: UnitEntryId, name: &str) {
        self.set(id, gimli::DW_AT_name, AttributeValue::String(name.as_bytes().to_vec()));
    }

    pub fn base_type(&mut self, name: &str, size: u64, encoding: gimli::DwAte) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_base_type);
        self.set_name(id, name);
        self.set(id, gimli::DW_AT_byte_size, AttributeValue::Udata(size));
        self.set(id, gimli::DW_AT_encoding, AttributeValue::Encoding(encoding));
        id
    }

    pub fn pointer_to(&mut self, target: UnitEntryId) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_pointer_type);
        self.set(id, gimli::DW_AT_type, AttributeValue::UnitRef(target));
        id
    }

    pub fn volatile(&mut self, target: UnitEntryId) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_volatile_type);
        self.set(id, gimli::DW_AT_type, AttributeValue::UnitRef(target));
        id
    }

    pub fn typedef(&mut self, name: &str, target: UnitEntryId) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_typedef);
        self.set_name(id, name);
        self.set(id, gimli::DW_AT_type, AttributeValue::UnitRef(target));
        id
    }

    /// One dimension per entry of `dims`, outermost first
    pub fn array(&mut self, element: UnitEntryId, dims: &[u64]) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_array_type);
        self.set(id, gimli::DW_AT_type, AttributeValue::UnitRef(element));
        for &count in dims {
            let sub = self.add(Some(id), gimli::DW_TAG_subrange_type);
            self.set(sub, gimli::DW_AT_upper_bound, AttributeValue::Udata(count - 1));
        }
        id
    }

    /// A structure; a `None` member name makes an anonymous member
    pub fn structure(
        &mut self,
        name: Option<&str>,
        size: u64,
        members: &[(Option<&str>, u64, UnitEntryId)],
    ) -> UnitEntryId {
        self.aggregate(gimli::DW_TAG_structure_type, name, size, members)
    }

    pub fn union(
        &mut self,
        name: Option<&str>,
        size: u64,
        members: &[(Option<&str>, u64, UnitEntryId)],
    ) -> UnitEntryId {
        self.aggregate(gimli::DW_TAG_union_type, name, size, members)
    }

    fn aggregate(
        &mut self,
        tag: gimli::DwTag,
        name: Option<&str>,
        size: u64,
        members: &[(Option<&str>, u64, UnitEntryId)],
    ) -> UnitEntryId {
        let id = self.add(None, tag);
        if let Some(name) = name {
            self.set_name(id, name);
        }
        self.set(id, gimli::DW_AT_byte_size, AttributeValue::Udata(size));
        for &(member_name, offset, ty) in members {
            let member = self.add(Some(id), gimli::DW_TAG_member);
            if let Some(member_name) = member_name {
                self.set_name(member, member_name);
            }
            self.set(member, gimli::DW_AT_type, AttributeValue::UnitRef(ty));
            self.set(
                member,
                gimli::DW_AT_data_member_location,
                AttributeValue::Udata(offset),
            );
        }
        id
    }

    /// Add a DWARF 4 style bitfield member to an existing structure
    pub fn bitfield(
        &mut self,
        parent: UnitEntryId,
        name: &str,
        ty: UnitEntryId,
        bit_size: u64,
        data_bit_offset: u64,
    ) {
        let member = self.add(Some(parent), gimli::DW_TAG_member);
        self.set_name(member, name);
        self.set(member, gimli::DW_AT_type, AttributeValue::UnitRef(ty));
        self.set(member, gimli::DW_AT_bit_size, AttributeValue::Udata(bit_size));
        self.set(
            member,
            gimli::DW_AT_data_bit_offset,
            AttributeValue::Udata(data_bit_offset),
        );
    }

    /// Forward declaration of a structure
    pub fn struct_declaration(&mut self, name: &str) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_structure_type);
        self.set_name(id, name);
        self.set(id, gimli::DW_AT_declaration, AttributeValue::Flag(true));
        id
    }

    pub fn enumeration(&mut self, name: &str, size: u64, values: &[(&str, i64)]) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_enumeration_type);
        self.set_name(id, name);
        self.set(id, gimli::DW_AT_byte_size, AttributeValue::Udata(size));
        for &(label, value) in values {
            let e = self.add(Some(id), gimli::DW_TAG_enumerator);
            self.set_name(e, label);
            self.set(e, gimli::DW_AT_const_value, AttributeValue::Sdata(value));
        }
        id
    }

    /// Entry that is not a type; references to it dangle
    pub fn function(&mut self, name: &str) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_subprogram);
        self.set_name(id, name);
        id
    }

    /// Global variable with a static address
    pub fn variable(&mut self, name: &str, ty: UnitEntryId, address: u64) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_variable);
        self.set_name(id, name);
        self.set(id, gimli::DW_AT_type, AttributeValue::UnitRef(ty));
        self.set(id, gimli::DW_AT_external, AttributeValue::Flag(true));
        self.set_address(id, address);
        id
    }

    /// `extern` declaration without a location
    pub fn extern_declaration(&mut self, name: &str, ty: UnitEntryId) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_variable);
        self.set_name(id, name);
        self.set(id, gimli::DW_AT_type, AttributeValue::UnitRef(ty));
        self.set(id, gimli::DW_AT_external, AttributeValue::Flag(true));
        self.set(id, gimli::DW_AT_declaration, AttributeValue::Flag(true));
        id
    }

    /// Out-of-line definition completing `declaration`
    pub fn definition_of(&mut self, declaration: UnitEntryId, address: u64) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_variable);
        self.set(id, gimli::DW_AT_specification, AttributeValue::UnitRef(declaration));
        self.set_address(id, address);
        id
    }

    /// Stack variable addressed through the frame base
    pub fn local_variable(&mut self, name: &str, ty: UnitEntryId) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_variable);
        self.set_name(id, name);
        self.set(id, gimli::DW_AT_type, AttributeValue::UnitRef(ty));
        let mut expr = Expression::new();
        expr.op_fbreg(-4);
        self.set(id, gimli::DW_AT_location, AttributeValue::Exprloc(expr));
        id
    }

    /// Compile-time constant variable
    pub fn constant(&mut self, name: &str, ty: UnitEntryId, value: i64) -> UnitEntryId {
        let id = self.add(None, gimli::DW_TAG_variable);
        self.set_name(id, name);
        self.set(id, gimli::DW_AT_type, AttributeValue::UnitRef(ty));
        self.set(id, gimli::DW_AT_const_value, AttributeValue::Sdata(value));
        id
    }

    fn set_address(&mut self, id: UnitEntryId, address: u64) {
        let mut expr = Expression::new();
        expr.op_addr(Address::Constant(address));
        self.set(id, gimli::DW_AT_location, AttributeValue::Exprloc(expr));
    }

    /// Data symbol in the ELF symbol table
    pub fn data_symbol(&mut self, name: &str, address: u64, size: u64) {
        self.symbols.push((name.to_string(), address, size));
    }

    pub fn build(mut self) -> Vec<u8> {
        let mut obj = Object::new(BinaryFormat::Elf, Architecture::Arm, Endianness::Little);

        if self.with_debug_info {
            let mut sections = Sections::new(EndianVec::new(gimli::LittleEndian));
            self.dwarf.write(&mut sections).expect("write DWARF");
            sections
                .for_each(|id, data| {
                    if !data.slice().is_empty() {
                        let section = obj.add_section(
                            Vec::new(),
                            id.name().as_bytes().to_vec(),
                            SectionKind::Debug,
                        );
                        obj.set_section_data(section, data.slice().to_vec(), 1);
                    }
                    Ok::<(), gimli::write::Error>(())
                })
                .expect("collect DWARF sections");
        }

        for (name, address, size) in &self.symbols {
            obj.add_symbol(Symbol {
                name: name.as_bytes().to_vec(),
                value: *address,
                size: *size,
                kind: SymbolKind::Data,
                scope: SymbolScope::Linkage,
                weak: false,
                section: SymbolSection::Absolute,
                flags: SymbolFlags::None,
            });
        }

        obj.write().expect("write ELF")
    }

    /// Build and store the image as `name` inside `dir`
    pub fn write_to(self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).expect("write ELF file");
        path
    }
}

impl Default for ElfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Addresses shared by the motor fixtures
pub const MOTOR_ADDR: u64 = 0x800;
pub const STATE_ADDR: u64 = 0x80a;
pub const COUNTER_ADDR: u64 = 0x80c;
pub const PTR_ADDR: u64 = 0x80e;

/// The motor program as DWARF:
///
/// ```c
/// struct Motor { int speed; unsigned char mode; int gains[3]; } motor;
/// enum State { IDLE, RUN, FAULT = -1 } state;
/// volatile int counter;
/// int *ptr;
/// ```
///
/// with 2-byte `int`, matching [`MOTOR_DUMP`].
pub fn motor_elf() -> ElfBuilder {
    let mut elf = ElfBuilder::new();
    let int = elf.base_type("int", 2, gimli::DW_ATE_signed);
    let uchar = elf.base_type("unsigned char", 1, gimli::DW_ATE_unsigned_char);
    let gains = elf.array(int, &[3]);
    let motor = elf.structure(
        Some("Motor"),
        10,
        &[(Some("speed"), 0, int), (Some("mode"), 2, uchar), (Some("gains"), 4, gains)],
    );
    let state = elf.enumeration("State", 2, &[("IDLE", 0), ("RUN", 1), ("FAULT", -1)]);
    let volatile_int = elf.volatile(int);
    let int_ptr = elf.pointer_to(int);

    elf.variable("motor", motor, MOTOR_ADDR);
    elf.variable("state", state, STATE_ADDR);
    elf.variable("counter", volatile_int, COUNTER_ADDR);
    elf.variable("ptr", int_ptr, PTR_ADDR);
    elf
}

/// The motor program as printed by the 16-bit toolchain's readelf
pub const MOTOR_DUMP: &str = "\
Contents of the .debug_info section:

  Compilation Unit @ offset 0x0:
   Length:        0x1fc (32-bit)
   Version:       2
   Abbrev Offset: 0x0
   Pointer Size:  2
 <0><b>: Abbrev Number: 1 (DW_TAG_compile_unit)
    <c>   DW_AT_producer    : (indirect string, offset: 0x0): GNU C 4.5.1 (XC16, Microchip v2.10)
    <10>   DW_AT_language    : 1\t(ANSI C)
    <11>   DW_AT_name        : motor.c
 <1><20>: Abbrev Number: 2 (DW_TAG_base_type)
    <21>   DW_AT_byte_size   : 2
    <22>   DW_AT_encoding    : 5\t(signed)
    <23>   DW_AT_name        : int
 <1><28>: Abbrev Number: 2 (DW_TAG_base_type)
    <29>   DW_AT_byte_size   : 1
    <2a>   DW_AT_encoding    : 8\t(unsigned char)
    <2b>   DW_AT_name        : unsigned char
 <1><40>: Abbrev Number: 3 (DW_TAG_array_type)
    <41>   DW_AT_type        : <0x20>
    <45>   DW_AT_sibling     : <0x50>
 <2><49>: Abbrev Number: 4 (DW_TAG_subrange_type)
    <4a>   DW_AT_upper_bound : 2
 <2><4c>: Abbrev Number: 0
 <1><50>: Abbrev Number: 5 (DW_TAG_structure_type)
    <51>   DW_AT_name        : (indirect string, offset: 0x2a): Motor
    <55>   DW_AT_byte_size   : 10
    <56>   DW_AT_sibling     : <0x90>
 <2><5a>: Abbrev Number: 6 (DW_TAG_member)
    <5b>   DW_AT_name        : speed
    <61>   DW_AT_type        : <0x20>
    <65>   DW_AT_data_member_location: 2 byte block: 23 0 \t(DW_OP_plus_uconst: 0)
 <2><68>: Abbrev Number: 6 (DW_TAG_member)
    <69>   DW_AT_name        : mode
    <6e>   DW_AT_type        : <0x28>
    <72>   DW_AT_data_member_location: 2 byte block: 23 2 \t(DW_OP_plus_uconst: 2)
 <2><75>: Abbrev Number: 6 (DW_TAG_member)
    <76>   DW_AT_name        : gains
    <7c>   DW_AT_type        : <0x40>
    <80>   DW_AT_data_member_location: 2 byte block: 23 4 \t(DW_OP_plus_uconst: 4)
 <2><83>: Abbrev Number: 0
 <1><90>: Abbrev Number: 7 (DW_TAG_enumeration_type)
    <91>   DW_AT_name        : State
    <97>   DW_AT_byte_size   : 2
    <98>   DW_AT_sibling     : <0xb0>
 <2><9c>: Abbrev Number: 8 (DW_TAG_enumerator)
    <9d>   DW_AT_name        : IDLE
    <a2>   DW_AT_const_value : 0
 <2><a3>: Abbrev Number: 8 (DW_TAG_enumerator)
    <a4>   DW_AT_name        : RUN
    <a8>   DW_AT_const_value : 1
 <2><a9>: Abbrev Number: 8 (DW_TAG_enumerator)
    <aa>   DW_AT_name        : FAULT
    <b0>   DW_AT_const_value : -1
 <2><b1>: Abbrev Number: 0
 <1><c0>: Abbrev Number: 9 (DW_TAG_volatile_type)
    <c1>   DW_AT_type        : <0x20>
 <1><c8>: Abbrev Number: 10 (DW_TAG_pointer_type)
    <c9>   DW_AT_byte_size   : 2
    <ca>   DW_AT_type        : <0x20>
 <1><d0>: Abbrev Number: 11 (DW_TAG_variable)
    <d1>   DW_AT_name        : motor
    <d7>   DW_AT_decl_file   : 1
    <d8>   DW_AT_decl_line   : 12
    <d9>   DW_AT_type        : <0x50>
    <dd>   DW_AT_external    : 1
    <de>   DW_AT_location    : 3 byte block: 3 0 8 \t(DW_OP_addr: 800)
 <1><e2>: Abbrev Number: 11 (DW_TAG_variable)
    <e3>   DW_AT_name        : state
    <e9>   DW_AT_type        : <0x90>
    <ed>   DW_AT_external    : 1
    <ee>   DW_AT_location    : 3 byte block: 3 a 8 \t(DW_OP_addr: 80a)
 <1><f2>: Abbrev Number: 11 (DW_TAG_variable)
    <f3>   DW_AT_name        : counter
    <fb>   DW_AT_type        : <0xc0>
    <ff>   DW_AT_external    : 1
    <100>   DW_AT_location    : 3 byte block: 3 c 8 \t(DW_OP_addr: 80c)
 <1><104>: Abbrev Number: 11 (DW_TAG_variable)
    <105>   DW_AT_name        : ptr
    <109>   DW_AT_type        : <0xc8>
    <10d>   DW_AT_external    : 1
    <10e>   DW_AT_location    : 3 byte block: 3 e 8 \t(DW_OP_addr: 80e)
 <1><112>: Abbrev Number: 0
";

/// Scope buffer contents for `rows` rows of an int16 channel and a uint32 channel.
///
/// Row `i` holds `(i as i16 - 5, 1000 + i as u32)`.
pub fn two_channel_buffer(rows: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(rows * 6);
    for i in 0..rows {
        out.extend_from_slice(&(i as i16 - 5).to_le_bytes());
        out.extend_from_slice(&(1000 + i as u32).to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_elf_parses_as_elf() {
        use object::Object;
        let bytes = motor_elf().build();
        let file = object::File::parse(&*bytes).unwrap();
        assert!(file.section_by_name(".debug_info").is_some());
    }
}
