//! Integration tests for the native DWARF resolver
//!
//! These tests build real ELF images in memory and check:
//! - Structure flattening and member addresses
//! - Enum, pointer and volatile handling
//! - Declarations, specifications and symbol table fallback
//! - Survival of malformed variables

mod common;

use common::builders::*;
use common::native_only;
use x2cscope::config::ResolverConfig;
use x2cscope::resolver::{NativeDwarfSource, VariableResolver};
use x2cscope::{VariableMap, X2cError};

fn resolve_bytes(bytes: &[u8], address_width: usize) -> VariableMap {
    resolve_bytes_with(bytes, address_width, native_only())
}

fn resolve_bytes_with(bytes: &[u8], address_width: usize, config: ResolverConfig) -> VariableMap {
    let graph = NativeDwarfSource::parse_bytes(bytes).expect("valid ELF");
    VariableResolver::new(config).build(graph, address_width)
}

#[test]
fn test_struct_members_flatten_to_base_plus_offset() {
    let map = resolve_bytes(&motor_elf().build(), 2);

    let speed = map.get("motor.speed").unwrap();
    assert_eq!(speed.address, MOTOR_ADDR);
    assert_eq!(speed.type_name, "int");
    assert_eq!(speed.byte_size, 2);

    let mode = map.get("motor.mode").unwrap();
    assert_eq!(mode.address, MOTOR_ADDR + 2);
    assert_eq!(mode.type_name, "unsigned char");

    let gains = map.get("motor.gains").unwrap();
    assert_eq!(gains.address, MOTOR_ADDR + 4);
    assert_eq!(gains.array_size, 3);
    assert_eq!(gains.byte_size, 2, "byte_size is the element width");

    assert!(map.get("motor").is_none(), "structures are never entries");
    assert_eq!(map.search("motor.").len(), 3);
}

#[test]
fn test_enum_keeps_every_enumerator() {
    let map = resolve_bytes(&motor_elf().build(), 2);
    let state = map.get("state").unwrap();
    assert_eq!(state.type_name, "enum State");
    let values = state.valid_values.as_ref().unwrap();
    assert_eq!(values.len(), 3);
    assert_eq!(values["IDLE"], 0);
    assert_eq!(values["RUN"], 1);
    assert_eq!(values["FAULT"], -1);
}

#[test]
fn test_volatile_is_unwrapped_and_pointer_is_opaque() {
    let bytes = motor_elf().build();
    let map = resolve_bytes(&bytes, 2);
    assert_eq!(map.get("counter").unwrap().type_name, "int");

    let ptr = map.get("ptr").unwrap();
    assert_eq!(ptr.type_name, "pointer");
    assert_eq!(ptr.byte_size, 2);
    assert_eq!(resolve_bytes(&bytes, 4).get("ptr").unwrap().byte_size, 4);
}

#[test]
fn test_dangling_type_does_not_abort() {
    let mut elf = motor_elf();
    let not_a_type = elf.function("isr");
    elf.variable("broken", not_a_type, 0x900);

    let map = resolve_bytes(&elf.build(), 2);
    assert!(map.get("broken").is_none());
    for name in ["motor.speed", "motor.mode", "motor.gains", "state", "counter", "ptr"] {
        assert!(map.get(name).is_some(), "{} should survive", name);
    }
    assert_eq!(map.diagnostics().dropped_unresolved_type, 1);
}

#[test]
fn test_extern_declaration_uses_symbol_table() {
    let mut elf = ElfBuilder::new();
    let int = elf.base_type("int", 4, gimli::DW_ATE_signed);
    elf.extern_declaration("ticks", int);
    elf.extern_declaration("nowhere", int);
    elf.data_symbol("ticks", 0x2000_0100, 4);
    let bytes = elf.build();

    let map = resolve_bytes(&bytes, 4);
    assert_eq!(map.get("ticks").unwrap().address, 0x2000_0100);
    assert!(map.get("nowhere").is_none());
    assert_eq!(map.diagnostics().symbol_fallbacks, 1);
    assert_eq!(map.diagnostics().dropped_no_location, 1);

    let mut config = native_only();
    config.symbol_fallback = false;
    assert!(resolve_bytes_with(&bytes, 4, config).get("ticks").is_none());
}

#[test]
fn test_specification_reaches_definition() {
    let mut elf = ElfBuilder::new();
    let int = elf.base_type("int", 4, gimli::DW_ATE_signed);
    let decl = elf.extern_declaration("limit", int);
    elf.definition_of(decl, 0x2000_0040);

    let map = resolve_bytes(&elf.build(), 4);
    let limit = map.get("limit").unwrap();
    assert_eq!(limit.address, 0x2000_0040);
    assert_eq!(limit.type_name, "int");
    assert_eq!(map.len(), 1);
    assert_eq!(map.diagnostics().symbol_fallbacks, 0);
}

#[test]
fn test_runtime_and_constant_locations_are_dropped() {
    let mut elf = ElfBuilder::new();
    let int = elf.base_type("int", 4, gimli::DW_ATE_signed);
    elf.local_variable("scratch", int);
    elf.constant("GAIN", int, 7);
    elf.variable("kept", int, 0x2000_0000);

    let map = resolve_bytes(&elf.build(), 4);
    assert_eq!(map.list(), vec!["kept"]);
    assert_eq!(map.diagnostics().dropped_runtime_location, 1);
    assert_eq!(map.diagnostics().dropped_constant, 1);
}

#[test]
fn test_array_of_structs_and_anonymous_union() {
    let mut elf = ElfBuilder::new();
    let int = elf.base_type("short int", 2, gimli::DW_ATE_signed);
    let word = elf.base_type("short unsigned int", 2, gimli::DW_ATE_unsigned);
    let axis = elf.structure(Some("Axis"), 4, &[(Some("pos"), 0, int), (Some("vel"), 2, int)]);
    let axes = elf.array(axis, &[2]);
    let raw = elf.union(None, 2, &[(Some("raw"), 0, word), (Some("value"), 0, int)]);
    let status = elf.structure(Some("Status"), 4, &[(Some("id"), 0, word), (None, 2, raw)]);
    elf.variable("axes", axes, 0x1000);
    elf.variable("status", status, 0x1010);

    let map = resolve_bytes(&elf.build(), 2);
    assert_eq!(map.get("axes[1].vel").unwrap().address, 0x1000 + 4 + 2);
    assert_eq!(map.get("axes[0].pos").unwrap().address, 0x1000);
    assert_eq!(map.get("status.raw").unwrap().address, 0x1012);
    assert_eq!(map.get("status.value").unwrap().address, 0x1012);
}

#[test]
fn test_typedef_and_forward_declaration() {
    let mut elf = ElfBuilder::new();
    let int = elf.base_type("int", 4, gimli::DW_ATE_signed);
    let fwd = elf.struct_declaration("Config");
    elf.structure(Some("Config"), 8, &[(Some("a"), 0, int), (Some("b"), 4, int)]);
    let alias = elf.typedef("config_t", fwd);
    elf.variable("cfg", alias, 0x2000_0000);

    let map = resolve_bytes(&elf.build(), 4);
    assert_eq!(map.get("cfg.b").unwrap().address, 0x2000_0004);
}

#[test]
fn test_bitfield_members() {
    let mut elf = ElfBuilder::new();
    let uint = elf.base_type("unsigned int", 4, gimli::DW_ATE_unsigned);
    let flags = elf.structure(Some("Flags"), 4, &[]);
    elf.bitfield(flags, "enable", uint, 1, 0);
    elf.bitfield(flags, "mode", uint, 3, 1);
    elf.variable("flags", flags, 0x2000_0000);

    let map = resolve_bytes(&elf.build(), 4);
    let mode = map.get("flags.mode").unwrap();
    assert_eq!(mode.bit_size, Some(3));
    assert_eq!(mode.bit_offset, Some(1));
    assert_eq!(mode.address, 0x2000_0000);
}

#[test]
fn test_list_is_case_insensitive() {
    let mut elf = ElfBuilder::new();
    let int = elf.base_type("int", 4, gimli::DW_ATE_signed);
    elf.variable("beta", int, 0x10);
    elf.variable("Gamma", int, 0x14);
    elf.variable("Alpha", int, 0x18);

    let map = resolve_bytes(&elf.build(), 4);
    assert_eq!(map.list(), vec!["Alpha", "beta", "Gamma"]);
}

#[test]
fn test_resolve_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = motor_elf().write_to(dir.path(), "motor.elf");

    let map = VariableResolver::new(native_only()).resolve(&path, 4).unwrap();
    assert_eq!(map.len(), 6);
    assert_eq!(map.address_width(), 4);
}

#[test]
fn test_missing_dump_tool_falls_back_to_native() {
    let dir = tempfile::tempdir().unwrap();
    let path = motor_elf().write_to(dir.path(), "motor.elf");

    let mut config = ResolverConfig::default();
    config.legacy_dump.tool = "x2cscope-test-no-such-readelf".into();
    let map = VariableResolver::new(config).resolve(&path, 2).unwrap();
    assert_eq!(map.get("motor.gains").unwrap().array_size, 3);
}

#[test]
fn test_elf_without_debug_info() {
    let bytes = ElfBuilder::new().without_debug_info().build();
    let err = NativeDwarfSource::parse_bytes(&bytes).unwrap_err();
    assert!(matches!(err, X2cError::ElfLoad(_)));
}

#[test]
fn test_depth_and_unroll_bounds_are_reported() {
    let mut elf = ElfBuilder::new();
    let int = elf.base_type("int", 2, gimli::DW_ATE_signed);
    let cell = elf.structure(Some("Cell"), 2, &[(Some("v"), 0, int)]);
    let grid = elf.array(cell, &[10]);
    elf.variable("grid", grid, 0x1000);

    let mut config = native_only();
    config.max_array_unroll = 4;
    let map = resolve_bytes_with(&elf.build(), 2, config);
    assert_eq!(map.len(), 4);
    assert!(map.get("grid[3].v").is_some());
    assert!(map.get("grid[4].v").is_none());
    assert_eq!(map.diagnostics().unroll_truncations, 1);
}
