//! Structure flattening
//!
//! Turns one variable's type chain into addressable leaf entries. Structures
//! and unions expand into `parent.member` entries, arrays of aggregates into
//! `parent[i]` entries, and base types, pointers and enums terminate the walk.
//! Nesting depth and array unrolling are bounded by [`ResolverConfig`].

use super::graph::{Aggregate, Member, TypeGraph, TypeId, TypeNode};
use super::ResolveDiagnostics;
use crate::config::ResolverConfig;
use crate::types::VariableInfo;
use std::collections::BTreeMap;

/// Bitfield placement within its storage unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bits {
    size: u8,
    shift: u8,
}

/// Walks type chains and appends leaf entries
pub struct Flattener<'a> {
    graph: &'a TypeGraph,
    config: &'a ResolverConfig,
    pointer_width: u64,
    diagnostics: &'a mut ResolveDiagnostics,
    out: Vec<VariableInfo>,
}

impl<'a> Flattener<'a> {
    pub fn new(
        graph: &'a TypeGraph,
        config: &'a ResolverConfig,
        pointer_width: u64,
        diagnostics: &'a mut ResolveDiagnostics,
    ) -> Self {
        Self {
            graph,
            config,
            pointer_width,
            diagnostics,
            out: Vec::new(),
        }
    }

    /// Flatten one root variable.
    ///
    /// An error means nothing usable could be produced for the root; member
    /// level problems are skipped and counted instead.
    pub fn flatten_root(
        &mut self,
        name: &str,
        type_id: TypeId,
        address: u64,
    ) -> Result<Vec<VariableInfo>, String> {
        self.out.clear();
        self.flatten(name, type_id, address, 0, None)?;
        Ok(std::mem::take(&mut self.out))
    }

    fn flatten(
        &mut self,
        name: &str,
        type_id: TypeId,
        address: u64,
        depth: usize,
        bits: Option<Bits>,
    ) -> Result<(), String> {
        let graph = self.graph;
        let (_, node) = graph.end_type(type_id)?;

        match node {
            TypeNode::Structure(agg) => self.flatten_members(name, agg, address, depth, false),
            TypeNode::Union(agg) => self.flatten_members(name, agg, address, depth, true),
            TypeNode::Array { element, dims } => {
                self.flatten_array(name, *element, dims, address, depth)
            }
            _ => {
                let mut leaf = self.leaf(name, node, address)?;
                if let Some(bits) = bits {
                    leaf.bit_size = Some(bits.size);
                    leaf.bit_offset = Some(bits.shift);
                }
                self.out.push(leaf);
                Ok(())
            }
        }
    }

    /// Entry for a base type, pointer, or enum
    fn leaf(&self, name: &str, node: &TypeNode, address: u64) -> Result<VariableInfo, String> {
        match node {
            TypeNode::Base {
                name: type_name,
                byte_size,
            } => {
                if *byte_size == 0 {
                    return Err(format!("zero-sized base type '{}'", type_name));
                }
                Ok(VariableInfo::new(name, type_name.clone(), *byte_size as usize, address))
            }
            TypeNode::Pointer { .. } => Ok(VariableInfo::new(
                name,
                "pointer",
                self.pointer_width as usize,
                address,
            )),
            TypeNode::Enum(e) => {
                if e.byte_size == 0 {
                    return Err("zero-sized enum".to_string());
                }
                let type_name = match &e.name {
                    Some(n) => format!("enum {}", n),
                    None => "enum".to_string(),
                };
                let values: BTreeMap<String, i64> = e.enumerators.iter().cloned().collect();
                Ok(VariableInfo::new(name, type_name, e.byte_size as usize, address)
                    .with_enumerators(values))
            }
            TypeNode::Unsupported { tag } => Err(format!("unsupported end type {}", tag)),
            other => Err(format!("unexpected end type {:?}", other)),
        }
    }

    fn flatten_members(
        &mut self,
        name: &str,
        agg: &Aggregate,
        address: u64,
        depth: usize,
        is_union: bool,
    ) -> Result<(), String> {
        if depth >= self.config.max_depth {
            self.diagnostics.depth_limit_hits += 1;
            tracing::warn!(
                "Not flattening '{}': nesting depth limit {} reached",
                name,
                self.config.max_depth
            );
            return Ok(());
        }

        for member in &agg.members {
            let member_name = match &member.name {
                Some(m) => format!("{}.{}", name, m),
                None => name.to_string(),
            };

            let placed = self.place_member(member, is_union);
            let Some((offset, bits)) = placed else {
                self.diagnostics.skipped_members += 1;
                tracing::debug!("Skipping member '{}': no static offset", member_name);
                continue;
            };

            if let Err(reason) =
                self.flatten(&member_name, member.type_id, address + offset, depth + 1, bits)
            {
                self.diagnostics.skipped_members += 1;
                tracing::debug!("Skipping member '{}': {}", member_name, reason);
            }
        }
        Ok(())
    }

    /// Byte offset and bitfield placement of a member
    fn place_member(&self, member: &Member, is_union: bool) -> Option<(u64, Option<Bits>)> {
        let Some(bit_size) = member.bit_size else {
            let offset = match member.offset {
                Some(o) => o,
                None if is_union => 0,
                None => return None,
            };
            return Some((offset, None));
        };

        let unit = member
            .storage_size
            .or_else(|| self.graph.type_size(member.type_id, self.pointer_width))
            .filter(|u| *u > 0 && *u <= 8)?;
        let unit_bits = unit * 8;

        let (offset, shift) = if let Some(data_bit) = member.data_bit_offset {
            ((data_bit / unit_bits) * unit, data_bit % unit_bits)
        } else {
            let offset = member.offset.unwrap_or(0);
            let shift = match member.bit_offset {
                Some(from_msb) => unit_bits.checked_sub(from_msb + bit_size)?,
                None => 0,
            };
            (offset, shift)
        };

        if shift + bit_size > unit_bits {
            return None;
        }
        Some((
            offset,
            Some(Bits {
                size: bit_size as u8,
                shift: shift as u8,
            }),
        ))
    }

    fn flatten_array(
        &mut self,
        name: &str,
        element: TypeId,
        dims: &[Option<u64>],
        address: u64,
        depth: usize,
    ) -> Result<(), String> {
        let Some((first, rest)) = dims.split_first() else {
            return Err("array without dimensions".to_string());
        };
        let count = first
            .filter(|c| *c > 0)
            .ok_or_else(|| "array of unknown length".to_string())?;

        // Innermost dimension of scalars: one entry for the whole run
        if rest.is_empty() {
            let graph = self.graph;
            let (_, elem_node) = graph.end_type(element)?;
            if matches!(
                elem_node,
                TypeNode::Base { .. } | TypeNode::Pointer { .. } | TypeNode::Enum(_)
            ) {
                let leaf = self.leaf(name, elem_node, address)?;
                self.out.push(leaf.with_array_size(count as usize));
                return Ok(());
            }
        }

        if depth >= self.config.max_depth {
            self.diagnostics.depth_limit_hits += 1;
            tracing::warn!(
                "Not unrolling '{}': nesting depth limit {} reached",
                name,
                self.config.max_depth
            );
            return Ok(());
        }

        let elem_size = self
            .graph
            .type_size(element, self.pointer_width)
            .ok_or_else(|| "array element of unknown size".to_string())?;
        let stride = rest
            .iter()
            .try_fold(elem_size, |acc, d| d.map(|d| acc * d))
            .ok_or_else(|| "inner dimension of unknown length".to_string())?;

        let limit = self.config.max_array_unroll as u64;
        if count > limit {
            self.diagnostics.unroll_truncations += 1;
            tracing::warn!(
                "Unrolling only {} of {} elements of '{}'",
                limit,
                count,
                name
            );
        }

        for i in 0..count.min(limit) {
            let elem_name = format!("{}[{}]", name, i);
            let elem_address = address + i * stride;
            if rest.is_empty() {
                self.flatten(&elem_name, element, elem_address, depth + 1, None)?;
            } else {
                self.flatten_array(&elem_name, element, rest, elem_address, depth + 1)?;
            }
        }
        Ok(())
    }
}
