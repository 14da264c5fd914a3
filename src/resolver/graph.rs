//! Offset-indexed debug graph
//!
//! Both debug-info backends lower their input into the same arena. Types are
//! stored by index (TypeId) and every reference goes through the
//! `.debug_info` offset of the entry it names, so self-referential and
//! forward-referencing graphs need no owned pointers:
//! - A reference to an entry that has not been seen yet allocates a
//!   [`TypeNode::Placeholder`] that is filled in when the entry is parsed
//! - A reference to an entry that never appears stays a placeholder and is
//!   reported as dangling when a type chain reaches it
//! - Declaration-only aggregates are linked to a same-named definition
//!   after parsing

use std::collections::HashMap;

/// Maximum number of wrapper hops (typedef, volatile, const) followed
/// before a type chain is considered cyclic
const MAX_CHAIN_LENGTH: usize = 64;

/// Absolute offset of an entry in `.debug_info`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DieOffset(pub u64);

impl std::fmt::Display for DieOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<0x{:x}>", self.0)
    }
}

/// Index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeId(pub u32);

impl TypeId {
    /// The invalid/absent type ID
    pub const INVALID: TypeId = TypeId(u32::MAX);

    /// Check if this is a valid type ID
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// The kind of a declaration-only aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Structure,
    Union,
    Enum,
}

/// One type entry
#[derive(Debug, Clone)]
pub enum TypeNode {
    /// Primitive type as named by the compiler
    Base { name: String, byte_size: u64 },
    /// Pointer; the pointee is never followed
    Pointer { target: TypeId },
    /// Structure or class
    Structure(Aggregate),
    /// Union; members overlap
    Union(Aggregate),
    /// Array with one extent per dimension (`None` when unknown)
    Array { element: TypeId, dims: Vec<Option<u64>> },
    /// Enumeration
    Enum(EnumType),
    /// Typedef alias
    Typedef { name: String, target: TypeId },
    /// Volatile qualifier
    Volatile(TypeId),
    /// Const qualifier
    Const(TypeId),
    /// Restrict qualifier
    Restrict(TypeId),
    /// Declaration-only aggregate; `target` is set once a definition is found
    Declaration {
        name: String,
        kind: DeclKind,
        target: Option<TypeId>,
    },
    /// A type the flattener has no use for (subroutines, void, ...)
    Unsupported { tag: String },
    /// Referenced but not (yet) defined
    Placeholder,
}

impl TypeNode {
    fn name(&self) -> Option<&str> {
        match self {
            TypeNode::Structure(a) | TypeNode::Union(a) => a.name.as_deref(),
            TypeNode::Enum(e) => e.name.as_deref(),
            _ => None,
        }
    }

    fn decl_kind(&self) -> Option<DeclKind> {
        match self {
            TypeNode::Structure(_) => Some(DeclKind::Structure),
            TypeNode::Union(_) => Some(DeclKind::Union),
            TypeNode::Enum(_) => Some(DeclKind::Enum),
            _ => None,
        }
    }
}

/// Structure or union body
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    pub name: Option<String>,
    pub byte_size: u64,
    pub members: Vec<Member>,
}

/// One structure/union member
#[derive(Debug, Clone, Default)]
pub struct Member {
    /// `None` for anonymous members and base classes
    pub name: Option<String>,
    /// Byte offset from the start of the aggregate, when known
    pub offset: Option<u64>,
    pub type_id: TypeId,
    pub bit_size: Option<u64>,
    /// DWARF 2/3 bit offset, counted from the most significant bit
    pub bit_offset: Option<u64>,
    /// DWARF 4 bit offset from the start of the aggregate
    pub data_bit_offset: Option<u64>,
    /// Size of the storage unit holding a bitfield
    pub storage_size: Option<u64>,
}

impl Member {
    pub fn new(name: Option<String>, offset: Option<u64>, type_id: TypeId) -> Self {
        Self {
            name,
            offset,
            type_id,
            ..Default::default()
        }
    }

    pub fn is_bitfield(&self) -> bool {
        self.bit_size.is_some()
    }
}

/// Enumeration body
#[derive(Debug, Clone, Default)]
pub struct EnumType {
    pub name: Option<String>,
    pub byte_size: u64,
    pub enumerators: Vec<(String, i64)>,
}

/// Where a variable lives, as far as the debug info says
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    /// Fixed address
    Static(u64),
    /// No location attribute
    Missing,
    /// Needs registers, a frame base, or other runtime state
    Runtime(String),
    /// Compile-time constant without storage
    Constant,
}

/// A variable entry, before flattening
#[derive(Debug, Clone)]
pub struct VariableDie {
    pub offset: DieOffset,
    pub name: Option<String>,
    pub linkage_name: Option<String>,
    pub type_id: TypeId,
    pub location: Location,
    /// Declaration this entry completes
    pub specification: Option<DieOffset>,
    pub declaration: bool,
    pub external: bool,
}

impl VariableDie {
    pub fn new(offset: DieOffset) -> Self {
        Self {
            offset,
            name: None,
            linkage_name: None,
            type_id: TypeId::INVALID,
            location: Location::Missing,
            specification: None,
            declaration: false,
            external: false,
        }
    }

    /// Fill fields this entry lacks from the declaration it specifies
    pub fn inherit_from(&mut self, decl: &VariableDie) {
        if self.name.is_none() {
            self.name = decl.name.clone();
        }
        if self.linkage_name.is_none() {
            self.linkage_name = decl.linkage_name.clone();
        }
        if !self.type_id.is_valid() {
            self.type_id = decl.type_id;
        }
        if !self.external {
            self.external = decl.external;
        }
    }
}

/// Counts of node kinds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub total_types: usize,
    pub structures: usize,
    pub unions: usize,
    pub enums: usize,
    pub arrays: usize,
    pub declarations: usize,
    pub unresolved_declarations: usize,
    pub placeholders: usize,
}

/// The arena
#[derive(Debug, Default)]
pub struct TypeGraph {
    nodes: Vec<TypeNode>,
    by_offset: HashMap<DieOffset, TypeId>,
    by_name: HashMap<String, Vec<TypeId>>,
    declarations: Vec<TypeId>,
}

impl TypeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get or create the TypeId for an offset
    pub fn get_or_allocate(&mut self, offset: DieOffset) -> TypeId {
        if let Some(&id) = self.by_offset.get(&offset) {
            return id;
        }
        let id = TypeId(self.nodes.len() as u32);
        self.nodes.push(TypeNode::Placeholder);
        self.by_offset.insert(offset, id);
        id
    }

    /// TypeId for an offset, if anything referenced or defined it
    pub fn lookup(&self, offset: DieOffset) -> Option<TypeId> {
        self.by_offset.get(&offset).copied()
    }

    /// Define the node at an offset
    pub fn insert(&mut self, offset: DieOffset, node: TypeNode) -> TypeId {
        let id = self.get_or_allocate(offset);
        if matches!(node, TypeNode::Declaration { .. }) {
            self.declarations.push(id);
        } else if let Some(name) = node.name() {
            self.by_name.entry(name.to_string()).or_default().push(id);
        }
        self.nodes[id.0 as usize] = node;
        id
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeNode> {
        if !id.is_valid() {
            return None;
        }
        self.nodes.get(id.0 as usize)
    }

    /// Link declaration-only aggregates to the richest same-named definition
    pub fn resolve_declarations(&mut self) {
        let pending = std::mem::take(&mut self.declarations);
        let mut resolved = 0usize;

        for id in &pending {
            let (name, kind) = match self.get(*id) {
                Some(TypeNode::Declaration { name, kind, .. }) => (name.clone(), *kind),
                _ => continue,
            };

            let best = self
                .by_name
                .get(&name)
                .into_iter()
                .flatten()
                .copied()
                .filter(|candidate| {
                    self.get(*candidate).and_then(TypeNode::decl_kind) == Some(kind)
                })
                .max_by_key(|candidate| match self.get(*candidate) {
                    Some(TypeNode::Structure(a)) | Some(TypeNode::Union(a)) => a.members.len(),
                    Some(TypeNode::Enum(e)) => e.enumerators.len(),
                    _ => 0,
                });

            if let Some(best) = best {
                if let Some(TypeNode::Declaration { target, .. }) = self.nodes.get_mut(id.0 as usize)
                {
                    *target = Some(best);
                    resolved += 1;
                }
            }
        }

        self.declarations = pending;
        tracing::debug!(
            "Resolved {}/{} declaration-only types",
            resolved,
            self.declarations.len()
        );
    }

    /// Follow typedefs, qualifiers and resolved declarations to the end type.
    ///
    /// Fails when the chain dangles, ends in `void`, or loops.
    pub fn end_type(&self, id: TypeId) -> Result<(TypeId, &TypeNode), String> {
        let mut current = id;
        for _ in 0..MAX_CHAIN_LENGTH {
            let node = self
                .get(current)
                .ok_or_else(|| "missing type reference".to_string())?;
            current = match node {
                TypeNode::Typedef { target, .. }
                | TypeNode::Volatile(target)
                | TypeNode::Const(target)
                | TypeNode::Restrict(target) => {
                    if !target.is_valid() {
                        return Err("qualified void".to_string());
                    }
                    *target
                }
                TypeNode::Declaration {
                    target: Some(target),
                    ..
                } => *target,
                TypeNode::Declaration {
                    name, target: None, ..
                } => return Err(format!("incomplete type '{}'", name)),
                TypeNode::Placeholder => {
                    let offset = self.offset_of(current);
                    return Err(match offset {
                        Some(o) => format!("dangling type reference {}", o),
                        None => "dangling type reference".to_string(),
                    });
                }
                _ => return Ok((current, node)),
            };
        }
        Err("type chain too long (cyclic?)".to_string())
    }

    /// Size of a type in bytes
    pub fn type_size(&self, id: TypeId, pointer_width: u64) -> Option<u64> {
        let (_, node) = self.end_type(id).ok()?;
        match node {
            TypeNode::Base { byte_size, .. } => Some(*byte_size),
            TypeNode::Pointer { .. } => Some(pointer_width),
            TypeNode::Structure(a) | TypeNode::Union(a) => Some(a.byte_size),
            TypeNode::Enum(e) => Some(e.byte_size),
            TypeNode::Array { element, dims } => {
                let elem = self.type_size(*element, pointer_width)?;
                dims.iter()
                    .try_fold(elem, |acc, dim| dim.map(|d| acc.saturating_mul(d)))
            }
            _ => None,
        }
    }

    fn offset_of(&self, id: TypeId) -> Option<DieOffset> {
        self.by_offset
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| *k)
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            total_types: self.nodes.len(),
            ..Default::default()
        };
        for node in &self.nodes {
            match node {
                TypeNode::Structure(_) => stats.structures += 1,
                TypeNode::Union(_) => stats.unions += 1,
                TypeNode::Enum(_) => stats.enums += 1,
                TypeNode::Array { .. } => stats.arrays += 1,
                TypeNode::Declaration { target, .. } => {
                    stats.declarations += 1;
                    if target.is_none() {
                        stats.unresolved_declarations += 1;
                    }
                }
                TypeNode::Placeholder => stats.placeholders += 1,
                _ => {}
            }
        }
        stats
    }
}
