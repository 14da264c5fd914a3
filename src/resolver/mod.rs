//! ELF/DWARF variable resolver
//!
//! Turns a firmware image's debug information into a flat map from dotted
//! variable names to [`VariableInfo`] entries.
//!
//! # Backends
//!
//! Debug information reaches the resolver through a [`DebugInfoSource`]:
//!
//! - [`NativeDwarfSource`] reads `.debug_info` directly with gimli. Type
//!   references are followed by their `.debug_info` offset.
//! - [`TextDumpSource`] runs an external dump tool (the 16-bit toolchains
//!   ship one) and parses its text output. A reference's owning unit is found
//!   by offset-range containment.
//!
//! Both lower into the same [`graph::TypeGraph`], and a single
//! [`flatten::Flattener`] produces the entries, so the two paths agree on
//! naming and layout and differ only in pointer width.
//!
//! # Failure policy
//!
//! Only a missing or unreadable file fails [`VariableResolver::resolve`].
//! Individual variables that cannot be placed are dropped and counted in
//! [`ResolveDiagnostics`].

pub mod dwarf;
pub mod flatten;
pub mod graph;
pub mod symbols;
pub mod text_dump;

pub use dwarf::NativeDwarfSource;
pub use text_dump::TextDumpSource;

use crate::config::ResolverConfig;
use crate::error::{Result, X2cError};
use crate::types::VariableInfo;
use flatten::Flattener;
use graph::{DieOffset, Location, TypeGraph, TypeId, VariableDie};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use symbols::SymbolTable;

/// Everything a backend extracts from one file
#[derive(Debug, Default)]
pub struct DebugGraph {
    pub types: TypeGraph,
    pub variables: Vec<VariableDie>,
    pub symbols: SymbolTable,
}

/// A strategy that lowers a file's debug information into a [`DebugGraph`]
pub trait DebugInfoSource {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Read and lower the file
    fn load(&self, path: &Path) -> Result<DebugGraph>;
}

/// Per-resolve counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveDiagnostics {
    /// Variable entries found in the debug info
    pub variables_seen: usize,
    /// Leaf entries in the final map
    pub entries_emitted: usize,
    /// Dropped: no location and no symbol table entry
    pub dropped_no_location: usize,
    /// Dropped: locals, register variables, location lists
    pub dropped_runtime_location: usize,
    /// Dropped: compile-time constants without storage
    pub dropped_constant: usize,
    /// Dropped: type chain dangles or ends somewhere unsupported
    pub dropped_unresolved_type: usize,
    /// Anonymous or compiler-generated entries ignored
    pub ignored_anonymous: usize,
    /// Addresses taken from the ELF symbol table
    pub symbol_fallbacks: usize,
    /// Names already present from an earlier entry
    pub duplicate_names: usize,
    /// Structures left unflattened at the depth bound
    pub depth_limit_hits: usize,
    /// Arrays cut off at the unroll bound
    pub unroll_truncations: usize,
    /// Members skipped inside otherwise valid structures
    pub skipped_members: usize,
}

/// Resolved variables of one firmware image.
///
/// Immutable once built; a new image load builds a new map.
#[derive(Debug, Clone, Default)]
pub struct VariableMap {
    entries: HashMap<String, VariableInfo>,
    address_width: usize,
    diagnostics: ResolveDiagnostics,
}

impl VariableMap {
    /// Look up one entry by its dotted name
    pub fn get(&self, name: &str) -> Option<&VariableInfo> {
        self.entries.get(name)
    }

    /// All names, sorted case-insensitively
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_by(|a, b| {
            a.to_lowercase()
                .cmp(&b.to_lowercase())
                .then_with(|| a.cmp(b))
        });
        names
    }

    /// Entries whose name contains `query`, case-insensitively, in list order
    pub fn search(&self, query: &str) -> Vec<&VariableInfo> {
        let query = query.to_lowercase();
        self.list()
            .into_iter()
            .filter(|n| n.to_lowercase().contains(&query))
            .filter_map(|n| self.entries.get(n))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableInfo> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Address width the map was resolved for
    pub fn address_width(&self) -> usize {
        self.address_width
    }

    pub fn diagnostics(&self) -> &ResolveDiagnostics {
        &self.diagnostics
    }
}

impl FromIterator<VariableInfo> for VariableMap {
    fn from_iter<I: IntoIterator<Item = VariableInfo>>(iter: I) -> Self {
        let entries: HashMap<String, VariableInfo> =
            iter.into_iter().map(|v| (v.name.clone(), v)).collect();
        let diagnostics = ResolveDiagnostics {
            entries_emitted: entries.len(),
            ..Default::default()
        };
        VariableMap {
            entries,
            address_width: 0,
            diagnostics,
        }
    }
}

/// A top-level variable ready for flattening
struct Root {
    name: String,
    linkage_name: Option<String>,
    type_id: TypeId,
    address: Option<u64>,
}

/// Resolves firmware images into [`VariableMap`]s
#[derive(Debug, Clone, Default)]
pub struct VariableResolver {
    config: ResolverConfig,
}

impl VariableResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a file, choosing the backend from the target's address width.
    ///
    /// 2-byte targets use the dump tool when it is enabled; if the tool cannot
    /// be started the native reader is used instead.
    pub fn resolve(&self, path: impl AsRef<Path>, address_width: usize) -> Result<VariableMap> {
        let path = path.as_ref();
        if address_width == 2 && self.config.legacy_dump.enabled {
            let source = TextDumpSource::from_config(&self.config.legacy_dump);
            match self.resolve_with(&source, path, address_width) {
                Err(err @ X2cError::DumpToolMissing { .. }) => {
                    tracing::warn!("{}; falling back to native DWARF reader", err);
                }
                other => return other,
            }
        }
        self.resolve_with(&NativeDwarfSource, path, address_width)
    }

    /// Resolve a file with an explicit backend
    pub fn resolve_with(
        &self,
        source: &dyn DebugInfoSource,
        path: &Path,
        address_width: usize,
    ) -> Result<VariableMap> {
        tracing::info!(
            "Resolving {} with {} backend ({}-byte addresses)",
            path.display(),
            source.name(),
            address_width
        );
        let graph = source.load(path)?;
        Ok(self.build(graph, address_width))
    }

    /// Flatten a lowered graph into a map
    pub fn build(&self, graph: DebugGraph, address_width: usize) -> VariableMap {
        let DebugGraph {
            mut types,
            variables,
            symbols,
        } = graph;
        types.resolve_declarations();

        let mut diagnostics = ResolveDiagnostics::default();
        let (located, unlocated) = self.collect_roots(&variables, &mut diagnostics);

        let mut entries: HashMap<String, VariableInfo> = HashMap::new();
        let mut emitted_roots: HashSet<String> = HashSet::new();
        let mut flattener = Flattener::new(
            &types,
            &self.config,
            address_width as u64,
            &mut diagnostics,
        );
        let mut pending_fallback = Vec::new();
        let mut duplicates = 0usize;
        let mut unresolved = 0usize;

        for root in located.iter().chain(unlocated.iter()) {
            let address = match root.address {
                Some(a) => a,
                None => {
                    if !emitted_roots.contains(&root.name) {
                        pending_fallback.push(root);
                    }
                    continue;
                }
            };
            if !emitted_roots.insert(root.name.clone()) {
                duplicates += 1;
                tracing::debug!("Duplicate variable '{}' ignored", root.name);
                continue;
            }
            match flattener.flatten_root(&root.name, root.type_id, address) {
                Ok(leaves) => insert_leaves(&mut entries, leaves, &mut duplicates),
                Err(reason) => {
                    unresolved += 1;
                    let err = X2cError::UnresolvedType {
                        name: root.name.clone(),
                        reason,
                    };
                    tracing::debug!("Dropping variable: {}", err);
                }
            }
        }

        let mut fallbacks = 0usize;
        let mut no_location = 0usize;
        for root in pending_fallback {
            if emitted_roots.contains(&root.name) {
                continue;
            }
            let symbol = if self.config.symbol_fallback {
                root.linkage_name
                    .as_deref()
                    .and_then(|n| symbols.find(n))
                    .or_else(|| symbols.find(&root.name))
            } else {
                None
            };
            let Some(symbol) = symbol else {
                no_location += 1;
                tracing::debug!("Dropping '{}': no location and no symbol", root.name);
                continue;
            };
            emitted_roots.insert(root.name.clone());
            fallbacks += 1;
            match flattener.flatten_root(&root.name, root.type_id, symbol.address) {
                Ok(leaves) => insert_leaves(&mut entries, leaves, &mut duplicates),
                Err(reason) => {
                    unresolved += 1;
                    let err = X2cError::UnresolvedType {
                        name: root.name.clone(),
                        reason,
                    };
                    tracing::debug!("Dropping variable: {}", err);
                }
            }
        }
        drop(flattener);

        diagnostics.duplicate_names += duplicates;
        diagnostics.dropped_unresolved_type += unresolved;
        diagnostics.symbol_fallbacks += fallbacks;
        diagnostics.dropped_no_location += no_location;
        diagnostics.entries_emitted = entries.len();

        let stats = types.stats();
        tracing::debug!(
            "Type graph: {} types, {} structs, {} unions, {} enums, {} placeholders",
            stats.total_types,
            stats.structures,
            stats.unions,
            stats.enums,
            stats.placeholders,
        );
        tracing::info!(
            "Resolved {} entries from {} variables | {} via symbol table | {} no location | {} unresolved type",
            diagnostics.entries_emitted,
            diagnostics.variables_seen,
            diagnostics.symbol_fallbacks,
            diagnostics.dropped_no_location,
            diagnostics.dropped_unresolved_type,
        );
        if diagnostics.depth_limit_hits > 0 || diagnostics.unroll_truncations > 0 {
            tracing::warn!(
                "Flattening bounds hit: {} depth limit | {} array truncations",
                diagnostics.depth_limit_hits,
                diagnostics.unroll_truncations,
            );
        }

        VariableMap {
            entries,
            address_width,
            diagnostics,
        }
    }

    /// Merge specifications into their declarations and sort variables into
    /// located and unlocated roots
    fn collect_roots(
        &self,
        variables: &[VariableDie],
        diagnostics: &mut ResolveDiagnostics,
    ) -> (Vec<Root>, Vec<Root>) {
        let by_offset: HashMap<DieOffset, &VariableDie> =
            variables.iter().map(|v| (v.offset, v)).collect();
        let completed: HashSet<DieOffset> =
            variables.iter().filter_map(|v| v.specification).collect();

        let mut located = Vec::new();
        let mut unlocated = Vec::new();

        for die in variables {
            diagnostics.variables_seen += 1;

            // A declaration completed elsewhere is handled through its definition
            if die.declaration && completed.contains(&die.offset) {
                diagnostics.variables_seen -= 1;
                continue;
            }

            let mut var = die.clone();
            if let Some(spec) = var.specification {
                match by_offset.get(&spec) {
                    Some(decl) => var.inherit_from(decl),
                    None => tracing::debug!("Specification {} not found", spec),
                }
            }

            let Some(name) = var.name.clone().filter(|n| !n.is_empty()) else {
                diagnostics.ignored_anonymous += 1;
                continue;
            };

            if !var.type_id.is_valid() {
                diagnostics.dropped_unresolved_type += 1;
                tracing::debug!("Dropping '{}': no type", name);
                continue;
            }

            let root = |address| Root {
                name: name.clone(),
                linkage_name: var.linkage_name.clone(),
                type_id: var.type_id,
                address,
            };

            match &var.location {
                Location::Static(address) => located.push(root(Some(*address))),
                Location::Missing if var.external || var.declaration => unlocated.push(root(None)),
                Location::Missing => {
                    diagnostics.dropped_no_location += 1;
                    tracing::debug!("Dropping '{}': optimized out", name);
                }
                Location::Runtime(reason) => {
                    diagnostics.dropped_runtime_location += 1;
                    tracing::trace!("Dropping '{}': {}", name, reason);
                }
                Location::Constant => diagnostics.dropped_constant += 1,
            }
        }

        (located, unlocated)
    }
}

fn insert_leaves(
    entries: &mut HashMap<String, VariableInfo>,
    leaves: Vec<VariableInfo>,
    duplicates: &mut usize,
) {
    for leaf in leaves {
        if entries.contains_key(&leaf.name) {
            *duplicates += 1;
            continue;
        }
        entries.insert(leaf.name.clone(), leaf);
    }
}

/// Resolve with default settings
pub fn resolve(path: impl AsRef<Path>, address_width: usize) -> Result<VariableMap> {
    VariableResolver::default().resolve(path, address_width)
}
