//! Module graph: the ordered set of modules reachable from the entry
//!
//! Identities are dense (`0..len`) and follow discovery order, so the graph
//! is stored as a plain vector indexed by [`ModuleId`]. A canonical path table
//! provides the deduplication lookup used while building.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::trace;
use petgraph::{
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{error::BuildError, transform::CompiledModule};

/// Identity of a module inside one build and inside the generated runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ModuleId(u32);

impl ModuleId {
    /// The entry module is always discovered first
    pub const ENTRY: Self = Self(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One discovered module
#[derive(Debug, Clone, Serialize)]
pub struct ModuleRecord {
    pub id: ModuleId,
    /// Canonical path, the deduplication key
    pub path: PathBuf,
    /// Import specifiers in source order, as written
    pub specifiers: Vec<String>,
    /// Compiled body embedded in the module factory
    #[serde(skip)]
    pub code: String,
    /// Specifier → identity, in first-use order
    #[serde(rename = "mapping")]
    pub specifier_to_id: IndexMap<String, ModuleId>,
    /// SHA-256 of the original source text (hex)
    pub content_hash: String,
}

impl ModuleRecord {
    /// Identity the given specifier resolved to
    pub fn resolve(&self, specifier: &str) -> Option<ModuleId> {
        self.specifier_to_id.get(specifier).copied()
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ModuleGraph {
    modules: Vec<ModuleRecord>,
    #[serde(skip)]
    path_to_id: FxHashMap<PathBuf, ModuleId>,
    /// Next identity to hand out
    #[serde(skip)]
    next_module_id: u32,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly compiled module and assign it the next identity
    ///
    /// The caller is expected to have checked [`Self::get_id_by_path`] first;
    /// registering the same path twice returns the existing identity.
    pub fn add_module(&mut self, path: PathBuf, source: &str, compiled: CompiledModule) -> ModuleId {
        if let Some(&existing) = self.path_to_id.get(&path) {
            return existing;
        }

        let id = ModuleId::new(self.next_module_id);
        self.next_module_id += 1;

        let content_hash = format!("{:x}", Sha256::digest(source.as_bytes()));
        trace!("Registered module {id} for {}", path.display());

        self.path_to_id.insert(path.clone(), id);
        self.modules.push(ModuleRecord {
            id,
            path,
            specifiers: compiled.specifiers,
            code: compiled.code,
            specifier_to_id: IndexMap::new(),
            content_hash,
        });
        id
    }

    /// Record that `specifier`, written in `from`, resolves to `to`
    pub fn add_mapping(&mut self, from: ModuleId, specifier: &str, to: ModuleId) {
        if let Some(record) = self.modules.get_mut(from.index()) {
            record
                .specifier_to_id
                .entry(specifier.to_owned())
                .or_insert(to);
        }
    }

    pub fn get_id_by_path(&self, path: &Path) -> Option<ModuleId> {
        self.path_to_id.get(path).copied()
    }

    pub fn get(&self, id: ModuleId) -> Option<&ModuleRecord> {
        self.modules.get(id.index())
    }

    pub fn get_by_path(&self, path: &Path) -> Option<&ModuleRecord> {
        self.get_id_by_path(path).and_then(|id| self.get(id))
    }

    pub fn entry(&self) -> Option<&ModuleRecord> {
        self.modules.first()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules in identity order
    pub fn iter(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.iter()
    }

    /// Distinct `(importer, imported)` edges in identity order
    pub fn edges(&self) -> Vec<(ModuleId, ModuleId)> {
        let mut edges = Vec::new();
        for record in &self.modules {
            let mut seen = FxHashSet::default();
            for &target in record.specifier_to_id.values() {
                if seen.insert(target) {
                    edges.push((record.id, target));
                }
            }
        }
        edges
    }

    /// Check the generator's preconditions: dense identities and complete mappings
    pub fn validate(&self) -> Result<(), BuildError> {
        for (index, record) in self.modules.iter().enumerate() {
            if record.id.index() != index {
                return Err(BuildError::invalid_graph(format!(
                    "module {} is stored at position {index}; identities must be dense",
                    record.id
                )));
            }
            for specifier in &record.specifiers {
                let Some(target) = record.resolve(specifier) else {
                    return Err(BuildError::invalid_graph(format!(
                        "specifier '{specifier}' in {} has no resolved identity",
                        record.path.display()
                    )));
                };
                if target.index() >= self.modules.len() {
                    return Err(BuildError::invalid_graph(format!(
                        "specifier '{specifier}' in {} points at unknown module {target}",
                        record.path.display()
                    )));
                }
            }
        }
        Ok(())
    }

    fn to_petgraph(&self) -> DiGraph<ModuleId, ()> {
        let mut graph = DiGraph::with_capacity(self.modules.len(), 0);
        for record in &self.modules {
            graph.add_node(record.id);
        }
        for (from, to) in self.edges() {
            graph.add_edge(
                NodeIndex::new(from.index()),
                NodeIndex::new(to.index()),
                (),
            );
        }
        graph
    }

    /// Groups of modules that import each other, directly or transitively
    ///
    /// Each group is sorted by identity; groups are ordered by their lowest
    /// identity. A module importing itself forms a group of one.
    pub fn find_cycles(&self) -> Vec<Vec<ModuleId>> {
        let graph = self.to_petgraph();
        let mut cycles: Vec<Vec<ModuleId>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&node| graph.contains_edge(node, node))
            })
            .map(|component| {
                let mut ids: Vec<ModuleId> = component.into_iter().map(|n| graph[n]).collect();
                ids.sort_unstable();
                ids
            })
            .collect();
        cycles.sort_by_key(|ids| ids.first().copied());
        cycles
    }

    /// Closed import chain through a cycle group, starting and ending at its
    /// lowest identity (`a -> b -> a`)
    pub fn cycle_chain(&self, cycle: &[ModuleId]) -> Vec<PathBuf> {
        let Some(&start) = cycle.iter().min() else {
            return Vec::new();
        };
        let members: FxHashSet<ModuleId> = cycle.iter().copied().collect();

        // Breadth-first search back to `start`, staying inside the group
        let mut parent: FxHashMap<ModuleId, ModuleId> = FxHashMap::default();
        let mut queue = std::collections::VecDeque::from([start]);
        let mut closing = None;
        'search: while let Some(current) = queue.pop_front() {
            let Some(record) = self.get(current) else {
                continue;
            };
            for &next in record.specifier_to_id.values() {
                if next == start {
                    closing = Some(current);
                    break 'search;
                }
                if members.contains(&next) && !parent.contains_key(&next) && next != start {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        let Some(mut current) = closing else {
            return Vec::new();
        };
        let mut ids = vec![start, current];
        while current != start {
            current = parent[&current];
            ids.push(current);
        }
        ids.reverse();

        ids.into_iter()
            .filter_map(|id| self.get(id).map(|record| record.path.clone()))
            .collect()
    }
}
