//! Breadth-first discovery of every module reachable from the entry
//!
//! The worklist holds identities whose dependencies have not been resolved
//! yet. Each module is compiled exactly once, when it is first discovered;
//! later imports of the same canonical path reuse its identity.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

use log::{debug, info, trace};

use crate::{
    error::BuildError,
    module_graph::{ModuleGraph, ModuleId},
    resolver::ModuleResolver,
    transform::ModuleCompiler,
};

/// One build's discovery state
pub struct GraphBuilder<'a> {
    resolver: &'a mut ModuleResolver,
    compiler: &'a dyn ModuleCompiler,
    graph: ModuleGraph,
    worklist: VecDeque<ModuleId>,
}

impl std::fmt::Debug for GraphBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("resolver", &self.resolver)
            .field("modules", &self.graph.len())
            .field("pending", &self.worklist.len())
            .finish_non_exhaustive()
    }
}

impl<'a> GraphBuilder<'a> {
    pub fn new(resolver: &'a mut ModuleResolver, compiler: &'a dyn ModuleCompiler) -> Self {
        Self {
            resolver,
            compiler,
            graph: ModuleGraph::new(),
            worklist: VecDeque::new(),
        }
    }

    /// Build the graph for `entry`; the entry receives identity 0
    pub fn build(mut self, entry: &Path) -> Result<ModuleGraph, BuildError> {
        let entry_path = self.resolver.resolve_entry(entry)?;
        let entry_id = self.discover(entry_path)?;
        debug_assert_eq!(entry_id, ModuleId::ENTRY);

        while let Some(id) = self.worklist.pop_front() {
            self.expand(id)?;
        }

        info!(
            "Discovered {} module(s) from {}",
            self.graph.len(),
            entry.display()
        );
        Ok(self.graph)
    }

    /// Resolve every specifier of an already compiled module
    fn expand(&mut self, id: ModuleId) -> Result<(), BuildError> {
        let record = self.graph.get(id).ok_or_else(|| {
            BuildError::invalid_graph(format!("module {id} was queued but never registered"))
        })?;
        let importer = record.path.clone();
        let specifiers = record.specifiers.clone();
        trace!(
            "Expanding module {id} ({}) with {} specifier(s)",
            importer.display(),
            specifiers.len()
        );

        for specifier in &specifiers {
            let resolved = self.resolver.resolve(specifier, &importer)?;
            let target = match self.graph.get_id_by_path(&resolved) {
                Some(existing) => {
                    trace!("'{specifier}' reuses module {existing}");
                    existing
                }
                None => self.discover(resolved)?,
            };
            trace!("Edge {id} -> {target} via '{specifier}'");
            self.graph.add_mapping(id, specifier, target);
        }
        Ok(())
    }

    /// Read and compile a new module, assign the next identity, and queue it
    fn discover(&mut self, path: PathBuf) -> Result<ModuleId, BuildError> {
        let source = std::fs::read_to_string(&path).map_err(|source| BuildError::Io {
            path: path.clone(),
            source,
        })?;
        let compiled = self.compiler.compile(&path, &source)?;

        let id = self.graph.add_module(path, &source, compiled);
        debug!(
            "Discovered module {id}: {}",
            self.graph
                .get(id)
                .map(|record| record.path.display().to_string())
                .unwrap_or_default()
        );
        self.worklist.push_back(id);
        Ok(id)
    }
}

/// Build the module graph for `entry` with the given resolver and compiler
pub fn build_graph(
    entry: &Path,
    resolver: &mut ModuleResolver,
    compiler: &dyn ModuleCompiler,
) -> Result<ModuleGraph, BuildError> {
    GraphBuilder::new(resolver, compiler).build(entry)
}
