use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::{
    code_generator::BundleGenerator,
    config::Config,
    error::BuildError,
    graph_builder::GraphBuilder,
    module_graph::ModuleGraph,
    resolver::ModuleResolver,
    transform::{EsmTransformer, ModuleCompiler},
};

/// Result of one build
#[derive(Debug)]
pub struct BundleOutput {
    /// The self-evaluating bundle text
    pub code: String,
    /// The graph the bundle was generated from
    pub graph: ModuleGraph,
}

/// Drives one build: graph discovery, cycle policy, generation and output
pub struct BundleOrchestrator {
    config: Config,
    compiler: Box<dyn ModuleCompiler>,
}

impl std::fmt::Debug for BundleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BundleOrchestrator {
    pub fn new(config: Config) -> Self {
        Self::with_compiler(config, Box::new(EsmTransformer))
    }

    /// Use a custom parse/transform collaborator
    pub fn with_compiler(config: Config, compiler: Box<dyn ModuleCompiler>) -> Self {
        Self { config, compiler }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the bundle for `entry` in memory
    pub fn bundle(&self, entry: &Path) -> Result<BundleOutput> {
        info!("Bundling {}", entry.display());
        debug!("Configuration: {:?}", self.config);

        let mut resolver = ModuleResolver::new(self.config.extension_policy());
        let graph = GraphBuilder::new(&mut resolver, self.compiler.as_ref()).build(entry)?;
        graph.validate()?;

        self.check_cycles(&graph)?;

        let code = BundleGenerator::new(self.config.runtime_options()).generate(&graph);
        info!(
            "Bundled {} module(s) into {} bytes",
            graph.len(),
            code.len()
        );
        Ok(BundleOutput { code, graph })
    }

    /// Build the bundle and write it to `output`, creating parent directories
    pub fn bundle_to_file(&self, entry: &Path, output: &Path) -> Result<BundleOutput> {
        let bundle = self.bundle(entry)?;
        write_file(output, &bundle.code)?;
        info!("Wrote bundle to {}", output.display());
        Ok(bundle)
    }

    /// Build the bundle and write it to stdout
    pub fn bundle_to_stdout(&self, entry: &Path) -> Result<BundleOutput> {
        let bundle = self.bundle(entry)?;
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(bundle.code.as_bytes())
            .and_then(|()| stdout.flush())
            .context("Failed to write bundle to stdout")?;
        Ok(bundle)
    }

    /// Circular imports fail the build when requested, or when the runtime
    /// would re-run factories forever; otherwise they are only reported
    fn check_cycles(&self, graph: &ModuleGraph) -> Result<(), BuildError> {
        let cycles = graph.find_cycles();
        if cycles.is_empty() {
            return Ok(());
        }

        let fatal = self.config.reject_cycles || !self.config.module_cache;
        for cycle in &cycles {
            let chain = graph.cycle_chain(cycle);
            if fatal {
                return Err(BuildError::Cycle { chain });
            }
            warn!(
                "Circular import: {}",
                chain
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            );
        }
        Ok(())
    }
}

/// Write the module graph as pretty JSON
pub fn write_graph_manifest(graph: &ModuleGraph, path: &Path) -> Result<()> {
    let json =
        serde_json::to_string_pretty(graph).context("Failed to serialize the module graph")?;
    write_file(path, &json)?;
    info!("Wrote module graph to {}", path.display());
    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;
    use tempfile::TempDir;

    use super::*;

    fn create_test_file(root: &Path, name: &str, content: &str) -> Result<()> {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn cyclic_project() -> Result<TempDir> {
        let temp_dir = TempDir::new()?;
        create_test_file(
            temp_dir.path(),
            "a.js",
            "import { b } from './b';\nexport const a = 'a';\n",
        )?;
        create_test_file(
            temp_dir.path(),
            "b.js",
            "import { a } from './a';\nexport const b = 'b';\n",
        )?;
        Ok(temp_dir)
    }

    #[test]
    fn test_bundle_in_memory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        create_test_file(temp_dir.path(), "main.js", "import './util';\n")?;
        create_test_file(temp_dir.path(), "util.js", "console.log('util');\n")?;

        let output = BundleOrchestrator::new(Config::default())
            .bundle(&temp_dir.path().join("main.js"))?;
        assert_eq!(output.graph.len(), 2);
        assert!(output.code.contains("console.log('util');"));
        assert!(output.code.contains(r#"{"./util": 1}"#));
        Ok(())
    }

    #[test]
    fn test_cycle_allowed_with_module_cache() -> Result<()> {
        let project = cyclic_project()?;
        let output = BundleOrchestrator::new(Config::default())
            .bundle(&project.path().join("a.js"))?;
        assert_eq!(output.graph.len(), 2);
        Ok(())
    }

    #[test]
    fn test_cycle_rejected_on_request() -> Result<()> {
        let project = cyclic_project()?;
        let config = Config {
            reject_cycles: true,
            ..Config::default()
        };
        let err = BundleOrchestrator::new(config)
            .bundle(&project.path().join("a.js"))
            .expect_err("cycle must be rejected");

        let Some(BuildError::Cycle { chain }) = err.downcast_ref::<BuildError>() else {
            panic!("expected a cycle error, got {err:?}");
        };
        let names: Vec<_> = chain
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.js", "b.js", "a.js"]);
        Ok(())
    }

    #[test]
    fn test_cycle_rejected_without_module_cache() -> Result<()> {
        let project = cyclic_project()?;
        let config = Config {
            module_cache: false,
            ..Config::default()
        };
        let err = BundleOrchestrator::new(config)
            .bundle(&project.path().join("a.js"))
            .expect_err("re-invoking runtime cannot run a cycle");
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Cycle { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_bundle_to_file_creates_directories() -> Result<()> {
        let temp_dir = TempDir::new()?;
        create_test_file(temp_dir.path(), "main.js", "console.log(1);\n")?;
        let output = temp_dir.path().join("dist/nested/bundle.js");

        let bundle = BundleOrchestrator::new(Config::default())
            .bundle_to_file(&temp_dir.path().join("main.js"), &output)?;
        assert_eq!(fs::read_to_string(&output)?, bundle.code);
        Ok(())
    }

    #[test]
    fn test_graph_manifest() -> Result<()> {
        let temp_dir = TempDir::new()?;
        create_test_file(temp_dir.path(), "main.js", "require('./dep');\n")?;
        create_test_file(temp_dir.path(), "dep.js", "module.exports = 1;\n")?;

        let bundle = BundleOrchestrator::new(Config::default())
            .bundle(&temp_dir.path().join("main.js"))?;
        let manifest_path = temp_dir.path().join("out/graph.json");
        write_graph_manifest(&bundle.graph, &manifest_path)?;

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&manifest_path)?)?;
        let modules = manifest["modules"].as_array().expect("modules array");
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0]["id"], 0);
        assert_eq!(modules[0]["mapping"]["./dep"], 1);
        assert_eq!(modules[1]["specifiers"].as_array().map(Vec::len), Some(0));
        assert_eq!(
            modules[1]["content_hash"].as_str().map(str::len),
            Some(64)
        );
        assert!(modules[0].get("code").is_none());
        Ok(())
    }
}
