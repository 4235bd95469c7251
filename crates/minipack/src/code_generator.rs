//! Emits the self-evaluating bundle: a registry of module factories plus the
//! small `require` runtime that links them at execution time

use std::path::Path;

use cow_utils::CowUtils;
use log::debug;

use crate::module_graph::{ModuleGraph, ModuleRecord};

/// Knobs for the emitted runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Run each factory at most once and hand out the cached `module.exports`
    pub module_cache: bool,
    /// Precede each factory with a comment naming its source file
    pub module_comments: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            module_cache: true,
            module_comments: true,
        }
    }
}

/// `require` that re-runs the factory on every call
const REINVOKING_RUNTIME: &str = r#"(function (modules) {
  function require(id) {
    var fn = modules[id][0];
    var mapping = modules[id][1];

    function localRequire(name) {
      if (!Object.prototype.hasOwnProperty.call(mapping, name)) {
        throw new Error("Cannot find module '" + name + "'");
      }
      return require(mapping[name]);
    }

    var module = { exports: {} };

    fn(localRequire, module, module.exports);

    return module.exports;
  }

  require(0);
})"#;

/// `require` backed by a per-identity cache; the module object is cached
/// before its factory runs so circular requires see partial exports
const CACHING_RUNTIME: &str = r#"(function (modules) {
  var cache = {};

  function require(id) {
    if (Object.prototype.hasOwnProperty.call(cache, id)) {
      return cache[id].exports;
    }

    var fn = modules[id][0];
    var mapping = modules[id][1];

    function localRequire(name) {
      if (!Object.prototype.hasOwnProperty.call(mapping, name)) {
        throw new Error("Cannot find module '" + name + "'");
      }
      return require(mapping[name]);
    }

    var module = { exports: {} };
    cache[id] = module;

    fn(localRequire, module, module.exports);

    return module.exports;
  }

  require(0);
})"#;

#[derive(Debug, Default)]
pub struct BundleGenerator {
    options: RuntimeOptions,
}

impl BundleGenerator {
    pub fn new(options: RuntimeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> RuntimeOptions {
        self.options
    }

    /// Render the bundle for a validated graph
    ///
    /// Modules are emitted in identity order. The graph must be dense and
    /// fully mapped (see [`ModuleGraph::validate`]); the generator itself has
    /// no failure modes.
    pub fn generate(&self, graph: &ModuleGraph) -> String {
        let base_dir = graph
            .entry()
            .and_then(|entry| entry.path.parent())
            .map(Path::to_path_buf);

        let mut registry = String::from("{\n");
        let mut first = true;
        for record in graph.iter() {
            if !first {
                registry.push_str(",\n");
            }
            first = false;
            self.write_entry(&mut registry, record, base_dir.as_deref());
        }
        registry.push_str("\n}");

        let runtime = if self.options.module_cache {
            CACHING_RUNTIME
        } else {
            REINVOKING_RUNTIME
        };
        debug!(
            "Generated registry for {} module(s) ({} bytes, module cache {})",
            graph.len(),
            registry.len(),
            if self.options.module_cache { "on" } else { "off" }
        );

        format!("{runtime}({registry});\n")
    }

    fn write_entry(&self, out: &mut String, record: &ModuleRecord, base_dir: Option<&Path>) {
        if self.options.module_comments {
            let shown = base_dir
                .and_then(|base| record.path.strip_prefix(base).ok())
                .unwrap_or(&record.path);
            let shown = shown.to_string_lossy();
            // A path cannot close the comment it sits in
            out.push_str("/* ");
            out.push_str(&shown.cow_replace("*/", "*\\/"));
            out.push_str(" */\n");
        }

        out.push_str(&format!(
            "{}: [function (require, module, exports) {{\n{}\n}}, {}]",
            record.id,
            record.code,
            mapping_literal(record)
        ));
    }
}

/// `{"./b": 1, ...}` in specifier insertion order
fn mapping_literal(record: &ModuleRecord) -> String {
    if record.specifier_to_id.is_empty() {
        return "{}".to_owned();
    }
    let entries = record
        .specifier_to_id
        .iter()
        .map(|(specifier, id)| format!("{}: {id}", json_string(specifier)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{entries}}}")
}

fn json_string(value: &str) -> String {
    // Serializing a str cannot fail; fall back to the debug form regardless
    serde_json::to_string(value).unwrap_or_else(|_| format!("{value:?}"))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{module_graph::ModuleId, transform::CompiledModule};

    fn compiled(specifiers: &[&str], code: &str) -> CompiledModule {
        CompiledModule {
            specifiers: specifiers.iter().map(|s| (*s).to_owned()).collect(),
            code: code.to_owned(),
        }
    }

    /// entry -> ./b -> ./lib/c, built by hand without touching the disk
    fn sample_graph() -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        let a = graph.add_module(
            PathBuf::from("/project/src/index.js"),
            "",
            compiled(&["./b"], "var b = require(\"./b\");\nconsole.log(b.value);"),
        );
        let b = graph.add_module(
            PathBuf::from("/project/src/b.js"),
            "",
            compiled(
                &["./lib/c"],
                "exports.value = require(\"./lib/c\").name + \"!\";",
            ),
        );
        let c = graph.add_module(
            PathBuf::from("/project/src/lib/c.js"),
            "",
            compiled(&[], "exports.name = \"c\";"),
        );
        graph.add_mapping(a, "./b", b);
        graph.add_mapping(b, "./lib/c", c);
        graph
    }

    #[test]
    fn test_generate_with_defaults() {
        let code = BundleGenerator::default().generate(&sample_graph());
        insta::assert_snapshot!(code);
    }

    #[test]
    fn test_reinvoking_runtime_has_no_cache() {
        let generator = BundleGenerator::new(RuntimeOptions {
            module_cache: false,
            module_comments: false,
        });
        let code = generator.generate(&sample_graph());

        assert!(code.starts_with(REINVOKING_RUNTIME));
        assert!(!code.contains("var cache"));
        assert!(!code.contains("/*"));
        assert!(code.ends_with("});\n"));
    }

    #[test]
    fn test_entries_follow_identity_order() {
        let code = BundleGenerator::default().generate(&sample_graph());
        let positions: Vec<usize> = ["0: [function", "1: [function", "2: [function"]
            .iter()
            .map(|needle| code.find(needle).expect("entry present"))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_mapping_literals() {
        let graph = sample_graph();
        assert_eq!(
            mapping_literal(graph.get(ModuleId::new(0)).expect("entry")),
            r#"{"./b": 1}"#
        );
        assert_eq!(
            mapping_literal(graph.get(ModuleId::new(2)).expect("leaf")),
            "{}"
        );
    }

    #[test]
    fn test_mapping_keys_are_escaped() {
        let mut graph = ModuleGraph::new();
        let a = graph.add_module(
            PathBuf::from("/p/a.js"),
            "",
            compiled(&["./we\"ird"], ""),
        );
        let b = graph.add_module(PathBuf::from("/p/we\"ird.js"), "", compiled(&[], ""));
        graph.add_mapping(a, "./we\"ird", b);

        let literal = mapping_literal(graph.entry().expect("entry"));
        assert_eq!(literal, r#"{"./we\"ird": 1}"#);
    }

    #[test]
    fn test_comment_terminator_in_path_is_escaped() {
        let mut graph = ModuleGraph::new();
        graph.add_module(PathBuf::from("/p/a*/b.js"), "", compiled(&[], ""));

        let code = BundleGenerator::default().generate(&graph);
        assert!(code.contains("/* b.js */"));

        let mut nested = ModuleGraph::new();
        let entry = nested.add_module(PathBuf::from("/p/main.js"), "", compiled(&["./x*/y"], ""));
        let dep = nested.add_module(PathBuf::from("/p/x*/y.js"), "", compiled(&[], ""));
        nested.add_mapping(entry, "./x*/y", dep);

        let code = BundleGenerator::default().generate(&nested);
        assert!(code.contains("/* x*\\/y.js */"));
    }

    #[test]
    fn test_code_is_embedded_verbatim() {
        let source = "const s = `}]);`;\n// trailing comment";
        let mut graph = ModuleGraph::new();
        graph.add_module(PathBuf::from("/p/a.js"), "", compiled(&[], source));

        let code = BundleGenerator::default().generate(&graph);
        assert!(code.contains(&format!("{{\n{source}\n}}, {{}}]")));
    }
}
