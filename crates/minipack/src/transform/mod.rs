//! Per-module compilation: discover import specifiers and produce the code
//! that runs inside a module factory

mod esm;

use std::path::Path;

use crate::error::BuildError;

/// What the graph builder needs to know about one module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledModule {
    /// Import specifiers in source order, each listed once
    pub specifiers: Vec<String>,
    /// Body executed with `require`, `module` and `exports` in scope
    pub code: String,
}

/// Turns module source text into specifiers and factory code
///
/// Implementations must be deterministic for a given source text.
pub trait ModuleCompiler: Send + Sync {
    fn compile(&self, path: &Path, source: &str) -> Result<CompiledModule, BuildError>;
}

/// Built-in compiler: ES module syntax is rewritten to CommonJS, plain
/// scripts pass through, `.json` files become `module.exports = <data>`
#[derive(Debug, Default, Clone, Copy)]
pub struct EsmTransformer;

impl ModuleCompiler for EsmTransformer {
    fn compile(&self, path: &Path, source: &str) -> Result<CompiledModule, BuildError> {
        if path.extension().is_some_and(|ext| ext == "json") {
            return Ok(CompiledModule {
                specifiers: Vec::new(),
                code: format!("module.exports = {};", source.trim()),
            });
        }

        esm::rewrite_module(path, source)
            .map_err(|err| BuildError::parse(path, err.line, err.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_module() {
        let compiled = EsmTransformer
            .compile(Path::new("/data.json"), "{ \"a\": 1 }\n")
            .expect("json should compile");
        assert_eq!(compiled.code, "module.exports = { \"a\": 1 };");
        assert!(compiled.specifiers.is_empty());
    }

    #[test]
    fn test_parse_error_names_module() {
        let err = EsmTransformer
            .compile(Path::new("/src/broken.js"), "export { a from './a';")
            .expect_err("broken module must fail");
        match err {
            BuildError::Parse { path, line, .. } => {
                assert_eq!(path, Path::new("/src/broken.js"));
                assert_eq!(line, 1);
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_module_extension_selects_source_type() {
        let compiled = EsmTransformer
            .compile(Path::new("/src/lib.mjs"), "export const a = 1;
")
            .expect("module should compile");
        assert!(compiled.code.starts_with("\"use strict\";"));

        let script = EsmTransformer
            .compile(Path::new("/src/lib.cjs"), "module.exports = 1;
")
            .expect("script should compile");
        assert_eq!(script.code, "module.exports = 1;\n");
    }
}
