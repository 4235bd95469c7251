//! Minimal JavaScript module bundler
//!
//! Starting from an entry file, every reachable module is discovered
//! breadth-first, compiled to a CommonJS-shaped factory, and emitted into a
//! single self-evaluating script with a small embedded `require` runtime.

pub mod code_generator;
pub mod config;
pub mod error;
pub mod graph_builder;
pub mod module_graph;
pub mod orchestrator;
pub mod resolver;
pub mod transform;

pub use code_generator::{BundleGenerator, RuntimeOptions};
pub use config::Config;
pub use error::BuildError;
pub use module_graph::{ModuleGraph, ModuleId, ModuleRecord};
pub use orchestrator::{BundleOrchestrator, BundleOutput};
