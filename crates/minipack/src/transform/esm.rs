//! ES module → CommonJS rewriting
//!
//! The module is parsed with oxc and the rewrite is a set of span edits
//! spliced into the original text, so everything that is not module syntax
//! is carried over byte for byte. Replacements keep the line count of the
//! text they replace; import `require`s and export getters are hoisted onto
//! a single prologue line.

use std::{ops::Range, path::Path};

use indexmap::IndexSet;
use log::{debug, trace};
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, CallExpression, Declaration, ExportAllDeclaration, ExportDefaultDeclaration,
    ExportDefaultDeclarationKind, ExportNamedDeclaration, Expression, ImportDeclaration,
    ImportDeclarationSpecifier, ImportExpression, ModuleExportName,
};
use oxc_ast_visit::{Visit, walk};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};
use rustc_hash::FxHashSet;

use super::CompiledModule;

/// Name prefix for bindings introduced by the rewriter
const TEMP_PREFIX: &str = "__minipack_dep";

const EXPORT_STAR_HELPER: &str = "function __minipack_exportStar(from, to) { \
     Object.keys(from).forEach(function (key) { if (key !== \"default\" && \
     !Object.prototype.hasOwnProperty.call(to, key)) Object.defineProperty(to, key, { \
     enumerable: true, get: function () { return from[key]; } }); }); }";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RewriteError {
    /// 1-based line of the offending syntax
    pub(crate) line: usize,
    pub(crate) message: String,
}

/// Parse and rewrite one module's source text
pub(crate) fn rewrite_module(path: &Path, source: &str) -> Result<CompiledModule, RewriteError> {
    let allocator = Allocator::default();
    let source_type = SourceType::from_path(path)
        .unwrap_or_default()
        .with_unambiguous(true);

    let parsed = Parser::new(&allocator, source, source_type).parse();
    if let Some(error) = parsed.errors.first() {
        let offset = error
            .labels
            .as_ref()
            .and_then(|labels| labels.first())
            .map_or(0, |label| label.offset());
        return Err(RewriteError {
            line: line_of(source, offset),
            message: error.message.to_string(),
        });
    }

    let mut rewriter = ModuleRewriter::new(source);
    if let Some(hashbang) = &parsed.program.hashbang {
        rewriter.push_edit(hashbang.span, String::new());
    }
    rewriter.visit_program(&parsed.program);
    rewriter.finish()
}

fn line_of(source: &str, offset: usize) -> usize {
    let end = offset.min(source.len());
    source.as_bytes()[..end]
        .iter()
        .filter(|&&byte| byte == b'\n')
        .count()
        + 1
}

#[derive(Debug)]
struct Edit {
    range: Range<usize>,
    replacement: String,
}

struct ModuleRewriter<'s> {
    source: &'s str,
    specifiers: IndexSet<String>,
    edits: Vec<Edit>,
    /// Import and re-export statements, run before the module body
    hoisted: Vec<String>,
    /// `(exported name, getter expression)` installed in the prologue
    exports: Vec<(String, String)>,
    exported_names: FxHashSet<String>,
    uses_export_star: bool,
    is_esm: bool,
    temp_counter: usize,
    error: Option<RewriteError>,
}

impl<'s> ModuleRewriter<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            specifiers: IndexSet::new(),
            edits: Vec::new(),
            hoisted: Vec::new(),
            exports: Vec::new(),
            exported_names: FxHashSet::default(),
            uses_export_star: false,
            is_esm: false,
            temp_counter: 0,
            error: None,
        }
    }

    fn finish(mut self) -> Result<CompiledModule, RewriteError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        self.edits.sort_by_key(|edit| edit.range.start);

        let mut code = String::with_capacity(self.source.len() + 256);
        if self.is_esm {
            code.push_str(&self.prologue());
            code.push('\n');
        }

        let mut last = 0;
        for edit in &self.edits {
            if edit.range.start < last {
                continue;
            }
            code.push_str(&self.source[last..edit.range.start]);
            code.push_str(&edit.replacement);
            last = edit.range.end;
        }
        code.push_str(&self.source[last..]);

        trace!(
            "Rewrote module: {} specifiers, {} exports, {} edits",
            self.specifiers.len(),
            self.exports.len(),
            self.edits.len()
        );

        Ok(CompiledModule {
            specifiers: self.specifiers.into_iter().collect(),
            code,
        })
    }

    /// `"use strict"`, the interop marker, export getters, helpers and the
    /// hoisted requires, all on one line
    fn prologue(&self) -> String {
        let mut parts = vec![
            "\"use strict\";".to_owned(),
            "Object.defineProperty(exports, \"__esModule\", { value: true });".to_owned(),
        ];
        for (exported, expression) in &self.exports {
            parts.push(format!(
                "Object.defineProperty(exports, {}, {{ enumerable: true, get: function () {{ \
                 return {expression}; }} }});",
                js_string(exported)
            ));
        }
        if self.uses_export_star {
            parts.push(EXPORT_STAR_HELPER.to_owned());
        }
        parts.extend(self.hoisted.iter().cloned());
        parts.join(" ")
    }

    fn push_edit(&mut self, span: Span, replacement: String) {
        self.push_range_edit(span.start as usize..span.end as usize, replacement);
    }

    fn push_range_edit(&mut self, range: Range<usize>, mut replacement: String) {
        let newlines = self.source[range.clone()].matches('\n').count();
        replacement.extend(std::iter::repeat_n('\n', newlines));
        self.edits.push(Edit { range, replacement });
    }

    fn fail(&mut self, span: Span, message: String) {
        if self.error.is_none() {
            self.error = Some(RewriteError {
                line: line_of(self.source, span.start as usize),
                message,
            });
        }
    }

    fn add_specifier(&mut self, specifier: &str) {
        trace!("Found specifier '{specifier}'");
        self.specifiers.insert(specifier.to_owned());
    }

    fn add_export(&mut self, exported: &str, expression: String, span: Span) {
        if !self.exported_names.insert(exported.to_owned()) {
            self.fail(span, format!("duplicate export '{exported}'"));
            return;
        }
        self.exports.push((exported.to_owned(), expression));
    }

    fn next_temp(&mut self) -> String {
        let name = format!("{TEMP_PREFIX}{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    /// `require('./x')` keeping the literal exactly as written
    fn require_of(&self, literal: Span) -> String {
        format!("require({})", literal.source_text(self.source))
    }

    fn import_declaration(&mut self, decl: &ImportDeclaration<'_>) {
        self.is_esm = true;
        self.add_specifier(decl.source.value.as_str());
        let require = self.require_of(decl.source.span);

        let specifiers = decl.specifiers.as_ref().filter(|list| !list.is_empty());
        let hoisted = match specifiers {
            None => format!("{require};"),
            Some(list) => {
                if list.len() == 1
                    && let Some(ImportDeclarationSpecifier::ImportNamespaceSpecifier(namespace)) =
                        list.first()
                {
                    format!("var {} = {require};", namespace.local.name)
                } else {
                    let temp = self.next_temp();
                    let mut parts = vec![format!("var {temp} = {require};")];
                    for specifier in list {
                        parts.push(match specifier {
                            ImportDeclarationSpecifier::ImportDefaultSpecifier(default) => {
                                format!("var {} = {};", default.local.name, interop(&temp))
                            }
                            ImportDeclarationSpecifier::ImportNamespaceSpecifier(namespace) => {
                                format!("var {} = {temp};", namespace.local.name)
                            }
                            ImportDeclarationSpecifier::ImportSpecifier(named) => {
                                let imported = export_name(&named.imported);
                                let value = if imported == "default" {
                                    interop(&temp)
                                } else {
                                    member(&temp, imported)
                                };
                                format!("var {} = {value};", named.local.name)
                            }
                        });
                    }
                    parts.join(" ")
                }
            }
        };

        self.hoisted.push(hoisted);
        self.push_edit(decl.span, String::new());
    }

    fn export_named(&mut self, decl: &ExportNamedDeclaration<'_>) {
        self.is_esm = true;

        if let Some(declaration) = &decl.declaration {
            for name in declared_names(declaration) {
                self.add_export(&name, name.clone(), decl.span);
            }
            // Keep the declaration itself; only `export ` goes
            self.push_range_edit(
                decl.span.start as usize..declaration.span().start as usize,
                String::new(),
            );
            return;
        }

        if let Some(source) = &decl.source {
            self.add_specifier(source.value.as_str());
            let temp = self.next_temp();
            let require = self.require_of(source.span);
            self.hoisted.push(format!("var {temp} = {require};"));
            for specifier in &decl.specifiers {
                let local = export_name(&specifier.local);
                let expression = if local == "default" {
                    interop(&temp)
                } else {
                    member(&temp, local)
                };
                self.add_export(export_name(&specifier.exported), expression, specifier.span);
            }
        } else {
            for specifier in &decl.specifiers {
                let local = export_name(&specifier.local).to_owned();
                self.add_export(export_name(&specifier.exported), local, specifier.span);
            }
        }
        self.push_edit(decl.span, String::new());
    }

    fn export_default(&mut self, decl: &ExportDefaultDeclaration<'_>) {
        self.is_esm = true;
        let declaration_start = decl.declaration.span().start as usize;
        let named = match &decl.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(function) => function.id.as_ref(),
            ExportDefaultDeclarationKind::ClassDeclaration(class) => class.id.as_ref(),
            _ => None,
        };

        match named {
            Some(id) => {
                // Keep the declaration (and its hoisting); export through a getter
                self.add_export("default", id.name.to_string(), decl.span);
                self.push_range_edit(decl.span.start as usize..declaration_start, String::new());
            }
            None => {
                if !self.exported_names.insert("default".to_owned()) {
                    self.fail(decl.span, "duplicate export 'default'".to_owned());
                    return;
                }
                self.push_range_edit(
                    decl.span.start as usize..declaration_start,
                    "exports.default = ".to_owned(),
                );
            }
        }
    }

    fn export_all(&mut self, decl: &ExportAllDeclaration<'_>) {
        self.is_esm = true;
        self.add_specifier(decl.source.value.as_str());
        let require = self.require_of(decl.source.span);

        match &decl.exported {
            Some(namespace) => {
                let temp = self.next_temp();
                self.hoisted.push(format!("var {temp} = {require};"));
                self.add_export(export_name(namespace), temp, decl.span);
            }
            None => {
                self.uses_export_star = true;
                self.hoisted
                    .push(format!("__minipack_exportStar({require}, exports);"));
            }
        }
        self.push_edit(decl.span, String::new());
    }
}

impl<'a> Visit<'a> for ModuleRewriter<'_> {
    fn visit_import_declaration(&mut self, decl: &ImportDeclaration<'a>) {
        self.import_declaration(decl);
    }

    fn visit_export_named_declaration(&mut self, decl: &ExportNamedDeclaration<'a>) {
        self.export_named(decl);
        walk::walk_export_named_declaration(self, decl);
    }

    fn visit_export_default_declaration(&mut self, decl: &ExportDefaultDeclaration<'a>) {
        self.export_default(decl);
        walk::walk_export_default_declaration(self, decl);
    }

    fn visit_export_all_declaration(&mut self, decl: &ExportAllDeclaration<'a>) {
        self.export_all(decl);
    }

    /// `import('./x')` → a promise resolving to the bundled module
    fn visit_import_expression(&mut self, expr: &ImportExpression<'a>) {
        if let Expression::StringLiteral(literal) = &expr.source {
            self.add_specifier(literal.value.as_str());
            let replacement = format!(
                "Promise.resolve().then(function () {{ return {}; }})",
                self.require_of(literal.span)
            );
            self.push_edit(expr.span, replacement);
        } else {
            debug!(
                "Leaving non-literal dynamic import on line {} untouched",
                line_of(self.source, expr.span.start as usize)
            );
            walk::walk_import_expression(self, expr);
        }
    }

    /// `require('./x')` is kept as is; only the specifier is recorded
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Expression::Identifier(callee) = &call.callee
            && callee.name.as_str() == "require"
            && call.arguments.len() == 1
            && let Some(Argument::StringLiteral(literal)) = call.arguments.first()
        {
            self.add_specifier(literal.value.as_str());
        }
        walk::walk_call_expression(self, call);
    }
}

/// Bindings introduced by an exported declaration, destructuring included
fn declared_names(declaration: &Declaration<'_>) -> Vec<String> {
    match declaration {
        Declaration::VariableDeclaration(variables) => variables
            .declarations
            .iter()
            .flat_map(|declarator| declarator.id.get_binding_identifiers())
            .map(|ident| ident.name.to_string())
            .collect(),
        Declaration::FunctionDeclaration(function) => function
            .id
            .iter()
            .map(|ident| ident.name.to_string())
            .collect(),
        Declaration::ClassDeclaration(class) => {
            class.id.iter().map(|ident| ident.name.to_string()).collect()
        }
        _ => Vec::new(),
    }
}

fn export_name<'n>(name: &'n ModuleExportName<'_>) -> &'n str {
    match name {
        ModuleExportName::IdentifierName(ident) => ident.name.as_str(),
        ModuleExportName::IdentifierReference(ident) => ident.name.as_str(),
        ModuleExportName::StringLiteral(literal) => literal.value.as_str(),
    }
}

/// Default-import interop: `__esModule` modules expose `.default`,
/// CommonJS modules are their own default
fn interop(temp: &str) -> String {
    format!("{temp} && {temp}.__esModule ? {temp}.default : {temp}")
}

/// `obj.name`, or `obj["name"]` when `name` is not a plain identifier
fn member(object: &str, name: &str) -> String {
    let is_identifier = name
        .chars()
        .next()
        .is_some_and(|c| c == '_' || c == '$' || c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c == '_' || c == '$' || c.is_ascii_alphanumeric());
    if is_identifier {
        format!("{object}.{name}")
    } else {
        format!("{object}[{}]", js_string(name))
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}
