//! Function isolation: carve a single exported function out of a shared source file.
//!
//! Many deployable functions usually live in one file (`index.ts` exporting
//! `onUserCreate`, `onOrderPaid`, ...). To give each function its own content
//! identity, the isolator writes a sibling copy of the file in which every
//! other top-level exported value binding has been removed. Imports and
//! non-exported helpers are left alone; the bundler's dead-code elimination
//! is expected to drop whatever the removed exports used exclusively.
//!
//! Isolation is shallow and name based. It is not a reachability analysis.

use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};
use tree_sitter::{Language, Node, Parser};

/// Default separator for hierarchical function names (`group-sub-name`).
pub const DEFAULT_NAME_SEPARATOR: &str = "-";

/// Binding name used for `export default ...`.
pub const DEFAULT_EXPORT: &str = "default";

#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("Failed to read source {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported source file type: {0}")]
    UnsupportedSource(PathBuf),

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to write isolated source {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Grammars the isolator can parse, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    TypeScript,
    Tsx,
    JavaScript,
}

impl SourceLanguage {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "js" | "mjs" | "cjs" | "jsx" => Some(Self::JavaScript),
            _ => None,
        }
    }

    fn tree_sitter_language(self) -> Language {
        match self {
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }
}

/// A top-level exported value binding and the byte span that declares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedBinding {
    pub name: String,
    span: Range<usize>,
}

#[derive(Debug, Clone)]
enum ExportForm {
    /// `export function f`, `export class C`, `export default ...`.
    Whole,
    /// `export const a = 1, b = 2`; surviving declarators are re-emitted.
    Declarators { keyword: String },
    /// `export { a, b as c } from "./x"`; surviving specifiers are re-emitted.
    Clause { tail: String },
}

#[derive(Debug, Clone)]
struct ExportStatement {
    span: Range<usize>,
    form: ExportForm,
    bindings: Vec<ExportedBinding>,
}

/// A parsed source file and its table of exported bindings.
///
/// A pure function of the file contents, so two tasks racing to build the
/// same entry produce equal values.
#[derive(Debug, Clone)]
pub struct ParsedSource {
    pub path: PathBuf,
    text: String,
    statements: Vec<ExportStatement>,
}

impl ParsedSource {
    /// Read and parse a source file from disk.
    pub fn load(path: &Path) -> Result<Self, IsolationError> {
        let text = fs::read_to_string(path)
            .map_err(|source| IsolationError::Unreadable { path: path.to_path_buf(), source })?;
        Self::parse(path, text)
    }

    /// Parse `text` using the grammar implied by `path`'s extension.
    pub fn parse(path: &Path, text: String) -> Result<Self, IsolationError> {
        let language = SourceLanguage::from_path(path)
            .ok_or_else(|| IsolationError::UnsupportedSource(path.to_path_buf()))?;
        let parse_err =
            |message: String| IsolationError::Parse { path: path.to_path_buf(), message };

        let mut parser = Parser::new();
        parser.set_language(&language.tree_sitter_language()).map_err(|e| parse_err(e.to_string()))?;
        let tree = parser
            .parse(&text, None)
            .ok_or_else(|| parse_err("parser produced no syntax tree".to_string()))?;

        let root = tree.root_node();
        if root.has_error() {
            warn!(path = %path.display(), "source has syntax errors, export table may be incomplete");
        }

        let src = text.as_bytes();
        let mut statements = Vec::new();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            if child.kind() != "export_statement" {
                continue;
            }
            if let Some(statement) = export_statement(child, src) {
                statements.push(statement);
            }
        }

        Ok(Self { path: path.to_path_buf(), text, statements })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Names of all top-level exported value bindings, in source order.
    pub fn export_names(&self) -> Vec<&str> {
        self.bindings().map(|b| b.name.as_str()).collect()
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.bindings().any(|b| b.name == name)
    }

    fn bindings(&self) -> impl Iterator<Item = &ExportedBinding> {
        self.statements.iter().flat_map(|s| s.bindings.iter())
    }

    /// Source text with every exported binding except `target` removed.
    ///
    /// Returns `None` when `target` is not exported from this file.
    pub fn retain_only(&self, target: &str) -> Option<String> {
        if !self.has_export(target) {
            return None;
        }

        let mut edits: Vec<(Range<usize>, String)> = Vec::new();
        for statement in &self.statements {
            let kept: Vec<&ExportedBinding> =
                statement.bindings.iter().filter(|b| b.name == target).collect();
            if kept.len() == statement.bindings.len() {
                continue;
            }

            if kept.is_empty() {
                edits.push((self.with_trailing_newline(&statement.span), String::new()));
                continue;
            }

            let parts: Vec<&str> = kept.iter().map(|b| &self.text[b.span.clone()]).collect();
            let replacement = match &statement.form {
                ExportForm::Declarators { keyword } => {
                    format!("export {keyword} {};", parts.join(", "))
                }
                ExportForm::Clause { tail } => format!("export {{ {} }}{tail}", parts.join(", ")),
                // Whole statements hold exactly one binding, handled above.
                ExportForm::Whole => continue,
            };
            edits.push((statement.span.clone(), replacement));
        }

        let mut out = self.text.clone();
        edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
        for (range, replacement) in edits {
            out.replace_range(range, &replacement);
        }
        Some(out)
    }

    fn with_trailing_newline(&self, span: &Range<usize>) -> Range<usize> {
        let rest = &self.text[span.end..];
        if rest.starts_with("\r\n") {
            span.start..span.end + 2
        } else if rest.starts_with('\n') {
            span.start..span.end + 1
        } else {
            span.clone()
        }
    }
}

fn node_text<'a>(node: Node<'_>, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

fn has_token(node: Node<'_>, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| !c.is_named() && c.kind() == token);
    found
}

fn export_statement(node: Node<'_>, src: &[u8]) -> Option<ExportStatement> {
    let span = node.start_byte()..node.end_byte();

    if has_token(node, "default") {
        return Some(ExportStatement {
            span: span.clone(),
            form: ExportForm::Whole,
            bindings: vec![ExportedBinding { name: DEFAULT_EXPORT.to_string(), span }],
        });
    }

    if let Some(declaration) = node.child_by_field_name("declaration") {
        return declaration_statement(span, declaration, src);
    }

    // `export type { ... }` only re-exports types.
    if has_token(node, "type") {
        return None;
    }

    let mut cursor = node.walk();
    let clause = node.named_children(&mut cursor).find(|c| c.kind() == "export_clause")?;
    clause_statement(node, clause, src)
}

fn declaration_statement(
    span: Range<usize>,
    declaration: Node<'_>,
    src: &[u8],
) -> Option<ExportStatement> {
    match declaration.kind() {
        "function_declaration"
        | "generator_function_declaration"
        | "class_declaration"
        | "abstract_class_declaration" => {
            let name = node_text(declaration.child_by_field_name("name")?, src).to_string();
            Some(ExportStatement {
                span: span.clone(),
                form: ExportForm::Whole,
                bindings: vec![ExportedBinding { name, span }],
            })
        }
        "lexical_declaration" | "variable_declaration" => {
            let keyword = node_text(declaration.child(0)?, src).to_string();
            let mut bindings = Vec::new();
            let mut cursor = declaration.walk();
            for declarator in declaration.named_children(&mut cursor) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                let name = declarator.child_by_field_name("name")?;
                // Destructuring exports are left untouched.
                if name.kind() != "identifier" {
                    return None;
                }
                bindings.push(ExportedBinding {
                    name: node_text(name, src).to_string(),
                    span: declarator.start_byte()..declarator.end_byte(),
                });
            }
            if bindings.is_empty() {
                return None;
            }
            let form = if bindings.len() == 1 {
                ExportForm::Whole
            } else {
                ExportForm::Declarators { keyword }
            };
            Some(ExportStatement { span, form, bindings })
        }
        // Types, interfaces, enums, namespaces and ambient declarations are not
        // deployable values.
        _ => None,
    }
}

fn clause_statement(statement: Node<'_>, clause: Node<'_>, src: &[u8]) -> Option<ExportStatement> {
    let mut bindings = Vec::new();
    let mut cursor = clause.walk();
    for specifier in clause.named_children(&mut cursor) {
        if specifier.kind() != "export_specifier" || has_token(specifier, "type") {
            continue;
        }
        let exported = specifier
            .child_by_field_name("alias")
            .or_else(|| specifier.child_by_field_name("name"))?;
        bindings.push(ExportedBinding {
            name: node_text(exported, src).to_string(),
            span: specifier.start_byte()..specifier.end_byte(),
        });
    }
    if bindings.is_empty() {
        return None;
    }

    let text = std::str::from_utf8(src).ok()?;
    let tail = text[clause.end_byte()..statement.end_byte()].to_string();
    Some(ExportStatement {
        span: statement.start_byte()..statement.end_byte(),
        form: ExportForm::Clause { tail },
        bindings,
    })
}

/// A single-export copy of a shared source file, written next to the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolatedModule {
    pub function: String,
    pub path: PathBuf,
    /// `false` when the target binding was not exported and the file was copied as is.
    pub binding_found: bool,
}

impl IsolatedModule {
    /// Delete the isolated file. Failures are logged, never fatal.
    pub fn cleanup(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(
                function = %self.function,
                path = %self.path.display(),
                error = %err,
                "failed to remove isolated source"
            );
        }
    }
}

/// Isolates functions from shared source files, caching each parsed file by path.
#[derive(Debug)]
pub struct Isolator {
    separator: String,
    cache: DashMap<PathBuf, Arc<ParsedSource>>,
}

impl Default for Isolator {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_SEPARATOR)
    }
}

impl Isolator {
    pub fn new(separator: impl Into<String>) -> Self {
        Self { separator: separator.into(), cache: DashMap::new() }
    }

    /// Export name addressed by a (possibly hierarchical) function name.
    ///
    /// `users-auth-onCreate` with separator `-` addresses the export `onCreate`.
    pub fn binding_name<'a>(&self, function: &'a str) -> &'a str {
        if self.separator.is_empty() {
            return function;
        }
        function.rsplit(self.separator.as_str()).next().unwrap_or(function)
    }

    /// Parsed view of `path`, reused across every function sharing the file.
    ///
    /// Concurrent misses on the same path each parse the file and the last
    /// insert wins; both values are equal.
    pub fn source(&self, path: &Path) -> Result<Arc<ParsedSource>, IsolationError> {
        if let Some(hit) = self.cache.get(path) {
            return Ok(Arc::clone(hit.value()));
        }
        let parsed = Arc::new(ParsedSource::load(path)?);
        debug!(
            path = %path.display(),
            exports = ?parsed.export_names(),
            "parsed shared source"
        );
        self.cache.insert(path.to_path_buf(), Arc::clone(&parsed));
        Ok(parsed)
    }

    /// Number of distinct source files parsed so far.
    pub fn cached_sources(&self) -> usize {
        self.cache.len()
    }

    /// Write a copy of `source_path` holding only the export addressed by `function`.
    ///
    /// If that export is missing the file is copied unmodified and the bundler
    /// decides whether the entry still resolves.
    pub fn isolate(
        &self,
        source_path: &Path,
        function: &str,
    ) -> Result<IsolatedModule, IsolationError> {
        let source = self.source(source_path)?;
        let binding = self.binding_name(function);

        let (contents, binding_found) = match source.retain_only(binding) {
            Some(contents) => (contents, true),
            None => {
                warn!(
                    function,
                    binding,
                    path = %source_path.display(),
                    "export not found, bundling the source file unmodified"
                );
                (source.text().to_string(), false)
            }
        };

        let path = isolated_path(source_path, function);
        fs::write(&path, contents)
            .map_err(|source| IsolationError::Write { path: path.clone(), source })?;

        Ok(IsolatedModule { function: function.to_string(), path, binding_found })
    }
}

/// Sibling path for an isolated copy: `<stem>[-]<function>[-].<ext>`.
pub fn isolated_path(source_path: &Path, function: &str) -> PathBuf {
    let stem = source_path.file_stem().and_then(|s| s.to_str()).unwrap_or("source");
    let function = function.replace(['/', '\\'], "_");
    let file_name = match source_path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}[-]{function}[-].{ext}"),
        None => format!("{stem}[-]{function}[-]"),
    };
    source_path.with_file_name(file_name)
}
