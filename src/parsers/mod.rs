//! Import parsers using tree-sitter
//!
//! A parser turns file content into the list of repository files it imports.
//! Raw import specifiers are extracted per language and then resolved against
//! the set of files known to the model builder. Specifiers that resolve to
//! nothing (standard library, third-party packages) are only counted.

mod python;
mod resolve;
mod rust;
mod typescript;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tree_sitter::{Node, Parser, Tree};

/// Why a file could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("syntax error at line {line}")]
    Syntax { line: u32 },

    #[error("no import parser for extension '{extension}'")]
    UnsupportedLanguage { extension: String },

    #[error("grammar error: {0}")]
    Grammar(String),
}

/// A resolved import of a repository file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportRef {
    pub target: PathBuf,
    pub line: u32,
}

/// Parser output for one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedImports {
    pub imports: Vec<ImportRef>,
    /// Imports that did not resolve to a known file
    pub external: usize,
}

/// Set of repository-relative paths known to the builder
#[derive(Debug, Clone, Default)]
pub struct KnownFiles {
    files: HashSet<PathBuf>,
}

impl KnownFiles {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            files: paths.into_iter().collect(),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Parses a file's content into resolved imports
pub trait ImportParser: Send + Sync {
    fn parse(
        &self,
        path: &Path,
        content: &str,
        known: &KnownFiles,
    ) -> Result<ParsedImports, ParseError>;
}

/// Source language, chosen from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    TypeScript,
    Tsx,
    Rust,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Language> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "py" | "pyi" => Some(Language::Python),
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            // The TSX grammar is a superset that accepts plain JavaScript and JSX
            "tsx" | "js" | "jsx" | "mjs" | "cjs" => Some(Language::Tsx),
            "rs" => Some(Language::Rust),
            _ => None,
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }
}

/// All file extensions the default parser understands
pub fn supported_extensions() -> &'static [&'static str] {
    &[
        "py", "pyi", "ts", "mts", "cts", "tsx", "js", "jsx", "mjs", "cjs", "rs",
    ]
}

/// Default include globs derived from [`supported_extensions`]
pub fn default_include_globs() -> Vec<String> {
    supported_extensions()
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}

/// An import specifier as written in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawImport {
    /// Module specifier, e.g. `app.models`, `./db`, `crate::domain::order`
    pub specifier: String,
    /// Names imported from the module (`from x import a, b`), tried as submodules
    pub names: Vec<String>,
    pub line: u32,
}

/// Tree-sitter based parser for Python, TypeScript/JavaScript and Rust
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeSitterParser;

impl TreeSitterParser {
    pub fn new() -> Self {
        Self
    }
}

impl ImportParser for TreeSitterParser {
    fn parse(
        &self,
        path: &Path,
        content: &str,
        known: &KnownFiles,
    ) -> Result<ParsedImports, ParseError> {
        let language = Language::from_path(path).ok_or_else(|| ParseError::UnsupportedLanguage {
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })?;

        let tree = parse_tree(language, content)?;
        let source = content.as_bytes();
        let raw = match language {
            Language::Python => python::extract_imports(&tree.root_node(), source),
            Language::TypeScript | Language::Tsx => {
                typescript::extract_imports(&tree.root_node(), source, &language.grammar())?
            }
            Language::Rust => rust::extract_imports(&tree.root_node(), source, &language.grammar())?,
        };

        let mut out = ParsedImports::default();
        for import in raw {
            let targets = resolve::resolve(language, path, &import, known);
            if targets.is_empty() {
                out.external += 1;
                continue;
            }
            for target in targets {
                if target != path && !out.imports.iter().any(|i| i.target == target) {
                    out.imports.push(ImportRef {
                        target,
                        line: import.line,
                    });
                }
            }
        }
        Ok(out)
    }
}

fn parse_tree(language: Language, content: &str) -> Result<Tree, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&language.grammar())
        .map_err(|e| ParseError::Grammar(e.to_string()))?;
    let tree = parser
        .parse(content, None)
        .ok_or_else(|| ParseError::Grammar("parser produced no tree".to_string()))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(ParseError::Syntax {
            line: first_error_line(&root),
        });
    }
    Ok(tree)
}

/// 1-based line of the first ERROR or MISSING node in document order
fn first_error_line(root: &Node) -> u32 {
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return node.start_position().row as u32 + 1;
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    root.start_position().row as u32 + 1
}

/// Line number (1-based) of a node
pub(crate) fn node_line(node: &Node) -> u32 {
    node.start_position().row as u32 + 1
}
