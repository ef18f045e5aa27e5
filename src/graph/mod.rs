//! Module graph: typed source files, inferred layers and import edges
//!
//! The graph is built once per run by [`ModelBuilder`] and is read-only
//! afterwards, so rule evaluation can share it across worker threads.
//!
//! Import cycles are found with Tarjan's SCC algorithm via petgraph and
//! computed lazily on first use.

mod builder;
mod files;

pub use builder::{BuildReport, ModelBuilder};
pub use files::{FileSource, FsFileSource};

use crate::models::Layer;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Content of a source file after the parse attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SourceContent {
    /// Parsed successfully, raw text retained for predicates
    Parsed(String),
    /// Parse failed; the file stays in the graph but is not evaluated
    Unparseable { reason: String },
}

/// A file in the module graph
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the scanned root
    pub path: PathBuf,
    pub content: SourceContent,
    pub layer: Layer,
    pub size_bytes: u64,
    pub line_count: u32,
    /// Imports that did not resolve to a file inside the graph
    pub external_imports: usize,
}

impl SourceFile {
    pub fn parsed(path: impl Into<PathBuf>, raw: impl Into<String>, layer: Layer) -> Self {
        let raw = raw.into();
        Self {
            path: path.into(),
            size_bytes: raw.len() as u64,
            line_count: raw.lines().count() as u32,
            content: SourceContent::Parsed(raw),
            layer,
            external_imports: 0,
        }
    }

    pub fn unparseable(path: impl Into<PathBuf>, reason: impl Into<String>, layer: Layer) -> Self {
        Self {
            path: path.into(),
            content: SourceContent::Unparseable {
                reason: reason.into(),
            },
            layer,
            size_bytes: 0,
            line_count: 0,
            external_imports: 0,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self.content, SourceContent::Parsed(_))
    }

    pub fn raw(&self) -> Option<&str> {
        match &self.content {
            SourceContent::Parsed(raw) => Some(raw),
            SourceContent::Unparseable { .. } => None,
        }
    }
}

/// Directed import edge `from -> to`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportEdge {
    pub from: PathBuf,
    pub to: PathBuf,
    /// Line of the import statement in `from`
    pub line: Option<u32>,
}

/// Graph of all source files and their import edges
#[derive(Debug, Default)]
pub struct ModuleGraph {
    graph: DiGraph<SourceFile, ImportEdge>,
    index: BTreeMap<PathBuf, NodeIndex>,
    cycles: OnceLock<Vec<Vec<PathBuf>>>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, replacing nothing: a path already present is ignored
    pub fn add_file(&mut self, file: SourceFile) -> NodeIndex {
        if let Some(&idx) = self.index.get(&file.path) {
            return idx;
        }
        let path = file.path.clone();
        let idx = self.graph.add_node(file);
        self.index.insert(path, idx);
        self.cycles = OnceLock::new();
        idx
    }

    /// Add an import edge. Returns false when either endpoint is unknown or
    /// the edge already exists.
    pub fn add_import(&mut self, from: &Path, to: &Path, line: Option<u32>) -> bool {
        let (Some(&a), Some(&b)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        if self.graph.find_edge(a, b).is_some() {
            return false;
        }
        self.graph.add_edge(
            a,
            b,
            ImportEdge {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                line,
            },
        );
        self.cycles = OnceLock::new();
        true
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains_key(path)
    }

    pub fn file(&self, path: &Path) -> Option<&SourceFile> {
        self.index.get(path).map(|&idx| &self.graph[idx])
    }

    /// All files in path order
    pub fn files(&self) -> impl Iterator<Item = &SourceFile> + '_ {
        self.index.values().map(move |&idx| &self.graph[idx])
    }

    pub fn unparseable(&self) -> impl Iterator<Item = &SourceFile> + '_ {
        self.files().filter(|f| !f.is_parsed())
    }

    /// Outgoing imports of a file, ordered by target path
    pub fn imports_of(&self, path: &Path) -> Vec<&ImportEdge> {
        self.edges_in_direction(path, Direction::Outgoing)
    }

    /// Files importing `path`, ordered by importer path
    pub fn importers_of(&self, path: &Path) -> Vec<&ImportEdge> {
        self.edges_in_direction(path, Direction::Incoming)
    }

    fn edges_in_direction(&self, path: &Path, dir: Direction) -> Vec<&ImportEdge> {
        let Some(&idx) = self.index.get(path) else {
            return Vec::new();
        };
        let mut edges: Vec<&ImportEdge> = self
            .graph
            .edges_directed(idx, dir)
            .map(|e| e.weight())
            .collect();
        edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
        edges
    }

    /// All edges in `(from, to)` order
    pub fn edges(&self) -> Vec<&ImportEdge> {
        let mut edges: Vec<&ImportEdge> = self.graph.edge_weights().collect();
        edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
        edges
    }

    /// Import cycles (strongly connected components with more than one file,
    /// or a file importing itself). Each cycle is rotated to start at its
    /// smallest path; the list is sorted.
    pub fn cycles(&self) -> &[Vec<PathBuf>] {
        self.cycles.get_or_init(|| {
            let mut cycles: Vec<Vec<PathBuf>> = tarjan_scc(&self.graph)
                .into_iter()
                .filter(|scc| {
                    scc.len() > 1
                        || scc
                            .first()
                            .map(|&n| self.graph.find_edge(n, n).is_some())
                            .unwrap_or(false)
                })
                .map(|scc| {
                    let mut paths: Vec<PathBuf> =
                        scc.iter().map(|&n| self.graph[n].path.clone()).collect();
                    paths.sort();
                    paths
                })
                .collect();
            cycles.sort();
            cycles
        })
    }

    /// Map of file path to the index of the cycle it belongs to
    pub fn cycle_membership(&self) -> HashMap<&Path, usize> {
        let mut membership = HashMap::new();
        for (i, cycle) in self.cycles().iter().enumerate() {
            for path in cycle {
                membership.insert(path.as_path(), i);
            }
        }
        membership
    }

    /// Number of files per layer
    pub fn layer_counts(&self) -> BTreeMap<Layer, usize> {
        let mut counts = BTreeMap::new();
        for file in self.files() {
            *counts.entry(file.layer).or_insert(0) += 1;
        }
        counts
    }
}
