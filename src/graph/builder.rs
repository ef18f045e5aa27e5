//! Source model builder
//!
//! Enumerates files, parses their imports in parallel and assembles the
//! [`ModuleGraph`]. A file that cannot be read or parsed is kept as an
//! `Unparseable` node; one bad file never aborts the build.

use super::{FileSource, ModuleGraph, SourceFile};
use crate::classifier::LayerClassifier;
use crate::parsers::{ImportParser, KnownFiles, ParsedImports};
use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What happened while building the model
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub files_seen: usize,
    pub parsed: usize,
    /// `(path, reason)` for every file kept as unparseable
    pub unparseable: Vec<(PathBuf, String)>,
    pub edges: usize,
    pub external_imports: usize,
    pub duration_ms: u64,
}

/// Builds a [`ModuleGraph`] from injected collaborators
pub struct ModelBuilder<'a> {
    source: &'a dyn FileSource,
    parser: &'a dyn ImportParser,
    classifier: &'a dyn LayerClassifier,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(
        source: &'a dyn FileSource,
        parser: &'a dyn ImportParser,
        classifier: &'a dyn LayerClassifier,
    ) -> Self {
        Self {
            source,
            parser,
            classifier,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn include(mut self, globs: impl IntoIterator<Item = String>) -> Self {
        self.include.extend(globs);
        self
    }

    pub fn exclude(mut self, globs: impl IntoIterator<Item = String>) -> Self {
        self.exclude.extend(globs);
        self
    }

    /// Build the graph for `root`
    ///
    /// Only enumeration failure is an error; read and parse failures are
    /// recorded in the report.
    pub fn build(&self, root: &Path) -> Result<(ModuleGraph, BuildReport)> {
        let start = Instant::now();
        let paths = self.source.list(root, &self.include, &self.exclude)?;
        info!("Building module graph from {} files", paths.len());

        let known = KnownFiles::new(paths.iter().cloned());

        let nodes: Vec<(SourceFile, Option<ParsedImports>)> = paths
            .par_iter()
            .map(|path| self.load_file(root, path, &known))
            .collect();

        let mut graph = ModuleGraph::new();
        let mut report = BuildReport {
            files_seen: paths.len(),
            ..Default::default()
        };

        let mut pending_edges = Vec::new();
        for (mut file, imports) in nodes {
            match imports {
                Some(imports) => {
                    report.parsed += 1;
                    file.external_imports = imports.external;
                    report.external_imports += imports.external;
                    for import in imports.imports {
                        pending_edges.push((file.path.clone(), import.target, import.line));
                    }
                }
                None => {
                    if let super::SourceContent::Unparseable { reason } = &file.content {
                        report.unparseable.push((file.path.clone(), reason.clone()));
                    }
                }
            }
            graph.add_file(file);
        }

        for (from, to, line) in pending_edges {
            if graph.add_import(&from, &to, Some(line)) {
                report.edges += 1;
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Module graph: {} files ({} unparseable), {} import edges in {}ms",
            graph.len(),
            report.unparseable.len(),
            report.edges,
            report.duration_ms
        );
        Ok((graph, report))
    }

    fn load_file(
        &self,
        root: &Path,
        path: &Path,
        known: &KnownFiles,
    ) -> (SourceFile, Option<ParsedImports>) {
        let layer = self.classifier.classify(path);

        let content = match self.source.read(root, path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return (
                    SourceFile::unparseable(path, format!("read failed: {}", e), layer),
                    None,
                );
            }
        };

        match self.parser.parse(path, &content, known) {
            Ok(imports) => {
                debug!(
                    "Parsed {} ({} imports, {} external)",
                    path.display(),
                    imports.imports.len(),
                    imports.external
                );
                (SourceFile::parsed(path, content, layer), Some(imports))
            }
            Err(e) => {
                warn!("Keeping {} as unparseable: {}", path.display(), e);
                let mut file = SourceFile::unparseable(path, e.to_string(), layer);
                file.size_bytes = content.len() as u64;
                file.line_count = content.lines().count() as u32;
                (file, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Layer;
    use crate::parsers::{ImportRef, ParseError};
    use std::collections::BTreeMap;

    struct MemorySource(BTreeMap<PathBuf, Option<String>>);

    impl FileSource for MemorySource {
        fn list(&self, _: &Path, _: &[String], _: &[String]) -> Result<Vec<PathBuf>> {
            Ok(self.0.keys().cloned().collect())
        }

        fn read(&self, _: &Path, path: &Path) -> std::io::Result<String> {
            match self.0.get(path) {
                Some(Some(s)) => Ok(s.clone()),
                _ => Err(std::io::Error::new(std::io::ErrorKind::Other, "boom")),
            }
        }
    }

    /// Each line `import <path>` is an edge; a line `!` is a syntax error
    struct LineParser;

    impl ImportParser for LineParser {
        fn parse(
            &self,
            _path: &Path,
            content: &str,
            known: &KnownFiles,
        ) -> Result<ParsedImports, ParseError> {
            let mut out = ParsedImports::default();
            for (i, line) in content.lines().enumerate() {
                if line == "!" {
                    return Err(ParseError::Syntax { line: i as u32 + 1 });
                }
                if let Some(target) = line.strip_prefix("import ") {
                    let target = PathBuf::from(target);
                    if known.contains(&target) {
                        out.imports.push(ImportRef {
                            target,
                            line: i as u32 + 1,
                        });
                    } else {
                        out.external += 1;
                    }
                }
            }
            Ok(out)
        }
    }

    struct PrefixClassifier;

    impl LayerClassifier for PrefixClassifier {
        fn classify(&self, path: &Path) -> Layer {
            if path.starts_with("core") {
                Layer::Core
            } else if path.starts_with("infra") {
                Layer::Infrastructure
            } else {
                Layer::Unknown
            }
        }
    }

    #[test]
    fn test_build_is_fail_soft() {
        let mut files = BTreeMap::new();
        files.insert(
            PathBuf::from("core/a.py"),
            Some("import infra/db.py\nimport requests\n".to_string()),
        );
        files.insert(PathBuf::from("infra/db.py"), Some("x\n".to_string()));
        files.insert(PathBuf::from("broken.py"), Some("ok\n!\n".to_string()));
        files.insert(PathBuf::from("unreadable.py"), None);
        let source = MemorySource(files);

        let (graph, report) = ModelBuilder::new(&source, &LineParser, &PrefixClassifier)
            .build(Path::new("/repo"))
            .unwrap();

        assert_eq!(graph.len(), 4);
        assert_eq!(report.parsed, 2);
        assert_eq!(report.unparseable.len(), 2);
        assert_eq!(report.edges, 1);
        assert_eq!(report.external_imports, 1);

        let core = graph.file(Path::new("core/a.py")).unwrap();
        assert_eq!(core.layer, Layer::Core);
        assert_eq!(core.external_imports, 1);
        assert!(!graph.file(Path::new("broken.py")).unwrap().is_parsed());
        assert_eq!(graph.unparseable().count(), 2);
    }
}
