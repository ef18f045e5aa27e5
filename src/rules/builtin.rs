//! Built-in predicate and fix-shape catalog
//!
//! Rule packs refer to these by id. Predicates are parameterised through the
//! pack's `params` table (merged with config overrides) and validated when the
//! pack is loaded, so a bad parameter fails registry construction instead of
//! every evaluation.

use super::{Params, Predicate, PredicateHit, RegistryError};
use crate::graph::{ModuleGraph, SourceFile};
use crate::models::Layer;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Ids of every built-in predicate
pub const PREDICATE_IDS: &[&str] = &[
    "layer-dependency",
    "import-cycle",
    "fan-out",
    "oversized-file",
    "missing-test",
];

/// How violations of a rule turn into change units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixShape {
    /// Create an abstraction in the consumer's layer, then point the consumer at it
    ExtractAbstraction,
    /// Rename the offending file into the target layer, then update its importers
    MoveToLayer,
    /// Edit the offending file where it is
    ModifyInPlace,
    /// Create a sibling file, then move code out of the original
    SplitFile,
    /// Create a test file for the offending file
    AddTest,
    /// Report only
    None,
}

impl FixShape {
    pub const ALL: [FixShape; 6] = [
        FixShape::ExtractAbstraction,
        FixShape::MoveToLayer,
        FixShape::ModifyInPlace,
        FixShape::SplitFile,
        FixShape::AddTest,
        FixShape::None,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            FixShape::ExtractAbstraction => "extract-abstraction",
            FixShape::MoveToLayer => "move-to-layer",
            FixShape::ModifyInPlace => "modify-in-place",
            FixShape::SplitFile => "split-file",
            FixShape::AddTest => "add-test",
            FixShape::None => "none",
        }
    }

    pub fn parse(id: &str) -> Option<FixShape> {
        let id = id.trim().to_lowercase().replace('_', "-");
        FixShape::ALL.into_iter().find(|s| s.id() == id)
    }
}

impl fmt::Display for FixShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Instantiate a catalog predicate for `rule_id`
pub fn build_predicate(
    rule_id: &str,
    predicate: &str,
    params: &Params,
) -> Result<Arc<dyn Predicate>, RegistryError> {
    match predicate {
        "layer-dependency" => Ok(Arc::new(LayerDependency {
            from: param_layer(rule_id, params, "from")?,
            to: param_layer(rule_id, params, "to")?,
        })),
        "import-cycle" => Ok(Arc::new(ImportCycle)),
        "fan-out" => Ok(Arc::new(FanOut {
            max_imports: param_usize(rule_id, params, "max_imports", 15)?,
        })),
        "oversized-file" => Ok(Arc::new(OversizedFile {
            max_lines: param_usize(rule_id, params, "max_lines", 500)?,
        })),
        "missing-test" => {
            let layers = match params.get("layers") {
                None => vec![Layer::Core],
                Some(value) => {
                    let names = value
                        .as_list()
                        .ok_or_else(|| invalid(rule_id, "layers", "expected a list of layers"))?;
                    names
                        .iter()
                        .map(|n| {
                            Layer::parse(n).ok_or_else(|| {
                                invalid(rule_id, "layers", &format!("unknown layer '{}'", n))
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(Arc::new(MissingTest { layers }))
        }
        other => Err(RegistryError::UnknownPredicate {
            rule: rule_id.to_string(),
            predicate: other.to_string(),
        }),
    }
}

fn invalid(rule_id: &str, param: &str, reason: &str) -> RegistryError {
    RegistryError::InvalidParam {
        rule: rule_id.to_string(),
        param: param.to_string(),
        reason: reason.to_string(),
    }
}

fn param_layer(rule_id: &str, params: &Params, key: &str) -> Result<Layer, RegistryError> {
    let value = params
        .get(key)
        .ok_or_else(|| invalid(rule_id, key, "required"))?;
    value
        .as_str()
        .and_then(Layer::parse)
        .ok_or_else(|| invalid(rule_id, key, "expected a layer name"))
}

fn param_usize(
    rule_id: &str,
    params: &Params,
    key: &str,
    default: usize,
) -> Result<usize, RegistryError> {
    match params.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_i64()
            .filter(|v| *v >= 0)
            .map(|v| v as usize)
            .ok_or_else(|| invalid(rule_id, key, "expected a non-negative integer")),
    }
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// A file in layer `from` imports a file in layer `to`
struct LayerDependency {
    from: Layer,
    to: Layer,
}

impl Predicate for LayerDependency {
    fn id(&self) -> &'static str {
        "layer-dependency"
    }

    fn evaluate(&self, graph: &ModuleGraph, file: &SourceFile) -> Result<Vec<PredicateHit>> {
        if file.layer != self.from {
            return Ok(Vec::new());
        }
        let mut hits = Vec::new();
        for edge in graph.imports_of(&file.path) {
            let Some(target) = graph.file(&edge.to) else {
                continue;
            };
            if target.layer == self.to {
                hits.push(
                    PredicateHit::new(format!(
                        "{} module imports {} module {}",
                        self.from,
                        self.to,
                        edge.to.display()
                    ))
                    .at_line(edge.line)
                    .related(&edge.to)
                    .target_layer(self.from),
                );
            }
        }
        Ok(hits)
    }
}

/// The file participates in an import cycle
struct ImportCycle;

impl Predicate for ImportCycle {
    fn id(&self) -> &'static str {
        "import-cycle"
    }

    fn evaluate(&self, graph: &ModuleGraph, file: &SourceFile) -> Result<Vec<PredicateHit>> {
        let Some(cycle) = graph.cycles().iter().find(|c| c.contains(&file.path)) else {
            return Ok(Vec::new());
        };
        let members: Vec<String> = cycle.iter().map(|p| p.display().to_string()).collect();
        let mut hit = PredicateHit::new(format!(
            "part of an import cycle of {} files: {}",
            cycle.len(),
            members.join(" <-> ")
        ));
        // Point at the import that keeps this file inside the cycle
        if let Some(edge) = graph
            .imports_of(&file.path)
            .into_iter()
            .find(|e| cycle.contains(&e.to))
        {
            hit = hit.at_line(edge.line).related(&edge.to);
        }
        Ok(vec![hit])
    }
}

/// The file imports more than `max_imports` repository files
struct FanOut {
    max_imports: usize,
}

impl Predicate for FanOut {
    fn id(&self) -> &'static str {
        "fan-out"
    }

    fn evaluate(&self, graph: &ModuleGraph, file: &SourceFile) -> Result<Vec<PredicateHit>> {
        let count = graph.imports_of(&file.path).len();
        if count <= self.max_imports {
            return Ok(Vec::new());
        }
        Ok(vec![PredicateHit::new(format!(
            "imports {} repository files (limit {})",
            count, self.max_imports
        ))])
    }
}

/// The file has more than `max_lines` lines
struct OversizedFile {
    max_lines: usize,
}

impl Predicate for OversizedFile {
    fn id(&self) -> &'static str {
        "oversized-file"
    }

    fn evaluate(&self, _graph: &ModuleGraph, file: &SourceFile) -> Result<Vec<PredicateHit>> {
        let lines = file.line_count as usize;
        if lines <= self.max_lines {
            return Ok(Vec::new());
        }
        Ok(vec![PredicateHit::new(format!(
            "{} lines (limit {})",
            lines, self.max_lines
        ))])
    }
}

/// A file in one of `layers` has no test counterpart in the graph
struct MissingTest {
    layers: Vec<Layer>,
}

/// Stems that only re-export or bootstrap
const EXEMPT_STEMS: &[&str] = &["__init__", "__main__", "mod", "lib", "main", "index", "conftest"];

impl Predicate for MissingTest {
    fn id(&self) -> &'static str {
        "missing-test"
    }

    fn evaluate(&self, graph: &ModuleGraph, file: &SourceFile) -> Result<Vec<PredicateHit>> {
        if !self.layers.contains(&file.layer) || is_test_path(&file.path) {
            return Ok(Vec::new());
        }
        let stem = file_stem(&file.path);
        if EXEMPT_STEMS.contains(&stem.as_str()) {
            return Ok(Vec::new());
        }
        // Rust keeps unit tests inline
        if file.raw().map(|raw| raw.contains("#[cfg(test)]")).unwrap_or(false) {
            return Ok(Vec::new());
        }

        let candidates = [
            format!("test_{}", stem),
            format!("{}_test", stem),
            format!("{}_tests", stem),
            format!("{}.test", stem),
            format!("{}.spec", stem),
            format!("{}_spec", stem),
        ];
        let has_test = graph
            .files()
            .any(|f| is_test_path(&f.path) && candidates.contains(&file_stem(&f.path)));
        if has_test {
            return Ok(Vec::new());
        }
        Ok(vec![PredicateHit::new(format!(
            "{} module has no test counterpart",
            file.layer
        ))])
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Heuristic test-file check (test directories and common name patterns)
pub fn is_test_path(path: &Path) -> bool {
    let in_test_dir = path.parent().into_iter().flat_map(|p| p.components()).any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("tests") | Some("test") | Some("__tests__") | Some("spec")
        )
    });
    if in_test_dir {
        return true;
    }
    let stem = file_stem(path);
    stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with("_tests")
        || stem.ends_with(".test")
        || stem.ends_with(".spec")
        || stem.ends_with("_spec")
        || stem == "conftest"
}
