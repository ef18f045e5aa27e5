//! Rules: flat `{id, category, severity, predicate, fix shape}` records
//!
//! Rules are data. A [`RulePack`] names a predicate and a fix shape from the
//! built-in catalog for each rule; the [`RuleRegistry`] indexes the resulting
//! [`Rule`]s by id and category. There is no rule class hierarchy: every rule
//! is the same struct with a different predicate behind an `Arc`.

pub mod builtin;
mod pack;
mod registry;

pub use builtin::FixShape;
pub use pack::{RulePack, RuleSpec, DEFAULT_PACK};
pub use registry::{RegistryError, RuleRegistry};

use crate::config::ParamValue;
use crate::graph::{ModuleGraph, SourceFile};
use crate::models::{Category, Layer, LineRange, Location, Severity, Violation};
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Predicate parameters from the rule pack and config overrides
pub type Params = BTreeMap<String, ParamValue>;

/// One match reported by a predicate, before it is stamped with the rule's
/// identity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredicateHit {
    pub line_range: Option<LineRange>,
    pub message: String,
    /// Second file involved (e.g. the imported file)
    pub related_path: Option<PathBuf>,
    /// Layer a fix should place code into
    pub target_layer: Option<Layer>,
}

impl PredicateHit {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn at_line(mut self, line: Option<u32>) -> Self {
        self.line_range = line.map(LineRange::line);
        self
    }

    pub fn related(mut self, path: impl Into<PathBuf>) -> Self {
        self.related_path = Some(path.into());
        self
    }

    pub fn target_layer(mut self, layer: Layer) -> Self {
        self.target_layer = Some(layer);
        self
    }
}

/// Pure function over the read-only graph
///
/// Implementations must not mutate anything; the engine calls them from
/// several threads at once.
pub trait Predicate: Send + Sync {
    /// Catalog id, e.g. `layer-dependency`
    fn id(&self) -> &'static str;

    fn evaluate(&self, graph: &ModuleGraph, file: &SourceFile) -> Result<Vec<PredicateHit>>;
}

/// A registered rule
#[derive(Clone)]
pub struct Rule {
    pub id: String,
    pub category: Category,
    pub default_severity: Severity,
    pub description: String,
    pub fix_shape: FixShape,
    pub params: Params,
    predicate: Arc<dyn Predicate>,
}

impl Rule {
    pub fn new(
        id: impl Into<String>,
        category: Category,
        default_severity: Severity,
        predicate: Arc<dyn Predicate>,
        fix_shape: FixShape,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            default_severity,
            description: String::new(),
            fix_shape,
            params: Params::new(),
            predicate,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn predicate_id(&self) -> &'static str {
        self.predicate.id()
    }

    /// Evaluate against one file, stamping hits with this rule's identity
    pub fn evaluate(&self, graph: &ModuleGraph, file: &SourceFile) -> Result<Vec<Violation>> {
        let hits = self.predicate.evaluate(graph, file)?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                let location = match hit.line_range {
                    Some(range) => Location::at(&file.path, range),
                    None => Location::file(&file.path),
                };
                let mut v = Violation::new(
                    &self.id,
                    self.category.clone(),
                    self.default_severity,
                    location,
                    hit.message,
                );
                if self.fix_shape != FixShape::None {
                    v = v.with_fix_kind(self.fix_shape.id());
                }
                if let Some(related) = hit.related_path {
                    v = v.with_related(related);
                }
                if let Some(layer) = hit.target_layer {
                    v = v.with_target_layer(layer);
                }
                v
            })
            .collect())
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("default_severity", &self.default_severity)
            .field("predicate", &self.predicate.id())
            .field("fix_shape", &self.fix_shape)
            .finish()
    }
}
