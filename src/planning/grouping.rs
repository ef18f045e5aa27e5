//! Violation → change unit expansion
//!
//! Each rule declares a [`FixShape`]; the shape decides which atomic file
//! operations one violation turns into. Units describing the same operation
//! (same kind, target and destination) are merged, so two violations on one
//! file produce one `Modify`.

use super::ordering::{order_units, PlanError};
use super::{ChangeUnit, Plan, PriorityPolicy, TextEdit};
use crate::graph::ModuleGraph;
use crate::models::{Layer, Violation};
use crate::parsers::Language;
use crate::rules::{FixShape, RuleRegistry};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Turns violations into an ordered [`Plan`]
pub struct PlanSynthesizer<'a> {
    registry: &'a RuleRegistry,
    graph: &'a ModuleGraph,
}

impl<'a> PlanSynthesizer<'a> {
    pub fn new(registry: &'a RuleRegistry, graph: &'a ModuleGraph) -> Self {
        Self { registry, graph }
    }

    /// Group and order. A dependency cycle fails the whole synthesis.
    pub fn synthesize(
        &self,
        violations: &[Violation],
        policy: &PriorityPolicy,
    ) -> Result<Plan, PlanError> {
        let units = self.group(violations);
        debug!(
            "Grouped {} violations into {} change units",
            violations.len(),
            units.len()
        );
        order_units(units, policy)
    }

    /// Expand violations into merged change units, in id order
    pub fn group(&self, violations: &[Violation]) -> Vec<ChangeUnit> {
        let actionable: Vec<(&Violation, FixShape)> = violations
            .iter()
            .filter(|v| !v.is_internal())
            .map(|v| (v, self.fix_shape(v)))
            .filter(|(_, shape)| *shape != FixShape::None)
            .collect();

        // Every consumer of one dependency shares a single abstraction or
        // destination, anchored at the smallest consumer path
        let mut anchors: BTreeMap<(FixShape, &Path), &Path> = BTreeMap::new();
        for (v, shape) in &actionable {
            if let Some(related) = v.related_path.as_deref() {
                let consumer = v.location.path.as_path();
                anchors
                    .entry((*shape, related))
                    .and_modify(|a| {
                        if consumer < *a {
                            *a = consumer;
                        }
                    })
                    .or_insert(consumer);
            }
        }

        let mut merged: BTreeMap<String, ChangeUnit> = BTreeMap::new();
        for (v, shape) in actionable {
            let anchor = v
                .related_path
                .as_deref()
                .and_then(|r| anchors.get(&(shape, r)).copied())
                .unwrap_or(v.location.path.as_path());

            for mut unit in self.expand(shape, v, anchor) {
                unit.severity = v.severity;
                unit.violation_ids.insert(v.id.clone());
                unit.rule_ids.insert(v.rule_id.clone());
                match merged.get_mut(&unit.id) {
                    Some(existing) => {
                        for edit in existing.absorb(unit) {
                            warn!(
                                "{}: `{}` is already rewritten differently, not rewriting it to `{}`",
                                existing.id, edit.find, edit.replace
                            );
                        }
                    }
                    None => {
                        merged.insert(unit.id.clone(), unit);
                    }
                }
            }
        }
        merged.into_values().collect()
    }

    fn fix_shape(&self, v: &Violation) -> FixShape {
        self.registry
            .get(&v.rule_id)
            .map(|r| r.fix_shape)
            .or_else(|| v.suggested_fix_kind.as_deref().and_then(FixShape::parse))
            .unwrap_or(FixShape::None)
    }

    fn expand(&self, shape: FixShape, v: &Violation, anchor: &Path) -> Vec<ChangeUnit> {
        let file = v.location.path.as_path();
        let why = format!("[{}] {} ({})", v.rule_id, v.message, v.location);
        match shape {
            FixShape::None => Vec::new(),
            FixShape::ModifyInPlace => vec![ChangeUnit::modify(file, &why)],
            FixShape::ExtractAbstraction => match v.related_path.as_deref() {
                Some(dep) => self.extract_abstraction(file, dep, anchor, v.target_layer, &why),
                None => vec![ChangeUnit::modify(file, &why)],
            },
            FixShape::MoveToLayer => {
                let moved = v.related_path.as_deref().unwrap_or(file);
                self.move_to_layer(file, moved, anchor, &why)
            }
            FixShape::SplitFile => split_file(file, &why),
            FixShape::AddTest => vec![ChangeUnit::create(
                test_path_for(file),
                test_stub(file),
                &format!("add test: {}", why),
            )],
        }
    }

    /// New abstraction next to the anchor consumer, consumer switched to it
    fn extract_abstraction(
        &self,
        consumer: &Path,
        dep: &Path,
        anchor: &Path,
        layer: Option<Layer>,
        why: &str,
    ) -> Vec<ChangeUnit> {
        let dir = anchor.parent().unwrap_or(Path::new(""));
        let port = dir.join(format!("{}_port.{}", stem(dep), extension(consumer)));

        let mut units = Vec::new();
        if !self.graph.contains(&port) {
            units.push(ChangeUnit::create(
                &port,
                abstraction_stub(&port, dep, layer.unwrap_or(Layer::Core)),
                &format!("introduce abstraction over {}: {}", dep.display(), why),
            ));
        }

        let mut modify = ChangeUnit::modify(
            consumer,
            &format!("depend on {} instead: {}", port.display(), why),
        )
        .referencing(&port)
        .dropping(dep);
        modify.edits.extend(import_rewrite(consumer, dep, &port));
        units.push(modify);
        units
    }

    /// Rename `moved` next to the anchor consumer and update every importer
    fn move_to_layer(&self, file: &Path, moved: &Path, anchor: &Path, why: &str) -> Vec<ChangeUnit> {
        let Some(name) = moved.file_name() else {
            return vec![ChangeUnit::modify(file, why)];
        };
        let dest = anchor.parent().unwrap_or(Path::new("")).join(name);
        if dest == moved || self.graph.contains(&dest) {
            return vec![ChangeUnit::modify(
                file,
                &format!("{} (cannot move to {}, resolve manually)", why, dest.display()),
            )];
        }

        let mut units = vec![ChangeUnit::rename(
            moved,
            &dest,
            &format!("move into {}: {}", dest.parent().unwrap_or(Path::new("")).display(), why),
        )];
        for edge in self.graph.importers_of(moved) {
            if edge.from == moved {
                continue;
            }
            let mut modify = ChangeUnit::modify(
                &edge.from,
                &format!("update import of moved {}: {}", moved.display(), why),
            )
            .referencing(&dest)
            .dropping(moved);
            modify.edits.extend(import_rewrite(&edge.from, moved, &dest));
            units.push(modify);
        }
        units
    }
}

fn split_file(file: &Path, why: &str) -> Vec<ChangeUnit> {
    let part = sibling(file, &format!("{}_split.{}", stem(file), extension(file)));
    vec![
        ChangeUnit::create(&part, split_stub(file), &format!("split target: {}", why)),
        ChangeUnit::modify(file, &format!("move code into {}: {}", part.display(), why))
            .referencing(&part),
    ]
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sibling(path: &Path, name: &str) -> PathBuf {
    path.parent().unwrap_or(Path::new("")).join(name)
}

/// Conventional test file location for a source file
pub(crate) fn test_path_for(file: &Path) -> PathBuf {
    let (stem, ext) = (stem(file), extension(file));
    let name = match Language::from_path(file) {
        Some(Language::Python) => format!("test_{}.py", stem),
        Some(Language::TypeScript) | Some(Language::Tsx) => format!("{}.test.{}", stem, ext),
        Some(Language::Rust) => format!("{}_tests.rs", stem),
        None => format!("{}_test.{}", stem, ext),
    };
    sibling(file, &name)
}

fn pascal_case(s: &str) -> String {
    s.split(|c: char| c == '_' || c == '-' || c == '.')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

fn abstraction_stub(port: &Path, dep: &Path, layer: Layer) -> String {
    let name = format!("{}Port", pascal_case(&stem(dep)));
    let dep = dep.display();
    match Language::from_path(port) {
        Some(Language::Python) => format!(
            "\"\"\"Abstraction over {dep} owned by the {layer} layer.\"\"\"\n\nfrom typing import Protocol\n\n\nclass {name}(Protocol):\n    \"\"\"Operations the {layer} layer needs.\"\"\"\n"
        ),
        Some(Language::TypeScript) | Some(Language::Tsx) => format!(
            "// Abstraction over {dep} owned by the {layer} layer.\nexport interface {name} {{}}\n"
        ),
        Some(Language::Rust) => format!(
            "//! Abstraction over {dep} owned by the {layer} layer.\n\npub trait {name} {{}}\n"
        ),
        None => format!("Abstraction over {dep} owned by the {layer} layer.\n"),
    }
}

fn split_stub(file: &Path) -> String {
    let from = file.display();
    match Language::from_path(file) {
        Some(Language::Python) => format!("\"\"\"Split out of {from}.\"\"\"\n"),
        Some(Language::TypeScript) | Some(Language::Tsx) => {
            format!("// Split out of {from}.\nexport {{}};\n")
        }
        Some(Language::Rust) => format!("//! Split out of {from}.\n"),
        None => format!("Split out of {from}.\n"),
    }
}

fn test_stub(file: &Path) -> String {
    let stem = stem(file);
    match Language::from_path(file) {
        Some(Language::Python) => {
            let module = python_module(file).unwrap_or_else(|| stem.clone());
            format!(
                "import {module}\n\n\ndef test_{stem}_imports():\n    assert {module} is not None\n"
            )
        }
        Some(Language::TypeScript) | Some(Language::Tsx) => format!(
            "import * as subject from './{stem}';\n\ntest('{stem} loads', () => {{\n  expect(subject).toBeDefined();\n}});\n"
        ),
        Some(Language::Rust) => format!(
            "#[cfg(test)]\nmod tests {{\n    #[test]\n    fn {stem}_smoke() {{}}\n}}\n"
        ),
        None => format!("Tests for {}\n", file.display()),
    }
}

/// Edit that points an importer at `new` instead of `old`, when the import
/// form is known for the importer's language
fn import_rewrite(importer: &Path, old: &Path, new: &Path) -> Option<TextEdit> {
    let (find, replace) = match Language::from_path(importer)? {
        Language::Python => (python_module(old)?, python_module(new)?),
        Language::TypeScript | Language::Tsx => {
            (relative_specifier(importer, old)?, relative_specifier(importer, new)?)
        }
        Language::Rust => (rust_module_path(old)?, rust_module_path(new)?),
    };
    (find != replace).then_some(TextEdit { find, replace })
}

fn normal_components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// `src/app/core/db.py` → `app.core.db`
fn python_module(path: &Path) -> Option<String> {
    let mut parts = normal_components(&path.with_extension(""));
    if parts.first().map(String::as_str) == Some("src") {
        parts.remove(0);
    }
    if parts.last().map(String::as_str) == Some("__init__") {
        parts.pop();
    }
    (!parts.is_empty()).then(|| parts.join("."))
}

/// Relative specifier from `importer` to `target`, without extension
fn relative_specifier(importer: &Path, target: &Path) -> Option<String> {
    let from = normal_components(importer.parent().unwrap_or(Path::new("")));
    let mut to = normal_components(&target.with_extension(""));
    if to.last().map(String::as_str) == Some("index") && to.len() > 1 {
        to.pop();
    }
    if to.is_empty() {
        return None;
    }
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    let ups = from.len() - common;
    let rest = to[common..].join("/");
    Some(if ups == 0 {
        format!("./{}", rest)
    } else {
        format!("{}{}", "../".repeat(ups), rest)
    })
}

/// `src/core/db.rs` → `crate::core::db`
fn rust_module_path(path: &Path) -> Option<String> {
    let parts = normal_components(&path.with_extension(""));
    let src = parts.iter().position(|p| p == "src")?;
    let mut module: Vec<&str> = parts[src + 1..].iter().map(String::as_str).collect();
    if matches!(module.last(), Some(&"mod") | Some(&"lib") | Some(&"main")) {
        module.pop();
    }
    if module.is_empty() {
        return None;
    }
    Some(format!("crate::{}", module.join("::")))
}
