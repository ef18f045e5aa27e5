//! Refactor plan synthesis
//!
//! Violations are grouped into atomic [`ChangeUnit`]s according to the fix
//! shape their rule declares ([`grouping`]), dependency edges are derived
//! from file-level structure, and units are ordered into priority-tiered
//! [`Phase`]s ([`ordering`]).
//!
//! Invariant of every [`Plan`]: each unit's dependencies appear in an earlier
//! phase, or earlier in the same phase. A dependency cycle fails synthesis as
//! a whole; no partial plan is produced.

mod grouping;
mod ordering;

pub use grouping::PlanSynthesizer;
pub use ordering::{order_units, PlanCycleError, PlanError};

use crate::models::Severity;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of file operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Modify,
    Rename,
    Delete,
}

impl ChangeKind {
    /// Tie-break rank inside a phase: creations first, deletions last
    fn rank(&self) -> u8 {
        match self {
            ChangeKind::Create => 0,
            ChangeKind::Rename => 1,
            ChangeKind::Modify => 2,
            ChangeKind::Delete => 3,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "create"),
            ChangeKind::Modify => write!(f, "modify"),
            ChangeKind::Rename => write!(f, "rename"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// Literal text replacement applied by a `Modify` unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextEdit {
    pub find: String,
    pub replace: String,
}

/// Smallest atomic file operation a plan can schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeUnit {
    pub id: String,
    pub kind: ChangeKind,
    pub target_path: PathBuf,
    /// Destination of a `Rename`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_to: Option<PathBuf>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    pub rationale: String,
    /// Severity of the most severe originating violation
    pub severity: Severity,
    /// Paths the target refers to once this unit is applied
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub references: BTreeSet<PathBuf>,
    /// Paths the target stops referring to once this unit is applied
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub drops_references: BTreeSet<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edits: Vec<TextEdit>,
    /// Initial content of a `Create`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub violation_ids: BTreeSet<String>,
    #[serde(default)]
    pub rule_ids: BTreeSet<String>,
}

impl ChangeUnit {
    /// Readable, deterministic unit id derived from the operation
    pub fn make_id(kind: ChangeKind, target: &Path, rename_to: Option<&Path>) -> String {
        match rename_to {
            Some(to) => format!("{}:{}->{}", kind, slash_path(target), slash_path(to)),
            None => format!("{}:{}", kind, slash_path(target)),
        }
    }

    pub fn new(kind: ChangeKind, target: impl Into<PathBuf>, rationale: impl Into<String>) -> Self {
        let target_path = target.into();
        Self {
            id: Self::make_id(kind, &target_path, None),
            kind,
            target_path,
            rename_to: None,
            depends_on: BTreeSet::new(),
            rationale: rationale.into(),
            severity: Severity::Info,
            references: BTreeSet::new(),
            drops_references: BTreeSet::new(),
            edits: Vec::new(),
            content: None,
            violation_ids: BTreeSet::new(),
            rule_ids: BTreeSet::new(),
        }
    }

    pub fn create(target: impl Into<PathBuf>, content: impl Into<String>, rationale: &str) -> Self {
        let mut unit = Self::new(ChangeKind::Create, target, rationale);
        unit.content = Some(content.into());
        unit
    }

    pub fn modify(target: impl Into<PathBuf>, rationale: &str) -> Self {
        Self::new(ChangeKind::Modify, target, rationale)
    }

    pub fn rename(from: impl Into<PathBuf>, to: impl Into<PathBuf>, rationale: &str) -> Self {
        let mut unit = Self::new(ChangeKind::Rename, from, rationale);
        let to = to.into();
        unit.id = Self::make_id(ChangeKind::Rename, &unit.target_path, Some(&to));
        unit.rename_to = Some(to);
        unit
    }

    pub fn delete(target: impl Into<PathBuf>, rationale: &str) -> Self {
        Self::new(ChangeKind::Delete, target, rationale)
    }

    /// Override the derived id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    pub fn referencing(mut self, path: impl Into<PathBuf>) -> Self {
        self.references.insert(path.into());
        self
    }

    pub fn dropping(mut self, path: impl Into<PathBuf>) -> Self {
        self.drops_references.insert(path.into());
        self
    }

    pub fn with_edit(mut self, find: impl Into<String>, replace: impl Into<String>) -> Self {
        self.edits.push(TextEdit {
            find: find.into(),
            replace: replace.into(),
        });
        self
    }

    /// Every path this unit writes, for per-path locking
    pub fn touched_paths(&self) -> Vec<&Path> {
        let mut paths = vec![self.target_path.as_path()];
        if let Some(to) = &self.rename_to {
            paths.push(to.as_path());
        }
        paths
    }

    /// Fold another unit for the same operation into this one. Returns the
    /// edits dropped because an existing edit rewrites the same text
    /// differently.
    fn absorb(&mut self, other: ChangeUnit) -> Vec<TextEdit> {
        if !self.rationale.split("; ").any(|r| r == other.rationale) {
            self.rationale = format!("{}; {}", self.rationale, other.rationale);
        }
        self.severity = self.severity.max(other.severity);
        self.depends_on.extend(other.depends_on);
        self.references.extend(other.references);
        self.drops_references.extend(other.drops_references);
        let mut conflicts = Vec::new();
        for edit in other.edits {
            if self.edits.contains(&edit) {
                continue;
            }
            if self.edits.iter().any(|e| e.find == edit.find) {
                self.rationale = format!(
                    "{}; conflicting rewrite of `{}` to `{}` left for manual follow-up",
                    self.rationale, edit.find, edit.replace
                );
                conflicts.push(edit);
            } else {
                self.edits.push(edit);
            }
        }
        if self.content.is_none() {
            self.content = other.content;
        }
        self.violation_ids.extend(other.violation_ids);
        self.rule_ids.extend(other.rule_ids);
        conflicts
    }

    /// One-line description, e.g. `rename a.py -> core/a.py`
    pub fn describe(&self) -> String {
        match &self.rename_to {
            Some(to) => format!(
                "{} {} -> {}",
                self.kind,
                self.target_path.display(),
                to.display()
            ),
            None => format!("{} {}", self.kind, self.target_path.display()),
        }
    }
}

fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// An ordered, user-confirmable batch of change units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub label: String,
    pub priority_tier: u8,
    pub units: Vec<ChangeUnit>,
}

/// Ordered list of phases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub phases: Vec<Phase>,
}

impl Plan {
    pub fn new(phases: Vec<Phase>) -> Self {
        let mut hasher = Sha256::new();
        for phase in &phases {
            hasher.update([phase.priority_tier]);
            for unit in &phase.units {
                hasher.update(unit.id.as_bytes());
                hasher.update(b"\n");
            }
        }
        let digest = hasher.finalize();
        let id = digest[..6].iter().map(|b| format!("{:02x}", b)).collect::<String>();
        Self {
            id: format!("plan-{}", id),
            phases,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phases.iter().all(|p| p.units.is_empty())
    }

    pub fn total_units(&self) -> usize {
        self.phases.iter().map(|p| p.units.len()).sum()
    }

    pub fn units(&self) -> impl Iterator<Item = &ChangeUnit> + '_ {
        self.phases.iter().flat_map(|p| p.units.iter())
    }

    pub fn unit(&self, id: &str) -> Option<&ChangeUnit> {
        self.units().find(|u| u.id == id)
    }

    /// `(phase index, position)` of a unit
    pub fn position(&self, id: &str) -> Option<(usize, usize)> {
        self.phases.iter().enumerate().find_map(|(pi, phase)| {
            phase
                .units
                .iter()
                .position(|u| u.id == id)
                .map(|ui| (pi, ui))
        })
    }

    /// Check the ordering invariant; returns the first offending
    /// `(unit, dependency)` pair
    pub fn ordering_violation(&self) -> Option<(String, String)> {
        for unit in self.units() {
            let Some(at) = self.position(&unit.id) else {
                continue;
            };
            for dep in &unit.depends_on {
                match self.position(dep) {
                    Some(dep_at) if dep_at < at => {}
                    _ => return Some((unit.id.clone(), dep.clone())),
                }
            }
        }
        None
    }
}

/// Maps violation severity to a phase tier (1 runs first)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityPolicy {
    tiers: BTreeMap<Severity, u8>,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert(Severity::Critical, 1);
        tiers.insert(Severity::Major, 2);
        tiers.insert(Severity::Minor, 3);
        tiers.insert(Severity::Info, 3);
        Self { tiers }
    }
}

impl PriorityPolicy {
    pub fn with_tier(mut self, severity: Severity, tier: u8) -> Self {
        self.tiers.insert(severity, tier.max(1));
        self
    }

    pub fn tier(&self, severity: Severity) -> u8 {
        self.tiers.get(&severity).copied().unwrap_or(3)
    }

    pub fn label(&self, tier: u8) -> String {
        let severities: Vec<String> = Severity::ALL
            .iter()
            .filter(|s| self.tier(**s) == tier)
            .map(|s| s.to_string())
            .collect();
        if severities.is_empty() {
            format!("Tier {} (pulled forward)", tier)
        } else {
            format!("Tier {}: {} fixes", tier, severities.join(" + "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_ids_are_readable() {
        assert_eq!(ChangeUnit::modify("src/a.py", "r").id, "modify:src/a.py");
        assert_eq!(
            ChangeUnit::rename("ui/fmt.py", "core/fmt.py", "r").id,
            "rename:ui/fmt.py->core/fmt.py"
        );
    }

    #[test]
    fn test_absorb_merges_sets() {
        let mut a = ChangeUnit::modify("a.py", "first")
            .with_severity(Severity::Minor)
            .referencing("x.py");
        let b = ChangeUnit::modify("a.py", "second")
            .with_severity(Severity::Critical)
            .dropping("y.py");
        a.absorb(b.clone());
        a.absorb(b);
        assert_eq!(a.rationale, "first; second");
        assert_eq!(a.severity, Severity::Critical);
        assert!(a.references.contains(Path::new("x.py")));
        assert!(a.drops_references.contains(Path::new("y.py")));
    }

    #[test]
    fn test_absorb_keeps_first_rewrite_of_same_text() {
        let mut a = ChangeUnit::modify("a.py", "first").with_edit("app.db", "app.core.db");
        let b = ChangeUnit::modify("a.py", "second")
            .with_edit("app.db", "app.core.db_port")
            .with_edit("app.cache", "app.core.cache");
        let conflicts = a.absorb(b);
        assert_eq!(
            conflicts,
            vec![TextEdit {
                find: "app.db".into(),
                replace: "app.core.db_port".into()
            }]
        );
        let finds: Vec<&str> = a.edits.iter().map(|e| e.find.as_str()).collect();
        assert_eq!(finds, vec!["app.db", "app.cache"]);
        assert_eq!(a.edits[0].replace, "app.core.db");
        assert!(a.rationale.ends_with("conflicting rewrite of `app.db` to `app.core.db_port` left for manual follow-up"));
    }

    #[test]
    fn test_default_policy() {
        let p = PriorityPolicy::default();
        assert_eq!(p.tier(Severity::Critical), 1);
        assert_eq!(p.tier(Severity::Major), 2);
        assert_eq!(p.tier(Severity::Minor), 3);
        assert_eq!(p.tier(Severity::Info), 3);
        assert_eq!(p.label(3), "Tier 3: minor + info fixes");
    }

    #[test]
    fn test_plan_id_is_deterministic() {
        let phase = Phase {
            label: "x".into(),
            priority_tier: 1,
            units: vec![ChangeUnit::modify("a.py", "r")],
        };
        assert_eq!(Plan::new(vec![phase.clone()]).id, Plan::new(vec![phase]).id);
        assert!(Plan::new(Vec::new()).is_empty());
    }
}
