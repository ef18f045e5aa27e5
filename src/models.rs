//! Core data models for archplan
//!
//! These models are shared by the model builder, the rule engine, the
//! health calculator and the plan synthesizer.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

/// Generate a deterministic violation ID based on content hash.
///
/// The ID is stable across runs and platforms, which lets a persisted plan
/// refer back to the violations it was synthesized from.
pub fn deterministic_violation_id(rule_id: &str, path: &Path, line: u32, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rule_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(b"\n");
    hasher.update(line.to_le_bytes());
    hasher.update(b"\n");
    hasher.update(message.as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Severity levels for violations
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Minor,
    Major,
    Critical,
}

impl Severity {
    /// All severities, most severe first
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::Major,
        Severity::Minor,
        Severity::Info,
    ];

    pub fn parse(s: &str) -> Option<Severity> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "major" | "high" => Some(Severity::Major),
            "minor" | "medium" | "low" => Some(Severity::Minor),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Major => write!(f, "major"),
            Severity::Minor => write!(f, "minor"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// Architectural tier a source file belongs to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Core,
    Infrastructure,
    Presentation,
    #[default]
    Unknown,
}

impl Layer {
    pub fn parse(s: &str) -> Option<Layer> {
        match s.trim().to_lowercase().as_str() {
            "core" | "domain" => Some(Layer::Core),
            "infrastructure" | "infra" => Some(Layer::Infrastructure),
            "presentation" | "ui" => Some(Layer::Presentation),
            "unknown" => Some(Layer::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Core => write!(f, "core"),
            Layer::Infrastructure => write!(f, "infrastructure"),
            Layer::Presentation => write!(f, "presentation"),
            Layer::Unknown => write!(f, "unknown"),
        }
    }
}

/// Rule category. Categories are data supplied by the rule pack, so this is
/// an open set rather than an enum.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    /// Category recorded when a rule predicate fails or panics
    pub const INTERNAL: &'static str = "internal";
    pub const LAYERING: &'static str = "layering";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_lowercase())
    }

    pub fn internal() -> Self {
        Self::new(Self::INTERNAL)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        Category::new(s)
    }
}

/// Inclusive 1-based line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn line(line: u32) -> Self {
        Self::new(line, line)
    }
}

/// Where a violation was found
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_range: Option<LineRange>,
}

impl Location {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            line_range: None,
        }
    }

    pub fn at(path: impl Into<PathBuf>, range: LineRange) -> Self {
        Self {
            path: path.into(),
            line_range: Some(range),
        }
    }

    /// First line, 0 when the violation applies to the whole file
    pub fn start_line(&self) -> u32 {
        self.line_range.map(|r| r.start).unwrap_or(0)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line_range {
            Some(r) if r.start == r.end => write!(f, "{}:{}", self.path.display(), r.start),
            Some(r) => write!(f, "{}:{}-{}", self.path.display(), r.start, r.end),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// A detected deviation from a configured architectural rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub id: String,
    pub rule_id: String,
    pub category: Category,
    pub severity: Severity,
    pub location: Location,
    pub message: String,
    /// Fix shape the originating rule declares (catalog id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix_kind: Option<String>,
    /// Second file involved, e.g. the import target of a layering violation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_path: Option<PathBuf>,
    /// Layer the fix should move code into, when the rule knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_layer: Option<Layer>,
}

impl Violation {
    pub fn new(
        rule_id: impl Into<String>,
        category: Category,
        severity: Severity,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        let rule_id = rule_id.into();
        let message = message.into();
        let id = deterministic_violation_id(
            &rule_id,
            &location.path,
            location.start_line(),
            &message,
        );
        Self {
            id,
            rule_id,
            category,
            severity,
            location,
            message,
            suggested_fix_kind: None,
            related_path: None,
            target_layer: None,
        }
    }

    /// Record for a rule whose evaluation failed on one file
    pub fn internal(rule_id: &str, path: &Path, error: &str) -> Self {
        Self::new(
            rule_id,
            Category::internal(),
            Severity::Info,
            Location::file(path),
            format!("rule '{}' failed to evaluate: {}", rule_id, error),
        )
    }

    pub fn with_fix_kind(mut self, kind: impl Into<String>) -> Self {
        self.suggested_fix_kind = Some(kind.into());
        self
    }

    pub fn with_related(mut self, path: impl Into<PathBuf>) -> Self {
        self.related_path = Some(path.into());
        self
    }

    pub fn with_target_layer(mut self, layer: Layer) -> Self {
        self.target_layer = Some(layer);
        self
    }

    pub fn is_internal(&self) -> bool {
        self.category.as_str() == Category::INTERNAL
    }

    /// Total order used for the final deterministic merge:
    /// `(path, line start, rule id)` with message and id as tie-breakers.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.location
            .path
            .cmp(&other.location.path)
            .then_with(|| self.location.start_line().cmp(&other.location.start_line()))
            .then_with(|| self.rule_id.cmp(&other.rule_id))
            .then_with(|| self.message.cmp(&other.message))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Summary of violations by severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub critical: usize,
    pub major: usize,
    pub minor: usize,
    pub info: usize,
    pub total: usize,
}

impl ViolationSummary {
    pub fn from_violations<'a>(violations: impl IntoIterator<Item = &'a Violation>) -> Self {
        let mut summary = Self::default();
        for v in violations {
            match v.severity {
                Severity::Critical => summary.critical += 1,
                Severity::Major => summary.major += 1,
                Severity::Minor => summary.minor += 1,
                Severity::Info => summary.info += 1,
            }
            summary.total += 1;
        }
        summary
    }

    /// Violations that count against health (everything but info)
    pub fn actionable(&self) -> usize {
        self.critical + self.major + self.minor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_id_is_stable() {
        let a = deterministic_violation_id("r1", Path::new("src/a.rs"), 3, "msg");
        let b = deterministic_violation_id("r1", Path::new("src/a.rs"), 3, "msg");
        let c = deterministic_violation_id("r1", Path::new("src/a.rs"), 4, "msg");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_severity_ordering_and_parse() {
        assert!(Severity::Critical > Severity::Major);
        assert!(Severity::Minor > Severity::Info);
        assert_eq!(Severity::parse("HIGH"), Some(Severity::Major));
        assert_eq!(Severity::parse("bogus"), None);
    }

    #[test]
    fn test_canonical_order() {
        let a = Violation::new(
            "b-rule",
            Category::new("x"),
            Severity::Minor,
            Location::at("a.rs", LineRange::line(5)),
            "m",
        );
        let b = Violation::new(
            "a-rule",
            Category::new("x"),
            Severity::Critical,
            Location::at("a.rs", LineRange::line(5)),
            "m",
        );
        let c = Violation::new(
            "a-rule",
            Category::new("x"),
            Severity::Critical,
            Location::file("a.rs"),
            "m",
        );
        let mut all = vec![a.clone(), b.clone(), c.clone()];
        all.sort_by(|x, y| x.canonical_cmp(y));
        assert_eq!(all, vec![c, b, a]);
    }

    #[test]
    fn test_summary_counts() {
        let mk = |s| {
            Violation::new("r", Category::new("x"), s, Location::file("f"), "m")
        };
        let all = vec![
            mk(Severity::Critical),
            mk(Severity::Critical),
            mk(Severity::Minor),
            mk(Severity::Info),
        ];
        let summary = ViolationSummary::from_violations(&all);
        assert_eq!(summary.critical, 2);
        assert_eq!(summary.minor, 1);
        assert_eq!(summary.info, 1);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.actionable(), 3);
    }
}
